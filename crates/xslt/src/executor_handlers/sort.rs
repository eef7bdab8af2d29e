//! `xsl:sort`: ordering a node list by one or more keys.

use crate::ast::{CaseOrder, SortDataType, SortKey, SortOrder};
use crate::error::ExecutionError;
use crate::executor::{Focus, TransformContext};
use quill_xpath1::DataSourceNode;
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy)]
struct SortSettings {
    order: SortOrder,
    data_type: SortDataType,
    case_order: CaseOrder,
}

#[derive(Debug, Clone)]
enum SortValue {
    Text(String),
    Number(f64),
}

fn resolve_settings<'s, 'a, N: DataSourceNode<'a> + 'a>(
    executor: &TransformContext<'s, 'a, N>,
    key: &SortKey,
    focus: Focus<N>,
) -> Result<SortSettings, ExecutionError> {
    let order = match &key.order {
        Some(avt) => match executor.eval_avt(avt, focus)?.trim() {
            "ascending" => SortOrder::Ascending,
            "descending" => SortOrder::Descending,
            other => {
                executor.warn(format!("unknown sort order '{}', using ascending", other));
                SortOrder::Ascending
            }
        },
        None => SortOrder::Ascending,
    };
    let data_type = match &key.data_type {
        Some(avt) => match executor.eval_avt(avt, focus)?.trim() {
            "text" => SortDataType::Text,
            "number" => SortDataType::Number,
            other => {
                executor.warn(format!("unknown sort data-type '{}', sorting as text", other));
                SortDataType::Text
            }
        },
        None => SortDataType::Text,
    };
    let case_order = match &key.case_order {
        Some(avt) => match executor.eval_avt(avt, focus)?.trim() {
            "lower-first" => CaseOrder::LowerFirst,
            "upper-first" => CaseOrder::UpperFirst,
            other => {
                executor.warn(format!("unknown case-order '{}', using upper-first", other));
                CaseOrder::UpperFirst
            }
        },
        None => CaseOrder::UpperFirst,
    };
    Ok(SortSettings {
        order,
        data_type,
        case_order,
    })
}

/// Case-insensitive first; among strings equal ignoring case, `case_order` decides at
/// the first character that differs.
fn compare_text(a: &str, b: &str, case_order: CaseOrder) -> Ordering {
    let folded = a.to_lowercase().cmp(&b.to_lowercase());
    if folded != Ordering::Equal {
        return folded;
    }
    for (x, y) in a.chars().zip(b.chars()) {
        if x == y {
            continue;
        }
        let upper_first = match (x.is_uppercase(), y.is_uppercase()) {
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            _ => x.cmp(&y),
        };
        return match case_order {
            CaseOrder::UpperFirst => upper_first,
            CaseOrder::LowerFirst => upper_first.reverse(),
        };
    }
    a.cmp(b)
}

/// NaN sorts before every number.
fn compare_numbers(a: f64, b: f64) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
    }
}

fn compare_values(a: &SortValue, b: &SortValue, settings: &SortSettings) -> Ordering {
    let ordering = match (a, b) {
        (SortValue::Number(x), SortValue::Number(y)) => compare_numbers(*x, *y),
        (SortValue::Text(x), SortValue::Text(y)) => compare_text(x, y, settings.case_order),
        _ => Ordering::Equal,
    };
    match settings.order {
        SortOrder::Ascending => ordering,
        SortOrder::Descending => ordering.reverse(),
    }
}

/// Sorts `nodes` in place. Each key's `select` is evaluated with the node as context and
/// its position in the unsorted list. The sort is stable: nodes equal on every key keep
/// their original order.
pub(crate) fn sort_nodes<'s, 'a, N: DataSourceNode<'a> + 'a>(
    executor: &TransformContext<'s, 'a, N>,
    nodes: &mut Vec<N>,
    sort_keys: &[SortKey],
    focus: Focus<N>,
) -> Result<(), ExecutionError> {
    if sort_keys.is_empty() || nodes.len() < 2 {
        return Ok(());
    }

    let settings = sort_keys
        .iter()
        .map(|key| resolve_settings(executor, key, focus))
        .collect::<Result<Vec<_>, _>>()?;

    let size = nodes.len();
    let mut rows: Vec<Vec<SortValue>> = Vec::with_capacity(size);
    for (i, &node) in nodes.iter().enumerate() {
        let at = Focus {
            node,
            position: i + 1,
            size,
        };
        let mut row = Vec::with_capacity(sort_keys.len());
        for (key, setting) in sort_keys.iter().zip(&settings) {
            let value = executor.eval(&key.select, at)?;
            row.push(match setting.data_type {
                SortDataType::Number => SortValue::Number(value.to_number()),
                SortDataType::Text => SortValue::Text(value.to_string()),
            });
        }
        rows.push(row);
    }

    let mut order: Vec<usize> = (0..size).collect();
    order.sort_by(|&a, &b| {
        rows[a]
            .iter()
            .zip(&rows[b])
            .zip(&settings)
            .map(|((x, y), setting)| compare_values(x, y, setting))
            .find(|ordering| *ordering != Ordering::Equal)
            .unwrap_or(Ordering::Equal)
    });
    let original = std::mem::take(nodes);
    nodes.extend(order.into_iter().map(|i| original[i]));
    Ok(())
}

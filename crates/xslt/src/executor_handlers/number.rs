//! `xsl:number`: finding the numbers to format, then formatting them.

use crate::ast::{NumberInstruction, NumberLevel};
use crate::error::ExecutionError;
use crate::executor::{Focus, TransformContext};
use crate::number::{Grouping, format_numbers};
use crate::output::OutputBuilder;
use crate::pattern::Pattern;
use quill_xpath1::{DataSourceNode, NodeType, number_to_string};

struct Counter<'e, 's, 'a, N: DataSourceNode<'a>> {
    executor: &'e TransformContext<'s, 'a, N>,
    target: N,
    count: Option<&'e Pattern>,
    from: Option<&'e Pattern>,
}

impl<'a, N: DataSourceNode<'a> + 'a> Counter<'_, '_, 'a, N> {
    /// Without a `count` pattern, nodes of the target's type and expanded name count.
    fn counts(&self, node: N) -> Result<bool, ExecutionError> {
        match self.count {
            Some(pattern) => Ok(pattern.matches(node, &self.executor.match_env())?),
            None => Ok(node.node_type() == self.target.node_type()
                && node.namespace_uri() == self.target.namespace_uri()
                && node.name().map(|q| q.local_part)
                    == self.target.name().map(|q| q.local_part)),
        }
    }

    fn is_from(&self, node: N) -> Result<bool, ExecutionError> {
        match self.from {
            Some(pattern) => Ok(pattern.matches(node, &self.executor.match_env())?),
            None => Ok(false),
        }
    }

    /// 1 plus the number of preceding siblings that count.
    fn sibling_number(&self, node: N) -> Result<u64, ExecutionError> {
        let Some(parent) = node.parent() else {
            return Ok(1);
        };
        let mut number = 1;
        for sibling in parent.children() {
            if sibling == node {
                break;
            }
            if self.counts(sibling)? {
                number += 1;
            }
        }
        Ok(number)
    }

    /// Ancestor-or-self nodes that count, innermost first, below the nearest `from` match.
    fn counted_ancestors(&self, first_only: bool) -> Result<Vec<N>, ExecutionError> {
        let mut found = Vec::new();
        let mut current = Some(self.target);
        while let Some(node) = current {
            if self.is_from(node)? {
                break;
            }
            if self.counts(node)? {
                found.push(node);
                if first_only {
                    break;
                }
            }
            current = node.parent();
        }
        Ok(found)
    }

    fn single(&self) -> Result<Vec<u64>, ExecutionError> {
        match self.counted_ancestors(true)?.first() {
            Some(&node) => Ok(vec![self.sibling_number(node)?]),
            None => Ok(Vec::new()),
        }
    }

    fn multiple(&self) -> Result<Vec<u64>, ExecutionError> {
        let mut numbers = self
            .counted_ancestors(false)?
            .into_iter()
            .map(|node| self.sibling_number(node))
            .collect::<Result<Vec<_>, _>>()?;
        numbers.reverse();
        Ok(numbers)
    }

    /// Counts matching nodes in document order up to the target, restarting after each
    /// node that matches `from`.
    fn any(&self) -> Result<Vec<u64>, ExecutionError> {
        let root = self.executor.root;
        let stop_at = match self.target.node_type() {
            NodeType::Attribute => self.target.parent().unwrap_or(root),
            _ => self.target,
        };
        let mut number = 0;
        let mut stack = vec![root];
        while let Some(node) = stack.pop() {
            if self.is_from(node)? {
                number = 0;
            }
            if self.counts(node)? {
                number += 1;
            }
            if node == stop_at {
                break;
            }
            let children: Vec<N> = node.children().collect();
            stack.extend(children.into_iter().rev());
        }
        if stop_at != self.target && self.counts(self.target)? {
            number += 1;
        }
        match number {
            0 => Ok(Vec::new()),
            n => Ok(vec![n]),
        }
    }
}

fn grouping<'s, 'a, N: DataSourceNode<'a> + 'a>(
    executor: &TransformContext<'s, 'a, N>,
    number: &NumberInstruction,
    focus: Focus<N>,
) -> Result<Option<Grouping>, ExecutionError> {
    let (Some(separator), Some(size)) = (&number.grouping_separator, &number.grouping_size) else {
        return Ok(None);
    };
    let separator = executor.eval_avt(separator, focus)?;
    let size = executor.eval_avt(size, focus)?;
    let (Some(separator), Ok(size)) = (separator.chars().next(), size.trim().parse::<usize>())
    else {
        executor.warn("ignoring invalid grouping in xsl:number");
        return Ok(None);
    };
    Ok((size > 0).then_some(Grouping { separator, size }))
}

pub(crate) fn handle_number<'s, 'a, N: DataSourceNode<'a> + 'a>(
    executor: &mut TransformContext<'s, 'a, N>,
    number: &NumberInstruction,
    focus: Focus<N>,
    builder: &mut dyn OutputBuilder,
) -> Result<(), ExecutionError> {
    let numbers = match &number.value {
        Some(value) => {
            let value = executor.eval(value, focus)?.to_number();
            if !value.is_finite() || value < 0.5 {
                builder.add_text(&number_to_string(value));
                return Ok(());
            }
            vec![(value + 0.5).floor() as u64]
        }
        None => {
            let counter = Counter {
                executor,
                target: focus.node,
                count: number.count.as_ref(),
                from: number.from.as_ref(),
            };
            match number.level {
                NumberLevel::Single => counter.single()?,
                NumberLevel::Multiple => counter.multiple()?,
                NumberLevel::Any => counter.any()?,
            }
        }
    };
    if numbers.is_empty() {
        return Ok(());
    }
    let format = executor.eval_avt(&number.format, focus)?;
    let grouping = grouping(executor, number, focus)?;
    builder.add_text(&format_numbers(&numbers, &format, grouping));
    Ok(())
}

//! Binary operator semantics: XPath 1.0 comparison rules, arithmetic and node-set union.

use crate::ast::BinaryOperator;
use crate::datasource::DataSourceNode;
use crate::engine::{XPathValue, string_to_number};
use crate::error::XPathError;
use std::collections::HashSet;

/// Applies `op` to two already evaluated operands.
pub fn evaluate<'a, N: DataSourceNode<'a>>(
    op: BinaryOperator,
    left: XPathValue<N>,
    right: XPathValue<N>,
) -> Result<XPathValue<N>, XPathError> {
    match op {
        BinaryOperator::Or => Ok(XPathValue::Boolean(left.to_bool() || right.to_bool())),
        BinaryOperator::And => Ok(XPathValue::Boolean(left.to_bool() && right.to_bool())),
        BinaryOperator::Equals
        | BinaryOperator::NotEquals
        | BinaryOperator::LessThan
        | BinaryOperator::LessThanOrEqual
        | BinaryOperator::GreaterThan
        | BinaryOperator::GreaterThanOrEqual => Ok(XPathValue::Boolean(compare(op, left, right))),
        BinaryOperator::Plus => Ok(XPathValue::Number(left.to_number() + right.to_number())),
        BinaryOperator::Minus => Ok(XPathValue::Number(left.to_number() - right.to_number())),
        BinaryOperator::Multiply => Ok(XPathValue::Number(left.to_number() * right.to_number())),
        BinaryOperator::Divide => Ok(XPathValue::Number(left.to_number() / right.to_number())),
        // `%` on floats truncates toward zero, which is what XPath's `mod` requires.
        BinaryOperator::Modulo => Ok(XPathValue::Number(left.to_number() % right.to_number())),
        BinaryOperator::Union => union(left, right),
    }
}

fn union<'a, N: DataSourceNode<'a>>(
    left: XPathValue<N>,
    right: XPathValue<N>,
) -> Result<XPathValue<N>, XPathError> {
    match (left, right) {
        (XPathValue::NodeSet(l), XPathValue::NodeSet(r)) => {
            let mut seen = HashSet::with_capacity(l.len() + r.len());
            let mut nodes: Vec<N> = l.into_iter().chain(r).filter(|n| seen.insert(*n)).collect();
            nodes.sort();
            Ok(XPathValue::NodeSet(nodes))
        }
        (l, r) => Err(XPathError::TypeError(format!(
            "the '|' operator requires node-sets, got {} and {}",
            l.type_name(),
            r.type_name()
        ))),
    }
}

/// A non-node-set operand after fragments and host values have been flattened.
enum Atomic {
    String(String),
    Number(f64),
    Boolean(bool),
}

fn atomize<'a, N: DataSourceNode<'a>>(value: XPathValue<N>) -> Result<Vec<N>, Atomic> {
    match value {
        XPathValue::NodeSet(nodes) => Ok(nodes),
        XPathValue::String(s) => Err(Atomic::String(s)),
        XPathValue::Number(n) => Err(Atomic::Number(n)),
        XPathValue::Boolean(b) => Err(Atomic::Boolean(b)),
        XPathValue::Fragment(fragment) => Err(Atomic::String(fragment.string_value())),
        XPathValue::External(_) => Err(Atomic::String(String::new())),
    }
}

fn compare<'a, N: DataSourceNode<'a>>(
    op: BinaryOperator,
    left: XPathValue<N>,
    right: XPathValue<N>,
) -> bool {
    match (atomize(left), atomize(right)) {
        (Ok(l), Ok(r)) => {
            let right_values: Vec<String> = r.iter().map(|n| n.string_value()).collect();
            l.iter().any(|node| {
                let lv = Atomic::String(node.string_value());
                right_values
                    .iter()
                    .any(|rv| compare_atomic(op, &lv, &Atomic::String(rv.clone())))
            })
        }
        (Ok(nodes), Err(atomic)) => compare_node_set(op, &nodes, &atomic, false),
        (Err(atomic), Ok(nodes)) => compare_node_set(op, &nodes, &atomic, true),
        (Err(l), Err(r)) => compare_atomic(op, &l, &r),
    }
}

/// Compares every node in `nodes` against `atomic`; `swapped` means the node-set was the
/// right-hand operand.
fn compare_node_set<'a, N: DataSourceNode<'a>>(
    op: BinaryOperator,
    nodes: &[N],
    atomic: &Atomic,
    swapped: bool,
) -> bool {
    if let Atomic::Boolean(b) = atomic {
        let set = Atomic::Boolean(!nodes.is_empty());
        let other = Atomic::Boolean(*b);
        return if swapped {
            compare_atomic(op, &other, &set)
        } else {
            compare_atomic(op, &set, &other)
        };
    }
    nodes.iter().any(|node| {
        let sv = node.string_value();
        let node_value = match atomic {
            Atomic::Number(_) => Atomic::Number(string_to_number(&sv)),
            _ => Atomic::String(sv),
        };
        if swapped {
            compare_atomic(op, atomic, &node_value)
        } else {
            compare_atomic(op, &node_value, atomic)
        }
    })
}

fn compare_atomic(op: BinaryOperator, left: &Atomic, right: &Atomic) -> bool {
    match op {
        BinaryOperator::Equals | BinaryOperator::NotEquals => {
            let equal = match (left, right) {
                (Atomic::Boolean(_), _) | (_, Atomic::Boolean(_)) => {
                    atomic_bool(left) == atomic_bool(right)
                }
                (Atomic::Number(_), _) | (_, Atomic::Number(_)) => {
                    atomic_number(left) == atomic_number(right)
                }
                (Atomic::String(l), Atomic::String(r)) => l == r,
            };
            if op == BinaryOperator::Equals {
                equal
            } else {
                !equal
            }
        }
        _ => {
            let (l, r) = (atomic_number(left), atomic_number(right));
            match op {
                BinaryOperator::LessThan => l < r,
                BinaryOperator::LessThanOrEqual => l <= r,
                BinaryOperator::GreaterThan => l > r,
                BinaryOperator::GreaterThanOrEqual => l >= r,
                _ => false,
            }
        }
    }
}

fn atomic_bool(value: &Atomic) -> bool {
    match value {
        Atomic::String(s) => !s.is_empty(),
        Atomic::Number(n) => *n != 0.0 && !n.is_nan(),
        Atomic::Boolean(b) => *b,
    }
}

fn atomic_number(value: &Atomic) -> f64 {
    match value {
        Atomic::String(s) => string_to_number(s),
        Atomic::Number(n) => *n,
        Atomic::Boolean(b) => {
            if *b {
                1.0
            } else {
                0.0
            }
        }
    }
}

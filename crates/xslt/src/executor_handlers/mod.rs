//! One handler per instruction family. Each handler is a free function over the
//! [`TransformContext`](crate::executor::TransformContext) and writes through an
//! [`OutputBuilder`](crate::output::OutputBuilder).

pub(crate) mod apply_templates;
pub(crate) mod attribute_sets;
pub(crate) mod call_template;
pub(crate) mod control_flow;
pub(crate) mod copy;
pub(crate) mod extensions;
pub(crate) mod for_each;
pub(crate) mod literals;
pub(crate) mod message;
pub(crate) mod number;
pub(crate) mod sort;
pub(crate) mod variables;

fn is_name_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | '\u{B7}')
}

pub(crate) fn is_ncname(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if is_name_start(first) => chars.all(is_name_char),
        _ => false,
    }
}

pub(crate) fn is_qname(name: &str) -> bool {
    match name.split_once(':') {
        Some((prefix, local)) => is_ncname(prefix) && is_ncname(local),
        None => is_ncname(name),
    }
}

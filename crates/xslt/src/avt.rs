//! Attribute value templates: text with embedded `{expr}` segments.
//!
//! Parsing happens once at compile time; evaluation concatenates the segments, asking the
//! caller to evaluate each expression in its own context.

use crate::ast::{AttributeValueTemplate, AvtPart, CompiledExpr};
use crate::error::XsltError;
use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::{tag, take_while, take_while1},
    character::complete::char,
    combinator::{map, recognize},
    multi::many0,
    sequence::delimited,
};
use quill_xpath1::{NamespaceMap, parse_expression};
use std::sync::Arc;

enum Segment<'s> {
    Text(&'s str),
    Expr(&'s str),
}

/// Expression text up to the closing brace. Braces inside string literals do not count.
fn expression_text(input: &str) -> IResult<&str, &str> {
    recognize(many0(alt((
        recognize(delimited(char('\''), take_while(|c| c != '\''), char('\''))),
        recognize(delimited(char('"'), take_while(|c| c != '"'), char('"'))),
        take_while1(|c| c != '\'' && c != '"' && c != '}'),
    ))))
    .parse(input)
}

fn segment(input: &str) -> IResult<&str, Segment<'_>> {
    alt((
        map(tag("{{"), |_| Segment::Text("{")),
        map(tag("}}"), |_| Segment::Text("}")),
        map(delimited(char('{'), expression_text, char('}')), Segment::Expr),
        map(take_while1(|c| c != '{' && c != '}'), Segment::Text),
    ))
    .parse(input)
}

/// Compiles `text` into literal and expression segments. Expressions are compiled under
/// `namespaces`, the bindings in scope on the owning element.
pub fn parse_avt(
    text: &str,
    namespaces: &Arc<NamespaceMap>,
) -> Result<AttributeValueTemplate, XsltError> {
    let (rest, segments) = many0(segment)
        .parse(text)
        .map_err(|e| XsltError::Avt(text.to_string(), e.to_string()))?;
    if let Some(c) = rest.chars().next() {
        let message = if c == '}' {
            "unescaped '}' outside an expression"
        } else {
            "unterminated '{' expression"
        };
        return Err(XsltError::Avt(text.to_string(), message.to_string()));
    }

    let mut parts = Vec::new();
    let mut pending = String::new();
    for segment in segments {
        match segment {
            Segment::Text(s) => pending.push_str(s),
            Segment::Expr(source) => {
                if !pending.is_empty() {
                    parts.push(AvtPart::Static(std::mem::take(&mut pending)));
                }
                let expr = parse_expression(source)
                    .map_err(|e| XsltError::Avt(text.to_string(), e.to_string()))?;
                parts.push(AvtPart::Dynamic(CompiledExpr {
                    expr,
                    source: source.trim().to_string(),
                    namespaces: Arc::clone(namespaces),
                }));
            }
        }
    }
    if !pending.is_empty() || parts.is_empty() {
        parts.push(AvtPart::Static(pending));
    }
    Ok(AttributeValueTemplate(parts))
}

/// Concatenates the segments of `avt`, evaluating each expression segment with `eval`.
pub fn evaluate_avt<E>(
    avt: &AttributeValueTemplate,
    mut eval: impl FnMut(&CompiledExpr) -> Result<String, E>,
) -> Result<String, E> {
    let mut result = String::new();
    for part in &avt.0 {
        match part {
            AvtPart::Static(s) => result.push_str(s),
            AvtPart::Dynamic(expr) => result.push_str(&eval(expr)?),
        }
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use quill_xpath1::datasource::tests::{MockNode, create_test_tree};
    use quill_xpath1::{EvaluationContext, FunctionRegistry, KeyIndexes, XPathValue, evaluate};
    use std::collections::HashMap;

    fn no_namespaces() -> Arc<NamespaceMap> {
        Arc::new(NamespaceMap::new())
    }

    fn render(text: &str, bindings: &[(&str, &str)]) -> String {
        let tree = create_test_tree();
        let root = MockNode { id: 0, tree: &tree };
        let functions = FunctionRegistry::new();
        let keys = KeyIndexes::new();
        let vars: HashMap<String, XPathValue<MockNode>> = bindings
            .iter()
            .map(|(name, value)| (name.to_string(), XPathValue::String(value.to_string())))
            .collect();
        let avt = parse_avt(text, &no_namespaces()).unwrap();
        evaluate_avt(&avt, |expr| {
            let e_ctx = EvaluationContext::new(root, root, &functions, 1, 1, &vars, &keys, false)
                .with_namespaces(&expr.namespaces);
            evaluate(&expr.expr, &e_ctx).map(|value| value.to_string())
        })
        .unwrap()
    }

    #[test]
    fn test_expressions_and_variables_are_concatenated() {
        assert_eq!(render("{1+1}-{$x}", &[("x", "v")]), "2-v");
    }

    #[test]
    fn test_doubled_braces_are_literal() {
        assert_eq!(render("{{literal}}", &[]), "{literal}");
        assert_eq!(render("a}}b{{c", &[]), "a}b{c");
    }

    #[test]
    fn test_braces_inside_string_literals() {
        assert_eq!(render("{concat('}', \"{\")}", &[]), "}{");
    }

    #[test]
    fn test_static_text_stays_static() {
        let avt = parse_avt("plain text", &no_namespaces()).unwrap();
        assert_eq!(avt.as_static().as_deref(), Some("plain text"));
        let empty = parse_avt("", &no_namespaces()).unwrap();
        assert_eq!(empty.as_static().as_deref(), Some(""));
        let dynamic = parse_avt("x{.}", &no_namespaces()).unwrap();
        assert_eq!(dynamic.0.len(), 2);
        assert!(dynamic.as_static().is_none());
    }

    #[test]
    fn test_malformed_templates_are_rejected() {
        for text in ["a}b", "{1+1", "{'unclosed}", "{}"] {
            let err = parse_avt(text, &no_namespaces()).unwrap_err();
            assert!(matches!(err, XsltError::Avt(..)), "{text}: {err}");
        }
    }
}

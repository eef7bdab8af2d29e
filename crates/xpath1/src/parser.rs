//! XPath 1.0 expression parser built on `nom`.
//!
//! Binary operators are driven by a precedence table; each level folds its operands to
//! the left. Everything below the operators is a path expression, which is either a
//! filter expression (primary plus predicates) optionally continued by `/` steps, or a
//! plain location path.

use super::ast::*;
use crate::error::XPathError;
use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::{tag, take_while, take_while1},
    character::complete::{char, digit0, digit1, multispace0},
    combinator::{map, map_res, opt, recognize},
    error::{Error, ErrorKind},
    multi::{many0, separated_list0},
    sequence::{delimited, pair, preceded, terminated},
};

/// Parses a complete expression. Trailing input that is not part of the expression is
/// an error.
pub fn parse_expression(input: &str) -> Result<Expression, XPathError> {
    let failed = |reason: String| XPathError::XPathParse(input.to_string(), reason);
    match terminated(expression, skip_ws).parse(input) {
        Ok(("", expr)) => Ok(expr),
        Ok((rest, _)) => Err(failed(format!("unexpected input at '{}'", rest))),
        Err(e) => Err(failed(e.to_string())),
    }
}

type Operators = &'static [(&'static str, BinaryOperator)];

/// Loosest binding first.
const PRECEDENCE: &[Operators] = &[
    &[("or", BinaryOperator::Or)],
    &[("and", BinaryOperator::And)],
    &[("!=", BinaryOperator::NotEquals), ("=", BinaryOperator::Equals)],
    &[
        ("<=", BinaryOperator::LessThanOrEqual),
        (">=", BinaryOperator::GreaterThanOrEqual),
        ("<", BinaryOperator::LessThan),
        (">", BinaryOperator::GreaterThan),
    ],
    &[("+", BinaryOperator::Plus), ("-", BinaryOperator::Minus)],
    &[
        ("*", BinaryOperator::Multiply),
        ("div", BinaryOperator::Divide),
        ("mod", BinaryOperator::Modulo),
    ],
];

const UNION: Operators = &[("|", BinaryOperator::Union)];

const AXES: &[(&str, Axis)] = &[
    ("ancestor", Axis::Ancestor),
    ("ancestor-or-self", Axis::AncestorOrSelf),
    ("attribute", Axis::Attribute),
    ("child", Axis::Child),
    ("descendant", Axis::Descendant),
    ("descendant-or-self", Axis::DescendantOrSelf),
    ("following", Axis::Following),
    ("following-sibling", Axis::FollowingSibling),
    ("parent", Axis::Parent),
    ("preceding", Axis::Preceding),
    ("preceding-sibling", Axis::PrecedingSibling),
    ("self", Axis::SelfAxis),
];

/// Names that introduce a node-type test rather than a function call.
const NODE_TYPES: &[&str] = &["comment", "node", "processing-instruction", "text"];

fn reject<T>(input: &str) -> IResult<&str, T> {
    Err(nom::Err::Error(Error::new(input, ErrorKind::Verify)))
}

fn skip_ws(input: &str) -> IResult<&str, &str> {
    multispace0(input)
}

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '-' | '.')
}

/// Skips leading whitespace before `inner`.
fn sp<'a, O, F>(inner: F) -> impl Parser<&'a str, Output = O, Error = Error<&'a str>>
where
    F: Parser<&'a str, Output = O, Error = Error<&'a str>>,
{
    preceded(multispace0, inner)
}

fn expression(input: &str) -> IResult<&str, Expression> {
    binary(input, 0)
}

fn binary(input: &str, level: usize) -> IResult<&str, Expression> {
    match PRECEDENCE.get(level) {
        Some(ops) => fold_left(input, |i| binary(i, level + 1), ops),
        None => unary(input),
    }
}

/// `operand (op operand)*`, folded left. An operator not followed by an operand ends
/// the chain before the operator.
fn fold_left<'a, F>(input: &'a str, operand: F, ops: Operators) -> IResult<&'a str, Expression>
where
    F: Fn(&'a str) -> IResult<&'a str, Expression>,
{
    let (mut rest, mut left) = operand(input)?;
    loop {
        let Ok((after_op, op)) = operator(rest, ops) else {
            break;
        };
        match operand(after_op) {
            Ok((after, right)) => {
                left = Expression::BinaryOp {
                    left: Box::new(left),
                    op,
                    right: Box::new(right),
                };
                rest = after;
            }
            Err(nom::Err::Error(_)) => break,
            Err(e) => return Err(e),
        }
    }
    Ok((rest, left))
}

/// Matches one operator token. Word operators must not run into a following name.
fn operator(input: &str, ops: Operators) -> IResult<&str, BinaryOperator> {
    let (input, _) = skip_ws(input)?;
    for &(token, op) in ops {
        if let Some(rest) = input.strip_prefix(token) {
            let is_word = token.starts_with(|c: char| c.is_alphabetic());
            if is_word && rest.starts_with(is_name_char) {
                continue;
            }
            return Ok((rest, op));
        }
    }
    Err(nom::Err::Error(Error::new(input, ErrorKind::Tag)))
}

fn unary(input: &str) -> IResult<&str, Expression> {
    match sp(char('-')).parse(input) {
        Ok((rest, _)) => {
            let (rest, expr) = unary(rest)?;
            Ok((
                rest,
                Expression::UnaryOp {
                    op: UnaryOperator::Minus,
                    expr: Box::new(expr),
                },
            ))
        }
        Err(_) => fold_left(input, path_expr, UNION),
    }
}

fn path_expr(input: &str) -> IResult<&str, Expression> {
    let (input, _) = skip_ws(input)?;
    // Primaries go first so that `name(` is read as a call and not as a step.
    if let Ok((rest, head)) = filter_expr(input) {
        let (rest, steps) = continued_steps(rest)?;
        if steps.is_empty() {
            return Ok((rest, head));
        }
        let path = LocationPath {
            start_point: Some(Box::new(head)),
            is_absolute: false,
            steps,
        };
        return Ok((rest, Expression::LocationPath(path)));
    }
    map(location_path, Expression::LocationPath).parse(input)
}

fn filter_expr(input: &str) -> IResult<&str, Expression> {
    let (rest, primary) = primary_expr(input)?;
    let (rest, predicates) = many0(predicate).parse(rest)?;
    if predicates.is_empty() {
        return Ok((rest, primary));
    }
    Ok((
        rest,
        Expression::Filter {
            primary: Box::new(primary),
            predicates,
        },
    ))
}

fn primary_expr(input: &str) -> IResult<&str, Expression> {
    sp(alt((
        map(preceded(char('$'), q_name), Expression::Variable),
        map(number, Expression::Number),
        map(literal, Expression::Literal),
        function_call,
        delimited(char('('), expression, sp(char(')'))),
    )))
    .parse(input)
}

/// Plain decimals only. `NaN` and `Infinity` are names, not numbers.
fn number(input: &str) -> IResult<&str, f64> {
    map_res(
        alt((
            recognize(pair(digit1, opt(pair(char('.'), digit0)))),
            recognize(pair(char('.'), digit1)),
        )),
        str::parse::<f64>,
    )
    .parse(input)
}

fn quoted<'a>(quote: char) -> impl Parser<&'a str, Output = &'a str, Error = Error<&'a str>> {
    delimited(char(quote), take_while(move |c: char| c != quote), char(quote))
}

fn literal(input: &str) -> IResult<&str, String> {
    map(alt((quoted('"'), quoted('\''))), str::to_string).parse(input)
}

fn function_call(input: &str) -> IResult<&str, Expression> {
    let (rest, name) = q_name(input)?;
    if NODE_TYPES.contains(&name.as_str()) {
        return reject(input);
    }
    let (rest, args) = delimited(
        sp(char('(')),
        separated_list0(sp(char(',')), expression),
        sp(char(')')),
    )
    .parse(rest)?;
    Ok((rest, Expression::FunctionCall { name, args }))
}

fn nc_name(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        take_while1(|c: char| c.is_alphabetic() || c == '_'),
        take_while(is_name_char),
    ))
    .parse(input)
}

fn q_name(input: &str) -> IResult<&str, String> {
    map(recognize(pair(nc_name, opt(pair(char(':'), nc_name)))), str::to_string).parse(input)
}

fn predicate(input: &str) -> IResult<&str, Expression> {
    delimited(sp(char('[')), expression, sp(char(']'))).parse(input)
}

fn descendant_or_self() -> Step {
    Step {
        axis: Axis::DescendantOrSelf,
        node_test: NodeTest::NodeType(NodeTypeTest::Node),
        predicates: Vec::new(),
    }
}

/// Zero or more `/step` or `//step` continuations.
fn continued_steps(input: &str) -> IResult<&str, Vec<Step>> {
    let (rest, pieces) = many0(pair(sp(alt((tag("//"), tag("/")))), step)).parse(input)?;
    let mut steps = Vec::with_capacity(pieces.len());
    for (separator, next) in pieces {
        if separator == "//" {
            steps.push(descendant_or_self());
        }
        steps.push(next);
    }
    Ok((rest, steps))
}

fn location_path(input: &str) -> IResult<&str, LocationPath> {
    let (mut rest, is_absolute, mut steps) = if let Some(rest) = input.strip_prefix("//") {
        let (rest, first) = step(rest)?;
        (rest, true, vec![descendant_or_self(), first])
    } else if let Some(rest) = input.strip_prefix('/') {
        // A lone `/` selects the root.
        match step(rest) {
            Ok((rest, first)) => (rest, true, vec![first]),
            Err(_) => (rest, true, Vec::new()),
        }
    } else {
        let (rest, first) = step(input)?;
        (rest, false, vec![first])
    };
    if !steps.is_empty() {
        let (after, more) = continued_steps(rest)?;
        steps.extend(more);
        rest = after;
    }
    Ok((
        rest,
        LocationPath {
            start_point: None,
            is_absolute,
            steps,
        },
    ))
}

fn step(input: &str) -> IResult<&str, Step> {
    let (input, _) = skip_ws(input)?;
    let node = NodeTest::NodeType(NodeTypeTest::Node);
    let (rest, (axis, node_test)) = if let Some(rest) = input.strip_prefix("..") {
        (rest, (Axis::Parent, node))
    } else if let Some(rest) = input.strip_prefix('.') {
        (rest, (Axis::SelfAxis, node))
    } else if let Some(rest) = input.strip_prefix('@') {
        let (rest, test) = node_test(rest)?;
        (rest, (Axis::Attribute, test))
    } else {
        let (rest, axis) = opt(axis_specifier).parse(input)?;
        let (rest, test) = sp(node_test).parse(rest)?;
        (rest, (axis.unwrap_or(Axis::Child), test))
    };
    let (rest, predicates) = many0(predicate).parse(rest)?;
    Ok((
        rest,
        Step {
            axis,
            node_test,
            predicates,
        },
    ))
}

fn axis_specifier(input: &str) -> IResult<&str, Axis> {
    let (rest, name) = terminated(nc_name, sp(tag("::"))).parse(input)?;
    match AXES.iter().find(|(known, _)| *known == name) {
        Some(&(_, axis)) => Ok((rest, axis)),
        None => reject(input),
    }
}

fn node_test(input: &str) -> IResult<&str, NodeTest> {
    if let Some(rest) = input.strip_prefix('*') {
        return Ok((rest, NodeTest::Wildcard));
    }
    if let Ok((rest, prefix)) = terminated(nc_name, tag(":*")).parse(input) {
        return Ok((rest, NodeTest::NamespaceWildcard(prefix.to_string())));
    }
    if let Ok(found) = kind_test(input) {
        return Ok(found);
    }
    map(q_name, NodeTest::Name).parse(input)
}

/// `text()`, `comment()`, `node()` and `processing-instruction('target'?)`.
fn kind_test(input: &str) -> IResult<&str, NodeTest> {
    let (rest, name) = terminated(nc_name, sp(char('('))).parse(input)?;
    let (rest, test) = match name {
        "processing-instruction" => {
            let (rest, target) = opt(sp(literal)).parse(rest)?;
            let test = match target {
                Some(target) => NodeTest::ProcessingInstructionTarget(target),
                None => NodeTest::NodeType(NodeTypeTest::ProcessingInstruction),
            };
            (rest, test)
        }
        "text" => (rest, NodeTest::NodeType(NodeTypeTest::Text)),
        "comment" => (rest, NodeTest::NodeType(NodeTypeTest::Comment)),
        "node" => (rest, NodeTest::NodeType(NodeTypeTest::Node)),
        _ => return reject(input),
    };
    let (rest, _) = sp(char(')')).parse(rest)?;
    Ok((rest, test))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn child(name: &str) -> Step {
        Step {
            axis: Axis::Child,
            node_test: NodeTest::Name(name.to_string()),
            predicates: vec![],
        }
    }

    fn relative(steps: Vec<Step>) -> Expression {
        Expression::LocationPath(LocationPath {
            start_point: None,
            is_absolute: false,
            steps,
        })
    }

    fn op(left: Expression, op: BinaryOperator, right: Expression) -> Expression {
        Expression::BinaryOp {
            left: Box::new(left),
            op,
            right: Box::new(right),
        }
    }

    fn negate(expr: Expression) -> Expression {
        Expression::UnaryOp {
            op: UnaryOperator::Minus,
            expr: Box::new(expr),
        }
    }

    fn steps_of(source: &str) -> Vec<Step> {
        match parse_expression(source).unwrap() {
            Expression::LocationPath(path) => path.steps,
            other => panic!("expected a location path for {source}, got {other:?}"),
        }
    }

    #[test]
    fn test_relative_and_absolute_paths() {
        assert_eq!(
            parse_expression("foo/bar").unwrap(),
            relative(vec![child("foo"), child("bar")])
        );
        assert_eq!(
            parse_expression("//foo").unwrap(),
            Expression::LocationPath(LocationPath {
                start_point: None,
                is_absolute: true,
                steps: vec![descendant_or_self(), child("foo")],
            })
        );
        let Expression::LocationPath(root) = parse_expression("/").unwrap() else {
            panic!("expected the root path");
        };
        assert!(root.is_absolute && root.steps.is_empty());
        assert_eq!(steps_of("a//b").len(), 3);
    }

    #[test]
    fn test_unary_minus_nests() {
        assert_eq!(parse_expression("-5").unwrap(), negate(Expression::Number(5.0)));
        assert_eq!(
            parse_expression("10 - -5").unwrap(),
            op(
                Expression::Number(10.0),
                BinaryOperator::Minus,
                negate(Expression::Number(5.0))
            )
        );
        assert_eq!(
            parse_expression("--1").unwrap(),
            negate(negate(Expression::Number(1.0)))
        );
    }

    #[test]
    fn test_axis_specifiers() {
        assert_eq!(steps_of("following-sibling::foo")[0].axis, Axis::FollowingSibling);
        assert_eq!(steps_of("preceding::*")[0].axis, Axis::Preceding);
        assert_eq!(steps_of("descendant-or-self::x")[0].axis, Axis::DescendantOrSelf);
        assert_eq!(steps_of("ancestor-or-self :: x")[0].axis, Axis::AncestorOrSelf);
        assert!(parse_expression("sideways::x").is_err());
    }

    #[test]
    fn test_variables_and_filters_start_paths() {
        assert_eq!(
            parse_expression("$myVar").unwrap(),
            Expression::Variable("myVar".to_string())
        );
        assert_eq!(
            parse_expression("$myVar/foo/bar").unwrap(),
            Expression::LocationPath(LocationPath {
                start_point: Some(Box::new(Expression::Variable("myVar".to_string()))),
                is_absolute: false,
                steps: vec![child("foo"), child("bar")],
            })
        );

        let Expression::LocationPath(path) = parse_expression("$items[2]/name").unwrap() else {
            panic!("expected a location path");
        };
        assert!(matches!(
            path.start_point.as_deref(),
            Some(Expression::Filter { predicates, .. }) if predicates.len() == 1
        ));
        assert!(matches!(
            parse_expression("(a | b)[last()]").unwrap(),
            Expression::Filter { .. }
        ));
    }

    #[test]
    fn test_predicates() {
        let attr_id = Step {
            axis: Axis::Attribute,
            node_test: NodeTest::Name("id".into()),
            predicates: vec![],
        };
        let mut foo = child("foo");
        foo.predicates = vec![op(
            relative(vec![attr_id]),
            BinaryOperator::Equals,
            Expression::Literal("a".into()),
        )];
        assert_eq!(parse_expression("foo[@id = 'a']").unwrap(), relative(vec![foo]));

        let mut first = child("foo");
        first.predicates = vec![Expression::Number(1.0)];
        assert_eq!(parse_expression("foo[ 1 ]").unwrap(), relative(vec![first]));

        let steps = steps_of("para[position()=1][@x]");
        assert_eq!(steps[0].predicates.len(), 2);
        assert!(steps[0].predicates[0].is_binary_op());
    }

    #[test]
    fn test_node_tests() {
        assert_eq!(
            steps_of("foo/text()")[1].node_test,
            NodeTest::NodeType(NodeTypeTest::Text)
        );
        assert_eq!(
            steps_of("comment( )")[0].node_test,
            NodeTest::NodeType(NodeTypeTest::Comment)
        );
        assert_eq!(
            steps_of("svg:*")[0].node_test,
            NodeTest::NamespaceWildcard("svg".to_string())
        );
        assert_eq!(
            steps_of("processing-instruction('xml-stylesheet')")[0].node_test,
            NodeTest::ProcessingInstructionTarget("xml-stylesheet".to_string())
        );
        assert_eq!(
            steps_of("processing-instruction()")[0].node_test,
            NodeTest::NodeType(NodeTypeTest::ProcessingInstruction)
        );
        assert_eq!(steps_of("@*")[0].node_test, NodeTest::Wildcard);
        // A name that happens to spell a node type is still a name without parentheses.
        assert_eq!(steps_of("text")[0], child("text"));
    }

    #[test]
    fn test_abbreviated_steps() {
        let dot = steps_of(".");
        assert_eq!(dot[0].axis, Axis::SelfAxis);
        assert_eq!(dot[0].node_test, NodeTest::NodeType(NodeTypeTest::Node));

        let up = steps_of("../@id");
        assert_eq!(up[0].axis, Axis::Parent);
        assert_eq!(up[1].axis, Axis::Attribute);
    }

    #[test]
    fn test_numbers_and_literals() {
        assert!(parse_expression("nan").unwrap().is_location_path());
        assert_eq!(parse_expression(".5").unwrap(), Expression::Number(0.5));
        assert_eq!(parse_expression("3.").unwrap(), Expression::Number(3.0));
        assert_eq!(
            parse_expression(r#""it's""#).unwrap(),
            Expression::Literal("it's".to_string())
        );
        assert!(parse_expression("'unterminated").is_err());
    }

    #[test]
    fn test_operator_precedence() {
        let num = Expression::Number;
        assert_eq!(
            parse_expression("1 + 2 * 3").unwrap(),
            op(
                num(1.0),
                BinaryOperator::Plus,
                op(num(2.0), BinaryOperator::Multiply, num(3.0))
            )
        );
        assert_eq!(
            parse_expression("8 div 2 mod 3").unwrap(),
            op(
                op(num(8.0), BinaryOperator::Divide, num(2.0)),
                BinaryOperator::Modulo,
                num(3.0)
            )
        );

        let name = |n: &str| relative(vec![child(n)]);
        let eq = |a: &str, b: &str| op(name(a), BinaryOperator::Equals, name(b));
        assert_eq!(
            parse_expression("a = b or c = d and e = f").unwrap(),
            op(
                eq("a", "b"),
                BinaryOperator::Or,
                op(eq("c", "d"), BinaryOperator::And, eq("e", "f"))
            )
        );
    }

    #[test]
    fn test_relational_operators() {
        let name = |n: &str| relative(vec![child(n)]);
        assert_eq!(
            parse_expression("a < b").unwrap(),
            op(name("a"), BinaryOperator::LessThan, name("b"))
        );
        assert!(matches!(
            parse_expression("a >= b").unwrap(),
            Expression::BinaryOp {
                op: BinaryOperator::GreaterThanOrEqual,
                ..
            }
        ));
    }

    #[test]
    fn test_word_operators_need_a_boundary() {
        // `order` is a name, not `or` followed by `der`.
        let name = |n: &str| relative(vec![child(n)]);
        assert_eq!(
            parse_expression("a and order").unwrap(),
            op(name("a"), BinaryOperator::And, name("order"))
        );
        assert!(parse_expression("a order").is_err());
        // Names may contain hyphens, so `a-b` is one step.
        assert_eq!(parse_expression("a-b").unwrap(), name("a-b"));
        assert_eq!(
            parse_expression("a - b").unwrap(),
            op(name("a"), BinaryOperator::Minus, name("b"))
        );
    }

    #[test]
    fn test_function_calls() {
        assert_eq!(
            parse_expression("concat('a', $b , 1)").unwrap(),
            Expression::FunctionCall {
                name: "concat".to_string(),
                args: vec![
                    Expression::Literal("a".to_string()),
                    Expression::Variable("b".to_string()),
                    Expression::Number(1.0),
                ],
            }
        );
        assert!(matches!(
            parse_expression("ext:now()").unwrap(),
            Expression::FunctionCall { name, args } if name == "ext:now" && args.is_empty()
        ));
        assert!(parse_expression("count(").is_err());
    }

    #[test]
    fn test_union_binds_tighter_than_comparison() {
        let expr = parse_expression("a | b = c").unwrap();
        let Expression::BinaryOp { left, op, .. } = expr else {
            panic!("expected a comparison");
        };
        assert_eq!(op, BinaryOperator::Equals);
        assert!(matches!(
            *left,
            Expression::BinaryOp {
                op: BinaryOperator::Union,
                ..
            }
        ));
    }

    #[test]
    fn test_trailing_garbage_is_reported() {
        let err = parse_expression("a b").unwrap_err();
        assert!(err.to_string().contains("unexpected input at 'b'"));
    }
}

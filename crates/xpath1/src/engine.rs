//! Evaluates parsed expressions over any tree that implements `DataSourceNode`.

use super::ast::{Axis, BinaryOperator, Expression, LocationPath, NodeTest, NodeTypeTest, Step, UnaryOperator};
use super::functions::{self, FunctionRegistry};
use super::{axes, operators};
use crate::datasource::{DataSourceNode, NodeType, XML_NAMESPACE};
use crate::error::XPathError;
use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::marker::PhantomData;
use std::rc::Rc;

/// Prefix to namespace URI bindings used to resolve QNames inside an expression.
pub type NamespaceMap = HashMap<String, String>;

/// Per-key lookup tables: key name, then key value, then the indexed nodes.
pub type KeyIndexes<N> = HashMap<String, HashMap<String, Vec<N>>>;

/// A tree built during a transformation and held as a value (a result tree fragment).
pub trait ResultFragment: fmt::Debug {
    /// Concatenation of all text in the fragment.
    fn string_value(&self) -> String;
    fn as_any(&self) -> &dyn Any;
}

/// A host value the engine carries around without interpreting it.
#[derive(Clone)]
pub struct ExternalValue(pub Rc<dyn Any>);

impl fmt::Debug for ExternalValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ExternalValue(..)")
    }
}

/// The value of an expression: one of the four XPath types, plus the result tree
/// fragments and host objects an embedding engine may bind to variables.
#[derive(Debug, Clone)]
pub enum XPathValue<N> {
    NodeSet(Vec<N>),
    String(String),
    Number(f64),
    Boolean(bool),
    Fragment(Rc<dyn ResultFragment>),
    External(ExternalValue),
}

impl<'a, N: DataSourceNode<'a>> XPathValue<N> {
    /// `boolean()` conversion.
    pub fn to_bool(&self) -> bool {
        match self {
            XPathValue::Boolean(flag) => *flag,
            XPathValue::Number(n) => !(n.is_nan() || *n == 0.0),
            XPathValue::String(text) => !text.is_empty(),
            XPathValue::NodeSet(set) => !set.is_empty(),
            // A fragment always contains its root node.
            XPathValue::Fragment(_) | XPathValue::External(_) => true,
        }
    }

    /// String-value of the first node, or empty for an empty set.
    fn first_string(nodes: &[N]) -> String {
        nodes.first().map(|first| first.string_value()).unwrap_or_default()
    }

    /// `number()` conversion.
    pub fn to_number(&self) -> f64 {
        match self {
            XPathValue::Number(n) => *n,
            XPathValue::Boolean(flag) => f64::from(u8::from(*flag)),
            XPathValue::String(text) => string_to_number(text),
            XPathValue::NodeSet(set) => string_to_number(&Self::first_string(set)),
            XPathValue::Fragment(fragment) => string_to_number(&fragment.string_value()),
            XPathValue::External(_) => f64::NAN,
        }
    }

    /// Unwraps a node-set, failing for every other kind of value.
    pub fn into_node_set(self) -> Result<Vec<N>, XPathError> {
        match self {
            XPathValue::NodeSet(nodes) => Ok(nodes),
            other => Err(XPathError::TypeError(format!(
                "expected a node-set, got {}",
                other.type_name()
            ))),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            XPathValue::NodeSet(_) => "node-set",
            XPathValue::String(_) => "string",
            XPathValue::Number(_) => "number",
            XPathValue::Boolean(_) => "boolean",
            XPathValue::Fragment(_) => "result tree fragment",
            XPathValue::External(_) => "external object",
        }
    }
}

/// `string()` conversion, so `to_string()` gives the XPath string-value.
impl<'a, N: DataSourceNode<'a>> fmt::Display for XPathValue<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            XPathValue::String(text) => f.write_str(text),
            XPathValue::Number(n) => f.write_str(&number_to_string(*n)),
            XPathValue::Boolean(flag) => f.write_str(if *flag { "true" } else { "false" }),
            XPathValue::NodeSet(set) => f.write_str(&Self::first_string(set)),
            XPathValue::Fragment(fragment) => f.write_str(&fragment.string_value()),
            XPathValue::External(_) => Ok(()),
        }
    }
}

/// Converts a string to a number. Only optionally signed plain decimals surrounded by
/// whitespace are numbers; everything else is NaN.
pub fn string_to_number(s: &str) -> f64 {
    let trimmed = s.trim();
    let digits = trimmed.strip_prefix('-').unwrap_or(trimmed);
    let mut seen_digit = false;
    let mut seen_dot = false;
    for c in digits.chars() {
        match c {
            '0'..='9' => seen_digit = true,
            '.' if !seen_dot => seen_dot = true,
            _ => return f64::NAN,
        }
    }
    if !seen_digit {
        return f64::NAN;
    }
    trimmed.parse().unwrap_or(f64::NAN)
}

/// Formats a number the way XPath's `string()` does.
pub fn number_to_string(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        let sign = if n > 0.0 { "" } else { "-" };
        format!("{}Infinity", sign)
    } else if n == 0.0 {
        "0".to_string()
    } else {
        format!("{}", n)
    }
}

/// Builds the `{uri}local` form used as the lookup key for namespaced names.
pub fn clark_name(namespace: Option<&str>, local: &str) -> String {
    match namespace {
        Some(uri) if !uri.is_empty() => format!("{{{}}}{}", uri, local),
        _ => local.to_string(),
    }
}

/// Splits `prefix:local` into its parts.
pub fn split_qname(qname: &str) -> (Option<&str>, &str) {
    match qname.split_once(':') {
        Some((prefix, local)) => (Some(prefix), local),
        None => (None, qname),
    }
}

/// Read access to variable bindings during evaluation.
pub trait VariableScope<N> {
    fn lookup(&self, name: &str) -> Option<XPathValue<N>>;
}

impl<N: Clone> VariableScope<N> for HashMap<String, XPathValue<N>> {
    fn lookup(&self, name: &str) -> Option<XPathValue<N>> {
        self.get(name).cloned()
    }
}

/// The dynamic context of one evaluation: focus (node, position, size) plus the
/// bindings an expression may consult. `'a` is the document's lifetime and `'d` the
/// lifetime of the borrowed bindings.
pub struct EvaluationContext<'a, 'd, N: DataSourceNode<'a>> {
    pub context_node: N,
    pub root_node: N,
    pub functions: &'d FunctionRegistry<N>,
    /// 1-based.
    pub context_position: usize,
    pub context_size: usize,
    pub variables: &'d dyn VariableScope<N>,
    pub key_indexes: &'d KeyIndexes<N>,
    /// Unbound variables become errors instead of empty strings.
    pub strict: bool,
    /// Prefix bindings for QNames in the expression. The `xml` prefix is always bound.
    pub namespaces: Option<&'d NamespaceMap>,
    /// The node `current()` returns; defaults to the outermost context node.
    pub current_node: Option<N>,
    _marker: PhantomData<&'a ()>,
}

impl<'a, 'd, N: DataSourceNode<'a>> EvaluationContext<'a, 'd, N> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        context_node: N,
        root_node: N,
        functions: &'d FunctionRegistry<N>,
        context_position: usize,
        context_size: usize,
        variables: &'d dyn VariableScope<N>,
        key_indexes: &'d KeyIndexes<N>,
        strict: bool,
    ) -> Self {
        Self {
            context_node,
            root_node,
            functions,
            context_position,
            context_size,
            variables,
            key_indexes,
            strict,
            namespaces: None,
            current_node: None,
            _marker: PhantomData,
        }
    }

    pub fn with_namespaces(mut self, namespaces: &'d NamespaceMap) -> Self {
        self.namespaces = Some(namespaces);
        self
    }

    pub fn with_current_node(mut self, node: N) -> Self {
        self.current_node = Some(node);
        self
    }

    /// A context focused on another node, sharing everything else.
    pub fn at(&self, node: N, position: usize, size: usize) -> Self {
        Self {
            context_node: node,
            root_node: self.root_node,
            functions: self.functions,
            context_position: position,
            context_size: size,
            variables: self.variables,
            key_indexes: self.key_indexes,
            strict: self.strict,
            namespaces: self.namespaces,
            current_node: Some(self.current_node.unwrap_or(self.context_node)),
            _marker: PhantomData,
        }
    }

    /// The node `current()` refers to.
    pub fn current(&self) -> N {
        self.current_node.unwrap_or(self.context_node)
    }

    /// Resolves a namespace prefix against the expression's bindings.
    pub fn resolve_prefix(&self, prefix: &str) -> Result<&'d str, XPathError> {
        if prefix == "xml" {
            return Ok(XML_NAMESPACE);
        }
        self.namespaces
            .and_then(|ns| ns.get(prefix))
            .map(String::as_str)
            .ok_or_else(|| XPathError::UnknownPrefix(prefix.to_string()))
    }

    /// Turns `prefix:local` into its `{uri}local` lookup key.
    pub fn expand_qname(&self, qname: &str) -> Result<String, XPathError> {
        match split_qname(qname) {
            (Some(prefix), local) => Ok(clark_name(Some(self.resolve_prefix(prefix)?), local)),
            (None, local) => Ok(local.to_string()),
        }
    }
}

/// Evaluates `expr` in the given context.
pub fn evaluate<'a, N>(
    expr: &Expression,
    e_ctx: &EvaluationContext<'a, '_, N>,
) -> Result<XPathValue<N>, XPathError>
where
    N: DataSourceNode<'a> + 'a,
{
    match expr {
        Expression::Literal(text) => Ok(XPathValue::String(text.clone())),
        Expression::Number(n) => Ok(XPathValue::Number(*n)),
        Expression::LocationPath(path) => select_path(path, e_ctx).map(XPathValue::NodeSet),
        Expression::Variable(name) => {
            let key = e_ctx.expand_qname(name)?;
            match e_ctx.variables.lookup(&key) {
                Some(value) => Ok(value),
                None if e_ctx.strict => Err(XPathError::UnknownVariable(name.clone())),
                None => Ok(XPathValue::String(String::new())),
            }
        }
        Expression::FunctionCall { name, args } => {
            let values = args
                .iter()
                .map(|arg| evaluate(arg, e_ctx))
                .collect::<Result<Vec<_>, _>>()?;
            functions::evaluate_function(name, values, e_ctx)
        }
        Expression::BinaryOp { left, op, right } => {
            let lhs = evaluate(left, e_ctx)?;
            // `and`/`or` only evaluate their right operand when it can change the outcome.
            match op {
                BinaryOperator::And if !lhs.to_bool() => Ok(XPathValue::Boolean(false)),
                BinaryOperator::Or if lhs.to_bool() => Ok(XPathValue::Boolean(true)),
                _ => operators::evaluate(*op, lhs, evaluate(right, e_ctx)?),
            }
        }
        Expression::UnaryOp {
            op: UnaryOperator::Minus,
            expr,
        } => Ok(XPathValue::Number(-evaluate(expr, e_ctx)?.to_number())),
        Expression::Filter {
            primary,
            predicates,
        } => {
            let mut nodes = evaluate(primary, e_ctx)?.into_node_set()?;
            nodes.sort_unstable();
            nodes.dedup();
            Ok(XPathValue::NodeSet(apply_predicates(
                &nodes, predicates, e_ctx,
            )?))
        }
    }
}

/// Runs a location path from its starting nodes through every step.
fn select_path<'a, N>(
    path: &LocationPath,
    e_ctx: &EvaluationContext<'a, '_, N>,
) -> Result<Vec<N>, XPathError>
where
    N: DataSourceNode<'a> + 'a,
{
    let start = match (&path.start_point, path.is_absolute) {
        (Some(head), _) => evaluate(head, e_ctx)?.into_node_set()?,
        (None, true) => vec![e_ctx.root_node],
        (None, false) => vec![e_ctx.context_node],
    };
    path.steps
        .iter()
        .try_fold(start, |nodes, step| evaluate_step(step, &nodes, e_ctx))
}

/// Evaluates a single step for every context node. Predicates see each context node's
/// own axis, and the merged result is returned in document order without duplicates.
fn evaluate_step<'a, N>(
    step: &Step,
    context_nodes: &[N],
    e_ctx: &EvaluationContext<'a, '_, N>,
) -> Result<Vec<N>, XPathError>
where
    N: DataSourceNode<'a> + 'a,
{
    let mut results = Vec::new();
    let mut seen = HashSet::new();
    for &context_node in context_nodes {
        let axis_nodes = axes::axis_nodes(step.axis, context_node);
        let tested_nodes = filter_by_node_test(&axis_nodes, &step.node_test, step.axis, e_ctx)?;
        for node in apply_predicates(&tested_nodes, &step.predicates, e_ctx)? {
            if seen.insert(node) {
                results.push(node);
            }
        }
    }
    if context_nodes.len() > 1 || step.axis.is_reverse() {
        results.sort();
    }
    Ok(results)
}

/// Filters a set of nodes based on a `NodeTest`.
fn filter_by_node_test<'a, N>(
    nodes: &[N],
    test: &NodeTest,
    axis: Axis,
    e_ctx: &EvaluationContext<'a, '_, N>,
) -> Result<Vec<N>, XPathError>
where
    N: DataSourceNode<'a> + 'a,
{
    let principal = if axis == Axis::Attribute {
        NodeType::Attribute
    } else {
        NodeType::Element
    };
    // Resolve the namespace once rather than per node.
    let expected_namespace = match test {
        NodeTest::Name(name) => match split_qname(name).0 {
            Some(prefix) => Some(e_ctx.resolve_prefix(prefix)?),
            None => None,
        },
        NodeTest::NamespaceWildcard(prefix) => Some(e_ctx.resolve_prefix(prefix)?),
        _ => None,
    };

    Ok(nodes
        .iter()
        .filter(|&node| match test {
            NodeTest::Wildcard => node.node_type() == principal,
            NodeTest::Name(name_to_test) => {
                let local = split_qname(name_to_test).1;
                node.node_type() == principal
                    && node.name().is_some_and(|q_name| q_name.local_part == local)
                    && node.namespace_uri() == expected_namespace
            }
            NodeTest::NamespaceWildcard(_) => {
                node.node_type() == principal && node.namespace_uri() == expected_namespace
            }
            NodeTest::ProcessingInstructionTarget(target) => {
                node.node_type() == NodeType::ProcessingInstruction
                    && node.name().is_some_and(|q_name| q_name.local_part == target)
            }
            NodeTest::NodeType(NodeTypeTest::Node) => true,
            NodeTest::NodeType(kind) => {
                let wanted = match kind {
                    NodeTypeTest::Text => NodeType::Text,
                    NodeTypeTest::Comment => NodeType::Comment,
                    _ => NodeType::ProcessingInstruction,
                };
                node.node_type() == wanted
            }
        })
        .copied()
        .collect())
}

/// Applies predicates in order. Each one sees the survivors of the previous one as its
/// context list, so positions are renumbered between predicates.
pub fn apply_predicates<'a, N>(
    nodes: &[N],
    predicates: &[Expression],
    e_ctx: &EvaluationContext<'a, '_, N>,
) -> Result<Vec<N>, XPathError>
where
    N: DataSourceNode<'a> + 'a,
{
    let mut survivors = nodes.to_vec();
    for predicate in predicates {
        let size = survivors.len();
        let mut kept = Vec::with_capacity(size);
        for (index, &node) in survivors.iter().enumerate() {
            if predicate_holds(predicate, &e_ctx.at(node, index + 1, size))? {
                kept.push(node);
            }
        }
        survivors = kept;
    }
    Ok(survivors)
}

/// Evaluates one predicate: numbers compare against the context position, anything else
/// is converted to a boolean.
pub fn predicate_holds<'a, N>(
    predicate: &Expression,
    e_ctx: &EvaluationContext<'a, '_, N>,
) -> Result<bool, XPathError>
where
    N: DataSourceNode<'a> + 'a,
{
    Ok(match evaluate(predicate, e_ctx)? {
        XPathValue::Number(n) => n == e_ctx.context_position as f64,
        other => other.to_bool(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasource::tests::{MockNode, MockTree, create_test_tree};
    use crate::parser::parse_expression;

    type Vars<'a> = HashMap<String, XPathValue<MockNode<'a>>>;

    fn with_context<'a, R>(
        tree: &'a MockTree<'a>,
        vars: &Vars<'a>,
        f: impl FnOnce(&EvaluationContext<'a, '_, MockNode<'a>>) -> R,
    ) -> R {
        let funcs = FunctionRegistry::default();
        let keys = HashMap::new();
        let root = MockNode { id: 0, tree };
        f(&EvaluationContext::new(root, root, &funcs, 1, 1, vars, &keys, false))
    }

    fn eval_with<'a>(
        tree: &'a MockTree<'a>,
        vars: &Vars<'a>,
        source: &str,
    ) -> Result<XPathValue<MockNode<'a>>, XPathError> {
        let expr = parse_expression(source)?;
        with_context(tree, vars, |ctx| evaluate(&expr, ctx))
    }

    fn eval<'a>(tree: &'a MockTree<'a>, source: &str) -> XPathValue<MockNode<'a>> {
        eval_with(tree, &HashMap::new(), source).unwrap()
    }

    fn ids(value: XPathValue<MockNode<'_>>) -> Vec<usize> {
        value.into_node_set().unwrap().iter().map(|n| n.id).collect()
    }

    #[test]
    fn test_node_tests_use_the_principal_node_type() {
        let tree = create_test_tree();
        let node = |id| MockNode { id, tree: &tree };
        let candidates = [node(0), node(1), node(2), node(4)];
        with_context(&tree, &HashMap::new(), |ctx| {
            let run = |test: NodeTest, axis| filter_by_node_test(&candidates, &test, axis, ctx).unwrap();
            assert_eq!(run(NodeTest::Wildcard, Axis::Child), vec![node(1)]);
            assert_eq!(run(NodeTest::Wildcard, Axis::Attribute), vec![node(2)]);
            assert_eq!(run(NodeTest::Name("para".into()), Axis::Child), vec![node(1)]);
            assert!(run(NodeTest::Name("id".into()), Axis::Child).is_empty());
            assert_eq!(
                run(NodeTest::NodeType(NodeTypeTest::Text), Axis::Child),
                vec![node(4)]
            );
            assert_eq!(run(NodeTest::NodeType(NodeTypeTest::Node), Axis::Child).len(), 4);
        });
    }

    #[test]
    fn test_predicates_renumber_positions() {
        let tree = create_test_tree();
        let node = |id| MockNode { id, tree: &tree };
        with_context(&tree, &HashMap::new(), |ctx| {
            let second = [parse_expression("position()=2").unwrap()];
            let filtered = apply_predicates(&[node(0), node(1), node(4)], &second, ctx).unwrap();
            assert_eq!(filtered, vec![node(1)]);
        });
        // The second predicate numbers only the paras.
        assert_eq!(ids(eval(&tree, "child::node()[self::para][2]")), vec![6]);
    }

    #[test]
    fn test_step_predicates() {
        let tree = create_test_tree();
        assert_eq!(ids(eval(&tree, "child::para[@id='p1']")), vec![1]);
        assert_eq!(ids(eval(&tree, "child::para[1]")), vec![1]);
        assert_eq!(ids(eval(&tree, "child::para[position()=1]")), vec![1]);
        assert_eq!(ids(eval(&tree, "para[last()]")), vec![6]);
        assert_eq!(ids(eval(&tree, "para[@missing]")), Vec::<usize>::new());
    }

    #[test]
    fn test_variables() {
        let tree = create_test_tree();
        let mut vars = Vars::new();
        vars.insert("myVar".to_string(), XPathValue::String("test-value".to_string()));
        vars.insert(
            "para_node".to_string(),
            XPathValue::NodeSet(vec![MockNode { id: 1, tree: &tree }]),
        );

        assert_eq!(eval_with(&tree, &vars, "$myVar").unwrap().to_string(), "test-value");
        let text = eval_with(&tree, &vars, "$para_node/text()").unwrap();
        assert_eq!(text.to_string(), "Hello");
        assert_eq!(ids(text), vec![4]);
        // Unbound names are empty strings outside strict mode.
        assert_eq!(eval_with(&tree, &vars, "$nope").unwrap().to_string(), "");
        assert!(matches!(
            eval_with(&tree, &vars, "$myVar/x"),
            Err(XPathError::TypeError(_))
        ));
    }

    #[test]
    fn test_name_test_respects_principal_node_type() {
        let tree = create_test_tree();
        // The processing instruction's target is not an element name.
        assert!(ids(eval(&tree, "child::pi-target")).is_empty());
        assert_eq!(ids(eval(&tree, "processing-instruction('pi-target')")), vec![9]);
        assert_eq!(ids(eval(&tree, "comment()")), vec![8]);
    }

    #[test]
    fn test_prefixed_attribute_resolves_xml_namespace() {
        let tree = create_test_tree();
        assert_eq!(eval(&tree, "string(para/@xml:lang)").to_string(), "en");
        assert!(matches!(
            eval_with(&tree, &HashMap::new(), "para/@foo:lang"),
            Err(XPathError::UnknownPrefix(p)) if p == "foo"
        ));
    }

    #[test]
    fn test_predicates_apply_per_context_node() {
        let doc = roxmltree::Document::parse("<r><a><b>1</b><b>2</b></a><a><b>3</b></a></r>")
            .unwrap();
        let tree = MockTree::from_roxmltree(&doc);
        let firsts: Vec<String> = eval(&tree, "/r/a/b[1]")
            .into_node_set()
            .unwrap()
            .iter()
            .map(|n| n.string_value())
            .collect();
        assert_eq!(firsts, vec!["1", "3"]);
        assert_eq!(eval(&tree, "(/r/a/b)[last()]").to_string(), "3");
        assert_eq!(eval(&tree, "count(//b)").to_string(), "3");
    }

    #[test]
    fn test_reverse_axes_count_backwards() {
        let doc = roxmltree::Document::parse("<r><x>1</x><x>2</x><x>3</x></r>").unwrap();
        let tree = MockTree::from_roxmltree(&doc);
        assert_eq!(eval(&tree, "/r/x[3]/preceding-sibling::x[1]").to_string(), "2");
        // The merged result is still in document order.
        assert_eq!(eval(&tree, "/r/x[3]/preceding-sibling::x").to_string(), "1");
    }

    #[test]
    fn test_value_conversions() {
        assert_eq!(number_to_string(2.0), "2");
        assert_eq!(number_to_string(0.5), "0.5");
        assert_eq!(number_to_string(-0.0), "0");
        assert_eq!(number_to_string(f64::NAN), "NaN");
        assert_eq!(number_to_string(f64::NEG_INFINITY), "-Infinity");
        assert_eq!(string_to_number(" 42 "), 42.0);
        assert_eq!(string_to_number("-1.5"), -1.5);
        assert!(string_to_number("1e3").is_nan());
        assert!(string_to_number("inf").is_nan());
        assert!(string_to_number("").is_nan());

        let truth: XPathValue<MockNode<'static>> = XPathValue::Boolean(true);
        assert_eq!(truth.to_number(), 1.0);
        assert_eq!(truth.to_string(), "true");
        assert!(!XPathValue::<MockNode<'static>>::Number(f64::NAN).to_bool());
    }

    #[test]
    fn test_and_or_short_circuit() {
        let tree = create_test_tree();
        // The right operand would fail with an unknown function if it were evaluated.
        assert!(!eval(&tree, "false() and no-such-function()").to_bool());
        assert!(eval(&tree, "true() or no-such-function()").to_bool());
        assert!(eval_with(&tree, &HashMap::new(), "true() and no-such-function()").is_err());
    }
}

//! The XPath 1.0 core function library and the registry for host-provided functions.

use super::engine::{
    EvaluationContext, NamespaceMap, XPathValue, clark_name, split_qname, string_to_number,
};
use crate::datasource::{DataSourceNode, NodeType, XML_NAMESPACE};
use crate::error::XPathError;
use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet};
use std::hash::Hasher;
use std::rc::Rc;

/// A host-provided function. It receives evaluated arguments plus the focus it was
/// called with.
pub type CustomFunction<N> =
    Rc<dyn Fn(Vec<XPathValue<N>>, &FunctionContext<'_, N>) -> Result<XPathValue<N>, XPathError>>;

/// Wraps a closure as a [`CustomFunction`], fixing its signature for registration.
pub fn custom_function<N, F>(f: F) -> CustomFunction<N>
where
    F: Fn(Vec<XPathValue<N>>, &FunctionContext<'_, N>) -> Result<XPathValue<N>, XPathError>
        + 'static,
{
    Rc::new(f)
}

/// The evaluation focus handed to custom functions.
#[derive(Debug, Clone, Copy)]
pub struct FunctionContext<'f, N> {
    pub context_node: N,
    pub current_node: N,
    pub root_node: N,
    pub position: usize,
    pub size: usize,
    /// Prefix bindings of the calling expression.
    pub namespaces: Option<&'f NamespaceMap>,
}

impl<N> FunctionContext<'_, N> {
    /// Expands a `prefix:local` string argument the way the calling expression would.
    pub fn expand_qname(&self, qname: &str) -> Result<String, XPathError> {
        match split_qname(qname) {
            (None, local) => Ok(local.to_string()),
            (Some("xml"), local) => Ok(clark_name(Some(XML_NAMESPACE), local)),
            (Some(prefix), local) => self
                .namespaces
                .and_then(|ns| ns.get(prefix))
                .map(|uri| clark_name(Some(uri), local))
                .ok_or_else(|| XPathError::UnknownPrefix(prefix.to_string())),
        }
    }
}

/// The XPath 1.0 core library plus `key()` and `generate-id()`, which need evaluator state:
/// name, fewest arguments, most arguments (`None` when variadic).
const CORE_LIBRARY: &[(&str, usize, Option<usize>)] = &[
    ("last", 0, Some(0)),
    ("position", 0, Some(0)),
    ("count", 1, Some(1)),
    ("id", 1, Some(1)),
    ("local-name", 0, Some(1)),
    ("namespace-uri", 0, Some(1)),
    ("name", 0, Some(1)),
    ("string", 0, Some(1)),
    ("concat", 2, None),
    ("starts-with", 2, Some(2)),
    ("contains", 2, Some(2)),
    ("substring-before", 2, Some(2)),
    ("substring-after", 2, Some(2)),
    ("substring", 2, Some(3)),
    ("string-length", 0, Some(1)),
    ("normalize-space", 0, Some(1)),
    ("translate", 3, Some(3)),
    ("boolean", 1, Some(1)),
    ("not", 1, Some(1)),
    ("true", 0, Some(0)),
    ("false", 0, Some(0)),
    ("lang", 1, Some(1)),
    ("number", 0, Some(1)),
    ("sum", 1, Some(1)),
    ("floor", 1, Some(1)),
    ("ceiling", 1, Some(1)),
    ("round", 1, Some(1)),
    ("key", 2, Some(2)),
    ("generate-id", 0, Some(1)),
    ("function-available", 1, Some(1)),
];

pub fn is_builtin(name: &str) -> bool {
    CORE_LIBRARY.iter().any(|(builtin, ..)| *builtin == name)
}

fn check_arity(name: &str, given: usize) -> Result<(), XPathError> {
    let Some(&(_, min, max)) = CORE_LIBRARY.iter().find(|(builtin, ..)| *builtin == name) else {
        return Ok(());
    };
    if given >= min && max.is_none_or(|max| given <= max) {
        return Ok(());
    }
    let expected = match max {
        Some(max) if max == min => format!("{}", min),
        Some(max) => format!("{} to {}", min, max),
        None => format!("at least {}", min),
    };
    Err(XPathError::FunctionError {
        function: format!("{}()", name),
        message: format!("expected {} arguments, got {}", expected, given),
    })
}

/// Functions callable from expressions beyond the XPath core library, keyed by
/// expanded name.
pub struct FunctionRegistry<N> {
    functions: HashMap<String, CustomFunction<N>>,
}

impl<N> FunctionRegistry<N> {
    pub fn new() -> Self {
        Self {
            functions: HashMap::new(),
        }
    }

    /// Registers `f` under `{namespace}local`. A later registration replaces an earlier one.
    pub fn register(&mut self, namespace: Option<&str>, local: &str, f: CustomFunction<N>) {
        self.functions.insert(clark_name(namespace, local), f);
    }

    pub fn get(&self, expanded_name: &str) -> Option<&CustomFunction<N>> {
        self.functions.get(expanded_name)
    }

    pub fn contains(&self, namespace: Option<&str>, local: &str) -> bool {
        self.functions.contains_key(&clark_name(namespace, local))
    }
}

impl<N> Default for FunctionRegistry<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<N> Clone for FunctionRegistry<N> {
    fn clone(&self) -> Self {
        Self {
            functions: self.functions.clone(),
        }
    }
}


/// Evaluated arguments of one call, taken front to back. Optional trailing arguments
/// default to the context node where the function says so.
struct Args<N> {
    values: std::vec::IntoIter<XPathValue<N>>,
}

impl<'a, N: DataSourceNode<'a>> Args<N> {
    fn string(&mut self) -> String {
        self.values.next().map(|v| v.to_string()).unwrap_or_default()
    }

    fn number(&mut self) -> f64 {
        self.values.next().map_or(f64::NAN, |v| v.to_number())
    }

    fn string_or_context(&mut self, context: N) -> String {
        match self.values.next() {
            Some(value) => value.to_string(),
            None => context.string_value(),
        }
    }

    fn node_set(&mut self) -> Result<Vec<N>, XPathError> {
        self.values
            .next()
            .map_or(Ok(Vec::new()), XPathValue::into_node_set)
    }

    /// The first node of the argument in document order, or the context node when the
    /// argument is omitted.
    fn node_or_context(&mut self, context: N) -> Result<Option<N>, XPathError> {
        match self.values.next() {
            Some(value) => Ok(value.into_node_set()?.into_iter().min()),
            None => Ok(Some(context)),
        }
    }

    /// String values of a node-set argument, or the argument itself as one string.
    fn strings(&mut self) -> Vec<String> {
        match self.values.next() {
            Some(XPathValue::NodeSet(nodes)) => nodes.iter().map(|n| n.string_value()).collect(),
            Some(other) => vec![other.to_string()],
            None => Vec::new(),
        }
    }
}

/// Evaluates a call to `name`: a core library function, or else one from the registry.
pub fn evaluate_function<'a, 'd, N: DataSourceNode<'a>>(
    name: &str,
    args: Vec<XPathValue<N>>,
    e_ctx: &EvaluationContext<'a, 'd, N>,
) -> Result<XPathValue<N>, XPathError> {
    check_arity(name, args.len())?;
    let context = e_ctx.context_node;
    let mut args = Args {
        values: args.into_iter(),
    };
    let value = match name {
        "last" => XPathValue::Number(e_ctx.context_size as f64),
        "position" => XPathValue::Number(e_ctx.context_position as f64),
        "count" => XPathValue::Number(args.node_set()?.len() as f64),
        "id" => XPathValue::NodeSet(find_ids(e_ctx.root_node, &args.strings().join(" "))),
        "local-name" => XPathValue::String(
            args.node_or_context(context)?
                .and_then(|n| n.name())
                .map(|q| q.local_part.to_string())
                .unwrap_or_default(),
        ),
        "namespace-uri" => XPathValue::String(
            args.node_or_context(context)?
                .and_then(|n| n.namespace_uri())
                .unwrap_or_default()
                .to_string(),
        ),
        "name" => XPathValue::String(
            args.node_or_context(context)?
                .and_then(|n| n.name())
                .map(|q| match q.prefix {
                    Some(prefix) => format!("{}:{}", prefix, q.local_part),
                    None => q.local_part.to_string(),
                })
                .unwrap_or_default(),
        ),
        "key" => {
            let key_name = e_ctx.expand_qname(&args.string())?;
            XPathValue::NodeSet(lookup_key(e_ctx, &key_name, args.strings()))
        }
        "generate-id" => XPathValue::String(
            args.node_or_context(context)?
                .map(generate_id)
                .unwrap_or_default(),
        ),
        "function-available" => {
            XPathValue::Boolean(function_available(e_ctx, &args.string())?)
        }

        "string" => XPathValue::String(args.string_or_context(context)),
        "concat" => XPathValue::String(args.values.map(|v| v.to_string()).collect()),
        "starts-with" => {
            let (haystack, prefix) = (args.string(), args.string());
            XPathValue::Boolean(haystack.starts_with(&prefix))
        }
        "contains" => {
            let (haystack, needle) = (args.string(), args.string());
            XPathValue::Boolean(haystack.contains(&needle))
        }
        "substring-before" => {
            let (haystack, needle) = (args.string(), args.string());
            let before = haystack.find(&needle).map(|at| &haystack[..at]);
            XPathValue::String(before.unwrap_or_default().to_string())
        }
        "substring-after" => {
            let (haystack, needle) = (args.string(), args.string());
            let after = haystack.find(&needle).map(|at| &haystack[at + needle.len()..]);
            XPathValue::String(after.unwrap_or_default().to_string())
        }
        "substring" => {
            let text = args.string();
            let start = args.number();
            let length = args.values.next().map(|v| v.to_number());
            XPathValue::String(substring(&text, start, length))
        }
        "string-length" => {
            XPathValue::Number(args.string_or_context(context).chars().count() as f64)
        }
        "normalize-space" => XPathValue::String(
            args.string_or_context(context)
                .split_whitespace()
                .collect::<Vec<_>>()
                .join(" "),
        ),
        "translate" => {
            let (text, from, to) = (args.string(), args.string(), args.string());
            XPathValue::String(translate(&text, &from, &to))
        }

        "boolean" => XPathValue::Boolean(args.values.next().is_some_and(|v| v.to_bool())),
        "not" => XPathValue::Boolean(!args.values.next().is_some_and(|v| v.to_bool())),
        "true" => XPathValue::Boolean(true),
        "false" => XPathValue::Boolean(false),
        "lang" => XPathValue::Boolean(lang_matches(context, &args.string())),

        "number" => XPathValue::Number(match args.values.next() {
            Some(value) => value.to_number(),
            None => string_to_number(&context.string_value()),
        }),
        "sum" => XPathValue::Number(
            args.node_set()?
                .iter()
                .map(|node| string_to_number(&node.string_value()))
                .sum(),
        ),
        "floor" => XPathValue::Number(args.number().floor()),
        "ceiling" => XPathValue::Number(args.number().ceil()),
        "round" => XPathValue::Number(round(args.number())),

        _ => return call_custom_function(name, args.values.collect(), e_ctx),
    };
    Ok(value)
}

fn call_custom_function<'a, 'd, N: DataSourceNode<'a>>(
    name: &str,
    args: Vec<XPathValue<N>>,
    e_ctx: &EvaluationContext<'a, 'd, N>,
) -> Result<XPathValue<N>, XPathError> {
    let expanded = e_ctx.expand_qname(name)?;
    let function = e_ctx
        .functions
        .get(&expanded)
        .ok_or_else(|| XPathError::UnknownFunction(name.to_string()))?;
    let focus = FunctionContext {
        context_node: e_ctx.context_node,
        current_node: e_ctx.current(),
        root_node: e_ctx.root_node,
        position: e_ctx.context_position,
        size: e_ctx.context_size,
        namespaces: e_ctx.namespaces,
    };
    function(args, &focus)
}

fn function_available<'a, 'd, N: DataSourceNode<'a>>(
    e_ctx: &EvaluationContext<'a, 'd, N>,
    name: &str,
) -> Result<bool, XPathError> {
    Ok(match split_qname(name) {
        (None, local) => is_builtin(local) || e_ctx.functions.contains(None, local),
        (Some(prefix), local) => {
            let uri = e_ctx.resolve_prefix(prefix)?;
            e_ctx.functions.contains(Some(uri), local)
        }
    })
}

/// Finds the elements whose `id` (or `xml:id`) attribute matches one of the
/// whitespace-separated tokens in `ids`, in document order.
pub fn find_ids<'a, N: DataSourceNode<'a>>(root: N, ids: &str) -> Vec<N> {
    let wanted: HashSet<&str> = ids.split_whitespace().collect();
    if wanted.is_empty() {
        return Vec::new();
    }

    let mut found = Vec::new();
    let mut pending: Vec<N> = root.children().collect();
    while let Some(node) = pending.pop() {
        if node.node_type() == NodeType::Element {
            let has_id = node.attributes().any(|attr| {
                attr.name().is_some_and(|q| {
                    q.local_part == "id" && matches!(q.prefix, None | Some("xml"))
                }) && wanted.contains(attr.string_value().as_str())
            });
            if has_id {
                found.push(node);
            }
        }
        pending.extend(node.children());
    }
    found.sort();
    found
}

/// Nodes indexed under any of `values` in the named key, in document order.
fn lookup_key<'a, 'd, N: DataSourceNode<'a>>(
    e_ctx: &EvaluationContext<'a, 'd, N>,
    key_name: &str,
    values: Vec<String>,
) -> Vec<N> {
    let Some(index) = e_ctx.key_indexes.get(key_name) else {
        return Vec::new();
    };
    let mut nodes: Vec<N> = values
        .iter()
        .filter_map(|value| index.get(value))
        .flatten()
        .copied()
        .collect();
    nodes.sort();
    nodes.dedup();
    nodes
}

/// A stable identifier for `node` within one document, usable as an XML name.
fn generate_id<'a, N: DataSourceNode<'a>>(node: N) -> String {
    let mut hasher = DefaultHasher::new();
    node.hash(&mut hasher);
    format!("id{}", hasher.finish())
}

/// Characters at 1-based positions `p` with `round(start) <= p < round(start) + round(length)`.
/// NaN and infinite bounds follow IEEE comparison, so `substring("abc", 0 div 0)` is empty.
fn substring(text: &str, start: f64, length: Option<f64>) -> String {
    let first = round(start);
    let end = length.map_or(f64::INFINITY, |length| first + round(length));
    text.chars()
        .enumerate()
        .filter(|(i, _)| {
            let position = (i + 1) as f64;
            position >= first && position < end
        })
        .map(|(_, c)| c)
        .collect()
}

fn translate(text: &str, from: &str, to: &str) -> String {
    let from: Vec<char> = from.chars().collect();
    let to: Vec<char> = to.chars().collect();
    text.chars()
        .filter_map(|c| match from.iter().position(|&f| f == c) {
            Some(index) => to.get(index).copied(),
            None => Some(c),
        })
        .collect()
}

/// Rounds half-way cases toward positive infinity; NaN, infinities and zeros pass through.
fn round(n: f64) -> f64 {
    if n.is_nan() || n.is_infinite() || n == 0.0 {
        return n;
    }
    (n + 0.5).floor()
}

/// Whether the nearest `xml:lang` in scope of `node` equals `lang` or is a sublanguage of
/// it, ignoring case.
fn lang_matches<'a, N: DataSourceNode<'a>>(node: N, lang: &str) -> bool {
    let lang = lang.to_lowercase();
    let mut current = match node.node_type() {
        NodeType::Element => Some(node),
        _ => node.parent(),
    };
    while let Some(element) = current {
        let declared = element.attributes().find(|attr| {
            attr.name()
                .is_some_and(|q| q.prefix == Some("xml") && q.local_part == "lang")
        });
        if let Some(attr) = declared {
            let declared = attr.string_value().to_lowercase();
            return declared == lang
                || declared
                    .strip_prefix(&lang)
                    .is_some_and(|rest| rest.starts_with('-'));
        }
        current = element.parent();
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasource::tests::{MockNode, MockTree, create_test_tree};
    use crate::engine::KeyIndexes;

    /// Owns what an `EvaluationContext` borrows, so each test can build contexts freely.
    struct Fixture<'a> {
        tree: &'a MockTree<'a>,
        functions: FunctionRegistry<MockNode<'a>>,
        variables: HashMap<String, XPathValue<MockNode<'a>>>,
        keys: KeyIndexes<MockNode<'a>>,
    }

    impl<'a> Fixture<'a> {
        fn new(tree: &'a MockTree<'a>) -> Self {
            Fixture {
                tree,
                functions: FunctionRegistry::default(),
                variables: HashMap::new(),
                keys: HashMap::new(),
            }
        }

        fn node(&self, id: usize) -> MockNode<'a> {
            MockNode { id, tree: self.tree }
        }

        fn at<'s>(
            &'s self,
            id: usize,
            position: usize,
            size: usize,
        ) -> EvaluationContext<'a, 's, MockNode<'a>> {
            EvaluationContext::new(
                self.node(id),
                self.node(0),
                &self.functions,
                position,
                size,
                &self.variables,
                &self.keys,
                false,
            )
        }

        fn call(
            &self,
            context: usize,
            name: &str,
            args: Vec<XPathValue<MockNode<'a>>>,
        ) -> XPathValue<MockNode<'a>> {
            evaluate_function(name, args, &self.at(context, 1, 1)).unwrap()
        }
    }

    fn s<'a>(text: &str) -> XPathValue<MockNode<'a>> {
        XPathValue::String(text.to_string())
    }

    fn n<'a>(value: f64) -> XPathValue<MockNode<'a>> {
        XPathValue::Number(value)
    }

    #[test]
    fn test_string_functions() {
        let tree = create_test_tree();
        let fx = Fixture::new(&tree);
        let text = |name: &str, args| fx.call(0, name, args).to_string();

        assert_eq!(text("concat", vec![s("Hello"), s(" "), s("World"), n(42.0)]), "Hello World42");
        assert_eq!(text("substring-before", vec![s("1999/04/01"), s("/")]), "1999");
        assert_eq!(text("substring-after", vec![s("1999/04/01"), s("/")]), "04/01");
        assert_eq!(text("substring-after", vec![s("abc"), s("x")]), "");
        assert_eq!(text("normalize-space", vec![s("  leading \n and   \t trailing  ")]), "leading and trailing");
        assert_eq!(text("translate", vec![s("BAR"), s("ABC"), s("abc")]), "baR");
        assert_eq!(text("translate", vec![s("--aaa--"), s("abc-"), s("ABC")]), "AAA");
        assert!(fx.call(0, "starts-with", vec![s("abcdef"), s("abc")]).to_bool());
        assert!(!fx.call(0, "contains", vec![s("abcdef"), s("xyz")]).to_bool());
    }

    #[test]
    fn test_substring_rounding_and_edges() {
        let tree = create_test_tree();
        let fx = Fixture::new(&tree);
        let sub = |args| fx.call(0, "substring", args).to_string();

        assert_eq!(sub(vec![s("12345"), n(2.0), n(3.0)]), "234");
        assert_eq!(sub(vec![s("12345"), n(2.0)]), "2345");
        assert_eq!(sub(vec![s("12345"), n(1.5), n(2.6)]), "234");
        assert_eq!(sub(vec![s("12345"), n(0.0), n(3.0)]), "12");
        assert_eq!(sub(vec![s("12345"), n(f64::NAN), n(3.0)]), "");
        assert_eq!(sub(vec![s("12345"), n(-42.0), n(f64::INFINITY)]), "12345");
    }

    #[test]
    fn test_context_defaults() {
        let tree = create_test_tree();
        let fx = Fixture::new(&tree);
        // Node 1 is <para xml:lang="en" id="p1">Hello</para>; node 4 its text.
        assert_eq!(fx.call(1, "string-length", vec![]).to_number(), 5.0);
        assert_eq!(fx.call(1, "string", vec![]).to_string(), "Hello");
        assert_eq!(fx.call(1, "local-name", vec![]).to_string(), "para");
        assert_eq!(fx.call(4, "local-name", vec![]).to_string(), "");
        assert_eq!(fx.call(1, "namespace-uri", vec![]).to_string(), "");
        assert!(fx.call(1, "number", vec![]).to_number().is_nan());

        let lang_attr = fx.node(3);
        assert_eq!(fx.call(1, "name", vec![XPathValue::NodeSet(vec![lang_attr])]).to_string(), "xml:lang");
        assert_eq!(
            fx.call(1, "namespace-uri", vec![XPathValue::NodeSet(vec![lang_attr])]).to_string(),
            XML_NAMESPACE
        );
        assert_eq!(fx.call(1, "name", vec![XPathValue::NodeSet(vec![])]).to_string(), "");
    }

    #[test]
    fn test_position_and_last_come_from_the_focus() {
        let tree = create_test_tree();
        let fx = Fixture::new(&tree);
        let ctx = fx.at(1, 2, 5);
        assert_eq!(evaluate_function("last", vec![], &ctx).unwrap().to_number(), 5.0);
        assert_eq!(evaluate_function("position", vec![], &ctx).unwrap().to_number(), 2.0);
    }

    #[test]
    fn test_boolean_and_number_functions() {
        let tree = create_test_tree();
        let fx = Fixture::new(&tree);
        assert!(fx.call(0, "boolean", vec![s("x")]).to_bool());
        assert!(!fx.call(0, "boolean", vec![n(f64::NAN)]).to_bool());
        assert!(fx.call(0, "not", vec![s("")]).to_bool());
        assert!(!fx.call(0, "not", vec![XPathValue::Boolean(true)]).to_bool());
        assert_eq!(fx.call(0, "number", vec![s(" 12.5 ")]).to_number(), 12.5);
        assert!(fx.call(0, "number", vec![s("1e3")]).to_number().is_nan());
        assert_eq!(fx.call(0, "floor", vec![n(-1.5)]).to_number(), -2.0);
        assert_eq!(fx.call(0, "ceiling", vec![n(1.2)]).to_number(), 2.0);
    }

    #[test]
    fn test_round_half_toward_positive_infinity() {
        let tree = create_test_tree();
        let fx = Fixture::new(&tree);
        let round = |value| fx.call(0, "round", vec![n(value)]).to_number();
        assert_eq!(round(2.5), 3.0);
        assert_eq!(round(2.4), 2.0);
        assert_eq!(round(-2.5), -2.0);
        assert_eq!(round(-2.6), -3.0);
        assert!(round(f64::NAN).is_nan());
    }

    #[test]
    fn test_sum_of_non_numeric_nodes_is_nan() {
        let tree = create_test_tree();
        let fx = Fixture::new(&tree);
        // "Hello" and "p1" are not numbers.
        let nodes = XPathValue::NodeSet(vec![fx.node(1), fx.node(2)]);
        assert!(fx.call(0, "sum", vec![nodes]).to_number().is_nan());
        assert_eq!(fx.call(0, "sum", vec![XPathValue::NodeSet(vec![])]).to_number(), 0.0);
        assert!(evaluate_function("sum", vec![n(1.0)], &fx.at(0, 1, 1)).is_err());
    }

    #[test]
    fn test_lang_uses_nearest_declaration() {
        let tree = create_test_tree();
        let fx = Fixture::new(&tree);
        // Text node 4 sits inside the para declaring xml:lang="en"; node 5 is a div without one.
        assert!(fx.call(4, "lang", vec![s("EN")]).to_bool());
        assert!(!fx.call(4, "lang", vec![s("en-GB")]).to_bool());
        assert!(!fx.call(5, "lang", vec![s("en")]).to_bool());
    }

    #[test]
    fn test_key_lookup_accepts_strings_and_node_sets() {
        let tree = create_test_tree();
        let mut fx = Fixture::new(&tree);
        let para = fx.node(1);
        let id_attr = fx.node(2);
        let mut index = HashMap::new();
        index.insert("p1".to_string(), vec![para]);
        index.insert("attr-val".to_string(), vec![id_attr]);
        fx.keys.insert("id-key".to_string(), index);

        let found = |value| match fx.call(0, "key", vec![s("id-key"), value]) {
            XPathValue::NodeSet(nodes) => nodes,
            other => panic!("expected a node-set, got {:?}", other),
        };
        assert_eq!(found(s("p1")), vec![para]);
        assert!(found(s("nonexistent")).is_empty());
        // @id has the string value "p1".
        assert_eq!(found(XPathValue::NodeSet(vec![id_attr])), vec![para]);
        assert_eq!(found(XPathValue::NodeSet(vec![id_attr, para])), vec![para]);

        let unknown = fx.call(0, "key", vec![s("other-key"), s("p1")]);
        assert!(matches!(unknown, XPathValue::NodeSet(nodes) if nodes.is_empty()));
    }

    #[test]
    fn test_id_with_node_set_argument() {
        let tree = create_test_tree();
        let fx = Fixture::new(&tree);
        let result = fx.call(0, "id", vec![XPathValue::NodeSet(vec![fx.node(2)])]);
        assert!(matches!(result, XPathValue::NodeSet(ref nodes) if *nodes == vec![fx.node(1)]));
    }

    #[test]
    fn test_generate_id_is_stable_per_node() {
        let tree = create_test_tree();
        let fx = Fixture::new(&tree);
        let own = fx.call(1, "generate-id", vec![]).to_string();
        let same = fx.call(0, "generate-id", vec![XPathValue::NodeSet(vec![fx.node(1)])]).to_string();
        let other = fx.call(5, "generate-id", vec![]).to_string();
        assert_eq!(own, same);
        assert_ne!(own, other);
        assert!(own.starts_with("id"));
        assert_eq!(fx.call(0, "generate-id", vec![XPathValue::NodeSet(vec![])]).to_string(), "");
    }

    #[test]
    fn test_arity_is_checked_before_dispatch() {
        let tree = create_test_tree();
        let fx = Fixture::new(&tree);
        let ctx = fx.at(0, 1, 1);
        let err = evaluate_function("concat", vec![s("only")], &ctx).unwrap_err();
        assert!(err.to_string().contains("at least 2"));
        let err = evaluate_function("substring", vec![s("a")], &ctx).unwrap_err();
        assert!(err.to_string().contains("2 to 3"));
        assert!(evaluate_function("true", vec![n(1.0)], &ctx).is_err());
    }

    #[test]
    fn test_custom_function_and_function_available() {
        let tree = create_test_tree();
        let mut fx = Fixture::new(&tree);
        fx.functions.register(
            Some("urn:ext"),
            "double",
            custom_function(|args, _focus| {
                let n = args.first().map(|v| v.to_number()).unwrap_or(f64::NAN);
                Ok(XPathValue::Number(n * 2.0))
            }),
        );
        let mut namespaces = HashMap::new();
        namespaces.insert("ext".to_string(), "urn:ext".to_string());
        let ctx = fx.at(0, 1, 1).with_namespaces(&namespaces);

        let doubled = evaluate_function("ext:double", vec![n(21.0)], &ctx).unwrap();
        assert_eq!(doubled.to_number(), 42.0);

        let available = |name: &str| {
            evaluate_function("function-available", vec![s(name)], &ctx)
                .unwrap()
                .to_bool()
        };
        assert!(available("ext:double"));
        assert!(available("concat"));
        assert!(!available("ext:triple"));
        assert!(!available("no-such-function"));
        assert!(matches!(
            evaluate_function("mystery", vec![], &ctx),
            Err(XPathError::UnknownFunction(_))
        ));
    }
}

//! Compilation of XSLT `match` patterns.
//!
//! A pattern is parsed with the XPath parser and then checked against the pattern
//! grammar: only `child` and `attribute` steps, `/` and `//` separators, and an optional
//! leading `id()` or `key()` call with literal arguments. Each `|` alternative becomes a
//! [`LocationPathPattern`] whose steps are stored innermost-first, so matching starts at
//! the candidate node and walks toward the root. Evaluation lives in `matcher`.

use crate::ast::{CompiledExpr, ExpandedName};
use crate::error::XsltError;
use quill_xpath1::{
    Axis, Expression, LocationPath, NamespaceMap, NodeTest, NodeTypeTest, Step, XML_NAMESPACE,
    clark_name, parse_expression, split_qname,
};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

static NEXT_PATH_ID: AtomicUsize = AtomicUsize::new(0);

/// One test of a compiled location path.
#[derive(Debug, Clone)]
pub enum MatchStep {
    /// The document root.
    Root,
    Element(ExpandedName),
    Attribute(ExpandedName),
    /// Move to the parent, which must be an element with this name when one is given.
    Parent(Option<ExpandedName>),
    /// Move to some ancestor, which must be an element with this name when one is given.
    Ancestor(Option<ExpandedName>),
    /// Membership in `id(...)` for the whitespace-separated identifiers.
    Id(String),
    /// Membership in `key(name, value)`; `name` is the expanded `{uri}local` form.
    Key { name: String, value: String },
    /// `prefix:*` on the child or attribute axis.
    Namespace { uri: String, attribute: bool },
    /// `*` on the child axis, `@*` or `@node()` on the attribute axis.
    All { attribute: bool },
    ProcessingInstruction(Option<String>),
    Comment,
    Text,
    /// `node()` on the child axis: any element, text, comment or processing instruction.
    Node,
    /// Qualifies the closest preceding node test.
    Predicate(CompiledExpr),
}

/// One `|` alternative of a pattern.
#[derive(Debug, Clone)]
pub struct LocationPathPattern {
    /// Process-unique identity, used to key the sibling-position memo.
    pub(crate) id: usize,
    /// Innermost-first.
    pub steps: Vec<MatchStep>,
    pub default_priority: f64,
    pub text: String,
}

impl fmt::Display for LocationPathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// A compiled `match` attribute: a union of location paths.
#[derive(Debug, Clone)]
pub struct Pattern {
    pub paths: Vec<LocationPathPattern>,
    original_text: String,
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.original_text)
    }
}

impl Pattern {
    /// Compiles every alternative, failing on the first malformed one.
    pub fn compile(text: &str, namespaces: &Arc<NamespaceMap>) -> Result<Pattern, XsltError> {
        let (pattern, mut errors) = Self::compile_alternatives(text, namespaces);
        match errors.is_empty() {
            true => Ok(pattern),
            false => Err(errors.remove(0)),
        }
    }

    /// Compiles the alternatives independently. Malformed alternatives are left out of the
    /// pattern and returned as errors; the rest still match.
    pub fn compile_alternatives(
        text: &str,
        namespaces: &Arc<NamespaceMap>,
    ) -> (Pattern, Vec<XsltError>) {
        let mut paths = Vec::new();
        let mut errors = Vec::new();
        for alternative in split_alternatives(text) {
            match compile_path(alternative, namespaces) {
                Ok(path) => paths.push(path),
                Err(message) => errors.push(XsltError::Pattern {
                    pattern: alternative.to_string(),
                    message,
                }),
            }
        }
        let pattern = Pattern {
            paths,
            original_text: text.to_string(),
        };
        (pattern, errors)
    }

    pub fn text(&self) -> &str {
        &self.original_text
    }
}

/// Splits on `|` outside string literals, predicates and parentheses.
fn split_alternatives(text: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut start = 0;
    for (i, c) in text.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'' | '"') => quote = Some(c),
            (None, '[' | '(') => depth += 1,
            (None, ']' | ')') => depth = depth.saturating_sub(1),
            (None, '|') if depth == 0 => {
                parts.push(text[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(text[start..].trim());
    parts
}

/// Where a path is anchored, outermost.
enum Anchor {
    Relative,
    Root,
    Function(MatchStep),
}

fn compile_path(text: &str, namespaces: &Arc<NamespaceMap>) -> Result<LocationPathPattern, String> {
    if text.is_empty() {
        return Err("empty pattern alternative".to_string());
    }
    let expr = parse_expression(text).map_err(|e| e.to_string())?;
    let compiler = PathCompiler { text, namespaces };

    let (anchor, steps): (Anchor, &[Step]) = match &expr {
        Expression::LocationPath(LocationPath {
            start_point: None,
            is_absolute,
            steps,
        }) => {
            let anchor = if *is_absolute {
                Anchor::Root
            } else {
                Anchor::Relative
            };
            (anchor, steps.as_slice())
        }
        Expression::LocationPath(LocationPath {
            start_point: Some(start),
            steps,
            ..
        }) => (Anchor::Function(compiler.id_or_key(start)?), steps.as_slice()),
        Expression::FunctionCall { .. } => (Anchor::Function(compiler.id_or_key(&expr)?), &[]),
        _ => return Err("not a location path pattern".to_string()),
    };

    // Pair every real step with the separator in front of it.
    let mut source_steps: Vec<(bool, &Step)> = Vec::new();
    let mut descendant = false;
    for (i, step) in steps.iter().enumerate() {
        if is_descendant_separator(step) {
            if descendant || i + 1 == steps.len() {
                return Err("'//' must be followed by a step".to_string());
            }
            descendant = true;
            continue;
        }
        source_steps.push((descendant, step));
        descendant = false;
    }
    if source_steps.is_empty() && matches!(anchor, Anchor::Relative) {
        return Err("pattern has no steps".to_string());
    }

    let mut compiled = Vec::new();
    for (index, (descendant, step)) in source_steps.iter().enumerate().rev() {
        compiled.push(compiler.node_test(step)?);
        for predicate in &step.predicates {
            compiled.push(MatchStep::Predicate(compiler.expr(predicate.clone())));
        }
        let has_outer = index > 0 || !matches!(anchor, Anchor::Relative);
        if has_outer {
            compiled.push(if *descendant {
                MatchStep::Ancestor(None)
            } else {
                MatchStep::Parent(None)
            });
        }
    }

    let default_priority = default_priority(&anchor, &source_steps, compiled.first());
    match anchor {
        Anchor::Root => compiled.push(MatchStep::Root),
        Anchor::Function(step) => compiled.push(step),
        Anchor::Relative => {}
    }

    Ok(LocationPathPattern {
        id: NEXT_PATH_ID.fetch_add(1, Ordering::Relaxed),
        steps: merge_navigation(&compiled),
        default_priority,
        text: text.to_string(),
    })
}

fn is_descendant_separator(step: &Step) -> bool {
    step.axis == Axis::DescendantOrSelf
        && step.node_test == NodeTest::NodeType(NodeTypeTest::Node)
        && step.predicates.is_empty()
}

/// Folds an unqualified element test into the navigation step in front of it.
fn merge_navigation(steps: &[MatchStep]) -> Vec<MatchStep> {
    let mut merged = Vec::with_capacity(steps.len());
    let mut i = 0;
    while i < steps.len() {
        let qualified = matches!(steps.get(i + 2), Some(MatchStep::Predicate(_)));
        match (&steps[i], steps.get(i + 1)) {
            (MatchStep::Parent(None), Some(MatchStep::Element(name))) if !qualified => {
                merged.push(MatchStep::Parent(Some(name.clone())));
                i += 2;
            }
            (MatchStep::Ancestor(None), Some(MatchStep::Element(name))) if !qualified => {
                merged.push(MatchStep::Ancestor(Some(name.clone())));
                i += 2;
            }
            (step, _) => {
                merged.push(step.clone());
                i += 1;
            }
        }
    }
    merged
}

fn default_priority(anchor: &Anchor, steps: &[(bool, &Step)], innermost: Option<&MatchStep>) -> f64 {
    match (anchor, steps) {
        (Anchor::Root, []) => 0.0,
        (Anchor::Relative, [(_, step)]) if step.predicates.is_empty() => match innermost {
            Some(MatchStep::Element(_) | MatchStep::Attribute(_)) => 0.0,
            Some(MatchStep::ProcessingInstruction(Some(_))) => 0.0,
            Some(MatchStep::Namespace { .. }) => -0.25,
            _ => -0.5,
        },
        _ => 0.5,
    }
}

struct PathCompiler<'t> {
    text: &'t str,
    namespaces: &'t Arc<NamespaceMap>,
}

impl PathCompiler<'_> {
    fn expr(&self, expr: Expression) -> CompiledExpr {
        CompiledExpr {
            expr,
            source: self.text.to_string(),
            namespaces: Arc::clone(self.namespaces),
        }
    }

    fn namespace(&self, prefix: &str) -> Result<String, String> {
        if prefix == "xml" {
            return Ok(XML_NAMESPACE.to_string());
        }
        self.namespaces
            .get(prefix)
            .cloned()
            .ok_or_else(|| format!("namespace prefix '{}' is not declared", prefix))
    }

    fn expanded_name(&self, qname: &str) -> Result<ExpandedName, String> {
        match split_qname(qname) {
            (Some(prefix), local) => Ok(ExpandedName::new(Some(&self.namespace(prefix)?), local)),
            (None, local) => Ok(ExpandedName::local(local)),
        }
    }

    fn node_test(&self, step: &Step) -> Result<MatchStep, String> {
        let attribute = match step.axis {
            Axis::Child => false,
            Axis::Attribute => true,
            other => return Err(format!("axis {:?} is not allowed in a pattern", other)),
        };
        Ok(match (&step.node_test, attribute) {
            (NodeTest::Name(name), false) => MatchStep::Element(self.expanded_name(name)?),
            (NodeTest::Name(name), true) => MatchStep::Attribute(self.expanded_name(name)?),
            (NodeTest::Wildcard, _) => MatchStep::All { attribute },
            (NodeTest::NamespaceWildcard(prefix), _) => MatchStep::Namespace {
                uri: self.namespace(prefix)?,
                attribute,
            },
            (NodeTest::NodeType(NodeTypeTest::Node), true) => MatchStep::All { attribute },
            (NodeTest::ProcessingInstructionTarget(target), false) => {
                MatchStep::ProcessingInstruction(Some(target.clone()))
            }
            (NodeTest::NodeType(NodeTypeTest::ProcessingInstruction), false) => {
                MatchStep::ProcessingInstruction(None)
            }
            (NodeTest::NodeType(NodeTypeTest::Comment), false) => MatchStep::Comment,
            (NodeTest::NodeType(NodeTypeTest::Text), false) => MatchStep::Text,
            (NodeTest::NodeType(NodeTypeTest::Node), false) => MatchStep::Node,
            (test, true) => return Err(format!("{:?} can never match an attribute", test)),
        })
    }

    /// The leading `id('...')` or `key('name', '...')` of a pattern.
    fn id_or_key(&self, expr: &Expression) -> Result<MatchStep, String> {
        let Expression::FunctionCall { name, args } = expr else {
            return Err("a pattern may only start with id() or key()".to_string());
        };
        match (name.as_str(), args.as_slice()) {
            ("id", [Expression::Literal(ids)]) => Ok(MatchStep::Id(ids.clone())),
            ("key", [Expression::Literal(key), Expression::Literal(value)]) => {
                let key = self.expanded_name(key)?;
                Ok(MatchStep::Key {
                    name: clark_name(key.namespace.as_deref(), &key.local),
                    value: value.clone(),
                })
            }
            ("id" | "key", _) => Err(format!("{}() in a pattern takes literal arguments", name)),
            _ => Err(format!("function {}() is not allowed in a pattern", name)),
        }
    }
}

//! Evaluation of compiled patterns against source nodes.
//!
//! Positional predicates (`item[2]`) number a node among its siblings that pass the
//! same node test and the predicates before it. Those sibling lists are memoized per
//! parent in a [`MatchCache`], so testing every child of a long list stays linear. The
//! memo only stores what a cold computation would produce.

use crate::pattern::{LocationPathPattern, MatchStep, Pattern};
use crate::ast::ExpandedName;
use quill_xpath1::{
    DataSourceNode, EvaluationContext, FunctionRegistry, KeyIndexes, NamespaceMap, NodeType,
    VariableScope, XPathError, find_ids, predicate_holds,
};
use std::cell::RefCell;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::rc::Rc;

/// Sibling lists keyed by (path id, predicate step index, parent node).
pub type MatchCache<N> = HashMap<(usize, usize, N), Rc<Vec<N>>>;

/// Everything a predicate inside a pattern can observe.
pub struct MatchEnv<'e, 'a, N: DataSourceNode<'a>> {
    pub root: N,
    pub functions: &'e FunctionRegistry<N>,
    pub variables: &'e dyn VariableScope<N>,
    pub key_indexes: &'e KeyIndexes<N>,
    pub strict: bool,
    pub cache: Option<&'e RefCell<MatchCache<N>>>,
    _marker: PhantomData<&'a ()>,
}

impl<'e, 'a, N: DataSourceNode<'a> + 'a> MatchEnv<'e, 'a, N> {
    pub fn new(
        root: N,
        functions: &'e FunctionRegistry<N>,
        variables: &'e dyn VariableScope<N>,
        key_indexes: &'e KeyIndexes<N>,
        strict: bool,
    ) -> Self {
        Self {
            root,
            functions,
            variables,
            key_indexes,
            strict,
            cache: None,
            _marker: PhantomData,
        }
    }

    pub fn with_cache(mut self, cache: &'e RefCell<MatchCache<N>>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Inside a pattern, `current()` is the node being tested.
    fn context<'d>(
        &'d self,
        node: N,
        position: usize,
        size: usize,
        namespaces: &'d NamespaceMap,
    ) -> EvaluationContext<'a, 'd, N> {
        EvaluationContext::new(
            node,
            self.root,
            self.functions,
            position,
            size,
            self.variables,
            self.key_indexes,
            self.strict,
        )
        .with_namespaces(namespaces)
        .with_current_node(node)
    }
}

impl Pattern {
    /// True when any alternative matches `node`.
    pub fn matches<'a, N: DataSourceNode<'a> + 'a>(
        &self,
        node: N,
        env: &MatchEnv<'_, 'a, N>,
    ) -> Result<bool, XPathError> {
        for path in &self.paths {
            if path.matches(node, env)? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

impl LocationPathPattern {
    pub fn matches<'a, N: DataSourceNode<'a> + 'a>(
        &self,
        node: N,
        env: &MatchEnv<'_, 'a, N>,
    ) -> Result<bool, XPathError> {
        self.match_from(0, node, env)
    }

    fn match_from<'a, N: DataSourceNode<'a> + 'a>(
        &self,
        start: usize,
        node: N,
        env: &MatchEnv<'_, 'a, N>,
    ) -> Result<bool, XPathError> {
        let mut current = node;
        let mut index = start;
        while let Some(step) = self.steps.get(index) {
            match step {
                MatchStep::Parent(name) => {
                    let Some(parent) = current.parent() else {
                        return Ok(false);
                    };
                    if name.as_ref().is_some_and(|n| !is_element_named(parent, n)) {
                        return Ok(false);
                    }
                    current = parent;
                }
                MatchStep::Ancestor(name) => {
                    let mut ancestor = current.parent();
                    while let Some(candidate) = ancestor {
                        if name.as_ref().is_none_or(|n| is_element_named(candidate, n))
                            && self.match_from(index + 1, candidate, env)?
                        {
                            return Ok(true);
                        }
                        ancestor = candidate.parent();
                    }
                    return Ok(false);
                }
                MatchStep::Predicate(expr) => {
                    let siblings = self.predicate_candidates(index, current, env)?;
                    let Some(position) = siblings.iter().position(|s| *s == current) else {
                        return Ok(false);
                    };
                    let e_ctx = env.context(current, position + 1, siblings.len(), &expr.namespaces);
                    if !predicate_holds(&expr.expr, &e_ctx)? {
                        return Ok(false);
                    }
                }
                test => {
                    if !test_matches(test, current, env) {
                        return Ok(false);
                    }
                }
            }
            index += 1;
        }
        Ok(true)
    }

    /// The siblings of `node` that the predicate at `index` numbers: those passing the
    /// node test it qualifies and every earlier predicate on that test.
    fn predicate_candidates<'a, N: DataSourceNode<'a> + 'a>(
        &self,
        index: usize,
        node: N,
        env: &MatchEnv<'_, 'a, N>,
    ) -> Result<Rc<Vec<N>>, XPathError> {
        let Some(parent) = node.parent() else {
            return Ok(Rc::new(vec![node]));
        };
        let key = (self.id, index, parent);
        if let Some(cache) = env.cache {
            if let Some(hit) = cache.borrow().get(&key) {
                return Ok(Rc::clone(hit));
            }
        }

        let test_index = self.steps[..index]
            .iter()
            .rposition(|s| !matches!(s, MatchStep::Predicate(_)))
            .unwrap_or(0);
        let test = &self.steps[test_index];
        let siblings = if node.node_type() == NodeType::Attribute {
            parent.attributes()
        } else {
            parent.children()
        };
        let mut candidates: Vec<N> = siblings.filter(|s| test_matches(test, *s, env)).collect();

        for step in &self.steps[test_index + 1..index] {
            if let MatchStep::Predicate(expr) = step {
                let size = candidates.len();
                let mut kept = Vec::with_capacity(size);
                for (i, &candidate) in candidates.iter().enumerate() {
                    let e_ctx = env.context(candidate, i + 1, size, &expr.namespaces);
                    if predicate_holds(&expr.expr, &e_ctx)? {
                        kept.push(candidate);
                    }
                }
                candidates = kept;
            }
        }

        let candidates = Rc::new(candidates);
        if let Some(cache) = env.cache {
            cache.borrow_mut().insert(key, Rc::clone(&candidates));
        }
        Ok(candidates)
    }
}

fn is_named<'a, N: DataSourceNode<'a>>(node: N, name: &ExpandedName) -> bool {
    node.name().is_some_and(|q| q.local_part == name.local)
        && node.namespace_uri() == name.namespace.as_deref()
}

fn is_element_named<'a, N: DataSourceNode<'a>>(node: N, name: &ExpandedName) -> bool {
    node.node_type() == NodeType::Element && is_named(node, name)
}

/// Applies one node test. Navigation and predicate steps never reach here.
fn test_matches<'a, N: DataSourceNode<'a> + 'a>(
    step: &MatchStep,
    node: N,
    env: &MatchEnv<'_, 'a, N>,
) -> bool {
    let node_type = node.node_type();
    let principal = |attribute: bool| {
        if attribute {
            NodeType::Attribute
        } else {
            NodeType::Element
        }
    };
    match step {
        MatchStep::Root => node_type == NodeType::Root,
        MatchStep::Element(name) => is_element_named(node, name),
        MatchStep::Attribute(name) => node_type == NodeType::Attribute && is_named(node, name),
        MatchStep::Id(ids) => {
            node_type == NodeType::Element && find_ids(env.root, ids).contains(&node)
        }
        MatchStep::Key { name, value } => env
            .key_indexes
            .get(name)
            .and_then(|table| table.get(value))
            .is_some_and(|nodes| nodes.contains(&node)),
        MatchStep::Namespace { uri, attribute } => {
            node_type == principal(*attribute) && node.namespace_uri() == Some(uri.as_str())
        }
        MatchStep::All { attribute } => node_type == principal(*attribute),
        MatchStep::ProcessingInstruction(target) => {
            node_type == NodeType::ProcessingInstruction
                && target
                    .as_deref()
                    .is_none_or(|t| node.name().is_some_and(|q| q.local_part == t))
        }
        MatchStep::Comment => node_type == NodeType::Comment,
        MatchStep::Text => node_type == NodeType::Text,
        MatchStep::Node => matches!(
            node_type,
            NodeType::Element | NodeType::Text | NodeType::Comment | NodeType::ProcessingInstruction
        ),
        MatchStep::Parent(_) | MatchStep::Ancestor(_) | MatchStep::Predicate(_) => false,
    }
}

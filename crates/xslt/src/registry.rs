//! Template rule lookup.
//!
//! Each precedence level owns a [`TemplateRegistry`]. Rules whose innermost test names a
//! concrete element, attribute or processing-instruction target live in name-keyed
//! buckets; everything else goes to a fallback list for its node type. Every list is
//! kept sorted by descending priority, and among equal priorities the later declaration
//! comes first, so the first match in a list is that list's winner.

use crate::ast::{ExpandedName, StylesheetLevel, TemplateId};
use crate::matcher::MatchEnv;
use crate::pattern::{LocationPathPattern, MatchStep};
use quill_xpath1::{DataSourceNode, NodeType, XPathError};
use std::collections::HashMap;
use std::ops::Range;

/// One alternative of a template's match pattern, as registered.
#[derive(Debug, Clone)]
pub struct CompiledPattern {
    pub path: LocationPathPattern,
    pub priority: f64,
    pub mode: Option<ExpandedName>,
    pub template: TemplateId,
    /// Declaration order of the owning template.
    pub position: usize,
}

impl CompiledPattern {
    /// Mode first, then the path.
    pub fn matches<'a, N: DataSourceNode<'a> + 'a>(
        &self,
        node: N,
        mode: &Option<ExpandedName>,
        env: &MatchEnv<'_, 'a, N>,
    ) -> Result<bool, XPathError> {
        if &self.mode != mode {
            return Ok(false);
        }
        self.path.matches(node, env)
    }

    fn outranks(&self, other: &CompiledPattern) -> bool {
        self.priority > other.priority
            || (self.priority == other.priority && self.position > other.position)
    }
}

#[derive(Debug, Default)]
pub struct TemplateRegistry {
    /// Mode, then element/attribute name or PI target.
    named: HashMap<Option<ExpandedName>, HashMap<String, Vec<CompiledPattern>>>,
    root: Vec<CompiledPattern>,
    /// `id()` and `key()` rules.
    keyed: Vec<CompiledPattern>,
    /// `*`, `prefix:*` and `node()`.
    element: Vec<CompiledPattern>,
    attribute: Vec<CompiledPattern>,
    processing_instruction: Vec<CompiledPattern>,
    comment: Vec<CompiledPattern>,
    text: Vec<CompiledPattern>,
    len: usize,
}

fn insert_sorted(list: &mut Vec<CompiledPattern>, pattern: CompiledPattern) {
    let index = list.partition_point(|existing| existing.outranks(&pattern));
    list.insert(index, pattern);
}

impl TemplateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, pattern: CompiledPattern) {
        self.len += 1;
        let list = match pattern.path.steps.first() {
            Some(MatchStep::Element(name) | MatchStep::Attribute(name)) => {
                let local = name.local.clone();
                self.bucket(&pattern.mode, local)
            }
            Some(MatchStep::ProcessingInstruction(Some(target))) => {
                let target = target.clone();
                self.bucket(&pattern.mode, target)
            }
            Some(MatchStep::Root) => &mut self.root,
            Some(MatchStep::Id(_) | MatchStep::Key { .. }) => &mut self.keyed,
            Some(MatchStep::All { attribute: true } | MatchStep::Namespace { attribute: true, .. }) => {
                &mut self.attribute
            }
            Some(MatchStep::ProcessingInstruction(None)) => &mut self.processing_instruction,
            Some(MatchStep::Comment) => &mut self.comment,
            Some(MatchStep::Text) => &mut self.text,
            _ => &mut self.element,
        };
        insert_sorted(list, pattern);
    }

    fn bucket(&mut self, mode: &Option<ExpandedName>, name: String) -> &mut Vec<CompiledPattern> {
        self.named
            .entry(mode.clone())
            .or_default()
            .entry(name)
            .or_default()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The lists that can hold a rule for `node`.
    fn candidate_lists<'r, 'a, N: DataSourceNode<'a>>(
        &'r self,
        node: N,
        mode: &Option<ExpandedName>,
    ) -> Vec<&'r [CompiledPattern]> {
        let named = match self.named.get(mode) {
            Some(by_name) => node
                .name()
                .and_then(|q| by_name.get(q.local_part))
                .map(Vec::as_slice),
            None => None,
        };
        let mut lists: Vec<&'r [CompiledPattern]> = Vec::with_capacity(4);
        match node.node_type() {
            NodeType::Element => lists.extend(named),
            NodeType::Attribute => {
                lists.extend(named);
                lists.push(&self.attribute);
            }
            NodeType::ProcessingInstruction => {
                lists.extend(named);
                lists.push(&self.processing_instruction);
            }
            NodeType::Text => lists.push(&self.text),
            NodeType::Comment => lists.push(&self.comment),
            NodeType::Root => lists.push(&self.root),
        }
        if node.node_type() != NodeType::Attribute {
            lists.push(&self.element);
        }
        lists.push(&self.keyed);
        lists
    }

    /// The best rule of this level for `node` in `mode`, if any matches.
    pub fn find_match<'a, N: DataSourceNode<'a> + 'a>(
        &self,
        node: N,
        mode: &Option<ExpandedName>,
        env: &MatchEnv<'_, 'a, N>,
    ) -> Result<Option<&CompiledPattern>, XPathError> {
        let mut best: Option<&CompiledPattern> = None;
        for list in self.candidate_lists(node, mode) {
            for candidate in list {
                if best.is_some_and(|b| !candidate.outranks(b)) {
                    // Everything after this entry ranks lower still.
                    break;
                }
                if candidate.matches(node, mode, env)? {
                    best = Some(candidate);
                    break;
                }
            }
        }
        Ok(best)
    }
}

/// Searches `levels[range]` in precedence order and returns the rule from the first
/// level that has any match. Lower levels are not consulted once a level matches.
pub fn resolve_template<'a, N: DataSourceNode<'a> + 'a>(
    levels: &[StylesheetLevel],
    range: Range<usize>,
    node: N,
    mode: &Option<ExpandedName>,
    env: &MatchEnv<'_, 'a, N>,
) -> Result<Option<TemplateId>, XPathError> {
    for (index, level) in levels.get(range).unwrap_or_default().iter().enumerate() {
        if let Some(found) = level.registry.find_match(node, mode, env)? {
            log::trace!(
                "Node {:?} matched '{}' (priority {}) at level {}",
                node.name().map(|q| q.local_part),
                found.path,
                found.priority,
                index
            );
            return Ok(Some(found.template));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasources::{XmlDocument, XmlNode};
    use crate::pattern::Pattern;
    use quill_xpath1::{FunctionRegistry, KeyIndexes, NamespaceMap, XPathValue};
    use std::sync::Arc;

    fn register(
        registry: &mut TemplateRegistry,
        text: &str,
        priority: Option<f64>,
        mode: Option<&str>,
        template: usize,
    ) {
        let pattern = Pattern::compile(text, &Arc::new(NamespaceMap::new())).unwrap();
        for path in pattern.paths {
            registry.insert(CompiledPattern {
                priority: priority.unwrap_or(path.default_priority),
                path,
                mode: mode.map(ExpandedName::local),
                template: TemplateId(template),
                position: template,
            });
        }
    }

    fn first_element<'a>(node: XmlNode<'a, 'a>) -> XmlNode<'a, 'a> {
        node.children()
            .find(|n| n.node_type() == NodeType::Element)
            .unwrap()
    }

    fn resolve_with(
        registry: &TemplateRegistry,
        xml: &str,
        mode: Option<&str>,
        pick: impl for<'x> Fn(XmlNode<'x, 'x>) -> XmlNode<'x, 'x>,
    ) -> Option<usize> {
        let doc = XmlDocument::parse(xml).unwrap();
        let root = doc.root_node();
        let functions = FunctionRegistry::new();
        let vars: HashMap<String, XPathValue<XmlNode>> = HashMap::new();
        let keys = KeyIndexes::new();
        let env = MatchEnv::new(root, &functions, &vars, &keys, false);
        let mode = mode.map(ExpandedName::local);
        registry
            .find_match(pick(root), &mode, &env)
            .unwrap()
            .map(|p| p.template.0)
    }

    #[test]
    fn test_specific_name_beats_wildcard() {
        let mut registry = TemplateRegistry::new();
        register(&mut registry, "a", None, None, 0);
        register(&mut registry, "*", None, None, 1);
        assert_eq!(resolve_with(&registry, "<a/>", None, first_element), Some(0));
        assert_eq!(resolve_with(&registry, "<b/>", None, first_element), Some(1));
    }

    #[test]
    fn test_later_declaration_wins_at_equal_priority() {
        let mut registry = TemplateRegistry::new();
        register(&mut registry, "item", None, None, 0);
        register(&mut registry, "item", None, None, 1);
        assert_eq!(resolve_with(&registry, "<item/>", None, first_element), Some(1));
    }

    #[test]
    fn test_explicit_priority_crosses_lists() {
        let mut registry = TemplateRegistry::new();
        register(&mut registry, "a", None, None, 0);
        register(&mut registry, "*", Some(2.0), None, 1);
        register(&mut registry, "node()", Some(1.0), None, 2);
        assert_eq!(resolve_with(&registry, "<a/>", None, first_element), Some(1));
    }

    #[test]
    fn test_equal_priority_across_lists_prefers_later() {
        let mut registry = TemplateRegistry::new();
        register(&mut registry, "*", Some(0.0), None, 0);
        register(&mut registry, "a", None, None, 1);
        register(&mut registry, "b", None, None, 2);
        register(&mut registry, "*", Some(0.0), None, 3);
        assert_eq!(resolve_with(&registry, "<a/>", None, first_element), Some(3));
    }

    #[test]
    fn test_modes_partition_rules() {
        let mut registry = TemplateRegistry::new();
        register(&mut registry, "a", None, None, 0);
        register(&mut registry, "a", None, Some("toc"), 1);
        register(&mut registry, "*", None, Some("toc"), 2);
        assert_eq!(resolve_with(&registry, "<a/>", None, first_element), Some(0));
        assert_eq!(resolve_with(&registry, "<a/>", Some("toc"), first_element), Some(1));
        assert_eq!(resolve_with(&registry, "<b/>", Some("toc"), first_element), Some(2));
        assert_eq!(resolve_with(&registry, "<b/>", None, first_element), None);
        assert_eq!(resolve_with(&registry, "<a/>", Some("other"), first_element), None);
    }

    #[test]
    fn test_node_kinds_use_their_lists() {
        let mut registry = TemplateRegistry::new();
        register(&mut registry, "/", None, None, 0);
        register(&mut registry, "text()", None, None, 1);
        register(&mut registry, "@*", None, None, 2);
        register(&mut registry, "node()", None, None, 3);
        let xml = "<r a='1'>t</r>";
        assert_eq!(resolve_with(&registry, xml, None, |root| root), Some(0));
        assert_eq!(
            resolve_with(&registry, xml, None, |root| first_element(root)
                .children()
                .next()
                .unwrap()),
            Some(3)
        );
        assert_eq!(
            resolve_with(&registry, xml, None, |root| first_element(root)
                .attributes()
                .next()
                .unwrap()),
            Some(2)
        );
        assert_eq!(resolve_with(&registry, xml, None, first_element), Some(3));
        assert_eq!(registry.len(), 4);
    }
}

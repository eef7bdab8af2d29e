//! The tree a transformation produces.
//!
//! [`ResultTree`] is an arena of nodes addressed by [`NodeId`]. [`TreeBuilder`] implements
//! [`OutputBuilder`] over it and keeps every element and attribute name bound to its
//! namespace: an in-scope declaration is reused when it already binds the right URI,
//! otherwise a declaration is added, with a generated prefix when the requested one is
//! taken on the same element.

use crate::output::OutputBuilder;
use quill_xpath1::ResultFragment;
use std::any::Any;
use std::fmt;

const XML_NAMESPACE: &str = "http://www.w3.org/XML/1998/namespace";

/// A name in the result tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResultName {
    pub prefix: Option<String>,
    pub local: String,
    pub namespace: Option<String>,
}

impl ResultName {
    pub fn new(prefix: Option<&str>, local: &str, namespace: Option<&str>) -> Self {
        Self {
            prefix: prefix.filter(|p| !p.is_empty()).map(str::to_string),
            local: local.to_string(),
            namespace: namespace.filter(|ns| !ns.is_empty()).map(str::to_string),
        }
    }

    pub fn local(local: &str) -> Self {
        Self::new(None, local, None)
    }

    /// `prefix:local`, or `local` without a prefix.
    pub fn qualified(&self) -> String {
        match &self.prefix {
            Some(prefix) => format!("{}:{}", prefix, self.local),
            None => self.local.clone(),
        }
    }

    fn same_expanded(&self, other: &ResultName) -> bool {
        self.local == other.local && self.namespace == other.namespace
    }
}

impl fmt::Display for ResultName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.qualified())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

#[derive(Debug, Clone, PartialEq)]
pub enum ResultNodeKind {
    Document,
    Element {
        name: ResultName,
        /// Declarations made on this element, in order.
        namespaces: Vec<(Option<String>, String)>,
        attributes: Vec<(ResultName, String)>,
    },
    Text {
        text: String,
        disable_escaping: bool,
    },
    Comment(String),
    ProcessingInstruction {
        target: String,
        data: String,
    },
}

#[derive(Debug, Clone)]
pub struct ResultNode {
    pub kind: ResultNodeKind,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
}

#[derive(Debug, Clone)]
pub struct ResultTree {
    nodes: Vec<ResultNode>,
}

impl Default for ResultTree {
    fn default() -> Self {
        Self::new()
    }
}

impl ResultTree {
    pub fn new() -> Self {
        Self {
            nodes: vec![ResultNode {
                kind: ResultNodeKind::Document,
                parent: None,
                children: Vec::new(),
            }],
        }
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    pub fn node(&self, id: NodeId) -> &ResultNode {
        &self.nodes[id.0]
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id.0].children
    }

    /// The first element child of the document, if any.
    pub fn document_element(&self) -> Option<NodeId> {
        self.children(self.root())
            .iter()
            .copied()
            .find(|&id| matches!(self.node(id).kind, ResultNodeKind::Element { .. }))
    }

    fn append(&mut self, parent: NodeId, kind: ResultNodeKind) -> NodeId {
        // Adjacent text with the same escaping is merged.
        if let ResultNodeKind::Text {
            text,
            disable_escaping,
        } = &kind
        {
            let last = self.nodes[parent.0].children.last().copied();
            if let Some(last) = last {
                if let ResultNodeKind::Text {
                    text: existing,
                    disable_escaping: existing_raw,
                } = &mut self.nodes[last.0].kind
                {
                    if *existing_raw == *disable_escaping {
                        existing.push_str(text);
                        return last;
                    }
                }
            }
        }
        let id = NodeId(self.nodes.len());
        self.nodes.push(ResultNode {
            kind,
            parent: Some(parent),
            children: Vec::new(),
        });
        self.nodes[parent.0].children.push(id);
        id
    }

    /// Concatenated text of the subtree under `id`.
    pub fn text_content(&self, id: NodeId) -> String {
        let mut text = String::new();
        self.collect_text(id, &mut text);
        text
    }

    fn collect_text(&self, id: NodeId, out: &mut String) {
        match &self.node(id).kind {
            ResultNodeKind::Text { text, .. } => out.push_str(text),
            ResultNodeKind::Document | ResultNodeKind::Element { .. } => {
                for &child in self.children(id) {
                    self.collect_text(child, out);
                }
            }
            ResultNodeKind::Comment(_) | ResultNodeKind::ProcessingInstruction { .. } => {}
        }
    }

    /// The URI bound to `prefix` at `element`, following ancestor declarations.
    fn namespace_in_scope(&self, element: NodeId, prefix: Option<&str>) -> Option<&str> {
        let mut current = Some(element);
        while let Some(id) = current {
            if let ResultNodeKind::Element { namespaces, .. } = &self.node(id).kind {
                if let Some((_, uri)) = namespaces.iter().find(|(p, _)| p.as_deref() == prefix) {
                    return Some(uri.as_str()).filter(|uri| !uri.is_empty());
                }
            }
            current = self.node(id).parent;
        }
        None
    }

    /// A prefix bound to `uri` at `element`, if some ancestor declared one and it is not
    /// shadowed.
    fn prefix_in_scope(&self, element: NodeId, uri: &str) -> Option<String> {
        let mut current = Some(element);
        while let Some(id) = current {
            if let ResultNodeKind::Element { namespaces, .. } = &self.node(id).kind {
                for (prefix, bound) in namespaces {
                    if let Some(prefix) = prefix {
                        if bound == uri && self.namespace_in_scope(element, Some(prefix)) == Some(uri)
                        {
                            return Some(prefix.clone());
                        }
                    }
                }
            }
            current = self.node(id).parent;
        }
        None
    }

    /// Feeds the subtree under `id` into `builder`. A document node contributes its
    /// children only.
    pub fn replay(&self, id: NodeId, builder: &mut dyn OutputBuilder) {
        match &self.node(id).kind {
            ResultNodeKind::Document => {
                for &child in self.children(id) {
                    self.replay(child, builder);
                }
            }
            ResultNodeKind::Element {
                name,
                namespaces,
                attributes,
            } => {
                builder.start_element(name);
                for (prefix, uri) in namespaces {
                    builder.declare_namespace(prefix.as_deref(), uri);
                }
                for (attr_name, value) in attributes {
                    builder.set_attribute(attr_name, value);
                }
                for &child in self.children(id) {
                    self.replay(child, builder);
                }
                builder.end_element();
            }
            ResultNodeKind::Text {
                text,
                disable_escaping,
            } => {
                if *disable_escaping {
                    builder.add_raw_text(text);
                } else {
                    builder.add_text(text);
                }
            }
            ResultNodeKind::Comment(text) => builder.add_comment(text),
            ResultNodeKind::ProcessingInstruction { target, data } => {
                builder.add_processing_instruction(target, data)
            }
        }
    }
}

impl ResultFragment for ResultTree {
    fn string_value(&self) -> String {
        self.text_content(self.root())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Builds a [`ResultTree`] from [`OutputBuilder`] calls.
#[derive(Debug, Default)]
pub struct TreeBuilder {
    tree: ResultTree,
    open: Vec<NodeId>,
    generated_prefixes: usize,
}

impl TreeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_tree(self) -> ResultTree {
        self.tree
    }

    fn insertion_point(&self) -> NodeId {
        self.open.last().copied().unwrap_or(self.tree.root())
    }

    /// The open element, as long as nothing has been written into it yet.
    fn open_element_without_children(&self) -> Option<NodeId> {
        let id = *self.open.last()?;
        self.tree.children(id).is_empty().then_some(id)
    }

    fn declarations_mut(&mut self, element: NodeId) -> Option<&mut Vec<(Option<String>, String)>> {
        match &mut self.tree.nodes[element.0].kind {
            ResultNodeKind::Element { namespaces, .. } => Some(namespaces),
            _ => None,
        }
    }

    fn declared_here(&self, element: NodeId, prefix: Option<&str>) -> Option<&str> {
        match &self.tree.node(element).kind {
            ResultNodeKind::Element { namespaces, .. } => namespaces
                .iter()
                .find(|(p, _)| p.as_deref() == prefix)
                .map(|(_, uri)| uri.as_str()),
            _ => None,
        }
    }

    fn fresh_prefix(&mut self, element: NodeId) -> String {
        loop {
            let prefix = format!("ns{}", self.generated_prefixes);
            self.generated_prefixes += 1;
            if self.tree.namespace_in_scope(element, Some(&prefix)).is_none() {
                return prefix;
            }
        }
    }

    /// Makes `prefix` resolve to `uri` on `element` and returns the prefix actually used.
    fn bind(&mut self, element: NodeId, prefix: Option<String>, uri: &str) -> Option<String> {
        if self.tree.namespace_in_scope(element, prefix.as_deref()) == Some(uri) {
            return prefix;
        }
        let prefix = match self.declared_here(element, prefix.as_deref()) {
            None => prefix,
            Some(_) => Some(self.fresh_prefix(element)),
        };
        if let Some(declarations) = self.declarations_mut(element) {
            declarations.push((prefix.clone(), uri.to_string()));
        }
        prefix
    }

    fn fix_element_name(&mut self, element: NodeId, name: &ResultName) -> ResultName {
        let mut fixed = name.clone();
        match &name.namespace {
            Some(uri) => fixed.prefix = self.bind(element, name.prefix.clone(), uri),
            None => {
                fixed.prefix = None;
                // Undeclare an inherited default namespace.
                if self.tree.namespace_in_scope(element, None).is_some()
                    && self.declared_here(element, None).is_none()
                {
                    if let Some(declarations) = self.declarations_mut(element) {
                        declarations.push((None, String::new()));
                    }
                }
            }
        }
        fixed
    }

    fn fix_attribute_name(&mut self, element: NodeId, name: &ResultName) -> ResultName {
        let mut fixed = name.clone();
        match &name.namespace {
            Some(uri) if uri == XML_NAMESPACE => fixed.prefix = Some("xml".to_string()),
            Some(uri) => {
                let prefix = match &name.prefix {
                    Some(prefix) => prefix.clone(),
                    None => match self.tree.prefix_in_scope(element, uri) {
                        Some(prefix) => prefix,
                        None => self.fresh_prefix(element),
                    },
                };
                fixed.prefix = self.bind(element, Some(prefix), uri);
            }
            None => fixed.prefix = None,
        }
        fixed
    }
}

impl OutputBuilder for TreeBuilder {
    fn start_element(&mut self, name: &ResultName) {
        let parent = self.insertion_point();
        let id = self.tree.append(
            parent,
            ResultNodeKind::Element {
                name: name.clone(),
                namespaces: Vec::new(),
                attributes: Vec::new(),
            },
        );
        let fixed = self.fix_element_name(id, name);
        if let ResultNodeKind::Element { name, .. } = &mut self.tree.nodes[id.0].kind {
            *name = fixed;
        }
        self.open.push(id);
    }

    fn end_element(&mut self) {
        self.open.pop();
    }

    fn declare_namespace(&mut self, prefix: Option<&str>, uri: &str) {
        let Some(element) = self.open_element_without_children() else {
            return;
        };
        if prefix == Some("xml") || self.declared_here(element, prefix).is_some() {
            return;
        }
        let inherited = self.tree.namespace_in_scope(element, prefix).unwrap_or("");
        if inherited == uri {
            return;
        }
        // Leave the default namespace alone when the element itself is in no namespace.
        if prefix.is_none() {
            if let ResultNodeKind::Element { name, .. } = &self.tree.node(element).kind {
                if name.namespace.is_none() {
                    return;
                }
            }
        }
        if let Some(declarations) = self.declarations_mut(element) {
            declarations.push((prefix.map(str::to_string), uri.to_string()));
        }
    }

    fn set_attribute(&mut self, name: &ResultName, value: &str) -> bool {
        let Some(element) = self.open_element_without_children() else {
            return false;
        };
        let fixed = self.fix_attribute_name(element, name);
        if let ResultNodeKind::Element { attributes, .. } = &mut self.tree.nodes[element.0].kind {
            match attributes.iter_mut().find(|(existing, _)| existing.same_expanded(&fixed)) {
                Some(existing) => existing.1 = value.to_string(),
                None => attributes.push((fixed, value.to_string())),
            }
        }
        true
    }

    fn add_text(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        let parent = self.insertion_point();
        self.tree.append(
            parent,
            ResultNodeKind::Text {
                text: text.to_string(),
                disable_escaping: false,
            },
        );
    }

    fn add_raw_text(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        let parent = self.insertion_point();
        self.tree.append(
            parent,
            ResultNodeKind::Text {
                text: text.to_string(),
                disable_escaping: true,
            },
        );
    }

    fn add_comment(&mut self, text: &str) {
        let parent = self.insertion_point();
        self.tree
            .append(parent, ResultNodeKind::Comment(text.to_string()));
    }

    fn add_processing_instruction(&mut self, target: &str, data: &str) {
        let parent = self.insertion_point();
        self.tree.append(
            parent,
            ResultNodeKind::ProcessingInstruction {
                target: target.to_string(),
                data: data.to_string(),
            },
        );
    }
}

// Source documents backed by roxmltree
use crate::whitespace::{WhitespaceRules, is_xml_whitespace};
use quill_xpath1::{DataSourceNode, NodeType, QName, XML_NAMESPACE};
use roxmltree::{Node, NodeId};
use std::collections::HashSet;
use std::hash::{Hash, Hasher};

/// A parsed source document. DTDs are accepted so entity declarations resolve.
pub struct XmlDocument<'input> {
    doc: roxmltree::Document<'input>,
    /// Whitespace-only text nodes removed by `xsl:strip-space`.
    stripped: HashSet<NodeId>,
}

impl<'input> XmlDocument<'input> {
    pub fn parse(text: &'input str) -> Result<Self, roxmltree::Error> {
        let options = roxmltree::ParsingOptions {
            allow_dtd: true,
            ..roxmltree::ParsingOptions::default()
        };
        let doc = roxmltree::Document::parse_with_options(text, options)?;
        Ok(Self {
            doc,
            stripped: HashSet::new(),
        })
    }

    /// Hides the whitespace-only text children of every element `rules` strips, unless
    /// the nearest `xml:space` on the element or an ancestor says `preserve`.
    pub fn strip_whitespace(&mut self, rules: &WhitespaceRules) {
        if rules.is_empty() {
            return;
        }
        for element in self.doc.descendants().filter(Node::is_element) {
            let name = element.tag_name();
            if !rules.strips(name.namespace(), name.name()) || preserves_space(element) {
                continue;
            }
            let blank = element
                .children()
                .filter(|child| child.is_text() && is_xml_whitespace(child.text().unwrap_or("")));
            self.stripped.extend(blank.map(|child| child.id()));
        }
        log::debug!("Stripped {} whitespace-only text node(s)", self.stripped.len());
    }

    pub fn root_node(&self) -> XmlNode<'_, 'input> {
        XmlNode {
            item: Item::Node(self.doc.root()),
            stripped: &self.stripped,
        }
    }

    pub fn document(&self) -> &roxmltree::Document<'input> {
        &self.doc
    }
}

fn preserves_space(element: Node) -> bool {
    element
        .ancestors()
        .find_map(|node| node.attribute((XML_NAMESPACE, "space")))
        .is_some_and(|value| value == "preserve")
}

/// A node of the source tree.
#[derive(Clone, Copy)]
pub struct XmlNode<'a, 'input> {
    item: Item<'a, 'input>,
    stripped: &'a HashSet<NodeId>,
}

/// roxmltree keeps attributes as data on their element, so they are addressed through
/// the owning element and their index.
#[derive(Debug, Clone, Copy)]
enum Item<'a, 'input> {
    /// Root, element, text, comment or processing instruction.
    Node(Node<'a, 'input>),
    Attribute {
        parent: Node<'a, 'input>,
        index: usize,
    },
}

impl<'a, 'input> XmlNode<'a, 'input> {
    /// The roxmltree node, `None` for attributes.
    pub fn inner(&self) -> Option<Node<'a, 'input>> {
        match self.item {
            Item::Node(node) => Some(node),
            Item::Attribute { .. } => None,
        }
    }

    fn wrap(&self, node: Node<'a, 'input>) -> Self {
        XmlNode {
            item: Item::Node(node),
            stripped: self.stripped,
        }
    }

    fn is_visible(&self, node: &Node) -> bool {
        !self.stripped.contains(&node.id())
    }

    fn attribute(&self) -> Option<roxmltree::Attribute<'a, 'input>> {
        match self.item {
            Item::Attribute { parent, index } => parent.attributes().nth(index),
            Item::Node(_) => None,
        }
    }
}

impl std::fmt::Debug for XmlNode<'_, '_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.item.fmt(f)
    }
}

/// The prefix a name in `uri` was most likely written with. roxmltree does not keep
/// prefixes, so the in-scope declarations are searched. Unprefixed attributes never take
/// the default namespace.
pub(crate) fn prefix_for<'a>(node: Node<'a, 'a>, uri: &str, is_attribute: bool) -> Option<&'a str> {
    if uri == XML_NAMESPACE {
        return Some("xml");
    }
    let mut prefixed = None;
    for ns in node.namespaces() {
        if ns.uri() != uri {
            continue;
        }
        match ns.name() {
            None if !is_attribute => return None,
            Some(name) if prefixed.is_none() => prefixed = Some(name),
            _ => {}
        }
    }
    prefixed
}

impl PartialEq for XmlNode<'_, '_> {
    fn eq(&self, other: &Self) -> bool {
        match (self.item, other.item) {
            (Item::Node(a), Item::Node(b)) => a.id() == b.id(),
            (
                Item::Attribute {
                    parent: p1,
                    index: i1,
                },
                Item::Attribute {
                    parent: p2,
                    index: i2,
                },
            ) => p1.id() == p2.id() && i1 == i2,
            _ => false,
        }
    }
}

impl Eq for XmlNode<'_, '_> {}

impl PartialOrd for XmlNode<'_, '_> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for XmlNode<'_, '_> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        use std::cmp::Ordering;
        match (self.item, other.item) {
            (Item::Node(a), Item::Node(b)) => a.id().get().cmp(&b.id().get()),
            (
                Item::Attribute {
                    parent: p1,
                    index: i1,
                },
                Item::Attribute {
                    parent: p2,
                    index: i2,
                },
            ) => p1.id().get().cmp(&p2.id().get()).then(i1.cmp(&i2)),
            // An element precedes its own attributes; attributes precede its children.
            (Item::Node(e), Item::Attribute { parent, .. }) => {
                if e.id() == parent.id() {
                    Ordering::Less
                } else {
                    e.id().get().cmp(&parent.id().get())
                }
            }
            (Item::Attribute { parent, .. }, Item::Node(e)) => {
                if parent.id() == e.id() {
                    Ordering::Greater
                } else {
                    parent.id().get().cmp(&e.id().get())
                }
            }
        }
    }
}

impl Hash for XmlNode<'_, '_> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self.item {
            Item::Node(node) => {
                0u8.hash(state);
                node.id().hash(state);
            }
            Item::Attribute { parent, index } => {
                1u8.hash(state);
                parent.id().hash(state);
                index.hash(state);
            }
        }
    }
}

impl<'a> DataSourceNode<'a> for XmlNode<'a, 'a> {
    fn node_type(&self) -> NodeType {
        match self.item {
            Item::Node(node) => match node.node_type() {
                roxmltree::NodeType::Root => NodeType::Root,
                roxmltree::NodeType::Element => NodeType::Element,
                roxmltree::NodeType::Text => NodeType::Text,
                roxmltree::NodeType::Comment => NodeType::Comment,
                roxmltree::NodeType::PI => NodeType::ProcessingInstruction,
            },
            Item::Attribute { .. } => NodeType::Attribute,
        }
    }

    fn name(&self) -> Option<QName<'a>> {
        match self.item {
            Item::Node(node) if node.is_element() => {
                let tag = node.tag_name();
                Some(QName {
                    prefix: tag
                        .namespace()
                        .and_then(|uri| prefix_for(node, uri, false)),
                    local_part: tag.name(),
                })
            }
            Item::Node(node) => node.pi().map(|pi| QName {
                prefix: None,
                local_part: pi.target,
            }),
            Item::Attribute { parent, .. } => self.attribute().map(|attr| QName {
                prefix: attr
                    .namespace()
                    .and_then(|uri| prefix_for(parent, uri, true)),
                local_part: attr.name(),
            }),
        }
    }

    fn string_value(&self) -> String {
        match self.item {
            Item::Node(node) => match node.node_type() {
                roxmltree::NodeType::Text | roxmltree::NodeType::Comment => {
                    node.text().unwrap_or("").to_string()
                }
                roxmltree::NodeType::PI => node
                    .pi()
                    .and_then(|pi| pi.value)
                    .unwrap_or("")
                    .to_string(),
                roxmltree::NodeType::Root | roxmltree::NodeType::Element => node
                    .descendants()
                    .filter(|n| n.is_text() && self.is_visible(n))
                    .filter_map(|n| n.text())
                    .collect(),
            },
            Item::Attribute { .. } => self
                .attribute()
                .map(|attr| attr.value().to_string())
                .unwrap_or_default(),
        }
    }

    fn attributes(&self) -> Box<dyn Iterator<Item = Self> + 'a> {
        match self.item {
            Item::Node(parent) => {
                let stripped = self.stripped;
                let count = parent.attributes().len();
                Box::new((0..count).map(move |index| XmlNode {
                    item: Item::Attribute { parent, index },
                    stripped,
                }))
            }
            Item::Attribute { .. } => Box::new(std::iter::empty()),
        }
    }

    fn children(&self) -> Box<dyn Iterator<Item = Self> + 'a> {
        match self.item {
            Item::Node(node) => {
                let this = *self;
                Box::new(
                    node.children()
                        .filter(move |child| this.is_visible(child))
                        .map(move |child| this.wrap(child)),
                )
            }
            Item::Attribute { .. } => Box::new(std::iter::empty()),
        }
    }

    fn parent(&self) -> Option<Self> {
        match self.item {
            Item::Node(node) => node.parent().map(|parent| self.wrap(parent)),
            Item::Attribute { parent, .. } => Some(self.wrap(parent)),
        }
    }

    fn namespace_uri(&self) -> Option<&'a str> {
        match self.item {
            Item::Node(node) if node.is_element() => node.tag_name().namespace(),
            Item::Node(_) => None,
            Item::Attribute { .. } => self.attribute().and_then(|attr| attr.namespace()),
        }
    }

    fn namespaces(&self) -> Vec<(Option<&'a str>, &'a str)> {
        match self.item {
            Item::Node(node) if node.is_element() => node
                .namespaces()
                .map(|ns| (ns.name(), ns.uri()))
                .collect(),
            _ => Vec::new(),
        }
    }

    fn next_sibling(&self) -> Option<Self> {
        match self.item {
            Item::Node(node) => node
                .next_siblings()
                .skip(1)
                .find(|sibling| self.is_visible(sibling))
                .map(|sibling| self.wrap(sibling)),
            Item::Attribute { .. } => None,
        }
    }
}

//! The read-only tree model that expressions are evaluated against.
use std::hash::Hash;

/// The namespace bound to the reserved `xml` prefix.
pub const XML_NAMESPACE: &str = "http://www.w3.org/XML/1998/namespace";

/// A name as written in the source: optional prefix plus local part.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QName<'a> {
    pub prefix: Option<&'a str>,
    pub local_part: &'a str,
}

/// The seven XPath node kinds, minus namespace nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeType {
    Root,
    Element,
    Attribute,
    Text,
    Comment,
    ProcessingInstruction,
}

/// A cheap, copyable handle to a node in some document.
///
/// Both the evaluator and the transformation engine only see documents through this
/// trait. `'a` ties returned names and iterators to the document's storage.
///
/// `Ord` is document order. An element sorts before its attributes and the attributes
/// sort before its children.
pub trait DataSourceNode<'a>:
    std::fmt::Debug + Clone + Copy + PartialEq + Eq + Hash + PartialOrd + Ord
{
    fn node_type(&self) -> NodeType;

    /// Element and attribute names, and the target of a processing instruction.
    fn name(&self) -> Option<QName<'a>>;

    /// The XPath string-value: concatenated descendant text for the root and elements,
    /// the literal content for everything else.
    fn string_value(&self) -> String;

    /// Attribute nodes, empty for anything but elements.
    fn attributes(&self) -> Box<dyn Iterator<Item = Self> + 'a>;

    /// Child nodes in document order. Attributes are not children.
    fn children(&self) -> Box<dyn Iterator<Item = Self> + 'a>;

    /// `None` only for the root. The parent of an attribute is its owner element.
    fn parent(&self) -> Option<Self>;

    /// The namespace URI of an element or attribute name, if it has one.
    fn namespace_uri(&self) -> Option<&'a str> {
        None
    }

    /// The namespace declarations in scope on an element, as `(prefix, uri)` pairs.
    /// The default namespace has no prefix.
    fn namespaces(&self) -> Vec<(Option<&'a str>, &'a str)> {
        Vec::new()
    }

    /// The next node sharing this node's parent. Attributes have no siblings.
    fn next_sibling(&self) -> Option<Self> {
        if self.node_type() == NodeType::Attribute {
            return None;
        }
        let parent = self.parent()?;
        let mut siblings = parent.children();
        siblings.find(|sibling| sibling == self)?;
        siblings.next()
    }
}

/// An arena-backed tree for unit tests, public so downstream crates can reuse it.
pub mod tests {
    use super::*;
    use std::cmp::Ordering;
    use std::hash::Hasher;

    #[derive(Debug, Clone)]
    struct Entry<'a> {
        kind: NodeType,
        name: Option<QName<'a>>,
        value: String,
        parent: Option<usize>,
        children: Vec<usize>,
        attributes: Vec<usize>,
    }

    /// Nodes are identified by their index. Ids follow insertion order, which the
    /// `Ord` impl treats as document order.
    #[derive(Debug, Default)]
    pub struct MockTree<'a> {
        entries: Vec<Entry<'a>>,
    }

    #[derive(Debug, Clone, Copy)]
    pub struct MockNode<'a> {
        pub id: usize,
        pub tree: &'a MockTree<'a>,
    }

    fn local(name: &str) -> Option<QName<'_>> {
        Some(QName {
            prefix: None,
            local_part: name,
        })
    }

    impl<'a> MockTree<'a> {
        /// Appends a node and links it under `parent`, as an attribute or as the last
        /// child depending on `kind`.
        fn push(
            &mut self,
            kind: NodeType,
            name: Option<QName<'a>>,
            value: &str,
            parent: Option<usize>,
        ) -> usize {
            let id = self.entries.len();
            self.entries.push(Entry {
                kind,
                name,
                value: value.to_string(),
                parent,
                children: Vec::new(),
                attributes: Vec::new(),
            });
            if let Some(owner) = parent.map(|p| &mut self.entries[p]) {
                if kind == NodeType::Attribute {
                    owner.attributes.push(id);
                } else {
                    owner.children.push(id);
                }
            }
            id
        }

        fn entry(&self, id: usize) -> &Entry<'a> {
            &self.entries[id]
        }
    }

    impl PartialEq for MockNode<'_> {
        fn eq(&self, other: &Self) -> bool {
            self.id == other.id
        }
    }
    impl Eq for MockNode<'_> {}

    impl PartialOrd for MockNode<'_> {
        fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
            Some(self.cmp(other))
        }
    }
    impl Ord for MockNode<'_> {
        fn cmp(&self, other: &Self) -> Ordering {
            self.id.cmp(&other.id)
        }
    }

    impl Hash for MockNode<'_> {
        fn hash<H: Hasher>(&self, state: &mut H) {
            self.id.hash(state);
        }
    }

    impl<'a> DataSourceNode<'a> for MockNode<'a> {
        fn node_type(&self) -> NodeType {
            self.tree.entry(self.id).kind
        }

        fn name(&self) -> Option<QName<'a>> {
            self.tree.entry(self.id).name
        }

        fn string_value(&self) -> String {
            self.tree.entry(self.id).value.clone()
        }

        fn attributes(&self) -> Box<dyn Iterator<Item = Self> + 'a> {
            let tree = self.tree;
            Box::new(tree.entry(self.id).attributes.iter().map(move |&id| MockNode { id, tree }))
        }

        fn children(&self) -> Box<dyn Iterator<Item = Self> + 'a> {
            let tree = self.tree;
            Box::new(tree.entry(self.id).children.iter().map(move |&id| MockNode { id, tree }))
        }

        fn parent(&self) -> Option<Self> {
            let tree = self.tree;
            tree.entry(self.id).parent.map(|id| MockNode { id, tree })
        }

        fn namespace_uri(&self) -> Option<&'a str> {
            let name = self.tree.entry(self.id).name?;
            (name.prefix == Some("xml")).then_some(XML_NAMESPACE)
        }
    }

    #[cfg(test)]
    impl<'a> MockTree<'a> {
        /// Mirrors a parsed document. Names keep only their local part.
        pub fn from_roxmltree(doc: &'a roxmltree::Document<'a>) -> MockTree<'a> {
            let mut tree = MockTree::default();
            tree.mirror(doc.root(), None);
            tree
        }

        fn mirror(&mut self, node: roxmltree::Node<'a, 'a>, parent: Option<usize>) {
            let text = || -> String {
                node.descendants()
                    .filter(|n| n.is_text())
                    .filter_map(|n| n.text())
                    .collect()
            };
            let id = match node.node_type() {
                roxmltree::NodeType::Root => self.push(NodeType::Root, None, &text(), parent),
                roxmltree::NodeType::Element => {
                    let name = local(node.tag_name().name());
                    self.push(NodeType::Element, name, &text(), parent)
                }
                roxmltree::NodeType::Text => {
                    self.push(NodeType::Text, None, node.text().unwrap_or(""), parent)
                }
                roxmltree::NodeType::Comment => {
                    self.push(NodeType::Comment, None, node.text().unwrap_or(""), parent)
                }
                roxmltree::NodeType::PI => {
                    let (target, value) = node
                        .pi()
                        .map_or((None, ""), |pi| (local(pi.target), pi.value.unwrap_or("")));
                    self.push(NodeType::ProcessingInstruction, target, value, parent)
                }
            };
            for attr in node.attributes() {
                self.push(NodeType::Attribute, local(attr.name()), attr.value(), Some(id));
            }
            for child in node.children() {
                self.mirror(child, Some(id));
            }
        }
    }

    /// The shared fixture. Ids are fixed and tests refer to them directly:
    ///
    /// ```text
    /// 0 root
    /// ├─ 1 <para id="p1" xml:lang="en">   attributes 2 and 3
    /// │  └─ 4 "Hello"
    /// ├─ 8 <!-- comment node -->
    /// ├─ 5 <div/>
    /// ├─ 9 <?pi-target pi-value?>
    /// └─ 6 <para>
    ///    └─ 7 "World"
    /// ```
    pub fn create_test_tree<'a>() -> MockTree<'a> {
        let mut tree = MockTree::default();
        let root = tree.push(NodeType::Root, None, "Hello World", None);
        let para = tree.push(NodeType::Element, local("para"), "Hello", Some(root));
        tree.push(NodeType::Attribute, local("id"), "p1", Some(para));
        let lang = QName {
            prefix: Some("xml"),
            local_part: "lang",
        };
        tree.push(NodeType::Attribute, Some(lang), "en", Some(para));
        tree.push(NodeType::Text, None, "Hello", Some(para));
        tree.push(NodeType::Element, local("div"), "", Some(root));
        let second = tree.push(NodeType::Element, local("para"), "World", Some(root));
        tree.push(NodeType::Text, None, "World", Some(second));
        tree.push(NodeType::Comment, None, " comment node ", Some(root));
        tree.push(
            NodeType::ProcessingInstruction,
            local("pi-target"),
            "pi-value",
            Some(root),
        );
        // Ids were assigned out of document order for the comment and the PI.
        tree.entries[root].children = vec![1, 8, 5, 9, 6];
        tree
    }
}

#[cfg(test)]
mod sibling_tests {
    use super::tests::{MockNode, create_test_tree};
    use super::*;

    #[test]
    fn test_default_next_sibling_walks_parent_children() {
        let tree = create_test_tree();
        let node = |id| MockNode { id, tree: &tree };

        assert_eq!(node(1).next_sibling(), Some(node(8)));
        assert_eq!(node(9).next_sibling(), Some(node(6)));
        assert_eq!(node(6).next_sibling(), None);
        assert_eq!(node(2).next_sibling(), None);
        assert_eq!(node(0).next_sibling(), None);
    }

    #[test]
    fn test_fixture_shape() {
        let tree = create_test_tree();
        let para = MockNode { id: 1, tree: &tree };
        let attributes: Vec<usize> = para.attributes().map(|n| n.id).collect();
        let children: Vec<usize> = para.children().map(|n| n.id).collect();
        assert_eq!(attributes, vec![2, 3]);
        assert_eq!(children, vec![4]);
        assert_eq!(MockNode { id: 3, tree: &tree }.parent(), Some(para));
        assert_eq!(
            MockNode { id: 3, tree: &tree }.namespace_uri(),
            Some(XML_NAMESPACE)
        );
        assert_eq!(MockNode { id: 2, tree: &tree }.namespace_uri(), None);
        assert_eq!(MockNode { id: 9, tree: &tree }.string_value(), "pi-value");
    }
}

//! Axis traversal. Every axis is produced in proximity order: forward axes in document
//! order, reverse axes nearest node first.

use crate::ast::Axis;
use crate::datasource::{DataSourceNode, NodeType};

/// Nodes reachable from `node` along `axis`, nearest first.
pub fn axis_nodes<'a, N: DataSourceNode<'a>>(axis: Axis, node: N) -> Vec<N> {
    match axis {
        Axis::SelfAxis => vec![node],
        Axis::Child => node.children().collect(),
        Axis::Attribute => node.attributes().collect(),
        Axis::Parent => node.parent().into_iter().collect(),
        Axis::Ancestor => ancestors(node).collect(),
        Axis::AncestorOrSelf => std::iter::once(node).chain(ancestors(node)).collect(),
        Axis::Descendant => subtree(node, false),
        Axis::DescendantOrSelf => subtree(node, true),
        Axis::FollowingSibling => {
            let (_, after) = split_siblings(node);
            after
        }
        Axis::PrecedingSibling => {
            let (mut before, _) = split_siblings(node);
            before.reverse();
            before
        }
        Axis::Following => following(node),
        Axis::Preceding => preceding(node),
    }
}

fn ancestors<'a, N: DataSourceNode<'a>>(node: N) -> impl Iterator<Item = N> {
    std::iter::successors(node.parent(), |n| n.parent())
}

/// Preorder walk of the subtree under `node`, using an explicit stack.
fn subtree<'a, N: DataSourceNode<'a>>(node: N, include_self: bool) -> Vec<N> {
    let mut out = Vec::new();
    if include_self {
        out.push(node);
    }
    let mut stack: Vec<N> = node.children().collect();
    stack.reverse();
    while let Some(next) = stack.pop() {
        out.push(next);
        let mark = stack.len();
        stack.extend(next.children());
        stack[mark..].reverse();
    }
    out
}

/// Siblings of `node` before and after it. Attributes and the root have none.
fn split_siblings<'a, N: DataSourceNode<'a>>(node: N) -> (Vec<N>, Vec<N>) {
    if node.node_type() == NodeType::Attribute {
        return (Vec::new(), Vec::new());
    }
    let Some(parent) = node.parent() else {
        return (Vec::new(), Vec::new());
    };
    let mut before = Vec::new();
    let mut after = Vec::new();
    let mut passed = false;
    for sibling in parent.children() {
        if sibling == node {
            passed = true;
        } else if passed {
            after.push(sibling);
        } else {
            before.push(sibling);
        }
    }
    (before, after)
}

/// Everything after `node` in document order, excluding its descendants. An attribute
/// is followed by its owner's content.
fn following<'a, N: DataSourceNode<'a>>(node: N) -> Vec<N> {
    let mut out = Vec::new();
    let mut anchor = node;
    if node.node_type() == NodeType::Attribute {
        let Some(owner) = node.parent() else {
            return out;
        };
        out.extend(subtree(owner, false));
        anchor = owner;
    }
    for current in std::iter::once(anchor).chain(ancestors(anchor)) {
        for sibling in split_siblings(current).1 {
            out.extend(subtree(sibling, true));
        }
    }
    out
}

/// Everything before `node` in reverse document order, excluding its ancestors.
fn preceding<'a, N: DataSourceNode<'a>>(node: N) -> Vec<N> {
    let anchor = match node.node_type() {
        NodeType::Attribute => match node.parent() {
            Some(owner) => owner,
            None => return Vec::new(),
        },
        _ => node,
    };
    let mut out = Vec::new();
    for current in std::iter::once(anchor).chain(ancestors(anchor)) {
        let (before, _) = split_siblings(current);
        for sibling in before.into_iter().rev() {
            let mut block = subtree(sibling, true);
            block.reverse();
            out.extend(block);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasource::tests::{MockNode, MockTree, create_test_tree};

    fn ids(nodes: &[MockNode<'_>]) -> Vec<usize> {
        nodes.iter().map(|n| n.id).collect()
    }

    fn names(nodes: &[MockNode<'_>]) -> Vec<String> {
        nodes
            .iter()
            .filter_map(|n| n.name().map(|q| q.local_part.to_string()))
            .collect()
    }

    #[test]
    fn test_child_and_attribute_axes() {
        let tree = create_test_tree();
        let root = MockNode { id: 0, tree: &tree };
        let para = MockNode { id: 1, tree: &tree };
        assert_eq!(ids(&axis_nodes(Axis::Child, root)), vec![1, 8, 5, 9, 6]);
        assert_eq!(ids(&axis_nodes(Axis::Attribute, para)), vec![2, 3]);
        assert!(axis_nodes(Axis::Child, MockNode { id: 2, tree: &tree }).is_empty());
    }

    #[test]
    fn test_upward_axes_start_nearest() {
        let tree = create_test_tree();
        let text = MockNode { id: 4, tree: &tree };
        assert_eq!(ids(&axis_nodes(Axis::Parent, text)), vec![1]);
        assert_eq!(ids(&axis_nodes(Axis::Ancestor, text)), vec![1, 0]);
        assert_eq!(ids(&axis_nodes(Axis::AncestorOrSelf, text)), vec![4, 1, 0]);
        let root = MockNode { id: 0, tree: &tree };
        assert!(axis_nodes(Axis::Parent, root).is_empty());
    }

    #[test]
    fn test_sibling_axes() {
        let tree = create_test_tree();
        let div = MockNode { id: 5, tree: &tree };
        assert_eq!(ids(&axis_nodes(Axis::FollowingSibling, div)), vec![9, 6]);
        assert_eq!(ids(&axis_nodes(Axis::PrecedingSibling, div)), vec![8, 1]);
        let attr = MockNode { id: 2, tree: &tree };
        assert!(axis_nodes(Axis::FollowingSibling, attr).is_empty());
    }

    #[test]
    fn test_following_and_preceding() {
        let tree = create_test_tree();
        let hello = MockNode { id: 4, tree: &tree };
        assert_eq!(ids(&axis_nodes(Axis::Following, hello)), vec![8, 5, 9, 6, 7]);

        let div = MockNode { id: 5, tree: &tree };
        assert_eq!(ids(&axis_nodes(Axis::Preceding, div)), vec![8, 4, 1]);

        // The root is an ancestor, never a preceding node.
        let world = MockNode { id: 7, tree: &tree };
        assert!(!ids(&axis_nodes(Axis::Preceding, world)).contains(&0));
    }

    #[test]
    fn test_attribute_is_followed_by_owner_content() {
        let tree = create_test_tree();
        let attr = MockNode { id: 2, tree: &tree };
        let following = ids(&axis_nodes(Axis::Following, attr));
        assert_eq!(following.first(), Some(&4));
        assert!(!following.contains(&3));
    }

    #[test]
    fn test_descendants_are_in_document_order() {
        let doc = roxmltree::Document::parse("<a><b><c/><e/></b><d/></a>").unwrap();
        let tree = MockTree::from_roxmltree(&doc);
        let root = MockNode { id: 0, tree: &tree };
        assert_eq!(names(&axis_nodes(Axis::Descendant, root)), vec!["a", "b", "c", "e", "d"]);
        let all = axis_nodes(Axis::DescendantOrSelf, root);
        assert_eq!(all[0], root);
        assert_eq!(all.len(), 6);
    }
}

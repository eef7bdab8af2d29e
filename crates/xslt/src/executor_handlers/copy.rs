use super::attribute_sets::apply_attribute_sets;
use crate::ast::{CompiledExpr, ExpandedName, PreparsedTemplate};
use crate::error::ExecutionError;
use crate::executor::{Focus, TransformContext};
use crate::output::OutputBuilder;
use crate::result_tree::{ResultName, ResultTree};
use quill_xpath1::{DataSourceNode, NodeType, XML_NAMESPACE, XPathValue};

fn result_name<'a, N: DataSourceNode<'a>>(node: N) -> ResultName {
    let (prefix, local) = node
        .name()
        .map_or((None, ""), |q| (q.prefix, q.local_part));
    ResultName::new(prefix, local, node.namespace_uri())
}

fn copy_namespaces<'a, N: DataSourceNode<'a>>(node: N, builder: &mut dyn OutputBuilder) {
    for (prefix, uri) in node.namespaces() {
        if uri != XML_NAMESPACE {
            builder.declare_namespace(prefix, uri);
        }
    }
}

fn copy_attribute<'s, 'a, N: DataSourceNode<'a> + 'a>(
    executor: &TransformContext<'s, 'a, N>,
    node: N,
    builder: &mut dyn OutputBuilder,
) {
    let name = result_name(node);
    if !builder.set_attribute(&name, &node.string_value()) {
        executor.warn(format!(
            "copied attribute '{}' ignored: no element to attach it to",
            name
        ));
    }
}

/// Shallow copy of the context node; the body supplies the content of a copied element
/// or root.
pub(crate) fn handle_copy<'s, 'a, N: DataSourceNode<'a> + 'a>(
    executor: &mut TransformContext<'s, 'a, N>,
    use_attribute_sets: &[ExpandedName],
    body: &PreparsedTemplate,
    focus: Focus<N>,
    builder: &mut dyn OutputBuilder,
) -> Result<(), ExecutionError> {
    let node = focus.node;
    match node.node_type() {
        NodeType::Element => {
            builder.start_element(&result_name(node));
            copy_namespaces(node, builder);
            apply_attribute_sets(executor, use_attribute_sets, focus, builder)?;
            executor.execute_body(body, focus, builder)?;
            builder.end_element();
        }
        NodeType::Root => executor.execute_body(body, focus, builder)?,
        NodeType::Text => builder.add_text(&node.string_value()),
        NodeType::Attribute => copy_attribute(executor, node, builder),
        NodeType::Comment => builder.add_comment(&node.string_value()),
        NodeType::ProcessingInstruction => {
            let target = node.name().map_or("", |q| q.local_part);
            builder.add_processing_instruction(target, &node.string_value());
        }
    }
    Ok(())
}

/// Node-sets are copied deeply, result tree fragments are replayed, and anything else is
/// written as text.
pub(crate) fn handle_copy_of<'s, 'a, N: DataSourceNode<'a> + 'a>(
    executor: &mut TransformContext<'s, 'a, N>,
    select: &CompiledExpr,
    focus: Focus<N>,
    builder: &mut dyn OutputBuilder,
) -> Result<(), ExecutionError> {
    match executor.eval(select, focus)? {
        XPathValue::NodeSet(nodes) => {
            for node in nodes {
                copy_node(executor, node, builder);
            }
        }
        XPathValue::Fragment(fragment) => {
            match fragment.as_any().downcast_ref::<ResultTree>() {
                Some(tree) => tree.replay(tree.root(), builder),
                None => builder.add_text(&fragment.string_value()),
            }
        }
        other => {
            let text = other.to_string();
            if !text.is_empty() {
                builder.add_text(&text);
            }
        }
    }
    Ok(())
}

fn copy_node<'s, 'a, N: DataSourceNode<'a> + 'a>(
    executor: &TransformContext<'s, 'a, N>,
    node: N,
    builder: &mut dyn OutputBuilder,
) {
    match node.node_type() {
        NodeType::Element => {
            builder.start_element(&result_name(node));
            copy_namespaces(node, builder);
            for attribute in node.attributes() {
                copy_attribute(executor, attribute, builder);
            }
            for child in node.children() {
                copy_node(executor, child, builder);
            }
            builder.end_element();
        }
        NodeType::Root => {
            for child in node.children() {
                copy_node(executor, child, builder);
            }
        }
        NodeType::Text => builder.add_text(&node.string_value()),
        NodeType::Attribute => copy_attribute(executor, node, builder),
        NodeType::Comment => builder.add_comment(&node.string_value()),
        NodeType::ProcessingInstruction => {
            let target = node.name().map_or("", |q| q.local_part);
            builder.add_processing_instruction(target, &node.string_value());
        }
    }
}

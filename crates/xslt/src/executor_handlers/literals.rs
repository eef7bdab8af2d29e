//! Instructions that write result nodes: literal result elements, `xsl:element`,
//! `xsl:attribute`, `xsl:value-of`, `xsl:comment` and `xsl:processing-instruction`.

use super::attribute_sets::apply_attribute_sets;
use super::{is_ncname, is_qname};
use crate::ast::{
    AttributeValueTemplate, CompiledExpr, ExpandedName, LiteralAttribute, PreparsedTemplate,
};
use crate::error::ExecutionError;
use crate::executor::{Focus, TransformContext};
use crate::output::OutputBuilder;
use crate::result_tree::ResultName;
use quill_xpath1::{DataSourceNode, NamespaceMap, XML_NAMESPACE, split_qname};

/// The operands of an `xsl:element` instruction.
pub(crate) struct ElementInstruction<'i> {
    pub name: &'i AttributeValueTemplate,
    pub namespace: Option<&'i AttributeValueTemplate>,
    pub namespaces: &'i NamespaceMap,
    pub default_namespace: Option<&'i str>,
    pub use_attribute_sets: &'i [ExpandedName],
    pub body: &'i PreparsedTemplate,
}

impl<'s, 'a, N: DataSourceNode<'a> + 'a> TransformContext<'s, 'a, N> {
    /// Substitutes the result namespace of an `xsl:namespace-alias` for `uri`.
    fn alias_for(&self, uri: Option<&str>) -> Option<(Option<&'s str>, Option<&'s str>)> {
        let stylesheet = self.stylesheet;
        stylesheet
            .namespace_aliases
            .get(uri.unwrap_or_default())
            .map(|alias| (alias.result_prefix.as_deref(), alias.result_uri.as_deref()))
    }

    fn aliased_name(&self, name: &ResultName) -> ResultName {
        match self.alias_for(name.namespace.as_deref()) {
            Some((prefix, uri)) => ResultName::new(prefix, &name.local, uri),
            None => name.clone(),
        }
    }
}

#[allow(clippy::too_many_arguments)]
pub(crate) fn handle_literal_element<'s, 'a, N: DataSourceNode<'a> + 'a>(
    executor: &mut TransformContext<'s, 'a, N>,
    name: &ResultName,
    namespaces: &[(Option<String>, String)],
    attributes: &[LiteralAttribute],
    use_attribute_sets: &[ExpandedName],
    body: &PreparsedTemplate,
    focus: Focus<N>,
    builder: &mut dyn OutputBuilder,
) -> Result<(), ExecutionError> {
    builder.start_element(&executor.aliased_name(name));
    for (prefix, uri) in namespaces {
        match executor.alias_for(Some(uri)) {
            Some((alias_prefix, Some(alias_uri))) => {
                builder.declare_namespace(alias_prefix, alias_uri)
            }
            Some((_, None)) => {}
            None => builder.declare_namespace(prefix.as_deref(), uri),
        }
    }
    apply_attribute_sets(executor, use_attribute_sets, focus, builder)?;
    for attribute in attributes {
        let value = executor.eval_avt(&attribute.value, focus)?;
        let name = match attribute.name.namespace {
            Some(_) => executor.aliased_name(&attribute.name),
            None => attribute.name.clone(),
        };
        builder.set_attribute(&name, &value);
    }
    executor.execute_body(body, focus, builder)?;
    builder.end_element();
    Ok(())
}

pub(crate) fn handle_value_of<'s, 'a, N: DataSourceNode<'a> + 'a>(
    executor: &mut TransformContext<'s, 'a, N>,
    select: &CompiledExpr,
    disable_output_escaping: bool,
    focus: Focus<N>,
    builder: &mut dyn OutputBuilder,
) -> Result<(), ExecutionError> {
    let text = executor.eval_string(select, focus)?;
    if text.is_empty() {
        return Ok(());
    }
    if disable_output_escaping {
        builder.add_raw_text(&text);
    } else {
        builder.add_text(&text);
    }
    Ok(())
}

/// Works out the expanded name of a computed element or attribute. `None` means the
/// name cannot be used; a warning has been reported.
fn computed_name<'s, 'a, N: DataSourceNode<'a> + 'a>(
    executor: &TransformContext<'s, 'a, N>,
    qname: &str,
    namespace: Option<String>,
    namespaces: &NamespaceMap,
    default_namespace: Option<&str>,
    instruction: &str,
) -> Option<ResultName> {
    if !is_qname(qname) {
        executor.warn(format!("'{}' is not a valid name for {}", qname, instruction));
        return None;
    }
    let (prefix, local) = split_qname(qname);
    let uri = match (namespace, prefix) {
        (Some(uri), _) => Some(uri),
        (None, Some("xml")) => Some(XML_NAMESPACE.to_string()),
        (None, Some(prefix)) => match namespaces.get(prefix) {
            Some(uri) => Some(uri.clone()),
            None => {
                executor.warn(format!(
                    "undeclared prefix '{}' in {} name '{}'",
                    prefix, instruction, qname
                ));
                return None;
            }
        },
        (None, None) => default_namespace.map(str::to_string),
    };
    // A prefix without a namespace would be meaningless.
    let prefix = prefix.filter(|_| uri.as_deref().is_some_and(|u| !u.is_empty()));
    Some(ResultName::new(prefix, local, uri.as_deref()))
}

pub(crate) fn handle_element<'s, 'a, N: DataSourceNode<'a> + 'a>(
    executor: &mut TransformContext<'s, 'a, N>,
    element: ElementInstruction<'_>,
    focus: Focus<N>,
    builder: &mut dyn OutputBuilder,
) -> Result<(), ExecutionError> {
    let qname = executor.eval_avt(element.name, focus)?;
    let namespace = element
        .namespace
        .map(|avt| executor.eval_avt(avt, focus))
        .transpose()?;
    let name = computed_name(
        executor,
        qname.trim(),
        namespace,
        element.namespaces,
        element.default_namespace,
        "xsl:element",
    );
    let Some(name) = name else {
        // The content still goes to the output, without the element around it.
        return executor.execute_body(element.body, focus, builder);
    };

    builder.start_element(&name);
    apply_attribute_sets(executor, element.use_attribute_sets, focus, builder)?;
    executor.execute_body(element.body, focus, builder)?;
    builder.end_element();
    Ok(())
}

#[allow(clippy::too_many_arguments)]
pub(crate) fn handle_attribute<'s, 'a, N: DataSourceNode<'a> + 'a>(
    executor: &mut TransformContext<'s, 'a, N>,
    name: &AttributeValueTemplate,
    namespace: Option<&AttributeValueTemplate>,
    namespaces: &NamespaceMap,
    body: &PreparsedTemplate,
    focus: Focus<N>,
    builder: &mut dyn OutputBuilder,
) -> Result<(), ExecutionError> {
    let qname = executor.eval_avt(name, focus)?;
    let qname = qname.trim();
    let namespace = namespace
        .map(|avt| executor.eval_avt(avt, focus))
        .transpose()?;
    if qname == "xmlns" || qname.starts_with("xmlns:") {
        executor.warn(format!("xsl:attribute cannot create namespace node '{}'", qname));
        return Ok(());
    }
    // Unprefixed attributes are never in the default namespace.
    let Some(name) = computed_name(executor, qname, namespace, namespaces, None, "xsl:attribute")
    else {
        return Ok(());
    };

    let value = executor.instantiate_to_string(body, focus, "xsl:attribute")?;
    if !builder.set_attribute(&name, &value) {
        executor.warn(format!(
            "attribute '{}' ignored: it must be added to an element before any children",
            name
        ));
    }
    Ok(())
}

/// Comment text may not contain `--` or end with `-`.
fn sanitize_comment(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if c == '-' && out.ends_with('-') {
            out.push(' ');
        }
        out.push(c);
    }
    if out.ends_with('-') {
        out.push(' ');
    }
    out
}

pub(crate) fn handle_comment<'s, 'a, N: DataSourceNode<'a> + 'a>(
    executor: &mut TransformContext<'s, 'a, N>,
    body: &PreparsedTemplate,
    focus: Focus<N>,
    builder: &mut dyn OutputBuilder,
) -> Result<(), ExecutionError> {
    let text = executor.instantiate_to_string(body, focus, "xsl:comment")?;
    builder.add_comment(&sanitize_comment(&text));
    Ok(())
}

pub(crate) fn handle_processing_instruction<'s, 'a, N: DataSourceNode<'a> + 'a>(
    executor: &mut TransformContext<'s, 'a, N>,
    name: &AttributeValueTemplate,
    body: &PreparsedTemplate,
    focus: Focus<N>,
    builder: &mut dyn OutputBuilder,
) -> Result<(), ExecutionError> {
    let target = executor.eval_avt(name, focus)?;
    let target = target.trim();
    if !is_ncname(target) || target.eq_ignore_ascii_case("xml") {
        executor.warn(format!(
            "'{}' is not a valid processing instruction target",
            target
        ));
        return Ok(());
    }
    let data = executor.instantiate_to_string(body, focus, "xsl:processing-instruction")?;
    let data = data.replace("?>", "? >");
    builder.add_processing_instruction(target, data.trim_start());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::sanitize_comment;

    #[test]
    fn test_comment_text_is_made_well_formed() {
        assert_eq!(sanitize_comment("a--b"), "a- -b");
        assert_eq!(sanitize_comment("---"), "- - - ");
        assert_eq!(sanitize_comment("end-"), "end- ");
        assert_eq!(sanitize_comment("plain"), "plain");
    }
}

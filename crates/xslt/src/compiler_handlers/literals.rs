//! Instructions that create result nodes.

use super::{
    compile_avt, compile_expr, expand_qnames, extension_namespaces, lookup_namespace,
    namespace_map, optional_avt, prefixed_namespaces, required_attr, structure_error, yes_no,
};
use crate::ast::{
    AttributeValueTemplate, ExpandedName, LiteralAttribute, NumberInstruction, NumberLevel,
    XSLT_NAMESPACE, XsltInstruction,
};
use crate::compiler::CompilerBuilder;
use crate::datasources::xml::prefix_for;
use crate::error::XsltError;
use crate::result_tree::ResultName;
use quill_xpath1::XML_NAMESPACE;
use roxmltree::Node;

fn use_attribute_sets(node: Node, value: Option<&str>) -> Result<Vec<ExpandedName>, XsltError> {
    match value {
        Some(list) => expand_qnames(node, list),
        None => Ok(Vec::new()),
    }
}

impl CompilerBuilder<'_> {
    pub(crate) fn handle_literal_result_element(
        &mut self,
        node: Node,
    ) -> Result<XsltInstruction, XsltError> {
        let namespace = node.tag_name().namespace();
        let name = ResultName::new(
            namespace.and_then(|uri| prefix_for(node, uri, false)),
            node.tag_name().name(),
            namespace,
        );

        let mut excluded = prefixed_namespaces(node, "exclude-result-prefixes");
        excluded.extend(extension_namespaces(node));
        excluded.push(XSLT_NAMESPACE.to_string());
        excluded.push(XML_NAMESPACE.to_string());
        let namespaces = node
            .namespaces()
            .filter(|ns| !ns.uri().is_empty() && !excluded.iter().any(|uri| uri == ns.uri()))
            .map(|ns| (ns.name().map(str::to_string), ns.uri().to_string()))
            .collect();

        let mut attributes = Vec::new();
        for attribute in node.attributes() {
            let namespace = attribute.namespace();
            if namespace == Some(XSLT_NAMESPACE) {
                continue;
            }
            attributes.push(LiteralAttribute {
                name: ResultName::new(
                    namespace.and_then(|uri| prefix_for(node, uri, true)),
                    attribute.name(),
                    namespace,
                ),
                value: compile_avt(node, attribute.value())?,
            });
        }

        Ok(XsltInstruction::LiteralElement {
            name,
            namespaces,
            attributes,
            use_attribute_sets: use_attribute_sets(
                node,
                node.attribute((XSLT_NAMESPACE, "use-attribute-sets")),
            )?,
            body: self.compile_body(node)?,
        })
    }

    pub(crate) fn handle_extension_element(
        &mut self,
        node: Node,
    ) -> Result<XsltInstruction, XsltError> {
        let attributes = node
            .attributes()
            .map(|attribute| {
                (
                    ExpandedName::new(attribute.namespace(), attribute.name()),
                    attribute.value().to_string(),
                )
            })
            .collect();
        Ok(XsltInstruction::Extension {
            name: ExpandedName::new(node.tag_name().namespace(), node.tag_name().name()),
            attributes,
            body: self.compile_body(node)?,
            fallbacks: self.compile_fallbacks(node)?,
        })
    }

    pub(crate) fn handle_text(&mut self, node: Node) -> Result<XsltInstruction, XsltError> {
        if let Some(child) = node.children().find(Node::is_element) {
            return Err(structure_error(
                child,
                "xsl:text may only contain character data",
            ));
        }
        let text: String = node.children().filter_map(|child| child.text()).collect();
        Ok(XsltInstruction::Text {
            text,
            disable_output_escaping: yes_no(node, "disable-output-escaping")?.unwrap_or(false),
        })
    }

    pub(crate) fn handle_value_of(&mut self, node: Node) -> Result<XsltInstruction, XsltError> {
        Ok(XsltInstruction::ValueOf {
            select: compile_expr(node, required_attr(node, "select")?)?,
            disable_output_escaping: yes_no(node, "disable-output-escaping")?.unwrap_or(false),
        })
    }

    pub(crate) fn handle_copy(&mut self, node: Node) -> Result<XsltInstruction, XsltError> {
        Ok(XsltInstruction::Copy {
            use_attribute_sets: use_attribute_sets(node, node.attribute("use-attribute-sets"))?,
            body: self.compile_body(node)?,
        })
    }

    pub(crate) fn handle_copy_of(&mut self, node: Node) -> Result<XsltInstruction, XsltError> {
        Ok(XsltInstruction::CopyOf {
            select: compile_expr(node, required_attr(node, "select")?)?,
        })
    }

    pub(crate) fn handle_element(&mut self, node: Node) -> Result<XsltInstruction, XsltError> {
        Ok(XsltInstruction::Element {
            name: compile_avt(node, required_attr(node, "name")?)?,
            namespace: optional_avt(node, "namespace")?,
            namespaces: namespace_map(node),
            default_namespace: lookup_namespace(node, None),
            use_attribute_sets: use_attribute_sets(node, node.attribute("use-attribute-sets"))?,
            body: self.compile_body(node)?,
        })
    }

    pub(crate) fn handle_attribute(&mut self, node: Node) -> Result<XsltInstruction, XsltError> {
        Ok(XsltInstruction::Attribute {
            name: compile_avt(node, required_attr(node, "name")?)?,
            namespace: optional_avt(node, "namespace")?,
            namespaces: namespace_map(node),
            body: self.compile_body(node)?,
        })
    }

    pub(crate) fn handle_number(&mut self, node: Node) -> Result<XsltInstruction, XsltError> {
        let level = match node.attribute("level").map(str::trim) {
            None | Some("single") => NumberLevel::Single,
            Some("multiple") => NumberLevel::Multiple,
            Some("any") => NumberLevel::Any,
            Some(other) => {
                return Err(structure_error(
                    node,
                    format!("level must be single, multiple or any, not '{}'", other),
                ));
            }
        };
        let count = match node.attribute("count") {
            Some(text) => Some(self.compile_pattern(node, text)?),
            None => None,
        };
        let from = match node.attribute("from") {
            Some(text) => Some(self.compile_pattern(node, text)?),
            None => None,
        };
        Ok(XsltInstruction::Number(Box::new(NumberInstruction {
            level,
            count,
            from,
            value: node
                .attribute("value")
                .map(|text| compile_expr(node, text))
                .transpose()?,
            format: match node.attribute("format") {
                Some(text) => compile_avt(node, text)?,
                None => AttributeValueTemplate::from_static("1"),
            },
            grouping_separator: optional_avt(node, "grouping-separator")?,
            grouping_size: optional_avt(node, "grouping-size")?,
        })))
    }
}

#[cfg(test)]
mod tests {
    use crate::ast::{CompiledStylesheet, NumberLevel, XsltInstruction};
    use crate::compiler::compile_stylesheet;
    use crate::config::TransformOptions;

    fn first_instruction(root_attrs: &str, body: &str) -> XsltInstruction {
        let source = format!(
            r#"<xsl:stylesheet version="1.0" xmlns:xsl="http://www.w3.org/1999/XSL/Transform" {}><xsl:template match="/">{}</xsl:template></xsl:stylesheet>"#,
            root_attrs, body
        );
        let stylesheet: CompiledStylesheet =
            compile_stylesheet(&source, &TransformOptions::default()).unwrap();
        stylesheet.templates[0].body.0[0].clone()
    }

    #[test]
    fn test_literal_element_namespaces_and_attributes() {
        let instruction = first_instruction(
            r#"xmlns:a="urn:a" xmlns:skip="urn:skip" exclude-result-prefixes="skip""#,
            r#"<a:item a:kind="x" plain="{1 + 1}" xsl:use-attribute-sets="common"/>"#,
        );
        let XsltInstruction::LiteralElement {
            name,
            namespaces,
            attributes,
            use_attribute_sets,
            ..
        } = instruction
        else {
            panic!("expected a literal element");
        };
        assert_eq!(name.qualified(), "a:item");
        assert_eq!(name.namespace.as_deref(), Some("urn:a"));
        assert_eq!(
            namespaces,
            vec![(Some("a".to_string()), "urn:a".to_string())]
        );
        assert_eq!(attributes.len(), 2);
        assert_eq!(attributes[0].name.qualified(), "a:kind");
        assert!(attributes[1].value.as_static().is_none());
        assert_eq!(use_attribute_sets.len(), 1);
    }

    #[test]
    fn test_text_keeps_whitespace() {
        let instruction = first_instruction(
            "",
            r#"<xsl:text disable-output-escaping="yes"> &lt; </xsl:text>"#,
        );
        assert!(matches!(
            instruction,
            XsltInstruction::Text { ref text, disable_output_escaping: true } if text == " < "
        ));
    }

    #[test]
    fn test_number_defaults() {
        let XsltInstruction::Number(number) = first_instruction("", r#"<xsl:number/>"#) else {
            panic!("expected xsl:number");
        };
        assert_eq!(number.level, NumberLevel::Single);
        assert!(number.count.is_none());
        assert_eq!(number.format.as_static().as_deref(), Some("1"));
    }
}

pub(super) mod control_flow;
pub(super) mod literals;
pub(super) mod stylesheet;
pub(super) mod templates;
pub(super) mod variables;

use crate::ast::{
    AttributeValueTemplate, CompiledExpr, ExpandedName, PreparsedTemplate, XSLT_NAMESPACE,
    XsltInstruction,
};
use crate::avt::parse_avt;
use crate::compiler::CompilerBuilder;
use crate::error::{Location, XsltError};
use crate::pattern::Pattern;
use quill_xpath1::{NamespaceMap, XML_NAMESPACE, parse_expression, split_qname};
use roxmltree::Node;
use std::sync::Arc;

// Shared helpers for the handlers. Expressions, AVTs and QNames are always resolved
// against the namespace declarations in scope on the element they appear on.

pub(crate) fn location(node: Node) -> Location {
    let pos = node.document().text_pos_at(node.range().start);
    Location {
        line: pos.row as usize,
        col: pos.col as usize,
    }
}

pub(crate) fn display_name(node: Node) -> String {
    if node.tag_name().namespace() == Some(XSLT_NAMESPACE) {
        format!("xsl:{}", node.tag_name().name())
    } else {
        node.tag_name().name().to_string()
    }
}

pub(crate) fn required_attr<'a>(node: Node<'a, '_>, name: &str) -> Result<&'a str, XsltError> {
    node.attribute(name)
        .ok_or_else(|| XsltError::MissingAttribute {
            element: display_name(node),
            attribute: name.to_string(),
            location: location(node),
        })
}

pub(crate) fn structure_error(node: Node, message: impl Into<String>) -> XsltError {
    XsltError::TemplateStructure {
        message: message.into(),
        location: location(node),
    }
}

/// Prefixed bindings in scope; unprefixed names in expressions have no namespace.
pub(crate) fn namespace_map(node: Node) -> Arc<NamespaceMap> {
    let mut map = NamespaceMap::new();
    for ns in node.namespaces() {
        if let Some(prefix) = ns.name() {
            map.insert(prefix.to_string(), ns.uri().to_string());
        }
    }
    Arc::new(map)
}

pub(crate) fn lookup_namespace(node: Node, prefix: Option<&str>) -> Option<String> {
    if prefix == Some("xml") {
        return Some(XML_NAMESPACE.to_string());
    }
    node.namespaces()
        .find(|ns| ns.name() == prefix)
        .map(|ns| ns.uri().to_string())
        .filter(|uri| !uri.is_empty())
}

/// Expands a QName-valued attribute. Unprefixed names have no namespace.
pub(crate) fn expand_qname(node: Node, qname: &str) -> Result<ExpandedName, XsltError> {
    let qname = qname.trim();
    match split_qname(qname) {
        (Some(prefix), local) => {
            let uri = lookup_namespace(node, Some(prefix)).ok_or_else(|| {
                structure_error(node, format!("namespace prefix '{}' is not declared", prefix))
            })?;
            Ok(ExpandedName::new(Some(&uri), local))
        }
        (None, local) if !local.is_empty() => Ok(ExpandedName::local(local)),
        (None, _) => Err(structure_error(node, "empty name")),
    }
}

pub(crate) fn expand_qnames(node: Node, list: &str) -> Result<Vec<ExpandedName>, XsltError> {
    list.split_whitespace()
        .map(|qname| expand_qname(node, qname))
        .collect()
}

pub(crate) fn compile_expr(node: Node, text: &str) -> Result<CompiledExpr, XsltError> {
    let expr = parse_expression(text).map_err(|e| {
        XsltError::XPathParse(text.to_string(), format!("{} (at {})", e, location(node)))
    })?;
    Ok(CompiledExpr {
        expr,
        source: text.to_string(),
        namespaces: namespace_map(node),
    })
}

pub(crate) fn compile_avt(node: Node, text: &str) -> Result<AttributeValueTemplate, XsltError> {
    parse_avt(text, &namespace_map(node))
}

pub(crate) fn optional_avt(
    node: Node,
    name: &str,
) -> Result<Option<AttributeValueTemplate>, XsltError> {
    node.attribute(name)
        .map(|text| compile_avt(node, text))
        .transpose()
}

/// A `yes`/`no` attribute; anything else is an error.
pub(crate) fn yes_no(node: Node, name: &str) -> Result<Option<bool>, XsltError> {
    match node.attribute(name).map(str::trim) {
        None => Ok(None),
        Some("yes") => Ok(Some(true)),
        Some("no") => Ok(Some(false)),
        Some(other) => Err(structure_error(
            node,
            format!("{} must be 'yes' or 'no', not '{}'", name, other),
        )),
    }
}

/// Whitespace-only text is dropped unless it sits in `xsl:text` or the nearest
/// `xml:space` says `preserve`.
fn is_ignorable_whitespace(node: Node) -> bool {
    let text = node.text().unwrap_or_default();
    if !text.chars().all(char::is_whitespace) {
        return false;
    }
    for ancestor in node.ancestors().filter(Node::is_element) {
        match ancestor.attribute((XML_NAMESPACE, "space")) {
            Some("preserve") => return false,
            Some("default") => return true,
            _ => {}
        }
    }
    true
}

/// Namespaces named by `extension-element-prefixes` on `node` or its ancestors
/// (`xsl:extension-element-prefixes` on literal result elements).
pub(crate) fn prefixed_namespaces(node: Node, local_attribute: &str) -> Vec<String> {
    let mut uris = Vec::new();
    for ancestor in node.ancestors().filter(Node::is_element) {
        let value = if CompilerBuilder::is_xslt(ancestor) {
            ancestor.attribute(local_attribute)
        } else {
            ancestor.attribute((XSLT_NAMESPACE, local_attribute))
        };
        for prefix in value.unwrap_or_default().split_whitespace() {
            let prefix = if prefix == "#default" { None } else { Some(prefix) };
            if let Some(uri) = lookup_namespace(ancestor, prefix) {
                uris.push(uri);
            }
        }
    }
    uris
}

pub(crate) fn extension_namespaces(node: Node) -> Vec<String> {
    prefixed_namespaces(node, "extension-element-prefixes")
}

/// Splits the children of `node` into the leading `xsl:<local>` elements and the rest.
/// Whitespace between the leading elements is skipped.
pub(crate) fn split_leading<'a, 'input>(
    node: Node<'a, 'input>,
    local: &str,
) -> (Vec<Node<'a, 'input>>, Vec<Node<'a, 'input>>) {
    let mut leading = Vec::new();
    let mut children = node.children().peekable();
    while let Some(child) = children.peek().copied() {
        if child.is_element() {
            if !(CompilerBuilder::is_xslt(child) && child.tag_name().name() == local) {
                break;
            }
            leading.push(child);
        } else if child.is_text() && !child.text().unwrap_or_default().trim().is_empty() {
            break;
        }
        children.next();
    }
    (leading, children.collect())
}

impl CompilerBuilder<'_> {
    /// Compiles a match pattern. Alternatives that fail are reported and left out.
    pub(crate) fn compile_pattern(&mut self, node: Node, text: &str) -> Result<Pattern, XsltError> {
        let (pattern, errors) = Pattern::compile_alternatives(text, &namespace_map(node));
        for error in errors {
            self.report(error, Some(location(node)))?;
        }
        Ok(pattern)
    }

    pub(crate) fn compile_body(&mut self, node: Node) -> Result<PreparsedTemplate, XsltError> {
        self.compile_nodes(node.children())
    }

    pub(crate) fn compile_nodes<'a, 'input: 'a>(
        &mut self,
        nodes: impl Iterator<Item = Node<'a, 'input>>,
    ) -> Result<PreparsedTemplate, XsltError> {
        let mut body = Vec::new();
        for child in nodes {
            if child.is_text() {
                if !is_ignorable_whitespace(child) {
                    body.push(XsltInstruction::Text {
                        text: child.text().unwrap_or_default().to_string(),
                        disable_output_escaping: false,
                    });
                }
            } else if child.is_element() {
                if let Some(instruction) = self.compile_instruction(child)? {
                    body.push(instruction);
                }
            }
        }
        Ok(PreparsedTemplate(body))
    }

    pub(crate) fn compile_instruction(
        &mut self,
        node: Node,
    ) -> Result<Option<XsltInstruction>, XsltError> {
        if !Self::is_xslt(node) {
            let namespace = node.tag_name().namespace().unwrap_or_default();
            if !namespace.is_empty() && extension_namespaces(node).iter().any(|u| u == namespace) {
                return self.handle_extension_element(node).map(Some);
            }
            return self.handle_literal_result_element(node).map(Some);
        }

        let instruction = match node.tag_name().name() {
            "apply-templates" => self.handle_apply_templates(node)?,
            "apply-imports" => XsltInstruction::ApplyImports,
            "call-template" => self.handle_call_template(node)?,
            "for-each" => self.handle_for_each(node)?,
            "if" => self.handle_if(node)?,
            "choose" => self.handle_choose(node)?,
            "value-of" => self.handle_value_of(node)?,
            "copy" => self.handle_copy(node)?,
            "copy-of" => self.handle_copy_of(node)?,
            "variable" => XsltInstruction::Variable(self.compile_binding(node)?),
            "param" => {
                self.report(
                    structure_error(node, "xsl:param must come first in a template"),
                    Some(location(node)),
                )?;
                XsltInstruction::Variable(self.compile_binding(node)?)
            }
            "text" => self.handle_text(node)?,
            "element" => self.handle_element(node)?,
            "attribute" => self.handle_attribute(node)?,
            "comment" => XsltInstruction::Comment {
                body: self.compile_body(node)?,
            },
            "processing-instruction" => XsltInstruction::ProcessingInstruction {
                name: compile_avt(node, required_attr(node, "name")?)?,
                body: self.compile_body(node)?,
            },
            "number" => self.handle_number(node)?,
            "message" => XsltInstruction::Message {
                body: self.compile_body(node)?,
                terminate: yes_no(node, "terminate")?.unwrap_or(false),
            },
            // Only meaningful inside an unsupported or extension instruction.
            "fallback" => return Ok(None),
            "sort" | "with-param" | "when" | "otherwise" => {
                return Err(structure_error(
                    node,
                    format!("{} is not allowed here", display_name(node)),
                ));
            }
            other if self.forwards_compatible => XsltInstruction::Unsupported {
                name: format!("xsl:{}", other),
                fallbacks: self.compile_fallbacks(node)?,
            },
            other => {
                return Err(structure_error(
                    node,
                    format!("unknown XSLT instruction xsl:{}", other),
                ));
            }
        };
        Ok(Some(instruction))
    }

    pub(crate) fn compile_fallbacks(
        &mut self,
        node: Node,
    ) -> Result<Vec<PreparsedTemplate>, XsltError> {
        let mut fallbacks = Vec::new();
        for child in node.children() {
            if Self::is_xslt(child) && child.tag_name().name() == "fallback" {
                fallbacks.push(self.compile_body(child)?);
            }
        }
        Ok(fallbacks)
    }
}

use super::templates::compile_sort_key;
use super::{compile_expr, display_name, required_attr, split_leading, structure_error};
use crate::ast::{When, XsltInstruction};
use crate::compiler::CompilerBuilder;
use crate::error::XsltError;
use roxmltree::Node;

impl CompilerBuilder<'_> {
    pub(crate) fn handle_for_each(&mut self, node: Node) -> Result<XsltInstruction, XsltError> {
        let select = compile_expr(node, required_attr(node, "select")?)?;
        let (sorts, rest) = split_leading(node, "sort");
        let sort_keys = sorts
            .into_iter()
            .map(compile_sort_key)
            .collect::<Result<Vec<_>, _>>()?;
        let body = self.compile_nodes(rest.into_iter())?;
        Ok(XsltInstruction::ForEach {
            select,
            sort_keys,
            body,
        })
    }

    pub(crate) fn handle_if(&mut self, node: Node) -> Result<XsltInstruction, XsltError> {
        Ok(XsltInstruction::If {
            test: compile_expr(node, required_attr(node, "test")?)?,
            body: self.compile_body(node)?,
        })
    }

    pub(crate) fn handle_choose(&mut self, node: Node) -> Result<XsltInstruction, XsltError> {
        let mut whens = Vec::new();
        let mut otherwise = None;
        for child in node.children() {
            if child.is_text() {
                if !child.text().unwrap_or_default().trim().is_empty() {
                    return Err(structure_error(node, "text is not allowed in xsl:choose"));
                }
                continue;
            }
            if !child.is_element() {
                continue;
            }
            match (Self::is_xslt(child), child.tag_name().name()) {
                (true, "when") if otherwise.is_none() => whens.push(When {
                    test: compile_expr(child, required_attr(child, "test")?)?,
                    body: self.compile_body(child)?,
                }),
                (true, "otherwise") if otherwise.is_none() => {
                    otherwise = Some(self.compile_body(child)?);
                }
                _ => {
                    return Err(structure_error(
                        child,
                        format!("{} is not allowed here in xsl:choose", display_name(child)),
                    ));
                }
            }
        }
        if whens.is_empty() {
            return Err(structure_error(
                node,
                "xsl:choose needs at least one xsl:when",
            ));
        }
        Ok(XsltInstruction::Choose { whens, otherwise })
    }
}

use super::{
    compile_expr, display_name, expand_qname, location, namespace_map, optional_avt,
    required_attr, split_leading, structure_error,
};
use crate::ast::{ExpandedName, PreparsedTemplate, SortKey, Template, TemplateId, XsltInstruction};
use crate::compiler::{CompilerBuilder, Ranked};
use crate::error::XsltError;
use crate::pattern::Pattern;
use crate::registry::CompiledPattern;
use roxmltree::Node;
use std::sync::OnceLock;

pub(crate) fn compile_sort_key(node: Node) -> Result<SortKey, XsltError> {
    Ok(SortKey {
        select: compile_expr(node, node.attribute("select").unwrap_or("."))?,
        order: optional_avt(node, "order")?,
        data_type: optional_avt(node, "data-type")?,
        case_order: optional_avt(node, "case-order")?,
    })
}

fn optional_qname(node: Node, attribute: &str) -> Result<Option<ExpandedName>, XsltError> {
    node.attribute(attribute)
        .map(|qname| expand_qname(node, qname))
        .transpose()
}

impl CompilerBuilder<'_> {
    pub(crate) fn handle_template(&mut self, node: Node, level: usize) -> Result<(), XsltError> {
        let name = optional_qname(node, "name")?;
        let mode = optional_qname(node, "mode")?;
        let match_text = node.attribute("match");
        if name.is_none() && match_text.is_none() {
            return Err(structure_error(
                node,
                "xsl:template needs a match or a name attribute",
            ));
        }
        if match_text.is_none() && mode.is_some() {
            self.warn("mode on a template without match is ignored".to_string(), location(node));
        }

        let priority = match node.attribute("priority") {
            None => None,
            Some(text) => match text.trim().parse::<f64>() {
                Ok(value) if value.is_finite() => Some(value),
                _ => {
                    self.report(
                        structure_error(node, format!("invalid priority '{}'", text)),
                        Some(location(node)),
                    )?;
                    None
                }
            },
        };

        let (param_nodes, rest) = split_leading(node, "param");
        let mut params = Vec::with_capacity(param_nodes.len());
        for param in param_nodes {
            params.push(self.compile_binding(param)?);
        }
        let body = self.compile_nodes(rest.into_iter())?;
        let pattern = match match_text {
            Some(text) => Some(self.compile_pattern(node, text)?),
            None => None,
        };

        let position = self.next_position();
        let id = TemplateId(self.stylesheet.templates.len());
        self.stylesheet.templates.push(Template {
            match_pattern: match_text.map(str::to_string),
            name: name.clone(),
            mode: mode.clone(),
            priority,
            params,
            body,
            level,
            position,
            location: Some(location(node)),
        });
        if let Some(pattern) = pattern {
            self.register_rule(level, pattern, priority, mode, id, position);
        }
        if let Some(name) = name {
            self.register_named(node, name, level, position, id)?;
        }
        Ok(())
    }

    fn register_named(
        &mut self,
        node: Node,
        name: ExpandedName,
        level: usize,
        position: usize,
        id: TemplateId,
    ) -> Result<(), XsltError> {
        let ranked = Ranked {
            level,
            position,
            value: id,
        };
        let (duplicate, wins) = match self.named_templates.get(&name) {
            Some(existing) => (existing.level == level, ranked.outranks(existing)),
            None => (false, true),
        };
        if duplicate {
            self.report(
                structure_error(node, format!("duplicate template named '{}'", name)),
                Some(location(node)),
            )?;
        }
        if wins {
            self.named_templates.insert(name, ranked);
        }
        Ok(())
    }

    fn register_rule(
        &mut self,
        level: usize,
        pattern: Pattern,
        priority: Option<f64>,
        mode: Option<ExpandedName>,
        template: TemplateId,
        position: usize,
    ) {
        let registry = &mut self.stylesheet.levels[level].registry;
        for path in pattern.paths {
            registry.insert(CompiledPattern {
                priority: priority.unwrap_or(path.default_priority),
                path,
                mode: mode.clone(),
                template,
                position,
            });
        }
    }

    /// Registers the body of a simplified stylesheet as the template for `/`.
    pub(crate) fn add_simplified_template(
        &mut self,
        root: Node,
        level: usize,
        body: PreparsedTemplate,
    ) -> Result<(), XsltError> {
        let pattern = Pattern::compile("/", &namespace_map(root))?;
        let position = self.next_position();
        let id = TemplateId(self.stylesheet.templates.len());
        self.stylesheet.templates.push(Template {
            match_pattern: Some("/".to_string()),
            name: None,
            mode: None,
            priority: None,
            params: Vec::new(),
            body,
            level,
            position,
            location: Some(location(root)),
        });
        self.register_rule(level, pattern, None, None, id, position);
        Ok(())
    }

    pub(crate) fn handle_apply_templates(
        &mut self,
        node: Node,
    ) -> Result<XsltInstruction, XsltError> {
        let select = node
            .attribute("select")
            .map(|text| compile_expr(node, text))
            .transpose()?;
        let mode = optional_qname(node, "mode")?;
        let mut sort_keys = Vec::new();
        let mut params = Vec::new();
        for child in node.children().filter(Node::is_element) {
            match (Self::is_xslt(child), child.tag_name().name()) {
                (true, "sort") => sort_keys.push(compile_sort_key(child)?),
                (true, "with-param") => params.push(self.compile_binding(child)?),
                _ => {
                    return Err(structure_error(
                        child,
                        format!("{} is not allowed in xsl:apply-templates", display_name(child)),
                    ));
                }
            }
        }
        Ok(XsltInstruction::ApplyTemplates {
            select,
            mode,
            sort_keys,
            params,
        })
    }

    pub(crate) fn handle_call_template(
        &mut self,
        node: Node,
    ) -> Result<XsltInstruction, XsltError> {
        let name = expand_qname(node, required_attr(node, "name")?)?;
        let mut params = Vec::new();
        for child in node.children().filter(Node::is_element) {
            if !(Self::is_xslt(child) && child.tag_name().name() == "with-param") {
                return Err(structure_error(
                    child,
                    format!("{} is not allowed in xsl:call-template", display_name(child)),
                ));
            }
            params.push(self.compile_binding(child)?);
        }
        Ok(XsltInstruction::CallTemplate {
            name,
            params,
            target: OnceLock::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::ast::{CompiledStylesheet, ExpandedName, XsltInstruction};
    use crate::compiler::compile_stylesheet;
    use crate::config::TransformOptions;

    fn compile(body: &str) -> CompiledStylesheet {
        let source = format!(
            r#"<xsl:stylesheet version="1.0" xmlns:xsl="http://www.w3.org/1999/XSL/Transform">{}</xsl:stylesheet>"#,
            body
        );
        compile_stylesheet(&source, &TransformOptions::default()).unwrap()
    }

    #[test]
    fn test_leading_params_are_split_from_the_body() {
        let stylesheet = compile(
            r#"<xsl:template name="t">
                 <xsl:param name="a" select="1"/>
                 <xsl:param name="b"/>
                 <out/>
               </xsl:template>"#,
        );
        let template = &stylesheet.templates[0];
        assert_eq!(template.params.len(), 2);
        assert_eq!(template.params[1].name, ExpandedName::local("b"));
        assert_eq!(template.body.0.len(), 1);
    }

    #[test]
    fn test_apply_templates_children() {
        let stylesheet = compile(
            r#"<xsl:template match="/">
                 <xsl:apply-templates select="item" mode="m">
                   <xsl:sort select="@n" data-type="number"/>
                   <xsl:with-param name="p" select="2"/>
                 </xsl:apply-templates>
               </xsl:template>"#,
        );
        let XsltInstruction::ApplyTemplates {
            mode,
            sort_keys,
            params,
            ..
        } = &stylesheet.templates[0].body.0[0]
        else {
            panic!("expected apply-templates");
        };
        assert_eq!(mode.as_ref(), Some(&ExpandedName::local("m")));
        assert_eq!(sort_keys.len(), 1);
        assert_eq!(sort_keys[0].select.source, "@n");
        assert_eq!(params.len(), 1);
    }

    #[test]
    fn test_explicit_priority_overrides_default() {
        let stylesheet = compile(r#"<xsl:template match="a" priority="3"/>"#);
        assert_eq!(stylesheet.templates[0].priority, Some(3.0));

        let reported = compile(r#"<xsl:template match="a" priority="high"/>"#);
        assert_eq!(reported.error_count(), 1);
        assert_eq!(reported.templates[0].priority, None);
    }

    #[test]
    fn test_template_without_match_or_name_fails() {
        let source = r#"<xsl:stylesheet version="1.0" xmlns:xsl="http://www.w3.org/1999/XSL/Transform"><xsl:template/></xsl:stylesheet>"#;
        assert!(compile_stylesheet(source, &TransformOptions::default()).is_err());
    }
}

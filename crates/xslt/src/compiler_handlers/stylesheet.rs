//! Top-level declarations: the stylesheet root, imports and includes, keys, attribute sets,
//! namespace aliases, output and decimal formats.

use super::{
    compile_expr, expand_qname, expand_qnames, location, lookup_namespace, required_attr,
    structure_error, yes_no,
};
use crate::ast::{AttributeSet, KeyDeclaration, NamespaceAlias, OutputMethod, XSLT_NAMESPACE};
use crate::compiler::{CompilerBuilder, OutputDeclaration, Ranked};
use crate::error::XsltError;
use crate::format_number::DecimalFormat;
use crate::loader::resolve_uri;
use crate::whitespace::{SpaceRule, SpaceTest};
use roxmltree::Node;

fn is_forwards_compatible(version: &str) -> bool {
    version.trim().parse::<f64>().map_or(true, |v| v > 1.0)
}

impl CompilerBuilder<'_> {
    pub(crate) fn compile_root(
        &mut self,
        root: Node,
        level: usize,
        base: Option<&str>,
        imports: &mut Vec<String>,
    ) -> Result<(), XsltError> {
        if Self::is_xslt(root) && matches!(root.tag_name().name(), "stylesheet" | "transform") {
            let version = required_attr(root, "version")?;
            self.forwards_compatible = is_forwards_compatible(version);
            return self.compile_declarations(root, level, base, imports);
        }

        if let Some(version) = root.attribute((XSLT_NAMESPACE, "version")) {
            // A literal result element as the whole stylesheet: one template for "/".
            self.forwards_compatible = is_forwards_compatible(version);
            let body = crate::ast::PreparsedTemplate(vec![
                self.handle_literal_result_element(root)?,
            ]);
            return self.add_simplified_template(root, level, body);
        }

        Err(structure_error(
            root,
            "the document element must be xsl:stylesheet, xsl:transform or a literal result element with xsl:version",
        ))
    }

    fn compile_declarations(
        &mut self,
        root: Node,
        level: usize,
        base: Option<&str>,
        imports: &mut Vec<String>,
    ) -> Result<(), XsltError> {
        let mut seen_declaration = false;
        for child in root.children().filter(Node::is_element) {
            if !Self::is_xslt(child) {
                if child.tag_name().namespace().is_none() {
                    self.report(
                        structure_error(
                            child,
                            format!("top-level element '{}' has no namespace", child.tag_name().name()),
                        ),
                        Some(location(child)),
                    )?;
                }
                continue;
            }
            let name = child.tag_name().name();
            if name == "import" {
                if seen_declaration {
                    return Err(structure_error(
                        child,
                        "xsl:import must come before every other declaration",
                    ));
                }
                imports.push(resolve_uri(required_attr(child, "href")?, base));
                continue;
            }
            seen_declaration = true;
            match name {
                "include" => {
                    let href = required_attr(child, "href")?;
                    self.compile_include(href, base, level, imports)?;
                }
                "template" => self.handle_template(child, level)?,
                "variable" => self.handle_global_variable(child, level, false)?,
                "param" => self.handle_global_variable(child, level, true)?,
                "key" => self.handle_key(child)?,
                "attribute-set" => self.handle_attribute_set(child, level)?,
                "namespace-alias" => self.handle_namespace_alias(child, level)?,
                "output" => self.handle_output(child, level)?,
                "decimal-format" => self.handle_decimal_format(child, level)?,
                "strip-space" => self.handle_space(child, level, true)?,
                "preserve-space" => self.handle_space(child, level, false)?,
                other if self.forwards_compatible => {
                    self.warn(format!("ignoring unknown declaration xsl:{}", other), location(child));
                }
                other => {
                    return Err(structure_error(
                        child,
                        format!("unknown top-level element xsl:{}", other),
                    ));
                }
            }
        }
        Ok(())
    }

    fn handle_key(&mut self, node: Node) -> Result<(), XsltError> {
        let name = expand_qname(node, required_attr(node, "name")?)?;
        let match_pattern = self.compile_pattern(node, required_attr(node, "match")?)?;
        let use_expr = compile_expr(node, required_attr(node, "use")?)?;
        self.stylesheet.keys.push(KeyDeclaration {
            name,
            match_pattern,
            use_expr,
        });
        Ok(())
    }

    /// Records each name test of `elements`, ranked like any other declaration.
    fn handle_space(&mut self, node: Node, level: usize, strip: bool) -> Result<(), XsltError> {
        for token in required_attr(node, "elements")?.split_whitespace() {
            let test = match token.strip_suffix(":*") {
                _ if token == "*" => SpaceTest::Any,
                Some(prefix) => {
                    let uri = lookup_namespace(node, Some(prefix)).ok_or_else(|| {
                        structure_error(node, format!("namespace prefix '{}' is not declared", prefix))
                    })?;
                    SpaceTest::Namespace(uri)
                }
                None => SpaceTest::Name(expand_qname(node, token)?),
            };
            let position = self.next_position();
            self.space_rules.push(SpaceRule {
                test,
                strip,
                level,
                position,
            });
        }
        Ok(())
    }

    fn handle_attribute_set(&mut self, node: Node, level: usize) -> Result<(), XsltError> {
        let name = expand_qname(node, required_attr(node, "name")?)?;
        let use_attribute_sets = match node.attribute("use-attribute-sets") {
            Some(list) => expand_qnames(node, list)?,
            None => Vec::new(),
        };
        let mut attributes = Vec::new();
        for child in node.children().filter(Node::is_element) {
            if !(Self::is_xslt(child) && child.tag_name().name() == "attribute") {
                return Err(structure_error(
                    child,
                    "xsl:attribute-set may only contain xsl:attribute",
                ));
            }
            attributes.push(self.handle_attribute(child)?);
        }
        let position = self.next_position();
        self.attribute_sets.push(Ranked {
            level,
            position,
            value: AttributeSet {
                name,
                use_attribute_sets,
                attributes: crate::ast::PreparsedTemplate(attributes),
            },
        });
        Ok(())
    }

    fn handle_namespace_alias(&mut self, node: Node, level: usize) -> Result<(), XsltError> {
        let resolve = |attribute: &str| -> Result<(Option<String>, Option<String>), XsltError> {
            let prefix = required_attr(node, attribute)?.trim();
            if prefix == "#default" {
                return Ok((None, lookup_namespace(node, None)));
            }
            let uri = lookup_namespace(node, Some(prefix)).ok_or_else(|| {
                structure_error(node, format!("namespace prefix '{}' is not declared", prefix))
            })?;
            Ok((Some(prefix.to_string()), Some(uri)))
        };
        let (_, stylesheet_uri) = resolve("stylesheet-prefix")?;
        let (result_prefix, result_uri) = resolve("result-prefix")?;

        let ranked = Ranked {
            level,
            position: self.next_position(),
            value: NamespaceAlias {
                result_prefix,
                result_uri,
            },
        };
        let key = stylesheet_uri.unwrap_or_default();
        let replace = self
            .aliases
            .get(&key)
            .is_none_or(|existing| ranked.outranks(existing));
        if replace {
            self.aliases.insert(key, ranked);
        }
        Ok(())
    }

    fn handle_output(&mut self, node: Node, level: usize) -> Result<(), XsltError> {
        let method = match node.attribute("method").map(str::trim) {
            None => None,
            Some("xml") => Some(OutputMethod::Xml),
            Some("html") => Some(OutputMethod::Html),
            Some("text") => Some(OutputMethod::Text),
            Some(other) => {
                self.warn(
                    format!("unsupported output method '{}', using the default", other),
                    location(node),
                );
                None
            }
        };
        let declaration = OutputDeclaration {
            method,
            indent: yes_no(node, "indent")?,
            omit_xml_declaration: yes_no(node, "omit-xml-declaration")?,
            encoding: node.attribute("encoding").map(str::to_string),
            standalone: yes_no(node, "standalone")?,
            doctype_public: node.attribute("doctype-public").map(str::to_string),
            doctype_system: node.attribute("doctype-system").map(str::to_string),
            media_type: node.attribute("media-type").map(str::to_string),
        };
        let position = self.next_position();
        self.outputs.push(Ranked {
            level,
            position,
            value: declaration,
        });
        Ok(())
    }

    fn handle_decimal_format(&mut self, node: Node, level: usize) -> Result<(), XsltError> {
        let name = match node.attribute("name") {
            Some(qname) => expand_qname(node, qname)?.clark(),
            None => String::new(),
        };
        let symbol = |attribute: &str, default: char| -> Result<char, XsltError> {
            match node.attribute(attribute) {
                None => Ok(default),
                Some(value) => {
                    let mut chars = value.chars();
                    match (chars.next(), chars.next()) {
                        (Some(c), None) => Ok(c),
                        _ => Err(structure_error(
                            node,
                            format!("{} must be a single character", attribute),
                        )),
                    }
                }
            }
        };
        let defaults = DecimalFormat::default();
        let format = DecimalFormat {
            decimal_separator: symbol("decimal-separator", defaults.decimal_separator)?,
            grouping_separator: symbol("grouping-separator", defaults.grouping_separator)?,
            infinity: node
                .attribute("infinity")
                .map_or(defaults.infinity.clone(), str::to_string),
            minus_sign: symbol("minus-sign", defaults.minus_sign)?,
            nan: node.attribute("NaN").map_or(defaults.nan.clone(), str::to_string),
            percent: symbol("percent", defaults.percent)?,
            per_mille: symbol("per-mille", defaults.per_mille)?,
            zero_digit: symbol("zero-digit", defaults.zero_digit)?,
            digit: symbol("digit", defaults.digit)?,
            pattern_separator: symbol("pattern-separator", defaults.pattern_separator)?,
        };
        let ranked = Ranked {
            level,
            position: self.next_position(),
            value: format,
        };
        let replace = self
            .decimal_formats
            .get(&name)
            .is_none_or(|existing| ranked.outranks(existing));
        if replace {
            self.decimal_formats.insert(name, ranked);
        }
        Ok(())
    }
}

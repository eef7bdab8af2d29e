//! Compiles stylesheet text into a [`CompiledStylesheet`].
//!
//! Modules are parsed with roxmltree and walked recursively. Each module gets its own
//! precedence level, placed before the levels of its imports; included modules add
//! their declarations to the including level. The instruction handlers live in
//! `compiler_handlers`.

use crate::ast::{
    AttributeSet, CompiledStylesheet, ExpandedName, GlobalVariable, NamespaceAlias,
    OutputSettings, StylesheetLevel, TemplateId, XSLT_NAMESPACE,
};
use crate::config::TransformOptions;
use crate::diagnostics::Diagnostic;
use crate::error::XsltError;
use crate::format_number::DecimalFormat;
use crate::loader::{FileSystemLoader, MAX_IMPORT_DEPTH, StylesheetLoader, resolve_uri};
use crate::whitespace::{SpaceRule, WhitespaceRules};
use std::collections::HashMap;
use std::sync::Arc;

/// Values of one `xsl:output` element; unset attributes stay `None`.
#[derive(Debug, Clone, Default)]
pub(crate) struct OutputDeclaration {
    pub method: Option<crate::ast::OutputMethod>,
    pub indent: Option<bool>,
    pub omit_xml_declaration: Option<bool>,
    pub encoding: Option<String>,
    pub standalone: Option<bool>,
    pub doctype_public: Option<String>,
    pub doctype_system: Option<String>,
    pub media_type: Option<String>,
}

/// A top-level declaration tagged with where it came from, for precedence decisions.
#[derive(Debug, Clone)]
pub(crate) struct Ranked<T> {
    pub level: usize,
    pub position: usize,
    pub value: T,
}

impl<T> Ranked<T> {
    /// True when `self` takes precedence over `other`: a lower level index, or the same
    /// level and a later declaration.
    pub fn outranks<U>(&self, other: &Ranked<U>) -> bool {
        self.level < other.level || (self.level == other.level && self.position > other.position)
    }
}

pub struct CompilerBuilder<'l> {
    pub(crate) options: TransformOptions,
    loader: &'l dyn StylesheetLoader,
    pub(crate) stylesheet: CompiledStylesheet,
    pub(crate) globals: Vec<Ranked<GlobalVariable>>,
    pub(crate) attribute_sets: Vec<Ranked<AttributeSet>>,
    pub(crate) outputs: Vec<Ranked<OutputDeclaration>>,
    pub(crate) aliases: HashMap<String, Ranked<NamespaceAlias>>,
    pub(crate) decimal_formats: HashMap<String, Ranked<DecimalFormat>>,
    pub(crate) named_templates: HashMap<ExpandedName, Ranked<TemplateId>>,
    pub(crate) space_rules: Vec<SpaceRule>,
    /// Declaration counter shared by every module.
    pub(crate) position: usize,
    /// Whether the module being compiled asked for a version above 1.0.
    pub(crate) forwards_compatible: bool,
    /// URIs of the modules currently being compiled, outermost first.
    module_stack: Vec<String>,
}

/// Compiles a stylesheet whose imports and includes are read from the file system,
/// relative to the working directory.
pub fn compile_stylesheet(
    source: &str,
    options: &TransformOptions,
) -> Result<CompiledStylesheet, XsltError> {
    let loader = FileSystemLoader::new();
    compile_stylesheet_with_loader(source, None, &loader, options)
}

/// Compiles a stylesheet; `base_uri` is the URI relative hrefs resolve against.
pub fn compile_stylesheet_with_loader(
    source: &str,
    base_uri: Option<&str>,
    loader: &dyn StylesheetLoader,
    options: &TransformOptions,
) -> Result<CompiledStylesheet, XsltError> {
    let mut builder = CompilerBuilder::new(loader, options.clone());
    builder.compile_module(source, base_uri.map(str::to_string), 0)?;
    builder.finish()
}

pub(crate) fn parse_stylesheet_document(source: &str) -> Result<roxmltree::Document<'_>, XsltError> {
    let options = roxmltree::ParsingOptions {
        allow_dtd: true,
        ..roxmltree::ParsingOptions::default()
    };
    Ok(roxmltree::Document::parse_with_options(source, options)?)
}

impl<'l> CompilerBuilder<'l> {
    pub fn new(loader: &'l dyn StylesheetLoader, options: TransformOptions) -> Self {
        Self {
            options,
            loader,
            stylesheet: CompiledStylesheet::default(),
            globals: Vec::new(),
            attribute_sets: Vec::new(),
            outputs: Vec::new(),
            aliases: HashMap::new(),
            decimal_formats: HashMap::new(),
            named_templates: HashMap::new(),
            space_rules: Vec::new(),
            position: 0,
            forwards_compatible: false,
            module_stack: Vec::new(),
        }
    }

    pub(crate) fn next_position(&mut self) -> usize {
        self.position += 1;
        self.position
    }

    /// Records a non-fatal problem. In strict mode it becomes fatal.
    pub(crate) fn report(&mut self, error: XsltError, location: Option<crate::error::Location>) -> Result<(), XsltError> {
        if self.options.strict {
            return Err(error);
        }
        log::warn!("{}", error);
        let mut diagnostic = Diagnostic::error(error.to_string());
        if let Some(location) = location {
            diagnostic = diagnostic.at(location);
        }
        self.stylesheet.diagnostics.push(diagnostic);
        Ok(())
    }

    pub(crate) fn warn(&mut self, message: String, location: crate::error::Location) {
        log::warn!("{} (at {})", message, location);
        self.stylesheet
            .diagnostics
            .push(Diagnostic::warning(message).at(location));
    }

    fn enter_module(&mut self, uri: Option<&str>, depth: usize) -> Result<(), XsltError> {
        if depth > MAX_IMPORT_DEPTH {
            return Err(XsltError::import(
                uri.unwrap_or_default(),
                format!("Maximum import depth ({}) exceeded", MAX_IMPORT_DEPTH),
            ));
        }
        if let Some(uri) = uri {
            if self.module_stack.iter().any(|open| open == uri) {
                return Err(XsltError::CircularImport(uri.to_string()));
            }
            self.module_stack.push(uri.to_string());
        }
        Ok(())
    }

    fn leave_module(&mut self, uri: Option<&str>) {
        if uri.is_some() {
            self.module_stack.pop();
        }
    }

    /// Compiles one module into a new precedence level, then its imports.
    pub(crate) fn compile_module(
        &mut self,
        source: &str,
        uri: Option<String>,
        depth: usize,
    ) -> Result<(), XsltError> {
        self.enter_module(uri.as_deref(), depth)?;
        let level = self.stylesheet.levels.len();
        log::debug!(
            "Compiling stylesheet module {} as precedence level {}",
            uri.as_deref().unwrap_or("<main>"),
            level
        );
        self.stylesheet.levels.push(StylesheetLevel {
            href: uri.clone(),
            ..StylesheetLevel::default()
        });

        let mut imports = Vec::new();
        {
            let doc = parse_stylesheet_document(source)?;
            self.compile_root(doc.root_element(), level, uri.as_deref(), &mut imports)?;
        }
        // The last import has the highest precedence among them.
        for href in imports.into_iter().rev() {
            let text = self.loader.load(&href)?;
            self.compile_module(&text, Some(href), depth + 1)?;
        }
        self.stylesheet.levels[level].import_end = self.stylesheet.levels.len();
        self.leave_module(uri.as_deref());
        Ok(())
    }

    /// Adds the declarations of an included module to `level`.
    pub(crate) fn compile_include(
        &mut self,
        href: &str,
        base: Option<&str>,
        level: usize,
        imports: &mut Vec<String>,
    ) -> Result<(), XsltError> {
        let uri = resolve_uri(href, base);
        self.enter_module(Some(&uri), self.module_stack.len())?;
        let text = self.loader.load(&uri)?;
        {
            let doc = parse_stylesheet_document(&text)?;
            let saved = self.forwards_compatible;
            self.compile_root(doc.root_element(), level, Some(&uri), imports)?;
            self.forwards_compatible = saved;
        }
        self.leave_module(Some(&uri));
        Ok(())
    }

    /// Resolves everything that depends on seeing all modules and hands back the result.
    pub fn finish(mut self) -> Result<CompiledStylesheet, XsltError> {
        self.stylesheet.named_templates = self
            .named_templates
            .drain()
            .map(|(name, ranked)| (name, ranked.value))
            .collect();

        self.stylesheet.globals = self.order_globals()?;
        self.stylesheet.attribute_sets = self.collect_attribute_sets()?;

        self.stylesheet.namespace_aliases = self
            .aliases
            .drain()
            .map(|(uri, ranked)| (uri, ranked.value))
            .collect();

        let mut formats: HashMap<String, DecimalFormat> = self
            .decimal_formats
            .drain()
            .map(|(name, ranked)| (name, ranked.value))
            .collect();
        formats.entry(String::new()).or_default();
        self.stylesheet.decimal_formats = Arc::new(formats);

        self.stylesheet.output = self.merge_outputs();
        self.stylesheet.whitespace = WhitespaceRules::new(std::mem::take(&mut self.space_rules));

        let errors = self.stylesheet.error_count();
        if errors > 0 && self.options.reject_invalid_stylesheet {
            return Err(XsltError::InvalidStylesheet(errors));
        }
        log::debug!(
            "Compiled stylesheet: {} templates, {} levels, {} globals, {} error(s)",
            self.stylesheet.templates.len(),
            self.stylesheet.levels.len(),
            self.stylesheet.globals.len(),
            errors
        );
        Ok(self.stylesheet)
    }

    /// Lowest precedence first, so applying them in order lets higher precedence win.
    fn merge_outputs(&mut self) -> OutputSettings {
        let mut outputs = std::mem::take(&mut self.outputs);
        outputs.sort_by(|a, b| b.level.cmp(&a.level).then(a.position.cmp(&b.position)));
        let mut merged = OutputSettings::default();
        for Ranked { value, .. } in outputs {
            merged.method = value.method.or(merged.method);
            merged.indent = value.indent.or(merged.indent);
            if let Some(omit) = value.omit_xml_declaration {
                merged.omit_xml_declaration = omit;
            }
            merged.encoding = value.encoding.or(merged.encoding);
            merged.standalone = value.standalone.or(merged.standalone);
            merged.doctype_public = value.doctype_public.or(merged.doctype_public);
            merged.doctype_system = value.doctype_system.or(merged.doctype_system);
            merged.media_type = value.media_type.or(merged.media_type);
        }
        merged
    }

    /// Every attribute set, lowest precedence first, after checking `use-attribute-sets`
    /// references for cycles.
    fn collect_attribute_sets(
        &mut self,
    ) -> Result<HashMap<ExpandedName, Vec<AttributeSet>>, XsltError> {
        let mut ranked = std::mem::take(&mut self.attribute_sets);
        ranked.sort_by(|a, b| b.level.cmp(&a.level).then(a.position.cmp(&b.position)));
        let mut sets: HashMap<ExpandedName, Vec<AttributeSet>> = HashMap::new();
        for Ranked { value, .. } in ranked {
            sets.entry(value.name.clone()).or_default().push(value);
        }

        fn visit(
            name: &ExpandedName,
            sets: &HashMap<ExpandedName, Vec<AttributeSet>>,
            path: &mut Vec<ExpandedName>,
            done: &mut std::collections::HashSet<ExpandedName>,
        ) -> Result<(), XsltError> {
            if done.contains(name) {
                return Ok(());
            }
            if path.contains(name) {
                return Err(XsltError::compilation(format!(
                    "attribute set '{}' uses itself",
                    name
                )));
            }
            path.push(name.clone());
            for set in sets.get(name).into_iter().flatten() {
                for used in &set.use_attribute_sets {
                    visit(used, sets, path, done)?;
                }
            }
            path.pop();
            done.insert(name.clone());
            Ok(())
        }

        let mut done = std::collections::HashSet::new();
        let mut names: Vec<&ExpandedName> = sets.keys().collect();
        names.sort();
        for name in names {
            visit(name, &sets, &mut Vec::new(), &mut done)?;
        }

        let missing: Vec<ExpandedName> = sets
            .values()
            .flatten()
            .flat_map(|set| set.use_attribute_sets.iter())
            .filter(|used| !sets.contains_key(used))
            .cloned()
            .collect();
        for name in missing {
            self.report(
                XsltError::compilation(format!("unknown attribute set '{}'", name)),
                None,
            )?;
        }
        Ok(sets)
    }

    pub(crate) fn is_xslt(node: roxmltree::Node) -> bool {
        node.is_element() && node.tag_name().namespace() == Some(XSLT_NAMESPACE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{OutputMethod, XsltInstruction};
    use crate::loader::InMemoryLoader;

    const XSL: &str = r#"xmlns:xsl="http://www.w3.org/1999/XSL/Transform""#;

    fn compile(body: &str) -> Result<CompiledStylesheet, XsltError> {
        let source = format!(r#"<xsl:stylesheet version="1.0" {}>{}</xsl:stylesheet>"#, XSL, body);
        compile_stylesheet(&source, &TransformOptions::default())
    }

    #[test]
    fn test_templates_are_registered_per_level() {
        let stylesheet = compile(
            r#"<xsl:template match="a|b"><x/></xsl:template>
               <xsl:template name="named"><y/></xsl:template>"#,
        )
        .unwrap();
        assert_eq!(stylesheet.templates.len(), 2);
        assert_eq!(stylesheet.levels.len(), 1);
        assert_eq!(stylesheet.levels[0].registry.len(), 2);
        assert!(stylesheet.named_template(&ExpandedName::local("named")).is_some());
    }

    #[test]
    fn test_whitespace_is_stripped_except_in_text() {
        let stylesheet = compile(
            r#"<xsl:template match="/">
                 <out>  <xsl:text>  </xsl:text>
                 </out>
               </xsl:template>"#,
        )
        .unwrap();
        let body = &stylesheet.templates[0].body.0;
        assert_eq!(body.len(), 1);
        let XsltInstruction::LiteralElement { body, .. } = &body[0] else {
            panic!("expected a literal element");
        };
        assert!(matches!(
            &body.0[..],
            [XsltInstruction::Text { text, .. }] if text == "  "
        ));
    }

    #[test]
    fn test_space_declarations_are_recorded() {
        let stylesheet = compile(
            r#"<xsl:strip-space xmlns:x="urn:x" elements="*  x:*"/>
               <xsl:preserve-space elements="pre code"/>"#,
        )
        .unwrap();
        let rules = &stylesheet.whitespace;
        assert!(rules.strips(None, "div"));
        assert!(rules.strips(Some("urn:x"), "pre"));
        assert!(!rules.strips(None, "pre"));
        assert!(!rules.strips(None, "code"));

        assert!(compile(r#"<xsl:strip-space elements="y:*"/>"#).is_err());
        assert!(compile(r#"<xsl:strip-space/>"#).is_err());
    }

    #[test]
    fn test_bad_pattern_is_reported_and_skipped() {
        let stylesheet = compile(
            r#"<xsl:template match="a|b[">1</xsl:template>
               <xsl:template match="c">2</xsl:template>"#,
        )
        .unwrap();
        assert_eq!(stylesheet.error_count(), 1);
        assert_eq!(stylesheet.levels[0].registry.len(), 2);

        let source = format!(
            r#"<xsl:stylesheet version="1.0" {}><xsl:template match="b[">1</xsl:template></xsl:stylesheet>"#,
            XSL
        );
        assert!(compile_stylesheet(&source, &TransformOptions::strict()).is_err());
        let rejecting = TransformOptions {
            reject_invalid_stylesheet: true,
            ..TransformOptions::default()
        };
        assert!(matches!(
            compile_stylesheet(&source, &rejecting),
            Err(XsltError::InvalidStylesheet(1))
        ));
    }

    #[test]
    fn test_import_order_flattens_depth_first() {
        let module = |imports: &[&str], name: &str| {
            let imports: String = imports
                .iter()
                .map(|href| format!(r#"<xsl:import href="{}"/>"#, href))
                .collect();
            format!(
                r#"<xsl:stylesheet version="1.0" {}>{}<xsl:template name="{}"/></xsl:stylesheet>"#,
                XSL, imports, name
            )
        };
        let loader = InMemoryLoader::new()
            .with_module("b.xsl", module(&["d.xsl"], "b"))
            .with_module("c.xsl", module(&[], "c"))
            .with_module("d.xsl", module(&[], "d"));
        let main = module(&["b.xsl", "c.xsl"], "a");
        let stylesheet =
            compile_stylesheet_with_loader(&main, None, &loader, &TransformOptions::default())
                .unwrap();

        let hrefs: Vec<Option<&str>> = stylesheet
            .levels
            .iter()
            .map(|level| level.href.as_deref())
            .collect();
        assert_eq!(hrefs, vec![None, Some("c.xsl"), Some("b.xsl"), Some("d.xsl")]);
        let ends: Vec<usize> = stylesheet.levels.iter().map(|l| l.import_end).collect();
        assert_eq!(ends, vec![4, 2, 4, 4]);
    }

    #[test]
    fn test_circular_import_is_rejected() {
        let loader = InMemoryLoader::new().with_module(
            "a.xsl",
            format!(
                r#"<xsl:stylesheet version="1.0" {}><xsl:import href="a.xsl"/></xsl:stylesheet>"#,
                XSL
            ),
        );
        let main = format!(
            r#"<xsl:stylesheet version="1.0" {}><xsl:import href="a.xsl"/></xsl:stylesheet>"#,
            XSL
        );
        let err = compile_stylesheet_with_loader(&main, None, &loader, &TransformOptions::default())
            .unwrap_err();
        assert!(matches!(err, XsltError::CircularImport(_)));
    }

    #[test]
    fn test_output_and_decimal_formats() {
        let stylesheet = compile(
            r#"<xsl:output method="text" indent="yes"/>
               <xsl:decimal-format name="eu" decimal-separator="," grouping-separator="."/>"#,
        )
        .unwrap();
        assert_eq!(stylesheet.output.method, Some(OutputMethod::Text));
        assert_eq!(stylesheet.output.indent, Some(true));
        assert_eq!(stylesheet.decimal_formats["eu"].decimal_separator, ',');
        assert!(stylesheet.decimal_formats.contains_key(""));
    }

    #[test]
    fn test_attribute_set_cycles_are_rejected() {
        let err = compile(
            r#"<xsl:attribute-set name="a" use-attribute-sets="b"/>
               <xsl:attribute-set name="b" use-attribute-sets="a"/>"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("uses itself"));
    }

    #[test]
    fn test_simplified_stylesheet() {
        let source = format!(
            r#"<html xsl:version="1.0" {}><p><xsl:value-of select="/doc"/></p></html>"#,
            XSL
        );
        let stylesheet = compile_stylesheet(&source, &TransformOptions::default()).unwrap();
        assert_eq!(stylesheet.templates.len(), 1);
        assert_eq!(stylesheet.templates[0].match_pattern.as_deref(), Some("/"));
    }
}

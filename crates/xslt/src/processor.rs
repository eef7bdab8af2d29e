//! One-call entry points: compile a stylesheet once, then transform XML text with it.

use crate::ast::{CompiledStylesheet, OutputSettings};
use crate::compiler::{compile_stylesheet, compile_stylesheet_with_loader};
use crate::config::TransformOptions;
use crate::datasources::XmlDocument;
use crate::diagnostics::{DiagnosticSink, LogSink};
use crate::error::XsltError;
use crate::executor::TransformContext;
use crate::loader::StylesheetLoader;
use crate::result_tree::ResultTree;
use crate::serializer::serialize;
use std::rc::Rc;
use std::sync::Arc;

/// A compiled stylesheet plus the options it runs with. Cheap to clone; every
/// transformation gets its own session state.
#[derive(Debug, Clone)]
pub struct XsltTemplate {
    compiled: Arc<CompiledStylesheet>,
    options: TransformOptions,
}

impl XsltTemplate {
    /// Compiles `source`; imports and includes resolve against the working directory.
    pub fn compile(source: &str, options: TransformOptions) -> Result<Self, XsltError> {
        let compiled = compile_stylesheet(source, &options)?;
        Ok(Self::from_compiled(Arc::new(compiled), options))
    }

    pub fn compile_with_loader(
        source: &str,
        base_uri: Option<&str>,
        loader: &dyn StylesheetLoader,
        options: TransformOptions,
    ) -> Result<Self, XsltError> {
        let compiled = compile_stylesheet_with_loader(source, base_uri, loader, &options)?;
        Ok(Self::from_compiled(Arc::new(compiled), options))
    }

    pub fn from_compiled(compiled: Arc<CompiledStylesheet>, options: TransformOptions) -> Self {
        Self { compiled, options }
    }

    pub fn stylesheet(&self) -> &CompiledStylesheet {
        &self.compiled
    }

    pub fn output_settings(&self) -> &OutputSettings {
        &self.compiled.output
    }

    /// Transforms `source_xml` and serializes the result per `xsl:output`.
    pub fn transform(&self, source_xml: &str) -> Result<String, XsltError> {
        self.transform_with_params(source_xml, &[], Rc::new(LogSink))
    }

    /// Like [`transform`](Self::transform), with string values for top-level parameters
    /// and a sink for diagnostics and `xsl:message` output.
    pub fn transform_with_params(
        &self,
        source_xml: &str,
        params: &[(&str, &str)],
        sink: Rc<dyn DiagnosticSink>,
    ) -> Result<String, XsltError> {
        let tree = self.transform_to_tree(source_xml, params, sink)?;
        Ok(serialize(&tree, &self.compiled.output))
    }

    pub fn transform_to_tree(
        &self,
        source_xml: &str,
        params: &[(&str, &str)],
        sink: Rc<dyn DiagnosticSink>,
    ) -> Result<ResultTree, XsltError> {
        let mut doc = XmlDocument::parse(source_xml)?;
        doc.strip_whitespace(&self.compiled.whitespace);
        let mut ctx = TransformContext::new(&self.compiled, doc.root_node(), self.options.clone())
            .with_sink(sink);
        for (name, value) in params {
            ctx.set_string_param(name, value);
        }
        ctx.transform().map_err(|failure| XsltError::Execution(failure.error))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::CollectingSink;
    use crate::error::ExecutionError;
    use quill_xpath1::XPathError;

    fn stylesheet(body: &str) -> String {
        format!(
            r#"<xsl:stylesheet version="1.0" xmlns:xsl="http://www.w3.org/1999/XSL/Transform">
                 <xsl:output omit-xml-declaration="yes"/>
                 {}
               </xsl:stylesheet>"#,
            body
        )
    }

    fn run(body: &str, xml: &str) -> String {
        XsltTemplate::compile(&stylesheet(body), TransformOptions::default())
            .unwrap()
            .transform(xml)
            .unwrap()
    }

    const USERS: &str = r#"<data><users><user id="u1" status="active"><name>Alice</name></user><user id="u2" status="inactive"><name>Bob</name></user><user id="u3" status="active"><name>Charlie</name></user></users></data>"#;

    #[test]
    fn test_named_template_with_params() {
        let out = run(
            r#"<xsl:template name="user-details">
                 <xsl:param name="user-node"/>
                 <xsl:param name="prefix" select="'User: '"/>
                 <p><xsl:value-of select="$prefix"/><xsl:value-of select="$user-node/name"/></p>
               </xsl:template>
               <xsl:template match="/">
                 <div>
                   <xsl:for-each select="data/users/user">
                     <xsl:if test="@status = 'active'">
                       <xsl:call-template name="user-details">
                         <xsl:with-param name="user-node" select="."/>
                       </xsl:call-template>
                     </xsl:if>
                   </xsl:for-each>
                 </div>
               </xsl:template>"#,
            USERS,
        );
        assert_eq!(out, "<div><p>User: Alice</p><p>User: Charlie</p></div>");
    }

    #[test]
    fn test_strict_mode_undeclared_variable() {
        let xslt = stylesheet(
            r#"<xsl:template match="/"><p><xsl:value-of select="$undeclared"/></p></xsl:template>"#,
        );
        let lenient = XsltTemplate::compile(&xslt, TransformOptions::default()).unwrap();
        assert_eq!(lenient.transform("<data/>").unwrap(), "<p/>");

        let strict = XsltTemplate::compile(&xslt, TransformOptions::strict()).unwrap();
        let err = strict.transform("<data/>").unwrap_err();
        assert!(matches!(
            err,
            XsltError::Execution(ExecutionError::XPath(XPathError::UnknownVariable(_)))
        ));
    }

    #[test]
    fn test_strict_mode_undeclared_param() {
        let xslt = stylesheet(
            r#"<xsl:template name="test"><xsl:param name="declared"/></xsl:template>
               <xsl:template match="/">
                 <xsl:call-template name="test">
                   <xsl:with-param name="undeclared" select="'value'"/>
                 </xsl:call-template>
               </xsl:template>"#,
        );
        let lenient = XsltTemplate::compile(&xslt, TransformOptions::default()).unwrap();
        assert_eq!(lenient.transform("<data/>").unwrap(), "");

        let strict = XsltTemplate::compile(&xslt, TransformOptions::strict()).unwrap();
        let err = strict.transform("<data/>").unwrap_err();
        assert!(err.to_string().contains("undeclared parameter: 'undeclared'"));
    }

    #[test]
    fn test_choose_when_otherwise() {
        let out = run(
            r#"<xsl:template match="/">
                 <xsl:for-each select="list/n">
                   <xsl:choose>
                     <xsl:when test=". &gt; 10">big</xsl:when>
                     <xsl:when test=". &gt; 5">medium</xsl:when>
                     <xsl:otherwise>small</xsl:otherwise>
                   </xsl:choose>
                   <xsl:text>,</xsl:text>
                 </xsl:for-each>
               </xsl:template>"#,
            "<list><n>3</n><n>7</n><n>12</n></list>",
        );
        assert_eq!(out, "small,medium,big,");
    }

    #[test]
    fn test_sort_with_multiple_keys() {
        let out = run(
            r#"<xsl:template match="/">
                 <xsl:for-each select="people/p">
                   <xsl:sort select="@team"/>
                   <xsl:sort select="@age" data-type="number" order="descending"/>
                   <xsl:value-of select="concat(@team, @age, ' ')"/>
                 </xsl:for-each>
               </xsl:template>"#,
            r#"<people><p team="b" age="30"/><p team="a" age="9"/><p team="b" age="41"/><p team="a" age="25"/></people>"#,
        );
        assert_eq!(out, "a25 a9 b41 b30 ");
    }

    #[test]
    fn test_attribute_instruction_and_avt() {
        let out = run(
            r#"<xsl:template match="item">
                 <a href="/items/{@id}" class="{name()}">
                   <xsl:attribute name="title"><xsl:value-of select="."/></xsl:attribute>
                   <xsl:value-of select="."/>
                 </a>
               </xsl:template>"#,
            r#"<item id="7">Seven</item>"#,
        );
        assert_eq!(
            out,
            r#"<a href="/items/7" class="item" title="Seven">Seven</a>"#
        );
    }

    #[test]
    fn test_copy_and_copy_of() {
        let out = run(
            r#"<xsl:template match="/">
                 <out>
                   <xsl:copy-of select="doc/keep"/>
                   <xsl:apply-templates select="doc/shallow"/>
                 </out>
               </xsl:template>
               <xsl:template match="shallow">
                 <xsl:copy><xsl:attribute name="seen">yes</xsl:attribute></xsl:copy>
               </xsl:template>"#,
            r#"<doc><keep a="1"><b>x</b><!--c--></keep><shallow drop="me"><child/></shallow></doc>"#,
        );
        assert_eq!(
            out,
            r#"<out><keep a="1"><b>x</b><!--c--></keep><shallow seen="yes"/></out>"#
        );
    }

    #[test]
    fn test_element_with_computed_name() {
        let out = run(
            r#"<xsl:template match="field">
                 <xsl:element name="{@kind}-field"><xsl:value-of select="."/></xsl:element>
               </xsl:template>
               <xsl:template match="/"><form><xsl:apply-templates select="form/field"/></form></xsl:template>"#,
            r#"<form><field kind="text">a</field><field kind="date">b</field></form>"#,
        );
        assert_eq!(out, "<form><text-field>a</text-field><date-field>b</date-field></form>");
    }

    #[test]
    fn test_key_lookup() {
        let out = run(
            r#"<xsl:key name="by-dept" match="employee" use="@dept"/>
               <xsl:template match="/">
                 <xsl:for-each select="key('by-dept', 'eng')">
                   <xsl:value-of select="@name"/><xsl:text>;</xsl:text>
                 </xsl:for-each>
               </xsl:template>"#,
            r#"<staff><employee name="Ann" dept="eng"/><employee name="Bo" dept="ops"/><employee name="Cy" dept="eng"/></staff>"#,
        );
        assert_eq!(out, "Ann;Cy;");
    }

    #[test]
    fn test_params_and_messages_go_through_the_session() {
        let xslt = stylesheet(
            r#"<xsl:param name="who" select="'nobody'"/>
               <xsl:template match="/">
                 <xsl:message>processing for <xsl:value-of select="$who"/></xsl:message>
                 <xsl:value-of select="$who"/>
               </xsl:template>"#,
        );
        let template = XsltTemplate::compile(&xslt, TransformOptions::default()).unwrap();
        let sink = Rc::new(CollectingSink::new());
        let out = template
            .transform_with_params("<a/>", &[("who", "Dana")], sink.clone())
            .unwrap();
        assert_eq!(out, "Dana");
        assert_eq!(sink.messages(), vec!["processing for Dana".to_string()]);
    }

    #[test]
    fn test_malformed_source_is_an_xml_error() {
        let template =
            XsltTemplate::compile(&stylesheet(""), TransformOptions::default()).unwrap();
        assert!(matches!(
            template.transform("<a>").unwrap_err(),
            XsltError::XmlParse(_)
        ));
    }
}

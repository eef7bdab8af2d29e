#![allow(dead_code)]

use quill::xslt::{InMemoryLoader, compile_stylesheet_with_loader};
use quill::{CollectingSink, Error, TransformOptions, XsltTemplate};
use std::rc::Rc;

pub type TestResult = Result<(), Box<dyn std::error::Error>>;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Wraps template rules in an `xsl:stylesheet` that omits the XML declaration.
pub fn stylesheet(body: &str) -> String {
    format!(
        r#"<xsl:stylesheet version="1.0" xmlns:xsl="http://www.w3.org/1999/XSL/Transform">
             <xsl:output omit-xml-declaration="yes"/>
             {}
           </xsl:stylesheet>"#,
        body
    )
}

/// Runs `body` (wrapped by [`stylesheet`]) against `xml` with default options.
pub fn transform(body: &str, xml: &str) -> Result<String, Error> {
    init_logging();
    quill::transform_str(&stylesheet(body), xml)
}

/// Runs a full stylesheet and keeps every diagnostic it reports.
pub fn transform_collecting(
    xslt: &str,
    xml: &str,
    options: TransformOptions,
) -> (Result<String, Error>, Rc<CollectingSink>) {
    init_logging();
    let sink = Rc::new(CollectingSink::new());
    let result = XsltTemplate::compile(xslt, options)
        .map_err(Error::from)
        .and_then(|template| {
            template
                .transform_with_params(xml, &[], sink.clone())
                .map_err(Error::from)
        });
    (result, sink)
}

/// Compiles `main` with the other modules served from memory under their names.
pub fn compile_modules(main: &str, modules: &[(&str, &str)]) -> Result<XsltTemplate, Error> {
    init_logging();
    let mut loader = InMemoryLoader::new();
    for (uri, source) in modules {
        loader.insert(*uri, *source);
    }
    let options = TransformOptions::default();
    let compiled = compile_stylesheet_with_loader(main, Some("main.xsl"), &loader, &options)?;
    Ok(XsltTemplate::from_compiled(compiled.into(), options))
}

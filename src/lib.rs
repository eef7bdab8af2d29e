//! Quill: an XSLT 1.0 transformation engine.
//!
//! The work happens in two crates, re-exported here:
//!
//! - [`xpath`] (`quill-xpath1`): XPath 1.0 parsing and evaluation over any tree that
//!   implements [`DataSourceNode`].
//! - [`xslt`] (`quill-xslt`): stylesheet compilation, template matching and resolution,
//!   instruction execution and result serialization.
//!
//! For the common case of "stylesheet text in, XML text in, serialized text out" use
//! [`transform_str`].

pub use quill_xpath1 as xpath;
pub use quill_xslt as xslt;

pub use quill_xpath1::{DataSourceNode, NodeType, XPathError, XPathValue};
pub use quill_xslt::{
    CollectingSink, CompiledStylesheet, Diagnostic, DiagnosticSink, ExecutionError,
    ExtensionRegistry, LogSink, ResultTree, Severity, TransformContext, TransformOptions,
    XmlDocument, XsltError, XsltTemplate,
};

use thiserror::Error;

/// Any failure of a one-call transformation.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Stylesheet error: {0}")]
    Stylesheet(#[source] XsltError),

    #[error("Transformation failed: {0}")]
    Execution(#[from] ExecutionError),

    #[error("XPath error: {0}")]
    XPath(#[from] XPathError),
}

/// Runtime failures keep their own variant; everything else is a stylesheet problem.
impl From<XsltError> for Error {
    fn from(err: XsltError) -> Self {
        match err {
            XsltError::Execution(execution) => Error::Execution(execution),
            other => Error::Stylesheet(other),
        }
    }
}

/// Compiles `stylesheet` and applies it to `source`, returning the serialized result.
pub fn transform_str(stylesheet: &str, source: &str) -> Result<String, Error> {
    transform_str_with_options(stylesheet, source, TransformOptions::default())
}

pub fn transform_str_with_options(
    stylesheet: &str,
    source: &str,
    options: TransformOptions,
) -> Result<String, Error> {
    let template = XsltTemplate::compile(stylesheet, options)?;
    log::debug!(
        "Compiled stylesheet with {} templates",
        template.stylesheet().templates.len()
    );
    Ok(template.transform(source)?)
}

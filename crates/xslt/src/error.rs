use quill_xpath1::XPathError;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Location {
    pub line: usize,
    pub col: usize,
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "line {}, column {}", self.line, self.col)
    }
}

impl From<(usize, usize)> for Location {
    fn from((line, col): (usize, usize)) -> Self {
        Location { line, col }
    }
}

/// Errors raised while loading and compiling a stylesheet, or while serializing a result.
#[derive(Error, Debug)]
pub enum XsltError {
    #[error("XML parsing error: {0}")]
    XmlParse(#[from] roxmltree::Error),

    #[error("XPath evaluation error: {0}")]
    XPath(#[from] XPathError),

    #[error("Stylesheet compilation error: {0}")]
    Compilation(String),

    #[error("XPath parse error in '{0}': {1}")]
    XPathParse(String, String),

    #[error("Invalid pattern '{pattern}': {message}")]
    Pattern { pattern: String, message: String },

    #[error("Invalid attribute value template '{0}': {1}")]
    Avt(String, String),

    #[error("Stylesheet structure error at {location}: {message}")]
    TemplateStructure { message: String, location: Location },

    #[error("Missing required attribute '{attribute}' on {element} at {location}")]
    MissingAttribute {
        element: String,
        attribute: String,
        location: Location,
    },

    #[error("Import error for '{href}': {message}")]
    Import { href: String, message: String },

    #[error("Circular import detected: {0}")]
    CircularImport(String),

    #[error("Stylesheet rejected: {0} error(s) reported during compilation")]
    InvalidStylesheet(usize),

    #[error("JSON parsing error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error(transparent)]
    Execution(#[from] ExecutionError),
}

impl XsltError {
    pub fn compilation(msg: impl Into<String>) -> Self {
        Self::Compilation(msg.into())
    }

    pub fn import(href: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Import {
            href: href.into(),
            message: message.into(),
        }
    }
}

/// Errors raised while running a transformation. Any of them stops the transformation.
#[derive(Error, Debug, Clone)]
pub enum ExecutionError {
    #[error("XPath evaluation failed: {0}")]
    XPath(#[from] XPathError),

    #[error("Call to unknown named template: '{0}'")]
    UnknownNamedTemplate(String),

    #[error("Template recursion exceeded the limit of {0} nested calls")]
    RecursionLimit(usize),

    #[error("Too many live variable bindings (limit {0})")]
    VariableLimit(usize),

    #[error("Transformation terminated by xsl:message: {0}")]
    Terminated(String),

    #[error("Extension element '{name}' failed: {message}")]
    Extension { name: String, message: String },

    #[error("Type error: {0}")]
    TypeError(String),

    #[error("Dynamic error: {0}")]
    Dynamic(String),

    #[error("Transformation was stopped")]
    Stopped,
}

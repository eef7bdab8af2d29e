use thiserror::Error;

/// Everything that can go wrong while parsing or evaluating an expression.
#[derive(Error, Debug, Clone)]
pub enum XPathError {
    /// The expression text, then what the parser choked on.
    #[error("XPath parse error in '{0}': {1}")]
    XPathParse(String, String),

    #[error("{function}(): {message}")]
    FunctionError { function: String, message: String },

    #[error("Unknown function '{0}'")]
    UnknownFunction(String),

    #[error("Type error: {0}")]
    TypeError(String),

    #[error("Variable '{0}' not found")]
    UnknownVariable(String),

    #[error("Namespace prefix '{0}' is not declared")]
    UnknownPrefix(String),
}

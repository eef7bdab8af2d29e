//! Host-tunable limits and switches for compiling and running stylesheets.

use crate::error::XsltError;
use serde::{Deserialize, Serialize};

pub const DEFAULT_MAX_TEMPLATE_DEPTH: usize = 500;
pub const DEFAULT_MAX_VARIABLE_DEPTH: usize = 10_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct TransformOptions {
    /// Bound on nested template invocations before the transformation is stopped.
    pub max_template_depth: usize,
    /// Bound on simultaneously live variable and parameter bindings.
    pub max_variable_depth: usize,
    /// Unknown variables and functions become errors instead of empty values, and a
    /// malformed match pattern fails compilation.
    pub strict: bool,
    /// Fail compilation when any non-fatal error was reported.
    pub reject_invalid_stylesheet: bool,
}

impl Default for TransformOptions {
    fn default() -> Self {
        Self {
            max_template_depth: DEFAULT_MAX_TEMPLATE_DEPTH,
            max_variable_depth: DEFAULT_MAX_VARIABLE_DEPTH,
            strict: false,
            reject_invalid_stylesheet: false,
        }
    }
}

impl TransformOptions {
    pub fn from_json_str(json: &str) -> Result<Self, XsltError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn strict() -> Self {
        Self {
            strict: true,
            ..Self::default()
        }
    }
}

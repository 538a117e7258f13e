// ABOUTME: Error types for template construction and rendering
// ABOUTME: Wraps compiler and script failures and adds data and execution mode errors

use thiserror::Error;

use crate::compiler::CompileError;
use crate::script::ScriptError;

#[derive(Error, Debug)]
pub enum TemplateError {
    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Script(#[from] ScriptError),

    #[error("Template execution suspended on a pending operation, render it asynchronously")]
    Suspended,

    #[error("Invalid template data: {0}")]
    InvalidData(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl TemplateError {
    /// Program line of the failure when it came from the script runtime.
    pub fn code_line(&self) -> Option<usize> {
        match self {
            Self::Script(error) => error.line(),
            _ => None,
        }
    }
}

/// Errors from a template rendered inside a host function surface in the
/// calling template with the same message, raised at the calling line.
impl From<TemplateError> for ScriptError {
    fn from(error: TemplateError) -> Self {
        ScriptError::thrown(error.to_string())
    }
}

pub type Result<T> = std::result::Result<T, TemplateError>;

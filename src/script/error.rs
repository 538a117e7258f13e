// ABOUTME: Error types for the embedded template script runtime
// ABOUTME: Separates parse-time syntax errors from runtime failures, both carrying program lines

use thiserror::Error;

/// Failure raised while parsing or running a generated program.
///
/// `Display` is the bare message, so an error that crosses a nested
/// template boundary keeps its text unchanged.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScriptError {
    #[error("{message}")]
    Syntax { message: String, line: usize },

    #[error("{message}")]
    Runtime { message: String, line: usize },
}

impl ScriptError {
    pub fn syntax(message: impl Into<String>, line: usize) -> Self {
        Self::Syntax {
            message: message.into(),
            line,
        }
    }

    pub fn runtime(message: impl Into<String>, line: usize) -> Self {
        Self::Runtime {
            message: message.into(),
            line,
        }
    }

    /// Error raised by host code. The interpreter stamps the line of the
    /// call that reached the host function.
    pub fn thrown(message: impl Into<String>) -> Self {
        Self::runtime(message, 0)
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Syntax { message, .. } | Self::Runtime { message, .. } => message,
        }
    }

    /// Program line the failure was raised on, if known.
    pub fn line(&self) -> Option<usize> {
        let line = match self {
            Self::Syntax { line, .. } | Self::Runtime { line, .. } => *line,
        };
        (line > 0).then_some(line)
    }

    pub fn is_syntax(&self) -> bool {
        matches!(self, Self::Syntax { .. })
    }

    pub(crate) fn at_line(self, call_line: usize) -> Self {
        match self {
            Self::Runtime { message, line: 0 } => Self::Runtime {
                message,
                line: call_line,
            },
            other => other,
        }
    }
}

pub type Result<T> = std::result::Result<T, ScriptError>;

/// Raised when a program nests or recurses past the interpreter's limits.
pub(crate) const STACK_EXCEEDED: &str = "Maximum call stack size exceeded";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_is_bare_message() {
        let error = ScriptError::runtime("Cannot read property 'name' of undefined", 7);
        assert_eq!(error.to_string(), "Cannot read property 'name' of undefined");
        assert_eq!(error.line(), Some(7));
    }

    #[test]
    fn test_thrown_errors_take_call_line() {
        let error = ScriptError::thrown("boom").at_line(12);
        assert_eq!(error.line(), Some(12));

        let located = ScriptError::runtime("boom", 3).at_line(12);
        assert_eq!(located.line(), Some(3));
    }
}

// ABOUTME: Embedded runtime for the script language that generated template programs are written in
// ABOUTME: Parses program text in sync or async grammar and evaluates it against a data context

pub mod ast;
pub mod builtins;
pub mod error;
pub mod interpreter;
pub mod lexer;
pub mod parser;
pub mod value;

pub use ast::Program;
pub use error::{Result, ScriptError};
pub use interpreter::Interpreter;
pub use parser::parse_program;
pub use value::{Function, Value};

/// Grammar a program is parsed with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Grammar {
    /// `await` is a syntax error.
    Sync,
    /// `await expr` is allowed anywhere.
    Async,
}

impl Grammar {
    pub fn allows_await(self) -> bool {
        self == Self::Async
    }
}

/// Parse `source` with the given grammar.
pub fn parse(source: &str, grammar: Grammar) -> Result<Program> {
    parse_program(source, grammar.allows_await())
}

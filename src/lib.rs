// ABOUTME: Main library module for the vemtl template compiler
// ABOUTME: Exports the compiler pipeline, script runtime and template API

pub mod cli;
pub mod compiler;
pub mod script;
pub mod template;

// Re-export commonly used types
pub use cli::{App, Args, Config};
pub use compiler::{CompileError, DataDeclaration, Diagnostic, GeneratedProgram, ImportGraph};
pub use script::{ScriptError, Value};
pub use template::{
    DataContext, ErrorLogger, ErrorRecord, Template, TemplateError, TemplateOptions,
};

// Error handling
pub type Result<T> = anyhow::Result<T>;

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

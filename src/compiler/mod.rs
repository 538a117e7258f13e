// ABOUTME: Template compiler pipeline from import expansion to generated script program
// ABOUTME: Resolves imports, tokenizes directives, normalizes indentation and emits annotated code

pub mod codegen;
pub mod error;
pub mod graph;
pub mod imports;
pub mod indent;
pub mod metadata;
pub mod tokenizer;

pub use codegen::{Diagnostic, GeneratedProgram, Statement};
pub use error::{CompileError, Result};
pub use graph::ImportGraph;
pub use imports::{imported_templates, ImportDirective, ImportResolver};
pub use metadata::{data_declarations, DataDeclaration};
pub use tokenizer::{Segment, SegmentKind};

use tracing::debug;

/// Tokenize and generate the program for an import-expanded template.
pub fn compile(expanded: &str, indent_back: bool) -> GeneratedProgram {
    let segments = tokenizer::tokenize(expanded, indent_back);
    debug!(segments = segments.len(), indent_back, "Tokenized template");
    GeneratedProgram::generate(segments)
}

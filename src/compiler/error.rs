// ABOUTME: Error types for template compilation
// ABOUTME: Covers import resolution failures raised before tokenization

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    #[error("Please provide the import {name} content on the options.imports settings")]
    UnresolvedImport { name: String },

    #[error("Cyclic import detected: template '{name}' imports itself through {chain}")]
    CyclicImport { name: String, chain: String },
}

impl CompileError {
    pub(crate) fn cyclic(name: &str, chain: &[String]) -> Self {
        let mut path: Vec<&str> = chain.iter().map(String::as_str).collect();
        path.push(name);
        Self::CyclicImport {
            name: name.to_string(),
            chain: path.join(" -> "),
        }
    }
}

pub type Result<T> = std::result::Result<T, CompileError>;

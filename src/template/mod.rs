// ABOUTME: Template module tying the compiler and script runtime into a renderable template
// ABOUTME: Provides data contexts, options, error mapping and the shared error logger

pub mod context;
pub mod engine;
pub mod error;
pub mod logger;
pub mod mapper;
pub mod options;

pub use context::DataContext;
pub use engine::Template;
pub use error::{Result, TemplateError};
pub use logger::{ErrorLogger, ErrorRecord};
pub use mapper::ErrorMapper;
pub use options::{TemplateOptions, ANONYMOUS_TEMPLATE};

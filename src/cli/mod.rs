// ABOUTME: CLI module for the vemtl template compiler
// ABOUTME: Exports command line interface components and main application logic

pub mod app;
pub mod args;
pub mod commands;
pub mod config;

pub use app::App;
pub use args::{Args, Commands, ImportArgs};
pub use config::Config;

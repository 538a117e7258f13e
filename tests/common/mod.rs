// ABOUTME: Common utilities and helpers for integration tests
// ABOUTME: Provides temp directories with template files and quick render helpers

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tokio::fs;

use vemtl::{DataContext, Template, TemplateOptions};

pub struct TestEnvironment {
    pub temp_dir: TempDir,
}

impl TestEnvironment {
    pub fn new() -> Self {
        Self {
            temp_dir: TempDir::new().expect("Failed to create temp directory"),
        }
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn file(&self, name: &str) -> PathBuf {
        self.path().join(name)
    }

    pub async fn write_file(&self, name: &str, content: &str) -> PathBuf {
        let path = self.file(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .expect("Failed to create parent directory");
        }
        fs::write(&path, content)
            .await
            .expect("Failed to write test file");
        path
    }
}

/// Template with options and a JSON data context.
pub fn template(source: &str, options: TemplateOptions, data: serde_json::Value) -> Template {
    let mut template = Template::with_options(source, options).expect("Failed to build template");
    template.set_data(DataContext::from_json(&data).expect("Data must be a JSON object"));
    template
}

/// Render `source` synchronously against `data`.
pub fn render(source: &str, data: serde_json::Value) -> String {
    template(source, TemplateOptions::default(), data)
        .render()
        .expect("Render failed")
}

/// Leading space count of every line.
pub fn indentation(text: &str) -> Vec<usize> {
    text.split('\n')
        .map(|line| line.len() - line.trim_start_matches(' ').len())
        .collect()
}

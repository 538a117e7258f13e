// ABOUTME: Command implementations for the vemtl CLI
// ABOUTME: Handles execution of the render, check and inspect commands

use anyhow::{Context, Result};
use indexmap::IndexMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

use super::args::{Args, ImportArgs};
use super::config::Config;
use crate::template::{DataContext, ErrorLogger, Template, TemplateError, TemplateOptions};

/// Render a template to stdout or a file
pub async fn render_template(
    file: PathBuf,
    data: Option<String>,
    imports: ImportArgs,
    name: Option<String>,
    use_async: bool,
    output: Option<PathBuf>,
    config: &Config,
) -> Result<()> {
    info!("Rendering template: {}", file.display());

    let name = name.unwrap_or_else(|| file.display().to_string());
    let options = build_options(&imports, config)?.with_template_name(name);
    let logger = ErrorLogger::new();
    let mut template = load_template(&file, options)?.with_error_logger(logger.clone());
    template.set_data(load_data(data.as_deref())?);

    let rendered = if use_async {
        template.render_async_with_error_treatment().await
    } else {
        template.render_with_error_treatment()
    };
    let rendered = rendered.map_err(|e| describe_failure(e, &logger))?;

    match output {
        Some(output_path) => {
            std::fs::write(&output_path, rendered).with_context(|| {
                format!("Failed to write output file '{}'", output_path.display())
            })?;
            info!("Output written to: {}", output_path.display());
        }
        None => print!("{}", rendered),
    }

    Ok(())
}

/// Check that a template compiles to a valid program
pub async fn check_template(file: PathBuf, imports: ImportArgs, config: &Config) -> Result<()> {
    info!("Checking template: {}", file.display());

    let options = build_options(&imports, config)?;
    let template = load_template(&file, options)?;
    let diagnostic = template.validate();

    if !diagnostic.valid {
        return Err(anyhow::anyhow!(
            "Template '{}' is invalid at template line {}: {}",
            file.display(),
            diagnostic.template_line,
            diagnostic.message.unwrap_or_default()
        ));
    }

    println!("✓ Template '{}' is valid", file.display());
    println!("  Imports: {}", template.imported_templates().len());
    println!("  Data declarations: {}", template.data_declarations().len());

    Ok(())
}

/// Print the generated program, imports or data declarations
pub async fn inspect_template(
    file: PathBuf,
    imports: ImportArgs,
    show_code: bool,
    show_imports: bool,
    show_data: bool,
    config: &Config,
) -> Result<()> {
    let options = build_options(&imports, config)?;
    let template = load_template(&file, options)?;
    let show_all = !(show_code || show_imports || show_data);

    if show_code || show_all {
        println!("{}", template.pre_compiled_code());
    }

    if show_imports || show_all {
        let graph = template.import_graph()?;
        let order = graph.resolution_order()?;
        println!("Imports (resolution order):");
        for name in order {
            let dependencies = graph.dependencies(&name);
            if dependencies.is_empty() {
                println!("  {}", name);
            } else {
                println!("  {} <- {}", name, dependencies.join(", "));
            }
        }
    }

    if show_data || show_all {
        let declarations = template.data_declarations();
        println!("{}", serde_json::to_string_pretty(&declarations)?);
    }

    Ok(())
}

fn build_options(imports: &ImportArgs, config: &Config) -> Result<TemplateOptions> {
    let mut table = IndexMap::new();

    if let Some(dir) = imports.imports_dir.as_ref().or(config.imports_dir.as_ref()) {
        table.extend(load_imports_dir(dir)?);
    }

    for (name, path) in Args::parse_imports(&imports.imports)? {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read import '{}' from {}", name, path.display()))?;
        table.insert(name, content);
    }

    debug!("Registered {} importable templates", table.len());

    Ok(TemplateOptions::new()
        .with_imports(table)
        .with_indent_back(imports.indent_back || config.indent_back))
}

/// Every file below `dir`, keyed by its `/`-separated relative path.
pub fn load_imports_dir(dir: &Path) -> Result<IndexMap<String, String>> {
    let mut table = IndexMap::new();

    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry =
            entry.with_context(|| format!("Failed to read imports directory {}", dir.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry.path().strip_prefix(dir).unwrap_or(entry.path());
        let name = relative
            .components()
            .map(|component| component.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        let content = std::fs::read_to_string(entry.path())
            .with_context(|| format!("Failed to read import {}", entry.path().display()))?;
        table.insert(name, content);
    }

    Ok(table)
}

fn load_template(file: &Path, options: TemplateOptions) -> Result<Template> {
    let source = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read template {}", file.display()))?;
    Template::with_options(source, options)
        .with_context(|| format!("Failed to load template {}", file.display()))
}

/// Data context from inline JSON or `@path`.
pub fn load_data(data: Option<&str>) -> Result<DataContext> {
    let Some(data) = data else {
        return Ok(DataContext::new());
    };

    let json = match data.strip_prefix('@') {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read data file {}", path))?,
        None => data.to_string(),
    };
    let value: serde_json::Value =
        serde_json::from_str(&json).context("Failed to parse data context JSON")?;

    Ok(DataContext::from_json(&value)?)
}

fn describe_failure(error: TemplateError, logger: &ErrorLogger) -> anyhow::Error {
    match logger.latest() {
        Some(record) => anyhow::anyhow!(
            "{} failed at template line {}: {}",
            record.template_name,
            record.template_line,
            error
        ),
        None => anyhow::Error::new(error),
    }
}

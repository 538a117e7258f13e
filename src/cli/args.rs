// ABOUTME: Command line argument definitions and parsing using Clap
// ABOUTME: Defines the render, check and inspect subcommands for vemtl

use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "vemtl")]
#[command(about = "Compile and render templates with embedded script logic")]
#[command(version)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(short, long, global = true, help = "Enable verbose output")]
    pub verbose: bool,

    #[arg(short, long, global = true, help = "Path to configuration file")]
    pub config: Option<PathBuf>,

    #[arg(long, global = true, help = "Disable colored output")]
    pub no_color: bool,
}

/// Where imported templates come from.
#[derive(ClapArgs, Debug, Clone, Default)]
pub struct ImportArgs {
    #[arg(
        short = 'i',
        long = "import",
        help = "Register an importable template (name=path)"
    )]
    pub imports: Vec<String>,

    #[arg(long, help = "Directory whose files are importable by relative path")]
    pub imports_dir: Option<PathBuf>,

    #[arg(long, help = "Treat the whole template as an indent-back region")]
    pub indent_back: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Render a template to stdout or a file
    Render {
        #[arg(help = "Path to the template file")]
        file: PathBuf,

        #[arg(
            short,
            long,
            help = "Data context as a JSON object, or @path to a JSON file"
        )]
        data: Option<String>,

        #[command(flatten)]
        imports: ImportArgs,

        #[arg(short, long, help = "Template name used in error reports")]
        name: Option<String>,

        #[arg(long = "async", help = "Render with the asynchronous grammar")]
        use_async: bool,

        #[arg(short, long, help = "Write the output to this file")]
        output: Option<PathBuf>,
    },

    /// Check that a template compiles to a valid program
    Check {
        #[arg(help = "Path to the template file")]
        file: PathBuf,

        #[command(flatten)]
        imports: ImportArgs,
    },

    /// Show the generated program, imports or data declarations
    Inspect {
        #[arg(help = "Path to the template file")]
        file: PathBuf,

        #[command(flatten)]
        imports: ImportArgs,

        #[arg(long = "code", help = "Print the generated program")]
        show_code: bool,

        #[arg(long = "imports", help = "Print imported templates in resolution order")]
        show_imports: bool,

        #[arg(long = "data", help = "Print data declarations as JSON")]
        show_data: bool,
    },
}

impl Args {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Parse imports from name=path format
    pub fn parse_imports(imports: &[String]) -> anyhow::Result<Vec<(String, PathBuf)>> {
        let mut parsed = Vec::new();

        for import in imports {
            match import.split_once('=') {
                Some((name, path)) if !name.is_empty() && !path.is_empty() => {
                    parsed.push((name.to_string(), PathBuf::from(path)));
                }
                _ => {
                    return Err(anyhow::anyhow!(
                        "Invalid import format '{}'. Expected 'name=path'",
                        import
                    ));
                }
            }
        }

        Ok(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_imports() {
        let imports = vec![
            "header=partials/header.vemtl".to_string(),
            "Footer.vemtl=./footer.vemtl".to_string(),
        ];

        let parsed = Args::parse_imports(&imports).unwrap();

        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].0, "header");
        assert_eq!(parsed[0].1, PathBuf::from("partials/header.vemtl"));
        assert_eq!(parsed[1].0, "Footer.vemtl");
    }

    #[test]
    fn test_parse_imports_invalid() {
        assert!(Args::parse_imports(&["invalid_format".to_string()]).is_err());
        assert!(Args::parse_imports(&["=path".to_string()]).is_err());
    }

    #[test]
    fn test_render_command_line() {
        let args = Args::try_parse_from([
            "vemtl",
            "render",
            "page.vemtl",
            "--data",
            "{\"name\": \"Ann\"}",
            "--import",
            "card=card.vemtl",
            "--async",
            "-o",
            "out.txt",
        ])
        .unwrap();

        match args.command {
            Commands::Render {
                file,
                data,
                imports,
                use_async,
                output,
                name,
            } => {
                assert_eq!(file, PathBuf::from("page.vemtl"));
                assert_eq!(data.as_deref(), Some("{\"name\": \"Ann\"}"));
                assert_eq!(imports.imports, vec!["card=card.vemtl"]);
                assert!(use_async);
                assert_eq!(output, Some(PathBuf::from("out.txt")));
                assert!(name.is_none());
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_inspect_flags() {
        let args = Args::try_parse_from(["vemtl", "inspect", "page.vemtl", "--code", "--data"]).unwrap();
        match args.command {
            Commands::Inspect {
                show_code,
                show_imports,
                show_data,
                ..
            } => {
                assert!(show_code);
                assert!(!show_imports);
                assert!(show_data);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }
}

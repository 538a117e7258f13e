// ABOUTME: Configuration management for the vemtl command line tool
// ABOUTME: Handles loading and merging configuration from files and environment variables

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Default directory of importable templates.
    #[serde(default)]
    pub imports_dir: Option<PathBuf>,

    /// Treat every rendered template as an indent-back region.
    #[serde(default)]
    pub indent_back: bool,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from file path or default locations
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p,
            None => Self::find_config_file(),
        };

        let mut config = if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path)?;
            serde_yaml::from_str(&contents)?
        } else {
            Config::default()
        };

        config.merge_env();
        Ok(config)
    }

    /// Find configuration file in standard locations
    fn find_config_file() -> PathBuf {
        let possible_paths = [
            PathBuf::from("vemtl.yaml"),
            PathBuf::from("vemtl.yml"),
            PathBuf::from(".vemtl.yaml"),
            PathBuf::from(".vemtl.yml"),
        ];

        // Check current directory
        for path in possible_paths {
            if path.exists() {
                return path;
            }
        }

        // Check home directory
        if let Some(home_dir) = dirs::home_dir() {
            let home_config = home_dir.join(".vemtl").join("config.yaml");
            if home_config.exists() {
                return home_config;
            }
        }

        // Return default path (may not exist)
        PathBuf::from("vemtl.yaml")
    }

    /// Merge environment variables into configuration
    fn merge_env(&mut self) {
        self.merge_vars(|key| std::env::var(key).ok());
    }

    fn merge_vars<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(level) = lookup("VEMTL_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = lookup("VEMTL_LOG_FORMAT") {
            self.logging.format = format;
        }
        if let Some(dir) = lookup("VEMTL_IMPORTS_DIR") {
            self.imports_dir = Some(PathBuf::from(dir));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_load_from_file() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("vemtl.yaml");
        fs::write(
            &config_path,
            "imports_dir: ./partials\nindent_back: true\nlogging:\n  level: debug\n  format: compact\n",
        )
        .unwrap();

        let config = Config::load(Some(config_path)).unwrap();
        assert!(config.indent_back);
        assert_eq!(config.logging.format, "compact");
        assert!(config.imports_dir.is_some());
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let temp_dir = tempdir().unwrap();
        let config = Config::load(Some(temp_dir.path().join("absent.yaml"))).unwrap();
        assert!(!config.indent_back);
        assert_eq!(config.logging.format, "pretty");
    }

    #[test]
    fn test_environment_overrides() {
        let vars: HashMap<&str, &str> = [
            ("VEMTL_LOG_LEVEL", "trace"),
            ("VEMTL_IMPORTS_DIR", "/srv/templates"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.merge_vars(|key| vars.get(key).map(|value| value.to_string()));

        assert_eq!(config.logging.level, "trace");
        assert_eq!(config.logging.format, "pretty");
        assert_eq!(config.imports_dir, Some(PathBuf::from("/srv/templates")));
    }
}

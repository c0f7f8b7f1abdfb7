//! Configuration for Parsaur.
//!
//! Loads settings from `.parsaur.toml` in the workspace root, then lets
//! `PARSAUR_*` environment variables override individual keys.
//! Uses figment for layered configuration with provenance tracking.

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Name of the configuration file looked up in the workspace root.
pub const CONFIG_FILE: &str = ".parsaur.toml";

/// Default directories to exclude from discovery.
pub const DEFAULT_EXCLUDE_DIRS: &[&str] = &[".git", ".vs", ".vscode", ".idea", "node_modules", "out", "target"];

/// Parsaur configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Additional directories to exclude from discovery (merged with defaults).
    #[serde(default)]
    pub exclude_dirs: Vec<String>,

    /// Whether to respect .gitignore files during discovery (default: true).
    #[serde(default = "default_respect_gitignore")]
    pub respect_gitignore: bool,

    /// File extensions treated as definitions source (default: `["mql"]`).
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,

    /// Stop discovery after this many files.
    #[serde(default)]
    pub max_files: Option<usize>,

    /// Diagnostics kept per file after sorting by position (default: 1000).
    #[serde(default = "default_max_diagnostics")]
    pub max_diagnostics_per_file: usize,

    /// Quiet period before a burst of file changes triggers a rebuild (default: 200).
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            exclude_dirs: Vec::new(),
            respect_gitignore: default_respect_gitignore(),
            extensions: default_extensions(),
            max_files: None,
            max_diagnostics_per_file: default_max_diagnostics(),
            debounce_ms: default_debounce_ms(),
        }
    }
}

fn default_respect_gitignore() -> bool {
    true
}

fn default_extensions() -> Vec<String> {
    vec![crate::parse::SOURCE_EXTENSION.to_string()]
}

fn default_max_diagnostics() -> usize {
    1000
}

fn default_debounce_ms() -> u64 {
    200
}

impl Config {
    /// Load configuration for the workspace rooted at `root`.
    ///
    /// Returns defaults if the file doesn't exist. Invalid settings are
    /// reported (figment includes file and key) and defaults are used.
    pub fn load(root: &Path) -> Self {
        let config_path = root.join(CONFIG_FILE);

        // defaults <- toml file <- environment
        let figment = Figment::from(Serialized::defaults(Config::default()));
        let figment = if config_path.exists() {
            figment.merge(Toml::file(&config_path))
        } else {
            figment
        };
        let figment = figment.merge(Env::prefixed("PARSAUR_"));

        match figment.extract() {
            Ok(config) => {
                if config_path.exists() {
                    tracing::info!("Loaded config from {:?}", config_path);
                }
                config
            }
            Err(e) => {
                tracing::warn!("Config error: {}", e);
                Self::default()
            }
        }
    }

    /// Get all directories to exclude (defaults + user-configured).
    pub fn excluded_dirs(&self) -> Vec<&str> {
        let mut dirs: Vec<&str> = DEFAULT_EXCLUDE_DIRS.to_vec();
        for dir in &self.exclude_dirs {
            if !dirs.contains(&dir.as_str()) {
                dirs.push(dir.as_str());
            }
        }
        dirs
    }

    /// Whether `path` has one of the configured source extensions.
    pub fn is_source_file(&self, path: &Path) -> bool {
        crate::watch::is_source_file(path, &self.extensions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.exclude_dirs.is_empty());
        assert_eq!(config.extensions, vec!["mql"]);
        assert_eq!(config.max_diagnostics_per_file, 1000);
        assert_eq!(config.debounce_ms, 200);
        let excluded = config.excluded_dirs();
        assert!(excluded.contains(&".git"));
        assert!(excluded.contains(&"node_modules"));
    }

    #[test]
    fn test_load_missing_config() {
        let temp = TempDir::new().unwrap();
        let config = Config::load(temp.path());
        assert!(config.exclude_dirs.is_empty());
        assert!(config.respect_gitignore);
    }

    #[test]
    fn test_load_config() {
        let temp = TempDir::new().unwrap();
        let config_content = r#"
exclude_dirs = ["generated", "legacy"]
extensions = ["mql", "prs"]
max_files = 50
"#;
        std::fs::write(temp.path().join(CONFIG_FILE), config_content).unwrap();

        let config = Config::load(temp.path());
        assert_eq!(config.exclude_dirs, vec!["generated", "legacy"]);
        assert_eq!(config.max_files, Some(50));

        let excluded = config.excluded_dirs();
        assert!(excluded.contains(&"legacy"));
        assert!(excluded.contains(&".git")); // default still present
        assert!(config.is_source_file(Path::new("a/b.prs")));
    }

    #[test]
    fn test_invalid_config_returns_defaults() {
        let temp = TempDir::new().unwrap();
        let config_content = r#"
max_diagnostics_per_file = "lots"
"#;
        std::fs::write(temp.path().join(CONFIG_FILE), config_content).unwrap();

        let config = Config::load(temp.path());
        assert_eq!(config.max_diagnostics_per_file, 1000);
    }

    #[test]
    fn test_partial_config_merges_with_defaults() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join(CONFIG_FILE), "respect_gitignore = false\n").unwrap();

        let config = Config::load(temp.path());
        assert!(!config.respect_gitignore);
        assert_eq!(config.debounce_ms, 200);
        assert!(config.exclude_dirs.is_empty());
    }

    #[test]
    fn test_is_source_file() {
        let config = Config::default();
        assert!(config.is_source_file(Path::new("defs/shop.mql")));
        assert!(config.is_source_file(Path::new("defs/SHOP.MQL")));
        assert!(!config.is_source_file(Path::new("defs/shop.txt")));
        assert!(!config.is_source_file(Path::new("defs/mql")));
    }
}

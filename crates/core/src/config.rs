//! Process-level configuration for newsrag.
//!
//! Settings are merged from several sources, later ones winning:
//! - Defaults
//! - Environment variables
//! - The workspace config file (`.newsrag/config.yaml`)
//! - Command-line flags
//!
//! Retrieval settings (file names, index structure, embedding provider) live
//! in the retrieval crate's own `IndexConfig`; this struct only carries what
//! every command needs before that config can be located.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{AppError, AppResult};

/// Name of the per-workspace state directory.
pub const DATA_DIR_NAME: &str = ".newsrag";

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Path to the workspace root (contains .newsrag/)
    pub workspace: PathBuf,

    /// Optional config file path
    pub config_file: Option<PathBuf>,

    /// Log level override
    pub log_level: Option<String>,

    /// Verbose mode (enables debug logging)
    pub verbose: bool,

    /// Disable colored output
    pub no_color: bool,
}

/// Full configuration file structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ConfigFile {
    workspace: Option<WorkspaceConfig>,
    logging: Option<LoggingConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WorkspaceConfig {
    path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LoggingConfig {
    level: Option<String>,
    color: Option<bool>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            workspace: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            config_file: None,
            log_level: None,
            verbose: false,
            no_color: false,
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables and defaults.
    ///
    /// Environment variables:
    /// - `NEWSRAG_WORKSPACE`: Override workspace path
    /// - `NEWSRAG_CONFIG`: Path to config file
    /// - `RUST_LOG`: Log level
    /// - `NO_COLOR`: Disable colored output
    ///
    /// # Example
    /// ```no_run
    /// use newsrag_core::config::AppConfig;
    ///
    /// let config = AppConfig::load().expect("Failed to load config");
    /// println!("Workspace: {:?}", config.workspace);
    /// ```
    pub fn load() -> AppResult<Self> {
        let mut config = Self::default();

        if let Ok(workspace) = std::env::var("NEWSRAG_WORKSPACE") {
            config.workspace = PathBuf::from(workspace);
        }

        if let Ok(config_file) = std::env::var("NEWSRAG_CONFIG") {
            config.config_file = Some(PathBuf::from(config_file));
        }

        let config_path = match config.config_file {
            Some(ref cf) => cf.clone(),
            None => config.data_dir().join("config.yaml"),
        };

        if config_path.exists() {
            config = config.merge_yaml(&config_path)?;
        }

        // Environment variables override YAML config
        if let Ok(level) = std::env::var("RUST_LOG") {
            config.log_level = Some(level);
        }

        if std::env::var("NO_COLOR").is_ok() {
            config.no_color = true;
        }

        Ok(config)
    }

    /// Merge a YAML configuration file into this config.
    fn merge_yaml(&self, path: &Path) -> AppResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            AppError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;

        let config_file: ConfigFile = serde_yaml::from_str(&contents).map_err(|e| {
            AppError::Config(format!("Failed to parse config file {:?}: {}", path, e))
        })?;

        let mut result = self.clone();

        if let Some(path) = config_file.workspace.and_then(|ws| ws.path) {
            result.workspace = PathBuf::from(path);
        }

        if let Some(logging) = config_file.logging {
            if let Some(level) = logging.level {
                result.log_level = Some(level);
            }
            if let Some(color) = logging.color {
                result.no_color = !color;
            }
        }

        Ok(result)
    }

    /// Apply CLI overrides to the configuration.
    ///
    /// CLI flags take precedence over environment variables and the config file.
    pub fn with_overrides(
        mut self,
        workspace: Option<PathBuf>,
        config_file: Option<PathBuf>,
        log_level: Option<String>,
        verbose: bool,
        no_color: bool,
    ) -> AppResult<Self> {
        if let Some(config_file) = config_file {
            if self.config_file.as_ref() != Some(&config_file) {
                self = self.merge_yaml(&config_file)?;
            }
            self.config_file = Some(config_file);
        }

        if let Some(workspace) = workspace {
            self.workspace = workspace;
        }

        if let Some(log_level) = log_level {
            self.log_level = Some(log_level);
        }

        if verbose {
            self.verbose = true;
            // Verbose mode implies debug logging
            if self.log_level.is_none() {
                self.log_level = Some("debug".to_string());
            }
        }

        if no_color {
            self.no_color = true;
        }

        Ok(self)
    }

    /// Get the path to the .newsrag directory.
    pub fn data_dir(&self) -> PathBuf {
        self.workspace.join(DATA_DIR_NAME)
    }

    /// Ensure the workspace exists and the .newsrag directory is present.
    pub fn ensure_data_dir(&self) -> AppResult<()> {
        if !self.workspace.exists() {
            return Err(AppError::Config(format!(
                "Workspace directory does not exist: {:?}",
                self.workspace
            )));
        }

        let data_dir = self.data_dir();
        if !data_dir.exists() {
            std::fs::create_dir_all(&data_dir).map_err(|e| {
                AppError::Config(format!("Failed to create {} directory: {}", DATA_DIR_NAME, e))
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert!(!config.verbose);
        assert!(!config.no_color);
        assert!(config.config_file.is_none());
    }

    #[test]
    fn test_data_dir() {
        let config = AppConfig::default();
        assert!(config.data_dir().ends_with(".newsrag"));
    }

    #[test]
    fn test_with_overrides() {
        let temp = TempDir::new().unwrap();
        let config = AppConfig::default()
            .with_overrides(Some(temp.path().to_path_buf()), None, None, true, false)
            .unwrap();

        assert_eq!(config.workspace, temp.path());
        assert!(config.verbose);
        assert_eq!(config.log_level, Some("debug".to_string()));
    }

    #[test]
    fn test_explicit_log_level_wins_over_verbose() {
        let config = AppConfig::default()
            .with_overrides(None, None, Some("warn".to_string()), true, false)
            .unwrap();
        assert_eq!(config.log_level, Some("warn".to_string()));
    }

    #[test]
    fn test_merge_yaml_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.yaml");
        std::fs::write(&path, "logging:\n  level: trace\n  color: false\n").unwrap();

        let config = AppConfig::default()
            .with_overrides(None, Some(path.clone()), None, false, false)
            .unwrap();

        assert_eq!(config.log_level, Some("trace".to_string()));
        assert!(config.no_color);
        assert_eq!(config.config_file, Some(path));
    }

    #[test]
    fn test_ensure_data_dir_creates_directory() {
        let temp = TempDir::new().unwrap();
        let config = AppConfig::default()
            .with_overrides(Some(temp.path().to_path_buf()), None, None, false, false)
            .unwrap();

        config.ensure_data_dir().unwrap();
        assert!(temp.path().join(".newsrag").is_dir());
    }

    #[test]
    fn test_ensure_data_dir_missing_workspace() {
        let config = AppConfig::default()
            .with_overrides(
                Some(PathBuf::from("/definitely/not/here")),
                None,
                None,
                false,
                false,
            )
            .unwrap();
        assert!(config.ensure_data_dir().is_err());
    }
}

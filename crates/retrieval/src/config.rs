//! Retrieval configuration.
//!
//! One `IndexConfig` is built at process start and handed by reference to
//! the record store, the vector index and the query service.

use crate::embeddings::EmbeddingConfig;
use newsrag_core::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Config file name inside the data directory.
pub const CONFIG_FILE_NAME: &str = "index.yaml";

/// Settings for the record store, vector index and embedding provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexConfig {
    /// Directory holding every persisted file. Not serialized: always the
    /// directory the config was loaded from.
    #[serde(skip)]
    pub data_dir: PathBuf,

    #[serde(default = "default_database_file")]
    pub database_file: String,

    #[serde(default = "default_index_file")]
    pub index_file: String,

    #[serde(default = "default_mapping_file")]
    pub mapping_file: String,

    /// Rebuilds with more vectors than this produce a partitioned index
    #[serde(default = "default_flat_threshold")]
    pub flat_threshold: usize,

    /// Upper bound on partition count
    #[serde(default = "default_max_partitions")]
    pub max_partitions: usize,

    /// Partitions probed per search
    #[serde(default = "default_nprobe")]
    pub nprobe: usize,

    /// k-means iterations when training partitions
    #[serde(default = "default_kmeans_iterations")]
    pub kmeans_iterations: usize,

    /// Results returned when the caller does not ask for a count
    #[serde(default = "default_top_k")]
    pub default_top_k: usize,

    #[serde(default)]
    pub embedding: EmbeddingConfig,
}

fn default_database_file() -> String {
    "news.sqlite".to_string()
}

fn default_index_file() -> String {
    "vectors.idx".to_string()
}

fn default_mapping_file() -> String {
    "positions.json".to_string()
}

fn default_flat_threshold() -> usize {
    1000
}

fn default_max_partitions() -> usize {
    100
}

fn default_nprobe() -> usize {
    10
}

fn default_kmeans_iterations() -> usize {
    10
}

fn default_top_k() -> usize {
    5
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(newsrag_core::config::DATA_DIR_NAME),
            database_file: default_database_file(),
            index_file: default_index_file(),
            mapping_file: default_mapping_file(),
            flat_threshold: default_flat_threshold(),
            max_partitions: default_max_partitions(),
            nprobe: default_nprobe(),
            kmeans_iterations: default_kmeans_iterations(),
            default_top_k: default_top_k(),
            embedding: EmbeddingConfig::default(),
        }
    }
}

impl IndexConfig {
    /// Default configuration rooted at `data_dir`.
    pub fn in_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Default::default()
        }
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(&self.database_file)
    }

    pub fn index_path(&self) -> PathBuf {
        self.data_dir.join(&self.index_file)
    }

    pub fn mapping_path(&self) -> PathBuf {
        self.data_dir.join(&self.mapping_file)
    }

    pub fn config_path(&self) -> PathBuf {
        self.data_dir.join(CONFIG_FILE_NAME)
    }

    /// Embedding dimension every stored and indexed vector must have.
    pub fn dimensions(&self) -> usize {
        self.embedding.dimensions
    }

    pub fn validate(&self) -> AppResult<()> {
        self.embedding.validate()?;
        if self.max_partitions == 0 {
            return Err(AppError::Config("max_partitions must be at least 1".to_string()));
        }
        if self.nprobe == 0 {
            return Err(AppError::Config("nprobe must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// Load the retrieval config from `<data_dir>/index.yaml`.
///
/// Falls back to defaults when the file does not exist.
pub fn load_config(data_dir: &Path) -> AppResult<IndexConfig> {
    let config_path = data_dir.join(CONFIG_FILE_NAME);

    let mut config = if config_path.exists() {
        let content = fs::read_to_string(&config_path).map_err(|e| {
            AppError::Config(format!("Failed to read config at {:?}: {}", config_path, e))
        })?;

        let config: IndexConfig = serde_yaml::from_str(&content).map_err(|e| {
            AppError::Config(format!("Failed to parse config at {:?}: {}", config_path, e))
        })?;

        tracing::debug!("Loaded index config from {:?}", config_path);
        config
    } else {
        tracing::debug!(
            "No index config at {:?}, using defaults",
            config_path
        );
        IndexConfig::default()
    };

    config.data_dir = data_dir.to_path_buf();
    config.validate()?;
    Ok(config)
}

/// Write the config to `<data_dir>/index.yaml`.
pub fn save_config(config: &IndexConfig) -> AppResult<()> {
    fs::create_dir_all(&config.data_dir).map_err(|e| {
        AppError::Config(format!("Failed to create data directory: {}", e))
    })?;

    let yaml = serde_yaml::to_string(config)?;
    let config_path = config.config_path();
    fs::write(&config_path, yaml).map_err(|e| {
        AppError::Config(format!("Failed to write config to {:?}: {}", config_path, e))
    })?;

    tracing::debug!("Saved index config to {:?}", config_path);
    Ok(())
}

//! Configuration management for Turnstore.
//!
//! This module handles loading and merging configuration from multiple sources:
//! - Built-in defaults
//! - Config file (`<directory>/config.yaml`)
//! - Environment variables
//! - Command-line flags
//!
//! The storage directory is the unit of configuration: it holds the record log,
//! the vector index, the lock file and (optionally) the config file.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{AppError, AppResult};

/// Default number of log bytes accumulated before a chunk is embedded.
pub const DEFAULT_CHUNK_SIZE_BYTES: u32 = 10240;

/// Default number of results returned by a query.
pub const DEFAULT_TOP_K: u32 = 5;

/// Embedding providers understood by the store.
pub const KNOWN_PROVIDERS: [&str; 2] = ["trigram", "ollama"];

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Storage directory (record log, vector index, lock file)
    pub directory: PathBuf,

    /// Optional config file path
    pub config_file: Option<PathBuf>,

    /// Log bytes accumulated before a chunk is embedded and indexed
    pub chunk_size_bytes: u32,

    /// Number of results returned by `query` when not overridden
    pub top_k: u32,

    /// Buffered index batches that trigger a disk flush (0 = only on close)
    pub index_flush_interval: u32,

    /// Embedding provider settings
    pub embedding: EmbeddingSettings,

    /// Log level override
    pub log_level: Option<String>,

    /// Verbose mode (enables debug logging)
    pub verbose: bool,

    /// Disable colored output
    pub no_color: bool,
}

/// Embedding provider settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmbeddingSettings {
    /// Provider name: "trigram" or "ollama"
    pub provider: String,

    /// Model identifier (provider-specific)
    pub model: String,

    /// Embedding vector dimensions
    pub dimensions: usize,

    /// Provider endpoint (Ollama base URL)
    pub endpoint: Option<String>,

    /// Maximum batch size for embedding requests
    #[serde(rename = "batchSize")]
    pub batch_size: usize,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            provider: "trigram".to_string(), // Offline default
            model: "trigram-v1".to_string(),
            dimensions: 384,
            endpoint: None,
            batch_size: 32,
        }
    }
}

/// Full configuration file structure. Every key is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ConfigFile {
    store: Option<StoreSection>,
    embedding: Option<EmbeddingSection>,
    logging: Option<LoggingSection>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoreSection {
    #[serde(rename = "chunkSizeBytes")]
    chunk_size_bytes: Option<u32>,
    #[serde(rename = "topK")]
    top_k: Option<u32>,
    #[serde(rename = "indexFlushInterval")]
    index_flush_interval: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct EmbeddingSection {
    provider: Option<String>,
    model: Option<String>,
    dimensions: Option<usize>,
    endpoint: Option<String>,
    #[serde(rename = "batchSize")]
    batch_size: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct LoggingSection {
    level: Option<String>,
    color: Option<bool>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            directory: std::env::current_dir()
                .unwrap_or_else(|_| PathBuf::from("."))
                .join(".turnstore"),
            config_file: None,
            chunk_size_bytes: DEFAULT_CHUNK_SIZE_BYTES,
            top_k: DEFAULT_TOP_K,
            index_flush_interval: 1,
            embedding: EmbeddingSettings::default(),
            log_level: None,
            verbose: false,
            no_color: false,
        }
    }
}

impl AppConfig {
    /// Load configuration from defaults, the YAML config file and environment variables.
    ///
    /// Environment variables:
    /// - `TURNSTORE_DIR`: Storage directory
    /// - `TURNSTORE_CONFIG`: Path to config file
    /// - `TURNSTORE_CHUNK_SIZE`: Chunk size in bytes
    /// - `TURNSTORE_EMBEDDING_PROVIDER`: Embedding provider
    /// - `TURNSTORE_EMBEDDING_MODEL`: Embedding model
    /// - `RUST_LOG`: Log level
    /// - `NO_COLOR`: Disable colored output
    ///
    /// # Example
    /// ```no_run
    /// use turnstore_core::config::AppConfig;
    ///
    /// let config = AppConfig::load().expect("Failed to load config");
    /// println!("Directory: {:?}", config.directory);
    /// ```
    pub fn load() -> AppResult<Self> {
        let mut config = Self::default();

        if let Ok(directory) = std::env::var("TURNSTORE_DIR") {
            config.directory = PathBuf::from(directory);
        }

        if let Ok(config_file) = std::env::var("TURNSTORE_CONFIG") {
            config.config_file = Some(PathBuf::from(config_file));
        }

        let config_path = config.config_path();
        if config_path.exists() {
            config = config.merge_yaml(&config_path)?;
        }

        // Environment variables override YAML config
        if let Ok(chunk_size) = std::env::var("TURNSTORE_CHUNK_SIZE") {
            config.chunk_size_bytes = chunk_size.parse().map_err(|_| {
                AppError::Config(format!("Invalid TURNSTORE_CHUNK_SIZE: {}", chunk_size))
            })?;
        }

        if let Ok(provider) = std::env::var("TURNSTORE_EMBEDDING_PROVIDER") {
            config.embedding.provider = provider;
        }

        if let Ok(model) = std::env::var("TURNSTORE_EMBEDDING_MODEL") {
            config.embedding.model = model;
        }

        if let Ok(level) = std::env::var("RUST_LOG") {
            config.log_level = Some(level);
        }

        if std::env::var("NO_COLOR").is_ok() {
            config.no_color = true;
        }

        Ok(config)
    }

    /// Path of the YAML config file in effect.
    pub fn config_path(&self) -> PathBuf {
        self.config_file
            .clone()
            .unwrap_or_else(|| self.directory.join("config.yaml"))
    }

    /// Merge YAML configuration file into this config.
    fn merge_yaml(&self, path: &Path) -> AppResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            AppError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;

        let config_file: ConfigFile = serde_yaml::from_str(&contents).map_err(|e| {
            AppError::Config(format!("Failed to parse config file {:?}: {}", path, e))
        })?;

        let mut result = self.clone();

        if let Some(store) = config_file.store {
            if let Some(chunk_size) = store.chunk_size_bytes {
                result.chunk_size_bytes = chunk_size;
            }
            if let Some(top_k) = store.top_k {
                result.top_k = top_k;
            }
            if let Some(interval) = store.index_flush_interval {
                result.index_flush_interval = interval;
            }
        }

        if let Some(embedding) = config_file.embedding {
            if let Some(provider) = embedding.provider {
                result.embedding.provider = provider;
            }
            if let Some(model) = embedding.model {
                result.embedding.model = model;
            }
            if let Some(dimensions) = embedding.dimensions {
                result.embedding.dimensions = dimensions;
            }
            if embedding.endpoint.is_some() {
                result.embedding.endpoint = embedding.endpoint;
            }
            if let Some(batch_size) = embedding.batch_size {
                result.embedding.batch_size = batch_size;
            }
        }

        if let Some(logging) = config_file.logging {
            if let Some(level) = logging.level {
                result.log_level = Some(level);
            }
            if let Some(color) = logging.color {
                result.no_color = !color;
            }
        }

        tracing::debug!("Merged config file {:?}", path);
        Ok(result)
    }

    /// Apply CLI overrides to the configuration.
    ///
    /// CLI flags take precedence over environment variables and the config file.
    pub fn with_overrides(
        mut self,
        directory: Option<PathBuf>,
        config_file: Option<PathBuf>,
        log_level: Option<String>,
        verbose: bool,
        no_color: bool,
    ) -> Self {
        if let Some(directory) = directory {
            self.directory = directory;
        }

        if let Some(config_file) = config_file {
            self.config_file = Some(config_file);
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

        self
    }

    /// Re-read the config file after CLI overrides may have moved the directory.
    pub fn reload_file(self) -> AppResult<Self> {
        let path = self.config_path();
        if path.exists() {
            self.merge_yaml(&path)
        } else {
            Ok(self)
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> AppResult<()> {
        if self.chunk_size_bytes == 0 {
            return Err(AppError::Config(
                "chunk_size_bytes must be greater than zero".to_string(),
            ));
        }

        if self.embedding.dimensions == 0 {
            return Err(AppError::Config(
                "embedding dimensions must be greater than zero".to_string(),
            ));
        }

        if self.embedding.batch_size == 0 {
            return Err(AppError::Config(
                "embedding batch size must be greater than zero".to_string(),
            ));
        }

        if !KNOWN_PROVIDERS.contains(&self.embedding.provider.as_str()) {
            return Err(AppError::Config(format!(
                "Unknown embedding provider: {}. Supported: {}",
                self.embedding.provider,
                KNOWN_PROVIDERS.join(", ")
            )));
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
        assert_eq!(config.chunk_size_bytes, 10240);
        assert_eq!(config.top_k, 5);
        assert_eq!(config.embedding.provider, "trigram");
        assert!(config.directory.ends_with(".turnstore"));
        assert!(!config.verbose);
    }

    #[test]
    fn test_with_overrides() {
        let config = AppConfig::default();
        let overridden = config.with_overrides(
            Some(PathBuf::from("/tmp/elsewhere")),
            None,
            None,
            true,
            false,
        );

        assert_eq!(overridden.directory, PathBuf::from("/tmp/elsewhere"));
        assert!(overridden.verbose);
        assert_eq!(overridden.log_level, Some("debug".to_string()));
        assert_eq!(
            overridden.config_path(),
            PathBuf::from("/tmp/elsewhere/config.yaml")
        );
    }

    #[test]
    fn test_merge_yaml() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.yaml");
        std::fs::write(
            &path,
            "store:\n  chunkSizeBytes: 512\n  topK: 3\nembedding:\n  provider: ollama\n  model: nomic-embed-text\n  dimensions: 768\nlogging:\n  color: false\n",
        )
        .unwrap();

        let config = AppConfig::default().merge_yaml(&path).unwrap();
        assert_eq!(config.chunk_size_bytes, 512);
        assert_eq!(config.top_k, 3);
        assert_eq!(config.embedding.provider, "ollama");
        assert_eq!(config.embedding.dimensions, 768);
        assert_eq!(config.embedding.batch_size, 32);
        assert!(config.no_color);
    }

    #[test]
    fn test_merge_yaml_invalid() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.yaml");
        std::fs::write(&path, "store: [unclosed").unwrap();

        let result = AppConfig::default().merge_yaml(&path);
        assert!(matches!(result, Err(AppError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_zero_chunk_size() {
        let config = AppConfig {
            chunk_size_bytes: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_unknown_provider() {
        let mut config = AppConfig::default();
        config.embedding.provider = "unknown".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_default() {
        assert!(AppConfig::default().validate().is_ok());
    }
}

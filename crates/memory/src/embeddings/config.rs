//! Embedding configuration and the per-store embedding identity file.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use turnstore_core::config::EmbeddingSettings;
use turnstore_core::{AppError, AppResult};

use super::EmbeddingProvider;

/// Identity file recording which model produced a store's index.
pub const IDENTITY_FILE_NAME: &str = "embedding.json";

/// Embedding configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmbeddingConfig {
    /// Provider name: "trigram" or "ollama"
    pub provider: String,

    /// Model identifier (provider-specific)
    pub model: String,

    /// Embedding vector dimensions
    pub dimensions: usize,

    /// Provider endpoint (Ollama base URL)
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Maximum batch size for embedding requests
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

fn default_batch_size() -> usize {
    32
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "trigram".to_string(),
            model: "trigram-v1".to_string(),
            dimensions: 384,
            endpoint: None,
            batch_size: default_batch_size(),
        }
    }
}

impl From<&EmbeddingSettings> for EmbeddingConfig {
    fn from(settings: &EmbeddingSettings) -> Self {
        Self {
            provider: settings.provider.clone(),
            model: settings.model.clone(),
            dimensions: settings.dimensions,
            endpoint: settings.endpoint.clone(),
            batch_size: settings.batch_size,
        }
    }
}

impl EmbeddingConfig {
    /// Describe a live provider.
    pub fn from_provider(provider: &dyn EmbeddingProvider) -> Self {
        Self {
            provider: provider.provider_name().to_string(),
            model: provider.model_name().to_string(),
            dimensions: provider.dimensions(),
            ..Default::default()
        }
    }

    /// Path of the identity file in a storage directory.
    pub fn identity_path(directory: &Path) -> PathBuf {
        directory.join(IDENTITY_FILE_NAME)
    }

    /// Load the identity recorded for a storage directory, if any.
    pub fn load_identity(directory: &Path) -> AppResult<Option<Self>> {
        let path = Self::identity_path(directory);
        if !path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&path)?;
        let config = serde_json::from_str(&content).map_err(|e| {
            AppError::Format(format!("Failed to parse embedding identity {:?}: {}", path, e))
        })?;
        Ok(Some(config))
    }

    /// Record this configuration as the storage directory's identity.
    pub fn save_identity(&self, directory: &Path) -> AppResult<()> {
        let path = Self::identity_path(directory);
        let json = serde_json::to_string_pretty(self)?;
        fs::write(&path, json)?;

        tracing::debug!(
            "Saved embedding identity {}/{} ({} dims) to {:?}",
            self.provider,
            self.model,
            self.dimensions,
            path
        );
        Ok(())
    }

    /// Validate that another config produces vectors comparable with this one.
    pub fn validate_consistency(&self, other: &Self) -> AppResult<()> {
        if self.provider != other.provider {
            return Err(AppError::Config(format!(
                "Provider mismatch: index built with '{}', got '{}'",
                self.provider, other.provider
            )));
        }

        if self.model != other.model {
            return Err(AppError::Config(format!(
                "Model mismatch: index built with '{}', got '{}'",
                self.model, other.model
            )));
        }

        if self.dimensions != other.dimensions {
            return Err(AppError::Config(format!(
                "Dimension mismatch: index built with {}, got {}",
                self.dimensions, other.dimensions
            )));
        }

        Ok(())
    }
}

//! Command handlers for the turnstore CLI.
//!
//! Commands open the store, run, and close it. `stats` only inspects the
//! files and never calls the embedding provider.

pub mod append;
pub mod query;
pub mod rebuild;
pub mod stats;

pub use append::AppendCommand;
pub use query::QueryCommand;
pub use rebuild::RebuildCommand;
pub use stats::StatsCommand;

use std::sync::Arc;
use turnstore_core::{config::AppConfig, AppResult};
use turnstore_memory::{create_provider, EmbeddingConfig, EmbeddingProvider, MemoryStore, StoreOptions};

/// Store options derived from the resolved configuration.
pub fn store_options(config: &AppConfig) -> StoreOptions {
    StoreOptions::new(&config.directory)
        .with_chunk_size(config.chunk_size_bytes)
        .with_index_flush_interval(config.index_flush_interval)
}

pub async fn provider(config: &AppConfig) -> AppResult<Arc<dyn EmbeddingProvider>> {
    let embedding = EmbeddingConfig::from(&config.embedding);
    tracing::debug!(
        "Embedding provider: {}/{} ({} dims)",
        embedding.provider,
        embedding.model,
        embedding.dimensions
    );
    create_provider(&embedding).await
}

pub async fn open_store(config: &AppConfig) -> AppResult<MemoryStore> {
    let provider = provider(config).await?;
    MemoryStore::open(store_options(config), provider)
}

//! Stats command handler.

use clap::Args;
use turnstore_core::{config::AppConfig, AppResult};
use turnstore_memory::MemoryStore;

/// Show store statistics without embedding the open chunk
#[derive(Args, Debug)]
pub struct StatsCommand {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

impl StatsCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        tracing::info!("Executing stats command");

        let stats = MemoryStore::inspect(
            &super::store_options(config),
            config.embedding.dimensions,
        )?;

        if self.json {
            let output = serde_json::json!({
                "directory": config.directory,
                "provider": config.embedding.provider,
                "model": config.embedding.model,
                "logBytes": stats.log_bytes,
                "indexedBytes": stats.indexed_bytes,
                "chunkStart": stats.chunk_start,
                "pendingBytes": stats.pending_bytes,
                "rows": stats.rows,
                "dimensions": stats.dimensions,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        } else {
            println!("Directory:     {}", config.directory.display());
            println!(
                "Embedding:     {}/{} ({} dims)",
                config.embedding.provider, config.embedding.model, stats.dimensions
            );
            println!("Log bytes:     {}", stats.log_bytes);
            println!("Indexed bytes: {}", stats.indexed_bytes);
            println!("Index rows:    {}", stats.rows);
            println!(
                "Open chunk:    {} bytes from offset {}",
                stats.pending_bytes, stats.chunk_start
            );
        }

        Ok(())
    }
}

//! Rebuild command handler.

use clap::Args;
use turnstore_core::{config::AppConfig, AppResult};

/// Discard the index and re-embed the whole record log
#[derive(Args, Debug)]
pub struct RebuildCommand {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

impl RebuildCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        tracing::info!("Executing rebuild command");

        let provider = super::provider(config).await?;
        let options = super::store_options(config);
        let stats =
            turnstore_memory::rebuild_index(&options, provider, config.embedding.batch_size)
                .await?;

        if self.json {
            println!("{}", serde_json::to_string_pretty(&stats)?);
        } else {
            println!(
                "Rebuilt index: {} chunks ({} bytes) in {:.2}s",
                stats.chunks, stats.bytes_replayed, stats.duration_secs
            );
        }

        Ok(())
    }
}

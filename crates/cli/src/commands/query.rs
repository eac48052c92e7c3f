//! Query command handler.

use clap::Args;
use turnstore_core::{config::AppConfig, AppResult};
use turnstore_memory::QueryOptions;

/// Retrieve the chunks most similar to a text
#[derive(Args, Debug)]
pub struct QueryCommand {
    /// Query text
    pub text: String,

    /// Number of chunks to retrieve (default: configured topK)
    #[arg(short = 'k', long)]
    pub top_k: Option<u32>,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

impl QueryCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        let options = QueryOptions {
            top_k: self.top_k.unwrap_or(config.top_k),
        };
        tracing::info!("Executing query command (top_k: {})", options.top_k);

        let mut store = super::open_store(config).await?;
        let result = store.query_with(&self.text, options).await;
        let closed = store.close().await;
        let hits = result?;
        closed?;

        if self.json {
            println!("{}", serde_json::to_string_pretty(&hits)?);
            return Ok(());
        }

        if hits.is_empty() {
            println!("No indexed chunks yet");
            return Ok(());
        }

        for (rank, hit) in hits.iter().enumerate() {
            println!(
                "#{} score {:.3} [{}, {})",
                rank + 1,
                hit.score,
                hit.offset,
                hit.offset + hit.length as u64
            );
            let turns = hit.turns();
            if turns.is_empty() {
                println!("  {}", hit.text.trim_end());
            }
            for turn in turns {
                println!("  {}: {}", turn.role, turn.text);
            }
        }

        Ok(())
    }
}

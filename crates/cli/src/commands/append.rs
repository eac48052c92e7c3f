//! Append command handler.

use clap::Args;
use tokio::io::{AsyncBufReadExt, BufReader};
use turnstore_core::{config::AppConfig, AppResult};
use turnstore_memory::{MemoryStore, Turn};

/// Append turns to the record log
#[derive(Args, Debug)]
pub struct AppendCommand {
    /// Speaker role
    #[arg(short, long, default_value = "user")]
    pub role: String,

    /// Turn text
    #[arg(required_unless_present = "stdin", conflicts_with = "stdin")]
    pub text: Option<String>,

    /// Read turns from standard input, one per line
    #[arg(long)]
    pub stdin: bool,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

impl AppendCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        tracing::info!("Executing append command (role: {})", self.role);

        let mut store = super::open_store(config).await?;
        let result = self.append_all(&mut store).await;
        let closed = store.close().await;
        let appended = result?;
        closed?;

        if self.json {
            let records: Vec<_> = appended
                .iter()
                .map(|(offset, length)| serde_json::json!({ "offset": offset, "length": length }))
                .collect();
            println!("{}", serde_json::to_string_pretty(&records)?);
        } else {
            for (offset, length) in &appended {
                println!("Appended {} turn at offset {} ({} bytes)", self.role, offset, length);
            }
        }

        Ok(())
    }

    async fn append_all(&self, store: &mut MemoryStore) -> AppResult<Vec<(u64, u32)>> {
        let mut appended = Vec::new();

        if let Some(text) = &self.text {
            appended.push(store.append(&Turn::new(&self.role, text)).await?);
            return Ok(appended);
        }

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            appended.push(store.append(&Turn::new(&self.role, line)).await?);
        }

        tracing::debug!("Appended {} turns from stdin", appended.len());
        Ok(appended)
    }
}

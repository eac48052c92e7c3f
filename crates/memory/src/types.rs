//! Memory store type definitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use turnstore_core::{AppError, AppResult};

pub use turnstore_core::config::{DEFAULT_CHUNK_SIZE_BYTES, DEFAULT_TOP_K};

/// One conversational record.
///
/// Serialized as a single JSON object per log line. JSON escapes embedded
/// newlines, so a serialized turn never contains the log terminator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    /// Speaker role (e.g. "user", "assistant")
    pub role: String,

    /// Message text
    pub text: String,

    /// When the turn was recorded
    pub timestamp: DateTime<Utc>,
}

impl Turn {
    /// Create a turn stamped with the current time.
    pub fn new(role: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            text: text.into(),
            timestamp: Utc::now(),
        }
    }

    /// Serialize to one log line (without terminator).
    pub fn to_line(&self) -> AppResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode a log line back into a turn.
    pub fn from_line(line: &str) -> AppResult<Self> {
        serde_json::from_str(line)
            .map_err(|e| AppError::Format(format!("Invalid turn record: {}", e)))
    }
}

/// Store configuration (the embedding provider is passed alongside).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreOptions {
    /// Storage directory, created if absent
    pub directory: PathBuf,

    /// Log bytes accumulated before a chunk is embedded and indexed
    #[serde(default = "default_chunk_size_bytes")]
    pub chunk_size_bytes: u32,

    /// Buffered index batches that trigger a disk flush (0 = only on close)
    #[serde(default = "default_index_flush_interval")]
    pub index_flush_interval: u32,
}

fn default_chunk_size_bytes() -> u32 {
    DEFAULT_CHUNK_SIZE_BYTES
}

fn default_index_flush_interval() -> u32 {
    1
}

impl StoreOptions {
    /// Options for `directory` with default chunking.
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            chunk_size_bytes: default_chunk_size_bytes(),
            index_flush_interval: default_index_flush_interval(),
        }
    }

    /// Override the chunk size threshold.
    pub fn with_chunk_size(mut self, chunk_size_bytes: u32) -> Self {
        self.chunk_size_bytes = chunk_size_bytes;
        self
    }

    /// Override how many buffered batches trigger an index flush.
    pub fn with_index_flush_interval(mut self, interval: u32) -> Self {
        self.index_flush_interval = interval;
        self
    }

    pub(crate) fn validate(&self) -> AppResult<()> {
        if self.chunk_size_bytes == 0 {
            return Err(AppError::Config(
                "chunk_size_bytes must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Options for `MemoryStore::query_with`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct QueryOptions {
    /// Maximum number of hits
    pub top_k: u32,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            top_k: DEFAULT_TOP_K,
        }
    }
}

/// One query result: a chunk of the record log and its similarity score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryHit {
    /// Raw chunk text (one or more serialized turns, newline-terminated)
    pub text: String,

    /// Cosine similarity to the query
    pub score: f64,

    /// Byte offset of the chunk in the record log
    pub offset: u64,

    /// Byte length of the chunk
    pub length: u32,
}

impl QueryHit {
    /// Decode the turns making up this chunk, in log order.
    ///
    /// A record torn by a crash and sealed on reopen can share a chunk with
    /// valid turns; lines that do not decode are skipped with a warning.
    pub fn turns(&self) -> Vec<Turn> {
        let mut line_offset = self.offset;
        let mut turns = Vec::new();

        for line in self.text.split_inclusive('\n') {
            let record = line.trim_end_matches('\n');
            if !record.is_empty() {
                match Turn::from_line(record) {
                    Ok(turn) => turns.push(turn),
                    Err(e) => tracing::warn!(
                        "Skipping undecodable record at log offset {}: {}",
                        line_offset,
                        e
                    ),
                }
            }
            line_offset += line.len() as u64;
        }

        turns
    }
}

/// Snapshot of store state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreStats {
    /// Bytes in the record log
    pub log_bytes: u64,

    /// Exclusive end of the log range covered by index rows
    pub indexed_bytes: u64,

    /// Start of the open chunk
    pub chunk_start: u64,

    /// Bytes appended since the last chunk flush
    pub pending_bytes: u64,

    /// Persisted plus buffered index rows
    pub rows: usize,

    /// Embedding dimensions
    pub dimensions: usize,
}

/// Statistics from an index rebuild.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RebuildStats {
    pub chunks: usize,
    pub bytes_replayed: u64,
    pub duration_secs: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_turn_line_has_no_terminator() {
        let turn = Turn::new("user", "first line\nsecond line");
        let line = turn.to_line().unwrap();
        assert!(!line.contains('\n'));
        assert_eq!(Turn::from_line(&line).unwrap(), turn);
    }

    #[test]
    fn test_turn_from_garbage_is_format_error() {
        let result = Turn::from_line("not json");
        assert!(matches!(result, Err(AppError::Format(_))));
    }

    #[test]
    fn test_query_hit_turns() {
        let a = Turn::new("user", "hello");
        let b = Turn::new("assistant", "hi there");
        let text = format!("{}\n{}\n", a.to_line().unwrap(), b.to_line().unwrap());
        let hit = QueryHit {
            length: text.len() as u32,
            text,
            score: 1.0,
            offset: 0,
        };

        assert_eq!(hit.turns(), vec![a, b]);
    }

    #[test]
    fn test_query_hit_turns_skips_torn_record() {
        let a = Turn::new("user", "before the crash");
        let b = Turn::new("assistant", "after the crash");
        let text = format!(
            "{}\n{{\"role\":\"user\",\"te\n{}\n",
            a.to_line().unwrap(),
            b.to_line().unwrap()
        );
        let hit = QueryHit {
            length: text.len() as u32,
            text,
            score: 0.5,
            offset: 0,
        };

        assert_eq!(hit.turns(), vec![a, b]);
    }

    #[test]
    fn test_store_options_defaults() {
        let options = StoreOptions::new("/tmp/x");
        assert_eq!(options.chunk_size_bytes, 10240);
        assert_eq!(options.index_flush_interval, 1);
        assert!(options.validate().is_ok());
        assert!(options.with_chunk_size(0).validate().is_err());
    }
}

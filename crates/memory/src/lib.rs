//! Durable conversational memory.
//!
//! Turns go to an append-only record log; contiguous runs of the log are
//! embedded and indexed in an Arrow IPC stream file so that similar chunks can
//! be retrieved by brute-force cosine search. The index is derived data and
//! can always be rebuilt from the log.

pub mod embeddings;
pub mod lock;
pub mod rebuild;
pub mod record_log;
pub mod similarity;
pub mod store;
pub mod types;
pub mod vector_index;

#[cfg(test)]
mod tests;

// Re-export commonly used types
pub use embeddings::{create_provider, EmbeddingConfig, EmbeddingProvider};
pub use rebuild::rebuild_index;
pub use store::MemoryStore;
pub use types::{
    QueryHit, QueryOptions, RebuildStats, StoreOptions, StoreStats, Turn,
    DEFAULT_CHUNK_SIZE_BYTES, DEFAULT_TOP_K,
};

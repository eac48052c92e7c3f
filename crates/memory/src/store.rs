//! Memory store: record log, embedding index and chunking glue.
//!
//! Turns are appended to the record log immediately. Log bytes accumulate
//! into the open chunk until `chunk_size_bytes` is reached, at which point the
//! chunk is embedded and indexed before `append` returns. The open chunk
//! (`chunk_start`, `bytes_since_flush`) is recomputed from the files on every
//! open, never persisted.

use crate::embeddings::{EmbeddingConfig, EmbeddingProvider};
use crate::lock::DirectoryLock;
use crate::record_log::RecordLog;
use crate::similarity;
use crate::types::{QueryHit, QueryOptions, StoreOptions, StoreStats, Turn};
use crate::vector_index::{IndexEntry, VectorIndex};
use std::path::Path;
use std::sync::Arc;
use turnstore_core::{AppError, AppResult};

/// Where the open chunk resumes, given the log end and the end of the indexed range.
///
/// An index lagging behind the log means the previous session never embedded
/// its tail; that tail becomes the open chunk.
pub fn resume_point(log_end: u64, indexed_end: u64) -> (u64, u64) {
    if indexed_end < log_end {
        (indexed_end, log_end - indexed_end)
    } else {
        (log_end, 0)
    }
}

/// Durable conversational memory over one storage directory.
#[derive(Debug)]
pub struct MemoryStore {
    options: StoreOptions,
    provider: Arc<dyn EmbeddingProvider>,
    log: RecordLog,
    index: VectorIndex,
    lock: Option<DirectoryLock>,
    chunk_start: u64,
    bytes_since_flush: u64,
    closed: bool,
}

impl MemoryStore {
    /// Open the store, creating the directory if needed, and recover the open chunk.
    pub fn open(options: StoreOptions, provider: Arc<dyn EmbeddingProvider>) -> AppResult<Self> {
        options.validate()?;
        let directory = options.directory.clone();
        std::fs::create_dir_all(&directory)?;

        let lock = DirectoryLock::acquire(&directory)?;

        let identity = EmbeddingConfig::from_provider(provider.as_ref());
        match EmbeddingConfig::load_identity(&directory)? {
            Some(stored) => stored.validate_consistency(&identity)?,
            None => identity.save_identity(&directory)?,
        }

        let log = RecordLog::open(&directory)?;
        let index = VectorIndex::open(&directory, provider.dimensions())?;

        let log_end = log.position();
        let indexed_end = index.last_indexed_end();
        let (chunk_start, bytes_since_flush) = resume_point(log_end, indexed_end);

        if indexed_end > log_end {
            tracing::warn!(
                "Index covers {} bytes but the record log only has {}; queries may fail until the index is rebuilt",
                indexed_end,
                log_end
            );
        } else if bytes_since_flush > 0 {
            tracing::info!(
                "Resuming {} un-indexed log bytes at offset {}",
                bytes_since_flush,
                chunk_start
            );
        }

        tracing::info!(
            "Opened memory store at {:?}: {} log bytes, {} index rows, provider {}/{}",
            directory,
            log_end,
            index.len(),
            provider.provider_name(),
            provider.model_name()
        );

        Ok(Self {
            options,
            provider,
            log,
            index,
            lock: Some(lock),
            chunk_start,
            bytes_since_flush,
            closed: false,
        })
    }

    /// Report store state without embedding anything.
    ///
    /// Takes the directory lock like `open`, but needs no provider: the index
    /// is read with the dimensions recorded in the embedding identity, or
    /// `dimensions` for a store that has none yet. Pending log bytes stay
    /// pending.
    pub fn inspect(options: &StoreOptions, dimensions: usize) -> AppResult<StoreStats> {
        options.validate()?;
        let directory = options.directory.as_path();
        std::fs::create_dir_all(directory)?;

        let lock = DirectoryLock::acquire(directory)?;

        let dimensions = EmbeddingConfig::load_identity(directory)?
            .map(|identity| identity.dimensions)
            .unwrap_or(dimensions);

        let mut log = RecordLog::open(directory)?;
        let mut index = VectorIndex::open(directory, dimensions)?;

        let log_end = log.position();
        let indexed_end = index.last_indexed_end();
        let (chunk_start, pending_bytes) = resume_point(log_end, indexed_end);

        let stats = StoreStats {
            log_bytes: log_end,
            indexed_bytes: indexed_end,
            chunk_start,
            pending_bytes,
            rows: index.len(),
            dimensions,
        };

        index.close()?;
        log.close()?;
        lock.release()?;

        Ok(stats)
    }

    /// Append one turn. Returns the `(offset, length)` of its log record.
    ///
    /// When the open chunk reaches the threshold it is embedded and indexed
    /// before this returns. If embedding fails the turn is still durable and
    /// the chunk stays open for the next threshold crossing, close, or open.
    pub async fn append(&mut self, turn: &Turn) -> AppResult<(u64, u32)> {
        self.ensure_open()?;

        let line = turn.to_line()?;
        let (offset, length) = self.log.append(&line)?;
        self.bytes_since_flush += length as u64;

        tracing::debug!(
            "Appended {} turn at [{}, {}), {} bytes pending",
            turn.role,
            offset,
            offset + length as u64,
            self.bytes_since_flush
        );

        if self.bytes_since_flush >= self.options.chunk_size_bytes as u64 {
            self.flush_chunk().await?;
        }

        Ok((offset, length))
    }

    /// Embed and index the open chunk, then start a new one at the log end.
    async fn flush_chunk(&mut self) -> AppResult<()> {
        if self.bytes_since_flush == 0 {
            return Ok(());
        }

        let length = u32::try_from(self.bytes_since_flush).map_err(|_| {
            AppError::Other(format!(
                "Open chunk of {} bytes exceeds the u32 length range",
                self.bytes_since_flush
            ))
        })?;
        let text = self.read_text(self.chunk_start, length)?;

        let vector = self.provider.embed(&text).await?;
        if vector.len() != self.index.dimensions() {
            return Err(AppError::Embedding(format!(
                "Provider returned {} dimensions, expected {}",
                vector.len(),
                self.index.dimensions()
            )));
        }

        self.index.append(vec![IndexEntry {
            vector,
            offset: self.chunk_start,
            length,
        }])?;

        tracing::debug!(
            "Indexed chunk [{}, {})",
            self.chunk_start,
            self.chunk_start + length as u64
        );

        self.chunk_start = self.log.position();
        self.bytes_since_flush = 0;

        let interval = self.options.index_flush_interval as usize;
        if interval > 0 && self.index.pending_batches() >= interval {
            self.index.flush()?;
        }

        Ok(())
    }

    /// Return the `top_k` chunks most similar to `text`, best first.
    ///
    /// A store with nothing indexed yields an empty list.
    pub async fn query(&self, text: &str, top_k: u32) -> AppResult<Vec<QueryHit>> {
        self.ensure_open()?;
        if top_k == 0 || self.index.is_empty() {
            return Ok(Vec::new());
        }

        let query_vector = self.provider.embed(text).await?;
        let snapshot = self.index.read_all()?;
        if snapshot.is_empty() {
            return Ok(Vec::new());
        }

        if query_vector.len() != self.index.dimensions() {
            return Err(AppError::Embedding(format!(
                "Provider returned {} dimensions for the query, expected {}",
                query_vector.len(),
                self.index.dimensions()
            )));
        }

        let ranked = similarity::top_k(
            &query_vector,
            &snapshot.vectors,
            &snapshot.norms,
            top_k as usize,
        );

        let hits = ranked
            .into_iter()
            .map(|candidate| {
                let offset = snapshot.offsets[candidate.index];
                let length = snapshot.lengths[candidate.index];
                Ok(QueryHit {
                    text: self.read_text(offset, length)?,
                    score: candidate.score,
                    offset,
                    length,
                })
            })
            .collect::<AppResult<Vec<_>>>()?;

        tracing::debug!(
            "Query matched {} of {} chunks (top score: {:.3})",
            hits.len(),
            snapshot.len(),
            hits.first().map(|h| h.score).unwrap_or(0.0)
        );

        Ok(hits)
    }

    /// `query` with options.
    pub async fn query_with(&self, text: &str, options: QueryOptions) -> AppResult<Vec<QueryHit>> {
        self.query(text, options.top_k).await
    }

    /// Index any pending bytes, then release the index, the log and the lock.
    ///
    /// Every handle is released even when the final embed fails; the first
    /// error is returned. Later calls are no-ops.
    pub async fn close(&mut self) -> AppResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let flushed = self.flush_chunk().await;
        if let Err(e) = &flushed {
            tracing::warn!(
                "Final chunk at offset {} left un-indexed: {}",
                self.chunk_start,
                e
            );
        }

        let index_closed = self.index.close();
        let log_closed = self.log.close();
        let unlocked = match self.lock.take() {
            Some(lock) => lock.release(),
            None => Ok(()),
        };

        tracing::info!("Closed memory store at {:?}", self.options.directory);

        flushed?;
        index_closed?;
        log_closed?;
        unlocked
    }

    /// Current state of the log, the index and the open chunk.
    pub fn stats(&self) -> StoreStats {
        StoreStats {
            log_bytes: self.log.position(),
            indexed_bytes: self.index.last_indexed_end(),
            chunk_start: self.chunk_start,
            pending_bytes: self.bytes_since_flush,
            rows: self.index.len(),
            dimensions: self.index.dimensions(),
        }
    }

    /// Start offset of the open chunk.
    pub fn chunk_start(&self) -> u64 {
        self.chunk_start
    }

    /// Log bytes appended since the last chunk flush.
    pub fn bytes_since_flush(&self) -> u64 {
        self.bytes_since_flush
    }

    pub fn directory(&self) -> &Path {
        &self.options.directory
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn read_text(&self, offset: u64, length: u32) -> AppResult<String> {
        let bytes = self.log.read(offset, length)?;
        String::from_utf8(bytes).map_err(|e| {
            AppError::Format(format!(
                "Log range [{}, {}) is not valid UTF-8: {}",
                offset,
                offset + length as u64,
                e
            ))
        })
    }

    fn ensure_open(&self) -> AppResult<()> {
        if self.closed {
            return Err(AppError::Closed);
        }
        Ok(())
    }
}

impl Drop for MemoryStore {
    fn drop(&mut self) {
        if self.closed {
            return;
        }

        tracing::warn!(
            "Memory store at {:?} dropped without close(); {} log bytes stay un-indexed until the next open",
            self.options.directory,
            self.bytes_since_flush
        );

        // Chunks already embedded are worth keeping
        if let Err(e) = self.index.close() {
            tracing::warn!("Failed to flush buffered index rows: {}", e);
        }
    }
}

//! Index rebuild: discard the index and re-derive it from the record log.
//!
//! This is the recovery path for an unreadable index (`AppError::Format`) and
//! for switching embedding models. It is never triggered automatically.

use crate::embeddings::{EmbeddingConfig, EmbeddingProvider};
use crate::lock::DirectoryLock;
use crate::record_log::{RecordLog, TERMINATOR};
use crate::types::{RebuildStats, StoreOptions};
use crate::vector_index::{IndexEntry, VectorIndex, INDEX_FILE_NAME};
use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use turnstore_core::{AppError, AppResult};

/// Byte range of the log embedded as one chunk.
#[derive(Debug, Clone, PartialEq)]
pub struct Window {
    pub offset: u64,
    pub length: u32,
}

/// Split the log into chunk windows at line boundaries.
///
/// A window closes once it holds at least `chunk_size_bytes`; the trailing
/// partial window is included. This matches how `MemoryStore::append` cuts
/// chunks in a session that never failed to embed.
pub fn plan_windows(log_path: &Path, chunk_size_bytes: u32) -> AppResult<Vec<Window>> {
    let file = match File::open(log_path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let threshold = chunk_size_bytes as u64;
    let mut reader = BufReader::new(file);
    let mut windows = Vec::new();
    let mut line = Vec::new();
    let mut start = 0u64;
    let mut accumulated = 0u64;

    loop {
        line.clear();
        let read = reader.read_until(TERMINATOR, &mut line)?;
        if read == 0 {
            break;
        }
        accumulated += read as u64;

        if accumulated >= threshold {
            windows.push(window(start, accumulated)?);
            start += accumulated;
            accumulated = 0;
        }
    }

    if accumulated > 0 {
        windows.push(window(start, accumulated)?);
    }

    Ok(windows)
}

fn window(offset: u64, length: u64) -> AppResult<Window> {
    let length = u32::try_from(length).map_err(|_| {
        AppError::Other(format!(
            "Log window at offset {} spans {} bytes, beyond the u32 length range",
            offset, length
        ))
    })?;
    Ok(Window { offset, length })
}

/// Rebuild the index of the store in `options.directory`.
///
/// Takes the directory lock, so it fails with `AppError::Locked` while a
/// store is open. Windows are embedded `batch_size` at a time and each batch
/// is flushed before the next is embedded.
pub async fn rebuild_index(
    options: &StoreOptions,
    provider: Arc<dyn EmbeddingProvider>,
    batch_size: usize,
) -> AppResult<RebuildStats> {
    options.validate()?;
    let started = Instant::now();
    let directory = options.directory.as_path();
    fs::create_dir_all(directory)?;

    let lock = DirectoryLock::acquire(directory)?;

    let index_path = directory.join(INDEX_FILE_NAME);
    if index_path.exists() {
        tracing::info!("Removing index {:?} for rebuild", index_path);
        fs::remove_file(&index_path)?;
    }

    EmbeddingConfig::from_provider(provider.as_ref()).save_identity(directory)?;

    let mut log = RecordLog::open(directory)?;
    let windows = plan_windows(log.path(), options.chunk_size_bytes)?;
    let bytes_replayed: u64 = windows.iter().map(|w| w.length as u64).sum();

    tracing::info!(
        "Rebuilding index from {} log bytes in {} chunks using {}/{}",
        bytes_replayed,
        windows.len(),
        provider.provider_name(),
        provider.model_name()
    );

    let mut index = VectorIndex::open(directory, provider.dimensions())?;

    for (batch_num, group) in windows.chunks(batch_size.max(1)).enumerate() {
        let texts = group
            .iter()
            .map(|w| read_text(&log, w))
            .collect::<AppResult<Vec<_>>>()?;

        let vectors = provider.embed_batch(&texts).await?;
        if vectors.len() != group.len() {
            return Err(AppError::Embedding(format!(
                "Provider returned {} embeddings for {} chunks",
                vectors.len(),
                group.len()
            )));
        }

        let entries = group
            .iter()
            .zip(vectors)
            .map(|(w, vector)| IndexEntry {
                vector,
                offset: w.offset,
                length: w.length,
            })
            .collect();
        index.append(entries)?;
        index.flush()?;

        tracing::debug!(
            "Rebuild batch {} indexed {} chunks",
            batch_num + 1,
            group.len()
        );
    }

    index.close()?;
    log.close()?;
    lock.release()?;

    let stats = RebuildStats {
        chunks: windows.len(),
        bytes_replayed,
        duration_secs: started.elapsed().as_secs_f64(),
    };

    tracing::info!(
        "Rebuilt index: {} chunks in {:.2}s",
        stats.chunks,
        stats.duration_secs
    );

    Ok(stats)
}

fn read_text(log: &RecordLog, w: &Window) -> AppResult<String> {
    String::from_utf8(log.read(w.offset, w.length)?).map_err(|e| {
        AppError::Format(format!(
            "Log range [{}, {}) is not valid UTF-8: {}",
            w.offset,
            w.offset + w.length as u64,
            e
        ))
    })
}

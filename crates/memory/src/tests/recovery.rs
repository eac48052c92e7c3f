//! Crash recovery, embedding failures and index rebuild.

use super::support::{open_store, turn, RecordingProvider, DIM};
use crate::rebuild::rebuild_index;
use crate::store::MemoryStore;
use crate::record_log::{RecordLog, LOG_FILE_NAME};
use crate::types::StoreOptions;
use crate::vector_index::{IndexEntry, VectorIndex, INDEX_FILE_NAME};
use std::fs;
use tempfile::TempDir;
use turnstore_core::AppError;

fn log_text(options: &StoreOptions) -> String {
    fs::read_to_string(options.directory.join(LOG_FILE_NAME)).unwrap()
}

#[tokio::test]
async fn test_reopen_resumes_unindexed_tail() {
    let temp = TempDir::new().unwrap();
    let provider = RecordingProvider::new();
    let options = StoreOptions::new(temp.path());

    // Simulated crash: the log has three records, the index covers only the first
    let first_len = {
        let mut log = RecordLog::open(temp.path()).unwrap();
        let mut index = VectorIndex::open(temp.path(), DIM).unwrap();
        let (offset, length) = log.append(&turn(0).to_line().unwrap()).unwrap();
        log.append(&turn(1).to_line().unwrap()).unwrap();
        log.append(&turn(2).to_line().unwrap()).unwrap();
        index
            .append(vec![IndexEntry {
                vector: vec![1.0; DIM],
                offset,
                length,
            }])
            .unwrap();
        index.close().unwrap();
        log.close().unwrap();
        length as u64
    };

    let log_len = log_text(&options).len() as u64;
    let mut store = open_store(&options, &provider).unwrap();
    assert_eq!(store.chunk_start(), first_len);
    assert_eq!(store.bytes_since_flush(), log_len - first_len);

    store.close().await.unwrap();

    // Only the un-indexed tail was embedded
    let calls = provider.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0], log_text(&options)[first_len as usize..]);

    let store = open_store(&options, &provider).unwrap();
    assert_eq!(store.chunk_start(), log_len);
    assert_eq!(store.bytes_since_flush(), 0);
    assert_eq!(store.stats().rows, 2);
}

#[tokio::test]
async fn test_torn_record_does_not_hide_neighbouring_turns() {
    let temp = TempDir::new().unwrap();
    let provider = RecordingProvider::new();
    let options = StoreOptions::new(temp.path());

    let before = turn(0);
    fs::write(
        temp.path().join(LOG_FILE_NAME),
        format!("{}\n{{\"role\":\"user\",\"te", before.to_line().unwrap()),
    )
    .unwrap();

    let after = turn(1);
    {
        let mut store = open_store(&options, &provider).unwrap();
        store.append(&after).await.unwrap();
        store.close().await.unwrap();
    }

    let mut store = open_store(&options, &provider).unwrap();
    let hits = store.query("rust ownership", 5).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].turns(), vec![before, after]);

    store.close().await.unwrap();
}

#[tokio::test]
async fn test_inspect_leaves_pending_tail_unembedded() {
    let temp = TempDir::new().unwrap();
    let provider = RecordingProvider::new();
    let options = StoreOptions::new(temp.path());

    {
        let mut log = RecordLog::open(temp.path()).unwrap();
        log.append(&turn(0).to_line().unwrap()).unwrap();
        log.append(&turn(1).to_line().unwrap()).unwrap();
        log.close().unwrap();
    }
    let log_len = log_text(&options).len() as u64;

    let stats = MemoryStore::inspect(&options, DIM).unwrap();
    assert_eq!(stats.log_bytes, log_len);
    assert_eq!(stats.indexed_bytes, 0);
    assert_eq!(stats.chunk_start, 0);
    assert_eq!(stats.pending_bytes, log_len);
    assert_eq!(stats.rows, 0);
    assert_eq!(stats.dimensions, DIM);

    // Inspecting twice reports the same state and the tail is still there to resume
    assert_eq!(MemoryStore::inspect(&options, DIM).unwrap(), stats);
    let mut store = open_store(&options, &provider).unwrap();
    assert_eq!(store.bytes_since_flush(), log_len);
    assert!(provider.calls().is_empty());

    assert!(matches!(
        MemoryStore::inspect(&options, DIM),
        Err(AppError::Locked(_))
    ));
    store.close().await.unwrap();

    let stats = MemoryStore::inspect(&options, 8).unwrap();
    assert_eq!(stats.rows, 1);
    assert_eq!(stats.pending_bytes, 0);
    assert_eq!(stats.dimensions, DIM);
}

#[tokio::test]
async fn test_drop_without_close_embeds_each_byte_once() {
    let temp = TempDir::new().unwrap();
    let provider = RecordingProvider::new();
    let options = StoreOptions::new(temp.path())
        .with_chunk_size(300)
        .with_index_flush_interval(0);

    let (rows_before, pending_before) = {
        let mut store = open_store(&options, &provider).unwrap();
        for n in 0..7 {
            store.append(&turn(n)).await.unwrap();
        }
        let stats = store.stats();
        (stats.rows, stats.pending_bytes)
    };
    assert!(rows_before > 0);
    assert!(pending_before > 0);

    let mut store = open_store(&options, &provider).unwrap();
    let stats = store.stats();
    assert_eq!(stats.rows, rows_before);
    assert_eq!(stats.pending_bytes, pending_before);
    assert_eq!(stats.chunk_start, stats.indexed_bytes);

    store.append(&turn(7)).await.unwrap();
    store.close().await.unwrap();

    // Chunks embedded across both sessions tile the log exactly
    assert_eq!(provider.calls().concat(), log_text(&options));
}

#[tokio::test]
async fn test_failed_embedding_leaves_chunk_open() {
    let temp = TempDir::new().unwrap();
    let provider = RecordingProvider::new();
    let options = StoreOptions::new(temp.path()).with_chunk_size(1);

    {
        let mut store = open_store(&options, &provider).unwrap();
        provider.set_failing(true);

        let result = store.append(&turn(0)).await;
        assert!(matches!(result, Err(AppError::Embedding(_))));

        // The turn is durable even though the chunk was not indexed
        let stats = store.stats();
        assert!(stats.log_bytes > 0);
        assert_eq!(stats.pending_bytes, stats.log_bytes);
        assert_eq!(stats.rows, 0);

        assert!(matches!(store.close().await, Err(AppError::Embedding(_))));
    }

    provider.set_failing(false);
    let mut store = open_store(&options, &provider).unwrap();
    assert_eq!(store.chunk_start(), 0);

    store.append(&turn(1)).await.unwrap();
    let stats = store.stats();
    assert_eq!(stats.rows, 1);
    assert_eq!(stats.pending_bytes, 0);
    assert_eq!(provider.calls(), vec![log_text(&options)]);

    store.close().await.unwrap();
}

#[tokio::test]
async fn test_corrupt_index_is_format_error_until_rebuilt() {
    let temp = TempDir::new().unwrap();
    let provider = RecordingProvider::new();
    let options = StoreOptions::new(temp.path()).with_chunk_size(200);

    {
        let mut store = open_store(&options, &provider).unwrap();
        for n in 0..5 {
            store.append(&turn(n)).await.unwrap();
        }
        store.close().await.unwrap();
    }

    fs::write(temp.path().join(INDEX_FILE_NAME), b"definitely not arrow").unwrap();
    assert!(matches!(
        open_store(&options, &provider),
        Err(AppError::Format(_))
    ));

    let stats = rebuild_index(&options, provider.clone(), 2).await.unwrap();
    assert!(stats.chunks > 0);
    assert_eq!(stats.bytes_replayed, log_text(&options).len() as u64);

    let store = open_store(&options, &provider).unwrap();
    assert_eq!(store.stats().rows, stats.chunks);
    assert_eq!(store.bytes_since_flush(), 0);
    assert!(!store.query("rust borrowing", 3).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_rebuild_reproduces_index() {
    let temp = TempDir::new().unwrap();
    let provider = RecordingProvider::new();
    let options = StoreOptions::new(temp.path()).with_chunk_size(250);

    {
        let mut store = open_store(&options, &provider).unwrap();
        for n in 0..11 {
            store.append(&turn(n)).await.unwrap();
        }
        store.close().await.unwrap();
    }

    let original = VectorIndex::open(temp.path(), DIM)
        .unwrap()
        .read_all()
        .unwrap();

    let stats = rebuild_index(&options, provider.clone(), 3).await.unwrap();
    assert_eq!(stats.chunks, original.len());

    let rebuilt = VectorIndex::open(temp.path(), DIM)
        .unwrap()
        .read_all()
        .unwrap();
    assert_eq!(rebuilt, original);
}

#[tokio::test]
async fn test_rebuild_refuses_open_store() {
    let temp = TempDir::new().unwrap();
    let provider = RecordingProvider::new();
    let options = StoreOptions::new(temp.path());

    let mut store = open_store(&options, &provider).unwrap();
    let result = rebuild_index(&options, provider.clone(), 8).await;
    assert!(matches!(result, Err(AppError::Locked(_))));

    store.close().await.unwrap();
}

#[tokio::test]
async fn test_rebuild_empty_store() {
    let temp = TempDir::new().unwrap();
    let provider = RecordingProvider::new();
    let options = StoreOptions::new(temp.path());

    let stats = rebuild_index(&options, provider.clone(), 8).await.unwrap();
    assert_eq!(stats.chunks, 0);
    assert_eq!(stats.bytes_replayed, 0);
    assert!(provider.calls().is_empty());

    let store = open_store(&options, &provider).unwrap();
    assert!(store.query("anything", 5).await.unwrap().is_empty());
}

//! Test providers and helpers.

use crate::embeddings::providers::TrigramProvider;
use crate::embeddings::EmbeddingProvider;
use crate::store::MemoryStore;
use crate::types::{StoreOptions, Turn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use turnstore_core::{AppError, AppResult};

pub const DIM: usize = 64;

/// Trigram embeddings that record every text they embed and can be told to fail.
#[derive(Debug)]
pub struct RecordingProvider {
    inner: TrigramProvider,
    calls: Mutex<Vec<String>>,
    failing: AtomicBool,
}

impl RecordingProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: TrigramProvider::new(DIM),
            calls: Mutex::new(Vec::new()),
            failing: AtomicBool::new(false),
        })
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Every text embedded so far, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl EmbeddingProvider for RecordingProvider {
    fn provider_name(&self) -> &str {
        "recording"
    }

    fn model_name(&self) -> &str {
        "trigram-v1"
    }

    fn dimensions(&self) -> usize {
        DIM
    }

    async fn embed_batch(&self, texts: &[String]) -> AppResult<Vec<Vec<f32>>> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(AppError::Embedding("injected failure".to_string()));
        }
        self.calls.lock().unwrap().extend(texts.iter().cloned());
        self.inner.embed_batch(texts).await
    }
}

/// Claims one dimensionality and returns another.
#[derive(Debug)]
pub struct WrongDimensionProvider;

#[async_trait::async_trait]
impl EmbeddingProvider for WrongDimensionProvider {
    fn provider_name(&self) -> &str {
        "broken"
    }

    fn model_name(&self) -> &str {
        "broken-v1"
    }

    fn dimensions(&self) -> usize {
        8
    }

    async fn embed_batch(&self, texts: &[String]) -> AppResult<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|_| vec![1.0; 4]).collect())
    }
}

pub fn open_store(
    options: &StoreOptions,
    provider: &Arc<RecordingProvider>,
) -> AppResult<MemoryStore> {
    MemoryStore::open(options.clone(), provider.clone())
}

/// A turn whose text is long enough to carry significant words.
pub fn turn(n: usize) -> Turn {
    Turn::new(
        if n % 2 == 0 { "user" } else { "assistant" },
        format!("message number {} about rust ownership and borrowing", n),
    )
}

/// Serialized length of `turn` in the log, terminator included.
pub fn record_len(turn: &Turn) -> u64 {
    turn.to_line().unwrap().len() as u64 + 1
}

pub fn cosine(a: &[f32], b: &[f32]) -> f64 {
    let dot: f64 = a.iter().zip(b).map(|(&x, &y)| x as f64 * y as f64).sum();
    let na: f64 = a.iter().map(|&x| (x as f64).powi(2)).sum::<f64>().sqrt();
    let nb: f64 = b.iter().map(|&x| (x as f64).powi(2)).sum::<f64>().sqrt();
    dot / (na * nb)
}

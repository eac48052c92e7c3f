//! Brute-force top-k cosine similarity.
//!
//! Scores every stored vector against the query in O(N·D). Norms of stored
//! vectors are precomputed by the index; zero-norm vectors are skipped.

use crate::vector_index::l2_norm;

/// A ranked candidate: position in the input arrays and its cosine score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoredIndex {
    pub index: usize,
    pub score: f64,
}

/// Rank `vectors` by cosine similarity to `query` and keep the best `k`.
///
/// Results are sorted by descending score; ties keep input order. A zero
/// query vector has no direction and yields no results.
pub fn top_k(query: &[f32], vectors: &[Vec<f32>], norms: &[f64], k: usize) -> Vec<ScoredIndex> {
    if k == 0 {
        return Vec::new();
    }

    let query_norm = l2_norm(query);
    if query_norm == 0.0 {
        return Vec::new();
    }

    let mut scored: Vec<ScoredIndex> = vectors
        .iter()
        .zip(norms)
        .enumerate()
        .filter(|(_, (vector, &norm))| norm != 0.0 && vector.len() == query.len())
        .map(|(index, (vector, &norm))| ScoredIndex {
            index,
            score: dot(query, vector) / (query_norm * norm),
        })
        .filter(|candidate| candidate.score.is_finite())
        .collect();

    // Stable: equal scores keep their original order
    scored.sort_by(|a, b| b.score.total_cmp(&a.score));
    scored.truncate(k);
    scored
}

fn dot(a: &[f32], b: &[f32]) -> f64 {
    a.iter().zip(b).map(|(&x, &y)| x as f64 * y as f64).sum()
}

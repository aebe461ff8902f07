//! Similarity computation and top-k ranking for embeddings.

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

use crate::Embedding;
use crate::error::{EmbeddingError, Result};
use crate::store::{EmbeddingStore, Provenance, StoreEntry};

/// Compute the cosine similarity between two embeddings.
///
/// Returns a value between -1.0 and 1.0, where:
/// - 1.0 means identical direction
/// - 0.0 means orthogonal vectors, or either vector has zero magnitude
/// - -1.0 means opposite vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32> {
    if a.len() != b.len() {
        return Err(EmbeddingError::DimensionMismatch {
            expected: a.len(),
            actual: b.len(),
        });
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let magnitude_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let magnitude_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if magnitude_a == 0.0 || magnitude_b == 0.0 {
        return Ok(0.0);
    }

    // Rounding can push parallel vectors a hair past 1.0.
    Ok((dot_product / (magnitude_a * magnitude_b)).clamp(-1.0, 1.0))
}

/// A ranked similarity hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedResult {
    /// ID of the matched entry.
    pub id: String,

    /// Cosine similarity to the query.
    pub score: f32,

    /// 1-based position in the result list.
    pub rank: usize,

    /// Where the matched vector came from, if recorded.
    pub provenance: Option<Provenance>,
}

/// Reject a result count of zero.
pub fn validate_k(k: usize) -> Result<()> {
    if k == 0 {
        return Err(EmbeddingError::InvalidK { k });
    }
    Ok(())
}

/// Rank every entry of `store` against `query` and keep the best `k`.
///
/// Results are sorted by descending similarity. Entries with equal scores
/// keep their insertion order, so the output is deterministic.
pub fn rank(query: &[f32], store: &EmbeddingStore, k: usize) -> Result<Vec<RankedResult>> {
    rank_with_threshold(query, store, k, -1.0)
}

/// Like [`rank`], dropping entries that score below `min_score`.
pub fn rank_with_threshold(
    query: &[f32],
    store: &EmbeddingStore,
    k: usize,
    min_score: f32,
) -> Result<Vec<RankedResult>> {
    rank_entries(query, store.entries(), k, min_score)
}

/// Rank an arbitrary sequence of entries, in the order given.
pub fn rank_entries<'a, I>(
    query: &[f32],
    entries: I,
    k: usize,
    min_score: f32,
) -> Result<Vec<RankedResult>>
where
    I: IntoIterator<Item = &'a StoreEntry>,
{
    validate_k(k)?;

    let mut scores: Vec<(OrderedFloat<f32>, &StoreEntry)> = Vec::new();
    for entry in entries {
        let score = cosine_similarity(query, &entry.embedding)?;
        if score >= min_score {
            scores.push((OrderedFloat(score), entry));
        }
    }

    // Sort by score descending; sort_by is stable.
    scores.sort_by(|a, b| b.0.cmp(&a.0));

    let results = scores
        .into_iter()
        .take(k)
        .enumerate()
        .map(|(position, (score, entry))| RankedResult {
            id: entry.id.clone(),
            score: score.0,
            rank: position + 1,
            provenance: entry.provenance.clone(),
        })
        .collect();

    Ok(results)
}

/// Normalize an embedding to unit length.
pub fn normalize(embedding: &mut Embedding) {
    let magnitude: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
    if magnitude > 0.0 {
        for x in embedding.iter_mut() {
            *x /= magnitude;
        }
    }
}

/// Compute the component-wise mean of multiple embeddings.
pub fn average<'a, I>(embeddings: I) -> Result<Embedding>
where
    I: IntoIterator<Item = &'a [f32]>,
{
    let mut result: Embedding = Vec::new();
    let mut count = 0usize;

    for embedding in embeddings {
        if count == 0 {
            result = vec![0.0; embedding.len()];
        } else if embedding.len() != result.len() {
            return Err(EmbeddingError::DimensionMismatch {
                expected: result.len(),
                actual: embedding.len(),
            });
        }
        for (acc, value) in result.iter_mut().zip(embedding) {
            *acc += value;
        }
        count += 1;
    }

    if count > 1 {
        let n = count as f32;
        for value in result.iter_mut() {
            *value /= n;
        }
    }

    Ok(result)
}

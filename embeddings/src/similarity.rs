//! Similarity ranking for embedded fragments.

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

use crate::Embedding;
use crate::error::{EmbeddingError, Result};

/// Compute the cosine similarity between two embeddings.
///
/// Returns a value between -1.0 and 1.0, where:
/// - 1.0 means identical vectors
/// - 0.0 means orthogonal vectors
/// - -1.0 means opposite vectors
///
/// A vector with zero norm has similarity 0.0 to everything.
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

    Ok(dot_product / (magnitude_a * magnitude_b))
}

/// A fragment ordinal with its similarity score against a query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankedFragment {
    /// Ordinal of the fragment within its source document.
    pub ordinal: usize,

    /// Cosine similarity against the query embedding.
    pub score: f32,
}

/// Rank fragment embeddings against a query, descending by score.
///
/// Selects exactly `min(k, candidates.len())` results. The sort is stable,
/// so ties keep the original fragment order and identical inputs always
/// produce identical output.
pub fn rank_top_k(
    query: &Embedding,
    candidates: &[(usize, Embedding)],
    k: usize,
) -> Result<Vec<RankedFragment>> {
    let mut scores: Vec<(OrderedFloat<f32>, usize)> = Vec::with_capacity(candidates.len());

    for (ordinal, embedding) in candidates {
        let score = cosine_similarity(query, embedding)?;
        scores.push((OrderedFloat(score), *ordinal));
    }

    // Stable sort by score descending
    scores.sort_by(|a, b| b.0.cmp(&a.0));

    let results: Vec<RankedFragment> = scores
        .into_iter()
        .take(k)
        .map(|(score, ordinal)| RankedFragment {
            ordinal,
            score: score.0,
        })
        .collect();

    Ok(results)
}

//! Lexical-aware reranking of retrieved candidates.
//!
//! Cosine similarity alone misses exact term matches, so the candidate
//! set is reordered by blending the semantic score with a case-
//! insensitive token-overlap score against the query text.

use std::collections::HashSet;

use crate::search::RetrievedChunk;

/// Blend weights for reranking. Tunable rather than hard-coded; the
/// defaults let a strong lexical match overcome a small semantic edge.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RerankWeights {
    pub semantic_weight: f32,
    pub lexical_weight: f32,
}

impl Default for RerankWeights {
    fn default() -> Self {
        Self {
            semantic_weight: 0.7,
            lexical_weight: 0.3,
        }
    }
}

fn tokenize(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

/// Fraction of the query's tokens that appear in the candidate text.
fn lexical_overlap(query_tokens: &HashSet<String>, text: &str) -> f32 {
    if query_tokens.is_empty() {
        return 0.0;
    }
    let candidate_tokens = tokenize(text);
    let matched = query_tokens
        .iter()
        .filter(|t| candidate_tokens.contains(*t))
        .count();
    matched as f32 / query_tokens.len() as f32
}

/// Reorder candidates by a blend of semantic and lexical relevance.
///
/// Each output item carries `semantic_score` (the incoming `score`) and
/// `score` set to the combined rerank score, sorted descending. With an
/// empty query text the lexical contribution is zero and the order is
/// descending semantic score.
///
/// # Examples
///
/// ```
/// use grounder::rerank::{rerank_candidates, RerankWeights};
/// use grounder::search::RetrievedChunk;
///
/// let make = |id: &str, score: f32, text: &str| RetrievedChunk {
///     doc_id: id.to_string(),
///     chunk_id: format!("{id}::0"),
///     chunk_index: 0,
///     start_char: 0,
///     end_char: text.len(),
///     score,
///     semantic_score: score,
///     text: text.to_string(),
/// };
///
/// // Close semantic scores; the exact term match must win.
/// let candidates = vec![
///     make("a", 0.80, "completely unrelated prose"),
///     make("b", 0.78, "the sourdough starter needs feeding"),
/// ];
/// let reranked = rerank_candidates(
///     "sourdough starter",
///     candidates,
///     &RerankWeights::default(),
/// );
/// assert_eq!(reranked[0].doc_id, "b");
/// ```
pub fn rerank_candidates(
    query_text: &str,
    mut candidates: Vec<RetrievedChunk>,
    weights: &RerankWeights,
) -> Vec<RetrievedChunk> {
    let query_tokens = tokenize(query_text);

    for candidate in &mut candidates {
        let semantic = candidate.score;
        let lexical = lexical_overlap(&query_tokens, &candidate.text);
        candidate.semantic_score = semantic;
        candidate.score = weights.semantic_weight * semantic
            + weights.lexical_weight * lexical;
    }

    // Stable sort: ties keep the incoming order.
    candidates.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    candidates
}

//! Brute-force cosine-similarity retrieval with bounded top-K selection.
//!
//! The scan keeps at most `candidate_k` records in a min-heap, so memory
//! and comparison cost stay at O(N log candidate_k) regardless of corpus
//! size. No approximate index is built; at the intended corpus scale a
//! full scan is fast enough.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use serde::Serialize;

use crate::error::{Error, Result};
use crate::rerank::{RerankWeights, rerank_candidates};
use crate::store::{EmbeddingRecord, EmbeddingStore};

/// Cosine similarity between two vectors.
///
/// Returns 0.0 for empty, mismatched-length, or zero-norm inputs rather
/// than NaN, so downstream ordering stays well-defined.
///
/// # Examples
///
/// ```
/// use grounder::search::cosine_similarity;
///
/// assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
/// assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
/// assert_eq!(cosine_similarity(&[], &[]), 0.0);
/// ```
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// A score-carrying heap entry. Ordering considers the score only,
/// treating NaN as equal, and the sequence number records scan order
/// for the stable final sort.
#[derive(Debug, Clone)]
struct ScoredEntry<T> {
    score: f32,
    seq: usize,
    item: T,
}

impl<T> PartialEq for ScoredEntry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.score == other.score
    }
}

impl<T> Eq for ScoredEntry<T> {}

impl<T> PartialOrd for ScoredEntry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for ScoredEntry<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.score.partial_cmp(&other.score).unwrap_or(Ordering::Equal)
    }
}

/// Bounded top-K accumulator over a min-heap.
///
/// While below capacity every offer is kept; at capacity the root (the
/// current minimum) is replaced only when the new score strictly
/// exceeds it. Ties therefore favor earlier scan order.
#[derive(Debug)]
pub struct TopK<T> {
    capacity: usize,
    next_seq: usize,
    heap: BinaryHeap<std::cmp::Reverse<ScoredEntry<T>>>,
}

impl<T> TopK<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            next_seq: 0,
            heap: BinaryHeap::with_capacity(capacity.min(1024)),
        }
    }

    pub fn offer(&mut self, score: f32, item: T) {
        if self.capacity == 0 {
            return;
        }
        let entry = ScoredEntry {
            score,
            seq: self.next_seq,
            item,
        };
        self.next_seq += 1;

        if self.heap.len() < self.capacity {
            self.heap.push(std::cmp::Reverse(entry));
            return;
        }
        if let Some(std::cmp::Reverse(min)) = self.heap.peek()
            && score > min.score
        {
            self.heap.pop();
            self.heap.push(std::cmp::Reverse(entry));
        }
    }

    /// Retained items sorted descending by score; ties keep the
    /// original scan order.
    pub fn into_sorted(self) -> Vec<(f32, T)> {
        let mut entries: Vec<ScoredEntry<T>> =
            self.heap.into_iter().map(|r| r.0).collect();
        entries.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then(a.seq.cmp(&b.seq))
        });
        entries.into_iter().map(|e| (e.score, e.item)).collect()
    }
}

/// A retrieved chunk with its scores and resolved text. Never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievedChunk {
    pub doc_id: String,
    pub chunk_id: String,
    pub chunk_index: usize,
    pub start_char: usize,
    pub end_char: usize,
    /// Final relevance after reranking: the weighted blend of
    /// `semantic_score` and lexical term overlap with the question.
    pub score: f32,
    /// Raw cosine similarity against the query embedding, kept
    /// unchanged by reranking.
    pub semantic_score: f32,
    pub text: String,
}

/// One row of a search response.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchRow {
    pub doc_id: String,
    pub chunk_id: String,
    pub chunk_index: usize,
    pub start_char: usize,
    pub end_char: usize,
    /// Final relevance after reranking: the weighted blend of
    /// `semantic_score` and lexical term overlap with the query text.
    pub score: f32,
    /// Raw cosine similarity against the query embedding, kept
    /// unchanged by reranking.
    pub semantic_score: f32,
}

/// Input for one search invocation.
#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub model_name: String,
    pub query_embedding: Vec<f32>,
    pub query_text: String,
    pub top_k: usize,
    pub candidate_k: usize,
}

/// Select the `k` records most similar to the query embedding.
///
/// Scan order over `records` is the tie-break for equal scores.
pub(crate) fn top_k_by_cosine(
    records: Vec<EmbeddingRecord>,
    query: &[f32],
    k: usize,
) -> Vec<(f32, EmbeddingRecord)> {
    let mut top = TopK::new(k);
    for record in records {
        let score = cosine_similarity(query, &record.embedding);
        top.offer(score, record);
    }
    top.into_sorted()
}

/// Execute one read-only search against an open store.
///
/// Stages: scan all of the model's embeddings keeping the `candidate_k`
/// best by cosine similarity, rerank the candidates against the query
/// text, then return the `top_k` best rows. An empty query embedding or
/// an empty store yields an empty result set; a missing `model_name`
/// fails fast with `SEARCH_FAILED` before any scan.
///
/// The caller owns the store handle, so any number of searches can run
/// concurrently over one handle; each takes its own read transaction.
pub fn run_search(
    store: &EmbeddingStore,
    request: &SearchRequest,
) -> Result<Vec<SearchRow>> {
    if request.model_name.is_empty() {
        return Err(Error::SearchFailed("missing model_name".into()));
    }
    if request.query_embedding.is_empty() {
        return Ok(Vec::new());
    }

    let candidate_k = request.candidate_k.max(request.top_k);
    let records = store.embeddings_for_model(&request.model_name)?;

    tracing::debug!(
        model = %request.model_name,
        candidates = records.len(),
        "scanning embeddings"
    );

    let ranked = top_k_by_cosine(records, &request.query_embedding, candidate_k);

    let candidates: Vec<RetrievedChunk> = ranked
        .into_iter()
        .map(|(score, record)| RetrievedChunk {
            doc_id: record.doc_id,
            chunk_id: record.chunk_id,
            chunk_index: record.chunk_index,
            start_char: record.start_char,
            end_char: record.end_char,
            score,
            semantic_score: score,
            text: record.chunk_text_preview,
        })
        .collect();

    let reranked = rerank_candidates(
        &request.query_text,
        candidates,
        &RerankWeights::default(),
    );

    Ok(reranked
        .into_iter()
        .take(request.top_k)
        .map(|c| SearchRow {
            doc_id: c.doc_id,
            chunk_id: c.chunk_id,
            chunk_index: c.chunk_index,
            start_char: c.start_char,
            end_char: c.end_char,
            score: c.score,
            semantic_score: c.semantic_score,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{ChunkEmbedding, DocIndexState};

    #[test]
    fn cosine_basic_geometry() {
        assert!((cosine_similarity(&[1.0, 2.0], &[2.0, 4.0]) - 1.0).abs() < 1e-6);
        assert!(
            (cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-6
        );
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
    }

    #[test]
    fn top_k_keeps_highest_scores() {
        let mut top = TopK::new(3);
        for (score, name) in
            [(0.1, "a"), (0.9, "b"), (0.5, "c"), (0.7, "d"), (0.3, "e")]
        {
            top.offer(score, name);
        }
        let sorted = top.into_sorted();
        let names: Vec<&str> = sorted.iter().map(|(_, n)| *n).collect();
        assert_eq!(names, vec!["b", "d", "c"]);
    }

    #[test]
    fn top_k_tie_keeps_scan_order() {
        let mut top = TopK::new(2);
        top.offer(0.5, "first");
        top.offer(0.5, "second");
        // At capacity, an equal score must not displace the root.
        top.offer(0.5, "third");
        let sorted = top.into_sorted();
        let names: Vec<&str> = sorted.iter().map(|(_, n)| *n).collect();
        assert_eq!(names, vec!["first", "second"]);
    }

    #[test]
    fn top_k_zero_capacity_keeps_nothing() {
        let mut top = TopK::new(0);
        top.offer(1.0, "a");
        assert!(top.into_sorted().is_empty());
    }

    fn seed_store(path: &std::path::Path) -> EmbeddingStore {
        let store = EmbeddingStore::open(path).unwrap();
        let docs: [(&str, Vec<f32>, &str); 3] = [
            ("alpha-doc", vec![1.0, 0.0, 0.0], "all about alpha topics"),
            ("beta-doc", vec![0.0, 1.0, 0.0], "all about beta topics"),
            ("gamma-doc", vec![0.0, 0.0, 1.0], "all about gamma topics"),
        ];
        for (doc_id, embedding, preview) in docs {
            let chunk = ChunkEmbedding {
                chunk_id: format!("{doc_id}::0"),
                chunk_index: 0,
                start_char: 0,
                end_char: preview.chars().count(),
                preview: preview.to_string(),
                embedding,
            };
            let state = DocIndexState {
                doc_id: doc_id.to_string(),
                content_fingerprint: "fp".to_string(),
                params_fingerprint: "200-1000-100".to_string(),
                chunk_count: 1,
                last_indexed: 0,
            };
            store
                .replace_document(doc_id, "toy-model", &[chunk], &state)
                .unwrap();
        }
        store
    }

    #[test]
    fn search_ranks_matching_document_first() {
        let tmp = tempfile::tempdir().unwrap();
        let store = seed_store(&tmp.path().join("embeddings.db"));

        let request = SearchRequest {
            model_name: "toy-model".to_string(),
            query_embedding: vec![0.9, 0.1, 0.0],
            query_text: String::new(),
            top_k: 2,
            candidate_k: 3,
        };
        let rows = run_search(&store, &request).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].doc_id, "alpha-doc");
        assert!(rows[0].semantic_score > rows[1].semantic_score);
    }

    #[test]
    fn search_with_empty_query_embedding_returns_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let store = seed_store(&tmp.path().join("embeddings.db"));

        let request = SearchRequest {
            model_name: "toy-model".to_string(),
            query_embedding: Vec::new(),
            query_text: "anything".to_string(),
            top_k: 5,
            candidate_k: 10,
        };
        assert!(run_search(&store, &request).unwrap().is_empty());
    }

    #[test]
    fn search_on_empty_store_returns_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let store =
            EmbeddingStore::open(&tmp.path().join("fresh.db")).unwrap();
        let request = SearchRequest {
            model_name: "toy-model".to_string(),
            query_embedding: vec![1.0, 0.0, 0.0],
            query_text: String::new(),
            top_k: 5,
            candidate_k: 10,
        };
        assert!(run_search(&store, &request).unwrap().is_empty());
    }

    #[test]
    fn search_rejects_missing_model_name() {
        let tmp = tempfile::tempdir().unwrap();
        let store = seed_store(&tmp.path().join("embeddings.db"));
        let request = SearchRequest {
            model_name: String::new(),
            query_embedding: vec![1.0],
            query_text: String::new(),
            top_k: 5,
            candidate_k: 10,
        };
        let err = run_search(&store, &request).unwrap_err();
        assert_eq!(err.code(), "SEARCH_FAILED");
    }

    #[test]
    fn searches_share_one_store_handle() {
        let tmp = tempfile::tempdir().unwrap();
        let store = std::sync::Arc::new(
            seed_store(&tmp.path().join("embeddings.db")),
        );

        let handles: Vec<_> = [
            (vec![1.0f32, 0.0, 0.0], "alpha-doc"),
            (vec![0.0f32, 1.0, 0.0], "beta-doc"),
            (vec![0.0f32, 0.0, 1.0], "gamma-doc"),
        ]
        .into_iter()
        .map(|(query_embedding, expected)| {
            let store = store.clone();
            std::thread::spawn(move || {
                let rows = run_search(
                    &store,
                    &SearchRequest {
                        model_name: "toy-model".to_string(),
                        query_embedding,
                        query_text: String::new(),
                        top_k: 1,
                        candidate_k: 3,
                    },
                )
                .unwrap();
                assert_eq!(rows[0].doc_id, expected);
            })
        })
        .collect();

        for handle in handles {
            handle.join().unwrap();
        }
    }
}

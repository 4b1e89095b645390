//! Incremental indexing: chunk, embed, and persist the documents that
//! actually changed, skipping the rest by content fingerprint.
//!
//! The embedder is injected as a batch closure so the indexer stays
//! agnostic of the backing runtime. Embedding batches for one document
//! run on a scoped thread pool with bounded parallelism, and each
//! document commits atomically so a cancelled or failed run leaves
//! every previously indexed document intact.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use rayon::prelude::*;
use tracing::{debug, info};

use crate::chunking::{ChunkingParams, chunk_id, chunk_text};
use crate::document::{Document, content_fingerprint};
use crate::error::{Error, Result};
use crate::store::{ChunkEmbedding, DocIndexState, EmbeddingStore};

/// Default chunk texts per embedder call.
pub const DEFAULT_EMBED_BATCH_SIZE: usize = 16;

/// Default in-flight embedding batches per document.
pub const DEFAULT_EMBEDDING_CONCURRENCY: usize = 2;

/// Stored previews are capped at this many characters.
const PREVIEW_CHARS: usize = 240;

/// Input for one indexing run.
#[derive(Debug, Clone)]
pub struct IndexingOptions {
    pub model_name: String,
    pub documents: Vec<Document>,
    pub params: ChunkingParams,
    pub embedding_concurrency: usize,
    pub embed_batch_size: usize,
}

/// Counters summarizing a completed indexing run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexReport {
    pub docs_indexed: usize,
    pub docs_skipped: usize,
    pub docs_pruned: usize,
    pub chunks_embedded: usize,
    pub total_chunks: usize,
}

/// A progress snapshot emitted during indexing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexProgress {
    /// Document currently being processed.
    pub doc_id: String,
    /// Documents fully processed so far, including skips.
    pub completed_docs: usize,
    pub total_docs: usize,
    /// Chunks embedded so far across the whole run.
    pub embedded_chunks: usize,
}

/// Index the supplied documents incrementally.
///
/// A document is skipped when its stored state matches both the content
/// fingerprint and the chunking-params fingerprint; any mismatch
/// re-chunks and re-embeds the whole document. Documents with stored
/// state but absent from `options.documents` are pruned. Cancellation
/// is polled between documents and between embedding batches and
/// surfaces as `Err(Error::IndexCancelled)`.
///
/// `embed_many` receives up to `embed_batch_size` chunk texts and must
/// return one vector per input, in order. The caller owns the store
/// handle; a store file must have at most one indexing run in flight
/// at a time, though read-only searches over the same handle may run
/// alongside it.
pub fn run_incremental_indexing<E, C, P>(
    store: &EmbeddingStore,
    options: &IndexingOptions,
    embed_many: &E,
    should_cancel: &C,
    on_progress: &P,
) -> Result<IndexReport>
where
    E: Fn(&[String]) -> std::result::Result<Vec<Vec<f32>>, String> + Sync,
    C: Fn() -> bool + Sync,
    P: Fn(IndexProgress) + Sync,
{
    if !options.params.is_valid() {
        return Err(Error::IndexFailed(format!(
            "invalid chunking params: {:?}",
            options.params
        )));
    }
    if options.model_name.is_empty() {
        return Err(Error::IndexFailed("missing model_name".into()));
    }

    index_documents(store, options, embed_many, should_cancel, on_progress)
}

fn index_documents<E, C, P>(
    store: &EmbeddingStore,
    options: &IndexingOptions,
    embed_many: &E,
    should_cancel: &C,
    on_progress: &P,
) -> Result<IndexReport>
where
    E: Fn(&[String]) -> std::result::Result<Vec<Vec<f32>>, String> + Sync,
    C: Fn() -> bool + Sync,
    P: Fn(IndexProgress) + Sync,
{
    let params_fp = options.params.fingerprint();
    let total_docs = options.documents.len();
    let mut report = IndexReport::default();
    let embedded_total = AtomicUsize::new(0);

    for (position, doc) in options.documents.iter().enumerate() {
        if should_cancel() {
            return Err(Error::IndexCancelled);
        }

        let content_fp = content_fingerprint(&doc.content);
        let existing = store.doc_state(&doc.id)?;
        if let Some(state) = existing
            && state.content_fingerprint == content_fp
            && state.params_fingerprint == params_fp
        {
            report.docs_skipped += 1;
            report.total_chunks += state.chunk_count as usize;
            debug!(doc_id = %doc.id, "document unchanged, skipping");
            on_progress(IndexProgress {
                doc_id: doc.id.clone(),
                completed_docs: position + 1,
                total_docs,
                embedded_chunks: embedded_total.load(Ordering::Relaxed),
            });
            continue;
        }

        let chunks = chunk_text(&doc.content, &options.params);
        let vectors = embed_chunks(
            doc,
            &chunks,
            options,
            embed_many,
            should_cancel,
            on_progress,
            &embedded_total,
            position,
            total_docs,
        )?;

        let staged: Vec<ChunkEmbedding> = chunks
            .iter()
            .zip(vectors)
            .map(|(chunk, embedding)| ChunkEmbedding {
                chunk_id: chunk_id(&doc.id, chunk.chunk_index),
                chunk_index: chunk.chunk_index,
                start_char: chunk.start_char,
                end_char: chunk.end_char,
                preview: chunk.text.chars().take(PREVIEW_CHARS).collect(),
                embedding,
            })
            .collect();

        let state = DocIndexState {
            doc_id: doc.id.clone(),
            content_fingerprint: content_fp,
            params_fingerprint: params_fp.clone(),
            chunk_count: staged.len() as u64,
            last_indexed: epoch_secs(),
        };
        store.replace_document(&doc.id, &options.model_name, &staged, &state)?;

        report.docs_indexed += 1;
        report.chunks_embedded += staged.len();
        report.total_chunks += staged.len();
        info!(
            doc_id = %doc.id,
            chunks = staged.len(),
            "document indexed"
        );
        on_progress(IndexProgress {
            doc_id: doc.id.clone(),
            completed_docs: position + 1,
            total_docs,
            embedded_chunks: embedded_total.load(Ordering::Relaxed),
        });
    }

    report.docs_pruned = prune_vanished(store, &options.documents)?;

    info!(
        docs_indexed = report.docs_indexed,
        docs_skipped = report.docs_skipped,
        docs_pruned = report.docs_pruned,
        chunks_embedded = report.chunks_embedded,
        "indexing run complete"
    );
    Ok(report)
}

/// Embed one document's chunks in bounded-parallel batches, preserving
/// chunk order in the returned vectors.
#[allow(clippy::too_many_arguments)]
fn embed_chunks<E, C, P>(
    doc: &Document,
    chunks: &[crate::chunking::Chunk],
    options: &IndexingOptions,
    embed_many: &E,
    should_cancel: &C,
    on_progress: &P,
    embedded_total: &AtomicUsize,
    position: usize,
    total_docs: usize,
) -> Result<Vec<Vec<f32>>>
where
    E: Fn(&[String]) -> std::result::Result<Vec<Vec<f32>>, String> + Sync,
    C: Fn() -> bool + Sync,
    P: Fn(IndexProgress) + Sync,
{
    if chunks.is_empty() {
        return Ok(Vec::new());
    }

    let batch_size = options.embed_batch_size.max(1);
    let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
    let batches: Vec<&[String]> = texts.chunks(batch_size).collect();

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(options.embedding_concurrency.max(1))
        .build()
        .map_err(|e| Error::IndexFailed(e.to_string()))?;

    let per_batch: Vec<Vec<Vec<f32>>> = pool.install(|| {
        batches
            .par_iter()
            .map(|batch| {
                if should_cancel() {
                    return Err(Error::IndexCancelled);
                }
                let vectors =
                    embed_many(batch).map_err(Error::IndexFailed)?;
                if vectors.len() != batch.len() {
                    return Err(Error::IndexFailed(format!(
                        "embedder returned {} vectors for {} texts",
                        vectors.len(),
                        batch.len()
                    )));
                }
                let done = embedded_total
                    .fetch_add(batch.len(), Ordering::Relaxed)
                    + batch.len();
                on_progress(IndexProgress {
                    doc_id: doc.id.clone(),
                    completed_docs: position,
                    total_docs,
                    embedded_chunks: done,
                });
                Ok(vectors)
            })
            .collect::<Result<Vec<_>>>()
    })?;

    Ok(per_batch.into_iter().flatten().collect())
}

/// Remove stored documents that are no longer in the supplied set.
fn prune_vanished(store: &EmbeddingStore, documents: &[Document]) -> Result<usize> {
    let supplied: HashSet<&str> = documents.iter().map(|d| d.id.as_str()).collect();
    let vanished: Vec<String> = store
        .doc_ids_with_state()?
        .into_iter()
        .filter(|id| !supplied.contains(id.as_str()))
        .collect();
    if vanished.is_empty() {
        return Ok(0);
    }
    debug!(count = vanished.len(), "pruning vanished documents");
    store.remove_documents(&vanished)?;
    Ok(vanished.len())
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

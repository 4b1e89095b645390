//! Background workers for indexing and search.
//!
//! Index and search runs execute on dedicated threads and talk to the
//! caller exclusively through channels, so a crash or panic in a run
//! never takes the caller down with it. Indexing streams progress
//! events and ends with exactly one terminal event; search sends a
//! single outcome message. Cancellation is a shared flag polled by the
//! running work, so an in-flight embedding batch finishes before the
//! run winds down.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, channel};
use std::thread::{self, JoinHandle};

use tracing::warn;

use crate::error::Error;
use crate::indexer::{IndexProgress, IndexReport, IndexingOptions, run_incremental_indexing};
use crate::search::{SearchRequest, SearchRow, run_search};
use crate::store::EmbeddingStore;

/// Shared cancellation flag for a background run.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Events emitted by an indexing worker. Every run produces zero or
/// more `Progress` events followed by exactly one terminal event.
#[derive(Debug, Clone, PartialEq)]
pub enum IndexEvent {
    Progress(IndexProgress),
    Done(IndexReport),
    Cancelled,
    Failed { code: &'static str, message: String },
}

impl IndexEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, IndexEvent::Progress(_))
    }
}

/// Handle to a running indexing worker.
pub struct IndexingHandle {
    pub events: Receiver<IndexEvent>,
    pub cancel: CancelToken,
    join: JoinHandle<()>,
}

impl IndexingHandle {
    /// Block until the worker thread exits. Events not yet drained from
    /// `events` remain readable afterwards.
    pub fn join(self) -> Receiver<IndexEvent> {
        if self.join.join().is_err() {
            warn!("indexing worker thread panicked");
        }
        self.events
    }
}

/// Spawn an indexing run on a background thread.
///
/// The store handle is shared, so read-only searches over the same
/// handle keep working while the run is in flight. `embed_many`
/// receives batches of chunk texts and returns one vector per text.
/// Dropping the receiver does not stop the run; use the handle's
/// [`CancelToken`] for that.
pub fn spawn_indexing<E>(
    store: Arc<EmbeddingStore>,
    options: IndexingOptions,
    embed_many: E,
) -> IndexingHandle
where
    E: Fn(&[String]) -> Result<Vec<Vec<f32>>, String> + Send + Sync + 'static,
{
    let (tx, rx) = channel();
    let cancel = CancelToken::new();
    let token = cancel.clone();

    let join = thread::spawn(move || {
        // Sender is not Sync, but progress callbacks arrive from the
        // embedding pool's threads.
        let progress_tx = std::sync::Mutex::new(tx.clone());
        let outcome = run_incremental_indexing(
            &store,
            &options,
            &embed_many,
            &|| token.is_cancelled(),
            &|progress| {
                if let Ok(sender) = progress_tx.lock() {
                    let _ = sender.send(IndexEvent::Progress(progress));
                }
            },
        );
        let terminal = match outcome {
            Ok(report) => IndexEvent::Done(report),
            Err(Error::IndexCancelled) => IndexEvent::Cancelled,
            Err(e) => IndexEvent::Failed {
                code: e.code(),
                message: e.to_string(),
            },
        };
        // Receiver may already be gone; nothing to do then.
        let _ = tx.send(terminal);
    });

    IndexingHandle { events: rx, cancel, join }
}

/// The single message a search worker sends.
#[derive(Debug, Clone, PartialEq)]
pub enum SearchOutcome {
    Done(Vec<SearchRow>),
    Failed { code: &'static str, message: String },
}

/// Handle to a running search worker.
pub struct SearchHandle {
    outcome: Receiver<SearchOutcome>,
    join: JoinHandle<()>,
}

impl SearchHandle {
    /// Block until the search completes and return its outcome.
    pub fn wait(self) -> SearchOutcome {
        if self.join.join().is_err() {
            warn!("search worker thread panicked");
        }
        self.outcome.recv().unwrap_or(SearchOutcome::Failed {
            code: "SEARCH_FAILED",
            message: "search worker exited without an outcome".to_string(),
        })
    }
}

/// Spawn a read-only search on a background thread. Any number of
/// searches may run concurrently over clones of the same store handle.
pub fn spawn_search(
    store: Arc<EmbeddingStore>,
    request: SearchRequest,
) -> SearchHandle {
    let (tx, rx) = channel::<SearchOutcome>();
    let join = thread::spawn(move || {
        let outcome = match run_search(&store, &request) {
            Ok(rows) => SearchOutcome::Done(rows),
            Err(e) => SearchOutcome::Failed {
                code: e.code(),
                message: e.to_string(),
            },
        };
        let _ = tx.send(outcome);
    });
    SearchHandle { outcome: rx, join }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunking::ChunkingParams;
    use crate::document::Document;
    use crate::indexer::{DEFAULT_EMBED_BATCH_SIZE, DEFAULT_EMBEDDING_CONCURRENCY};

    fn toy_embed(texts: &[String]) -> Result<Vec<Vec<f32>>, String> {
        Ok(texts
            .iter()
            .map(|t| {
                if t.contains("alpha") {
                    vec![1.0, 0.0, 0.0]
                } else {
                    vec![0.0, 1.0, 0.0]
                }
            })
            .collect())
    }

    fn test_store() -> (tempfile::TempDir, Arc<EmbeddingStore>) {
        let tmp = tempfile::tempdir().unwrap();
        let store = EmbeddingStore::open(&tmp.path().join("e.db")).unwrap();
        (tmp, Arc::new(store))
    }

    fn indexing_options() -> IndexingOptions {
        IndexingOptions {
            model_name: "toy-model".to_string(),
            documents: vec![Document::new(
                "alpha-doc",
                "Alpha",
                "text",
                "alpha alpha alpha alpha alpha alpha alpha alpha alpha",
            )],
            params: ChunkingParams {
                chunk_min: 10,
                chunk_max: 40,
                chunk_overlap: 5,
            },
            embedding_concurrency: DEFAULT_EMBEDDING_CONCURRENCY,
            embed_batch_size: DEFAULT_EMBED_BATCH_SIZE,
        }
    }

    #[test]
    fn indexing_worker_streams_progress_then_done() {
        let (_tmp, store) = test_store();
        let handle = spawn_indexing(store, indexing_options(), toy_embed);
        let events: Vec<IndexEvent> = handle.join().iter().collect();

        assert!(!events.is_empty());
        let terminal = events.last().unwrap();
        assert!(terminal.is_terminal());
        match terminal {
            IndexEvent::Done(report) => {
                assert_eq!(report.docs_indexed, 1);
            }
            other => panic!("expected Done, got {other:?}"),
        }
        // Exactly one terminal event, and it comes last.
        let terminal_count =
            events.iter().filter(|e| e.is_terminal()).count();
        assert_eq!(terminal_count, 1);
    }

    #[test]
    fn cancelled_worker_ends_with_cancelled_event() {
        let (_tmp, store) = test_store();
        let handle = spawn_indexing(store, indexing_options(), toy_embed);
        handle.cancel.cancel();
        assert!(handle.cancel.is_cancelled());
        let events: Vec<IndexEvent> = handle.join().iter().collect();
        // Cancellation may land before or after the run finishes; the
        // terminal event is either Cancelled or Done, never Failed.
        match events.last().unwrap() {
            IndexEvent::Cancelled | IndexEvent::Done(_) => {}
            other => panic!("unexpected terminal event {other:?}"),
        }
    }

    #[test]
    fn failing_run_ends_with_failed_event() {
        let (_tmp, store) = test_store();
        let mut options = indexing_options();
        options.model_name = String::new();
        let handle = spawn_indexing(store, options, toy_embed);
        let events: Vec<IndexEvent> = handle.join().iter().collect();
        match events.last().unwrap() {
            IndexEvent::Failed { code, message } => {
                assert_eq!(*code, "INDEX_FAILED");
                assert!(message.contains("model_name"));
            }
            other => panic!("expected Failed, got {other:?}"),
        }
    }

    #[test]
    fn search_worker_returns_rows() {
        let (_tmp, store) = test_store();
        let handle =
            spawn_indexing(store.clone(), indexing_options(), toy_embed);
        handle.join();

        let outcome = spawn_search(
            store,
            SearchRequest {
                model_name: "toy-model".to_string(),
                query_embedding: vec![1.0, 0.0, 0.0],
                query_text: "alpha".to_string(),
                top_k: 3,
                candidate_k: 10,
            },
        )
        .wait();
        match outcome {
            SearchOutcome::Done(rows) => {
                assert!(!rows.is_empty());
                assert_eq!(rows[0].doc_id, "alpha-doc");
            }
            SearchOutcome::Failed { code, message } => {
                panic!("search failed: {code} {message}");
            }
        }
    }

    #[test]
    fn search_worker_reports_failures_as_messages() {
        let (_tmp, store) = test_store();
        let outcome = spawn_search(
            store,
            SearchRequest {
                model_name: String::new(),
                query_embedding: vec![1.0],
                query_text: "q".to_string(),
                top_k: 3,
                candidate_k: 10,
            },
        )
        .wait();
        match outcome {
            SearchOutcome::Failed { code, .. } => {
                assert_eq!(code, "SEARCH_FAILED");
            }
            SearchOutcome::Done(_) => panic!("expected failure"),
        }
    }

    #[test]
    fn concurrent_search_workers_share_one_store() {
        let (_tmp, store) = test_store();
        spawn_indexing(store.clone(), indexing_options(), toy_embed).join();

        let request = SearchRequest {
            model_name: "toy-model".to_string(),
            query_embedding: vec![1.0, 0.0, 0.0],
            query_text: "alpha".to_string(),
            top_k: 1,
            candidate_k: 4,
        };
        let first = spawn_search(store.clone(), request.clone());
        let second = spawn_search(store, request);
        for outcome in [first.wait(), second.wait()] {
            match outcome {
                SearchOutcome::Done(rows) => {
                    assert_eq!(rows[0].doc_id, "alpha-doc");
                }
                SearchOutcome::Failed { code, message } => {
                    panic!("search failed: {code} {message}");
                }
            }
        }
    }
}

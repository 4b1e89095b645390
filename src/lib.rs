//! grounder - on-device semantic indexing and grounded answering over
//! user documents.
//!
//! grounder chunks documents, stores their embeddings in an embedded
//! [redb](https://github.com/cberner/redb) database, retrieves the
//! chunks most similar to a question with cosine similarity plus a
//! lexical rerank, and validates generated answers so that every kept
//! citation and quote is verifiably grounded in retrieved text.
//! Embedding and text generation stay outside the crate: callers
//! inject them as closures, typically backed by a local model runtime.
//!
//! # Quick start
//!
//! The host opens one [`EmbeddingStore`] per database file and passes
//! the handle into every indexing and search call; the embedded
//! database supports concurrent readers alongside a single writer over
//! that one handle.
//!
//! ```no_run
//! use grounder::{
//!     ChunkingParams, Document, EmbeddingStore, IndexingOptions,
//!     SearchRequest, run_incremental_indexing, run_search,
//! };
//!
//! let store = EmbeddingStore::open("embeddings.db").unwrap();
//!
//! let documents = vec![Document::new(
//!     "notes-1",
//!     "Meeting notes",
//!     "text",
//!     "The chunker never splits below the minimum size...",
//! )];
//!
//! let embed_many = |texts: &[String]| -> Result<Vec<Vec<f32>>, String> {
//!     // Call out to the local embedding model here.
//!     Ok(texts.iter().map(|_| vec![0.0; 384]).collect())
//! };
//!
//! let options = IndexingOptions {
//!     model_name: "embeddinggemma".to_string(),
//!     documents,
//!     params: ChunkingParams::default(),
//!     embedding_concurrency: 2,
//!     embed_batch_size: 16,
//! };
//! let report = run_incremental_indexing(
//!     &store,
//!     &options,
//!     &embed_many,
//!     &|| false,
//!     &|_| {},
//! )
//! .unwrap();
//! println!("indexed {} documents", report.docs_indexed);
//!
//! let rows = run_search(
//!     &store,
//!     &SearchRequest {
//!         model_name: "embeddinggemma".to_string(),
//!         query_embedding: vec![0.0; 384],
//!         query_text: "when does the chunker split?".to_string(),
//!         top_k: 8,
//!         candidate_k: 24,
//!     },
//! )
//! .unwrap();
//! for row in &rows {
//!     println!("{} (score: {:.3})", row.chunk_id, row.score);
//! }
//! ```

pub mod ask;
pub mod chunking;
pub mod document;
pub mod error;
pub mod indexer;
pub mod profile;
pub mod rerank;
pub mod search;
pub mod store;
pub mod worker;

pub use ask::{
    AskResponse, Citation, Claim, LooseAnswer, LooseCitationRef, LooseParsed,
    Quote, RetrieveOptions, ValidatedAnswer, ValidationOptions,
    parse_and_validate_ask_output, parse_ask_json, parse_loose_cited_response,
    retrieve_top_k_chunks, validate_ask_response, validate_loose_cited_response,
};
pub use chunking::{Chunk, ChunkingParams, chunk_id, chunk_text};
pub use document::{Document, content_fingerprint};
pub use error::{Error, Result};
pub use indexer::{
    IndexProgress, IndexReport, IndexingOptions, run_incremental_indexing,
};
pub use profile::{
    AskDefaults, GroundingMode, ModelProfile, ask_model_profile,
    infer_model_size_billions,
};
pub use rerank::{RerankWeights, rerank_candidates};
pub use search::{RetrievedChunk, SearchRequest, SearchRow, run_search};
pub use store::{DocIndexState, EmbeddingRecord, EmbeddingStore};
pub use worker::{
    CancelToken, IndexEvent, IndexingHandle, SearchHandle, SearchOutcome,
    spawn_indexing, spawn_search,
};

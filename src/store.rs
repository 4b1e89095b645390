//! Persistent embedding store backed by redb.
//!
//! One store file per project. Two tables:
//!
//! - `embeddings`, keyed `(doc_id, model_name, chunk_id)`. The same
//!   chunk may hold independent embeddings per model.
//! - `doc_states`, keyed `doc_id`, holding the per-document index state
//!   the incremental indexer diffs against.
//!
//! Binary format per embedding entry:
//! - 4 bytes: chunk index (u32 LE)
//! - 4 bytes: start char (u32 LE)
//! - 4 bytes: end char (u32 LE)
//! - 4 bytes: embedding dimension D (u32 LE)
//! - D * 4 bytes: f32 values
//! - remaining bytes: UTF-8 chunk text preview

use std::path::{Path, PathBuf};

use redb::{
    Database, ReadableDatabase, ReadableTable, ReadableTableMetadata,
    TableDefinition,
};

use crate::error::{Error, Result};

const EMBEDDINGS: TableDefinition<(&str, &str, &str), &[u8]> =
    TableDefinition::new("embeddings");
const DOC_STATES: TableDefinition<&str, &[u8]> =
    TableDefinition::new("doc_states");

/// Header size: chunk index + start + end + dimension, 4 bytes each.
const HEADER_SIZE: usize = 16;

/// Per-document index state, written only by the indexer.
///
/// Serialized as: `"content_fp\0params_fp\0chunk_count\0last_indexed"`.
///
/// # Examples
///
/// ```
/// use grounder::store::DocIndexState;
///
/// let state = DocIndexState {
///     doc_id: "d1".to_string(),
///     content_fingerprint: "abc".to_string(),
///     params_fingerprint: "200-1000-100".to_string(),
///     chunk_count: 7,
///     last_indexed: 1700000000,
/// };
/// let bytes = state.serialize();
/// let restored = DocIndexState::deserialize("d1", &bytes).unwrap();
/// assert_eq!(state, restored);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocIndexState {
    pub doc_id: String,
    pub content_fingerprint: String,
    pub params_fingerprint: String,
    pub chunk_count: u64,
    pub last_indexed: u64,
}

impl DocIndexState {
    /// Serialize to a byte vector for storage. The doc id is the table
    /// key and is not repeated in the value.
    pub fn serialize(&self) -> Vec<u8> {
        format!(
            "{}\0{}\0{}\0{}",
            self.content_fingerprint,
            self.params_fingerprint,
            self.chunk_count,
            self.last_indexed
        )
        .into_bytes()
    }

    /// Deserialize from bytes. Returns `None` if the format is invalid.
    pub fn deserialize(doc_id: &str, bytes: &[u8]) -> Option<Self> {
        let s = std::str::from_utf8(bytes).ok()?;
        let mut parts = s.splitn(4, '\0');
        let content_fingerprint = parts.next()?.to_string();
        let params_fingerprint = parts.next()?.to_string();
        let chunk_count = parts.next()?.parse().ok()?;
        let last_indexed = parts.next()?.parse().ok()?;
        Some(Self {
            doc_id: doc_id.to_string(),
            content_fingerprint,
            params_fingerprint,
            chunk_count,
            last_indexed,
        })
    }
}

/// A stored chunk embedding, as read back from the store.
#[derive(Debug, Clone)]
pub struct EmbeddingRecord {
    pub doc_id: String,
    pub chunk_id: String,
    pub model_name: String,
    pub chunk_index: usize,
    pub start_char: usize,
    pub end_char: usize,
    pub chunk_text_preview: String,
    pub embedding: Vec<f32>,
}

/// A chunk embedding staged for writing.
#[derive(Debug, Clone)]
pub struct ChunkEmbedding {
    pub chunk_id: String,
    pub chunk_index: usize,
    pub start_char: usize,
    pub end_char: usize,
    pub preview: String,
    pub embedding: Vec<f32>,
}

/// File-backed embedding store. Opened and closed explicitly; the
/// underlying file handle is released when the store is dropped, on
/// every exit path.
pub struct EmbeddingStore {
    db: Database,
}

impl EmbeddingStore {
    /// Open or create a store at the given path.
    ///
    /// An unwritable or corrupt path fails with
    /// [`Error::StoreOpenFailed`]; callers must propagate it.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        Self::open_inner(path).map_err(|message| Error::StoreOpenFailed {
            path: PathBuf::from(path),
            message,
        })
    }

    fn open_inner(path: &Path) -> std::result::Result<Self, String> {
        let db = Database::create(path).map_err(|e| e.to_string())?;

        // Ensure both tables exist up front.
        let txn = db.begin_write().map_err(|e| e.to_string())?;
        txn.open_table(EMBEDDINGS).map_err(|e| e.to_string())?;
        txn.open_table(DOC_STATES).map_err(|e| e.to_string())?;
        txn.commit().map_err(|e| e.to_string())?;

        Ok(Self { db })
    }

    /// All embedding records stored for one model, in no particular
    /// order. Entries with a malformed payload are skipped.
    pub fn embeddings_for_model(
        &self,
        model_name: &str,
    ) -> Result<Vec<EmbeddingRecord>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(EMBEDDINGS)?;

        let mut records = Vec::new();
        for entry in table.iter()? {
            let (key, value) = entry?;
            let (doc_id, model, chunk_id) = key.value();
            if model != model_name {
                continue;
            }
            if let Some(record) =
                decode_record(doc_id, model, chunk_id, value.value())
            {
                records.push(record);
            }
        }
        Ok(records)
    }

    /// Index state for one document, if it has been indexed before.
    pub fn doc_state(&self, doc_id: &str) -> Result<Option<DocIndexState>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(DOC_STATES)?;
        Ok(table
            .get(doc_id)?
            .and_then(|v| DocIndexState::deserialize(doc_id, v.value())))
    }

    /// All document ids that currently have an index state.
    pub fn doc_ids_with_state(&self) -> Result<Vec<String>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(DOC_STATES)?;
        let mut ids = Vec::new();
        for entry in table.iter()? {
            let (key, _) = entry?;
            ids.push(key.value().to_string());
        }
        Ok(ids)
    }

    /// Total number of stored embedding rows across all documents and
    /// models.
    pub fn total_chunk_count(&self) -> Result<u64> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(EMBEDDINGS)?;
        Ok(table.len()?)
    }

    /// Replace all embedding rows for one document+model and update its
    /// index state, atomically. A crash mid-write leaves either the old
    /// rows or the new rows, never a mix.
    pub fn replace_document(
        &self,
        doc_id: &str,
        model_name: &str,
        chunks: &[ChunkEmbedding],
        state: &DocIndexState,
    ) -> Result<()> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(EMBEDDINGS)?;

            let stale: Vec<String> = {
                let mut keys = Vec::new();
                for entry in table.iter()? {
                    let (key, _) = entry?;
                    let (doc, model, chunk) = key.value();
                    if doc == doc_id && model == model_name {
                        keys.push(chunk.to_string());
                    }
                }
                keys
            };
            for chunk_id in &stale {
                table.remove((doc_id, model_name, chunk_id.as_str()))?;
            }

            for chunk in chunks {
                let value = encode_record(chunk);
                table.insert(
                    (doc_id, model_name, chunk.chunk_id.as_str()),
                    value.as_slice(),
                )?;
            }

            let mut states = txn.open_table(DOC_STATES)?;
            states.insert(doc_id, state.serialize().as_slice())?;
        }
        txn.commit()?;
        Ok(())
    }

    /// Remove the given documents entirely: embedding rows for every
    /// model plus their index states, in a single transaction.
    pub fn remove_documents(&self, doc_ids: &[String]) -> Result<()> {
        if doc_ids.is_empty() {
            return Ok(());
        }
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(EMBEDDINGS)?;
            let stale: Vec<(String, String, String)> = {
                let mut keys = Vec::new();
                for entry in table.iter()? {
                    let (key, _) = entry?;
                    let (doc, model, chunk) = key.value();
                    if doc_ids.iter().any(|id| id == doc) {
                        keys.push((
                            doc.to_string(),
                            model.to_string(),
                            chunk.to_string(),
                        ));
                    }
                }
                keys
            };
            for (doc, model, chunk) in &stale {
                table.remove((doc.as_str(), model.as_str(), chunk.as_str()))?;
            }

            let mut states = txn.open_table(DOC_STATES)?;
            for doc_id in doc_ids {
                states.remove(doc_id.as_str())?;
            }
        }
        txn.commit()?;
        Ok(())
    }

    /// Release the underlying file handle. Equivalent to dropping the
    /// store; provided so callers can make the release explicit.
    pub fn close(self) {}
}

impl std::fmt::Debug for EmbeddingStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingStore").finish_non_exhaustive()
    }
}

fn encode_record(chunk: &ChunkEmbedding) -> Vec<u8> {
    let emb_bytes: &[u8] = bytemuck::cast_slice(&chunk.embedding);
    let mut buf =
        Vec::with_capacity(HEADER_SIZE + emb_bytes.len() + chunk.preview.len());
    buf.extend_from_slice(&(chunk.chunk_index as u32).to_le_bytes());
    buf.extend_from_slice(&(chunk.start_char as u32).to_le_bytes());
    buf.extend_from_slice(&(chunk.end_char as u32).to_le_bytes());
    buf.extend_from_slice(&(chunk.embedding.len() as u32).to_le_bytes());
    buf.extend_from_slice(emb_bytes);
    buf.extend_from_slice(chunk.preview.as_bytes());
    buf
}

fn decode_record(
    doc_id: &str,
    model_name: &str,
    chunk_id: &str,
    bytes: &[u8],
) -> Option<EmbeddingRecord> {
    if bytes.len() < HEADER_SIZE {
        return None;
    }
    let chunk_index = u32::from_le_bytes(bytes[0..4].try_into().ok()?);
    let start_char = u32::from_le_bytes(bytes[4..8].try_into().ok()?);
    let end_char = u32::from_le_bytes(bytes[8..12].try_into().ok()?);
    let dimension = u32::from_le_bytes(bytes[12..16].try_into().ok()?) as usize;

    let emb_end = HEADER_SIZE + dimension * 4;
    if bytes.len() < emb_end {
        return None;
    }
    // The preview makes the f32 region's alignment unpredictable, so
    // copy rather than cast in place.
    let embedding: Vec<f32> =
        bytemuck::pod_collect_to_vec(&bytes[HEADER_SIZE..emb_end]);
    let chunk_text_preview =
        String::from_utf8_lossy(&bytes[emb_end..]).into_owned();

    Some(EmbeddingRecord {
        doc_id: doc_id.to_string(),
        chunk_id: chunk_id.to_string(),
        model_name: model_name.to_string(),
        chunk_index: chunk_index as usize,
        start_char: start_char as usize,
        end_char: end_char as usize,
        chunk_text_preview,
        embedding,
    })
}

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A document supplied by the host application for one indexing run.
///
/// Documents are owned by the caller and never mutated by the core; the
/// indexer only reads `content` to chunk and fingerprint it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub title: String,
    #[serde(rename = "type")]
    pub doc_type: String,
    pub content: String,
}

impl Document {
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        doc_type: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            doc_type: doc_type.into(),
            content: content.into(),
        }
    }
}

/// SHA-256 fingerprint of document content, hex-encoded.
///
/// The indexer compares this against the stored per-document state to
/// decide whether a document must be re-chunked and re-embedded.
///
/// # Examples
///
/// ```
/// use grounder::document::content_fingerprint;
///
/// let a = content_fingerprint("hello");
/// assert_eq!(a, content_fingerprint("hello"));
/// assert_ne!(a, content_fingerprint("hello!"));
/// assert_eq!(a.len(), 64);
/// ```
pub fn content_fingerprint(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_deterministic() {
        let doc = Document::new("d1", "Title", "text", "some content");
        assert_eq!(
            content_fingerprint(&doc.content),
            content_fingerprint("some content")
        );
    }

    #[test]
    fn fingerprint_changes_with_content() {
        assert_ne!(content_fingerprint("abc"), content_fingerprint("abd"));
    }

    #[test]
    fn empty_content_has_a_fingerprint() {
        assert_eq!(content_fingerprint("").len(), 64);
    }
}

//! Splitting document text into overlapping character-range chunks.
//!
//! Chunk boundaries are a pure function of the document content and the
//! chunking parameters. Identical input always yields identical chunks,
//! which is what lets the incremental indexer skip unchanged documents
//! without re-reading their embeddings.

/// Default minimum chunk length in characters.
pub const DEFAULT_CHUNK_MIN: usize = 200;

/// Default maximum chunk length in characters.
pub const DEFAULT_CHUNK_MAX: usize = 1000;

/// Default overlap between adjacent chunks in characters.
pub const DEFAULT_CHUNK_OVERLAP: usize = 100;

/// How far back from the hard chunk end to look for a whitespace break.
const BOUNDARY_LOOKBACK_CHARS: usize = 100;

/// Chunking parameters, all in characters.
///
/// Invariants: `chunk_min <= chunk_max` and `chunk_overlap < chunk_min`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingParams {
    pub chunk_min: usize,
    pub chunk_max: usize,
    pub chunk_overlap: usize,
}

impl Default for ChunkingParams {
    fn default() -> Self {
        Self {
            chunk_min: DEFAULT_CHUNK_MIN,
            chunk_max: DEFAULT_CHUNK_MAX,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

impl ChunkingParams {
    /// Whether the parameters satisfy the chunker's invariants.
    pub fn is_valid(&self) -> bool {
        self.chunk_min > 0
            && self.chunk_min <= self.chunk_max
            && self.chunk_overlap < self.chunk_min
    }

    /// Fingerprint of the parameters, stored alongside each document's
    /// index state. A parameter change forces re-chunking even when the
    /// document content is unchanged.
    ///
    /// # Examples
    ///
    /// ```
    /// use grounder::chunking::ChunkingParams;
    ///
    /// let params = ChunkingParams { chunk_min: 200, chunk_max: 1000, chunk_overlap: 100 };
    /// assert_eq!(params.fingerprint(), "200-1000-100");
    /// ```
    pub fn fingerprint(&self) -> String {
        format!("{}-{}-{}", self.chunk_min, self.chunk_max, self.chunk_overlap)
    }
}

/// A chunk of one document's content.
///
/// `start_char` and `end_char` are character offsets into the original
/// content, with `start_char < end_char`.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub chunk_index: usize,
    pub start_char: usize,
    pub end_char: usize,
    pub text: String,
}

/// Deterministic chunk identifier derived from the document id and the
/// chunk's position within it.
///
/// # Examples
///
/// ```
/// use grounder::chunking::chunk_id;
///
/// assert_eq!(chunk_id("doc-1", 0), "doc-1::0");
/// assert_eq!(chunk_id("doc-1", 3), "doc-1::3");
/// ```
pub fn chunk_id(doc_id: &str, chunk_index: usize) -> String {
    format!("{doc_id}::{chunk_index}")
}

/// Split text into overlapping chunks bounded by the given parameters.
///
/// Every chunk length falls within `[chunk_min, chunk_max]` except
/// possibly the final chunk, which may be shorter. Consecutive chunks
/// overlap by exactly `chunk_overlap` characters, so no content is ever
/// skipped. Where possible a chunk ends at a whitespace boundary, but a
/// boundary adjustment never shrinks a chunk below `chunk_min`.
///
/// Pure and deterministic; empty content yields no chunks.
///
/// # Examples
///
/// ```
/// use grounder::chunking::{chunk_text, ChunkingParams};
///
/// let params = ChunkingParams::default();
/// let chunks = chunk_text("a short note", &params);
/// assert_eq!(chunks.len(), 1);
/// assert_eq!(chunks[0].text, "a short note");
///
/// let long = "word ".repeat(500);
/// let chunks = chunk_text(&long, &params);
/// assert!(chunks.len() >= 2);
/// ```
pub fn chunk_text(text: &str, params: &ChunkingParams) -> Vec<Chunk> {
    debug_assert!(params.is_valid(), "invalid chunking parameters");

    let char_count = text.chars().count();
    if char_count == 0 {
        return Vec::new();
    }

    if char_count <= params.chunk_max {
        return vec![Chunk {
            chunk_index: 0,
            start_char: 0,
            end_char: char_count,
            text: text.to_string(),
        }];
    }

    // Map of char index -> byte index for O(1) slicing.
    let char_to_byte: Vec<usize> = text
        .char_indices()
        .map(|(byte_idx, _)| byte_idx)
        .chain(std::iter::once(text.len()))
        .collect();

    let mut chunks = Vec::new();
    let mut start_char = 0;

    while start_char < char_count {
        let hard_end = (start_char + params.chunk_max).min(char_count);
        let end_char = if hard_end < char_count {
            boundary_break(
                text,
                &char_to_byte,
                start_char + params.chunk_min,
                hard_end,
            )
        } else {
            hard_end
        };

        chunks.push(Chunk {
            chunk_index: chunks.len(),
            start_char,
            end_char,
            text: text[char_to_byte[start_char]..char_to_byte[end_char]]
                .to_string(),
        });

        if end_char >= char_count {
            break;
        }
        // overlap < chunk_min <= end - start, so this always advances.
        start_char = end_char - params.chunk_overlap;
    }

    chunks
}

/// Find a whitespace break near `hard_end`, never earlier than `floor`.
///
/// Returns the char index just past the last whitespace in the lookback
/// window, or `hard_end` when no acceptable break exists.
fn boundary_break(
    text: &str,
    char_to_byte: &[usize],
    floor: usize,
    hard_end: usize,
) -> usize {
    let search_start = floor.max(hard_end.saturating_sub(BOUNDARY_LOOKBACK_CHARS));
    if search_start >= hard_end {
        return hard_end;
    }

    let region = &text[char_to_byte[search_start]..char_to_byte[hard_end]];
    let Some(ws_offset) = region.rfind(|c: char| c.is_whitespace()) else {
        return hard_end;
    };

    let ws_byte = char_to_byte[search_start] + ws_offset;
    // First char index whose byte offset lies past the whitespace char.
    char_to_byte[search_start..=hard_end]
        .iter()
        .position(|&b| b > ws_byte)
        .map(|offset| search_start + offset)
        .unwrap_or(hard_end)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(min: usize, max: usize, overlap: usize) -> ChunkingParams {
        ChunkingParams {
            chunk_min: min,
            chunk_max: max,
            chunk_overlap: overlap,
        }
    }

    #[test]
    fn empty_content_yields_no_chunks() {
        assert!(chunk_text("", &ChunkingParams::default()).is_empty());
    }

    #[test]
    fn short_text_single_chunk() {
        let chunks = chunk_text("Hello, world!", &ChunkingParams::default());
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].start_char, 0);
        assert_eq!(chunks[0].end_char, 13);
        assert_eq!(chunks[0].text, "Hello, world!");
    }

    #[test]
    fn chunk_lengths_stay_within_bounds() {
        let text = "word ".repeat(400);
        let p = params(100, 250, 40);
        let chunks = chunk_text(&text, &p);
        assert!(chunks.len() > 2);

        for chunk in &chunks[..chunks.len() - 1] {
            let len = chunk.end_char - chunk.start_char;
            assert!(len >= p.chunk_min, "chunk below minimum: {len}");
            assert!(len <= p.chunk_max, "chunk above maximum: {len}");
        }
        // Only the final chunk may be shorter than the minimum.
        let last = chunks.last().unwrap();
        assert!(last.end_char - last.start_char <= p.chunk_max);
    }

    #[test]
    fn consecutive_chunks_overlap_without_gaps() {
        let text = "lorem ipsum dolor sit amet ".repeat(100);
        let p = params(100, 300, 50);
        let chunks = chunk_text(&text, &p);

        for window in chunks.windows(2) {
            assert_eq!(
                window[1].start_char,
                window[0].end_char - p.chunk_overlap,
                "next chunk must start exactly overlap chars before the previous end"
            );
            assert!(window[0].start_char <= window[1].start_char);
        }
        assert_eq!(chunks[0].start_char, 0);
        assert_eq!(chunks.last().unwrap().end_char, text.chars().count());
    }

    #[test]
    fn chunking_is_deterministic() {
        let text = "alpha beta gamma delta ".repeat(80);
        let p = params(120, 400, 60);
        assert_eq!(chunk_text(&text, &p), chunk_text(&text, &p));
    }

    #[test]
    fn prefers_whitespace_breaks() {
        let text = "word ".repeat(200);
        let chunks = chunk_text(&text, &params(100, 300, 0));
        // Interior chunks should end just after a space rather than
        // mid-word.
        for chunk in &chunks[..chunks.len() - 1] {
            assert!(
                chunk.text.ends_with(' '),
                "expected whitespace break, got {:?}",
                &chunk.text[chunk.text.len().saturating_sub(8)..]
            );
        }
    }

    #[test]
    fn handles_multibyte_characters() {
        let text = "café ☕ naïve 日本語 🎉 ".repeat(60);
        let chunks = chunk_text(&text, &params(50, 120, 20));
        assert!(!chunks.is_empty());
        let total_chars = text.chars().count();
        for chunk in &chunks {
            assert!(chunk.start_char < chunk.end_char);
            assert!(chunk.end_char <= total_chars);
            assert_eq!(
                chunk.text.chars().count(),
                chunk.end_char - chunk.start_char
            );
        }
    }

    #[test]
    fn unbreakable_text_falls_back_to_hard_end() {
        let text = "a".repeat(1000);
        let p = params(100, 300, 50);
        let chunks = chunk_text(&text, &p);
        assert_eq!(chunks[0].end_char - chunks[0].start_char, p.chunk_max);
    }

    #[test]
    fn chunk_ids_are_deterministic() {
        assert_eq!(chunk_id("d", 2), chunk_id("d", 2));
        assert_ne!(chunk_id("d", 2), chunk_id("d", 3));
        assert_ne!(chunk_id("d", 2), chunk_id("e", 2));
    }

    #[test]
    fn params_validation() {
        assert!(ChunkingParams::default().is_valid());
        assert!(!params(0, 100, 0).is_valid());
        assert!(!params(200, 100, 50).is_valid());
        assert!(!params(100, 200, 100).is_valid());
    }
}

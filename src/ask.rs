//! Retrieval-augmented answering: question retrieval plus validation of
//! raw generated text against the retrieved evidence.
//!
//! Generated text is adversarial input. Parsing never panics on
//! malformed output, and validation never trusts a citation or quote it
//! cannot verify against the retrieved chunk set: unverifiable pieces
//! are dropped with an explanatory note rather than raised as errors.
//!
//! Two schemas are supported, selected by the model's capability
//! profile: strict structured JSON for standard models, and loose
//! marker-annotated prose (`[1]` ... `SOURCES:`) for small models.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::document::Document;
use crate::error::{Error, Result};
use crate::search::{RetrievedChunk, top_k_by_cosine};
use crate::store::EmbeddingStore;

/// Note appended when one or more quotes fail verbatim verification.
pub const QUOTES_OMITTED_NOTE: &str = "Some quotes omitted due to validation";

/// Note appended when a loose answer has no verifiable citations.
pub const NO_VERIFIED_CITATIONS_NOTE: &str = "No verified citations";

/// A `(doc_id, chunk_id)` reference into the retrieved chunk set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Citation {
    pub doc_id: String,
    pub chunk_id: String,
}

/// A quoted span attributed to a specific chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub doc_id: String,
    pub chunk_id: String,
    pub quote: String,
}

/// One claim of an answer with its supporting references.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claim {
    pub claim: String,
    #[serde(default)]
    pub citations: Vec<Citation>,
    #[serde(default)]
    pub quotes: Vec<Quote>,
}

/// A strict-mode response as parsed, before validation.
#[derive(Debug, Clone, PartialEq)]
pub struct AskResponse {
    pub answer: Vec<Claim>,
    pub notes: String,
}

/// A strict-mode answer after grounding validation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidatedAnswer {
    pub claims: Vec<Claim>,
    pub notes: String,
}

/// Validation thresholds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValidationOptions {
    /// Minimum verified citations across all claims for the answer to
    /// be accepted at all.
    pub min_citations_overall: usize,
}

impl Default for ValidationOptions {
    fn default() -> Self {
        Self {
            min_citations_overall: 2,
        }
    }
}

// ---------------------------------------------------------------------
// Retrieval
// ---------------------------------------------------------------------

/// Input for [`retrieve_top_k_chunks`].
#[derive(Debug, Clone)]
pub struct RetrieveOptions<'a> {
    pub question: &'a str,
    /// Documents supplied for this question; used to resolve full chunk
    /// text by character range. Chunks of documents not in this set
    /// fall back to their stored preview.
    pub documents: &'a [Document],
    pub embedding_model: &'a str,
    pub top_k: usize,
}

/// Embed the question and return the `top_k` most similar chunks, best
/// first, with full metadata and resolved text.
///
/// Read-only; the caller owns the store handle and may run any number
/// of retrievals over it concurrently.
pub fn retrieve_top_k_chunks<F>(
    store: &EmbeddingStore,
    options: &RetrieveOptions<'_>,
    embed_text: &F,
) -> Result<Vec<RetrievedChunk>>
where
    F: Fn(&str) -> std::result::Result<Vec<f32>, String>,
{
    if options.embedding_model.is_empty() {
        return Err(Error::SearchFailed("missing embedding_model".into()));
    }

    let query = embed_text(options.question).map_err(Error::SearchFailed)?;
    if query.is_empty() {
        return Ok(Vec::new());
    }

    let records = store.embeddings_for_model(options.embedding_model)?;

    let by_doc: HashMap<&str, &Document> =
        options.documents.iter().map(|d| (d.id.as_str(), d)).collect();

    let ranked = top_k_by_cosine(records, &query, options.top_k);
    Ok(ranked
        .into_iter()
        .map(|(score, record)| {
            let text = by_doc
                .get(record.doc_id.as_str())
                .map(|doc| {
                    char_slice(&doc.content, record.start_char, record.end_char)
                })
                .unwrap_or_else(|| record.chunk_text_preview.clone());
            RetrievedChunk {
                doc_id: record.doc_id,
                chunk_id: record.chunk_id,
                chunk_index: record.chunk_index,
                start_char: record.start_char,
                end_char: record.end_char,
                score,
                semantic_score: score,
                text,
            }
        })
        .collect())
}

fn char_slice(content: &str, start: usize, end: usize) -> String {
    content
        .chars()
        .skip(start)
        .take(end.saturating_sub(start))
        .collect()
}

// ---------------------------------------------------------------------
// Strict mode
// ---------------------------------------------------------------------

/// Tolerantly extract a strict-mode JSON response from raw model text.
///
/// Extraction strategies are tried in order: direct parse, fenced code
/// block, first balanced `{...}` object. The known key drift `answers`
/// is accepted in place of `answer`. Fails with `PARSE_FAILED` only
/// when no JSON-shaped object is recoverable at all; malformed fields
/// inside a recovered object degrade to empty values instead.
///
/// # Examples
///
/// ```
/// use grounder::ask::parse_ask_json;
///
/// let raw = r#"Sure! {"answer": [{"claim": "chunking is deterministic"}], "notes": ""}"#;
/// let parsed = parse_ask_json(raw).unwrap();
/// assert_eq!(parsed.answer.len(), 1);
/// assert_eq!(parsed.answer[0].claim, "chunking is deterministic");
///
/// assert!(parse_ask_json("no json here at all").is_err());
/// ```
pub fn parse_ask_json(text: &str) -> Result<AskResponse> {
    let value = extract_json_object(text).ok_or_else(|| {
        Error::ParseFailed("no JSON object found in model output".into())
    })?;
    Ok(ask_response_from_value(&value))
}

fn extract_json_object(text: &str) -> Option<Value> {
    let trimmed = text.trim();

    // Strategy 1: the whole output is the object.
    if let Ok(value) = serde_json::from_str::<Value>(trimmed)
        && value.is_object()
    {
        return Some(value);
    }

    // Strategy 2: object inside a markdown code fence.
    if let Some(body) = fenced_block(trimmed)
        && let Ok(value) = serde_json::from_str::<Value>(body.trim())
        && value.is_object()
    {
        return Some(value);
    }

    // Strategy 3: first balanced {...} inside surrounding prose.
    balanced_object(trimmed)
}

/// The body of the first ``` fenced block, language tag stripped.
fn fenced_block(text: &str) -> Option<&str> {
    let start = text.find("```")?;
    let after = &text[start + 3..];
    let body_start = after.find('\n').map(|i| i + 1).unwrap_or(0);
    let body = &after[body_start..];
    let end = body.find("```")?;
    Some(&body[..end])
}

/// Scan for the first balanced top-level `{...}` and parse it,
/// respecting string literals and escapes.
fn balanced_object(text: &str) -> Option<Value> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, byte) in text.bytes().enumerate().skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if byte == b'\\' {
                escaped = true;
            } else if byte == b'"' {
                in_string = false;
            }
            continue;
        }
        match byte {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return serde_json::from_str(&text[start..=i]).ok();
                }
            }
            _ => {}
        }
    }
    None
}

fn ask_response_from_value(value: &Value) -> AskResponse {
    let answer = value
        .get("answer")
        .or_else(|| value.get("answers"))
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(claim_from_value).collect())
        .unwrap_or_default();
    let notes = value
        .get("notes")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    AskResponse { answer, notes }
}

fn claim_from_value(value: &Value) -> Option<Claim> {
    let obj = value.as_object()?;
    let claim = obj
        .get("claim")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let citations = obj
        .get("citations")
        .and_then(Value::as_array)
        .map(|a| a.iter().filter_map(citation_from_value).collect())
        .unwrap_or_default();
    let quotes = obj
        .get("quotes")
        .and_then(Value::as_array)
        .map(|a| a.iter().filter_map(quote_from_value).collect())
        .unwrap_or_default();
    Some(Claim {
        claim,
        citations,
        quotes,
    })
}

fn citation_from_value(value: &Value) -> Option<Citation> {
    Some(Citation {
        doc_id: value.get("doc_id")?.as_str()?.to_string(),
        chunk_id: value.get("chunk_id")?.as_str()?.to_string(),
    })
}

fn quote_from_value(value: &Value) -> Option<Quote> {
    Some(Quote {
        doc_id: value.get("doc_id")?.as_str()?.to_string(),
        chunk_id: value.get("chunk_id")?.as_str()?.to_string(),
        quote: value.get("quote")?.as_str()?.to_string(),
    })
}

/// Validate a parsed strict-mode response against the retrieved set.
///
/// Citations to unknown `(doc_id, chunk_id)` pairs are dropped. Quotes
/// must be exact case-sensitive substrings of their cited chunk's text;
/// failures are dropped silently with [`QUOTES_OMITTED_NOTE`] appended
/// once. If the total of verified citations across all claims is below
/// `min_citations_overall`, the whole answer is rejected (claims
/// emptied) with a coverage note: grounding is an all-or-nothing gate
/// at the response level.
pub fn validate_ask_response(
    parsed: &AskResponse,
    retrieved: &[RetrievedChunk],
    options: &ValidationOptions,
) -> ValidatedAnswer {
    let by_key: HashMap<(&str, &str), &RetrievedChunk> = retrieved
        .iter()
        .map(|c| ((c.doc_id.as_str(), c.chunk_id.as_str()), c))
        .collect();

    let mut notes: Vec<String> = Vec::new();
    if !parsed.notes.is_empty() {
        notes.push(parsed.notes.clone());
    }

    let mut quotes_dropped = false;
    let mut verified_total = 0usize;
    let mut claims = Vec::with_capacity(parsed.answer.len());

    for claim in &parsed.answer {
        let citations: Vec<Citation> = claim
            .citations
            .iter()
            .filter(|c| {
                by_key.contains_key(&(c.doc_id.as_str(), c.chunk_id.as_str()))
            })
            .cloned()
            .collect();
        verified_total += citations.len();

        let quotes: Vec<Quote> = claim
            .quotes
            .iter()
            .filter(|q| {
                let verified = by_key
                    .get(&(q.doc_id.as_str(), q.chunk_id.as_str()))
                    .is_some_and(|chunk| chunk.text.contains(&q.quote));
                if !verified {
                    quotes_dropped = true;
                }
                verified
            })
            .cloned()
            .collect();

        claims.push(Claim {
            claim: claim.claim.clone(),
            citations,
            quotes,
        });
    }

    if quotes_dropped {
        notes.push(QUOTES_OMITTED_NOTE.to_string());
    }

    if verified_total < options.min_citations_overall {
        notes.push(format!(
            "Answer rejected: {verified_total} verified citation(s), \
             {} required",
            options.min_citations_overall
        ));
        return ValidatedAnswer {
            claims: Vec::new(),
            notes: notes.join("; "),
        };
    }

    ValidatedAnswer {
        claims,
        notes: notes.join("; "),
    }
}

/// Parse and validate strict-mode output in one step. The single entry
/// point for callers that already know strict mode applies; loose-mode
/// callers use [`parse_loose_cited_response`] +
/// [`validate_loose_cited_response`] instead, per the model profile's
/// recommended mode.
pub fn parse_and_validate_ask_output(
    text: &str,
    retrieved: &[RetrievedChunk],
    options: &ValidationOptions,
) -> Result<ValidatedAnswer> {
    let parsed = parse_ask_json(text)?;
    Ok(validate_ask_response(&parsed, retrieved, options))
}

// ---------------------------------------------------------------------
// Loose mode
// ---------------------------------------------------------------------

/// A loose-mode response as parsed: free-form prose with `[n]` markers
/// and a `SOURCES:` mapping. Parsing is infallible; missing pieces come
/// back empty.
#[derive(Debug, Clone, PartialEq)]
pub struct LooseParsed {
    pub answer_text: String,
    /// Marker numbers in order of first appearance in the prose.
    pub markers: Vec<u32>,
    /// Marker number -> cited chunk, from the sources section.
    pub refs: BTreeMap<u32, Citation>,
}

/// One resolved reference of a validated loose answer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LooseCitationRef {
    pub marker: u32,
    pub doc_id: String,
    pub chunk_id: String,
    pub verified: bool,
}

/// A loose-mode answer after validation. The answer text is always
/// preserved, even with zero verified citations.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LooseAnswer {
    pub kind: &'static str,
    pub answer_text: String,
    pub citation_refs: Vec<LooseCitationRef>,
    pub verified_citation_count: usize,
    pub notes: String,
}

/// Parse loose marker-annotated prose.
///
/// The answer is everything before the first `SOURCES:` heading
/// (case and spacing tolerant); lines after it map marker numbers to
/// `{doc_id, chunk_id}` JSON objects, accepting `[1] {...}`,
/// `1. {...}`, and `1: {...}` forms. Never fails: unrecognized lines
/// are skipped.
///
/// # Examples
///
/// ```
/// use grounder::ask::parse_loose_cited_response;
///
/// let raw = "Chunking is deterministic [1].\n\nsources:\n[1] {\"doc_id\": \"d1\", \"chunk_id\": \"d1::0\"}";
/// let parsed = parse_loose_cited_response(raw);
/// assert_eq!(parsed.answer_text, "Chunking is deterministic [1].");
/// assert_eq!(parsed.markers, vec![1]);
/// assert_eq!(parsed.refs[&1].doc_id, "d1");
/// ```
pub fn parse_loose_cited_response(text: &str) -> LooseParsed {
    let mut answer_lines: Vec<&str> = Vec::new();
    let mut source_lines: Vec<&str> = Vec::new();
    let mut in_sources = false;

    for line in text.lines() {
        if !in_sources && let Some(rest) = sources_heading(line) {
            in_sources = true;
            if !rest.is_empty() {
                source_lines.push(rest);
            }
            continue;
        }
        if in_sources {
            source_lines.push(line);
        } else {
            answer_lines.push(line);
        }
    }

    let answer_text = answer_lines.join("\n").trim().to_string();
    let markers = scan_markers(&answer_text);

    let mut refs = BTreeMap::new();
    for line in source_lines {
        if let Some((marker, citation)) = parse_source_line(line) {
            refs.insert(marker, citation);
        }
    }

    LooseParsed {
        answer_text,
        markers,
        refs,
    }
}

/// If `line` is a `SOURCES:` heading, return whatever follows the colon
/// on the same line (possibly empty). Tolerates casing and spacing.
fn sources_heading(line: &str) -> Option<&str> {
    let trimmed = line.trim_start();
    if !trimmed
        .get(..7)
        .is_some_and(|head| head.eq_ignore_ascii_case("sources"))
    {
        return None;
    }
    let rest = trimmed[7..].trim_start();
    rest.strip_prefix(':').map(str::trim).or_else(|| {
        // A bare "SOURCES" line with nothing after it also counts.
        rest.is_empty().then_some("")
    })
}

/// Bracketed marker numbers in order of first appearance.
fn scan_markers(text: &str) -> Vec<u32> {
    let mut markers = Vec::new();
    let mut seen = HashSet::new();
    let mut rest = text;
    while let Some(open) = rest.find('[') {
        rest = &rest[open + 1..];
        let Some(close) = rest.find(']') else { break };
        let inner = &rest[..close];
        if !inner.is_empty()
            && inner.bytes().all(|b| b.is_ascii_digit())
            && let Ok(n) = inner.parse::<u32>()
            && seen.insert(n)
        {
            markers.push(n);
        }
        rest = &rest[close + 1..];
    }
    markers
}

/// Parse one sources line: the first digit run is the marker number,
/// the first balanced brace group is the mapping object.
fn parse_source_line(line: &str) -> Option<(u32, Citation)> {
    let digits_start = line.find(|c: char| c.is_ascii_digit())?;
    let digits: String = line[digits_start..]
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    let marker = digits.parse::<u32>().ok()?;

    let object = balanced_object(line)?;
    let citation = citation_from_value(&object)?;
    Some((marker, citation))
}

/// Validate a parsed loose response against the retrieved set.
///
/// Each mapped reference is checked for membership in `retrieved`.
/// Unlike strict mode the answer text survives regardless; zero
/// verified references appends [`NO_VERIFIED_CITATIONS_NOTE`], and a
/// below-threshold count appends a coverage note, but nothing is
/// discarded.
pub fn validate_loose_cited_response(
    parsed: &LooseParsed,
    retrieved: &[RetrievedChunk],
    options: &ValidationOptions,
) -> LooseAnswer {
    let keys: HashSet<(&str, &str)> = retrieved
        .iter()
        .map(|c| (c.doc_id.as_str(), c.chunk_id.as_str()))
        .collect();

    let citation_refs: Vec<LooseCitationRef> = parsed
        .refs
        .iter()
        .map(|(&marker, citation)| LooseCitationRef {
            marker,
            doc_id: citation.doc_id.clone(),
            chunk_id: citation.chunk_id.clone(),
            verified: keys.contains(&(
                citation.doc_id.as_str(),
                citation.chunk_id.as_str(),
            )),
        })
        .collect();

    let verified_citation_count =
        citation_refs.iter().filter(|r| r.verified).count();

    let notes = if verified_citation_count == 0 {
        NO_VERIFIED_CITATIONS_NOTE.to_string()
    } else if verified_citation_count < options.min_citations_overall {
        format!(
            "Only {verified_citation_count} of {} required citations verified",
            options.min_citations_overall
        )
    } else {
        String::new()
    };

    LooseAnswer {
        kind: "loose",
        answer_text: parsed.answer_text.clone(),
        citation_refs,
        verified_citation_count,
        notes,
    }
}

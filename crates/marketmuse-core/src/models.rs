//! Data models shared by the loader, chunker, index, retriever and
//! answer orchestrator.
//!
//! - [`Document`]: one uploaded file, normalized to plain text.
//! - [`Passage`]: a contiguous window of a document's text, the unit of
//!   embedding and retrieval.
//! - [`IndexEntry`]: a passage paired with its embedding vector.
//! - [`RetrievalResult`]: the transient ranked output of a query.
//! - [`Citation`] and [`Answer`]: what the orchestrator hands back.

use serde::{Deserialize, Serialize};

/// An uploaded document after text extraction.
///
/// Immutable once created. Removed by corpus reset, explicit delete, or
/// replacement when a file with the same name is re-ingested.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// UUID v4 assigned by the loader.
    pub id: String,
    /// Original filename as supplied by the uploader.
    pub filename: String,
    /// Canonical format name (`pdf`, `docx`, `pptx`, `html`, `txt`, `md`).
    pub format: String,
    /// Size of the raw upload in bytes.
    pub byte_size: u64,
    /// SHA-256 hex digest of the raw upload.
    pub content_hash: String,
    /// Unix timestamp (seconds) of ingestion.
    pub ingested_at: i64,
    /// Normalized plain text. Passage offsets index into this string.
    pub body: String,
}

/// Listing row for a document, without its body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentSummary {
    pub id: String,
    pub filename: String,
    pub format: String,
    pub byte_size: u64,
    pub ingested_at: i64,
    pub passages: usize,
}

impl DocumentSummary {
    pub fn new(doc: &Document, passages: usize) -> Self {
        Self {
            id: doc.id.clone(),
            filename: doc.filename.clone(),
            format: doc.format.clone(),
            byte_size: doc.byte_size,
            ingested_at: doc.ingested_at,
            passages,
        }
    }
}

/// Half-open character range `[start, end)` into a document body.
///
/// Offsets count Unicode scalar values, not bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OffsetRange {
    pub start: usize,
    pub end: usize,
}

impl OffsetRange {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn overlaps(&self, other: &OffsetRange) -> bool {
        !self.is_empty() && !other.is_empty() && self.start < other.end && other.start < self.end
    }
}

impl std::fmt::Display for OffsetRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

/// A contiguous window of a document's normalized text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Passage {
    /// UUID v4.
    pub id: String,
    pub document_id: String,
    /// Zero-based position within the document. Contiguous per document.
    pub ordinal: usize,
    pub text: String,
    pub range: OffsetRange,
    /// SHA-256 hex digest of `text`.
    pub hash: String,
}

impl Passage {
    /// Length in characters.
    pub fn char_len(&self) -> usize {
        self.range.len()
    }
}

/// A passage paired with its embedding. Never mutated after insertion;
/// replacement is delete-then-reinsert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub passage: Passage,
    pub vector: Vec<f32>,
}

/// One ranked hit of a retrieval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedPassage {
    pub passage: Passage,
    pub filename: String,
    /// Raw distance reported by the index (lower is closer).
    pub distance: f32,
    /// Normalized relevance in `[0, 1]` (higher is better).
    pub relevance: f32,
}

/// Ranked passages for one query, best first. May be empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub query: String,
    pub passages: Vec<RetrievedPassage>,
}

impl RetrievalResult {
    pub fn empty(query: &str) -> Self {
        Self {
            query: query.to_string(),
            passages: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.passages.is_empty()
    }

    pub fn len(&self) -> usize {
        self.passages.len()
    }
}

/// Provenance for one passage that grounded an answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    pub document_id: String,
    pub filename: String,
    pub ordinal: usize,
    pub range: OffsetRange,
    pub relevance: f32,
}

impl From<&RetrievedPassage> for Citation {
    fn from(hit: &RetrievedPassage) -> Self {
        Self {
            document_id: hit.passage.document_id.clone(),
            filename: hit.filename.clone(),
            ordinal: hit.passage.ordinal,
            range: hit.passage.range,
            relevance: hit.relevance,
        }
    }
}

/// Outcome of a question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Answer {
    /// Generated text grounded in the cited passages.
    Grounded { text: String, citations: Vec<Citation> },
    /// Retrieval found nothing relevant; the generator was not called.
    NoGroundedAnswer,
}

impl Answer {
    pub fn citations(&self) -> &[Citation] {
        match self {
            Answer::Grounded { citations, .. } => citations,
            Answer::NoGroundedAnswer => &[],
        }
    }

    pub fn is_grounded(&self) -> bool {
        matches!(self, Answer::Grounded { .. })
    }
}

/// A question, what was retrieved for it, and the answer.
///
/// Transient: held by the caller for the length of a session, never
/// persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub question: String,
    pub retrieved: Vec<Citation>,
    pub answer: Answer,
    pub asked_at: i64,
}

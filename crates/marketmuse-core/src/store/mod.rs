//! Corpus storage abstraction.
//!
//! The [`Store`] trait owns the document/passage metadata and the vector
//! index together, so that an insert, delete or reset is visible to
//! readers all at once. Implementations must be `Send + Sync`; writes are
//! serialized, reads proceed concurrently and see either the state before
//! or after any write, never a mix.

pub mod memory;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::Result;
use crate::index::Metric;
use crate::models::{Document, DocumentSummary, IndexEntry, Passage};

/// A search hit resolved against the same snapshot as the index lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct Hit {
    pub passage: Passage,
    pub filename: String,
    pub distance: f32,
}

/// Corpus counters for `stats` surfaces.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoreStats {
    pub documents: usize,
    pub passages: usize,
    pub vectors: usize,
    pub dims: Option<usize>,
    pub metric: Metric,
    /// `(format, document count)`, sorted by format name.
    pub by_format: Vec<(String, usize)>,
}

/// Abstract corpus backend.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`insert_document`](Store::insert_document) | Add a document and all its entries atomically |
/// | [`insert_entries`](Store::insert_entries) | Add entries to an existing document atomically |
/// | [`delete_passage`](Store::delete_passage) | Remove one passage and its vector |
/// | [`delete_document`](Store::delete_document) | Remove a document, cascading to passages |
/// | [`search`](Store::search) | `k` nearest passages to a query vector |
/// | [`search_filtered`](Store::search_filtered) | Native search restricted to documents, if supported |
/// | [`reset`](Store::reset) | Atomically empty the corpus |
#[async_trait]
pub trait Store: Send + Sync {
    fn metric(&self) -> Metric;

    /// Insert a document and its entries as one unit: either all become
    /// searchable or none do.
    async fn insert_document(&self, doc: &Document, entries: &[IndexEntry]) -> Result<()>;

    /// Insert entries for documents already in the store, as one unit.
    async fn insert_entries(&self, entries: &[IndexEntry]) -> Result<()>;

    async fn delete_passage(&self, passage_id: &str) -> Result<bool>;

    async fn delete_document(&self, document_id: &str) -> Result<bool>;

    /// The `k` nearest passages, closest first. A prefix of the same call
    /// with a larger `k` while the corpus is unchanged.
    async fn search(&self, query: &[f32], k: usize) -> Result<Vec<Hit>>;

    /// Search restricted to `document_ids`. `Ok(None)` means the backend
    /// has no native filtering and the caller must post-filter.
    async fn search_filtered(
        &self,
        _query: &[f32],
        _k: usize,
        _document_ids: &[String],
    ) -> Result<Option<Vec<Hit>>> {
        Ok(None)
    }

    async fn get_document(&self, id: &str) -> Result<Option<Document>>;

    /// All documents with this exact filename, oldest first.
    async fn find_by_filename(&self, filename: &str) -> Result<Vec<Document>>;

    async fn list_documents(&self) -> Result<Vec<DocumentSummary>>;

    /// A document's passages in ordinal order.
    async fn passages(&self, document_id: &str) -> Result<Vec<Passage>>;

    async fn stats(&self) -> Result<StoreStats>;

    /// Remove every document, passage and vector in one step.
    async fn reset(&self) -> Result<()>;
}

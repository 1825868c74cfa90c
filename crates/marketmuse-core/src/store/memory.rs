//! In-memory corpus and the [`InMemoryStore`] built on it.
//!
//! [`Corpus`] is the complete searchable state: documents, passages and
//! the vector index. Persisted stores keep one behind a lock as their
//! read path and apply every committed write to it, so searches never
//! touch disk.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::index::{IndexSettings, Metric, VectorIndex};
use crate::models::{Document, DocumentSummary, IndexEntry, Passage};

use super::{Hit, Store, StoreStats};

#[derive(Debug, Clone)]
pub struct Corpus {
    documents: HashMap<String, Document>,
    passages: HashMap<String, Passage>,
    by_document: HashMap<String, Vec<String>>,
    index: VectorIndex,
}

impl Corpus {
    pub fn new(index: VectorIndex) -> Self {
        Self {
            documents: HashMap::new(),
            passages: HashMap::new(),
            by_document: HashMap::new(),
            index,
        }
    }

    pub fn index(&self) -> &VectorIndex {
        &self.index
    }

    pub fn metric(&self) -> Metric {
        self.index.metric()
    }

    /// Check that `entries` could be applied without error. `new_doc` is a
    /// document that will be added in the same write.
    pub fn validate(&self, new_doc: Option<&Document>, entries: &[IndexEntry]) -> Result<()> {
        let mut seen = HashSet::new();
        for entry in entries {
            self.index.check(&entry.vector)?;
            let doc_id = &entry.passage.document_id;
            let known = self.documents.contains_key(doc_id)
                || new_doc.map(|d| &d.id == doc_id).unwrap_or(false);
            if !known {
                return Err(Error::IndexIo(format!(
                    "passage {} references unknown document {}",
                    entry.passage.id, doc_id
                )));
            }
            if !seen.insert(entry.passage.id.as_str()) {
                return Err(Error::IndexIo(format!(
                    "duplicate passage id {} in one insert",
                    entry.passage.id
                )));
            }
        }
        if let Some(first) = entries.first() {
            let dims = first.vector.len();
            if let Some(other) = entries.iter().find(|e| e.vector.len() != dims) {
                return Err(Error::DimensionMismatch {
                    expected: dims,
                    got: other.vector.len(),
                });
            }
        }
        Ok(())
    }

    pub fn add_document(&mut self, doc: &Document) {
        self.documents.insert(doc.id.clone(), doc.clone());
        self.by_document.entry(doc.id.clone()).or_default();
    }

    /// Apply entries previously accepted by [`validate`](Self::validate).
    pub fn add_entries(&mut self, entries: &[IndexEntry]) -> Result<()> {
        for entry in entries {
            let passage = &entry.passage;
            self.index.insert(&passage.id, entry.vector.clone())?;
            let ids = self.by_document.entry(passage.document_id.clone()).or_default();
            if !ids.contains(&passage.id) {
                ids.push(passage.id.clone());
            }
            self.passages.insert(passage.id.clone(), passage.clone());
        }
        Ok(())
    }

    pub fn remove_passage(&mut self, passage_id: &str) -> bool {
        let Some(passage) = self.passages.remove(passage_id) else {
            return false;
        };
        self.index.delete(passage_id);
        if let Some(ids) = self.by_document.get_mut(&passage.document_id) {
            ids.retain(|id| id != passage_id);
        }
        true
    }

    pub fn remove_document(&mut self, document_id: &str) -> bool {
        if self.documents.remove(document_id).is_none() {
            return false;
        }
        for id in self.by_document.remove(document_id).unwrap_or_default() {
            self.passages.remove(&id);
            self.index.delete(&id);
        }
        true
    }

    pub fn clear(&mut self) {
        self.documents.clear();
        self.passages.clear();
        self.by_document.clear();
        self.index.clear();
    }

    /// Swap in a rebuilt index. Every live passage must be present in it.
    pub fn replace_index(&mut self, index: VectorIndex) -> Result<()> {
        if let Some(missing) = self.passages.keys().find(|id| !index.contains(id)) {
            return Err(Error::IndexIo(format!(
                "rebuilt index is missing passage {}",
                missing
            )));
        }
        self.index = index;
        Ok(())
    }

    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<Hit>> {
        let ranked = self.index.search(query, k)?;
        Ok(self.resolve(ranked))
    }

    pub fn search_within(
        &self,
        query: &[f32],
        k: usize,
        document_ids: &[String],
    ) -> Result<Vec<Hit>> {
        let allowed: HashSet<String> = document_ids
            .iter()
            .filter_map(|d| self.by_document.get(d))
            .flatten()
            .cloned()
            .collect();
        let ranked = self.index.search_filtered(query, k, &allowed)?;
        Ok(self.resolve(ranked))
    }

    fn resolve(&self, ranked: Vec<(String, f32)>) -> Vec<Hit> {
        ranked
            .into_iter()
            .filter_map(|(id, distance)| {
                let passage = self.passages.get(&id)?;
                let doc = self.documents.get(&passage.document_id)?;
                Some(Hit {
                    passage: passage.clone(),
                    filename: doc.filename.clone(),
                    distance,
                })
            })
            .collect()
    }

    pub fn document(&self, id: &str) -> Option<&Document> {
        self.documents.get(id)
    }

    pub fn documents_named(&self, filename: &str) -> Vec<Document> {
        let mut docs: Vec<Document> = self
            .documents
            .values()
            .filter(|d| d.filename == filename)
            .cloned()
            .collect();
        docs.sort_by(|a, b| a.ingested_at.cmp(&b.ingested_at).then(a.id.cmp(&b.id)));
        docs
    }

    pub fn summaries(&self) -> Vec<DocumentSummary> {
        let mut rows: Vec<DocumentSummary> = self
            .documents
            .values()
            .map(|d| DocumentSummary::new(d, self.by_document.get(&d.id).map_or(0, Vec::len)))
            .collect();
        rows.sort_by(|a, b| {
            a.filename
                .cmp(&b.filename)
                .then(a.ingested_at.cmp(&b.ingested_at))
        });
        rows
    }

    pub fn passages_of(&self, document_id: &str) -> Vec<Passage> {
        let mut passages: Vec<Passage> = self
            .by_document
            .get(document_id)
            .into_iter()
            .flatten()
            .filter_map(|id| self.passages.get(id).cloned())
            .collect();
        passages.sort_by_key(|p| p.ordinal);
        passages
    }

    pub fn all_passages(&self) -> Vec<Passage> {
        let mut passages: Vec<Passage> = self.passages.values().cloned().collect();
        passages.sort_by(|a, b| {
            a.document_id
                .cmp(&b.document_id)
                .then(a.ordinal.cmp(&b.ordinal))
        });
        passages
    }

    pub fn stats(&self) -> StoreStats {
        let mut by_format: BTreeMap<String, usize> = BTreeMap::new();
        for doc in self.documents.values() {
            *by_format.entry(doc.format.clone()).or_default() += 1;
        }
        StoreStats {
            documents: self.documents.len(),
            passages: self.passages.len(),
            vectors: self.index.len(),
            dims: self.index.dims(),
            metric: self.index.metric(),
            by_format: by_format.into_iter().collect(),
        }
    }
}

/// Store for tests and embedding in other processes; nothing is persisted.
pub struct InMemoryStore {
    corpus: RwLock<Corpus>,
}

impl InMemoryStore {
    pub fn new(settings: IndexSettings) -> Self {
        Self {
            corpus: RwLock::new(Corpus::new(VectorIndex::new(settings))),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Corpus>> {
        self.corpus
            .read()
            .map_err(|_| Error::IndexIo("corpus lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Corpus>> {
        self.corpus
            .write()
            .map_err(|_| Error::IndexIo("corpus lock poisoned".to_string()))
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new(IndexSettings::default())
    }
}

#[async_trait]
impl Store for InMemoryStore {
    fn metric(&self) -> Metric {
        self.read().map(|c| c.metric()).unwrap_or(Metric::Cosine)
    }

    async fn insert_document(&self, doc: &Document, entries: &[IndexEntry]) -> Result<()> {
        let mut corpus = self.write()?;
        corpus.validate(Some(doc), entries)?;
        corpus.add_document(doc);
        corpus.add_entries(entries)
    }

    async fn insert_entries(&self, entries: &[IndexEntry]) -> Result<()> {
        let mut corpus = self.write()?;
        corpus.validate(None, entries)?;
        corpus.add_entries(entries)
    }

    async fn delete_passage(&self, passage_id: &str) -> Result<bool> {
        Ok(self.write()?.remove_passage(passage_id))
    }

    async fn delete_document(&self, document_id: &str) -> Result<bool> {
        Ok(self.write()?.remove_document(document_id))
    }

    async fn search(&self, query: &[f32], k: usize) -> Result<Vec<Hit>> {
        self.read()?.search(query, k)
    }

    async fn search_filtered(
        &self,
        query: &[f32],
        k: usize,
        document_ids: &[String],
    ) -> Result<Option<Vec<Hit>>> {
        self.read()?.search_within(query, k, document_ids).map(Some)
    }

    async fn get_document(&self, id: &str) -> Result<Option<Document>> {
        Ok(self.read()?.document(id).cloned())
    }

    async fn find_by_filename(&self, filename: &str) -> Result<Vec<Document>> {
        Ok(self.read()?.documents_named(filename))
    }

    async fn list_documents(&self) -> Result<Vec<DocumentSummary>> {
        Ok(self.read()?.summaries())
    }

    async fn passages(&self, document_id: &str) -> Result<Vec<Passage>> {
        Ok(self.read()?.passages_of(document_id))
    }

    async fn stats(&self) -> Result<StoreStats> {
        Ok(self.read()?.stats())
    }

    async fn reset(&self) -> Result<()> {
        self.write()?.clear();
        Ok(())
    }
}

//! SQLite-backed [`Store`].
//!
//! SQLite is the durable copy; an in-memory [`Corpus`] (documents,
//! passages, HNSW index) is the read path. On open every row is loaded and
//! the graph is rebuilt from `passage_vectors` in rowid order, so a reopened
//! store answers queries exactly as before it was closed.
//!
//! Writers take `writer` for the whole operation, validate against the
//! corpus, commit one SQL transaction, then apply the change to the corpus
//! under its write lock. Readers only ever take the read lock and see the
//! corpus before or after a write, never part of one.

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use marketmuse_core::embedding::{blob_to_vec, vec_to_blob, Embedder};
use marketmuse_core::index::{IndexSettings, Metric, VectorIndex};
use marketmuse_core::models::{Document, DocumentSummary, IndexEntry, OffsetRange, Passage};
use marketmuse_core::store::memory::Corpus;
use marketmuse_core::store::{Hit, Store, StoreStats};
use marketmuse_core::{Error, Result};

use crate::embedding::embed_in_batches;

/// What the stored vectors were built with.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct IndexMeta {
    pub model: String,
    pub dims: usize,
    pub metric: Metric,
}

pub struct SqliteStore {
    pool: SqlitePool,
    writer: tokio::sync::Mutex<()>,
    corpus: RwLock<Corpus>,
    meta: RwLock<Option<IndexMeta>>,
    /// Model recorded in `index_meta` when vectors are written.
    model: RwLock<String>,
}

fn io(e: impl std::fmt::Display) -> Error {
    Error::IndexIo(e.to_string())
}

impl SqliteStore {
    /// Load the corpus from `pool` (already migrated) and rebuild the index.
    ///
    /// A stored metric wins over `settings.metric`: the index metric is
    /// fixed once vectors exist.
    pub async fn open(pool: SqlitePool, mut settings: IndexSettings, model: &str) -> Result<Self> {
        let meta = load_meta(&pool).await?;
        if let Some(m) = &meta {
            if m.metric != settings.metric {
                tracing::warn!(
                    stored = %m.metric,
                    configured = %settings.metric,
                    "index metric is fixed once vectors exist; using the stored metric"
                );
                settings.metric = m.metric;
            }
        }

        let corpus = load_corpus(&pool, settings).await?;
        tracing::info!(
            documents = corpus.stats().documents,
            vectors = corpus.index().len(),
            "corpus loaded"
        );

        Ok(Self {
            pool,
            writer: tokio::sync::Mutex::new(()),
            corpus: RwLock::new(corpus),
            meta: RwLock::new(meta),
            model: RwLock::new(model.to_string()),
        })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Model, dims and metric of the stored vectors; `None` when empty.
    pub fn meta(&self) -> Option<IndexMeta> {
        self.meta.read().ok().and_then(|m| m.clone())
    }

    pub async fn close(self) {
        self.pool.close().await;
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

    fn set_meta(&self, meta: Option<IndexMeta>) {
        if let Ok(mut slot) = self.meta.write() {
            *slot = meta;
        }
    }

    fn meta_for(&self, entries: &[IndexEntry]) -> Option<IndexMeta> {
        let dims = entries.first()?.vector.len();
        Some(IndexMeta {
            model: self.model.read().ok()?.clone(),
            dims,
            metric: self.metric(),
        })
    }

    async fn write_entries(
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        entries: &[IndexEntry],
    ) -> Result<()> {
        for entry in entries {
            let p = &entry.passage;
            sqlx::query(
                "INSERT INTO passages (id, document_id, ordinal, text, start_offset, end_offset, hash) \
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&p.id)
            .bind(&p.document_id)
            .bind(p.ordinal as i64)
            .bind(&p.text)
            .bind(p.range.start as i64)
            .bind(p.range.end as i64)
            .bind(&p.hash)
            .execute(&mut **tx)
            .await
            .map_err(io)?;

            sqlx::query(
                "INSERT INTO passage_vectors (passage_id, document_id, dims, embedding) VALUES (?, ?, ?, ?)",
            )
            .bind(&p.id)
            .bind(&p.document_id)
            .bind(entry.vector.len() as i64)
            .bind(vec_to_blob(&entry.vector))
            .execute(&mut **tx)
            .await
            .map_err(io)?;
        }
        Ok(())
    }

    async fn write_meta(
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        meta: &IndexMeta,
    ) -> Result<()> {
        let rows = [
            ("model", meta.model.clone()),
            ("dims", meta.dims.to_string()),
            ("metric", meta.metric.as_str().to_string()),
        ];
        for (key, value) in rows {
            sqlx::query("INSERT OR REPLACE INTO index_meta (key, value) VALUES (?, ?)")
                .bind(key)
                .bind(value)
                .execute(&mut **tx)
                .await
                .map_err(io)?;
        }
        Ok(())
    }

    /// Re-embed every passage with `embedder` and swap in a fresh index.
    ///
    /// All or nothing: if any passage fails to embed, the stored vectors
    /// and the live index are left untouched. Returns the number of
    /// passages re-embedded.
    pub async fn reindex(
        &self,
        embedder: &dyn Embedder,
        batch_size: usize,
        timeout: Duration,
    ) -> Result<usize> {
        let _guard = self.writer.lock().await;

        let passages = self.read()?.all_passages();
        let texts: Vec<String> = passages.iter().map(|p| p.text.clone()).collect();
        let vectors = embed_in_batches(embedder, &texts, batch_size, timeout).await;

        let mut entries = Vec::with_capacity(passages.len());
        for (passage, vector) in passages.into_iter().zip(vectors) {
            entries.push(IndexEntry {
                passage,
                vector: vector?,
            });
        }

        let settings = *self.read()?.index().settings();
        let mut index = VectorIndex::new(settings);
        for entry in &entries {
            index.insert(&entry.passage.id, entry.vector.clone())?;
        }
        let meta = IndexMeta {
            model: embedder.model_name().to_string(),
            dims: embedder.dims(),
            metric: settings.metric,
        };

        let mut tx = self.pool.begin().await.map_err(io)?;
        sqlx::query("DELETE FROM passage_vectors")
            .execute(&mut *tx)
            .await
            .map_err(io)?;
        for entry in &entries {
            sqlx::query(
                "INSERT INTO passage_vectors (passage_id, document_id, dims, embedding) VALUES (?, ?, ?, ?)",
            )
            .bind(&entry.passage.id)
            .bind(&entry.passage.document_id)
            .bind(entry.vector.len() as i64)
            .bind(vec_to_blob(&entry.vector))
            .execute(&mut *tx)
            .await
            .map_err(io)?;
        }
        sqlx::query("DELETE FROM index_meta")
            .execute(&mut *tx)
            .await
            .map_err(io)?;
        if !entries.is_empty() {
            Self::write_meta(&mut tx, &meta).await?;
        }
        tx.commit().await.map_err(io)?;

        self.write()?.replace_index(index)?;
        if let Ok(mut model) = self.model.write() {
            *model = meta.model.clone();
        }
        self.set_meta((!entries.is_empty()).then_some(meta));
        Ok(entries.len())
    }
}

async fn load_meta(pool: &SqlitePool) -> Result<Option<IndexMeta>> {
    let rows: Vec<(String, String)> = sqlx::query_as("SELECT key, value FROM index_meta")
        .fetch_all(pool)
        .await
        .map_err(io)?;
    let map: HashMap<String, String> = rows.into_iter().collect();

    let (Some(model), Some(dims), Some(metric)) =
        (map.get("model"), map.get("dims"), map.get("metric"))
    else {
        return Ok(None);
    };
    Ok(Some(IndexMeta {
        model: model.clone(),
        dims: dims
            .parse()
            .map_err(|_| io(format!("invalid dims in index_meta: {}", dims)))?,
        metric: metric.parse().map_err(io)?,
    }))
}

async fn load_corpus(pool: &SqlitePool, settings: IndexSettings) -> Result<Corpus> {
    let mut corpus = Corpus::new(VectorIndex::new(settings));

    let docs = sqlx::query(
        "SELECT id, filename, format, byte_size, content_hash, ingested_at, body FROM documents",
    )
    .fetch_all(pool)
    .await
    .map_err(io)?;
    for row in docs {
        let byte_size: i64 = row.get("byte_size");
        corpus.add_document(&Document {
            id: row.get("id"),
            filename: row.get("filename"),
            format: row.get("format"),
            byte_size: byte_size.max(0) as u64,
            content_hash: row.get("content_hash"),
            ingested_at: row.get("ingested_at"),
            body: row.get("body"),
        });
    }

    let rows = sqlx::query(
        "SELECT p.id, p.document_id, p.ordinal, p.text, p.start_offset, p.end_offset, p.hash, v.embedding \
         FROM passage_vectors v JOIN passages p ON p.id = v.passage_id \
         ORDER BY v.rowid",
    )
    .fetch_all(pool)
    .await
    .map_err(io)?;

    let mut entries = Vec::with_capacity(rows.len());
    for row in rows {
        let ordinal: i64 = row.get("ordinal");
        let start: i64 = row.get("start_offset");
        let end: i64 = row.get("end_offset");
        let blob: Vec<u8> = row.get("embedding");
        entries.push(IndexEntry {
            passage: Passage {
                id: row.get("id"),
                document_id: row.get("document_id"),
                ordinal: ordinal as usize,
                text: row.get("text"),
                range: OffsetRange::new(start as usize, end as usize),
                hash: row.get("hash"),
            },
            vector: blob_to_vec(&blob),
        });
    }
    corpus.validate(None, &entries)?;
    corpus.add_entries(&entries)?;
    Ok(corpus)
}

#[async_trait]
impl Store for SqliteStore {
    fn metric(&self) -> Metric {
        self.read()
            .map(|c| c.metric())
            .unwrap_or(Metric::Cosine)
    }

    async fn insert_document(&self, doc: &Document, entries: &[IndexEntry]) -> Result<()> {
        let _guard = self.writer.lock().await;
        self.read()?.validate(Some(doc), entries)?;

        let mut tx = self.pool.begin().await.map_err(io)?;
        sqlx::query(
            "INSERT INTO documents (id, filename, format, byte_size, content_hash, ingested_at, body) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&doc.id)
        .bind(&doc.filename)
        .bind(&doc.format)
        .bind(doc.byte_size as i64)
        .bind(&doc.content_hash)
        .bind(doc.ingested_at)
        .bind(&doc.body)
        .execute(&mut *tx)
        .await
        .map_err(io)?;
        Self::write_entries(&mut tx, entries).await?;
        let meta = self.meta_for(entries);
        if let Some(m) = &meta {
            Self::write_meta(&mut tx, m).await?;
        }
        tx.commit().await.map_err(io)?;

        {
            let mut corpus = self.write()?;
            corpus.add_document(doc);
            corpus.add_entries(entries)?;
        }
        if meta.is_some() {
            self.set_meta(meta);
        }
        Ok(())
    }

    async fn insert_entries(&self, entries: &[IndexEntry]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let _guard = self.writer.lock().await;
        self.read()?.validate(None, entries)?;

        let mut tx = self.pool.begin().await.map_err(io)?;
        Self::write_entries(&mut tx, entries).await?;
        let meta = self.meta_for(entries);
        if let Some(m) = &meta {
            Self::write_meta(&mut tx, m).await?;
        }
        tx.commit().await.map_err(io)?;

        self.write()?.add_entries(entries)?;
        self.set_meta(meta);
        Ok(())
    }

    async fn delete_passage(&self, passage_id: &str) -> Result<bool> {
        let _guard = self.writer.lock().await;
        let mut tx = self.pool.begin().await.map_err(io)?;
        sqlx::query("DELETE FROM passage_vectors WHERE passage_id = ?")
            .bind(passage_id)
            .execute(&mut *tx)
            .await
            .map_err(io)?;
        let deleted = sqlx::query("DELETE FROM passages WHERE id = ?")
            .bind(passage_id)
            .execute(&mut *tx)
            .await
            .map_err(io)?
            .rows_affected();
        tx.commit().await.map_err(io)?;

        let removed = self.write()?.remove_passage(passage_id);
        Ok(removed || deleted > 0)
    }

    async fn delete_document(&self, document_id: &str) -> Result<bool> {
        let _guard = self.writer.lock().await;
        let mut tx = self.pool.begin().await.map_err(io)?;
        for sql in [
            "DELETE FROM passage_vectors WHERE document_id = ?",
            "DELETE FROM passages WHERE document_id = ?",
        ] {
            sqlx::query(sql)
                .bind(document_id)
                .execute(&mut *tx)
                .await
                .map_err(io)?;
        }
        let deleted = sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(document_id)
            .execute(&mut *tx)
            .await
            .map_err(io)?
            .rows_affected();
        tx.commit().await.map_err(io)?;

        let removed = self.write()?.remove_document(document_id);
        Ok(removed || deleted > 0)
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
        let _guard = self.writer.lock().await;
        let mut tx = self.pool.begin().await.map_err(io)?;
        for table in ["passage_vectors", "passages", "documents", "index_meta"] {
            sqlx::query(&format!("DELETE FROM {}", table))
                .execute(&mut *tx)
                .await
                .map_err(io)?;
        }
        tx.commit().await.map_err(io)?;

        self.write()?.clear();
        self.set_meta(None);
        tracing::info!("corpus reset");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use marketmuse_core::chunk::split_text;
    use marketmuse_core::embedding::HashEmbedder;
    use tempfile::TempDir;

    async fn open_store(tmp: &TempDir) -> SqliteStore {
        let pool = crate::db::connect_path(&tmp.path().join("mm.sqlite"))
            .await
            .unwrap();
        crate::migrate::migrate(&pool).await.unwrap();
        SqliteStore::open(pool, IndexSettings::default(), "hash-64")
            .await
            .unwrap()
    }

    fn document(id: &str, filename: &str, body: &str) -> Document {
        Document {
            id: id.to_string(),
            filename: filename.to_string(),
            format: "txt".to_string(),
            byte_size: body.len() as u64,
            content_hash: format!("hash-{}", id),
            ingested_at: 1_700_000_000,
            body: body.to_string(),
        }
    }

    fn entries(doc: &Document) -> Vec<IndexEntry> {
        let embedder = HashEmbedder::new(64);
        split_text(&doc.id, &doc.body, 40, 10)
            .unwrap()
            .into_iter()
            .map(|p| IndexEntry {
                vector: embedder.embed_text(&p.text),
                passage: p,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_persisted_corpus_survives_reopen() {
        let tmp = TempDir::new().unwrap();
        let embedder = HashEmbedder::new(64);
        let query = embedder.embed_text("keyword research for pillar pages");

        let doc = document(
            "d1",
            "seo.txt",
            "Keyword research drives pillar pages. Topic clusters link supporting articles.",
        );
        let store = open_store(&tmp).await;
        store.insert_document(&doc, &entries(&doc)).await.unwrap();
        let before: Vec<String> = store
            .search(&query, 3)
            .await
            .unwrap()
            .into_iter()
            .map(|h| h.passage.id)
            .collect();
        assert!(!before.is_empty());
        let meta = store.meta().unwrap();
        assert_eq!(meta.dims, 64);
        assert_eq!(meta.model, "hash-64");
        store.close().await;

        let reopened = open_store(&tmp).await;
        let after: Vec<String> = reopened
            .search(&query, 3)
            .await
            .unwrap()
            .into_iter()
            .map(|h| h.passage.id)
            .collect();
        assert_eq!(before, after);
        assert_eq!(reopened.stats().await.unwrap().documents, 1);
        assert_eq!(reopened.meta(), Some(meta));
    }

    #[tokio::test]
    async fn test_rejected_insert_leaves_nothing() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp).await;
        let doc = document("d1", "a.txt", "Content calendars align with launches.");
        store.insert_document(&doc, &entries(&doc)).await.unwrap();

        let bad = document("d2", "b.txt", "Second document body text here.");
        let mut bad_entries = entries(&bad);
        bad_entries[0].vector = vec![1.0, 0.0];
        let err = store.insert_document(&bad, &bad_entries).await.unwrap_err();
        assert!(matches!(err, Error::DimensionMismatch { .. }));

        assert!(store.get_document("d2").await.unwrap().is_none());
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_delete_document_persists() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp).await;
        let doc = document("d1", "a.txt", "Content calendars align with launches.");
        store.insert_document(&doc, &entries(&doc)).await.unwrap();
        assert!(store.delete_document("d1").await.unwrap());
        assert!(!store.delete_document("d1").await.unwrap());
        store.close().await;

        let reopened = open_store(&tmp).await;
        let stats = reopened.stats().await.unwrap();
        assert_eq!((stats.documents, stats.passages, stats.vectors), (0, 0, 0));
    }

    #[tokio::test]
    async fn test_reset_clears_tables_and_meta() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp).await;
        let doc = document("d1", "a.txt", "Content calendars align with launches.");
        store.insert_document(&doc, &entries(&doc)).await.unwrap();

        store.reset().await.unwrap();
        assert!(store.meta().is_none());
        let q = HashEmbedder::new(64).embed_text("calendars");
        assert!(store.search(&q, 4).await.unwrap().is_empty());
        for table in ["documents", "passages", "passage_vectors", "index_meta"] {
            let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
                .fetch_one(store.pool())
                .await
                .unwrap();
            assert_eq!(count, 0, "{}", table);
        }
    }

    #[tokio::test]
    async fn test_reindex_switches_model() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp).await;
        let doc = document("d1", "a.txt", "Content calendars align with launches.");
        store.insert_document(&doc, &entries(&doc)).await.unwrap();

        let wider = HashEmbedder::new(128);
        let n = store
            .reindex(&wider, 8, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(n, store.stats().await.unwrap().passages);
        assert_eq!(store.meta().unwrap().dims, 128);
        let hits = store
            .search(&wider.embed_text("content calendars"), 1)
            .await
            .unwrap();
        assert_eq!(hits[0].passage.document_id, "d1");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_readers_never_see_partial_writes() {
        use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
        use std::sync::Arc;

        let tmp = TempDir::new().unwrap();
        let store = Arc::new(open_store(&tmp).await);
        let base = document(
            "base",
            "base.txt",
            "Evergreen guides keep earning links. Refresh them every quarter with new data.",
        );
        let churn = document(
            "churn",
            "churn.txt",
            "Launch week emails go out on Tuesday. Reminder emails follow two days later for non-openers.",
        );
        let base_entries = entries(&base);
        let churn_entries = entries(&churn);
        let expected: HashMap<&str, (&str, usize)> = HashMap::from([
            ("base", ("base.txt", base_entries.len())),
            ("churn", ("churn.txt", churn_entries.len())),
        ]);
        store.insert_document(&base, &base_entries).await.unwrap();

        let query = HashEmbedder::new(64).embed_text("launch emails and evergreen guides");
        let stop = Arc::new(AtomicBool::new(false));
        let observed = Arc::new(AtomicUsize::new(0));
        let mut readers = Vec::new();
        for _ in 0..4 {
            let store = Arc::clone(&store);
            let stop = Arc::clone(&stop);
            let observed = Arc::clone(&observed);
            let query = query.clone();
            let expected = expected.clone();
            readers.push(tokio::spawn(async move {
                while !stop.load(Ordering::Relaxed) {
                    let hits = store.search(&query, 1000).await.unwrap();
                    let mut per_doc: HashMap<String, usize> = HashMap::new();
                    for hit in &hits {
                        let doc_id = hit.passage.document_id.as_str();
                        let (filename, _) = expected
                            .get(doc_id)
                            .unwrap_or_else(|| panic!("unknown document {}", doc_id));
                        assert_eq!(hit.filename, *filename);
                        assert!(!hit.passage.text.is_empty());
                        *per_doc.entry(hit.passage.document_id.clone()).or_default() += 1;
                    }
                    for (doc_id, count) in per_doc {
                        assert_eq!(count, expected[doc_id.as_str()].1, "partial {}", doc_id);
                    }
                    observed.fetch_add(1, Ordering::Relaxed);
                    tokio::task::yield_now().await;
                }
            }));
        }

        for round in 0..30 {
            store.insert_document(&churn, &churn_entries).await.unwrap();
            assert!(store.delete_document("churn").await.unwrap());
            if round % 10 == 9 {
                store.reset().await.unwrap();
                store.insert_document(&base, &base_entries).await.unwrap();
            }
            tokio::task::yield_now().await;
        }
        while observed.load(Ordering::Relaxed) < 20 {
            tokio::task::yield_now().await;
        }
        stop.store(true, Ordering::Relaxed);
        for reader in readers {
            reader.await.unwrap();
        }

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.documents, 1);
        assert_eq!(stats.passages, base_entries.len());
    }
}

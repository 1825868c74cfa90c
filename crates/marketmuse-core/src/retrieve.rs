//! Query-time retrieval: embed, search, filter, threshold, deduplicate.
//!
//! # Pipeline
//!
//! 1. An empty (or whitespace-only) query returns an empty result.
//! 2. The query is embedded with the same [`Embedder`] used at ingestion.
//! 3. The store is asked for `k × overfetch` candidates. With a document
//!    filter the store's native filtered search is used; a store without
//!    one is searched unfiltered and the candidates are post-filtered.
//! 4. Distances become `[0, 1]` relevance scores via the index
//!    [`Metric`](crate::index::Metric); candidates under `min_relevance`
//!    are dropped.
//! 5. Candidates are ordered by descending relevance and deduplicated:
//!    a passage is skipped when an already-selected passage of the same
//!    document overlaps its character range or carries near-identical
//!    text. Passages of different documents are always kept apart.
//! 6. The first `k` survivors are returned.

use std::collections::HashSet;

use crate::embedding::{embed_query, Embedder};
use crate::error::Result;
use crate::models::{RetrievalResult, RetrievedPassage};
use crate::store::{Hit, Store};

pub const DEFAULT_K: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetrievalParams {
    /// Passages returned when the caller does not ask for a specific `k`.
    pub k: usize,
    /// Candidates scoring below this relevance are discarded.
    pub min_relevance: f32,
    /// Candidate multiplier absorbing filtering and deduplication losses.
    pub overfetch: usize,
    /// Word-set Jaccard similarity at which two passages of one document
    /// count as duplicates.
    pub dedup_similarity: f32,
}

impl Default for RetrievalParams {
    fn default() -> Self {
        Self {
            k: DEFAULT_K,
            min_relevance: 0.2,
            overfetch: 4,
            dedup_similarity: 0.9,
        }
    }
}

pub struct Retriever<'a> {
    store: &'a dyn Store,
    embedder: &'a dyn Embedder,
    params: RetrievalParams,
}

impl<'a> Retriever<'a> {
    pub fn new(store: &'a dyn Store, embedder: &'a dyn Embedder, params: RetrievalParams) -> Self {
        Self {
            store,
            embedder,
            params,
        }
    }

    pub fn params(&self) -> &RetrievalParams {
        &self.params
    }

    /// Retrieve up to `k` (default `params.k`) passages for `query`,
    /// optionally restricted to `document_ids`.
    ///
    /// An empty corpus or no passage above the threshold is an empty
    /// result, not an error.
    pub async fn retrieve(
        &self,
        query: &str,
        k: Option<usize>,
        document_ids: Option<&[String]>,
    ) -> Result<RetrievalResult> {
        let k = k.unwrap_or(self.params.k);
        if query.trim().is_empty() || k == 0 {
            return Ok(RetrievalResult::empty(query));
        }
        if let Some(ids) = document_ids {
            if ids.is_empty() {
                return Ok(RetrievalResult::empty(query));
            }
        }

        let vector = embed_query(self.embedder, query).await?;
        let fetch = k.saturating_mul(self.params.overfetch.max(1));

        let hits = match document_ids {
            None => self.store.search(&vector, fetch).await?,
            Some(ids) => match self.store.search_filtered(&vector, fetch, ids).await? {
                Some(hits) => hits,
                None => post_filter(self.store.search(&vector, fetch).await?, ids),
            },
        };

        let passages = self.select(hits, k);
        tracing::debug!(
            query_chars = query.chars().count(),
            k,
            fetched = fetch,
            returned = passages.len(),
            "retrieval complete"
        );
        Ok(RetrievalResult {
            query: query.to_string(),
            passages,
        })
    }

    fn select(&self, hits: Vec<Hit>, k: usize) -> Vec<RetrievedPassage> {
        let metric = self.store.metric();
        let mut candidates: Vec<RetrievedPassage> = hits
            .into_iter()
            .map(|hit| RetrievedPassage {
                relevance: metric.relevance(hit.distance),
                passage: hit.passage,
                filename: hit.filename,
                distance: hit.distance,
            })
            .filter(|c| c.relevance >= self.params.min_relevance)
            .collect();
        candidates.sort_by(|a, b| b.relevance.total_cmp(&a.relevance));

        let mut selected: Vec<RetrievedPassage> = Vec::with_capacity(k);
        for candidate in candidates {
            if selected.len() == k {
                break;
            }
            if selected
                .iter()
                .any(|s| is_redundant(s, &candidate, self.params.dedup_similarity))
            {
                continue;
            }
            selected.push(candidate);
        }
        selected
    }
}

/// Keep only hits from `document_ids`, preserving order.
pub fn post_filter(hits: Vec<Hit>, document_ids: &[String]) -> Vec<Hit> {
    let allowed: HashSet<&str> = document_ids.iter().map(String::as_str).collect();
    hits.into_iter()
        .filter(|h| allowed.contains(h.passage.document_id.as_str()))
        .collect()
}

fn is_redundant(kept: &RetrievedPassage, candidate: &RetrievedPassage, threshold: f32) -> bool {
    if kept.passage.document_id != candidate.passage.document_id {
        return false;
    }
    kept.passage.range.overlaps(&candidate.passage.range)
        || kept.passage.hash == candidate.passage.hash
        || word_jaccard(&kept.passage.text, &candidate.passage.text) >= threshold
}

fn word_jaccard(a: &str, b: &str) -> f32 {
    let words = |s: &str| -> HashSet<String> {
        s.split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .map(str::to_lowercase)
            .collect()
    };
    let (wa, wb) = (words(a), words(b));
    if wa.is_empty() && wb.is_empty() {
        return 1.0;
    }
    let shared = wa.intersection(&wb).count();
    let total = wa.union(&wb).count();
    shared as f32 / total as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::split_text;
    use crate::embedding::HashEmbedder;
    use crate::index::IndexSettings;
    use crate::models::{Document, IndexEntry, OffsetRange, Passage};
    use crate::store::memory::InMemoryStore;

    fn doc(id: &str, filename: &str, body: &str) -> Document {
        Document {
            id: id.to_string(),
            filename: filename.to_string(),
            format: "txt".to_string(),
            byte_size: body.len() as u64,
            content_hash: id.to_string(),
            ingested_at: 0,
            body: body.to_string(),
        }
    }

    const CALENDARS: &str = "Content calendars should align with campaign launches.";
    const BACKLINKS: &str = "Backlink audits find toxic referring domains quickly.";
    const EDITORIAL: &str = "Content calendars keep editorial teams aligned.";

    async fn ingest(
        store: &InMemoryStore,
        embedder: &HashEmbedder,
        id: &str,
        body: &str,
        size: usize,
        overlap: usize,
    ) {
        let passages = split_text(id, body, size, overlap).unwrap();
        let texts: Vec<String> = passages.iter().map(|p| p.text.clone()).collect();
        let vectors = embedder.embed(&texts).await.unwrap();
        let entries: Vec<IndexEntry> = passages
            .into_iter()
            .zip(vectors)
            .map(|(passage, vector)| IndexEntry { passage, vector })
            .collect();
        store
            .insert_document(&doc(id, &format!("{}.txt", id), body), &entries)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_empty_index_returns_empty_result() {
        let store = InMemoryStore::default();
        let embedder = HashEmbedder::new(64);
        let retriever = Retriever::new(&store, &embedder, RetrievalParams::default());
        let result = retriever.retrieve("anything at all", None, None).await.unwrap();
        assert!(result.is_empty());
        assert_eq!(result.query, "anything at all");
    }

    #[tokio::test]
    async fn test_blank_query_returns_empty_result() {
        let store = InMemoryStore::default();
        let embedder = HashEmbedder::new(64);
        ingest(&store, &embedder, "a", "Pillar pages anchor topic clusters.", 1000, 200).await;
        let retriever = Retriever::new(&store, &embedder, RetrievalParams::default());
        assert!(retriever.retrieve("   ", None, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_relevant_passage_ranks_first() {
        let store = InMemoryStore::default();
        let embedder = HashEmbedder::new(384);
        ingest(&store, &embedder, "cal", CALENDARS, 1000, 200).await;
        ingest(&store, &embedder, "seo", BACKLINKS, 1000, 200).await;
        let retriever = Retriever::new(&store, &embedder, RetrievalParams::default());

        let result = retriever
            .retrieve("When should content calendars align?", None, None)
            .await
            .unwrap();
        assert_eq!(result.passages[0].filename, "cal.txt");
        for hit in &result.passages {
            assert!((0.0..=1.0).contains(&hit.relevance));
        }
        assert!(result
            .passages
            .windows(2)
            .all(|w| w[0].relevance >= w[1].relevance));
    }

    #[tokio::test]
    async fn test_min_relevance_drops_unrelated() {
        let store = InMemoryStore::default();
        let embedder = HashEmbedder::new(384);
        ingest(&store, &embedder, "seo", BACKLINKS, 1000, 200).await;
        let params = RetrievalParams {
            min_relevance: 0.3,
            ..RetrievalParams::default()
        };
        let retriever = Retriever::new(&store, &embedder, params);
        let result = retriever
            .retrieve("When should content calendars align?", None, None)
            .await
            .unwrap();
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn test_document_filter() {
        let store = InMemoryStore::default();
        let embedder = HashEmbedder::new(384);
        ingest(&store, &embedder, "a", CALENDARS, 1000, 200).await;
        ingest(&store, &embedder, "b", EDITORIAL, 1000, 200).await;
        let params = RetrievalParams {
            min_relevance: 0.0,
            ..RetrievalParams::default()
        };
        let retriever = Retriever::new(&store, &embedder, params);

        let only_b = vec!["b".to_string()];
        let result = retriever
            .retrieve("content calendars", None, Some(&only_b))
            .await
            .unwrap();
        assert!(!result.is_empty());
        assert!(result.passages.iter().all(|p| p.passage.document_id == "b"));

        let none: Vec<String> = Vec::new();
        assert!(retriever
            .retrieve("content calendars", None, Some(&none))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_dedups_overlapping_windows_within_document() {
        let store = InMemoryStore::new(IndexSettings::default());
        let embedder = HashEmbedder::new(384);
        let shared = "topic clusters boost organic search visibility";
        let body_a = format!("Intro words here. {} and more filler text follows", shared);
        let body_b = format!("Different opener text. {} with other trailing words", shared);
        ingest(&store, &embedder, "a", &body_a, 50, 40).await;
        ingest(&store, &embedder, "b", &body_b, 50, 40).await;

        let params = RetrievalParams {
            k: 2,
            min_relevance: 0.0,
            ..RetrievalParams::default()
        };
        let retriever = Retriever::new(&store, &embedder, params);
        let result = retriever.retrieve(shared, None, None).await.unwrap();

        assert_eq!(result.len(), 2);
        let docs: HashSet<&str> = result
            .passages
            .iter()
            .map(|p| p.passage.document_id.as_str())
            .collect();
        assert_eq!(docs.len(), 2, "expected one passage from each document");
    }

    #[test]
    fn test_post_filter_keeps_order() {
        let hit = |id: &str, doc: &str, d: f32| Hit {
            passage: Passage {
                id: id.to_string(),
                document_id: doc.to_string(),
                ordinal: 0,
                text: String::new(),
                range: OffsetRange::new(0, 1),
                hash: id.to_string(),
            },
            filename: format!("{}.txt", doc),
            distance: d,
        };
        let hits = vec![hit("1", "a", 0.1), hit("2", "b", 0.2), hit("3", "a", 0.3)];
        let kept = post_filter(hits, &["a".to_string()]);
        let ids: Vec<&str> = kept.iter().map(|h| h.passage.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "3"]);
    }

    #[test]
    fn test_word_jaccard() {
        assert_eq!(word_jaccard("a b c", "C B A"), 1.0);
        assert!((word_jaccard("a b", "b c") - 1.0 / 3.0).abs() < 1e-6);
    }
}

//! Embedding trait and vector utilities.
//!
//! Defines the [`Embedder`] trait that every embedding backend implements,
//! the deterministic [`HashEmbedder`], and pure helpers for vector
//! serialization, normalization and similarity.
//!
//! Network and on-device providers (OpenAI, Ollama, fastembed) live in the
//! `marketmuse` app crate, which also owns batching and timeouts.

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// An embedding backend.
///
/// The same embedder must be used for passages and queries: vectors from
/// different models are not comparable, and an index only ever holds
/// vectors of one model.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Returns the model identifier (e.g. `"all-minilm-l6-v2"`).
    fn model_name(&self) -> &str;
    /// Returns the embedding vector dimensionality (e.g. `384`).
    fn dims(&self) -> usize;
    /// Embed a batch of texts, returning one vector per input in order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Embed a single query through the same model used for passages.
pub async fn embed_query(embedder: &dyn Embedder, query: &str) -> Result<Vec<f32>> {
    let vectors = embedder.embed(&[query.to_string()]).await?;
    check_batch(embedder.dims(), 1, &vectors)?;
    vectors
        .into_iter()
        .next()
        .ok_or_else(|| Error::EmbeddingService("empty response for query".to_string()))
}

/// Verify a provider response: one vector per input, all of `dims` length.
pub fn check_batch(dims: usize, expected: usize, vectors: &[Vec<f32>]) -> Result<()> {
    if vectors.len() != expected {
        return Err(Error::EmbeddingService(format!(
            "expected {} vectors, provider returned {}",
            expected,
            vectors.len()
        )));
    }
    if let Some(v) = vectors.iter().find(|v| v.len() != dims) {
        return Err(Error::EmbeddingService(format!(
            "provider returned a {}-d vector, model is configured for {} dims",
            v.len(),
            dims
        )));
    }
    Ok(())
}

/// Deterministic feature-hashing embedder.
///
/// Lowercased word tokens (with a trailing plural `s` folded) and adjacent
/// word bigrams are hashed with SHA-256 into `dims` signed buckets, then
/// the vector is L2-normalized. Identical input always yields an identical
/// vector, across processes and platforms.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dims: usize,
    model: String,
}

impl HashEmbedder {
    pub fn new(dims: usize) -> Self {
        Self {
            dims: dims.max(1),
            model: format!("hash-{}", dims.max(1)),
        }
    }

    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let tokens = tokenize(text);
        let mut vector = vec![0.0f32; self.dims];

        for token in &tokens {
            self.accumulate(&mut vector, token.as_bytes(), 1.0);
        }
        for pair in tokens.windows(2) {
            let bigram = format!("{} {}", pair[0], pair[1]);
            self.accumulate(&mut vector, bigram.as_bytes(), 0.5);
        }

        l2_normalize(&mut vector);
        vector
    }

    fn accumulate(&self, vector: &mut [f32], feature: &[u8], weight: f32) {
        let digest = Sha256::digest(feature);
        let mut bucket = [0u8; 8];
        bucket.copy_from_slice(&digest[..8]);
        let h = u64::from_le_bytes(bucket);
        let idx = (h % self.dims as u64) as usize;
        let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
        vector[idx] += sign * weight;
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| {
            let lower = t.to_lowercase();
            if lower.len() > 3 && lower.ends_with('s') && !lower.ends_with("ss") {
                lower[..lower.len() - 1].to_string()
            } else {
                lower
            }
        })
        .collect()
}

/// Scale `v` to unit length in place. Zero vectors are left untouched.
pub fn l2_normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
///
/// Each `f32` is stored as 4 bytes in little-endian order, producing
/// a BLOB of `vec.len() × 4` bytes.
///
/// # Example
///
/// ```rust
/// use marketmuse_core::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12); // 3 × 4 bytes
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    vec.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Decode a BLOB written by [`vec_to_blob`]. Trailing partial floats are
/// ignored.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity in `[-1.0, 1.0]`.
///
/// Returns `0.0` for empty vectors, zero vectors, or vectors of different
/// lengths.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vec_blob_roundtrip() {
        let vec = vec![1.0f32, -2.5, 3.125, 0.0, -0.001];
        assert_eq!(blob_to_vec(&vec_to_blob(&vec)), vec);
    }

    #[test]
    fn test_cosine_identical() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal() {
        let sim = cosine_similarity(&[1.0, 0.0, 0.0], &[0.0, 1.0, 0.0]);
        assert!(sim.abs() < 1e-6);
    }

    #[test]
    fn test_cosine_different_lengths() {
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[test]
    fn test_hash_embedder_deterministic() {
        let a = HashEmbedder::new(384);
        let b = HashEmbedder::new(384);
        let text = "Content calendars should align with campaign launches.";
        assert_eq!(a.embed_text(text), b.embed_text(text));
    }

    #[test]
    fn test_hash_embedder_unit_length() {
        let v = HashEmbedder::new(64).embed_text("pillar pages and topic clusters");
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
        assert_eq!(v.len(), 64);
    }

    #[test]
    fn test_hash_embedder_related_text_is_closer() {
        let e = HashEmbedder::new(384);
        let doc = e.embed_text("Content calendars should align with campaign launches.");
        let query = e.embed_text("When should content calendars align?");
        let unrelated = e.embed_text("Backlink audits find toxic referring domains.");
        assert!(cosine_similarity(&doc, &query) > cosine_similarity(&doc, &unrelated));
        assert!(cosine_similarity(&doc, &query) > 0.4);
    }

    #[test]
    fn test_tokenize_folds_plurals() {
        assert_eq!(tokenize("Calendars, SEO!"), vec!["calendar", "seo"]);
        assert_eq!(tokenize("class"), vec!["class"]);
    }

    #[tokio::test]
    async fn test_embed_query_checks_dims() {
        let e = HashEmbedder::new(16);
        let v = embed_query(&e, "keyword research").await.unwrap();
        assert_eq!(v.len(), 16);
    }

    #[test]
    fn test_check_batch_rejects_wrong_count_and_dims() {
        assert!(check_batch(2, 2, &[vec![0.0, 1.0], vec![1.0, 0.0]]).is_ok());
        assert!(matches!(
            check_batch(2, 2, &[vec![0.0, 1.0]]),
            Err(Error::EmbeddingService(_))
        ));
        assert!(matches!(
            check_batch(2, 1, &[vec![0.0, 1.0, 2.0]]),
            Err(Error::EmbeddingService(_))
        ));
    }
}

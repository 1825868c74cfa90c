//! Embedding providers and batched embedding.
//!
//! Implements [`marketmuse_core::embedding::Embedder`] for:
//! - **`local`**: fastembed on-device models (all-MiniLM-L6-v2 by default).
//!   The model is downloaded on first use and cached; no network afterwards.
//! - **`openai`**: any OpenAI-compatible `/embeddings` endpoint.
//! - **`ollama`**: a running Ollama instance's `/api/embed` endpoint.
//! - **`hash`**: the deterministic [`HashEmbedder`], for offline use and tests.
//!
//! Use [`create_embedder`] to build the one named in configuration, and
//! [`embed_in_batches`] to embed passages with per-batch timeouts.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use marketmuse_core::embedding::{check_batch, Embedder, HashEmbedder};
use marketmuse_core::Error;

use crate::config::EmbeddingConfig;
use crate::remote;

#[cfg(feature = "local-embeddings-fastembed")]
const DEFAULT_LOCAL_MODEL: &str = "all-minilm-l6-v2";
const DEFAULT_HASH_DIMS: usize = 384;

/// Build the embedder named by `config.provider`.
///
/// # Errors
///
/// Unknown provider names, missing model/dims for remote providers, or a
/// `local` provider in a build without the `local-embeddings-fastembed`
/// feature.
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    match config.provider.as_str() {
        "hash" => Ok(Arc::new(HashEmbedder::new(
            config.dims.unwrap_or(DEFAULT_HASH_DIMS),
        ))),
        "openai" => Ok(Arc::new(OpenAiEmbedder::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaEmbedder::new(config)?)),
        #[cfg(feature = "local-embeddings-fastembed")]
        "local" => Ok(Arc::new(LocalEmbedder::new(config)?)),
        #[cfg(not(feature = "local-embeddings-fastembed"))]
        "local" => bail!(
            "Local embedding provider requires --features local-embeddings-fastembed \
             (or set embedding.provider = \"hash\")"
        ),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

/// Embed `texts` in batches of `batch_size`, each bounded by `timeout`.
///
/// Returns one result per input text, in order. A batch that fails or
/// times out fails every text in it; other batches are unaffected. A
/// vector with non-finite components fails only its own text.
pub async fn embed_in_batches(
    embedder: &dyn Embedder,
    texts: &[String],
    batch_size: usize,
    timeout: Duration,
) -> Vec<marketmuse_core::Result<Vec<f32>>> {
    let mut out = Vec::with_capacity(texts.len());
    for batch in texts.chunks(batch_size.max(1)) {
        let outcome = match tokio::time::timeout(timeout, embedder.embed(batch)).await {
            Ok(Ok(vectors)) => check_batch(embedder.dims(), batch.len(), &vectors).map(|_| vectors),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(Error::EmbeddingService(format!(
                "{} timed out after {}s",
                embedder.model_name(),
                timeout.as_secs_f32()
            ))),
        };

        match outcome {
            Ok(vectors) => {
                for v in vectors {
                    if v.iter().all(|x| x.is_finite()) {
                        out.push(Ok(v));
                    } else {
                        out.push(Err(Error::EmbeddingService(
                            "provider returned a non-finite vector".to_string(),
                        )));
                    }
                }
            }
            Err(e) => {
                tracing::warn!(
                    model = embedder.model_name(),
                    batch = batch.len(),
                    error = %e,
                    "embedding batch failed"
                );
                out.extend(std::iter::repeat(Err(e)).take(batch.len()));
            }
        }
    }
    out
}

fn parse_vectors(items: &[serde_json::Value], service: &str) -> Result<Vec<Vec<f32>>> {
    items
        .iter()
        .map(|item| -> Result<Vec<f32>> {
            let values = item.as_array().ok_or_else(|| {
                anyhow::anyhow!("Invalid {} response: embedding is not an array", service)
            })?;
            Ok(values
                .iter()
                .map(|v| v.as_f64().unwrap_or(f64::NAN) as f32)
                .collect())
        })
        .collect()
}

// ============ OpenAI-compatible ============

/// Calls `POST {url}/embeddings` (default `https://api.openai.com/v1`).
pub struct OpenAiEmbedder {
    client: reqwest::Client,
    model: String,
    dims: usize,
    url: String,
    api_key: String,
    max_retries: u32,
}

impl OpenAiEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for OpenAI provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow::anyhow!("embedding.dims required for OpenAI provider"))?;
        let api_key = remote::api_key(&config.api_key_env).ok_or_else(|| {
            anyhow::anyhow!("{} environment variable not set", config.api_key_env)
        })?;

        Ok(Self {
            client: remote::client(config.timeout_secs)?,
            model,
            dims,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            api_key,
            max_retries: config.max_retries,
        })
    }

    async fn request(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let json = remote::post_json(
            &self.client,
            &remote::endpoint(&self.url, "embeddings"),
            Some(&self.api_key),
            &body,
            self.max_retries,
            "OpenAI",
        )
        .await?;

        let data = json
            .get("data")
            .and_then(|d| d.as_array())
            .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing data array"))?;

        // `index` gives the input position; fall back to response order.
        let mut indexed: Vec<(usize, serde_json::Value)> = data
            .iter()
            .enumerate()
            .map(|(pos, item)| {
                let index = item
                    .get("index")
                    .and_then(|i| i.as_u64())
                    .map(|i| i as usize)
                    .unwrap_or(pos);
                let embedding = item.get("embedding").cloned().unwrap_or_default();
                (index, embedding)
            })
            .collect();
        indexed.sort_by_key(|(i, _)| *i);
        let items: Vec<serde_json::Value> = indexed.into_iter().map(|(_, e)| e).collect();
        parse_vectors(&items, "OpenAI")
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> marketmuse_core::Result<Vec<Vec<f32>>> {
        self.request(texts)
            .await
            .map_err(|e| Error::EmbeddingService(format!("{:#}", e)))
    }
}

// ============ Ollama ============

/// Calls `POST {url}/api/embed` (default `http://localhost:11434`).
pub struct OllamaEmbedder {
    client: reqwest::Client,
    model: String,
    dims: usize,
    url: String,
    max_retries: u32,
}

impl OllamaEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for Ollama provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow::anyhow!("embedding.dims required for Ollama provider"))?;

        Ok(Self {
            client: remote::client(config.timeout_secs)?,
            model,
            dims,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| "http://localhost:11434".to_string()),
            max_retries: config.max_retries,
        })
    }

    async fn request(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let json = remote::post_json(
            &self.client,
            &remote::endpoint(&self.url, "api/embed"),
            None,
            &body,
            self.max_retries,
            "Ollama",
        )
        .await?;

        let embeddings = json
            .get("embeddings")
            .and_then(|e| e.as_array())
            .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: missing embeddings array"))?;
        parse_vectors(embeddings, "Ollama")
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> marketmuse_core::Result<Vec<Vec<f32>>> {
        self.request(texts)
            .await
            .map_err(|e| Error::EmbeddingService(format!("{:#}", e)))
    }
}

// ============ Local (fastembed) ============

/// Dimensionality of a known local model.
pub fn local_model_dims(name: &str) -> Option<usize> {
    match name {
        "all-minilm-l6-v2" | "bge-small-en-v1.5" | "multilingual-e5-small" => Some(384),
        "bge-base-en-v1.5"
        | "nomic-embed-text-v1"
        | "nomic-embed-text-v1.5"
        | "multilingual-e5-base" => Some(768),
        "bge-large-en-v1.5" | "multilingual-e5-large" => Some(1024),
        _ => None,
    }
}

#[cfg(feature = "local-embeddings-fastembed")]
fn fastembed_model(name: &str) -> Result<fastembed::EmbeddingModel> {
    match name {
        "all-minilm-l6-v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
        "bge-small-en-v1.5" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
        "bge-base-en-v1.5" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
        "bge-large-en-v1.5" => Ok(fastembed::EmbeddingModel::BGELargeENV15),
        "nomic-embed-text-v1" => Ok(fastembed::EmbeddingModel::NomicEmbedTextV1),
        "nomic-embed-text-v1.5" => Ok(fastembed::EmbeddingModel::NomicEmbedTextV15),
        "multilingual-e5-small" => Ok(fastembed::EmbeddingModel::MultilingualE5Small),
        "multilingual-e5-base" => Ok(fastembed::EmbeddingModel::MultilingualE5Base),
        "multilingual-e5-large" => Ok(fastembed::EmbeddingModel::MultilingualE5Large),
        other => bail!(
            "Unknown local embedding model: '{}'. Supported models: \
             all-minilm-l6-v2, bge-small-en-v1.5, bge-base-en-v1.5, bge-large-en-v1.5, \
             nomic-embed-text-v1, nomic-embed-text-v1.5, \
             multilingual-e5-small, multilingual-e5-base, multilingual-e5-large",
            other
        ),
    }
}

/// On-device embedder. The ONNX model is loaded lazily on the first call
/// and kept for the life of the process.
#[cfg(feature = "local-embeddings-fastembed")]
pub struct LocalEmbedder {
    model_name: String,
    model: fastembed::EmbeddingModel,
    dims: usize,
    batch_size: usize,
    engine: Arc<std::sync::Mutex<Option<fastembed::TextEmbedding>>>,
}

#[cfg(feature = "local-embeddings-fastembed")]
impl LocalEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model_name = config
            .model
            .clone()
            .unwrap_or_else(|| DEFAULT_LOCAL_MODEL.to_string());
        let model = fastembed_model(&model_name)?;
        let known = local_model_dims(&model_name).unwrap_or(384);
        let dims = config.dims.unwrap_or(known);
        if dims != known {
            bail!(
                "embedding.dims = {} does not match model '{}' ({} dims)",
                dims,
                model_name,
                known
            );
        }

        Ok(Self {
            model_name,
            model,
            dims,
            batch_size: config.batch_size,
            engine: Arc::new(std::sync::Mutex::new(None)),
        })
    }
}

#[cfg(feature = "local-embeddings-fastembed")]
#[async_trait]
impl Embedder for LocalEmbedder {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> marketmuse_core::Result<Vec<Vec<f32>>> {
        let engine = Arc::clone(&self.engine);
        let model = self.model.clone();
        let batch_size = self.batch_size;
        let texts = texts.to_vec();

        tokio::task::spawn_blocking(move || {
            let mut guard = engine
                .lock()
                .map_err(|_| Error::EmbeddingService("local model lock poisoned".to_string()))?;
            if guard.is_none() {
                tracing::info!(?model, "loading local embedding model");
                let loaded = fastembed::TextEmbedding::try_new(
                    fastembed::InitOptions::new(model).with_show_download_progress(true),
                )
                .map_err(|e| {
                    Error::EmbeddingService(format!(
                        "Failed to initialize local embedding model: {}",
                        e
                    ))
                })?;
                *guard = Some(loaded);
            }
            let Some(engine) = guard.as_mut() else {
                return Err(Error::EmbeddingService("local model unavailable".to_string()));
            };
            engine
                .embed(texts, Some(batch_size))
                .map_err(|e| Error::EmbeddingService(format!("Local embedding failed: {}", e)))
        })
        .await
        .map_err(|e| Error::EmbeddingService(format!("embedding task failed: {}", e)))?
    }
}

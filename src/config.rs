//! TOML configuration.
//!
//! Every section except `[db]` is optional and falls back to the defaults
//! below, so a two-line file is a working configuration. See
//! `config/mm.example.toml` for every key.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use marketmuse_core::answer::{PromptConfig, DEFAULT_INSTRUCTIONS};
use marketmuse_core::chunk::{ChunkConfig, DEFAULT_CHUNK_SIZE, DEFAULT_OVERLAP};
use marketmuse_core::index::{IndexSettings, Metric};
use marketmuse_core::retrieve::RetrievalParams;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Window size in characters.
    pub chunk_size: usize,
    /// Characters shared by consecutive windows.
    pub overlap: usize,
    /// How far back from the window end to look for a natural cut point.
    pub boundary_tolerance: Option<usize>,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            overlap: DEFAULT_OVERLAP,
            boundary_tolerance: None,
        }
    }
}

impl ChunkingConfig {
    pub fn to_chunk_config(&self) -> Result<ChunkConfig> {
        let config = ChunkConfig::new(self.chunk_size, self.overlap)?;
        Ok(match self.boundary_tolerance {
            Some(t) => config.with_boundary_tolerance(t),
            None => config,
        })
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// `local` (fastembed), `openai`, `ollama` or `hash`.
    pub provider: String,
    pub model: Option<String>,
    pub dims: Option<usize>,
    /// Base URL override for `openai` / `ollama`.
    pub url: Option<String>,
    /// Environment variable holding the API key (`openai` only).
    pub api_key_env: String,
    pub batch_size: usize,
    pub max_retries: u32,
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "local".to_string(),
            model: None,
            dims: None,
            url: None,
            api_key_env: "OPENAI_API_KEY".to_string(),
            batch_size: 64,
            max_retries: 5,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct IndexConfig {
    /// `cosine` or `euclidean`. Fixed once the first vector is stored.
    pub metric: String,
    pub m: usize,
    pub ef_construction: usize,
    pub ef_search: usize,
    pub exact_search_threshold: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        let d = IndexSettings::default();
        Self {
            metric: d.metric.to_string(),
            m: d.m,
            ef_construction: d.ef_construction,
            ef_search: d.ef_search,
            exact_search_threshold: d.exact_search_threshold,
        }
    }
}

impl IndexConfig {
    pub fn settings(&self) -> Result<IndexSettings> {
        let metric: Metric = self.metric.parse().map_err(anyhow::Error::msg)?;
        Ok(IndexSettings {
            metric,
            m: self.m,
            ef_construction: self.ef_construction,
            ef_search: self.ef_search,
            exact_search_threshold: self.exact_search_threshold,
        })
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RetrievalConfig {
    pub k: usize,
    pub min_relevance: f32,
    pub overfetch: usize,
    pub dedup_similarity: f32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        let d = RetrievalParams::default();
        Self {
            k: d.k,
            min_relevance: d.min_relevance,
            overfetch: d.overfetch,
            dedup_similarity: d.dedup_similarity,
        }
    }
}

impl RetrievalConfig {
    pub fn params(&self) -> RetrievalParams {
        RetrievalParams {
            k: self.k,
            min_relevance: self.min_relevance,
            overfetch: self.overfetch,
            dedup_similarity: self.dedup_similarity,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct GenerationConfig {
    /// `openai` (any OpenAI-compatible chat API, Groq by default),
    /// `ollama` or `disabled`.
    pub provider: String,
    pub model: String,
    pub url: String,
    pub api_key_env: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    pub max_context_chars: usize,
    pub timeout_secs: u64,
    pub max_retries: u32,
    /// Replaces the built-in system instructions.
    pub instructions: Option<String>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "llama-3.1-8b-instant".to_string(),
            url: "https://api.groq.com/openai/v1".to_string(),
            api_key_env: "GROQ_API_KEY".to_string(),
            temperature: 0.1,
            max_tokens: None,
            max_context_chars: marketmuse_core::answer::DEFAULT_MAX_CONTEXT_CHARS,
            timeout_secs: 60,
            max_retries: 3,
            instructions: None,
        }
    }
}

impl GenerationConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }

    pub fn prompt_config(&self) -> PromptConfig {
        PromptConfig {
            max_context_chars: self.max_context_chars,
            instructions: self
                .instructions
                .clone()
                .unwrap_or_else(|| DEFAULT_INSTRUCTIONS.to_string()),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct IngestConfig {
    /// Documents processed concurrently.
    pub workers: usize,
    /// Uploads larger than this are rejected before extraction.
    pub max_file_bytes: u64,
    /// Globs applied when a directory is ingested.
    pub include_globs: Vec<String>,
    pub exclude_globs: Vec<String>,
    pub follow_symlinks: bool,
    /// Re-ingesting a filename replaces the previous document.
    pub replace_existing: bool,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            max_file_bytes: 50 * 1024 * 1024,
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
            follow_symlinks: false,
            replace_existing: true,
        }
    }
}

fn default_include_globs() -> Vec<String> {
    ["pdf", "txt", "md", "docx", "pptx", "html", "htm"]
        .iter()
        .map(|ext| format!("**/*.{}", ext))
        .collect()
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:7341".to_string(),
        }
    }
}

impl Config {
    /// Defaults everywhere, with the database at `db_path`.
    pub fn with_db(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db: DbConfig {
                path: db_path.into(),
            },
            chunking: ChunkingConfig::default(),
            embedding: EmbeddingConfig::default(),
            index: IndexConfig::default(),
            retrieval: RetrievalConfig::default(),
            generation: GenerationConfig::default(),
            ingest: IngestConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    config
        .chunking
        .to_chunk_config()
        .context("invalid [chunking] section")?;

    let r = &config.retrieval;
    if r.k == 0 {
        anyhow::bail!("retrieval.k must be >= 1");
    }
    if !(0.0..=1.0).contains(&r.min_relevance) {
        anyhow::bail!("retrieval.min_relevance must be in [0.0, 1.0]");
    }
    if r.overfetch == 0 {
        anyhow::bail!("retrieval.overfetch must be >= 1");
    }
    if !(r.dedup_similarity > 0.0 && r.dedup_similarity <= 1.0) {
        anyhow::bail!("retrieval.dedup_similarity must be in (0.0, 1.0]");
    }

    let index = config.index.settings().context("invalid [index] section")?;
    if index.m < 2 || index.ef_construction == 0 || index.ef_search == 0 {
        anyhow::bail!("index.m must be >= 2 and index.ef_construction / index.ef_search >= 1");
    }

    let e = &config.embedding;
    match e.provider.as_str() {
        "local" | "hash" => {}
        "openai" | "ollama" => {
            if e.model.is_none() {
                anyhow::bail!(
                    "embedding.model must be specified when provider is '{}'",
                    e.provider
                );
            }
            if e.dims.unwrap_or(0) == 0 {
                anyhow::bail!(
                    "embedding.dims must be > 0 when provider is '{}'",
                    e.provider
                );
            }
        }
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be local, openai, ollama, or hash.",
            other
        ),
    }
    if e.batch_size == 0 {
        anyhow::bail!("embedding.batch_size must be >= 1");
    }

    let g = &config.generation;
    match g.provider.as_str() {
        "disabled" | "openai" | "ollama" => {}
        other => anyhow::bail!(
            "Unknown generation provider: '{}'. Must be openai, ollama, or disabled.",
            other
        ),
    }
    if !(0.0..=2.0).contains(&g.temperature) {
        anyhow::bail!("generation.temperature must be in [0.0, 2.0]");
    }
    if g.max_context_chars == 0 {
        anyhow::bail!("generation.max_context_chars must be > 0");
    }

    if config.ingest.workers == 0 {
        anyhow::bail!("ingest.workers must be >= 1");
    }
    Ok(())
}

//! The assembled RAG engine.
//!
//! [`Engine`] owns the persisted store, the embedder, the generator and the
//! extractor registry. CLI commands and HTTP handlers share one instance;
//! nothing here is global.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;

use marketmuse_core::answer::{GenerationFailure, Generator, Orchestrator};
use marketmuse_core::embedding::Embedder;
use marketmuse_core::models::{Citation, ConversationTurn, RetrievalResult};
use marketmuse_core::retrieve::Retriever;
use marketmuse_core::store::{Store, StoreStats};
use marketmuse_core::Error;

use crate::config::Config;
use crate::embedding::create_embedder;
use crate::extract::ExtractorRegistry;
use crate::generation::create_generator;
use crate::ingest::{IngestOptions, IngestReport, Pipeline, Upload};
use crate::progress::IngestProgressReporter;
use crate::sqlite_store::{IndexMeta, SqliteStore};
use crate::{db, migrate};

/// Why a question could not be answered.
#[derive(Debug, thiserror::Error)]
pub enum AskError {
    /// Retrieval failed (embedding service, incompatible index).
    #[error(transparent)]
    Retrieval(#[from] Error),
    /// Generation failed; the citations of the prompt's passages are kept.
    #[error(transparent)]
    Generation(#[from] GenerationFailure),
}

impl AskError {
    pub fn code(&self) -> &'static str {
        match self {
            AskError::Retrieval(e) => e.code(),
            AskError::Generation(f) => f.error.code(),
        }
    }

    pub fn citations(&self) -> &[Citation] {
        match self {
            AskError::Retrieval(_) => &[],
            AskError::Generation(f) => &f.citations,
        }
    }
}

/// Corpus counters plus what the engine is configured with.
#[derive(Debug, Clone, serde::Serialize)]
pub struct EngineStats {
    #[serde(flatten)]
    pub store: StoreStats,
    pub index_meta: Option<IndexMeta>,
    pub embedding_model: String,
    pub generation_model: String,
    pub reindex_required: bool,
}

pub struct Engine {
    config: Config,
    store: Arc<SqliteStore>,
    embedder: Arc<dyn Embedder>,
    generator: Arc<dyn Generator>,
    registry: Arc<ExtractorRegistry>,
}

impl Engine {
    /// Open the database named in `config` with the configured providers.
    pub async fn open(config: &Config) -> Result<Self> {
        let embedder = create_embedder(&config.embedding)?;
        let generator = create_generator(&config.generation)?;
        Self::open_with(config, embedder, generator).await
    }

    /// Open with explicit providers.
    pub async fn open_with(
        config: &Config,
        embedder: Arc<dyn Embedder>,
        generator: Arc<dyn Generator>,
    ) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::migrate(&pool).await?;
        let store = SqliteStore::open(pool, config.index.settings()?, embedder.model_name())
            .await
            .context("Failed to load corpus")?;

        let engine = Self {
            config: config.clone(),
            store: Arc::new(store),
            embedder,
            generator,
            registry: Arc::new(ExtractorRegistry::with_builtins()),
        };
        if let Err(e) = engine.check_compatible() {
            tracing::warn!("{}", e);
        }
        Ok(engine)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &SqliteStore {
        &self.store
    }

    pub fn embedder(&self) -> &dyn Embedder {
        self.embedder.as_ref()
    }

    pub fn registry(&self) -> &ExtractorRegistry {
        &self.registry
    }

    /// Stored vectors must come from the configured embedding model.
    pub fn check_compatible(&self) -> marketmuse_core::Result<()> {
        let Some(meta) = self.store.meta() else {
            return Ok(());
        };
        if meta.dims != self.embedder.dims() {
            return Err(Error::DimensionMismatch {
                expected: meta.dims,
                got: self.embedder.dims(),
            });
        }
        if meta.model != self.embedder.model_name() {
            return Err(Error::IndexIo(format!(
                "index was built with embedding model '{}' but '{}' is configured; run `mm reindex`",
                meta.model,
                self.embedder.model_name()
            )));
        }
        Ok(())
    }

    fn pipeline(&self) -> Result<Pipeline> {
        let store: Arc<dyn Store> = self.store.clone();
        Ok(Pipeline::new(
            store,
            Arc::clone(&self.embedder),
            Arc::clone(&self.registry),
            IngestOptions::from_config(&self.config)?,
        ))
    }

    pub async fn ingest(
        &self,
        uploads: Vec<Upload>,
        progress: &dyn IngestProgressReporter,
    ) -> Result<IngestReport> {
        self.check_compatible()?;
        Ok(self.pipeline()?.ingest_all(uploads, progress).await)
    }

    /// Retrieve passages for `query`. `k` defaults to `retrieval.k`.
    pub async fn retrieve(
        &self,
        query: &str,
        k: Option<usize>,
        document_ids: Option<&[String]>,
    ) -> marketmuse_core::Result<RetrievalResult> {
        self.check_compatible()?;
        let retriever = Retriever::new(
            self.store.as_ref(),
            self.embedder.as_ref(),
            self.config.retrieval.params(),
        );
        retriever.retrieve(query, k, document_ids).await
    }

    /// Retrieve, then answer from what was retrieved.
    pub async fn ask(
        &self,
        question: &str,
        k: Option<usize>,
        document_ids: Option<&[String]>,
    ) -> std::result::Result<ConversationTurn, AskError> {
        let result = self.retrieve(question, k, document_ids).await?;
        let orchestrator = Orchestrator::new(
            self.generator.as_ref(),
            self.config.generation.prompt_config(),
        );
        let answer = orchestrator.answer(question, &result).await?;
        tracing::info!(
            retrieved = result.len(),
            grounded = answer.is_grounded(),
            "question answered"
        );
        Ok(ConversationTurn {
            question: question.to_string(),
            retrieved: result.passages.iter().map(Citation::from).collect(),
            answer,
            asked_at: chrono::Utc::now().timestamp(),
        })
    }

    pub async fn stats(&self) -> Result<EngineStats> {
        Ok(EngineStats {
            store: self.store.stats().await?,
            index_meta: self.store.meta(),
            embedding_model: self.embedder.model_name().to_string(),
            generation_model: self.generator.model_name().to_string(),
            reindex_required: self.check_compatible().is_err(),
        })
    }

    /// Re-embed every passage with the configured embedder.
    pub async fn reindex(&self) -> Result<usize> {
        let n = self
            .store
            .reindex(
                self.embedder.as_ref(),
                self.config.embedding.batch_size,
                Duration::from_secs(self.config.embedding.timeout_secs),
            )
            .await?;
        Ok(n)
    }

    pub async fn reset(&self) -> Result<()> {
        self.store.reset().await?;
        Ok(())
    }

    pub async fn close(self) {
        match Arc::try_unwrap(self.store) {
            Ok(store) => store.close().await,
            Err(shared) => shared.pool().close().await,
        }
    }
}

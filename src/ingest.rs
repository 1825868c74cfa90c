//! Ingestion pipeline: load → chunk → embed → store.
//!
//! Each upload is processed independently; a failure is recorded in the
//! report for that document and never aborts the batch. Documents run
//! concurrently on a [`JoinSet`] bounded by `ingest.workers` permits, and
//! the report lists them in input order.
//!
//! A document lands in the store together with every passage that embedded
//! successfully, in one atomic insert. Passages whose embedding failed are
//! counted and left out. If no passage embedded, nothing is stored.
//!
//! Re-uploading a filename with identical bytes is a no-op (`unchanged`);
//! with different bytes the new document is inserted first and the older
//! ones with that filename are then deleted.

use anyhow::Result;
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use walkdir::WalkDir;

use marketmuse_core::chunk::{split, ChunkConfig};
use marketmuse_core::embedding::Embedder;
use marketmuse_core::models::IndexEntry;
use marketmuse_core::store::Store;
use marketmuse_core::Error;

use crate::config::{Config, IngestConfig};
use crate::embedding::embed_in_batches;
use crate::engine::Engine;
use crate::extract::{self, ExtractorRegistry};
use crate::progress::{IngestProgressEvent, IngestProgressReporter, ProgressMode};

/// Raw bytes, or a file read when a worker picks it up.
#[derive(Debug, Clone)]
pub enum UploadSource {
    Bytes(Vec<u8>),
    Path(PathBuf),
}

#[derive(Debug, Clone)]
pub struct Upload {
    pub filename: String,
    pub source: UploadSource,
    /// Declared format; detected from the filename when `None`.
    pub format: Option<String>,
}

impl Upload {
    pub fn bytes(filename: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            source: UploadSource::Bytes(bytes),
            format: None,
        }
    }

    /// An upload named after the file's basename.
    pub fn path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());
        Self {
            filename,
            source: UploadSource::Path(path),
            format: None,
        }
    }

    pub fn with_format(mut self, format: Option<String>) -> Self {
        self.format = format;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum IngestStatus {
    Ingested {
        document_id: String,
        format: String,
        passages: usize,
        indexed: usize,
        failed: usize,
        /// Older documents with this filename that were removed.
        replaced: Vec<String>,
    },
    Unchanged {
        document_id: String,
    },
    Failed {
        code: String,
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestOutcome {
    pub filename: String,
    #[serde(flatten)]
    pub status: IngestStatus,
}

impl IngestOutcome {
    fn failed(filename: &str, code: &str, message: impl std::fmt::Display) -> Self {
        Self {
            filename: filename.to_string(),
            status: IngestStatus::Failed {
                code: code.to_string(),
                message: message.to_string(),
            },
        }
    }

    fn from_error(filename: &str, err: &Error) -> Self {
        Self::failed(filename, err.code(), err)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IngestReport {
    pub documents: Vec<IngestOutcome>,
}

impl IngestReport {
    fn count(&self, pred: impl Fn(&IngestStatus) -> bool) -> usize {
        self.documents.iter().filter(|o| pred(&o.status)).count()
    }

    pub fn ingested(&self) -> usize {
        self.count(|s| matches!(s, IngestStatus::Ingested { .. }))
    }

    pub fn unchanged(&self) -> usize {
        self.count(|s| matches!(s, IngestStatus::Unchanged { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|s| matches!(s, IngestStatus::Failed { .. }))
    }

    /// `(indexed, failed)` passage totals.
    pub fn passages(&self) -> (usize, usize) {
        self.documents
            .iter()
            .fold((0, 0), |(ok, bad), o| match &o.status {
                IngestStatus::Ingested { indexed, failed, .. } => (ok + indexed, bad + failed),
                _ => (ok, bad),
            })
    }
}

#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub chunking: ChunkConfig,
    pub batch_size: usize,
    pub embed_timeout: Duration,
    pub workers: usize,
    pub max_file_bytes: u64,
    pub replace_existing: bool,
}

impl IngestOptions {
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            chunking: config.chunking.to_chunk_config()?,
            batch_size: config.embedding.batch_size,
            embed_timeout: Duration::from_secs(config.embedding.timeout_secs),
            workers: config.ingest.workers,
            max_file_bytes: config.ingest.max_file_bytes,
            replace_existing: config.ingest.replace_existing,
        })
    }
}

#[derive(Clone)]
pub struct Pipeline {
    store: Arc<dyn Store>,
    embedder: Arc<dyn Embedder>,
    registry: Arc<ExtractorRegistry>,
    options: IngestOptions,
}

impl Pipeline {
    pub fn new(
        store: Arc<dyn Store>,
        embedder: Arc<dyn Embedder>,
        registry: Arc<ExtractorRegistry>,
        options: IngestOptions,
    ) -> Self {
        Self {
            store,
            embedder,
            registry,
            options,
        }
    }

    /// Ingest `uploads` concurrently; the report follows input order.
    pub async fn ingest_all(
        &self,
        uploads: Vec<Upload>,
        progress: &dyn IngestProgressReporter,
    ) -> IngestReport {
        let total = uploads.len() as u64;
        let filenames: Vec<String> = uploads.iter().map(|u| u.filename.clone()).collect();
        let permits = Arc::new(Semaphore::new(self.options.workers.max(1)));
        let mut tasks = JoinSet::new();

        for (i, upload) in uploads.into_iter().enumerate() {
            let pipeline = self.clone();
            let permits = Arc::clone(&permits);
            tasks.spawn(async move {
                let outcome = match permits.acquire_owned().await {
                    Ok(_permit) => pipeline.ingest_one(upload).await,
                    Err(e) => IngestOutcome::failed(&upload.filename, "internal", e),
                };
                (i, outcome)
            });
        }

        let mut slots: Vec<Option<IngestOutcome>> = vec![None; filenames.len()];
        let mut done = 0u64;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((i, outcome)) => {
                    done += 1;
                    progress.report(IngestProgressEvent::Ingesting {
                        n: done,
                        total,
                        filename: outcome.filename.clone(),
                    });
                    slots[i] = Some(outcome);
                }
                Err(e) => tracing::error!(error = %e, "ingest task failed"),
            }
        }

        let documents = slots
            .into_iter()
            .zip(filenames)
            .map(|(slot, filename)| {
                slot.unwrap_or_else(|| {
                    IngestOutcome::failed(&filename, "internal", "ingest task aborted")
                })
            })
            .collect();
        IngestReport { documents }
    }

    /// Ingest a single upload. Never returns an error: failures are
    /// reported in the outcome.
    pub async fn ingest_one(&self, upload: Upload) -> IngestOutcome {
        let filename = upload.filename.clone();
        match self.try_ingest(upload).await {
            Ok(status) => {
                if let IngestStatus::Ingested {
                    passages, failed, ..
                } = &status
                {
                    tracing::info!(filename = %filename, passages, failed, "document ingested");
                }
                IngestOutcome { filename, status }
            }
            Err(outcome) => {
                if let IngestStatus::Failed { code, message } = &outcome.status {
                    tracing::warn!(filename = %filename, code = %code, "{}", message);
                }
                outcome
            }
        }
    }

    async fn try_ingest(&self, upload: Upload) -> std::result::Result<IngestStatus, IngestOutcome> {
        let name = upload.filename.as_str();
        let bytes = match upload.source {
            UploadSource::Bytes(b) => b,
            UploadSource::Path(ref path) => tokio::fs::read(path).await.map_err(|e| {
                IngestOutcome::failed(name, "io", format!("{}: {}", path.display(), e))
            })?,
        };
        if bytes.len() as u64 > self.options.max_file_bytes {
            return Err(IngestOutcome::failed(
                name,
                "file_too_large",
                format!(
                    "{} bytes exceeds ingest.max_file_bytes ({})",
                    bytes.len(),
                    self.options.max_file_bytes
                ),
            ));
        }

        let hash = extract::content_hash(&bytes);
        let existing = self
            .store
            .find_by_filename(name)
            .await
            .map_err(|e| IngestOutcome::from_error(name, &e))?;
        if let Some(same) = existing.iter().find(|d| d.content_hash == hash) {
            return Ok(IngestStatus::Unchanged {
                document_id: same.id.clone(),
            });
        }

        // Extraction and chunking are CPU-bound.
        let registry = Arc::clone(&self.registry);
        let chunking = self.options.chunking.clone();
        let owned_name = name.to_string();
        let format = upload.format.clone();
        let loaded = tokio::task::spawn_blocking(move || {
            extract::load(&registry, &bytes, &owned_name, format.as_deref()).map(|loaded| {
                let passages = split(&loaded.document.id, &loaded.document.body, &chunking);
                (loaded.document, passages)
            })
        })
        .await
        .map_err(|e| IngestOutcome::failed(name, "internal", e))?;
        let (document, passages) = loaded.map_err(|e| IngestOutcome::from_error(name, &e))?;

        let texts: Vec<String> = passages.iter().map(|p| p.text.clone()).collect();
        let vectors = embed_in_batches(
            self.embedder.as_ref(),
            &texts,
            self.options.batch_size,
            self.options.embed_timeout,
        )
        .await;

        let total = passages.len();
        let mut entries = Vec::with_capacity(total);
        let mut first_error = None;
        for (passage, vector) in passages.into_iter().zip(vectors) {
            match vector {
                Ok(vector) => entries.push(IndexEntry { passage, vector }),
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }
        if total > 0 && entries.is_empty() {
            let err = first_error
                .unwrap_or_else(|| Error::EmbeddingService("no passages embedded".to_string()));
            return Err(IngestOutcome::from_error(name, &err));
        }
        let indexed = entries.len();

        self.store
            .insert_document(&document, &entries)
            .await
            .map_err(|e| IngestOutcome::from_error(name, &e))?;

        let mut replaced = Vec::new();
        if self.options.replace_existing {
            for old in existing {
                match self.store.delete_document(&old.id).await {
                    Ok(_) => replaced.push(old.id),
                    Err(e) => tracing::warn!(
                        document_id = %old.id,
                        error = %e,
                        "failed to remove replaced document"
                    ),
                }
            }
        }

        Ok(IngestStatus::Ingested {
            document_id: document.id,
            format: document.format,
            passages: total,
            indexed,
            failed: total - indexed,
            replaced,
        })
    }
}

/// CLI entry point for `mm ingest`.
pub async fn run_ingest(
    engine: &Engine,
    paths: &[PathBuf],
    format: Option<String>,
    json: bool,
    progress: ProgressMode,
) -> Result<()> {
    let reporter = progress.reporter();
    let files = collect_paths(
        paths,
        &engine.config().ingest,
        engine.registry(),
        reporter.as_ref(),
    )?;
    if files.is_empty() {
        println!("No files to ingest.");
        return Ok(());
    }

    let uploads = files
        .into_iter()
        .map(|p| Upload::path(p).with_format(format.clone()))
        .collect();
    let report = engine.ingest(uploads, reporter.as_ref()).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        for outcome in &report.documents {
            match &outcome.status {
                IngestStatus::Ingested {
                    passages,
                    failed,
                    replaced,
                    ..
                } => {
                    let mut line =
                        format!("  ingested   {}  {} passages", outcome.filename, passages);
                    if *failed > 0 {
                        line.push_str(&format!(", {} failed to embed", failed));
                    }
                    if !replaced.is_empty() {
                        line.push_str(&format!(", replaced {}", replaced.len()));
                    }
                    println!("{}", line);
                }
                IngestStatus::Unchanged { .. } => {
                    println!("  unchanged  {}", outcome.filename);
                }
                IngestStatus::Failed { code, message } => {
                    println!("  failed     {}  [{}] {}", outcome.filename, code, message);
                }
            }
        }
        let (indexed, failed) = report.passages();
        println!();
        println!(
            "{} ingested, {} unchanged, {} failed; {} passages indexed, {} failed",
            report.ingested(),
            report.unchanged(),
            report.failed(),
            indexed,
            failed
        );
    }

    if report.failed() > 0 && report.ingested() + report.unchanged() == 0 {
        anyhow::bail!("no documents were ingested");
    }
    Ok(())
}

/// Expand `paths` into ingestible files.
///
/// Files named explicitly are always included. Directories are walked and
/// filtered by `include_globs` / `exclude_globs` (relative to the directory)
/// and by the registry's known extensions. Results are sorted per root.
pub fn collect_paths(
    paths: &[PathBuf],
    config: &IngestConfig,
    registry: &ExtractorRegistry,
    progress: &dyn IngestProgressReporter,
) -> Result<Vec<PathBuf>> {
    let include_set = build_globset(&config.include_globs)?;
    let mut excludes = vec![
        "**/.git/**".to_string(),
        "**/node_modules/**".to_string(),
    ];
    excludes.extend(config.exclude_globs.iter().cloned());
    let exclude_set = build_globset(&excludes)?;

    let mut out = Vec::new();
    for root in paths {
        if root.is_file() {
            out.push(root.clone());
            continue;
        }
        if !root.is_dir() {
            anyhow::bail!("No such file or directory: {}", root.display());
        }
        progress.report(IngestProgressEvent::Discovering {
            root: root.display().to_string(),
        });

        let mut found = Vec::new();
        for entry in WalkDir::new(root).follow_links(config.follow_symlinks) {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            let relative = path.strip_prefix(root).unwrap_or(path);
            let rel_str = relative.to_string_lossy();
            if exclude_set.is_match(rel_str.as_ref()) || !include_set.is_match(rel_str.as_ref()) {
                continue;
            }
            if !registry.supports_path(path) {
                continue;
            }
            found.push(path.to_path_buf());
        }
        found.sort();
        out.extend(found);
    }
    Ok(out)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

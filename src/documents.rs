//! Document listing, retrieval by ID and deletion.
//!
//! Used by `mm documents`, `mm get`, `mm delete` and the `/documents`
//! HTTP routes.

use anyhow::{bail, Result};
use serde::Serialize;

use marketmuse_core::models::{DocumentSummary, OffsetRange};
use marketmuse_core::store::Store;

use crate::engine::Engine;

/// A document with its body and passages.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentResponse {
    pub id: String,
    pub filename: String,
    pub format: String,
    pub byte_size: u64,
    pub content_hash: String,
    pub ingested_at: String, // ISO8601
    pub body: String,
    pub passages: Vec<PassageResponse>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PassageResponse {
    pub ordinal: usize,
    pub range: OffsetRange,
    pub text: String,
}

pub async fn get_document(engine: &Engine, id: &str) -> Result<Option<DocumentResponse>> {
    let store = engine.store();
    let Some(doc) = store.get_document(id).await? else {
        return Ok(None);
    };
    let passages = store
        .passages(id)
        .await?
        .into_iter()
        .map(|p| PassageResponse {
            ordinal: p.ordinal,
            range: p.range,
            text: p.text,
        })
        .collect();

    Ok(Some(DocumentResponse {
        id: doc.id,
        filename: doc.filename,
        format: doc.format,
        byte_size: doc.byte_size,
        content_hash: doc.content_hash,
        ingested_at: format_ts_iso(doc.ingested_at),
        body: doc.body,
        passages,
    }))
}

pub async fn list_documents(engine: &Engine) -> Result<Vec<DocumentSummary>> {
    Ok(engine.store().list_documents().await?)
}

pub async fn run_documents(engine: &Engine, json: bool) -> Result<()> {
    let docs = list_documents(engine).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&docs)?);
        return Ok(());
    }
    if docs.is_empty() {
        println!("No documents.");
        return Ok(());
    }
    println!(
        "{:<36}  {:<6} {:>8}  {:<16}  FILENAME",
        "ID", "FORMAT", "PASSAGES", "INGESTED"
    );
    for d in &docs {
        println!(
            "{:<36}  {:<6} {:>8}  {:<16}  {}",
            d.id,
            d.format,
            d.passages,
            format_ts_short(d.ingested_at),
            d.filename
        );
    }
    Ok(())
}

pub async fn run_get(engine: &Engine, id: &str, json: bool) -> Result<()> {
    let Some(doc) = get_document(engine, id).await? else {
        bail!("document not found: {}", id);
    };
    if json {
        println!("{}", serde_json::to_string_pretty(&doc)?);
        return Ok(());
    }

    println!("--- Document ---");
    println!("id:           {}", doc.id);
    println!("filename:     {}", doc.filename);
    println!("format:       {}", doc.format);
    println!("size:         {} bytes", doc.byte_size);
    println!("sha256:       {}", doc.content_hash);
    println!("ingested_at:  {}", doc.ingested_at);
    println!();

    println!("--- Passages ({}) ---", doc.passages.len());
    for p in &doc.passages {
        println!("[passage {} @ {}]", p.ordinal, p.range);
        println!("{}", p.text);
        println!();
    }
    Ok(())
}

pub async fn run_delete(engine: &Engine, id: &str) -> Result<()> {
    if !engine.store().delete_document(id).await? {
        bail!("document not found: {}", id);
    }
    println!("Deleted document {}", id);
    Ok(())
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_else(|| ts.to_string())
}

fn format_ts_short(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}

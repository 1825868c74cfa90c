//! # MarketMuse
//!
//! A retrieval-augmented question answering core for marketing documents.
//!
//! Documents (PDF, TXT, Markdown, DOCX, PPTX, HTML) are loaded into plain
//! text, split into overlapping passages, embedded and stored in an HNSW
//! vector index persisted in SQLite. Questions are answered by retrieving
//! the most relevant passages and prompting a language model with them;
//! every answer carries citations back to the source passages.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────┐   ┌─────────────────┐
//! │  Upload  │──▶│   Pipeline    │──▶│  SqliteStore    │
//! │ PDF/DOCX │   │ Load+Chunk+  │   │ SQLite + HNSW   │
//! └──────────┘   │    Embed     │   └───────┬─────────┘
//!                └──────────────┘           │
//!                         ┌─────────────────┤
//!                         ▼                 ▼
//!                   ┌──────────┐      ┌───────────┐
//!                   │ Retriever│─────▶│Orchestrator│──▶ Answer + citations
//!                   └──────────┘      └───────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! mm init                          # create database
//! mm ingest ./campaigns            # load, chunk and embed documents
//! mm ask "What is the Q3 launch plan?"
//! mm serve                         # start HTTP server
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`extract`] | Format detection and text extraction |
//! | [`embedding`] | Embedding providers and batching |
//! | [`generation`] | Text generation providers |
//! | [`sqlite_store`] | Persisted corpus and vector index |
//! | [`ingest`] | Ingestion pipeline |
//! | [`engine`] | Retrieval and answering over one store |
//! | [`server`] | HTTP API |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod config;
pub mod db;
pub mod documents;
pub mod embedding;
pub mod engine;
pub mod extract;
pub mod generation;
pub mod ingest;
pub mod migrate;
pub mod progress;
pub mod query;
pub mod remote;
pub mod server;
pub mod sqlite_store;
pub mod stats;

//! # MarketMuse Core
//!
//! Runtime-agnostic logic for the MarketMuse retrieval core: data models,
//! passage chunking, the embedding trait, the HNSW vector index, the
//! corpus store abstraction, retrieval and prompt assembly.
//!
//! This crate contains no tokio, sqlx, network or filesystem I/O. The
//! application crate supplies concrete embedding and generation
//! providers plus the persisted SQLite store.

pub mod answer;
pub mod chunk;
pub mod embedding;
pub mod error;
pub mod index;
pub mod models;
pub mod retrieve;
pub mod store;

pub use error::{Error, Result};

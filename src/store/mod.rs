//! Storage gateway: SQLite persistence for pages, blocks, and block
//! embeddings, plus the text and similarity query paths.
//!
//! This module is split into two submodules:
//! - `model`: view models and per-item upsert reports returned by queries.
//! - `repo`: SQL-only functions that map rows into records.
//!
//! External modules should import from `notevault::store` — we re-export
//! the repository API and the view models for convenience.

pub mod model;
pub mod repo;

pub use model::{BlockUpsertReport, EmbeddingUpsertReport, ItemFailure, PageHit, ScoredBlock};
pub use repo::*;

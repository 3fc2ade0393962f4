//! View models returned by the storage gateway.
//!
//! Keep these structs focused on the data returned by queries. Business
//! logic lives in higher layers.

use serde::{Deserialize, Serialize};

use crate::model::BlockRecord;

/// A block matched by similarity search. `similarity` is cosine similarity
/// in `[-1, 1]`; it only exists on query results, never at rest.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoredBlock {
    pub block: BlockRecord,
    pub similarity: f64,
}

/// A page matched by title search.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PageHit {
    pub id: String,
    pub title: String,
    pub url: Option<String>,
}

/// One failed item of a batched upsert, reported instead of swallowed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ItemFailure {
    pub id: String,
    pub error: String,
}

/// Per-item outcome of `upsert_blocks`. `removed_stale` counts blocks that
/// existed from a previous migration but are no longer present upstream.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlockUpsertReport {
    pub written: usize,
    pub failed: Vec<ItemFailure>,
    pub removed_stale: usize,
}

/// Per-item outcome of `upsert_embeddings`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct EmbeddingUpsertReport {
    pub written: usize,
    pub failed: Vec<ItemFailure>,
}

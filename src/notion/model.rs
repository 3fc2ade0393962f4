//! Wire models for the content provider API. Only the fields the pipeline
//! reads are typed; type-specific block content stays as raw JSON keyed by
//! the block type, exactly as the provider sends it.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{Map, Value};

/// `GET /v1/pages/{id}` response.
#[derive(Debug, Clone, Deserialize)]
pub struct PageResp {
    pub id: String,
    pub created_time: DateTime<Utc>,
    pub last_edited_time: DateTime<Utc>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub properties: Map<String, Value>,
}

/// One block from `GET /v1/blocks/{id}/children`. The flattened `extra`
/// map captures the type-specific content object (e.g. `"paragraph": {...}`)
/// alongside whatever other fields the provider includes.
#[derive(Debug, Clone, Deserialize)]
pub struct BlockResp {
    pub id: String,
    #[serde(rename = "type")]
    pub block_type: String,
    #[serde(default)]
    pub has_children: bool,
    pub created_time: DateTime<Utc>,
    pub last_edited_time: DateTime<Utc>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl BlockResp {
    /// The type-specific content payload, `{}` for leaf-only types.
    pub fn payload(&self) -> Value {
        self.extra
            .get(&self.block_type)
            .cloned()
            .unwrap_or_else(|| Value::Object(Map::new()))
    }
}

/// Paginated list envelope shared by the children endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct ListResp<T> {
    pub results: Vec<T>,
    #[serde(default)]
    pub has_more: bool,
    #[serde(default)]
    pub next_cursor: Option<String>,
}

/// A block with its recursively fetched children, in source order. Produced
/// by the adapter; consumed by the pure normalizer.
#[derive(Debug, Clone)]
pub struct RawBlock {
    pub block: BlockResp,
    pub children: Vec<RawBlock>,
}

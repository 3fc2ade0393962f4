use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A typed view of one page property. The provider sends properties as
/// `{"type": "...", "<type>": ...}` objects; [`PropertyValue::from_wire`]
/// classifies the common types and keeps everything else as raw JSON so no
/// property is ever dropped.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PropertyValue {
    Title { text: String },
    Text { text: String },
    Select { option: Option<String> },
    MultiSelect { options: Vec<String> },
    Number { value: Option<f64> },
    Checkbox { checked: bool },
    Date { start: Option<String>, end: Option<String> },
    Url { url: Option<String> },
    Relation { page_ids: Vec<String> },
    Formula { value: Value },
    Other { raw: Value },
}

impl PropertyValue {
    pub fn from_wire(raw: &Value) -> Self {
        let Some(typ) = raw.get("type").and_then(Value::as_str) else {
            return PropertyValue::Other { raw: raw.clone() };
        };
        let body = raw.get(typ).cloned().unwrap_or(Value::Null);
        match typ {
            "title" => PropertyValue::Title {
                text: join_rich_text(&body),
            },
            "rich_text" => PropertyValue::Text {
                text: join_rich_text(&body),
            },
            "select" => PropertyValue::Select {
                option: body
                    .get("name")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            },
            "multi_select" => PropertyValue::MultiSelect {
                options: body
                    .as_array()
                    .map(|opts| {
                        opts.iter()
                            .filter_map(|o| o.get("name").and_then(Value::as_str))
                            .map(str::to_string)
                            .collect()
                    })
                    .unwrap_or_default(),
            },
            "number" => PropertyValue::Number {
                value: body.as_f64(),
            },
            "checkbox" => PropertyValue::Checkbox {
                checked: body.as_bool().unwrap_or(false),
            },
            "date" => PropertyValue::Date {
                start: body
                    .get("start")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                end: body.get("end").and_then(Value::as_str).map(str::to_string),
            },
            "url" => PropertyValue::Url {
                url: body.as_str().map(str::to_string),
            },
            "relation" => PropertyValue::Relation {
                page_ids: body
                    .as_array()
                    .map(|rels| {
                        rels.iter()
                            .filter_map(|r| r.get("id").and_then(Value::as_str))
                            .map(str::to_string)
                            .collect()
                    })
                    .unwrap_or_default(),
            },
            "formula" => PropertyValue::Formula { value: body },
            _ => PropertyValue::Other { raw: raw.clone() },
        }
    }

    /// Plain-text projection of the property, used for titles and rendering.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            PropertyValue::Title { text } | PropertyValue::Text { text } => Some(text),
            _ => None,
        }
    }
}

/// Concatenate the `plain_text` runs of a rich-text array.
pub fn join_rich_text(body: &Value) -> String {
    body.as_array()
        .map(|runs| {
            runs.iter()
                .filter_map(|run| run.get("plain_text").and_then(Value::as_str))
                .collect::<String>()
        })
        .unwrap_or_default()
}

/// A migrated page. Written only after a successful fetch; re-migration
/// overwrites it in place.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PageRecord {
    pub id: String,
    pub title: String,
    pub properties: BTreeMap<String, PropertyValue>,
    pub created_time: DateTime<Utc>,
    pub last_edited_time: DateTime<Utc>,
    pub url: Option<String>,
}

/// A flattened block row. `payload` holds the provider's type-specific
/// content object keyed by `block_type`; leaf-only types (divider, ...)
/// carry an empty payload and an empty text projection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BlockRecord {
    pub id: String,
    pub page_id: String,
    pub block_type: String,
    pub payload: Value,
    pub child_ids: Vec<String>,
    pub has_children: bool,
    pub text: String,
    pub created_time: DateTime<Utc>,
    pub last_edited_time: DateTime<Utc>,
}

/// A block's embedding vector. Similarity scores only exist on query
/// results (see [`crate::store::ScoredBlock`]), never at rest.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingRecord {
    pub block_id: String,
    pub vector: Vec<f32>,
}

/// Stages of a single page migration, in order. No stage is re-entered;
/// failure at any stage produces a `Failed` result for that page only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationStage {
    Fetching,
    Normalizing,
    Embedding,
    Persisting,
}

impl MigrationStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            MigrationStage::Fetching => "fetching",
            MigrationStage::Normalizing => "normalizing",
            MigrationStage::Embedding => "embedding",
            MigrationStage::Persisting => "persisting",
        }
    }
}

/// Per-page migration outcome.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MigrationResult {
    pub page_id: String,
    pub success: bool,
    pub blocks_processed: usize,
    pub embeddings_generated: usize,
    pub error: Option<String>,
}

impl MigrationResult {
    pub fn failed(page_id: impl Into<String>, stage: MigrationStage, error: String) -> Self {
        Self {
            page_id: page_id.into(),
            success: false,
            blocks_processed: 0,
            embeddings_generated: 0,
            error: Some(format!("{}: {}", stage.as_str(), error)),
        }
    }
}

/// Aggregate over a batch of [`MigrationResult`]s: plain sums and counts.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BatchSummary {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub total_blocks: usize,
    pub total_embeddings: usize,
}

impl BatchSummary {
    pub fn from_results(results: &[MigrationResult]) -> Self {
        let mut summary = BatchSummary {
            total: results.len(),
            ..Default::default()
        };
        for result in results {
            if result.success {
                summary.successful += 1;
            } else {
                summary.failed += 1;
            }
            summary.total_blocks += result.blocks_processed;
            summary.total_embeddings += result.embeddings_generated;
        }
        summary
    }
}

/// Outcome of `migrate_pages`: one result per requested page plus the
/// aggregate summary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MigrationRun {
    pub results: Vec<MigrationResult>,
    pub summary: BatchSummary,
}

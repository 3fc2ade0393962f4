//! Health probes for the storage layer and the embedding provider.

use serde::{Deserialize, Serialize};

use crate::embeddings::EmbeddingProvider;
use crate::store::{self, Pool};

/// Tables the pipeline cannot run without.
pub const REQUIRED_TABLES: &[&str] = &["pages", "blocks", "block_embeddings"];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TableHealth {
    pub name: String,
    pub accessible: bool,
    pub rows: Option<i64>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DatabaseHealth {
    pub healthy: bool,
    pub tables: Vec<TableHealth>,
}

/// Probe each required table for accessibility and row count.
pub async fn database_health(pool: &Pool) -> DatabaseHealth {
    let mut tables = Vec::with_capacity(REQUIRED_TABLES.len());
    for &name in REQUIRED_TABLES {
        match store::table_row_count(pool, name).await {
            Ok(rows) => tables.push(TableHealth {
                name: name.to_string(),
                accessible: true,
                rows: Some(rows),
                error: None,
            }),
            Err(err) => tables.push(TableHealth {
                name: name.to_string(),
                accessible: false,
                rows: None,
                error: Some(err.to_string()),
            }),
        }
    }
    DatabaseHealth {
        healthy: tables.iter().all(|t| t.accessible),
        tables,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeMode {
    /// Report configuration without calling the provider.
    DryRun,
    /// Generate one test embedding and report its dimension.
    Live,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EmbeddingsHealth {
    pub mode: ProbeMode,
    pub configured_dimension: usize,
    pub observed_dimension: Option<usize>,
    pub healthy: bool,
    pub error: Option<String>,
}

pub async fn embeddings_health(
    provider: &dyn EmbeddingProvider,
    mode: ProbeMode,
) -> EmbeddingsHealth {
    let configured_dimension = provider.dimension();
    match mode {
        ProbeMode::DryRun => EmbeddingsHealth {
            mode,
            configured_dimension,
            observed_dimension: None,
            healthy: configured_dimension > 0,
            error: None,
        },
        ProbeMode::Live => match provider.embed("health probe").await {
            Ok(vector) => EmbeddingsHealth {
                mode,
                configured_dimension,
                observed_dimension: Some(vector.len()),
                healthy: vector.len() == configured_dimension,
                error: None,
            },
            Err(err) => EmbeddingsHealth {
                mode,
                configured_dimension,
                observed_dimension: None,
                healthy: false,
                error: Some(err.to_string()),
            },
        },
    }
}

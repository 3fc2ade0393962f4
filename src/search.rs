//! Search coordinator: blends full-text and similarity lookup over the
//! migrated content.
//!
//! The text query always runs. When embeddings are requested but the
//! provider fails, the search degrades to text-only results (with a
//! warning) instead of failing; a failed text query still fails the whole
//! search, since text is the guaranteed half of the contract.

use serde::{Deserialize, Serialize};
use tracing::{instrument, warn};

use crate::embeddings::EmbeddingProvider;
use crate::error::Error;
use crate::model::BlockRecord;
use crate::store::{self, PageHit, Pool, ScoredBlock};

pub const DEFAULT_LIMIT: usize = 10;
pub const DEFAULT_THRESHOLD: f64 = 0.7;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchOptions {
    pub use_embeddings: bool,
    /// Bounds the result count of each source independently.
    pub limit: usize,
    /// Minimum cosine similarity for embedding matches.
    pub threshold: f64,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            use_embeddings: false,
            limit: DEFAULT_LIMIT,
            threshold: DEFAULT_THRESHOLD,
        }
    }
}

/// Text and embedding results stay separate; callers choose how to combine
/// them. `embedding` is `None` when embeddings were not requested or when
/// the embedding step degraded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchResults {
    pub text: Vec<BlockRecord>,
    pub pages: Vec<PageHit>,
    pub embedding: Option<Vec<ScoredBlock>>,
}

#[instrument(skip_all)]
pub async fn search(
    pool: &Pool,
    embedder: &dyn EmbeddingProvider,
    query: &str,
    opts: &SearchOptions,
) -> Result<SearchResults, Error> {
    let query = query.trim();
    if query.is_empty() {
        return Err(Error::Validation("search query must be non-empty".into()));
    }

    let text = store::query_text(pool, query, opts.limit).await?;
    let pages = store::query_pages(pool, query, opts.limit).await?;

    let embedding = if opts.use_embeddings {
        match embedder.embed(query).await {
            Ok(vector) => {
                Some(store::query_embeddings(pool, &vector, opts.limit, opts.threshold).await?)
            }
            Err(err) => {
                warn!(?err, "embedding failed; degrading to text-only search");
                None
            }
        }
    } else {
        None
    };

    Ok(SearchResults {
        text,
        pages,
        embedding,
    })
}

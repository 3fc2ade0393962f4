//! Migration orchestrator: drives one page through
//! fetching → normalizing → embedding → persisting, and batches of pages
//! through the same path with per-page error isolation.

use futures::future::try_join;
use tracing::{debug, info, instrument, warn};

use crate::embeddings::EmbeddingProvider;
use crate::model::{
    BatchSummary, BlockRecord, EmbeddingRecord, MigrationResult, MigrationRun, MigrationStage,
};
use crate::normalize;
use crate::notion::{normalize_page_id, ContentSource};
use crate::store::{self, Pool};

/// How many block texts go into one provider call. A transient failure
/// skips only the members of the affected chunk.
const EMBED_CHUNK_SIZE: usize = 16;

/// Migrate a single page. Never returns `Err`: every failure mode is
/// reported structurally through [`MigrationResult`] so a containing batch
/// keeps going.
///
/// Blocks whose text projection is empty (dividers, unknown types) are
/// persisted but not embedded, so `embeddings_generated <=
/// blocks_processed`. A transiently failing embedding chunk is skipped and
/// noted in `error` without failing the page; fatal embedding errors fail
/// the page before anything is written.
#[instrument(skip_all, fields(page = %raw_page_id))]
pub async fn migrate_page(
    pool: &Pool,
    source: &dyn ContentSource,
    embedder: &dyn EmbeddingProvider,
    raw_page_id: &str,
) -> MigrationResult {
    let page_id = match normalize_page_id(raw_page_id) {
        Ok(id) => id,
        Err(err) => {
            return MigrationResult {
                page_id: raw_page_id.to_string(),
                success: false,
                blocks_processed: 0,
                embeddings_generated: 0,
                error: Some(err.to_string()),
            };
        }
    };

    debug!(stage = MigrationStage::Fetching.as_str(), "migrating page");
    let (page, tree) = match try_join(
        source.fetch_page(&page_id),
        source.fetch_block_tree(&page_id),
    )
    .await
    {
        Ok(fetched) => fetched,
        Err(err) => {
            return MigrationResult::failed(page_id, MigrationStage::Fetching, err.to_string())
        }
    };

    debug!(stage = MigrationStage::Normalizing.as_str(), "flattening block tree");
    let blocks = normalize::flatten(&page_id, &tree);

    debug!(
        stage = MigrationStage::Embedding.as_str(),
        blocks = blocks.len(),
        "generating embeddings"
    );
    let (embeddings, skipped_transient) = match embed_blocks(embedder, &blocks).await {
        Ok(out) => out,
        Err(err) => {
            return MigrationResult::failed(page_id, MigrationStage::Embedding, err.to_string())
        }
    };

    debug!(stage = MigrationStage::Persisting.as_str(), "writing records");
    if let Err(err) = store::upsert_page(pool, &page).await {
        return MigrationResult::failed(page_id, MigrationStage::Persisting, err.to_string());
    }
    let block_report = match store::upsert_blocks(pool, &page_id, &blocks).await {
        Ok(report) => report,
        Err(err) => {
            return MigrationResult::failed(page_id, MigrationStage::Persisting, err.to_string())
        }
    };
    let embed_report = match store::upsert_embeddings(pool, &embeddings).await {
        Ok(report) => report,
        Err(err) => {
            return MigrationResult::failed(page_id, MigrationStage::Persisting, err.to_string())
        }
    };

    let mut notes = Vec::new();
    if skipped_transient > 0 {
        notes.push(format!(
            "{skipped_transient} block(s) skipped embedding after transient provider errors"
        ));
    }
    for failure in &block_report.failed {
        notes.push(format!("block {}: {}", failure.id, failure.error));
    }
    for failure in &embed_report.failed {
        notes.push(format!("embedding {}: {}", failure.id, failure.error));
    }

    let success = block_report.failed.is_empty() && embed_report.failed.is_empty();
    MigrationResult {
        page_id,
        success,
        blocks_processed: block_report.written,
        embeddings_generated: embed_report.written,
        error: if notes.is_empty() {
            None
        } else {
            Some(notes.join("; "))
        },
    }
}

/// Embed the non-empty text projections, chunked. Returns the embedding
/// records plus the count of blocks skipped because their chunk failed
/// transiently. Fatal provider errors abort the page.
async fn embed_blocks(
    embedder: &dyn EmbeddingProvider,
    blocks: &[BlockRecord],
) -> Result<(Vec<EmbeddingRecord>, usize), crate::error::EmbeddingError> {
    let candidates: Vec<&BlockRecord> = blocks.iter().filter(|b| !b.text.is_empty()).collect();

    let mut records = Vec::with_capacity(candidates.len());
    let mut skipped = 0usize;
    for chunk in candidates.chunks(EMBED_CHUNK_SIZE) {
        let texts: Vec<String> = chunk.iter().map(|b| b.text.clone()).collect();
        match embedder.embed_batch(&texts).await {
            Ok(vectors) => {
                for (block, vector) in chunk.iter().zip(vectors) {
                    records.push(EmbeddingRecord {
                        block_id: block.id.clone(),
                        vector,
                    });
                }
            }
            Err(err) if err.is_retryable() => {
                warn!(?err, count = chunk.len(), "skipping chunk after transient embedding error");
                skipped += chunk.len();
            }
            Err(err) => return Err(err),
        }
    }
    Ok((records, skipped))
}

/// Migrate many pages. `batch_size` groups pages for reporting; execution
/// stays sequential and one page's failure never aborts its siblings.
#[instrument(skip_all, fields(pages = page_ids.len()))]
pub async fn migrate_pages(
    pool: &Pool,
    source: &dyn ContentSource,
    embedder: &dyn EmbeddingProvider,
    page_ids: &[String],
    batch_size: usize,
) -> MigrationRun {
    let batch_size = batch_size.max(1);
    let mut results = Vec::with_capacity(page_ids.len());

    for (index, batch) in page_ids.chunks(batch_size).enumerate() {
        debug!(batch = index, size = batch.len(), "processing batch");
        for page_id in batch {
            let result = migrate_page(pool, source, embedder, page_id).await;
            if result.success {
                info!(
                    page = %result.page_id,
                    blocks = result.blocks_processed,
                    embeddings = result.embeddings_generated,
                    "page migrated"
                );
            } else {
                warn!(
                    page = %result.page_id,
                    error = result.error.as_deref().unwrap_or("unknown"),
                    "page migration failed"
                );
            }
            results.push(result);
        }
    }

    let summary = BatchSummary::from_results(&results);
    MigrationRun { results, summary }
}

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::json;

use notevault::embeddings::EmbeddingProvider;
use notevault::error::{EmbeddingError, SourceError};
use notevault::migrate;
use notevault::model::PageRecord;
use notevault::notion::model::{BlockResp, RawBlock};
use notevault::notion::ContentSource;
use notevault::store;

async fn setup_pool() -> sqlx::SqlitePool {
    let pool = sqlx::SqlitePool::connect("sqlite::memory:").await.unwrap();
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    pool
}

fn ts() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

fn page_record(id: &str, title: &str) -> PageRecord {
    PageRecord {
        id: id.into(),
        title: title.into(),
        properties: Default::default(),
        created_time: ts(),
        last_edited_time: ts(),
        url: None,
    }
}

fn wire_block(id: &str, block_type: &str, text: Option<&str>) -> BlockResp {
    let mut wire = json!({
        "id": id,
        "type": block_type,
        "has_children": false,
        "created_time": "2024-01-01T00:00:00Z",
        "last_edited_time": "2024-01-01T00:00:00Z",
    });
    let payload = match text {
        Some(t) => json!({ block_type: {"rich_text": [{"plain_text": t}]} }),
        None => json!({ block_type: {} }),
    };
    wire.as_object_mut()
        .unwrap()
        .extend(payload.as_object().unwrap().clone());
    serde_json::from_value(wire).unwrap()
}

fn leaf(id: &str, block_type: &str, text: Option<&str>) -> RawBlock {
    RawBlock {
        block: wire_block(id, block_type, text),
        children: Vec::new(),
    }
}

#[derive(Clone, Default)]
struct FakeSource {
    pages: HashMap<String, (PageRecord, Vec<RawBlock>)>,
    missing: HashSet<String>,
    fetch_calls: Arc<AtomicUsize>,
}

impl FakeSource {
    fn add_page(&mut self, id: &str, title: &str, blocks: Vec<RawBlock>) {
        self.pages
            .insert(id.to_string(), (page_record(id, title), blocks));
    }

    fn mark_missing(&mut self, id: &str) {
        self.missing.insert(id.to_string());
    }
}

#[async_trait]
impl ContentSource for FakeSource {
    async fn fetch_page(&self, page_id: &str) -> Result<PageRecord, SourceError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        if self.missing.contains(page_id) {
            return Err(SourceError::NotFound(page_id.to_string()));
        }
        self.pages
            .get(page_id)
            .map(|(page, _)| page.clone())
            .ok_or_else(|| SourceError::NotFound(page_id.to_string()))
    }

    async fn fetch_block_tree(&self, page_id: &str) -> Result<Vec<RawBlock>, SourceError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        if self.missing.contains(page_id) {
            return Err(SourceError::NotFound(page_id.to_string()));
        }
        self.pages
            .get(page_id)
            .map(|(_, blocks)| blocks.clone())
            .ok_or_else(|| SourceError::NotFound(page_id.to_string()))
    }
}

#[derive(Clone, Copy, PartialEq)]
enum FailMode {
    None,
    Transient,
    Fatal,
}

#[derive(Clone)]
struct FakeEmbedder {
    dimension: usize,
    fail: FailMode,
    calls: Arc<AtomicUsize>,
}

impl FakeEmbedder {
    fn new() -> Self {
        Self {
            dimension: 4,
            fail: FailMode::None,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn failing(fail: FailMode) -> Self {
        Self {
            fail,
            ..Self::new()
        }
    }

    /// Deterministic per-text vector so order and identity are checkable.
    fn vector_for(text: &str) -> Vec<f32> {
        let len = text.len() as f32;
        let sum: u32 = text.bytes().map(u32::from).sum();
        vec![len, (sum % 97) as f32, 1.0, 0.0]
    }
}

#[async_trait]
impl EmbeddingProvider for FakeEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        Ok(vectors.pop().unwrap())
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.fail {
            FailMode::Transient => Err(EmbeddingError::RateLimited("slow down".into())),
            FailMode::Fatal => Err(EmbeddingError::InvalidInput("bad input".into())),
            FailMode::None => Ok(texts.iter().map(|t| Self::vector_for(t)).collect()),
        }
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

#[tokio::test]
async fn migrate_page_counts_blocks_and_skips_empty_projection() {
    let pool = setup_pool().await;
    let mut source = FakeSource::default();
    source.add_page(
        "page-1",
        "Example",
        vec![
            leaf("b1", "paragraph", Some("Hello")),
            leaf("b2", "divider", None),
        ],
    );
    let embedder = FakeEmbedder::new();

    let result = migrate::migrate_page(&pool, &source, &embedder, "page-1").await;

    assert!(result.success, "error: {:?}", result.error);
    assert_eq!(result.blocks_processed, 2);
    assert_eq!(result.embeddings_generated, 1);
    assert!(result.error.is_none());

    assert_eq!(store::count_blocks(&pool, "page-1").await.unwrap(), 2);
    assert_eq!(store::count_embeddings(&pool, "page-1").await.unwrap(), 1);

    let page = store::get_page(&pool, "page-1").await.unwrap().unwrap();
    assert_eq!(page.title, "Example");
}

#[tokio::test]
async fn migrate_page_preserves_flatten_order() {
    let pool = setup_pool().await;
    let tree = vec![
        RawBlock {
            block: wire_block("A", "paragraph", Some("a")),
            children: vec![
                leaf("B", "paragraph", Some("b")),
                leaf("C", "paragraph", Some("c")),
            ],
        },
        leaf("D", "paragraph", Some("d")),
    ];
    let mut source = FakeSource::default();
    source.add_page("page-1", "Ordered", tree);
    let embedder = FakeEmbedder::new();

    let result = migrate::migrate_page(&pool, &source, &embedder, "page-1").await;
    assert!(result.success);

    let blocks = store::list_page_blocks(&pool, "page-1").await.unwrap();
    let ids: Vec<&str> = blocks.iter().map(|b| b.id.as_str()).collect();
    assert_eq!(ids, vec!["A", "B", "C", "D"]);
    assert_eq!(blocks[0].child_ids, vec!["B".to_string(), "C".to_string()]);
}

#[tokio::test]
async fn migrate_page_twice_does_not_duplicate() {
    let pool = setup_pool().await;
    let mut source = FakeSource::default();
    source.add_page(
        "page-1",
        "Stable",
        vec![
            leaf("b1", "paragraph", Some("one")),
            leaf("b2", "paragraph", Some("two")),
        ],
    );
    let embedder = FakeEmbedder::new();

    let first = migrate::migrate_page(&pool, &source, &embedder, "page-1").await;
    let second = migrate::migrate_page(&pool, &source, &embedder, "page-1").await;

    assert_eq!(first, second);
    assert_eq!(store::count_blocks(&pool, "page-1").await.unwrap(), 2);
    assert_eq!(store::count_embeddings(&pool, "page-1").await.unwrap(), 2);
}

#[tokio::test]
async fn remigration_prunes_stale_blocks_and_their_embeddings() {
    let pool = setup_pool().await;
    let embedder = FakeEmbedder::new();

    let mut full = FakeSource::default();
    full.add_page(
        "page-1",
        "Shrinking",
        vec![
            leaf("keep", "paragraph", Some("kept")),
            leaf("gone", "paragraph", Some("removed later")),
        ],
    );
    assert!(
        migrate::migrate_page(&pool, &full, &embedder, "page-1")
            .await
            .success
    );
    assert_eq!(store::count_blocks(&pool, "page-1").await.unwrap(), 2);

    let mut shrunk = FakeSource::default();
    shrunk.add_page(
        "page-1",
        "Shrinking",
        vec![leaf("keep", "paragraph", Some("kept"))],
    );
    let result = migrate::migrate_page(&pool, &shrunk, &embedder, "page-1").await;
    assert!(result.success);
    assert_eq!(store::count_blocks(&pool, "page-1").await.unwrap(), 1);
    assert_eq!(store::count_embeddings(&pool, "page-1").await.unwrap(), 1);

    let blocks = store::list_page_blocks(&pool, "page-1").await.unwrap();
    assert_eq!(blocks[0].id, "keep");
}

#[tokio::test]
async fn batch_isolates_failures_and_aggregates_summary() {
    let pool = setup_pool().await;
    let mut source = FakeSource::default();
    source.add_page("page-1", "One", vec![leaf("a", "paragraph", Some("a"))]);
    source.mark_missing("page-2");
    source.add_page("page-3", "Three", vec![leaf("c", "paragraph", Some("c"))]);
    let embedder = FakeEmbedder::new();

    let ids = vec![
        "page-1".to_string(),
        "page-2".to_string(),
        "page-3".to_string(),
    ];
    let run = migrate::migrate_pages(&pool, &source, &embedder, &ids, 2).await;

    assert_eq!(run.results.len(), 3);
    let failed: Vec<_> = run.results.iter().filter(|r| !r.success).collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].page_id, "page-2");
    assert!(failed[0].error.as_deref().unwrap().contains("fetching"));

    assert_eq!(run.summary.total, 3);
    assert_eq!(run.summary.successful, 2);
    assert_eq!(run.summary.failed, 1);
    assert_eq!(run.summary.total_blocks, 2);
    assert_eq!(run.summary.total_embeddings, 2);
}

#[tokio::test]
async fn empty_page_id_fails_before_any_io() {
    let pool = setup_pool().await;
    let source = FakeSource::default();
    let embedder = FakeEmbedder::new();

    let result = migrate::migrate_page(&pool, &source, &embedder, "  ").await;

    assert!(!result.success);
    assert!(result.error.as_deref().unwrap().contains("non-empty"));
    assert_eq!(source.fetch_calls.load(Ordering::SeqCst), 0);
    assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn transient_embedding_failure_skips_blocks_without_failing_page() {
    let pool = setup_pool().await;
    let mut source = FakeSource::default();
    source.add_page(
        "page-1",
        "Rate limited",
        vec![leaf("b1", "paragraph", Some("text"))],
    );
    let embedder = FakeEmbedder::failing(FailMode::Transient);

    let result = migrate::migrate_page(&pool, &source, &embedder, "page-1").await;

    assert!(result.success, "transient skip must not fail the page");
    assert_eq!(result.blocks_processed, 1);
    assert_eq!(result.embeddings_generated, 0);
    assert!(result.error.as_deref().unwrap().contains("skipped"));
    assert_eq!(store::count_blocks(&pool, "page-1").await.unwrap(), 1);
}

#[tokio::test]
async fn fatal_embedding_failure_fails_page_before_persisting() {
    let pool = setup_pool().await;
    let mut source = FakeSource::default();
    source.add_page(
        "page-1",
        "Broken",
        vec![leaf("b1", "paragraph", Some("text"))],
    );
    let embedder = FakeEmbedder::failing(FailMode::Fatal);

    let result = migrate::migrate_page(&pool, &source, &embedder, "page-1").await;

    assert!(!result.success);
    assert!(result.error.as_deref().unwrap().starts_with("embedding:"));
    assert!(store::get_page(&pool, "page-1").await.unwrap().is_none());
    assert_eq!(store::count_blocks(&pool, "page-1").await.unwrap(), 0);
}

#[tokio::test]
async fn stored_vectors_match_their_blocks() {
    let pool = setup_pool().await;
    let mut source = FakeSource::default();
    source.add_page(
        "page-1",
        "Vectors",
        vec![
            leaf("b1", "paragraph", Some("alpha")),
            leaf("b2", "paragraph", Some("a much longer beta paragraph")),
        ],
    );
    let embedder = FakeEmbedder::new();
    assert!(
        migrate::migrate_page(&pool, &source, &embedder, "page-1")
            .await
            .success
    );

    // Querying with b2's exact vector must rank b2 first with similarity 1.
    let query = FakeEmbedder::vector_for("a much longer beta paragraph");
    let hits = store::query_embeddings(&pool, &query, 5, 0.5).await.unwrap();
    assert!(!hits.is_empty());
    assert_eq!(hits[0].block.id, "b2");
    assert!((hits[0].similarity - 1.0).abs() < 1e-9);
}

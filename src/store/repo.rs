use std::collections::HashSet;
use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqliteRow};
use sqlx::{Row, SqlitePool};
use tracing::instrument;

use super::model::{
    BlockUpsertReport, EmbeddingUpsertReport, ItemFailure, PageHit, ScoredBlock,
};
use crate::error::StoreError;
use crate::model::{BlockRecord, EmbeddingRecord, PageRecord};

pub type Pool = SqlitePool;

pub async fn init_pool(database_url: &str) -> Result<Pool, StoreError> {
    let normalized = prepare_sqlite_url(database_url);
    // WAL journal; foreign keys on for the block→embedding cascade. Set
    // through connect options so every pooled connection gets them.
    let options = SqliteConnectOptions::from_str(&normalized)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true);
    let pool = SqlitePool::connect_with(options).await?;
    Ok(pool)
}

/// If using a file-backed SQLite URL, expand a leading `~/` and ensure the
/// parent directory exists. Leaves in-memory URLs untouched. Returns
/// possibly-updated URL.
fn prepare_sqlite_url(url: &str) -> String {
    if !url.starts_with("sqlite:") {
        return url.to_string();
    }
    if url.starts_with("sqlite::memory") {
        return url.to_string();
    }

    let rest = &url["sqlite:".len()..];
    let path_with_query = rest.strip_prefix("//").unwrap_or(rest);

    let (path_part, query_part) = match path_with_query.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path_with_query, None),
    };

    if path_part.is_empty() {
        return url.to_string();
    }

    let expanded_path = if let Some(rest) = path_part.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            format!("{}/{}", home.trim_end_matches('/'), rest)
        } else {
            path_part.to_string()
        }
    } else {
        path_part.to_string()
    };

    if let Some(parent) = std::path::Path::new(&expanded_path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    let mut rebuilt = String::from("sqlite://");
    rebuilt.push_str(&expanded_path);
    if let Some(q) = query_part {
        rebuilt.push('?');
        rebuilt.push_str(q);
    }
    rebuilt
}

pub async fn run_migrations(pool: &Pool) -> Result<(), StoreError> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Insert-or-replace a page keyed by its external id.
#[instrument(skip_all)]
pub async fn upsert_page(pool: &Pool, page: &PageRecord) -> Result<(), StoreError> {
    let properties = serde_json::to_string(&page.properties)
        .map_err(|err| StoreError::Corrupt(format!("page properties: {err}")))?;
    sqlx::query(
        "INSERT INTO pages (id, title, properties, url, created_time, last_edited_time, migrated_at) \
         VALUES (?, ?, ?, ?, ?, ?, datetime('now')) \
         ON CONFLICT(id) DO UPDATE SET \
             title = excluded.title, \
             properties = excluded.properties, \
             url = excluded.url, \
             created_time = excluded.created_time, \
             last_edited_time = excluded.last_edited_time, \
             migrated_at = excluded.migrated_at",
    )
    .bind(&page.id)
    .bind(&page.title)
    .bind(properties)
    .bind(&page.url)
    .bind(page.created_time)
    .bind(page.last_edited_time)
    .execute(pool)
    .await?;
    Ok(())
}

/// Insert-or-replace the blocks of one page, then prune blocks from earlier
/// migrations that are no longer present upstream. Failures are reported
/// per item; rows written before a failure stay committed (upserts are
/// idempotent, retrying is safe).
#[instrument(skip_all)]
pub async fn upsert_blocks(
    pool: &Pool,
    page_id: &str,
    blocks: &[BlockRecord],
) -> Result<BlockUpsertReport, StoreError> {
    let mut report = BlockUpsertReport::default();

    for (position, block) in blocks.iter().enumerate() {
        match upsert_block(pool, block, position as i64).await {
            Ok(()) => report.written += 1,
            Err(err) => report.failed.push(ItemFailure {
                id: block.id.clone(),
                error: err.to_string(),
            }),
        }
    }

    let keep: HashSet<&str> = blocks.iter().map(|b| b.id.as_str()).collect();
    let existing: Vec<String> = sqlx::query_scalar("SELECT id FROM blocks WHERE page_id = ?")
        .bind(page_id)
        .fetch_all(pool)
        .await?;
    for stale in existing.iter().filter(|id| !keep.contains(id.as_str())) {
        sqlx::query("DELETE FROM block_embeddings WHERE block_id = ?")
            .bind(stale)
            .execute(pool)
            .await?;
        sqlx::query("DELETE FROM blocks WHERE id = ?")
            .bind(stale)
            .execute(pool)
            .await?;
        report.removed_stale += 1;
    }

    Ok(report)
}

async fn upsert_block(pool: &Pool, block: &BlockRecord, position: i64) -> Result<(), StoreError> {
    let payload = serde_json::to_string(&block.payload)
        .map_err(|err| StoreError::Corrupt(format!("block payload: {err}")))?;
    let child_ids = serde_json::to_string(&block.child_ids)
        .map_err(|err| StoreError::Corrupt(format!("block child ids: {err}")))?;
    sqlx::query(
        "INSERT INTO blocks (id, page_id, block_type, payload, child_ids, has_children, position, text, created_time, last_edited_time) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
         ON CONFLICT(id) DO UPDATE SET \
             page_id = excluded.page_id, \
             block_type = excluded.block_type, \
             payload = excluded.payload, \
             child_ids = excluded.child_ids, \
             has_children = excluded.has_children, \
             position = excluded.position, \
             text = excluded.text, \
             created_time = excluded.created_time, \
             last_edited_time = excluded.last_edited_time",
    )
    .bind(&block.id)
    .bind(&block.page_id)
    .bind(&block.block_type)
    .bind(payload)
    .bind(child_ids)
    .bind(block.has_children)
    .bind(position)
    .bind(&block.text)
    .bind(block.created_time)
    .bind(block.last_edited_time)
    .execute(pool)
    .await?;
    Ok(())
}

/// Insert-or-replace embedding vectors, one per block, reported per item.
#[instrument(skip_all)]
pub async fn upsert_embeddings(
    pool: &Pool,
    embeddings: &[EmbeddingRecord],
) -> Result<EmbeddingUpsertReport, StoreError> {
    let mut report = EmbeddingUpsertReport::default();
    for record in embeddings {
        let blob = encode_vector(&record.vector);
        let res = sqlx::query(
            "INSERT INTO block_embeddings (block_id, dimension, vector) VALUES (?, ?, ?) \
             ON CONFLICT(block_id) DO UPDATE SET \
                 dimension = excluded.dimension, \
                 vector = excluded.vector",
        )
        .bind(&record.block_id)
        .bind(record.vector.len() as i64)
        .bind(blob)
        .execute(pool)
        .await;
        match res {
            Ok(_) => report.written += 1,
            Err(err) => report.failed.push(ItemFailure {
                id: record.block_id.clone(),
                error: StoreError::from(err).to_string(),
            }),
        }
    }
    Ok(report)
}

pub async fn get_page(pool: &Pool, page_id: &str) -> Result<Option<PageRecord>, StoreError> {
    let row = sqlx::query(
        "SELECT id, title, properties, url, created_time, last_edited_time FROM pages WHERE id = ?",
    )
    .bind(page_id)
    .fetch_optional(pool)
    .await?;
    row.map(|row| page_from_row(&row)).transpose()
}

/// All blocks of a page in migration (depth-first) order.
pub async fn list_page_blocks(pool: &Pool, page_id: &str) -> Result<Vec<BlockRecord>, StoreError> {
    let rows = sqlx::query(
        "SELECT id, page_id, block_type, payload, child_ids, has_children, text, created_time, last_edited_time \
         FROM blocks WHERE page_id = ? ORDER BY position ASC",
    )
    .bind(page_id)
    .fetch_all(pool)
    .await?;
    rows.iter().map(block_from_row).collect()
}

/// Full-text query over block text, best match first.
#[instrument(skip_all)]
pub async fn query_text(
    pool: &Pool,
    query: &str,
    limit: usize,
) -> Result<Vec<BlockRecord>, StoreError> {
    let expr = fts_match_expr(query);
    if expr.is_empty() {
        return Ok(Vec::new());
    }
    let rows = sqlx::query(
        "SELECT b.id, b.page_id, b.block_type, b.payload, b.child_ids, b.has_children, b.text, b.created_time, b.last_edited_time \
         FROM blocks_fts JOIN blocks b ON b.id = blocks_fts.block_id \
         WHERE blocks_fts MATCH ? ORDER BY blocks_fts.rank LIMIT ?",
    )
    .bind(expr)
    .bind(limit as i64)
    .fetch_all(pool)
    .await?;
    rows.iter().map(block_from_row).collect()
}

/// Pages whose title contains the query, for the page half of search
/// results.
pub async fn query_pages(
    pool: &Pool,
    query: &str,
    limit: usize,
) -> Result<Vec<PageHit>, StoreError> {
    let pattern = format!(
        "%{}%",
        query.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
    );
    let rows = sqlx::query(
        "SELECT id, title, url FROM pages WHERE title LIKE ? ESCAPE '\\' ORDER BY title LIMIT ?",
    )
    .bind(pattern)
    .bind(limit as i64)
    .fetch_all(pool)
    .await?;
    Ok(rows
        .iter()
        .map(|row| PageHit {
            id: row.get("id"),
            title: row.get("title"),
            url: row.get("url"),
        })
        .collect())
}

/// Similarity query: cosine against every stored vector, keeping matches at
/// or above `threshold`, best first, at most `limit`. Vectors whose stored
/// dimension disagrees with the query vector are skipped rather than
/// failing the whole query.
#[instrument(skip_all)]
pub async fn query_embeddings(
    pool: &Pool,
    vector: &[f32],
    limit: usize,
    threshold: f64,
) -> Result<Vec<ScoredBlock>, StoreError> {
    let rows = sqlx::query(
        "SELECT e.dimension, e.vector, \
                b.id, b.page_id, b.block_type, b.payload, b.child_ids, b.has_children, b.text, b.created_time, b.last_edited_time \
         FROM block_embeddings e JOIN blocks b ON b.id = e.block_id",
    )
    .fetch_all(pool)
    .await?;

    let mut scored = Vec::new();
    for row in &rows {
        let dimension: i64 = row.get("dimension");
        let blob: Vec<u8> = row.get("vector");
        let stored = decode_vector(&blob, dimension as usize)?;
        let Some(similarity) = cosine_similarity(vector, &stored) else {
            continue;
        };
        if similarity >= threshold {
            scored.push(ScoredBlock {
                block: block_from_row(row)?,
                similarity,
            });
        }
    }
    scored.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    scored.truncate(limit);
    Ok(scored)
}

/// Remove a page and everything owned by it.
#[instrument(skip_all)]
pub async fn delete_page(pool: &Pool, page_id: &str) -> Result<(), StoreError> {
    sqlx::query(
        "DELETE FROM block_embeddings WHERE block_id IN (SELECT id FROM blocks WHERE page_id = ?)",
    )
    .bind(page_id)
    .execute(pool)
    .await?;
    sqlx::query("DELETE FROM blocks WHERE page_id = ?")
        .bind(page_id)
        .execute(pool)
        .await?;
    sqlx::query("DELETE FROM pages WHERE id = ?")
        .bind(page_id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn count_blocks(pool: &Pool, page_id: &str) -> Result<i64, StoreError> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM blocks WHERE page_id = ?")
        .bind(page_id)
        .fetch_one(pool)
        .await?;
    Ok(count)
}

pub async fn count_embeddings(pool: &Pool, page_id: &str) -> Result<i64, StoreError> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM block_embeddings e JOIN blocks b ON b.id = e.block_id WHERE b.page_id = ?",
    )
    .bind(page_id)
    .fetch_one(pool)
    .await?;
    Ok(count)
}

pub async fn list_tables(pool: &Pool) -> Result<Vec<String>, StoreError> {
    let names: Vec<String> = sqlx::query_scalar(
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
    )
    .fetch_all(pool)
    .await?;
    Ok(names)
}

pub async fn table_row_count(pool: &Pool, table: &str) -> Result<i64, StoreError> {
    // Callers pass fixed table names (health probe); still refuse anything
    // that is not a bare identifier.
    if !table.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(StoreError::Corrupt(format!("invalid table name '{table}'")));
    }
    let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
        .fetch_one(pool)
        .await?;
    Ok(count)
}

fn page_from_row(row: &SqliteRow) -> Result<PageRecord, StoreError> {
    let properties: String = row.get("properties");
    let properties = serde_json::from_str(&properties)
        .map_err(|err| StoreError::Corrupt(format!("page properties: {err}")))?;
    Ok(PageRecord {
        id: row.get("id"),
        title: row.get("title"),
        properties,
        created_time: row.get("created_time"),
        last_edited_time: row.get("last_edited_time"),
        url: row.get("url"),
    })
}

fn block_from_row(row: &SqliteRow) -> Result<BlockRecord, StoreError> {
    let payload: String = row.get("payload");
    let payload = serde_json::from_str(&payload)
        .map_err(|err| StoreError::Corrupt(format!("block payload: {err}")))?;
    let child_ids: String = row.get("child_ids");
    let child_ids = serde_json::from_str(&child_ids)
        .map_err(|err| StoreError::Corrupt(format!("block child ids: {err}")))?;
    Ok(BlockRecord {
        id: row.get("id"),
        page_id: row.get("page_id"),
        block_type: row.get("block_type"),
        payload,
        child_ids,
        has_children: row.get("has_children"),
        text: row.get("text"),
        created_time: row.get("created_time"),
        last_edited_time: row.get("last_edited_time"),
    })
}

/// Quote each whitespace-separated term so user input cannot break FTS5
/// query syntax.
fn fts_match_expr(query: &str) -> String {
    query
        .split_whitespace()
        .map(|term| format!("\"{}\"", term.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn encode_vector(vector: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(std::mem::size_of_val(vector));
    for &value in vector {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

pub fn decode_vector(blob: &[u8], dimension: usize) -> Result<Vec<f32>, StoreError> {
    let expected_len = dimension * std::mem::size_of::<f32>();
    if blob.len() != expected_len {
        return Err(StoreError::Corrupt(format!(
            "invalid embedding byte length: expected {expected_len}, got {}",
            blob.len()
        )));
    }
    let mut out = Vec::with_capacity(dimension);
    for chunk in blob.chunks_exact(4) {
        out.push(f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]));
    }
    Ok(out)
}

/// Cosine similarity in f64; `None` when lengths differ or either vector
/// has zero norm.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f64> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (&x, &y) in a.iter().zip(b.iter()) {
        let x64 = f64::from(x);
        let y64 = f64::from(y);
        dot += x64 * y64;
        norm_a += x64 * x64;
        norm_b += y64 * y64;
    }
    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom <= f64::EPSILON {
        return None;
    }
    Some(dot / denom)
}

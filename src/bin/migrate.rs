use anyhow::{bail, Result};
use clap::Parser;
use std::path::PathBuf;

use notevault::config;
use notevault::embeddings::HttpEmbeddingClient;
use notevault::migrate;
use notevault::notion::NotionClient;
use notevault::store;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Migrate pages from the content provider into the local store"
)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Page ids or page URLs to migrate
    #[arg(required = true)]
    pages: Vec<String>,

    /// Reporting batch size (defaults to migration.batch_size from config)
    #[arg(long)]
    batch_size: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let pool = store::init_pool(&cfg.database_url()).await?;
    store::run_migrations(&pool).await?;

    let source = NotionClient::from_config(&cfg)?;
    let embedder = HttpEmbeddingClient::from_config(&cfg)?;
    let batch_size = args.batch_size.unwrap_or(cfg.migration.batch_size);

    let run = migrate::migrate_pages(&pool, &source, &embedder, &args.pages, batch_size).await;

    for result in &run.results {
        if result.success {
            println!(
                "ok   {}  blocks={} embeddings={}{}",
                result.page_id,
                result.blocks_processed,
                result.embeddings_generated,
                result
                    .error
                    .as_deref()
                    .map(|note| format!("  ({note})"))
                    .unwrap_or_default()
            );
        } else {
            println!(
                "fail {}  {}",
                result.page_id,
                result.error.as_deref().unwrap_or("unknown error")
            );
        }
    }
    let summary = &run.summary;
    println!(
        "migrated {}/{} pages ({} failed), {} blocks, {} embeddings",
        summary.successful, summary.total, summary.failed, summary.total_blocks,
        summary.total_embeddings
    );

    if summary.total > 0 && summary.successful == 0 {
        bail!("all {} page migrations failed", summary.total);
    }
    Ok(())
}

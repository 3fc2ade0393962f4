use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::PathBuf;

use notevault::config;
use notevault::embeddings::HttpEmbeddingClient;
use notevault::render::{self, RenderFormat};
use notevault::search::{self, SearchOptions};
use notevault::store;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Search migrated content, or render one migrated page"
)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Search query (omit when using --page)
    query: Option<String>,

    /// Also run embedding-similarity search
    #[arg(long)]
    embeddings: bool,

    /// Maximum results per source
    #[arg(long)]
    limit: Option<usize>,

    /// Minimum cosine similarity for embedding matches
    #[arg(long)]
    threshold: Option<f64>,

    /// Render this stored page instead of searching
    #[arg(long)]
    page: Option<String>,

    /// Output format for --page: json, markdown, html or plain
    #[arg(long, default_value = "plain")]
    format: String,
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

    if let Some(page_id) = &args.page {
        let format: RenderFormat = args.format.parse()?;
        let page = store::get_page(&pool, page_id)
            .await?
            .with_context(|| format!("page {page_id} has not been migrated"))?;
        let blocks = store::list_page_blocks(&pool, page_id).await?;
        println!("{}", render::render_page(&page, &blocks, format)?);
        return Ok(());
    }

    let Some(query) = args.query.as_deref() else {
        bail!("a search query is required unless --page is given");
    };

    let embedder = HttpEmbeddingClient::from_config(&cfg)?;
    let opts = SearchOptions {
        use_embeddings: args.embeddings,
        limit: args.limit.unwrap_or(cfg.search.limit),
        threshold: args.threshold.unwrap_or(cfg.search.threshold),
    };
    let results = search::search(&pool, &embedder, query, &opts).await?;

    if !results.pages.is_empty() {
        println!("pages:");
        for hit in &results.pages {
            println!("  {}  {}", hit.id, hit.title);
        }
    }
    println!("text matches:");
    for block in &results.text {
        println!("  [{}] {}  {}", block.block_type, block.id, block.text);
    }
    if let Some(scored) = &results.embedding {
        println!("similarity matches:");
        for hit in scored {
            println!(
                "  {:.3}  [{}] {}  {}",
                hit.similarity, hit.block.block_type, hit.block.id, hit.block.text
            );
        }
    }
    Ok(())
}

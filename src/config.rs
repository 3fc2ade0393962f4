//! Configuration loader and validator for the Notion→SQLite migration service.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    pub app: App,
    pub notion: Notion,
    pub embeddings: Embeddings,
    #[serde(default)]
    pub migration: Migration,
    #[serde(default)]
    pub search: Search,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
}

/// Content provider settings. `base_url` is only overridden in tests.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Notion {
    pub token: String,
    pub version: String,
    #[serde(default)]
    pub base_url: Option<String>,
}

/// Embedding provider settings (OpenAI-compatible `/v1/embeddings`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Embeddings {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub dimension: usize,
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
}

/// Migration defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Migration {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for Migration {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
        }
    }
}

/// Search defaults; both bound their result list independently.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Search {
    #[serde(default = "default_search_limit")]
    pub limit: usize,
    #[serde(default = "default_search_threshold")]
    pub threshold: f64,
}

impl Default for Search {
    fn default() -> Self {
        Self {
            limit: default_search_limit(),
            threshold: default_search_threshold(),
        }
    }
}

fn default_max_batch_size() -> usize {
    32
}

fn default_batch_size() -> usize {
    10
}

fn default_search_limit() -> usize {
    10
}

fn default_search_threshold() -> f64 {
    0.7
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(&self.app.data_dir)
    }

    /// Database URL: `DATABASE_URL` env override, else a file in `data_dir`.
    pub fn database_url(&self) -> String {
        std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| format!("sqlite://{}/notevault.db", self.app.data_dir))
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }

    if cfg.notion.token.trim().is_empty() {
        return Err(ConfigError::Invalid("notion.token must be non-empty"));
    }
    if cfg.notion.version.trim().is_empty() {
        return Err(ConfigError::Invalid("notion.version must be non-empty"));
    }

    if cfg.embeddings.base_url.trim().is_empty() {
        return Err(ConfigError::Invalid("embeddings.base_url must be non-empty"));
    }
    if cfg.embeddings.api_key.trim().is_empty() {
        return Err(ConfigError::Invalid("embeddings.api_key must be non-empty"));
    }
    if cfg.embeddings.model.trim().is_empty() {
        return Err(ConfigError::Invalid("embeddings.model must be non-empty"));
    }
    if cfg.embeddings.dimension == 0 {
        return Err(ConfigError::Invalid("embeddings.dimension must be > 0"));
    }
    if cfg.embeddings.max_batch_size == 0 {
        return Err(ConfigError::Invalid("embeddings.max_batch_size must be > 0"));
    }

    if cfg.migration.batch_size == 0 {
        return Err(ConfigError::Invalid("migration.batch_size must be > 0"));
    }

    if cfg.search.limit == 0 {
        return Err(ConfigError::Invalid("search.limit must be > 0"));
    }
    if !(cfg.search.threshold > 0.0 && cfg.search.threshold <= 1.0) {
        return Err(ConfigError::Invalid("search.threshold must be in (0, 1]"));
    }

    Ok(())
}

/// Example configuration, used by tests and as a starting point for users.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"

notion:
  token: "YOUR_NOTION_INTEGRATION_TOKEN"
  version: "2022-06-28"

embeddings:
  base_url: "https://api.openai.com"
  api_key: "YOUR_EMBEDDINGS_API_KEY"
  model: "text-embedding-3-small"
  dimension: 1536
  max_batch_size: 32

migration:
  batch_size: 10

search:
  limit: 10
  threshold: 0.7
"#
}

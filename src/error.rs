//! Error taxonomy for the migration and search pipeline.
//!
//! Each layer exposes its own error enum so callers can tell terminal
//! conditions (not found, unauthorized, invalid input) apart from transient
//! ones (rate limits, timeouts). The crate never retries on its own;
//! `is_retryable` makes the distinction observable so callers can wrap their
//! own policy around the adapter boundary.

use thiserror::Error;

/// Errors from the content provider (fetching pages and block trees).
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("page not found: {0}")]
    NotFound(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("provider error {status}: {body}")]
    Api { status: u16, body: String },
    #[error("unexpected provider response: {0}")]
    Decode(String),
    #[error("invalid source configuration: {0}")]
    Config(String),
}

impl SourceError {
    pub fn is_retryable(&self) -> bool {
        match self {
            SourceError::RateLimited(_) => true,
            SourceError::Transport(err) => err.is_timeout() || err.is_connect(),
            _ => false,
        }
    }
}

/// Errors from the embedding provider.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("provider error {status}: {body}")]
    Api { status: u16, body: String },
    #[error("unexpected provider response: {0}")]
    Decode(String),
    #[error("invalid embeddings configuration: {0}")]
    Config(String),
}

impl EmbeddingError {
    pub fn is_retryable(&self) -> bool {
        match self {
            EmbeddingError::RateLimited(_) => true,
            EmbeddingError::Transport(err) => err.is_timeout() || err.is_connect(),
            _ => false,
        }
    }
}

/// Errors from the storage gateway.
///
/// Constraint violations are separated from connectivity problems so callers
/// can tell a bad write apart from an unreachable database. Upserts are
/// idempotent, so retrying after either kind is safe.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("constraint violation: {0}")]
    Constraint(String),
    #[error("database error: {0}")]
    Connectivity(sqlx::Error),
    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("corrupt stored data: {0}")]
    Corrupt(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db) = &err {
            use sqlx::error::ErrorKind;
            match db.kind() {
                ErrorKind::UniqueViolation
                | ErrorKind::ForeignKeyViolation
                | ErrorKind::NotNullViolation
                | ErrorKind::CheckViolation => {
                    return StoreError::Constraint(db.message().to_string());
                }
                _ => {}
            }
        }
        StoreError::Connectivity(err)
    }
}

/// Crate-level error for the surfaces that return `Result` (search, render,
/// health). Page migration reports failure structurally via
/// [`crate::model::MigrationResult`] instead of propagating these.
#[derive(Debug, Error)]
pub enum Error {
    #[error("validation error: {0}")]
    Validation(String),
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limits_are_retryable() {
        assert!(SourceError::RateLimited("429".into()).is_retryable());
        assert!(EmbeddingError::RateLimited("429".into()).is_retryable());
    }

    #[test]
    fn terminal_source_errors_are_not_retryable() {
        assert!(!SourceError::NotFound("p".into()).is_retryable());
        assert!(!SourceError::Unauthorized("401".into()).is_retryable());
        assert!(!SourceError::Forbidden("403".into()).is_retryable());
        assert!(!SourceError::Api {
            status: 500,
            body: "oops".into()
        }
        .is_retryable());
    }

    #[test]
    fn fatal_embedding_errors_are_not_retryable() {
        assert!(!EmbeddingError::InvalidInput("bad".into()).is_retryable());
        assert!(!EmbeddingError::Unauthorized("401".into()).is_retryable());
    }
}

//! Embedding generator: turns text into fixed-dimension vectors via an
//! OpenAI-compatible `/v1/embeddings` endpoint.
//!
//! Empty input is legal and embeds to a defined vector; the orchestrator's
//! policy of skipping empty-text blocks lives in [`crate::migrate`], not
//! here. The client never retries; transient failures are distinguishable
//! via [`EmbeddingError::is_retryable`].

use std::fmt;

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::Config;
use crate::error::EmbeddingError;

/// Trait seam for the orchestrator, search coordinator, and tests.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed one text into a vector of `dimension()` floats.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// Embed many texts; the output has the same order and count as the
    /// input.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    fn dimension(&self) -> usize;
}

#[derive(Clone)]
pub struct HttpEmbeddingClient {
    http: Client,
    base_url: Url,
    api_key: String,
    model: String,
    dimension: usize,
    max_batch_size: usize,
}

impl fmt::Debug for HttpEmbeddingClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpEmbeddingClient")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("dimension", &self.dimension)
            .finish_non_exhaustive()
    }
}

#[derive(Serialize)]
struct EmbeddingsRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingRow>,
}

#[derive(Deserialize)]
struct EmbeddingRow {
    index: usize,
    embedding: Vec<f32>,
}

impl HttpEmbeddingClient {
    pub fn new(
        base_url: Url,
        api_key: String,
        model: String,
        dimension: usize,
        max_batch_size: usize,
    ) -> Self {
        let http = Client::builder()
            .user_agent("notevault/0.1")
            .build()
            .expect("reqwest client");
        Self {
            http,
            base_url,
            api_key,
            model,
            dimension,
            max_batch_size: max_batch_size.max(1),
        }
    }

    pub fn from_config(cfg: &Config) -> Result<Self, EmbeddingError> {
        let base_url = Url::parse(&cfg.embeddings.base_url)
            .map_err(|err| EmbeddingError::Config(format!("embeddings.base_url: {err}")))?;
        Ok(Self::new(
            base_url,
            cfg.embeddings.api_key.clone(),
            cfg.embeddings.model.clone(),
            cfg.embeddings.dimension,
            cfg.embeddings.max_batch_size,
        ))
    }

    /// One provider round-trip for up to `max_batch_size` inputs. Rows come
    /// back indexed; they are re-ordered to the input order before return.
    async fn embed_chunk(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let url = self
            .base_url
            .join("v1/embeddings")
            .map_err(|err| EmbeddingError::Config(format!("invalid base URL: {err}")))?;
        debug!(count = texts.len(), "requesting embeddings");
        let res = self
            .http
            .post(url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&EmbeddingsRequest {
                model: &self.model,
                input: texts,
            })
            .send()
            .await?;

        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(match status {
                StatusCode::TOO_MANY_REQUESTS => EmbeddingError::RateLimited(body),
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                    EmbeddingError::Unauthorized(body)
                }
                StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
                    EmbeddingError::InvalidInput(body)
                }
                _ => EmbeddingError::Api {
                    status: status.as_u16(),
                    body,
                },
            });
        }

        let payload: EmbeddingsResponse = res
            .json()
            .await
            .map_err(|err| EmbeddingError::Decode(err.to_string()))?;
        if payload.data.len() != texts.len() {
            return Err(EmbeddingError::Decode(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                payload.data.len()
            )));
        }

        let mut rows = payload.data;
        rows.sort_by_key(|row| row.index);
        let mut vectors = Vec::with_capacity(rows.len());
        for row in rows {
            if row.embedding.len() != self.dimension {
                return Err(EmbeddingError::Decode(format!(
                    "embedding dimension {} does not match configured {}",
                    row.embedding.len(),
                    self.dimension
                )));
            }
            vectors.push(row.embedding);
        }
        Ok(vectors)
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut vectors = self.embed_chunk(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| EmbeddingError::Decode("empty embeddings response".into()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(self.max_batch_size) {
            vectors.extend(self.embed_chunk(chunk).await?);
        }
        Ok(vectors)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

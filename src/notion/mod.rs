//! Content source adapter: fetches a page's metadata and block tree from a
//! Notion-compatible API. All network I/O for the source lives here; the
//! normalizer downstream is pure.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use futures::future::BoxFuture;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::{Client, StatusCode, Url};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::config::Config;
use crate::error::{Error, SourceError};
use crate::model::{PageRecord, PropertyValue};
use crate::notion::model::{BlockResp, ListResp, PageResp, RawBlock};

pub mod model;

const NOTION_API_BASE: &str = "https://api.notion.com/";
const PAGE_SIZE: &str = "100";

/// Trait seam for the orchestrator and tests; [`NotionClient`] is the real
/// implementation.
#[async_trait]
pub trait ContentSource: Send + Sync {
    async fn fetch_page(&self, page_id: &str) -> Result<PageRecord, SourceError>;

    async fn fetch_block_tree(&self, page_id: &str) -> Result<Vec<RawBlock>, SourceError>;
}

#[derive(Clone)]
pub struct NotionClient {
    http: Client,
    base_url: Url,
    token: String,
    version: String,
}

impl fmt::Debug for NotionClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotionClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl NotionClient {
    pub fn new(token: String, version: String) -> Self {
        let base_url = Url::parse(NOTION_API_BASE).expect("valid default Notion URL");
        Self::with_base_url(token, version, base_url)
    }

    pub fn with_base_url(token: String, version: String, base_url: Url) -> Self {
        let http = Client::builder()
            .user_agent("notevault/0.1")
            .build()
            .expect("reqwest client");
        Self {
            http,
            base_url,
            token,
            version,
        }
    }

    pub fn from_config(cfg: &Config) -> Result<Self, SourceError> {
        match cfg.notion.base_url.as_deref() {
            Some(base) => {
                let url = Url::parse(base)
                    .map_err(|err| SourceError::Config(format!("notion.base_url: {err}")))?;
                Ok(Self::with_base_url(
                    cfg.notion.token.clone(),
                    cfg.notion.version.clone(),
                    url,
                ))
            }
            None => Ok(Self::new(
                cfg.notion.token.clone(),
                cfg.notion.version.clone(),
            )),
        }
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
        subject: &str,
    ) -> Result<T, SourceError> {
        let url = self
            .base_url
            .join(path)
            .map_err(|err| SourceError::Config(format!("invalid URL path {path}: {err}")))?;
        debug!(%url, "fetching from content provider");
        let res = self
            .http
            .get(url)
            .query(query)
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Notion-Version", &self.version)
            .send()
            .await?;

        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(match status {
                StatusCode::NOT_FOUND => SourceError::NotFound(subject.to_string()),
                StatusCode::UNAUTHORIZED => SourceError::Unauthorized(body),
                StatusCode::FORBIDDEN => SourceError::Forbidden(body),
                StatusCode::TOO_MANY_REQUESTS => SourceError::RateLimited(body),
                _ => SourceError::Api {
                    status: status.as_u16(),
                    body,
                },
            });
        }

        res.json::<T>()
            .await
            .map_err(|err| SourceError::Decode(err.to_string()))
    }

    /// One page of children for a block or page id.
    async fn fetch_children_page(
        &self,
        block_id: &str,
        cursor: Option<&str>,
    ) -> Result<ListResp<BlockResp>, SourceError> {
        let path = format!("v1/blocks/{block_id}/children");
        let mut query: Vec<(&str, &str)> = vec![("page_size", PAGE_SIZE)];
        if let Some(cursor) = cursor {
            query.push(("start_cursor", cursor));
        }
        self.get_json(&path, &query, block_id).await
    }

    /// All direct children of a block, following `next_cursor` until the
    /// provider reports no further pages.
    async fn fetch_children(&self, block_id: &str) -> Result<Vec<BlockResp>, SourceError> {
        let mut blocks = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let page = self.fetch_children_page(block_id, cursor.as_deref()).await?;
            blocks.extend(page.results);
            if !page.has_more {
                break;
            }
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        Ok(blocks)
    }

    fn expand<'a>(&'a self, block_id: &'a str) -> BoxFuture<'a, Result<Vec<RawBlock>, SourceError>> {
        Box::pin(async move {
            let mut out = Vec::new();
            for block in self.fetch_children(block_id).await? {
                let children = if block.has_children {
                    self.expand(&block.id).await?
                } else {
                    Vec::new()
                };
                out.push(RawBlock { block, children });
            }
            Ok(out)
        })
    }
}

#[async_trait]
impl ContentSource for NotionClient {
    async fn fetch_page(&self, page_id: &str) -> Result<PageRecord, SourceError> {
        let resp: PageResp = self
            .get_json(&format!("v1/pages/{page_id}"), &[], page_id)
            .await?;
        Ok(page_record_from_resp(resp))
    }

    async fn fetch_block_tree(&self, page_id: &str) -> Result<Vec<RawBlock>, SourceError> {
        self.expand(page_id).await
    }
}

/// Map a wire page response into the domain record, classifying properties
/// and extracting the title from the first `title` property.
pub fn page_record_from_resp(resp: PageResp) -> PageRecord {
    let properties: BTreeMap<String, PropertyValue> = resp
        .properties
        .iter()
        .map(|(name, raw)| (name.clone(), PropertyValue::from_wire(raw)))
        .collect();
    let title = properties
        .values()
        .find_map(|value| match value {
            PropertyValue::Title { text } => Some(text.clone()),
            _ => None,
        })
        .unwrap_or_default();
    PageRecord {
        id: resp.id,
        title,
        properties,
        created_time: resp.created_time,
        last_edited_time: resp.last_edited_time,
        url: resp.url,
    }
}

static PAGE_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([0-9a-fA-F]{32})\s*$").expect("valid page id regex"));
static DASHED_ID_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$")
        .expect("valid dashed id regex")
});

/// Normalize user-supplied page identifiers: dashed UUIDs are lowercased,
/// 32-hex compact ids (optionally at the end of a notion.so URL) are
/// re-dashed, anything else non-empty passes through for the provider to
/// judge. An empty id is a validation error raised before any I/O.
pub fn normalize_page_id(input: &str) -> Result<String, Error> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(Error::Validation("page id must be non-empty".into()));
    }
    if DASHED_ID_RE.is_match(trimmed) {
        return Ok(trimmed.to_lowercase());
    }
    let compact = trimmed.split('?').next().unwrap_or(trimmed);
    if let Some(caps) = PAGE_ID_RE.captures(compact) {
        let hex = caps[1].to_lowercase();
        return Ok(format!(
            "{}-{}-{}-{}-{}",
            &hex[0..8],
            &hex[8..12],
            &hex[12..16],
            &hex[16..20],
            &hex[20..32]
        ));
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn normalize_accepts_dashed_uuid() {
        let id = "0a1b2c3d-0000-1111-2222-333344445555";
        assert_eq!(normalize_page_id(id).unwrap(), id);
    }

    #[test]
    fn normalize_redashes_compact_id() {
        let id = normalize_page_id("0a1b2c3d000011112222333344445555").unwrap();
        assert_eq!(id, "0a1b2c3d-0000-1111-2222-333344445555");
    }

    #[test]
    fn normalize_extracts_id_from_url() {
        let id =
            normalize_page_id("https://www.notion.so/acme/My-Page-0a1b2c3d000011112222333344445555")
                .unwrap();
        assert_eq!(id, "0a1b2c3d-0000-1111-2222-333344445555");
    }

    #[test]
    fn normalize_rejects_empty_input() {
        assert!(matches!(
            normalize_page_id("   "),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn normalize_passes_through_other_ids() {
        assert_eq!(normalize_page_id(" page-1 ").unwrap(), "page-1");
    }

    #[test]
    fn page_record_extracts_title_from_properties() {
        let resp: PageResp = serde_json::from_value(json!({
            "id": "p1",
            "created_time": "2024-01-01T00:00:00Z",
            "last_edited_time": "2024-01-02T00:00:00Z",
            "url": "https://www.notion.so/p1",
            "properties": {
                "Name": {"type": "title", "title": [{"plain_text": "My Page"}]},
                "Status": {"type": "select", "select": {"name": "Done"}}
            }
        }))
        .unwrap();
        let record = page_record_from_resp(resp);
        assert_eq!(record.title, "My Page");
        assert_eq!(
            record.properties.get("Status"),
            Some(&PropertyValue::Select {
                option: Some("Done".into())
            })
        );
    }
}

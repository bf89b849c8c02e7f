use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

use super::{Searcher, SCRAPE_MAX_CHARS};
use crate::error::ToolError;
use crate::model::{Freshness, SearchHit, ToolResult};
use crate::scraping::truncate_chars;

/// Serper.dev backend for web search and page scraping
pub struct SerperSearcher {
    search_url: String,
    scrape_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl SerperSearcher {
    /// `api_key` may be absent; every call then reports the tool as unavailable
    pub fn new(
        search_url: impl Into<String>,
        scrape_url: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            search_url: search_url.into(),
            scrape_url: scrape_url.into(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            client,
        })
    }

    async fn post(&self, endpoint: &str, body: serde_json::Value) -> Result<String, ToolError> {
        let key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ToolError::Unavailable("no search API key configured".to_string()))?;

        let response = self
            .client
            .post(endpoint)
            .header("X-API-KEY", key)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| ToolError::Unavailable(e.to_string()))?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(ToolError::RateLimited);
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ToolError::Unavailable(format!("HTTP {}: {}", status, text)));
        }
        response.text().await.map_err(|e| ToolError::Unavailable(e.to_string()))
    }
}

fn tbs(freshness: Freshness) -> &'static str {
    match freshness {
        Freshness::Day => "qdr:d",
        Freshness::Week => "qdr:w",
        Freshness::Month => "qdr:m",
    }
}

#[async_trait::async_trait]
impl Searcher for SerperSearcher {
    async fn search(
        &self,
        query: &str,
        max_results: usize,
        freshness: Option<Freshness>,
    ) -> Result<ToolResult, ToolError> {
        let mut body = json!({ "q": query, "num": max_results });
        if let Some(f) = freshness {
            body["tbs"] = json!(tbs(f));
        }

        let text = self.post(&self.search_url, body).await?;
        let parsed: SerperSearchResponse = serde_json::from_str(&text)
            .map_err(|e| ToolError::Unavailable(format!("unexpected search response: {}", e)))?;

        let entries = if parsed.organic.is_empty() { parsed.news } else { parsed.organic };
        let hits: Vec<SearchHit> = entries
            .into_iter()
            .filter_map(|e| {
                let url = e.link?;
                Some(SearchHit {
                    title: e.title.unwrap_or_default(),
                    url,
                    snippet: e.snippet.unwrap_or_default(),
                })
            })
            .take(max_results)
            .collect();

        debug!(query, hits = hits.len(), "serper search done");
        Ok(ToolResult { hits })
    }

    async fn scrape(&self, url: &str) -> Result<ToolResult, ToolError> {
        let text = self.post(&self.scrape_url, json!({ "url": url })).await?;
        let parsed: SerperScrapeResponse = serde_json::from_str(&text)
            .map_err(|e| ToolError::Unavailable(format!("unexpected scrape response: {}", e)))?;

        let content = parsed
            .markdown
            .filter(|s| !s.trim().is_empty())
            .or(parsed.text.filter(|s| !s.trim().is_empty()))
            .ok_or_else(|| {
                let reason = parsed.message.unwrap_or_else(|| "no content returned".to_string());
                ToolError::Unavailable(format!("scrape of {} failed: {}", url, reason))
            })?;

        let title = parsed
            .metadata
            .and_then(|m| m.title)
            .unwrap_or_else(|| url.to_string());

        Ok(ToolResult {
            hits: vec![SearchHit {
                title,
                url: url.to_string(),
                snippet: truncate_chars(&content, SCRAPE_MAX_CHARS),
            }],
        })
    }
}

#[derive(Debug, Deserialize)]
struct SerperSearchResponse {
    #[serde(default)]
    organic: Vec<SerperEntry>,
    #[serde(default)]
    news: Vec<SerperEntry>,
}

#[derive(Debug, Deserialize)]
struct SerperEntry {
    title: Option<String>,
    link: Option<String>,
    snippet: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SerperScrapeResponse {
    #[serde(default)]
    markdown: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    metadata: Option<SerperMetadata>,
}

#[derive(Debug, Deserialize)]
struct SerperMetadata {
    #[serde(default)]
    title: Option<String>,
}

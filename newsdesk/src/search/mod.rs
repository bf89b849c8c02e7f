//! Web search exposed to the agent as a bounded tool.
//!
//! [`Searcher`] is the upstream capability; [`SearchTool`] wraps one for a
//! single agent session and enforces the per-session call budget, result
//! bounds and normalization.

use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::ToolError;
use crate::llm::{ToolInvocation, ToolSpec};
use crate::model::{Freshness, SearchHit, ToolCall, ToolResult};

pub mod serper;

/// Hard ceiling on hits per call, whatever the model asks for
pub const MAX_RESULTS: usize = 20;
pub const DEFAULT_RESULTS: usize = 5;
/// Scraped page text handed back to the model is cut to this many characters
pub const SCRAPE_MAX_CHARS: usize = 8000;

pub const SEARCH_TOOL: &str = "search_web";
pub const SCRAPE_TOOL: &str = "scrape_webpage";

#[async_trait::async_trait]
pub trait Searcher: Send + Sync {
    async fn search(
        &self,
        query: &str,
        max_results: usize,
        freshness: Option<Freshness>,
    ) -> Result<ToolResult, ToolError>;

    /// Full text of one page as a single-hit result
    async fn scrape(&self, url: &str) -> Result<ToolResult, ToolError>;
}

/// Per-session search tool with a call budget
pub struct SearchTool {
    searcher: Arc<dyn Searcher>,
    budget: usize,
    used: usize,
    default_results: usize,
}

impl SearchTool {
    pub fn new(searcher: Arc<dyn Searcher>, budget: usize) -> Self {
        Self {
            searcher,
            budget,
            used: 0,
            default_results: DEFAULT_RESULTS,
        }
    }

    pub fn with_default_results(mut self, n: usize) -> Self {
        self.default_results = n.clamp(1, MAX_RESULTS);
        self
    }

    pub fn calls_made(&self) -> usize {
        self.used
    }

    pub fn remaining(&self) -> usize {
        self.budget.saturating_sub(self.used)
    }

    /// Decode a model function call into a [`ToolCall`]
    pub fn parse_invocation(&self, invocation: &ToolInvocation) -> Result<ToolCall, ToolError> {
        let args = if invocation.arguments.trim().is_empty() { "{}" } else { invocation.arguments.as_str() };
        match invocation.name.as_str() {
            SEARCH_TOOL => {
                let parsed: SearchArgs = serde_json::from_str(args)
                    .map_err(|e| ToolError::InvalidArguments(format!("{}: {}", SEARCH_TOOL, e)))?;
                if parsed.query.trim().is_empty() {
                    return Err(ToolError::InvalidArguments("query must not be empty".to_string()));
                }
                Ok(ToolCall::Search {
                    query: parsed.query,
                    max_results: parsed.num_results.unwrap_or(self.default_results),
                    freshness: parsed.freshness,
                })
            }
            SCRAPE_TOOL => {
                let parsed: ScrapeArgs = serde_json::from_str(args)
                    .map_err(|e| ToolError::InvalidArguments(format!("{}: {}", SCRAPE_TOOL, e)))?;
                if url::Url::parse(parsed.url.trim()).is_err() {
                    return Err(ToolError::InvalidArguments(format!("not a URL: {}", parsed.url)));
                }
                Ok(ToolCall::Scrape { url: parsed.url.trim().to_string() })
            }
            other => Err(ToolError::InvalidArguments(format!("unknown tool: {}", other))),
        }
    }

    /// Run one call against the upstream, consuming one unit of budget.
    /// Once the budget is spent, calls are rejected without reaching the upstream.
    pub async fn call(&mut self, call: &ToolCall) -> Result<ToolResult, ToolError> {
        if self.used >= self.budget {
            warn!(budget = self.budget, "tool budget exhausted, rejecting call");
            return Err(ToolError::BudgetExceeded { budget: self.budget });
        }
        self.used += 1;

        let result = match call {
            ToolCall::Search { query, max_results, freshness } => {
                let n = (*max_results).clamp(1, MAX_RESULTS);
                info!("[search_web] Searching '{}' (top {})", query, n);
                self.searcher.search(query, n, *freshness).await.map(|r| normalize(r, n))
            }
            ToolCall::Scrape { url } => {
                info!("[scrape_webpage] Fetching {}", url);
                self.searcher.scrape(url).await.map(|r| normalize(r, 1))
            }
        };

        match &result {
            Ok(r) => info!(call = self.used, hits = r.hits.len(), "tool call completed"),
            Err(e) => warn!(call = self.used, "tool call failed: {}", e),
        }
        result
    }
}

/// Drop hits without a URL, fill blanks, and cut to `max_results`
pub fn normalize(result: ToolResult, max_results: usize) -> ToolResult {
    let hits = result
        .hits
        .into_iter()
        .filter(|h| !h.url.trim().is_empty())
        .map(|h| SearchHit {
            title: if h.title.trim().is_empty() { "Untitled".to_string() } else { h.title.trim().to_string() },
            url: h.url.trim().to_string(),
            snippet: h.snippet,
        })
        .take(max_results)
        .collect();
    ToolResult { hits }
}

/// Function schemas offered to the model
pub fn tool_specs() -> Vec<ToolSpec> {
    vec![
        ToolSpec {
            name: SEARCH_TOOL.to_string(),
            description: "Search the web (Google) and return a list of results with title, url and snippet.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "query": { "type": "string", "description": "Search query" },
                    "num_results": {
                        "type": "integer",
                        "minimum": 1,
                        "maximum": MAX_RESULTS,
                        "description": "Number of results (default 5)"
                    },
                    "freshness": {
                        "type": "string",
                        "enum": ["day", "week", "month"],
                        "description": "Only return results from the past day, week or month"
                    }
                },
                "required": ["query"]
            }),
        },
        ToolSpec {
            name: SCRAPE_TOOL.to_string(),
            description: "Return the text content of a web page.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "url": { "type": "string", "description": "Absolute URL of the page" }
                },
                "required": ["url"]
            }),
        },
    ]
}

#[derive(Debug, Deserialize)]
struct SearchArgs {
    query: String,
    #[serde(default)]
    num_results: Option<usize>,
    #[serde(default)]
    freshness: Option<Freshness>,
}

#[derive(Debug, Deserialize)]
struct ScrapeArgs {
    url: String,
}

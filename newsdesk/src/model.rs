use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Rss,
    PageScrape,
}

/// A configured source. Built once from configuration, never modified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSpec {
    pub url: String,
    pub kind: SourceKind,
    pub lookback: Duration,
}

impl SourceSpec {
    /// RSS feeds first, then scraped pages, each in declaration order
    pub fn from_config(config: &common::Config) -> Vec<SourceSpec> {
        let lookback = Duration::hours(config.sources.rss_hours);
        let rss = config.sources.rss_feeds.iter().map(|url| SourceSpec {
            url: url.clone(),
            kind: SourceKind::Rss,
            lookback,
        });
        let pages = config.sources.other_sources.iter().map(|url| SourceSpec {
            url: url.clone(),
            kind: SourceKind::PageScrape,
            lookback,
        });
        rss.chain(pages).collect()
    }
}

/// One fetched unit of source material
#[derive(Debug, Clone)]
pub struct CandidateItem {
    pub title: String,
    pub url: String,
    /// Deduplication key, see [`canonical_url`]
    pub canonical_url: String,
    pub published: Option<DateTime<Utc>>,
    pub text: String,
    /// Feed title or page host
    pub source_name: String,
    pub origin: Arc<SourceSpec>,
}

impl CandidateItem {
    /// RSS entry that carried no usable timestamp
    pub fn is_undated(&self) -> bool {
        self.origin.kind == SourceKind::Rss && self.published.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Freshness {
    Day,
    Week,
    Month,
}

/// What the agent asked the search tool to do
#[derive(Debug, Clone, PartialEq)]
pub enum ToolCall {
    Search {
        query: String,
        max_results: usize,
        freshness: Option<Freshness>,
    },
    Scrape {
        url: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

/// Normalized, bounded response to one tool call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub hits: Vec<SearchHit>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    pub url: String,
    #[serde(default)]
    pub source: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DraftItem {
    pub text: String,
    #[serde(default)]
    pub highlight: bool,
    #[serde(default)]
    pub citations: Vec<Citation>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DraftSection {
    pub heading: String,
    pub items: Vec<DraftItem>,
}

/// The agent's final structured output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewsletterDraft {
    pub title: String,
    pub sections: Vec<DraftSection>,
}

impl NewsletterDraft {
    /// Structural checks beyond what serde enforces
    pub fn validate(&self) -> Result<(), String> {
        if self.title.trim().is_empty() {
            return Err("title is empty".to_string());
        }
        if self.sections.is_empty() {
            return Err("no sections".to_string());
        }
        for (i, section) in self.sections.iter().enumerate() {
            if section.heading.trim().is_empty() {
                return Err(format!("section {} has an empty heading", i + 1));
            }
            if section.items.is_empty() {
                return Err(format!("section '{}' has no items", section.heading));
            }
            if section.items.iter().any(|item| item.text.trim().is_empty()) {
                return Err(format!("section '{}' has an item with empty text", section.heading));
            }
        }
        Ok(())
    }
}

/// A citation the renderer had to drop
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnresolvedCitation {
    pub section: String,
    pub url: String,
}

/// Rendered, persisted newsletter
#[derive(Debug, Clone)]
pub struct NewsletterArtifact {
    pub date: NaiveDate,
    pub model: String,
    pub html: String,
    pub path: PathBuf,
    pub unresolved: Vec<UnresolvedCitation>,
}

/// Normalized form of a URL used as the deduplication key:
/// scheme, host, port and path; query and fragment dropped.
pub fn canonical_url(raw: &str) -> String {
    let trimmed = raw.trim();
    let Ok(parsed) = Url::parse(trimmed) else {
        return trimmed.to_string();
    };
    let Some(host) = parsed.host_str() else {
        return trimmed.to_string();
    };

    let mut canonical = format!("{}://{}", parsed.scheme(), host.to_lowercase());
    if let Some(port) = parsed.port() {
        canonical.push_str(&format!(":{}", port));
    }
    let path = parsed.path();
    if path.len() > 1 {
        canonical.push_str(path.trim_end_matches('/'));
    } else {
        canonical.push('/');
    }
    canonical
}

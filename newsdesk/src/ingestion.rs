use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use feed_rs::model::{Entry, Feed};
use feed_rs::parser;
use reqwest::Client;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::error::{CollectError, SourceError};
use crate::model::{canonical_url, CandidateItem, SourceKind, SourceSpec};
use crate::scraping::{self, collapse_whitespace, truncate_chars};

/// Fetches a feed with the given client and parses it.
/// Server errors, rate limiting and network errors are retried with backoff;
/// other client errors are treated as permanent.
pub async fn fetch_and_parse_feed(client: &Client, url: &str) -> Result<Feed> {
    let max_retries = 3;
    let mut last_error = None;

    for attempt in 1..=max_retries {
        if attempt > 1 {
            let backoff = Duration::from_secs(2u64.pow(attempt - 2)); // 1s, 2s
            info!("Retrying feed fetch for {} (attempt {}/{}) after {:?}...", url, attempt, max_retries, backoff);
            tokio::time::sleep(backoff).await;
        }

        match client.get(url).send().await {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    let bytes = response.bytes().await.context("failed to read response body")?;
                    let feed = parser::parse(bytes.as_ref()).context("failed to parse feed")?;
                    return Ok(feed);
                } else if status.is_server_error() {
                    last_error = Some(anyhow::anyhow!("server error: {}", status));
                    continue;
                } else if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                    last_error = Some(anyhow::anyhow!("rate limited: {}", status));
                    continue;
                } else {
                    return Err(anyhow::anyhow!("feed fetch failed with status: {}", status));
                }
            }
            Err(e) => {
                last_error = Some(anyhow::Error::new(e).context("network error during fetch"));
            }
        }
    }

    Err(last_error.unwrap_or_else(|| anyhow::anyhow!("unknown error after retries")))
}

/// Limits applied while turning raw sources into candidate items
#[derive(Debug, Clone)]
pub struct CollectorSettings {
    pub max_per_feed: usize,
    pub max_item_chars: usize,
    pub page_max_chars: usize,
    pub concurrency: usize,
    pub timeout: Duration,
    pub user_agent: String,
}

impl CollectorSettings {
    pub fn from_config(config: &common::Config) -> Self {
        Self {
            max_per_feed: config.sources.max_per_feed.unwrap_or(30),
            max_item_chars: config.sources.max_item_chars.unwrap_or(4000),
            page_max_chars: config.sources.other_source_max_chars.unwrap_or(20_000),
            concurrency: config.fetch_concurrency(),
            timeout: config.fetch_timeout(),
            user_agent: config.user_agent(),
        }
    }
}

/// What a collection run produced
#[derive(Debug)]
pub struct Collection {
    pub items: Vec<CandidateItem>,
    pub failures: Vec<SourceError>,
}

/// Fetches every configured source and merges the results into one
/// deduplicated, time-filtered item list.
pub struct SourceCollector {
    client: Client,
    settings: CollectorSettings,
}

impl SourceCollector {
    pub fn new(settings: CollectorSettings) -> Result<Self> {
        let client = Client::builder()
            .timeout(settings.timeout)
            .user_agent(settings.user_agent.clone())
            .build()
            .context("failed to build reqwest client")?;
        Ok(Self { client, settings })
    }

    /// Collect from all sources. Per-source failures are logged and skipped;
    /// if nothing could be fetched at all the run is aborted.
    pub async fn collect(
        &self,
        specs: &[SourceSpec],
        now: DateTime<Utc>,
    ) -> Result<Collection, CollectError> {
        let semaphore = Arc::new(Semaphore::new(self.settings.concurrency.max(1)));
        let mut set = JoinSet::new();

        for (idx, spec) in specs.iter().enumerate() {
            let spec = Arc::new(spec.clone());
            let client = self.client.clone();
            let settings = self.settings.clone();
            let sem = semaphore.clone();
            set.spawn(async move {
                let Ok(_permit) = sem.acquire().await else {
                    return (idx, Err(SourceError::FetchFailed {
                        url: spec.url.clone(),
                        reason: "fetch pool closed".to_string(),
                    }));
                };
                let result = fetch_source(&client, &settings, spec, now).await;
                (idx, result)
            });
        }

        // Slot results by declaration index so completion order never leaks into the output
        let mut slots: Vec<Option<Result<Vec<CandidateItem>, SourceError>>> =
            (0..specs.len()).map(|_| None).collect();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((idx, result)) => slots[idx] = Some(result),
                Err(e) => warn!("collector: fetch task failed to complete: {}", e),
            }
        }

        let mut per_source = Vec::with_capacity(specs.len());
        let mut failures = Vec::new();
        for (spec, slot) in specs.iter().zip(slots) {
            match slot {
                Some(Ok(items)) => per_source.push(items),
                Some(Err(e)) => {
                    warn!(url = %spec.url, "SourceFetchFailed: {}", e);
                    failures.push(e);
                }
                None => {
                    let e = SourceError::FetchFailed {
                        url: spec.url.clone(),
                        reason: "fetch task aborted".to_string(),
                    };
                    warn!(url = %spec.url, "SourceFetchFailed: {}", e);
                    failures.push(e);
                }
            }
        }

        if per_source.is_empty() {
            return Err(CollectError::AllSourcesFailed { attempted: specs.len() });
        }

        let items = dedup_in_order(per_source);
        info!(
            "collector: {} items from {}/{} sources",
            items.len(),
            specs.len() - failures.len(),
            specs.len()
        );
        Ok(Collection { items, failures })
    }
}

async fn fetch_source(
    client: &Client,
    settings: &CollectorSettings,
    spec: Arc<SourceSpec>,
    now: DateTime<Utc>,
) -> Result<Vec<CandidateItem>, SourceError> {
    let failed = |reason: String| SourceError::FetchFailed { url: spec.url.clone(), reason };
    match spec.kind {
        SourceKind::Rss => {
            info!("[RSS] Fetching {}...", spec.url);
            let feed = fetch_and_parse_feed(client, &spec.url)
                .await
                .map_err(|e| failed(format!("{:#}", e)))?;
            let items = feed_to_items(feed, spec.clone(), settings, now);
            info!("[RSS] Found {} recent posts from {}", items.len(), spec.url);
            Ok(items)
        }
        SourceKind::PageScrape => {
            info!("[OTHER] Scraping {}", spec.url);
            let page = scraping::scrape_page(client, &spec.url)
                .await
                .map_err(|e| failed(format!("{:#}", e)))?;
            if page.text.trim().is_empty() {
                return Err(failed("no extractable content".to_string()));
            }
            let title = page.title.unwrap_or_else(|| spec.url.clone());
            Ok(vec![CandidateItem {
                title,
                url: spec.url.clone(),
                canonical_url: canonical_url(&spec.url),
                published: None,
                text: truncate_chars(&page.text, settings.page_max_chars),
                source_name: host_of(&spec.url),
                origin: spec,
            }])
        }
    }
}

/// Keep entries inside `[now - lookback, now]`; undated entries are kept.
pub fn feed_to_items(
    feed: Feed,
    spec: Arc<SourceSpec>,
    settings: &CollectorSettings,
    now: DateTime<Utc>,
) -> Vec<CandidateItem> {
    let cutoff = now - spec.lookback;
    let source_name = feed
        .title
        .as_ref()
        .map(|t| collapse_whitespace(&t.content))
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| host_of(&spec.url));

    feed.entries
        .into_iter()
        .filter_map(|entry| entry_to_item(entry, &spec, &source_name, settings))
        .filter(|item| match item.published {
            Some(ts) => ts >= cutoff && ts <= now,
            None => true,
        })
        .take(settings.max_per_feed)
        .collect()
}

fn entry_to_item(
    entry: Entry,
    spec: &Arc<SourceSpec>,
    source_name: &str,
    settings: &CollectorSettings,
) -> Option<CandidateItem> {
    let title = entry
        .title
        .as_ref()
        .map(|t| collapse_whitespace(&t.content))
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| "Untitled".to_string());

    let Some(url) = entry.links.first().map(|l| l.href.trim().to_string()).filter(|u| !u.is_empty()) else {
        debug!("Skipping entry without URL: {:?}", title);
        return None;
    };

    let raw = entry
        .content
        .as_ref()
        .and_then(|c| c.body.clone())
        .filter(|b| !b.trim().is_empty())
        .or_else(|| entry.summary.as_ref().map(|s| s.content.clone()))
        .unwrap_or_default();
    let text = collapse_whitespace(&scraping::html_to_text(&raw));

    Some(CandidateItem {
        title,
        canonical_url: canonical_url(&url),
        url,
        published: entry.published.or(entry.updated),
        text: truncate_chars(&text, settings.max_item_chars),
        source_name: source_name.to_string(),
        origin: spec.clone(),
    })
}

/// First occurrence wins, walking sources in declaration order.
pub fn dedup_in_order(per_source: Vec<Vec<CandidateItem>>) -> Vec<CandidateItem> {
    let mut seen = HashSet::new();
    let mut unique = Vec::new();
    let mut removed = 0usize;
    for item in per_source.into_iter().flatten() {
        if seen.insert(item.canonical_url.clone()) {
            unique.push(item);
        } else {
            debug!("Removing duplicate entry: {} ({})", item.title, item.url);
            removed += 1;
        }
    }
    if removed > 0 {
        info!("Removed {} duplicate entries", removed);
    }
    unique
}

fn host_of(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_string()))
        .unwrap_or_else(|| url.to_string())
}

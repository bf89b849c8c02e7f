/*!
common/src/lib.rs

Shared configuration types for newsdesk.

This file provides:
- Config data structures (deserialized from TOML)
- An async loader that merges a default file with an optional override
- Small accessors that resolve optional settings to their defaults
*/

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_LLM_API_URL: &str = "https://openrouter.ai/api/v1/chat/completions";
pub const DEFAULT_SEARCH_API_URL: &str = "https://google.serper.dev/search";
pub const DEFAULT_SCRAPE_API_URL: &str = "https://scrape.serper.dev";
pub const DEFAULT_MAIL_API_URL: &str = "https://api.sendgrid.com/v3/mail/send";

/// Recipient list: a single address or a list of addresses
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Recipients {
    One(String),
    Many(Vec<String>),
}

impl Recipients {
    /// Non-empty, trimmed addresses in declaration order
    pub fn addresses(&self) -> Vec<String> {
        let raw: Vec<&String> = match self {
            Recipients::One(addr) => vec![addr],
            Recipients::Many(list) => list.iter().collect(),
        };
        raw.into_iter()
            .map(|a| a.trim().to_string())
            .filter(|a| !a.is_empty())
            .collect()
    }
}

impl Default for Recipients {
    fn default() -> Self {
        Recipients::Many(Vec::new())
    }
}

/// Newsletter identity and addressing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewsletterConfig {
    pub name: String,
    #[serde(default)]
    pub recipient_email: Recipients,
    pub from_email: Option<String>,
    /// Optional; replies go to `from_email` when unset
    pub reply_to_email: Option<String>,
}

/// LLM endpoint (OpenAI-compatible chat completions)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub api_url: Option<String>,
    pub api_key_env: Option<String>,
    /// Production model identifier
    pub model: String,
    /// Cheaper model selected by `--test`
    pub test_model: Option<String>,
    pub timeout_seconds: Option<u64>,
    pub max_tokens: Option<usize>,
    pub temperature: Option<f32>,
}

/// Source lists and the RSS lookback window
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourcesConfig {
    /// Lookback window for RSS items, in hours
    pub rss_hours: i64,
    #[serde(default)]
    pub rss_feeds: Vec<String>,
    /// Non-RSS pages, scraped whole
    #[serde(default)]
    pub other_sources: Vec<String>,
    pub max_per_feed: Option<usize>,
    pub max_item_chars: Option<usize>,
    pub other_source_max_chars: Option<usize>,
}

/// Web search / scrape provider
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchConfig {
    pub api_url: Option<String>,
    pub scrape_url: Option<String>,
    pub api_key_env: Option<String>,
    pub timeout_seconds: Option<u64>,
    pub default_results: Option<usize>,
}

/// Agent loop bounds
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentConfig {
    pub max_turns: Option<usize>,
    pub tool_budget: Option<usize>,
    pub max_retries: Option<u32>,
    pub retry_backoff_ms: Option<u64>,
}

/// Where artifacts are written
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutputConfig {
    pub data_dir: Option<String>,
    /// How many earlier newsletters are shown to the agent to avoid repeats
    pub recent_newsletters: Option<usize>,
}

/// Mail provider (SendGrid v3 compatible)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeliveryConfig {
    pub api_url: Option<String>,
    pub api_key_env: Option<String>,
}

/// Politeness / fetching configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolitenessConfig {
    pub fetch_timeout_seconds: Option<u64>,
    pub concurrency: Option<usize>,
    pub user_agent: Option<String>,
}

/// Top-level application configuration (deserialized from config.toml)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub newsletter: NewsletterConfig,
    pub llm: LlmConfig,
    pub sources: SourcesConfig,
    pub search: Option<SearchConfig>,
    pub agent: Option<AgentConfig>,
    pub output: Option<OutputConfig>,
    pub delivery: Option<DeliveryConfig>,
    pub politeness: Option<PolitenessConfig>,
    /// Personalization prompt handed to the agent verbatim
    pub prompt: String,
}

impl Config {
    /// Load configuration from a TOML file asynchronously.
    ///
    /// Example:
    ///   let cfg = Config::from_file("config.toml").await?;
    pub async fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = tokio::fs::read_to_string(path.as_ref())
            .await
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;
        let cfg: Config = toml::from_str(&data).context("Failed to parse TOML configuration")?;
        Ok(cfg)
    }

    /// Load configuration with an optional default file and an optional override file.
    /// If both are present, they are merged (override takes precedence).
    pub async fn load_with_defaults(default_path: Option<&Path>, override_path: Option<&Path>) -> Result<Self> {
        let mut config_value = toml::Value::Table(toml::map::Map::new());

        if let Some(path) = default_path {
            if path.exists() {
                let data = tokio::fs::read_to_string(path).await
                    .with_context(|| format!("Failed to read default config: {}", path.display()))?;
                let val: toml::Value = toml::from_str(&data)
                    .context("Failed to parse default configuration")?;
                merge_toml(&mut config_value, val);
            }
        }

        if let Some(path) = override_path {
            if path.exists() {
                let data = tokio::fs::read_to_string(path).await
                    .with_context(|| format!("Failed to read override config: {}", path.display()))?;
                let val: toml::Value = toml::from_str(&data)
                    .context("Failed to parse override configuration")?;
                merge_toml(&mut config_value, val);
            }
        }

        let cfg: Config = config_value.try_into().context("Failed to parse merged configuration")?;
        Ok(cfg)
    }

    /// Model identifier for this run; `test_mode` picks the cheaper one when configured
    pub fn model_for(&self, test_mode: bool) -> &str {
        if test_mode {
            self.llm.test_model.as_deref().unwrap_or(&self.llm.model)
        } else {
            &self.llm.model
        }
    }

    pub fn data_dir(&self) -> PathBuf {
        PathBuf::from(
            self.output
                .as_ref()
                .and_then(|o| o.data_dir.as_deref())
                .unwrap_or("data"),
        )
    }

    pub fn recent_newsletters(&self) -> usize {
        self.output.as_ref().and_then(|o| o.recent_newsletters).unwrap_or(7)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(
            self.politeness
                .as_ref()
                .and_then(|p| p.fetch_timeout_seconds)
                .unwrap_or(15),
        )
    }

    pub fn fetch_concurrency(&self) -> usize {
        self.politeness
            .as_ref()
            .and_then(|p| p.concurrency)
            .unwrap_or(4)
            .max(1)
    }

    pub fn user_agent(&self) -> String {
        self.politeness
            .as_ref()
            .and_then(|p| p.user_agent.clone())
            .unwrap_or_else(|| "Newsdesk/0.1.0".to_string())
    }

    pub fn agent(&self) -> AgentConfig {
        self.agent.clone().unwrap_or_default()
    }

    pub fn search(&self) -> SearchConfig {
        self.search.clone().unwrap_or_default()
    }

    pub fn delivery(&self) -> DeliveryConfig {
        self.delivery.clone().unwrap_or_default()
    }
}

fn merge_toml(a: &mut toml::Value, b: toml::Value) {
    match (a, b) {
        (toml::Value::Table(a_map), toml::Value::Table(b_map)) => {
            for (k, v) in b_map {
                if let Some(a_val) = a_map.get_mut(&k) {
                    merge_toml(a_val, v);
                } else {
                    a_map.insert(k, v);
                }
            }
        }
        (a_val, b_val) => *a_val = b_val,
    }
}

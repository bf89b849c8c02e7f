//! One generation run: collect, brief, orchestrate, render, deliver.

use chrono::{DateTime, NaiveDate, Utc};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use crate::agent::{AgentBrief, AgentLimits, AgentOrchestrator};
use crate::delivery::{deliver, subject_line, Mailer};
use crate::error::{DeliveryError, PipelineError};
use crate::history;
use crate::ingestion::{CollectorSettings, SourceCollector};
use crate::llm::Completer;
use crate::model::{SourceSpec, UnresolvedCitation};
use crate::render::{CitationIndex, Renderer};
use crate::search::Searcher;

#[derive(Debug, Clone, Copy, Default)]
pub struct GenerateOptions {
    pub send_email: bool,
    /// Cheaper model; the run is otherwise identical
    pub test_mode: bool,
}

/// External providers used by a run
pub struct Capabilities {
    pub completer: Arc<dyn Completer>,
    pub searcher: Arc<dyn Searcher>,
    /// Required only when sending
    pub mailer: Option<Arc<dyn Mailer>>,
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub artifact_path: PathBuf,
    pub model: String,
    pub items: usize,
    pub failed_sources: usize,
    pub tool_calls: usize,
    pub turns: usize,
    pub unresolved: Vec<UnresolvedCitation>,
    pub delivered: Vec<String>,
}

/// Run the whole pipeline for `today`. `now` anchors the lookback window.
pub async fn generate(
    config: &common::Config,
    capabilities: &Capabilities,
    options: GenerateOptions,
    now: DateTime<Utc>,
    today: NaiveDate,
) -> Result<RunReport, PipelineError> {
    let recipients = config.newsletter.recipient_email.addresses();
    let mailer = if options.send_email {
        Some(delivery_preconditions(config, capabilities, &recipients)?)
    } else {
        None
    };

    info!(
        "Generating {} for {} with model {}{}",
        config.newsletter.name,
        today.format("%A, %B %d, %Y"),
        capabilities.completer.model(),
        if options.test_mode { " [TEST MODE]" } else { "" }
    );

    let specs = SourceSpec::from_config(config);
    info!(
        "Fetching {} RSS feeds and {} other sources (last {} hours)",
        config.sources.rss_feeds.len(),
        config.sources.other_sources.len(),
        config.sources.rss_hours
    );
    let collector = SourceCollector::new(CollectorSettings::from_config(config))
        .map_err(|e| PipelineError::Setup { reason: format!("{:#}", e) })?;
    let collection = collector.collect(&specs, now).await?;

    let data_dir = config.data_dir();
    let recent = match history::load_recent(&data_dir, config.recent_newsletters(), today).await {
        Ok(recent) => recent,
        Err(e) => {
            warn!("could not load recent newsletters: {:#}", e);
            Vec::new()
        }
    };

    let brief = AgentBrief {
        date: today,
        newsletter_name: config.newsletter.name.clone(),
        prompt: config.prompt.clone(),
        lookback_hours: config.sources.rss_hours,
        items: collection.items,
        recent,
    };

    let orchestrator = AgentOrchestrator::new(
        capabilities.completer.clone(),
        capabilities.searcher.clone(),
        AgentLimits::from_config(config),
    );
    let outcome = orchestrator.run(&brief).await?;

    let index = CitationIndex::build(&brief.items, &outcome.tool_results);
    let artifact = Renderer::new(data_dir.clone())
        .render(&outcome.draft, today, &outcome.model, &index)
        .await?;

    let delivered = match mailer {
        Some(mailer) => {
            let subject = subject_line(&config.newsletter.name, today);
            let sender = config.newsletter.from_email.as_deref().unwrap_or_default();
            let reply_to = config
                .newsletter
                .reply_to_email
                .as_deref()
                .filter(|r| !r.trim().is_empty());
            deliver(mailer.as_ref(), &artifact, &subject, sender, reply_to, &recipients).await?
        }
        None => Vec::new(),
    };

    Ok(RunReport {
        artifact_path: artifact.path,
        model: outcome.model,
        items: brief.items.len(),
        failed_sources: collection.failures.len(),
        tool_calls: outcome.tool_calls,
        turns: outcome.turns,
        unresolved: artifact.unresolved,
        delivered,
    })
}

/// Everything sending needs, checked before any network work
fn delivery_preconditions(
    config: &common::Config,
    capabilities: &Capabilities,
    recipients: &[String],
) -> Result<Arc<dyn Mailer>, DeliveryError> {
    if recipients.is_empty() {
        return Err(DeliveryError::NotConfigured {
            reason: "newsletter.recipient_email is empty".to_string(),
        });
    }
    if config
        .newsletter
        .from_email
        .as_deref()
        .map(str::trim)
        .unwrap_or_default()
        .is_empty()
    {
        return Err(DeliveryError::NotConfigured {
            reason: "newsletter.from_email is not set".to_string(),
        });
    }
    capabilities.mailer.clone().ok_or_else(|| DeliveryError::NotConfigured {
        reason: "no mail API key available".to_string(),
    })
}

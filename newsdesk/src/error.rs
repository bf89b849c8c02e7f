//! Failure taxonomy for one generation run.
//!
//! Errors scoped to one source or one tool call are absorbed where they happen
//! (logged, or shown to the model). The ones that make a valid newsletter
//! impossible end up in [`PipelineError`] and terminate the run.

use std::path::PathBuf;

/// One source could not be fetched or parsed. Never fatal on its own.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("source fetch failed for {url}: {reason}")]
    FetchFailed { url: String, reason: String },
}

#[derive(Debug, thiserror::Error)]
pub enum CollectError {
    #[error("all {attempted} configured sources failed; refusing to run the agent on empty input")]
    AllSourcesFailed { attempted: usize },
}

/// Outcome of a single tool invocation that did not produce results.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ToolError {
    #[error("search tool unavailable: {0}")]
    Unavailable(String),

    #[error("search tool rate limited by upstream")]
    RateLimited,

    #[error("tool budget of {budget} calls exhausted")]
    BudgetExceeded { budget: usize },

    #[error("invalid tool call: {0}")]
    InvalidArguments(String),
}

/// Which agent bound was hit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetKind {
    Turns,
    Tools,
}

impl std::fmt::Display for BudgetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BudgetKind::Turns => write!(f, "turn"),
            BudgetKind::Tools => write!(f, "tool-call"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("agent {kind} budget of {limit} exceeded")]
    BudgetExceeded { kind: BudgetKind, limit: usize },

    #[error("model output could not be parsed as a newsletter draft: {reason}")]
    DraftMalformed { reason: String },

    #[error("model unavailable after {attempts} attempts: {reason}")]
    ModelUnavailable { attempts: u32, reason: String },
}

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("email delivery requested but not configured: {reason}")]
    NotConfigured { reason: String },

    #[error("delivery failed for {failed:?} (artifact kept at {artifact})", artifact = .artifact.display())]
    Failed { failed: Vec<String>, artifact: PathBuf },
}

/// Hard failures: the run ends with a non-zero exit and no artifact
/// presented as complete.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("pipeline setup failed: {reason}")]
    Setup { reason: String },

    #[error(transparent)]
    Collect(#[from] CollectError),

    #[error(transparent)]
    Agent(#[from] AgentError),

    #[error("failed to persist newsletter to {path}: {source}", path = .path.display())]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Delivery(#[from] DeliveryError),
}

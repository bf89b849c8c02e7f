//! Bounded multi-turn loop between the model and the search tool.
//!
//! The loop is an explicit state machine:
//! `Init -> AwaitingModel -> (ToolDispatch -> AwaitingModel)* -> Finalizing -> Done`.
//! The turn cap is checked in one place (entering a model request) and the tool
//! budget is owned by [`SearchTool`], so neither can be bypassed.

use chrono::NaiveDate;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{AgentError, BudgetKind, ToolError};
use crate::history::PastNewsletter;
use crate::llm::{extract_json_from_text, ChatMessage, Completer, Completion, CompletionRequest, ToolInvocation, UsageMetadata};
use crate::model::{CandidateItem, NewsletterDraft, ToolResult};
use crate::search::{tool_specs, SearchTool, Searcher, DEFAULT_RESULTS};

pub mod prompt;

/// Consecutive unusable drafts tolerated before the run fails
const MAX_PARSE_FAILURES: u32 = 2;

/// Everything the agent is told up front
#[derive(Debug, Clone)]
pub struct AgentBrief {
    pub date: NaiveDate,
    pub newsletter_name: String,
    /// Reader profile and preferences
    pub prompt: String,
    pub lookback_hours: i64,
    pub items: Vec<CandidateItem>,
    pub recent: Vec<PastNewsletter>,
}

#[derive(Debug, Clone)]
pub struct AgentLimits {
    pub max_turns: usize,
    pub tool_budget: usize,
    /// Extra attempts per model request on retryable errors
    pub max_retries: u32,
    pub retry_backoff: Duration,
    pub default_results: usize,
    pub max_tokens: Option<usize>,
    pub temperature: Option<f32>,
}

impl Default for AgentLimits {
    fn default() -> Self {
        Self {
            max_turns: 30,
            tool_budget: 24,
            max_retries: 2,
            retry_backoff: Duration::from_millis(1000),
            default_results: DEFAULT_RESULTS,
            max_tokens: None,
            temperature: None,
        }
    }
}

impl AgentLimits {
    pub fn from_config(config: &common::Config) -> Self {
        let agent = config.agent();
        let defaults = Self::default();
        Self {
            max_turns: agent.max_turns.unwrap_or(defaults.max_turns),
            tool_budget: agent.tool_budget.unwrap_or(defaults.tool_budget),
            max_retries: agent.max_retries.unwrap_or(defaults.max_retries),
            retry_backoff: agent
                .retry_backoff_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry_backoff),
            default_results: config.search().default_results.unwrap_or(defaults.default_results),
            max_tokens: config.llm.max_tokens,
            temperature: config.llm.temperature,
        }
    }
}

/// Result of a converged session
#[derive(Debug, Clone)]
pub struct AgentOutcome {
    pub draft: NewsletterDraft,
    /// Every successful tool result, in call order
    pub tool_results: Vec<ToolResult>,
    /// Tool calls that consumed budget
    pub tool_calls: usize,
    /// Model requests made
    pub turns: usize,
    pub model: String,
    pub usage: UsageMetadata,
}

enum State {
    Init,
    AwaitingModel,
    ToolDispatch(Completion),
    Finalizing(String),
    Done(NewsletterDraft),
}

/// Mutable state of one session. Never shared across runs.
struct Session {
    transcript: Vec<ChatMessage>,
    tool: SearchTool,
    turns: usize,
    parse_failures: u32,
    /// Set once the tool budget has been hit; later requests offer no tools
    tools_closed: bool,
    tool_results: Vec<ToolResult>,
    usage: UsageMetadata,
}

pub struct AgentOrchestrator {
    completer: Arc<dyn Completer>,
    searcher: Arc<dyn Searcher>,
    limits: AgentLimits,
}

impl AgentOrchestrator {
    pub fn new(completer: Arc<dyn Completer>, searcher: Arc<dyn Searcher>, limits: AgentLimits) -> Self {
        Self { completer, searcher, limits }
    }

    /// Drive one session to a validated draft or a hard failure
    pub async fn run(&self, brief: &AgentBrief) -> Result<AgentOutcome, AgentError> {
        let mut session = Session {
            transcript: Vec::new(),
            tool: SearchTool::new(self.searcher.clone(), self.limits.tool_budget)
                .with_default_results(self.limits.default_results),
            turns: 0,
            parse_failures: 0,
            tools_closed: false,
            tool_results: Vec::new(),
            usage: UsageMetadata::default(),
        };

        info!(
            model = self.completer.model(),
            items = brief.items.len(),
            max_turns = self.limits.max_turns,
            tool_budget = self.limits.tool_budget,
            "starting agent session"
        );

        let mut state = State::Init;
        loop {
            state = match state {
                State::Init => {
                    session.transcript.push(ChatMessage::system(prompt::system_prompt(brief)));
                    session.transcript.push(ChatMessage::user(prompt::kickoff_message()));
                    State::AwaitingModel
                }
                State::AwaitingModel => self.await_model(&mut session).await?,
                State::ToolDispatch(completion) => self.dispatch_tools(&mut session, completion).await?,
                State::Finalizing(text) => Self::finalize(&mut session, text)?,
                State::Done(draft) => {
                    info!(
                        turns = session.turns,
                        tool_calls = session.tool.calls_made(),
                        sections = draft.sections.len(),
                        total_tokens = session.usage.total_tokens,
                        "agent session converged"
                    );
                    return Ok(AgentOutcome {
                        draft,
                        tool_results: session.tool_results,
                        tool_calls: session.tool.calls_made(),
                        turns: session.turns,
                        model: self.completer.model().to_string(),
                        usage: session.usage,
                    });
                }
            };
        }
    }

    async fn await_model(&self, session: &mut Session) -> Result<State, AgentError> {
        if session.turns >= self.limits.max_turns {
            warn!(turns = session.turns, "agent turn cap reached without a draft");
            return Err(AgentError::BudgetExceeded {
                kind: BudgetKind::Turns,
                limit: self.limits.max_turns,
            });
        }
        session.turns += 1;

        let request = CompletionRequest {
            messages: session.transcript.clone(),
            tools: if session.tools_closed { Vec::new() } else { tool_specs() },
            max_tokens: self.limits.max_tokens,
            temperature: self.limits.temperature,
        };
        info!("Agent turn {}/{}", session.turns, self.limits.max_turns);

        let completion = self.complete_with_retry(request).await?;
        session.usage.prompt_tokens += completion.usage.prompt_tokens;
        session.usage.completion_tokens += completion.usage.completion_tokens;
        session.usage.total_tokens += completion.usage.total_tokens;

        if completion.tool_calls.is_empty() {
            Ok(State::Finalizing(completion.content.unwrap_or_default()))
        } else {
            Ok(State::ToolDispatch(completion))
        }
    }

    async fn complete_with_retry(&self, request: CompletionRequest) -> Result<Completion, AgentError> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match self.completer.complete(request.clone()).await {
                Ok(completion) => return Ok(completion),
                Err(e) if e.is_retryable() && attempt <= self.limits.max_retries => {
                    let delay = self.limits.retry_backoff * 2u32.saturating_pow(attempt - 1);
                    warn!("LLM request failed (attempt {}): {}, retrying in {:?}", attempt, e, delay);
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    return Err(AgentError::ModelUnavailable {
                        attempts: attempt,
                        reason: e.to_string(),
                    });
                }
            }
        }
    }

    async fn dispatch_tools(&self, session: &mut Session, completion: Completion) -> Result<State, AgentError> {
        if session.tools_closed {
            warn!("model requested tools after the budget was spent");
            return Err(AgentError::BudgetExceeded {
                kind: BudgetKind::Tools,
                limit: self.limits.tool_budget,
            });
        }

        let calls = completion.tool_calls;
        session
            .transcript
            .push(ChatMessage::assistant_tool_calls(completion.content, calls.clone()));

        let mut exhausted = false;
        for invocation in &calls {
            let reply = Self::run_one(session, invocation).await;
            match reply {
                Ok(result) => {
                    let body = serde_json::to_string(&result).unwrap_or_default();
                    session.transcript.push(ChatMessage::tool(&invocation.id, body));
                    session.tool_results.push(result);
                }
                Err(e) => {
                    if matches!(e, ToolError::BudgetExceeded { .. }) {
                        exhausted = true;
                    }
                    session
                        .transcript
                        .push(ChatMessage::tool(&invocation.id, format!("error: {}", e)));
                }
            }
        }

        if exhausted {
            info!(budget = self.limits.tool_budget, "tool budget spent, forcing finalization");
            session.tools_closed = true;
            session
                .transcript
                .push(ChatMessage::user(prompt::tools_exhausted_message(self.limits.tool_budget)));
        }
        session.parse_failures = 0;
        Ok(State::AwaitingModel)
    }

    async fn run_one(session: &mut Session, invocation: &ToolInvocation) -> Result<ToolResult, ToolError> {
        let call = session.tool.parse_invocation(invocation).map_err(|e| {
            warn!(tool = %invocation.name, "rejected tool call: {}", e);
            e
        })?;
        let result = session.tool.call(&call).await;
        debug!(tool = %invocation.name, remaining = session.tool.remaining(), "tool call dispatched");
        result
    }

    fn finalize(session: &mut Session, text: String) -> Result<State, AgentError> {
        match parse_draft(&text) {
            Ok(draft) => Ok(State::Done(draft)),
            Err(reason) => {
                session.parse_failures += 1;
                warn!(attempt = session.parse_failures, "draft rejected: {}", reason);
                if session.parse_failures >= MAX_PARSE_FAILURES {
                    return Err(AgentError::DraftMalformed { reason });
                }
                session.transcript.push(ChatMessage::assistant(text));
                session.transcript.push(ChatMessage::user(prompt::corrective_message(&reason)));
                Ok(State::AwaitingModel)
            }
        }
    }
}

/// Parse and validate the model's final answer
pub fn parse_draft(text: &str) -> Result<NewsletterDraft, String> {
    if text.trim().is_empty() {
        return Err("empty response".to_string());
    }
    let json = extract_json_from_text(text).ok_or_else(|| "no JSON object found".to_string())?;
    let draft: NewsletterDraft =
        serde_json::from_str(&json).map_err(|e| format!("does not match the newsletter schema: {}", e))?;
    draft.validate()?;
    debug!(sections = draft.sections.len(), "draft parsed");
    Ok(draft)
}

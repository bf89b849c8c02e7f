#![allow(dead_code)]

use newsdesk::delivery::{Mailer, SendRequest};
use newsdesk::error::ToolError;
use newsdesk::llm::{Completer, Completion, CompletionRequest, LlmError, ToolInvocation};
use newsdesk::model::{Freshness, SearchHit, ToolResult};
use newsdesk::search::Searcher;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Replays scripted completions and records every request it receives
pub struct ScriptedCompleter {
    script: Mutex<VecDeque<Result<Completion, LlmError>>>,
    pub requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedCompleter {
    pub fn new(script: Vec<Result<Completion, LlmError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn request(&self, n: usize) -> CompletionRequest {
        self.requests.lock().unwrap()[n].clone()
    }
}

#[async_trait::async_trait]
impl Completer for ScriptedCompleter {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, LlmError> {
        self.requests.lock().unwrap().push(request);
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(LlmError::Decode("script exhausted".into())))
    }

    fn model(&self) -> &str {
        "fake/model"
    }
}

pub fn text(content: &str) -> Result<Completion, LlmError> {
    Ok(Completion {
        content: Some(content.to_string()),
        model: "fake/model".into(),
        ..Default::default()
    })
}

pub fn tools(calls: &[(&str, &str)]) -> Result<Completion, LlmError> {
    Ok(Completion {
        content: None,
        tool_calls: calls
            .iter()
            .enumerate()
            .map(|(i, (name, args))| ToolInvocation {
                id: format!("call_{}", i),
                name: name.to_string(),
                arguments: args.to_string(),
            })
            .collect(),
        model: "fake/model".into(),
        ..Default::default()
    })
}

/// Draft JSON with one section citing each URL in its own item
pub fn draft_json(urls: &[&str]) -> String {
    let items: Vec<String> = urls
        .iter()
        .enumerate()
        .map(|(i, url)| {
            format!(
                r#"{{"text": "Story {}", "highlight": {}, "citations": [{{"url": "{}", "source": "Src"}}]}}"#,
                i + 1,
                i == 0,
                url
            )
        })
        .collect();
    format!(
        r#"{{"title": "Morning Brief", "sections": [{{"heading": "Top stories", "items": [{}]}}]}}"#,
        items.join(", ")
    )
}

/// Returns `https://search.example/<n>` for the n-th call, counting calls
pub struct CountingSearcher {
    pub calls: AtomicUsize,
    pub fail_with: Option<ToolError>,
}

impl CountingSearcher {
    pub fn new() -> Self {
        Self { calls: AtomicUsize::new(0), fail_with: None }
    }

    pub fn failing(err: ToolError) -> Self {
        Self { calls: AtomicUsize::new(0), fail_with: Some(err) }
    }

    pub fn count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Searcher for CountingSearcher {
    async fn search(&self, query: &str, max_results: usize, _: Option<Freshness>) -> Result<ToolResult, ToolError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(err) = &self.fail_with {
            return Err(err.clone());
        }
        let hits = vec![SearchHit {
            title: format!("Result for {}", query),
            url: format!("https://search.example/{}", n),
            snippet: "snippet".into(),
        }];
        Ok(ToolResult { hits: hits.into_iter().take(max_results).collect() })
    }

    async fn scrape(&self, url: &str) -> Result<ToolResult, ToolError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = &self.fail_with {
            return Err(err.clone());
        }
        Ok(ToolResult {
            hits: vec![SearchHit { title: "Page".into(), url: url.into(), snippet: "page text".into() }],
        })
    }
}

/// Records sends; fails for recipients listed in `reject`
pub struct RecordingMailer {
    pub sent: Mutex<Vec<SendRequest>>,
    pub reject: Vec<String>,
}

impl RecordingMailer {
    pub fn new() -> Self {
        Self { sent: Mutex::new(Vec::new()), reject: Vec::new() }
    }
}

#[async_trait::async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, request: &SendRequest) -> anyhow::Result<()> {
        if self.reject.contains(&request.recipient) {
            anyhow::bail!("mailbox unavailable");
        }
        self.sent.lock().unwrap().push(request.clone());
        Ok(())
    }
}

mod support;

use chrono::{NaiveDate, TimeZone, Utc};
use common::Config;
use newsdesk::delivery::Mailer;
use newsdesk::error::{AgentError, CollectError, DeliveryError, PipelineError};
use newsdesk::pipeline::{generate, Capabilities, GenerateOptions};
use std::path::Path;
use std::sync::Arc;
use support::{draft_json, text, tools, CountingSearcher, RecordingMailer, ScriptedCompleter};

const FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>Compiler Weekly</title>
    <link>https://cw.example</link>
    <description>CW</description>
    <item>
      <title>New optimizer lands</title>
      <link>https://cw.example/optimizer</link>
      <description>The new optimizer is on by default.</description>
      <pubDate>Sat, 17 Oct 2026 07:00:00 GMT</pubDate>
    </item>
  </channel>
</rss>"#;

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 10, 17).unwrap()
}

fn now() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 17, 12, 0, 0).unwrap()
}

async fn write_config(dir: &Path, feeds: &[String], recipients: &str) -> Config {
    let feeds = feeds.iter().map(|f| format!("\"{}\"", f)).collect::<Vec<_>>().join(", ");
    let body = format!(
        r#"
prompt = "Compilers, please."

[newsletter]
name = "Morning Brief"
recipient_email = {recipients}
from_email = "news@example.com"

[llm]
model = "fake/model"

[sources]
rss_hours = 24
rss_feeds = [{feeds}]

[agent]
max_turns = 6
tool_budget = 2
retry_backoff_ms = 1

[output]
data_dir = "{data}"
"#,
        recipients = recipients,
        feeds = feeds,
        data = dir.join("data").display()
    );
    let path = dir.join("config.toml");
    tokio::fs::write(&path, body).await.unwrap();
    Config::from_file(&path).await.unwrap()
}

fn capabilities(
    completer: &Arc<ScriptedCompleter>,
    searcher: &Arc<CountingSearcher>,
    mailer: Option<Arc<RecordingMailer>>,
) -> Capabilities {
    Capabilities {
        completer: completer.clone(),
        searcher: searcher.clone(),
        mailer: mailer.map(|m| m as Arc<dyn Mailer>),
    }
}

#[tokio::test]
async fn test_full_run_writes_dated_artifact() {
    let mut server = mockito::Server::new_async().await;
    let _feed = server.mock("GET", "/feed.xml").with_status(200).with_body(FEED).create_async().await;
    let _down = server.mock("GET", "/down.xml").with_status(404).create_async().await;

    let dir = tempfile::tempdir().unwrap();
    let config = write_config(
        dir.path(),
        &[format!("{}/feed.xml", server.url()), format!("{}/down.xml", server.url())],
        "\"reader@example.com\"",
    )
    .await;

    let completer = Arc::new(ScriptedCompleter::new(vec![
        tools(&[("search_web", r#"{"query": "optimizer benchmarks"}"#)]),
        text(&draft_json(&["https://cw.example/optimizer", "https://search.example/1", "https://made-up.example/x"])),
    ]));
    let searcher = Arc::new(CountingSearcher::new());

    let report = generate(
        &config,
        &capabilities(&completer, &searcher, None),
        GenerateOptions::default(),
        now(),
        today(),
    )
    .await
    .unwrap();

    assert_eq!(report.items, 1);
    assert_eq!(report.failed_sources, 1);
    assert_eq!(report.tool_calls, 1);
    assert_eq!(report.turns, 2);
    assert!(report.delivered.is_empty());
    assert_eq!(report.unresolved.len(), 1);
    assert_eq!(report.artifact_path, dir.path().join("data").join("newsletter_2026-10-17.html"));

    let html = std::fs::read_to_string(&report.artifact_path).unwrap();
    assert!(html.contains("https://cw.example/optimizer"));
    assert!(html.contains("https://search.example/1"));
    assert!(!html.contains("made-up.example"));
    assert!(html.contains("source(s) omitted"));

    // The feed item reached the model
    let system = completer.request(0).messages[0].content.clone().unwrap();
    assert!(system.contains("New optimizer lands"));
}

#[tokio::test]
async fn test_all_sources_failing_never_reaches_the_model() {
    let mut server = mockito::Server::new_async().await;
    let _down = server.mock("GET", "/down.xml").with_status(404).create_async().await;

    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), &[format!("{}/down.xml", server.url())], "\"reader@example.com\"").await;

    let completer = Arc::new(ScriptedCompleter::new(vec![text(&draft_json(&["https://cw.example/optimizer"]))]));
    let searcher = Arc::new(CountingSearcher::new());

    let err = generate(
        &config,
        &capabilities(&completer, &searcher, None),
        GenerateOptions::default(),
        now(),
        today(),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, PipelineError::Collect(CollectError::AllSourcesFailed { attempted: 1 })));
    assert_eq!(completer.calls(), 0);
    assert!(!dir.path().join("data").join("newsletter_2026-10-17.html").exists());
}

#[tokio::test]
async fn test_malformed_drafts_leave_no_artifact() {
    let mut server = mockito::Server::new_async().await;
    let _feed = server.mock("GET", "/feed.xml").with_status(200).with_body(FEED).create_async().await;

    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), &[format!("{}/feed.xml", server.url())], "\"reader@example.com\"").await;

    let completer = Arc::new(ScriptedCompleter::new(vec![text("nope"), text("still nope")]));
    let searcher = Arc::new(CountingSearcher::new());

    let err = generate(
        &config,
        &capabilities(&completer, &searcher, None),
        GenerateOptions::default(),
        now(),
        today(),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, PipelineError::Agent(AgentError::DraftMalformed { .. })));
    assert!(!dir.path().join("data").join("newsletter_2026-10-17.html").exists());
}

#[tokio::test]
async fn test_send_email_delivers_to_every_recipient() {
    let mut server = mockito::Server::new_async().await;
    let _feed = server.mock("GET", "/feed.xml").with_status(200).with_body(FEED).create_async().await;

    let dir = tempfile::tempdir().unwrap();
    let config = write_config(
        dir.path(),
        &[format!("{}/feed.xml", server.url())],
        "[\"a@example.com\", \"b@example.com\"]",
    )
    .await;

    let completer = Arc::new(ScriptedCompleter::new(vec![text(&draft_json(&["https://cw.example/optimizer"]))]));
    let searcher = Arc::new(CountingSearcher::new());
    let mailer = Arc::new(RecordingMailer::new());

    let report = generate(
        &config,
        &capabilities(&completer, &searcher, Some(mailer.clone())),
        GenerateOptions { send_email: true, test_mode: false },
        now(),
        today(),
    )
    .await
    .unwrap();

    assert_eq!(report.delivered, vec!["a@example.com".to_string(), "b@example.com".to_string()]);
    let sent = mailer.sent.lock().unwrap();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].subject, "Morning Brief - October 17, 2026");
    assert_eq!(sent[0].sender, "news@example.com");
    assert_eq!(sent[0].reply_to, None);
}

#[tokio::test]
async fn test_send_email_without_recipients_fails_before_fetching() {
    let mut server = mockito::Server::new_async().await;
    let feed = server.mock("GET", "/feed.xml").with_status(200).with_body(FEED).expect(0).create_async().await;

    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), &[format!("{}/feed.xml", server.url())], "[]").await;

    let completer = Arc::new(ScriptedCompleter::new(vec![]));
    let searcher = Arc::new(CountingSearcher::new());

    let err = generate(
        &config,
        &capabilities(&completer, &searcher, Some(Arc::new(RecordingMailer::new()))),
        GenerateOptions { send_email: true, test_mode: false },
        now(),
        today(),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, PipelineError::Delivery(DeliveryError::NotConfigured { .. })));
    feed.assert_async().await;
}

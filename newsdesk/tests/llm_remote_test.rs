use mockito::Matcher;
use newsdesk::llm::remote::RemoteCompleter;
use newsdesk::llm::{ChatMessage, Completer, CompletionRequest, LlmError, ToolSpec};

fn request(tools: Vec<ToolSpec>) -> CompletionRequest {
    CompletionRequest {
        messages: vec![ChatMessage::system("You curate news."), ChatMessage::user("Go.")],
        tools,
        max_tokens: Some(100),
        temperature: Some(0.2),
    }
}

#[tokio::test]
async fn test_remote_completer_text_reply() {
    let mut server = mockito::Server::new_async().await;

    let mock = server
        .mock("POST", "/")
        .match_header("authorization", "Bearer fake-api-key")
        .match_body(Matcher::PartialJsonString(
            r#"{"model": "test/model", "max_tokens": 100}"#.to_string(),
        ))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{
                "model": "test/model",
                "choices": [{
                    "message": {
                        "role": "assistant",
                        "content": "{\"title\": \"Daily\"}"
                    },
                    "finish_reason": "stop"
                }],
                "usage": {
                    "prompt_tokens": 10,
                    "completion_tokens": 5,
                    "total_tokens": 15
                }
            }"#,
        )
        .create_async()
        .await;

    let completer = RemoteCompleter::new(server.url(), "fake-api-key", "test/model");
    let completion = completer.complete(request(vec![])).await.unwrap();

    assert_eq!(completion.content.as_deref(), Some("{\"title\": \"Daily\"}"));
    assert!(completion.tool_calls.is_empty());
    assert_eq!(completion.usage.prompt_tokens, 10);
    assert_eq!(completion.usage.total_tokens, 15);
    assert_eq!(completion.model, "test/model");

    mock.assert_async().await;
}

#[tokio::test]
async fn test_remote_completer_tool_calls() {
    let mut server = mockito::Server::new_async().await;

    let mock = server
        .mock("POST", "/")
        .match_body(Matcher::AllOf(vec![
            Matcher::Regex(r#""type":"function""#.to_string()),
            Matcher::Regex(r#""name":"search_web""#.to_string()),
        ]))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{
                "choices": [{
                    "message": {
                        "role": "assistant",
                        "content": null,
                        "tool_calls": [{
                            "id": "call_abc",
                            "type": "function",
                            "function": {
                                "name": "search_web",
                                "arguments": "{\"query\": \"rust release\"}"
                            }
                        }]
                    },
                    "finish_reason": "tool_calls"
                }]
            }"#,
        )
        .create_async()
        .await;

    let tool = ToolSpec {
        name: "search_web".into(),
        description: "search".into(),
        parameters: serde_json::json!({"type": "object"}),
    };
    let completer = RemoteCompleter::new(server.url(), "fake-api-key", "test/model");
    let completion = completer.complete(request(vec![tool])).await.unwrap();

    assert_eq!(completion.content, None);
    assert_eq!(completion.tool_calls.len(), 1);
    assert_eq!(completion.tool_calls[0].id, "call_abc");
    assert_eq!(completion.tool_calls[0].name, "search_web");
    assert!(completion.tool_calls[0].arguments.contains("rust release"));
    // Missing usage and model fall back to defaults
    assert_eq!(completion.usage.total_tokens, 0);
    assert_eq!(completion.model, "test/model");

    mock.assert_async().await;
}

#[tokio::test]
async fn test_remote_completer_error_handling() {
    let mut server = mockito::Server::new_async().await;

    let mock = server
        .mock("POST", "/")
        .with_status(429)
        .with_header("content-type", "application/json")
        .with_body(r#"{"error": {"message": "Rate limit exceeded"}}"#)
        .create_async()
        .await;

    let completer = RemoteCompleter::new(server.url(), "fake-api-key", "test/model");
    let err = completer.complete(request(vec![])).await.unwrap_err();

    assert!(matches!(err, LlmError::Http { status: 429, .. }));
    assert!(err.is_retryable());
    assert!(err.to_string().contains("429"));

    mock.assert_async().await;
}

#[tokio::test]
async fn test_remote_completer_decode_error() {
    let mut server = mockito::Server::new_async().await;

    let _mock = server
        .mock("POST", "/")
        .with_status(200)
        .with_body(r#"{"choices": []}"#)
        .create_async()
        .await;

    let completer = RemoteCompleter::new(server.url(), "fake-api-key", "test/model");
    let err = completer.complete(request(vec![])).await.unwrap_err();
    assert!(matches!(err, LlmError::Decode(_)));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn test_remote_completer_timeout() {
    let mut server = mockito::Server::new_async().await;

    // Mock slow response
    let _mock = server
        .mock("POST", "/")
        .with_status(200)
        .with_chunked_body(|w| {
            std::thread::sleep(std::time::Duration::from_secs(3));
            w.write_all(b"too late")
        })
        .create_async()
        .await;

    let completer = RemoteCompleter::new(server.url(), "fake-api-key", "test/model").with_defaults(1, 100, 0.7);
    let err = completer.complete(request(vec![])).await.unwrap_err();

    assert!(err.to_string().contains("timed out"));
}

//! HTTP tests for the chat completion client
//!
//! A local mock server stands in for the completion endpoint so the request
//! shape and stream decoding are tested over a real connection.

use std::io::Write;

use mockito::{Matcher, Server};
use pretty_assertions::assert_eq;
use serde_json::json;
use tokio::sync::mpsc;

use nebula_conductor::backend::{
    BackendProfile, ChatCompletionClient, CompletionBackend, CompletionRequest, StreamEvent,
    DEFAULT_REASONING_MODEL, DEFAULT_VISION_MODEL,
};
use nebula_conductor::{BackendKind, ConductorError, NebulaConfig};

const API_KEY: &str = "sk-test";

fn frame(delta: serde_json::Value) -> String {
    format!("data: {}\n\n", json!({ "choices": [{ "delta": delta }] }))
}

fn client(server: &Server, profile: BackendProfile) -> ChatCompletionClient {
    ChatCompletionClient::new(profile, format!("{}/v1", server.url()), API_KEY).unwrap()
}

/// Receive events up to and including the terminal one
async fn collect(mut rx: mpsc::Receiver<StreamEvent>) -> Vec<StreamEvent> {
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        let terminal = event.is_terminal();
        events.push(event);
        if terminal {
            break;
        }
    }
    events
}

fn contents(events: &[StreamEvent]) -> Vec<&str> {
    events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::Content(text) => Some(text.as_str()),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_stream_reasoning_then_content() {
    let mut server = Server::new_async().await;

    let body = [
        frame(json!({ "reasoning_content": "先想一想" })),
        frame(json!({ "content": "一加一" })),
        frame(json!({ "content": "等于二" })),
        "data: [DONE]\n\n".to_string(),
    ]
    .concat();
    // Split inside the first byte sequence of "加" so a character straddles chunks
    let split = body.find('加').unwrap() + 1;
    let (head, tail) = body.as_bytes().split_at(split);
    let (head, tail) = (head.to_vec(), tail.to_vec());

    let mock = server
        .mock("POST", "/v1/chat/completions")
        .match_header("authorization", "Bearer sk-test")
        .match_body(Matcher::PartialJson(json!({
            "model": DEFAULT_REASONING_MODEL,
            "stream": true,
            "extra_body": { "enable_thinking": true }
        })))
        .with_status(200)
        .with_header("content-type", "text/event-stream")
        .with_chunked_body(move |w| {
            w.write_all(&head)?;
            w.flush()?;
            w.write_all(&tail)
        })
        .create_async()
        .await;

    let client = client(&server, BackendProfile::reasoning());
    let rx = client
        .stream_complete(&CompletionRequest::new("1+1=?"))
        .await
        .unwrap();
    let events = collect(rx).await;

    mock.assert_async().await;
    assert!(matches!(&events[0], StreamEvent::Reasoning(text) if text == "先想一想"));
    assert_eq!(contents(&events), vec!["一加一", "等于二"]);
    match events.last() {
        Some(StreamEvent::Done { reasoning, content }) => {
            assert_eq!(reasoning, "先想一想");
            assert_eq!(content, "一加一等于二");
        }
        other => panic!("expected Done, got {other:?}"),
    }
}

#[tokio::test]
async fn test_stream_sanitizes_and_skips_noise() {
    let mut server = Server::new_async().await;

    let body = [
        ": keep-alive\n\n".to_string(),
        "data: {not json}\n\n".to_string(),
        frame(json!({ "content": "这是**重点**😀" })),
        frame(json!({ "content": "🎉" })),
        frame(json!({ "content": "" })),
        // Last frame has no trailing newline and no [DONE]
        format!("data: {}", json!({ "choices": [{ "delta": { "content": "结束" } }] })),
    ]
    .concat();

    let _mock = server
        .mock("POST", "/v1/chat/completions")
        .with_status(200)
        .with_header("content-type", "text/event-stream")
        .with_body(body)
        .create_async()
        .await;

    let client = client(&server, BackendProfile::reasoning());
    let events = collect(
        client
            .stream_complete(&CompletionRequest::new("重点是什么"))
            .await
            .unwrap(),
    )
    .await;

    assert_eq!(contents(&events), vec!["这是重点", "结束"]);
    assert!(matches!(
        events.last(),
        Some(StreamEvent::Done { content, .. }) if content == "这是重点结束"
    ));
}

#[tokio::test]
async fn test_vision_request_carries_image() {
    let mut server = Server::new_async().await;

    let mock = server
        .mock("POST", "/v1/chat/completions")
        .match_header("authorization", "Bearer sk-test")
        .match_body(Matcher::AllOf(vec![
            Matcher::PartialJson(json!({ "model": DEFAULT_VISION_MODEL, "stream": true })),
            Matcher::Regex(r#""image_url":\{"url":"https://example.com/tri.png"\}"#.to_string()),
        ]))
        .with_status(200)
        .with_body([frame(json!({ "content": "三角形" })), "data: [DONE]\n\n".to_string()].concat())
        .create_async()
        .await;

    let client = client(&server, BackendProfile::vision());
    let request = CompletionRequest::new("这是什么图形？").with_image("https://example.com/tri.png");
    let events = collect(client.stream_complete(&request).await.unwrap()).await;

    mock.assert_async().await;
    assert_eq!(contents(&events), vec!["三角形"]);
}

#[tokio::test]
async fn test_image_rejected_by_text_backend() {
    let server = Server::new_async().await;

    let client = client(&server, BackendProfile::reasoning());
    let request = CompletionRequest::new("看图").with_image("https://example.com/tri.png");

    let err = client.stream_complete(&request).await.unwrap_err();
    assert!(matches!(err, ConductorError::UnsupportedInput { .. }));
}

#[tokio::test]
async fn test_http_error_status() {
    let mut server = Server::new_async().await;

    let _mock = server
        .mock("POST", "/v1/chat/completions")
        .with_status(401)
        .with_body(r#"{"error":"invalid api key"}"#)
        .create_async()
        .await;

    let client = client(&server, BackendProfile::reasoning());
    let err = client
        .stream_complete(&CompletionRequest::new("1+1=?"))
        .await
        .unwrap_err();

    match err {
        ConductorError::HttpStatus { status, body } => {
            assert_eq!(status, 401);
            assert!(body.contains("invalid api key"));
        }
        other => panic!("expected HttpStatus, got {other:?}"),
    }
}

#[tokio::test]
async fn test_complete_returns_sanitized_answer() {
    let mut server = Server::new_async().await;

    let mock = server
        .mock("POST", "/v1/chat/completions")
        .match_body(Matcher::PartialJson(json!({ "stream": false })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!({
                "choices": [{ "message": { "role": "assistant", "content": "**一加一**等于二😀" } }]
            })
            .to_string(),
        )
        .create_async()
        .await;

    let client = client(&server, BackendProfile::reasoning());
    let response = client.complete(&CompletionRequest::new("1+1=?")).await.unwrap();

    mock.assert_async().await;
    assert_eq!(response.content, "一加一等于二");
    assert_eq!(response.model, DEFAULT_REASONING_MODEL);
}

#[tokio::test]
async fn test_configured_selector_reaches_endpoint() {
    let mut server = Server::new_async().await;

    let mock = server
        .mock("POST", "/v1/chat/completions")
        .match_header("authorization", "Bearer sk-config")
        .match_body(Matcher::PartialJson(json!({ "model": "custom/model" })))
        .with_status(200)
        .with_body([frame(json!({ "content": "好" })), "data: [DONE]\n\n".to_string()].concat())
        .create_async()
        .await;

    let mut config = NebulaConfig::new();
    config.reasoning.base_url = format!("{}/v1", server.url());
    config.reasoning.api_key = "sk-config".to_string();
    config.reasoning.model = "custom/model".to_string();

    let selector = config.backend_selector().unwrap();
    let backend = selector.backend(BackendKind::Reasoning);
    assert!(backend.has_valid_config());
    assert!(!selector.backend(BackendKind::Vision).has_valid_config());

    let events = collect(
        backend
            .stream_complete(&CompletionRequest::new("你好"))
            .await
            .unwrap(),
    )
    .await;

    mock.assert_async().await;
    assert_eq!(contents(&events), vec!["好"]);
}

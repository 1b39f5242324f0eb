//! HTTP completion backend against a mock OpenAI-compatible server

use std::time::Duration;

use serde_json::json;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use clubbot::error::CompletionError;
use clubbot::services::completion::{CompletionService, HttpCompletion};

fn client(server: &MockServer, api_key: Option<&str>) -> HttpCompletion {
    HttpCompletion::new(
        &format!("{}/v1", server.uri()),
        "test-model".to_string(),
        api_key.map(str::to_string),
        Duration::from_secs(5),
    )
    .unwrap()
}

#[tokio::test]
async fn test_returns_first_choice() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer secret"))
        .and(body_partial_json(json!({
            "model": "test-model",
            "messages": [{"role": "user", "content": "hello"}]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"message": {"role": "assistant", "content": "  hi there \n"}}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let answer = client(&server, Some("secret"))
        .complete(CancellationToken::new(), "hello")
        .await
        .unwrap();
    assert_eq!(answer, "hi there");
}

#[tokio::test]
async fn test_error_status_is_request_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
        .mount(&server)
        .await;

    let result = client(&server, None).complete(CancellationToken::new(), "hello").await;
    match result {
        Err(CompletionError::Request(msg)) => assert!(msg.contains("502")),
        other => panic!("unexpected result: {other:?}"),
    }
}

#[tokio::test]
async fn test_empty_choices_is_malformed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"choices": []})))
        .mount(&server)
        .await;

    let result = client(&server, None).complete(CancellationToken::new(), "hello").await;
    assert!(matches!(result, Err(CompletionError::Malformed(_))));
}

#[tokio::test]
async fn test_cancel_abandons_slow_request() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"choices": [{"message": {"role": "assistant", "content": "late"}}]}))
                .set_delay(Duration::from_secs(30)),
        )
        .mount(&server)
        .await;

    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let started = std::time::Instant::now();
    let result = client(&server, None).complete(token, "hello").await;
    assert!(matches!(result, Err(CompletionError::Cancelled)));
    assert!(started.elapsed() < Duration::from_secs(5));
}

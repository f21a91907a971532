//! Integration tests for OpenRouterProvider against a mock server

use chat_llm::{
    ChatRequest, ErrorKind, LLMChunk, LLMError, LLMProvider, OpenRouterProvider, PromptMessage,
};
use futures::StreamExt;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn provider(server: &MockServer) -> OpenRouterProvider {
    OpenRouterProvider::new(Some("sk-or-test".to_string()))
        .expect("provider")
        .with_base_url(format!("{}/api/v1", server.uri()))
        .with_app("http://localhost:3000", "AI Agent Chat")
}

fn request() -> ChatRequest {
    ChatRequest::new(
        "openai/gpt-4o",
        vec![
            PromptMessage::system("Use markdown."),
            PromptMessage::user("Hello"),
        ],
    )
}

#[tokio::test]
async fn test_stream_yields_fragments_in_order() {
    let server = MockServer::start().await;

    let sse_body = concat!(
        ": OPENROUTER PROCESSING\n\n",
        "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\"lo, \"}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\"world!\"},\"finish_reason\":\"stop\"}]}\n\n",
        "data: [DONE]\n\n",
    );

    Mock::given(method("POST"))
        .and(path("/api/v1/chat/completions"))
        .and(header("authorization", "Bearer sk-or-test"))
        .and(header("HTTP-Referer", "http://localhost:3000"))
        .and(header("X-Title", "AI Agent Chat"))
        .and(body_partial_json(serde_json::json!({
            "model": "openai/gpt-4o",
            "stream": true,
            "max_tokens": 2000,
        })))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(sse_body),
        )
        .expect(1)
        .mount(&server)
        .await;

    let stream = provider(&server).chat_stream(&request()).await.expect("stream");
    let fragments: Vec<String> = stream
        .map(|chunk| match chunk.expect("chunk") {
            LLMChunk::Token(text) => text,
            LLMChunk::Done => panic!("Done is consumed by the provider"),
        })
        .collect()
        .await;

    assert_eq!(fragments, vec!["Hel", "lo, ", "world!"]);
    assert_eq!(fragments.concat(), "Hello, world!");
}

#[tokio::test]
async fn test_non_success_status_is_upstream_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/v1/chat/completions"))
        .respond_with(
            ResponseTemplate::new(429)
                .set_body_json(serde_json::json!({"error": {"message": "Rate limit exceeded"}})),
        )
        .mount(&server)
        .await;

    let err = provider(&server).chat_stream(&request()).await.err().expect("error");

    assert_eq!(err.kind(), ErrorKind::Upstream);
    assert_eq!(err.status(), Some(429));
    assert!(err.to_string().contains("Rate limit exceeded"));
}

#[tokio::test]
async fn test_unauthorized_is_configuration_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/v1/chat/completions"))
        .respond_with(
            ResponseTemplate::new(401).set_body_json(serde_json::json!({"error": "Invalid API key"})),
        )
        .mount(&server)
        .await;

    let err = provider(&server).chat(&request()).await.expect_err("error");

    assert!(matches!(err, LLMError::Auth(ref message) if message == "Invalid API key"));
    assert_eq!(err.kind(), ErrorKind::Configuration);
}

#[tokio::test]
async fn test_non_streaming_returns_content_model_usage() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/v1/chat/completions"))
        .and(body_partial_json(serde_json::json!({"stream": false})))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": "gen-123",
            "model": "openai/gpt-4o",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": "Hello!"},
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 12, "completion_tokens": 3, "total_tokens": 15}
        })))
        .mount(&server)
        .await;

    let completion = provider(&server).chat(&request()).await.expect("completion");

    assert_eq!(completion.content, "Hello!");
    assert_eq!(completion.model, "openai/gpt-4o");
    assert_eq!(completion.usage.map(|u| u.total_tokens), Some(15));
}

#[tokio::test]
async fn test_non_streaming_without_message_is_parse_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"choices": []})))
        .mount(&server)
        .await;

    let err = provider(&server).chat(&request()).await.expect_err("error");
    assert_eq!(err.kind(), ErrorKind::Parse);
}

#[tokio::test]
async fn test_malformed_event_ends_stream_with_parse_error() {
    let server = MockServer::start().await;

    let sse_body = concat!(
        "data: {\"choices\":[{\"delta\":{\"content\":\"par\"}}]}\n\n",
        "data: {broken\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\"never\"}}]}\n\n",
    );

    Mock::given(method("POST"))
        .and(path("/api/v1/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(sse_body),
        )
        .mount(&server)
        .await;

    let mut stream = provider(&server).chat_stream(&request()).await.expect("stream");

    assert_eq!(
        stream.next().await.expect("item").expect("chunk"),
        LLMChunk::Token("par".to_string())
    );
    let err = stream.next().await.expect("item").expect_err("error");
    assert!(matches!(err, LLMError::Parse(_)));
    assert_eq!(err.kind(), ErrorKind::Parse);
    assert!(stream.next().await.is_none());
}

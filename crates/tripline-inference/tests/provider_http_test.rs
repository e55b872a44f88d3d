//! HTTP-level tests for the vendor providers against local mock servers.
//!
//! Verifies request shape (endpoint, auth headers, system prompt), usage
//! extraction, and the transient/permanent classification of failures.

use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use tripline_inference::{
    AiProvider, ClaudeBackend, ClaudeConfig, DeepSeekBackend, DeepSeekConfig, Error,
    GeminiBackend, GeminiConfig, OpenAIBackend, OpenAIConfig,
};

fn openai(server: &MockServer) -> OpenAIBackend {
    OpenAIBackend::new(OpenAIConfig {
        base_url: server.uri(),
        api_key: "sk-test".to_string(),
        ..Default::default()
    })
    .unwrap()
}

fn openai_success(content: &str) -> serde_json::Value {
    json!({
        "id": "chatcmpl-123",
        "object": "chat.completion",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": content},
            "finish_reason": "stop"
        }],
        "usage": {"prompt_tokens": 40, "completion_tokens": 8, "total_tokens": 48}
    })
}

#[tokio::test]
async fn test_openai_sends_bearer_and_system_prompt() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("Authorization", "Bearer sk-test"))
        .and(body_partial_json(json!({
            "model": "gpt-4o-mini",
            "messages": [
                {"role": "system", "content": "You are a helpful assistant for travel booking analysis."},
                {"role": "user", "content": "hello"}
            ]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(openai_success("[]")))
        .expect(1)
        .mount(&server)
        .await;

    let output = openai(&server).generate_content("hello").await.unwrap();
    assert_eq!(output.content, "[]");
    assert_eq!(output.usage.input_tokens, 40);
    assert_eq!(output.usage.output_tokens, 8);
    assert!(!output.usage.estimated);
}

#[tokio::test]
async fn test_openai_missing_usage_is_estimated() {
    let server = MockServer::start().await;
    let mut body = openai_success("abcdefgh");
    body.as_object_mut().unwrap().remove("usage");
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(&server)
        .await;

    let output = openai(&server).generate_content("abcdefghijkl").await.unwrap();
    assert!(output.usage.estimated);
    assert_eq!(output.usage.input_tokens, 3);
    assert_eq!(output.usage.output_tokens, 2);
}

#[tokio::test]
async fn test_rate_limit_is_transient() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(429).set_body_json(json!({
            "error": {"message": "Rate limit reached for gpt-4o-mini", "type": "requests"}
        })))
        .mount(&server)
        .await;

    let err = openai(&server).generate_content("hi").await.unwrap_err();
    assert!(err.is_transient());
    match err {
        Error::ProviderCall(e) => {
            assert_eq!(e.status, Some(429));
            assert!(e.message.contains("Rate limit reached"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_server_error_is_transient_and_auth_is_permanent() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("Authorization", "Bearer sk-test"))
        .respond_with(ResponseTemplate::new(503).set_body_string("upstream unavailable"))
        .mount(&server)
        .await;
    assert!(openai(&server).generate_content("hi").await.unwrap_err().is_transient());

    let auth_server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": {"message": "Incorrect API key provided", "type": "invalid_request_error"}
        })))
        .mount(&auth_server)
        .await;
    let err = openai(&auth_server).generate_content("hi").await.unwrap_err();
    assert!(!err.is_transient());
    assert!(matches!(err, Error::ProviderCall(_)));
}

#[tokio::test]
async fn test_malformed_success_body_is_transient() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>gateway</html>"))
        .mount(&server)
        .await;
    assert!(openai(&server).generate_content("hi").await.unwrap_err().is_transient());
}

#[tokio::test]
async fn test_gemini_request_and_usage() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/models/gemini-2.5-flash:generateContent"))
        .and(header("x-goog-api-key", "AIza-test"))
        .and(body_partial_json(json!({
            "generationConfig": {"temperature": 0.1, "maxOutputTokens": 4096}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "candidates": [{
                "content": {"parts": [{"text": "{\"outcome\": \"booking\"}"}], "role": "model"},
                "finishReason": "STOP"
            }],
            "usageMetadata": {"promptTokenCount": 120, "candidatesTokenCount": 30}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let backend = GeminiBackend::new(GeminiConfig {
        base_url: server.uri(),
        api_key: "AIza-test".to_string(),
        ..Default::default()
    })
    .unwrap();
    let output = backend.generate_content("email body").await.unwrap();
    assert_eq!(output.content, "{\"outcome\": \"booking\"}");
    assert_eq!(output.usage.total_tokens, 150);

    let cost = backend.estimate_cost(output.usage.input_tokens, output.usage.output_tokens);
    assert!(cost.total_cost_usd > 0.0);
}

#[tokio::test]
async fn test_gemini_quota_exhausted_is_transient() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429).set_body_json(json!({
            "error": {"code": 429, "message": "Quota exceeded", "status": "RESOURCE_EXHAUSTED"}
        })))
        .mount(&server)
        .await;
    let backend = GeminiBackend::new(GeminiConfig {
        base_url: server.uri(),
        api_key: "AIza-test".to_string(),
        ..Default::default()
    })
    .unwrap();
    assert!(backend.generate_content("x").await.unwrap_err().is_transient());
}

#[tokio::test]
async fn test_claude_headers_and_overloaded() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/messages"))
        .and(header("x-api-key", "sk-ant-test"))
        .and(header("anthropic-version", "2023-06-01"))
        .and(body_partial_json(json!({
            "max_tokens": 4096,
            "system": "You are a helpful assistant for travel booking analysis."
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "msg_1",
            "type": "message",
            "role": "assistant",
            "content": [{"type": "text", "text": "[]"}],
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 25, "output_tokens": 2}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let backend = ClaudeBackend::new(ClaudeConfig {
        base_url: server.uri(),
        api_key: "sk-ant-test".to_string(),
        ..Default::default()
    })
    .unwrap();
    let output = backend.generate_content("p").await.unwrap();
    assert_eq!(output.content, "[]");
    assert_eq!(output.usage.input_tokens, 25);

    let overloaded = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(529).set_body_json(json!({
            "type": "error",
            "error": {"type": "overloaded_error", "message": "Overloaded"}
        })))
        .mount(&overloaded)
        .await;
    let backend = ClaudeBackend::new(ClaudeConfig {
        base_url: overloaded.uri(),
        api_key: "sk-ant-test".to_string(),
        ..Default::default()
    })
    .unwrap();
    assert!(backend.generate_content("p").await.unwrap_err().is_transient());
}

#[tokio::test]
async fn test_deepseek_strips_reasoning_and_reads_counts() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .and(body_partial_json(json!({"stream": false, "model": "deepseek-r1:7b"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "model": "deepseek-r1:7b",
            "message": {"role": "assistant", "content": "<think>weighing options</think>\n[{\"id\": 1}]"},
            "done": true,
            "prompt_eval_count": 64,
            "eval_count": 12
        })))
        .expect(1)
        .mount(&server)
        .await;

    let backend = DeepSeekBackend::new(DeepSeekConfig {
        base_url: server.uri(),
        ..Default::default()
    })
    .unwrap();
    let output = backend.generate_content("classify").await.unwrap();
    assert_eq!(output.content, "[{\"id\": 1}]");
    assert_eq!(output.usage.input_tokens, 64);
    assert!(!output.usage.estimated);
    assert_eq!(backend.estimate_cost(64, 12).total_cost_usd, 0.0);
}

#[tokio::test]
async fn test_deepseek_health_check() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "models": [{"name": "deepseek-r1:7b"}, {"name": "llama3:8b"}]
        })))
        .mount(&server)
        .await;

    let present = DeepSeekBackend::new(DeepSeekConfig {
        base_url: server.uri(),
        ..Default::default()
    })
    .unwrap();
    assert!(present.health_check().await.unwrap());

    let missing = DeepSeekBackend::new(DeepSeekConfig {
        base_url: server.uri(),
        model: "deepseek-r1:70b".to_string(),
        ..Default::default()
    })
    .unwrap();
    assert!(!missing.health_check().await.unwrap());
}

#[tokio::test]
async fn test_unreachable_server_is_transient() {
    // Nothing listens on port 9 of localhost in test environments.
    let backend = DeepSeekBackend::new(DeepSeekConfig {
        base_url: "http://127.0.0.1:9".to_string(),
        ..Default::default()
    })
    .unwrap();
    assert!(backend.generate_content("x").await.unwrap_err().is_transient());
}

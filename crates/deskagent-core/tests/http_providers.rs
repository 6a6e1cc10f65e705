//! HTTP adapter tests against a local mock server.
//!
//! Each test serves a canned SSE body and checks the envelopes the adapter
//! yields, the request it sent, and its failure modes.

use std::time::Duration;

use deskagent_core::{
    AgentConfig, AgentError, AgentResponse, CancellationToken, ContentBlock, GenerateRequest,
    Message, ProviderId, ProviderRegistry, Role, TokenUsage, ToolDefinition,
};
use futures::StreamExt;
use serde_json::{Value, json};
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn sse(events: &[(&str, Value)]) -> String {
    events
        .iter()
        .map(|(name, data)| {
            if name.is_empty() {
                format!("data: {data}\n\n")
            } else {
                format!("event: {name}\ndata: {data}\n\n")
            }
        })
        .collect()
}

fn event_stream(body: String) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(body, "text/event-stream")
}

fn click_tool() -> ToolDefinition {
    ToolDefinition {
        name: "click".into(),
        description: "Click at a screen position".into(),
        input_schema: json!({
            "type": "object",
            "properties": { "x": { "type": "integer" }, "y": { "type": "integer" } }
        }),
    }
}

fn request(model: &str) -> GenerateRequest {
    GenerateRequest::new(
        "You control a Linux desktop.",
        vec![Message::user("open browser")],
        model,
    )
}

async fn collect(
    registry: &ProviderRegistry,
    provider: ProviderId,
    request: GenerateRequest,
) -> Vec<AgentResponse> {
    registry
        .generate_message(provider, request, CancellationToken::new())
        .unwrap()
        .map(|r| r.unwrap())
        .collect()
        .await
}

async fn sent_body(server: &MockServer) -> Value {
    let requests = server.received_requests().await.unwrap();
    serde_json::from_slice(&requests[0].body).unwrap()
}

// ═══════════════════════════════════════════════════════════════════════
//  Anthropic
// ═══════════════════════════════════════════════════════════════════════

fn anthropic_registry(server: &MockServer) -> ProviderRegistry {
    ProviderRegistry::from_config(&AgentConfig {
        anthropic_api_key: Some("test-key".into()),
        anthropic_base_url: server.uri(),
        tools: vec![click_tool()],
        ..AgentConfig::default()
    })
    .unwrap()
}

#[tokio::test]
async fn anthropic_streams_text_and_tool_call() {
    let server = MockServer::start().await;
    let body = sse(&[
        ("message_start", json!({"type": "message_start", "message": {"id": "msg_1", "usage": {"input_tokens": 50, "output_tokens": 1}}})),
        ("content_block_start", json!({"type": "content_block_start", "index": 0, "content_block": {"type": "text", "text": ""}})),
        ("ping", json!({"type": "ping"})),
        ("content_block_delta", json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": "Opening browser"}})),
        ("content_block_stop", json!({"type": "content_block_stop", "index": 0})),
        ("content_block_start", json!({"type": "content_block_start", "index": 1, "content_block": {"type": "tool_use", "id": "t1", "name": "mcp__desktop__click", "input": {}}})),
        ("content_block_delta", json!({"type": "content_block_delta", "index": 1, "delta": {"type": "input_json_delta", "partial_json": "{\"x\": 10, \"y\": 20}"}})),
        ("content_block_stop", json!({"type": "content_block_stop", "index": 1})),
        ("message_delta", json!({"type": "message_delta", "delta": {"stop_reason": "tool_use"}, "usage": {"output_tokens": 25}})),
        ("message_stop", json!({"type": "message_stop"})),
    ]);
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .and(header("x-api-key", "test-key"))
        .and(header("anthropic-version", "2023-06-01"))
        .respond_with(event_stream(body))
        .expect(1)
        .mount(&server)
        .await;

    let registry = anthropic_registry(&server);
    let out = collect(&registry, ProviderId::Anthropic, request("claude-sonnet-4-20250514")).await;

    assert_eq!(out.len(), 3);
    assert_eq!(out[0].content_blocks, vec![ContentBlock::text("Opening browser")]);
    assert_eq!(
        out[1].content_blocks,
        vec![ContentBlock::tool_use("t1", "click", json!({"x": 10, "y": 20}))]
    );
    assert!(out[2].is_terminal());
    assert_eq!(out[2].stop_reason.as_deref(), Some("tool_use"));
    assert_eq!(out[2].token_usage, TokenUsage::new(50, 25));

    let sent = sent_body(&server).await;
    assert_eq!(sent["stream"], true);
    assert_eq!(sent["tools"][0]["name"], "mcp__desktop__click");
    assert_eq!(sent["system"], "You control a Linux desktop.");
}

#[tokio::test]
async fn anthropic_http_error_surfaces_through_stream() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(429).set_body_string("rate limited"))
        .mount(&server)
        .await;

    let registry = anthropic_registry(&server);
    let mut stream = registry
        .generate_message(
            ProviderId::Anthropic,
            request("claude-sonnet-4-20250514"),
            CancellationToken::new(),
        )
        .unwrap();

    match stream.next().await {
        Some(Err(AgentError::LlmRequestFailed { reason })) => {
            assert!(reason.contains("429"));
            assert!(reason.contains("rate limited"));
        }
        other => panic!("unexpected item: {other:?}"),
    }
    assert!(stream.next().await.is_none());
}

#[tokio::test]
async fn anthropic_truncated_stream_is_an_error() {
    let server = MockServer::start().await;
    let body = sse(&[
        ("content_block_start", json!({"type": "content_block_start", "index": 0, "content_block": {"type": "text", "text": "Hel"}})),
        ("content_block_stop", json!({"type": "content_block_stop", "index": 0})),
    ]);
    Mock::given(method("POST"))
        .respond_with(event_stream(body))
        .mount(&server)
        .await;

    let registry = anthropic_registry(&server);
    let results: Vec<_> = registry
        .generate_message(
            ProviderId::Anthropic,
            request("claude-sonnet-4-20250514"),
            CancellationToken::new(),
        )
        .unwrap()
        .collect()
        .await;

    assert_eq!(results.len(), 2);
    assert_eq!(
        results[0].as_ref().unwrap().content_blocks,
        vec![ContentBlock::text("Hel")]
    );
    assert!(matches!(results[1], Err(AgentError::LlmStreamError { .. })));
}

#[tokio::test]
async fn cancelling_a_pending_request_ends_quietly() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(event_stream(String::new()).set_delay(Duration::from_secs(30)))
        .mount(&server)
        .await;

    let registry = anthropic_registry(&server);
    let cancel = CancellationToken::new();
    let mut stream = registry
        .generate_message(
            ProviderId::Anthropic,
            request("claude-sonnet-4-20250514"),
            cancel.clone(),
        )
        .unwrap();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let next = tokio::time::timeout(Duration::from_secs(5), stream.next())
        .await
        .expect("stream should end promptly after cancellation");
    assert!(next.is_none());
}

// ═══════════════════════════════════════════════════════════════════════
//  OpenAI and proxy
// ═══════════════════════════════════════════════════════════════════════

fn openai_body() -> String {
    let mut body = sse(&[
        ("", json!({"choices": [{"index": 0, "delta": {"role": "assistant", "content": "Opening browser"}, "finish_reason": null}]})),
        ("", json!({"choices": [{"index": 0, "delta": {"tool_calls": [{"index": 0, "id": "call_1", "type": "function", "function": {"name": "mcp__desktop__click", "arguments": "{\"x\":10,"}}]}, "finish_reason": null}]})),
        ("", json!({"choices": [{"index": 0, "delta": {"tool_calls": [{"index": 0, "function": {"arguments": "\"y\":20}"}}]}, "finish_reason": null}]})),
        ("", json!({"choices": [{"index": 0, "delta": {"tool_calls": [{"index": 1, "id": "call_2", "type": "function", "function": {"name": "computer", "arguments": "{}"}}]}, "finish_reason": null}]})),
        ("", json!({"choices": [{"index": 0, "delta": {}, "finish_reason": "tool_calls"}]})),
        ("", json!({"choices": [], "usage": {"prompt_tokens": 80, "completion_tokens": 12, "total_tokens": 92}})),
    ]);
    body.push_str("data: [DONE]\n\n");
    body
}

#[tokio::test]
async fn openai_streams_text_and_filters_tools() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer sk-test"))
        .respond_with(event_stream(openai_body()))
        .expect(1)
        .mount(&server)
        .await;

    let registry = ProviderRegistry::from_config(&AgentConfig {
        openai_api_key: Some("sk-test".into()),
        openai_base_url: format!("{}/v1", server.uri()),
        tools: vec![click_tool()],
        ..AgentConfig::default()
    })
    .unwrap();
    let out = collect(&registry, ProviderId::OpenAi, request("gpt-4.1-2025-04-14")).await;

    assert_eq!(out.len(), 3, "the foreign `computer` call is dropped");
    assert_eq!(out[0].content_blocks, vec![ContentBlock::text("Opening browser")]);
    assert_eq!(
        out[1].content_blocks,
        vec![ContentBlock::tool_use("call_1", "click", json!({"x": 10, "y": 20}))]
    );
    assert_eq!(out[2].stop_reason.as_deref(), Some("tool_calls"));
    assert_eq!(out[2].token_usage.total_tokens, 92);

    let sent = sent_body(&server).await;
    assert_eq!(sent["tools"][0]["function"]["name"], "mcp__desktop__click");
    assert_eq!(sent["stream_options"]["include_usage"], true);
    assert_eq!(sent["messages"][0]["role"], "system");
}

#[tokio::test]
async fn proxy_without_tools_yields_no_tool_calls() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(event_stream(openai_body()))
        .mount(&server)
        .await;

    let registry = ProviderRegistry::from_config(&AgentConfig {
        proxy_url: Some(server.uri()),
        tools: vec![click_tool()],
        ..AgentConfig::default()
    })
    .unwrap();
    let out = collect(
        &registry,
        ProviderId::Proxy,
        request("ollama/qwen2.5-vl").with_tools(false),
    )
    .await;

    assert!(out.iter().all(|e| e.tool_uses().next().is_none()));
    assert_eq!(out[0].content_blocks, vec![ContentBlock::text("Opening browser")]);
    assert!(out.last().unwrap().is_terminal());

    let sent = sent_body(&server).await;
    assert!(sent.get("tools").is_none());
    assert_eq!(sent["model"], "ollama/qwen2.5-vl");
}

// ═══════════════════════════════════════════════════════════════════════
//  Google
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn google_streams_thoughts_text_and_calls() {
    let server = MockServer::start().await;
    let body = sse(&[
        ("", json!({"candidates": [{"content": {"role": "model", "parts": [{"text": "Find the dock.", "thought": true}]}}]})),
        ("", json!({"candidates": [{"content": {"role": "model", "parts": [{"text": "Opening browser"}]}}]})),
        ("", json!({
            "candidates": [{
                "content": {"role": "model", "parts": [{"functionCall": {"name": "mcp__desktop__click", "args": {"x": 10, "y": 20}}}]},
                "finishReason": "STOP"
            }],
            "usageMetadata": {"promptTokenCount": 70, "candidatesTokenCount": 15, "totalTokenCount": 85}
        })),
    ]);
    Mock::given(method("POST"))
        .and(path("/models/gemini-2.5-flash:streamGenerateContent"))
        .and(query_param("alt", "sse"))
        .and(header("x-goog-api-key", "AIza-test"))
        .respond_with(event_stream(body))
        .expect(1)
        .mount(&server)
        .await;

    let registry = ProviderRegistry::from_config(&AgentConfig {
        gemini_api_key: Some("AIza-test".into()),
        gemini_base_url: server.uri(),
        tools: vec![click_tool()],
        ..AgentConfig::default()
    })
    .unwrap();
    let out = collect(&registry, ProviderId::Google, request("gemini-2.5-flash")).await;

    assert_eq!(out.len(), 4);
    assert_eq!(out[0].content_blocks, vec![ContentBlock::thinking("Find the dock.", "")]);
    assert_eq!(out[1].content_blocks, vec![ContentBlock::text("Opening browser")]);
    match &out[2].content_blocks[..] {
        [ContentBlock::ToolUse { id, name, input, .. }] => {
            assert!(!id.is_empty());
            assert_eq!(name, "click");
            assert_eq!(input, &json!({"x": 10, "y": 20}));
        }
        other => panic!("unexpected blocks: {other:?}"),
    }
    assert_eq!(out[3].role, Role::Assistant);
    assert_eq!(out[3].stop_reason.as_deref(), Some("STOP"));
    assert_eq!(out[3].token_usage.total_tokens, 85);

    let sent = sent_body(&server).await;
    assert_eq!(
        sent["tools"][0]["functionDeclarations"][0]["name"],
        "mcp__desktop__click"
    );
}

// ═══════════════════════════════════════════════════════════════════════
//  Registry
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn registry_reports_unconfigured_providers() {
    let registry = ProviderRegistry::from_config(&AgentConfig::default()).unwrap();
    assert!(registry.providers().is_empty());

    let err = registry
        .generate_message(
            ProviderId::Google,
            request("gemini-2.5-flash"),
            CancellationToken::new(),
        )
        .err()
        .unwrap();
    assert!(err.is_configuration());
}

//! OpenAI Chat Completions adapter.
//!
//! Chat Completions streams flat deltas rather than delimited blocks, so
//! the translator closes a block whenever the next one starts: text and
//! reasoning are flushed when a tool call begins, a tool call when the next
//! index appears, and everything pending at `finish_reason`.  The terminal
//! envelope is emitted at `[DONE]`, after the usage chunk.
//!
//! The request and translation halves are shared with [`super::proxy`].

use std::collections::BTreeMap;

use reqwest::RequestBuilder;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::cancel::CancellationBridge;
use crate::config::AgentConfig;
use crate::error::{AgentError, Result};
use crate::model::{
    AgentModel, AgentResponse, ContentBlock, ImageSource, Message, MessageContent, ProviderId,
    Role, TokenUsage, ToolDefinition, builtin_models,
};
use crate::namespace::ToolNamespace;
use crate::providers::driver::{BlockEmitter, Translator, drive};
use crate::providers::http::{build_client, join_url, sse_frames};
use crate::providers::sse::SseFrame;
use crate::providers::{GenerateRequest, ProviderAdapter, ResponseStream, validate_request};

/// Request-shape differences between OpenAI proper and compatible gateways.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Dialect {
    /// `api.openai.com`: reasoning models require `max_completion_tokens`.
    OpenAi,
    /// OpenAI-compatible servers, which generally only know `max_tokens`.
    Compatible,
}

// ---------------------------------------------------------------------------
// Adapter
// ---------------------------------------------------------------------------

/// Streams turns from the OpenAI Chat Completions API.
#[derive(Debug, Clone)]
pub struct OpenAiAdapter {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    max_tokens: u32,
    namespace: ToolNamespace,
    tools: Vec<ToolDefinition>,
}

impl OpenAiAdapter {
    pub fn from_config(config: &AgentConfig) -> Result<Self> {
        let api_key = config
            .openai_api_key
            .clone()
            .ok_or_else(|| AgentError::MissingApiKey {
                provider: ProviderId::OpenAi.to_string(),
            })?;

        Ok(Self {
            http: build_client()?,
            api_key,
            base_url: config.openai_base_url.clone(),
            max_tokens: config.max_tokens,
            namespace: config.namespace()?,
            tools: config.tools.clone(),
        })
    }
}

impl ProviderAdapter for OpenAiAdapter {
    fn id(&self) -> ProviderId {
        ProviderId::OpenAi
    }

    fn models(&self) -> Vec<AgentModel> {
        builtin_models(ProviderId::OpenAi)
    }

    fn generate_message(
        &self,
        request: GenerateRequest,
        cancel: CancellationToken,
    ) -> Result<ResponseStream> {
        validate_request(self.id(), &self.models(), false, &request)?;

        let body = build_request_body(
            &request,
            &self.namespace,
            &self.tools,
            self.max_tokens,
            Dialect::OpenAi,
        );
        let builder = chat_request(
            &self.http,
            &self.base_url,
            Some(&self.api_key),
            &body,
            self.id(),
        );

        let bridge = CancellationBridge::new(&cancel);
        let frames = sse_frames(builder, self.id(), bridge.session_token());
        let translator = OpenAiTranslator::new(
            self.id(),
            BlockEmitter::new(self.namespace.clone(), request.use_tools),
        );
        Ok(drive(self.id(), frames, translator, bridge))
    }
}

/// `POST {base_url}/chat/completions` with optional Bearer auth.
pub(crate) fn chat_request(
    http: &reqwest::Client,
    base_url: &str,
    api_key: Option<&str>,
    body: &Value,
    provider: ProviderId,
) -> RequestBuilder {
    let url = join_url(base_url, "chat/completions");
    debug!(url = %url, model = %body["model"], %provider, "sending LLM request");

    let builder = http.post(url).json(body);
    match api_key {
        Some(key) => builder.bearer_auth(key),
        None => builder,
    }
}

// ---------------------------------------------------------------------------
// Request conversion
// ---------------------------------------------------------------------------

/// Build the Chat Completions request body.
pub(crate) fn build_request_body(
    request: &GenerateRequest,
    namespace: &ToolNamespace,
    tools: &[ToolDefinition],
    max_tokens: u32,
    dialect: Dialect,
) -> Value {
    let mut body = json!({
        "model": request.model,
        "messages": messages_to_openai(&request.system_prompt, &request.messages, namespace),
        "stream": true,
        "stream_options": { "include_usage": true },
    });

    let max_tokens_field = match dialect {
        Dialect::OpenAi => "max_completion_tokens",
        Dialect::Compatible => "max_tokens",
    };
    body[max_tokens_field] = json!(max_tokens);

    if !tools.is_empty() {
        if request.use_tools {
            body["tools"] = tools_to_openai(tools, namespace);
        } else if request.history_has_tool_blocks() {
            body["tools"] = tools_to_openai(tools, namespace);
            body["tool_choice"] = json!("none");
        }
    }

    body
}

/// Convert history into OpenAI chat messages.
///
/// Tool results become `tool` role messages.  Tool messages cannot carry
/// images, so screenshots returned by a tool follow in a user message.
fn messages_to_openai(
    system_prompt: &str,
    messages: &[Message],
    namespace: &ToolNamespace,
) -> Vec<Value> {
    let mut out = Vec::with_capacity(messages.len() + 1);
    if !system_prompt.is_empty() {
        out.push(json!({ "role": "system", "content": system_prompt }));
    }

    for message in messages {
        match (&message.role, &message.content) {
            (Role::User, MessageContent::Text(text)) => {
                out.push(json!({ "role": "user", "content": text }));
            }
            (Role::Assistant, MessageContent::Text(text)) => {
                out.push(json!({ "role": "assistant", "content": text }));
            }
            (Role::User, MessageContent::Blocks(blocks)) => user_blocks_to_openai(blocks, &mut out),
            (Role::Assistant, MessageContent::Blocks(blocks)) => {
                if let Some(message) = assistant_blocks_to_openai(blocks, namespace) {
                    out.push(message);
                }
            }
        }
    }

    out
}

fn user_blocks_to_openai(blocks: &[ContentBlock], out: &mut Vec<Value>) {
    let mut parts = Vec::new();
    let mut result_images = Vec::new();

    for block in blocks {
        match block {
            ContentBlock::Text { text } => parts.push(json!({ "type": "text", "text": text })),
            ContentBlock::Image { source } => parts.push(image_part(source)),
            ContentBlock::ToolResult {
                tool_use_id,
                content,
                is_error,
            } => {
                let mut text = content
                    .iter()
                    .filter_map(ContentBlock::as_text)
                    .collect::<Vec<_>>()
                    .join("\n");
                result_images.extend(content.iter().filter_map(|b| match b {
                    ContentBlock::Image { source } => Some(image_part(source)),
                    _ => None,
                }));
                if text.is_empty() {
                    text = "(no output)".into();
                }
                if *is_error {
                    text = format!("Error: {text}");
                }
                out.push(json!({
                    "role": "tool",
                    "tool_call_id": tool_use_id,
                    "content": text,
                }));
            }
            other => trace!(?other, "dropping block openai user messages cannot carry"),
        }
    }

    parts.extend(result_images);
    if !parts.is_empty() {
        out.push(json!({ "role": "user", "content": parts }));
    }
}

fn assistant_blocks_to_openai(blocks: &[ContentBlock], namespace: &ToolNamespace) -> Option<Value> {
    let text = blocks
        .iter()
        .filter_map(ContentBlock::as_text)
        .collect::<Vec<_>>()
        .join("\n");
    let tool_calls: Vec<Value> = blocks
        .iter()
        .filter_map(|b| match b {
            ContentBlock::ToolUse { id, name, input, .. } => Some(json!({
                "id": id,
                "type": "function",
                "function": {
                    "name": namespace.qualify(name),
                    "arguments": input.to_string(),
                }
            })),
            _ => None,
        })
        .collect();

    if text.is_empty() && tool_calls.is_empty() {
        return None;
    }

    let mut message = json!({
        "role": "assistant",
        "content": if text.is_empty() { Value::Null } else { json!(text) },
    });
    if !tool_calls.is_empty() {
        message["tool_calls"] = Value::Array(tool_calls);
    }
    Some(message)
}

fn image_part(source: &ImageSource) -> Value {
    json!({
        "type": "image_url",
        "image_url": { "url": format!("data:{};base64,{}", source.media_type, source.data) }
    })
}

fn tools_to_openai(tools: &[ToolDefinition], namespace: &ToolNamespace) -> Value {
    let arr: Vec<Value> = tools
        .iter()
        .map(|t| {
            json!({
                "type": "function",
                "function": {
                    "name": namespace.qualify(&t.name),
                    "description": t.description,
                    "parameters": t.input_schema,
                }
            })
        })
        .collect();
    Value::Array(arr)
}

// ---------------------------------------------------------------------------
// Stream translation
// ---------------------------------------------------------------------------

/// A tool call being assembled from argument fragments.
#[derive(Debug, Default)]
struct PendingCall {
    id: String,
    name: String,
    arguments: String,
}

/// Translates Chat Completions SSE frames.
#[derive(Debug)]
pub(crate) struct OpenAiTranslator {
    provider: ProviderId,
    emitter: BlockEmitter,
    reasoning: String,
    text: String,
    calls: BTreeMap<u64, PendingCall>,
    finish_reason: Option<String>,
    usage: TokenUsage,
    done: bool,
}

impl OpenAiTranslator {
    pub(crate) fn new(provider: ProviderId, emitter: BlockEmitter) -> Self {
        Self {
            provider,
            emitter,
            reasoning: String::new(),
            text: String::new(),
            calls: BTreeMap::new(),
            finish_reason: None,
            usage: TokenUsage::default(),
            done: false,
        }
    }

    fn emit(&self, block: ContentBlock, out: &mut Vec<AgentResponse>) {
        out.extend(self.emitter.assistant(vec![block]));
    }

    fn flush_reasoning(&mut self, out: &mut Vec<AgentResponse>) {
        if !self.reasoning.is_empty() {
            let thinking = std::mem::take(&mut self.reasoning);
            self.emit(ContentBlock::thinking(thinking, ""), out);
        }
    }

    fn flush_text(&mut self, out: &mut Vec<AgentResponse>) {
        if !self.text.is_empty() {
            let text = std::mem::take(&mut self.text);
            self.emit(ContentBlock::text(text), out);
        }
    }

    /// Emit every pending call whose index is below `before` (all calls
    /// when `before` is `None`).
    fn flush_calls(&mut self, before: Option<u64>, out: &mut Vec<AgentResponse>) -> Result<()> {
        let ready: Vec<u64> = self
            .calls
            .keys()
            .copied()
            .filter(|index| before.is_none_or(|b| *index < b))
            .collect();

        for index in ready {
            let Some(call) = self.calls.remove(&index) else {
                continue;
            };
            let input = if call.arguments.trim().is_empty() {
                json!({})
            } else {
                serde_json::from_str(&call.arguments).map_err(|e| AgentError::LlmParseFailed {
                    reason: format!("tool `{}` arguments are not valid JSON: {e}", call.name),
                })?
            };
            self.emit(ContentBlock::tool_use(call.id, call.name, input), out);
        }
        Ok(())
    }

    fn flush_all(&mut self, out: &mut Vec<AgentResponse>) -> Result<()> {
        self.flush_reasoning(out);
        self.flush_text(out);
        self.flush_calls(None, out)
    }

    fn terminal(&mut self) -> AgentResponse {
        let reason = self.finish_reason.take().unwrap_or_else(|| "stop".into());
        AgentResponse::terminal(reason, self.usage)
    }

    fn apply_delta(&mut self, delta: &Value, out: &mut Vec<AgentResponse>) -> Result<()> {
        let reasoning = delta["reasoning_content"]
            .as_str()
            .or_else(|| delta["reasoning"].as_str())
            .unwrap_or_default();
        if !reasoning.is_empty() {
            self.flush_text(out);
            self.flush_calls(None, out)?;
            self.reasoning.push_str(reasoning);
        }

        let content = delta["content"].as_str().unwrap_or_default();
        if !content.is_empty() {
            self.flush_reasoning(out);
            self.flush_calls(None, out)?;
            self.text.push_str(content);
        }

        if let Some(tool_calls) = delta["tool_calls"].as_array() {
            self.flush_reasoning(out);
            self.flush_text(out);

            for tc in tool_calls {
                let index = tc["index"].as_u64().unwrap_or(0);
                if !self.calls.contains_key(&index) {
                    self.flush_calls(Some(index), out)?;
                }
                let call = self.calls.entry(index).or_default();
                if let Some(id) = tc["id"].as_str().filter(|s| !s.is_empty()) {
                    call.id = id.to_owned();
                }
                if let Some(name) = tc["function"]["name"].as_str() {
                    call.name.push_str(name);
                }
                if let Some(arguments) = tc["function"]["arguments"].as_str() {
                    call.arguments.push_str(arguments);
                }
            }
        }
        Ok(())
    }
}

impl Translator for OpenAiTranslator {
    type Event = SseFrame;

    fn translate(&mut self, frame: SseFrame) -> Result<Vec<AgentResponse>> {
        if self.done {
            return Ok(Vec::new());
        }

        let mut out = Vec::new();

        if frame.is_done_sentinel() {
            self.done = true;
            self.flush_all(&mut out)?;
            out.push(self.terminal());
            return Ok(out);
        }

        let v: Value = serde_json::from_str(&frame.data).map_err(|e| AgentError::LlmParseFailed {
            reason: format!("invalid JSON in {} stream: {e}", self.provider),
        })?;

        if let Some(error) = v.get("error").filter(|e| !e.is_null()) {
            return Err(AgentError::LlmStreamError {
                reason: format!(
                    "{}: {}",
                    self.provider,
                    error["message"].as_str().unwrap_or("unknown error")
                ),
            });
        }

        if let Some(usage) = v.get("usage").filter(|u| u.is_object()) {
            let input = usage["prompt_tokens"].as_u64().unwrap_or(0);
            let output = usage["completion_tokens"].as_u64().unwrap_or(0);
            self.usage = TokenUsage::new(input, output);
            if let Some(total) = usage["total_tokens"].as_u64() {
                self.usage.total_tokens = total;
            }
        }

        let choice = &v["choices"][0];
        if choice.is_object() {
            self.apply_delta(&choice["delta"], &mut out)?;

            if let Some(reason) = choice["finish_reason"].as_str() {
                self.flush_all(&mut out)?;
                self.finish_reason = Some(reason.to_owned());
            }
        }

        Ok(out)
    }

    fn finish(&mut self) -> Result<Vec<AgentResponse>> {
        if self.done {
            return Ok(Vec::new());
        }
        if self.finish_reason.is_none() {
            return Err(AgentError::LlmStreamError {
                reason: format!("{} stream ended before finish_reason", self.provider),
            });
        }

        debug!(provider = %self.provider, "stream closed without [DONE]; finishing turn");
        self.done = true;
        let mut out = Vec::new();
        self.flush_all(&mut out)?;
        out.push(self.terminal());
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn translator() -> OpenAiTranslator {
        OpenAiTranslator::new(
            ProviderId::OpenAi,
            BlockEmitter::new(ToolNamespace::default(), true),
        )
    }

    fn feed(t: &mut OpenAiTranslator, chunks: Vec<Value>) -> Vec<AgentResponse> {
        chunks
            .into_iter()
            .flat_map(|v| t.translate(SseFrame::data(v.to_string())).unwrap())
            .collect()
    }

    fn delta(delta: Value) -> Value {
        json!({"choices": [{"index": 0, "delta": delta, "finish_reason": null}]})
    }

    #[test]
    fn text_then_parallel_tool_calls() {
        let mut t = translator();
        let mut out = feed(
            &mut t,
            vec![
                delta(json!({"role": "assistant", "content": "Let me "})),
                delta(json!({"content": "click."})),
                delta(json!({"tool_calls": [{"index": 0, "id": "call_a", "type": "function", "function": {"name": "mcp__desktop__click", "arguments": ""}}]})),
                delta(json!({"tool_calls": [{"index": 0, "function": {"arguments": "{\"x\":5}"}}]})),
                delta(json!({"tool_calls": [{"index": 1, "id": "call_b", "type": "function", "function": {"name": "mcp__desktop__type", "arguments": "{\"text\":\"hi\"}"}}]})),
                json!({"choices": [{"index": 0, "delta": {}, "finish_reason": "tool_calls"}]}),
                json!({"choices": [], "usage": {"prompt_tokens": 40, "completion_tokens": 9, "total_tokens": 49}}),
            ],
        );
        out.extend(t.translate(SseFrame::data("[DONE]")).unwrap());

        assert_eq!(out.len(), 4);
        assert_eq!(out[0].content_blocks, vec![ContentBlock::text("Let me click.")]);
        assert_eq!(
            out[1].content_blocks,
            vec![ContentBlock::tool_use("call_a", "click", json!({"x": 5}))]
        );
        assert_eq!(
            out[2].content_blocks,
            vec![ContentBlock::tool_use("call_b", "type", json!({"text": "hi"}))]
        );
        assert!(out[3].is_terminal());
        assert_eq!(out[3].stop_reason.as_deref(), Some("tool_calls"));
        assert_eq!(out[3].token_usage.total_tokens, 49);
        assert!(t.finish().unwrap().is_empty());
    }

    #[test]
    fn reasoning_becomes_unsigned_thinking() {
        let mut t = translator();
        let out = feed(
            &mut t,
            vec![
                delta(json!({"reasoning_content": "Browser first."})),
                delta(json!({"content": "Done."})),
                json!({"choices": [{"index": 0, "delta": {}, "finish_reason": "stop"}]}),
            ],
        );
        assert_eq!(
            out[0].content_blocks,
            vec![ContentBlock::thinking("Browser first.", "")]
        );
        assert_eq!(out[1].content_blocks, vec![ContentBlock::text("Done.")]);
    }

    #[test]
    fn stream_without_done_finishes_after_finish_reason() {
        let mut t = translator();
        feed(
            &mut t,
            vec![json!({"choices": [{"index": 0, "delta": {"content": "ok"}, "finish_reason": "stop"}]})],
        );
        let tail = t.finish().unwrap();
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0].stop_reason.as_deref(), Some("stop"));
    }

    #[test]
    fn stream_without_finish_reason_is_an_error() {
        let mut t = translator();
        feed(&mut t, vec![delta(json!({"content": "partial"}))]);
        assert!(matches!(t.finish(), Err(AgentError::LlmStreamError { .. })));
    }

    #[test]
    fn error_payload_fails_the_turn() {
        let mut t = translator();
        let err = t
            .translate(SseFrame::data(
                json!({"error": {"message": "Rate limit reached"}}).to_string(),
            ))
            .unwrap_err();
        assert!(err.to_string().contains("Rate limit reached"));
    }

    #[test]
    fn history_maps_tool_results_and_screenshots() {
        let ns = ToolNamespace::default();
        let request = GenerateRequest::new(
            "sys",
            vec![
                Message::with_blocks(
                    Role::Assistant,
                    vec![ContentBlock::tool_use("call_a", "screenshot", json!({}))],
                ),
                Message::with_blocks(
                    Role::User,
                    vec![ContentBlock::ToolResult {
                        tool_use_id: "call_a".into(),
                        content: vec![ContentBlock::Image {
                            source: ImageSource {
                                media_type: "image/png".into(),
                                data: "iVBOR".into(),
                            },
                        }],
                        is_error: false,
                    }],
                ),
            ],
            "gpt-4.1-2025-04-14",
        );

        let body = build_request_body(&request, &ns, &[], 2048, Dialect::OpenAi);
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(
            messages[1]["tool_calls"][0]["function"]["name"],
            "mcp__desktop__screenshot"
        );
        assert_eq!(messages[2]["role"], "tool");
        assert_eq!(messages[2]["tool_call_id"], "call_a");
        assert_eq!(messages[3]["role"], "user");
        assert_eq!(
            messages[3]["content"][0]["image_url"]["url"],
            "data:image/png;base64,iVBOR"
        );
        assert_eq!(body["max_completion_tokens"], 2048);
        assert!(body.get("tools").is_none());
    }

    #[test]
    fn compatible_dialect_uses_max_tokens() {
        let request = GenerateRequest::new("", vec![Message::user("hi")], "llama-3");
        let body = build_request_body(
            &request,
            &ToolNamespace::default(),
            &[],
            512,
            Dialect::Compatible,
        );
        assert_eq!(body["max_tokens"], 512);
        assert!(body.get("max_completion_tokens").is_none());
        assert_eq!(body["messages"][0]["role"], "user");
    }
}

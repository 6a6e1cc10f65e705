//! Google Gemini adapter.
//!
//! Streams `models/{model}:streamGenerateContent?alt=sse`.  Each chunk
//! carries `candidates[0].content.parts`; consecutive text parts of the same
//! kind (plain or `thought`) are merged into one block, and each
//! `functionCall` part becomes one tool-use envelope.  Gemini does not
//! always assign call ids, so missing ids are generated from a per-turn
//! prefix and a counter.

use std::collections::HashMap;

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

// ---------------------------------------------------------------------------
// Adapter
// ---------------------------------------------------------------------------

/// Streams turns from the Gemini API.
#[derive(Debug, Clone)]
pub struct GoogleAdapter {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    max_tokens: u32,
    namespace: ToolNamespace,
    tools: Vec<ToolDefinition>,
}

impl GoogleAdapter {
    pub fn from_config(config: &AgentConfig) -> Result<Self> {
        let api_key = config
            .gemini_api_key
            .clone()
            .ok_or_else(|| AgentError::MissingApiKey {
                provider: ProviderId::Google.to_string(),
            })?;

        Ok(Self {
            http: build_client()?,
            api_key,
            base_url: config.gemini_base_url.clone(),
            max_tokens: config.max_tokens,
            namespace: config.namespace()?,
            tools: config.tools.clone(),
        })
    }
}

impl ProviderAdapter for GoogleAdapter {
    fn id(&self) -> ProviderId {
        ProviderId::Google
    }

    fn models(&self) -> Vec<AgentModel> {
        builtin_models(ProviderId::Google)
    }

    fn generate_message(
        &self,
        request: GenerateRequest,
        cancel: CancellationToken,
    ) -> Result<ResponseStream> {
        validate_request(self.id(), &self.models(), false, &request)?;

        let body = build_request_body(&request, &self.namespace, &self.tools, self.max_tokens);
        let url = join_url(
            &self.base_url,
            &format!("models/{}:streamGenerateContent?alt=sse", request.model),
        );
        debug!(url = %url, model = %request.model, provider = "google", "sending LLM request");
        let builder = self
            .http
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body);

        let bridge = CancellationBridge::new(&cancel);
        let frames = sse_frames(builder, self.id(), bridge.session_token());
        let call_prefix = format!("call_{}", uuid::Uuid::now_v7().simple());
        let translator = GoogleTranslator::new(
            BlockEmitter::new(self.namespace.clone(), request.use_tools),
            call_prefix,
        );
        Ok(drive(self.id(), frames, translator, bridge))
    }
}

// ---------------------------------------------------------------------------
// Request conversion
// ---------------------------------------------------------------------------

/// Build the `streamGenerateContent` request body.
pub(crate) fn build_request_body(
    request: &GenerateRequest,
    namespace: &ToolNamespace,
    tools: &[ToolDefinition],
    max_tokens: u32,
) -> Value {
    let mut body = json!({
        "contents": contents_to_gemini(&request.messages, namespace),
        "generationConfig": {
            "maxOutputTokens": max_tokens,
            "thinkingConfig": { "includeThoughts": true },
        },
    });

    if !request.system_prompt.is_empty() {
        body["systemInstruction"] = json!({ "parts": [{ "text": request.system_prompt }] });
    }

    if !tools.is_empty() {
        if request.use_tools {
            body["tools"] = tools_to_gemini(tools, namespace);
        } else if request.history_has_tool_blocks() {
            body["tools"] = tools_to_gemini(tools, namespace);
            body["toolConfig"] = json!({ "functionCallingConfig": { "mode": "NONE" } });
        }
    }

    body
}

fn contents_to_gemini(messages: &[Message], namespace: &ToolNamespace) -> Vec<Value> {
    // functionResponse parts are matched by name, not id.
    let call_names: HashMap<&str, &str> = messages
        .iter()
        .filter_map(|m| match &m.content {
            MessageContent::Blocks(blocks) => Some(blocks),
            MessageContent::Text(_) => None,
        })
        .flatten()
        .filter_map(|b| match b {
            ContentBlock::ToolUse { id, name, .. } => Some((id.as_str(), name.as_str())),
            _ => None,
        })
        .collect();

    messages
        .iter()
        .filter_map(|message| {
            let role = match message.role {
                Role::User => "user",
                Role::Assistant => "model",
            };
            let parts: Vec<Value> = match &message.content {
                MessageContent::Text(text) => vec![json!({ "text": text })],
                MessageContent::Blocks(blocks) => {
                    let mut parts = Vec::new();
                    for block in blocks {
                        block_to_gemini(block, namespace, &call_names, &mut parts);
                    }
                    parts
                }
            };
            if parts.is_empty() {
                trace!(role, "skipping message with no sendable parts");
                return None;
            }
            Some(json!({ "role": role, "parts": parts }))
        })
        .collect()
}

fn block_to_gemini(
    block: &ContentBlock,
    namespace: &ToolNamespace,
    call_names: &HashMap<&str, &str>,
    parts: &mut Vec<Value>,
) {
    match block {
        ContentBlock::Text { text } => parts.push(json!({ "text": text })),
        ContentBlock::Image { source } => parts.push(inline_data(source)),
        ContentBlock::ToolUse {
            name,
            input,
            signature,
            ..
        } => {
            let mut part = json!({
                "functionCall": { "name": namespace.qualify(name), "args": input }
            });
            if let Some(signature) = signature {
                part["thoughtSignature"] = Value::String(signature.clone());
            }
            parts.push(part);
        }
        ContentBlock::ToolResult {
            tool_use_id,
            content,
            is_error,
        } => {
            let name = call_names
                .get(tool_use_id.as_str())
                .copied()
                .unwrap_or(tool_use_id.as_str());
            let text = content
                .iter()
                .filter_map(ContentBlock::as_text)
                .collect::<Vec<_>>()
                .join("\n");
            let response = if *is_error {
                json!({ "error": text })
            } else {
                json!({ "output": text })
            };
            parts.push(json!({
                "functionResponse": { "name": namespace.qualify(name), "response": response }
            }));
            parts.extend(content.iter().filter_map(|b| match b {
                ContentBlock::Image { source } => Some(inline_data(source)),
                _ => None,
            }));
        }
        ContentBlock::Thinking {
            thinking,
            signature,
        } if !signature.is_empty() => parts.push(json!({
            "text": thinking,
            "thought": true,
            "thoughtSignature": signature,
        })),
        ContentBlock::Thinking { .. } | ContentBlock::RedactedThinking { .. } => {}
    }
}

fn inline_data(source: &ImageSource) -> Value {
    json!({ "inlineData": { "mimeType": source.media_type, "data": source.data } })
}

fn tools_to_gemini(tools: &[ToolDefinition], namespace: &ToolNamespace) -> Value {
    let declarations: Vec<Value> = tools
        .iter()
        .map(|t| {
            json!({
                "name": namespace.qualify(&t.name),
                "description": t.description,
                "parameters": t.input_schema,
            })
        })
        .collect();
    json!([{ "functionDeclarations": declarations }])
}

// ---------------------------------------------------------------------------
// Stream translation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TextKind {
    Plain,
    Thought,
}

/// Translates Gemini SSE chunks.
#[derive(Debug)]
pub(crate) struct GoogleTranslator {
    emitter: BlockEmitter,
    call_prefix: String,
    call_seq: u32,
    buffer: String,
    buffer_kind: Option<TextKind>,
    signature: String,
    finish_reason: Option<String>,
    usage: TokenUsage,
    done: bool,
}

impl GoogleTranslator {
    pub(crate) fn new(emitter: BlockEmitter, call_prefix: impl Into<String>) -> Self {
        Self {
            emitter,
            call_prefix: call_prefix.into(),
            call_seq: 0,
            buffer: String::new(),
            buffer_kind: None,
            signature: String::new(),
            finish_reason: None,
            usage: TokenUsage::default(),
            done: false,
        }
    }

    fn flush(&mut self, out: &mut Vec<AgentResponse>) {
        let Some(kind) = self.buffer_kind.take() else {
            return;
        };
        let text = std::mem::take(&mut self.buffer);
        let signature = std::mem::take(&mut self.signature);
        if text.is_empty() && signature.is_empty() {
            return;
        }
        let block = match kind {
            TextKind::Plain => ContentBlock::text(text),
            TextKind::Thought => ContentBlock::thinking(text, signature),
        };
        out.extend(self.emitter.assistant(vec![block]));
    }

    fn next_call_id(&mut self) -> String {
        self.call_seq += 1;
        format!("{}_{}", self.call_prefix, self.call_seq)
    }

    fn apply_part(&mut self, part: &Value, out: &mut Vec<AgentResponse>) {
        if let Some(call) = part.get("functionCall").filter(|c| c.is_object()) {
            self.flush(out);
            let id = match call["id"].as_str().filter(|s| !s.is_empty()) {
                Some(id) => id.to_owned(),
                None => self.next_call_id(),
            };
            let name = call["name"].as_str().unwrap_or_default().to_owned();
            let args = call.get("args").cloned().unwrap_or_else(|| json!({}));
            let signature = part["thoughtSignature"]
                .as_str()
                .filter(|s| !s.is_empty())
                .map(str::to_owned);
            out.extend(self.emitter.assistant(vec![ContentBlock::ToolUse {
                id,
                name,
                input: args,
                signature,
            }]));
            return;
        }

        if let Some(text) = part["text"].as_str() {
            let kind = if part["thought"].as_bool().unwrap_or(false) {
                TextKind::Thought
            } else {
                TextKind::Plain
            };
            if self.buffer_kind != Some(kind) {
                self.flush(out);
                self.buffer_kind = Some(kind);
            }
            self.buffer.push_str(text);
            if kind == TextKind::Thought {
                if let Some(sig) = part["thoughtSignature"].as_str() {
                    self.signature = sig.to_owned();
                }
            }
            return;
        }

        trace!(part = %part, "ignoring unsupported gemini part");
    }
}

impl Translator for GoogleTranslator {
    type Event = SseFrame;

    fn translate(&mut self, frame: SseFrame) -> Result<Vec<AgentResponse>> {
        if self.done {
            return Ok(Vec::new());
        }

        let v: Value = serde_json::from_str(&frame.data).map_err(|e| AgentError::LlmParseFailed {
            reason: format!("invalid JSON in gemini stream: {e}"),
        })?;

        if let Some(error) = v.get("error").filter(|e| !e.is_null()) {
            return Err(AgentError::LlmStreamError {
                reason: format!(
                    "google {}: {}",
                    error["status"].as_str().unwrap_or("error"),
                    error["message"].as_str().unwrap_or("unknown error")
                ),
            });
        }

        if let Some(usage) = v.get("usageMetadata").filter(|u| u.is_object()) {
            let input = usage["promptTokenCount"].as_u64().unwrap_or(0);
            let output = usage["candidatesTokenCount"].as_u64().unwrap_or(0)
                + usage["thoughtsTokenCount"].as_u64().unwrap_or(0);
            self.usage = TokenUsage::new(input, output);
            if let Some(total) = usage["totalTokenCount"].as_u64() {
                self.usage.total_tokens = total;
            }
        }

        let candidate = &v["candidates"][0];
        if !candidate.is_object() {
            if let Some(reason) = v["promptFeedback"]["blockReason"].as_str() {
                return Err(AgentError::LlmStreamError {
                    reason: format!("google blocked the prompt: {reason}"),
                });
            }
            return Ok(Vec::new());
        }

        let mut out = Vec::new();
        if let Some(parts) = candidate["content"]["parts"].as_array() {
            for part in parts {
                self.apply_part(part, &mut out);
            }
        }
        if let Some(reason) = candidate["finishReason"].as_str() {
            self.flush(&mut out);
            self.finish_reason = Some(reason.to_owned());
        }
        Ok(out)
    }

    fn finish(&mut self) -> Result<Vec<AgentResponse>> {
        if self.done {
            return Ok(Vec::new());
        }
        self.done = true;

        let mut out = Vec::new();
        self.flush(&mut out);
        let Some(reason) = self.finish_reason.take() else {
            return Err(AgentError::LlmStreamError {
                reason: "google stream ended without a finishReason".into(),
            });
        };
        out.push(AgentResponse::terminal(reason, self.usage));
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

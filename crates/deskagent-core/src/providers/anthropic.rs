//! Anthropic Messages API adapter.
//!
//! Streams `POST /v1/messages` and maps each completed content block
//! (`content_block_stop`) to one envelope.  `message_stop` carries the
//! terminal envelope with the stop reason from the preceding
//! `message_delta`.

use std::collections::HashMap;

use reqwest::RequestBuilder;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
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

/// Anthropic API version header value.
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Beta header required when authenticating with an OAuth token.
const ANTHROPIC_OAUTH_BETA: &str = "oauth-2025-04-20";

// ---------------------------------------------------------------------------
// Adapter
// ---------------------------------------------------------------------------

/// Streams turns from the Anthropic Messages API.
#[derive(Debug, Clone)]
pub struct AnthropicAdapter {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    max_tokens: u32,
    namespace: ToolNamespace,
    tools: Vec<ToolDefinition>,
}

impl AnthropicAdapter {
    pub fn from_config(config: &AgentConfig) -> Result<Self> {
        let api_key = config
            .anthropic_api_key
            .clone()
            .ok_or_else(|| AgentError::MissingApiKey {
                provider: ProviderId::Anthropic.to_string(),
            })?;

        Ok(Self {
            http: build_client()?,
            api_key,
            base_url: config.anthropic_base_url.clone(),
            max_tokens: config.max_tokens,
            namespace: config.namespace()?,
            tools: config.tools.clone(),
        })
    }

    /// Build the streaming request with authentication headers.
    ///
    /// OAuth tokens (`sk-ant-oat...`) use Bearer auth plus the OAuth beta
    /// header; regular API keys use `x-api-key`.
    fn request(&self, body: &Value) -> Result<RequestBuilder> {
        let url = join_url(&self.base_url, "v1/messages");
        let mut headers = HeaderMap::new();

        let is_oauth = self.api_key.starts_with("sk-ant-oat");
        if is_oauth {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {}", self.api_key)).map_err(|e| {
                    AgentError::Config {
                        reason: format!("invalid authorization header: {e}"),
                    }
                })?,
            );
            headers.insert(
                "anthropic-beta",
                HeaderValue::from_static(ANTHROPIC_OAUTH_BETA),
            );
        } else {
            headers.insert(
                "x-api-key",
                HeaderValue::from_str(&self.api_key).map_err(|e| AgentError::Config {
                    reason: format!("invalid API key header: {e}"),
                })?,
            );
        }
        headers.insert(
            "anthropic-version",
            HeaderValue::from_static(ANTHROPIC_VERSION),
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        debug!(url = %url, model = %body["model"], provider = "anthropic", is_oauth, "sending LLM request");
        Ok(self.http.post(url).headers(headers).json(body))
    }
}

impl ProviderAdapter for AnthropicAdapter {
    fn id(&self) -> ProviderId {
        ProviderId::Anthropic
    }

    fn models(&self) -> Vec<AgentModel> {
        builtin_models(ProviderId::Anthropic)
    }

    fn generate_message(
        &self,
        request: GenerateRequest,
        cancel: CancellationToken,
    ) -> Result<ResponseStream> {
        validate_request(self.id(), &self.models(), false, &request)?;

        let body = build_request_body(&request, &self.namespace, &self.tools, self.max_tokens);
        let builder = self.request(&body)?;

        let bridge = CancellationBridge::new(&cancel);
        let frames = sse_frames(builder, self.id(), bridge.session_token());
        let translator = AnthropicTranslator::new(BlockEmitter::new(
            self.namespace.clone(),
            request.use_tools,
        ));
        Ok(drive(self.id(), frames, translator, bridge))
    }
}

// ---------------------------------------------------------------------------
// Request conversion
// ---------------------------------------------------------------------------

/// Build the Messages API request body.
///
/// Tool definitions are advertised under the namespace prefix when tools
/// are enabled.  With tools disabled they are only sent (with
/// `tool_choice: none`) if the history already contains tool blocks, since
/// the API rejects tool blocks without definitions.
pub(crate) fn build_request_body(
    request: &GenerateRequest,
    namespace: &ToolNamespace,
    tools: &[ToolDefinition],
    max_tokens: u32,
) -> Value {
    let mut body = json!({
        "model": request.model,
        "max_tokens": max_tokens,
        "messages": messages_to_anthropic(&request.messages, namespace),
        "stream": true,
    });

    if !request.system_prompt.is_empty() {
        body["system"] = json!(request.system_prompt);
    }

    if !tools.is_empty() {
        if request.use_tools {
            body["tools"] = tools_to_anthropic(tools, namespace);
        } else if request.history_has_tool_blocks() {
            body["tools"] = tools_to_anthropic(tools, namespace);
            body["tool_choice"] = json!({ "type": "none" });
        }
    }

    body
}

fn messages_to_anthropic(messages: &[Message], namespace: &ToolNamespace) -> Vec<Value> {
    messages
        .iter()
        .filter_map(|message| {
            let role = match message.role {
                Role::User => "user",
                Role::Assistant => "assistant",
            };
            let content = match &message.content {
                MessageContent::Text(text) => json!(text),
                MessageContent::Blocks(blocks) => {
                    let blocks: Vec<Value> = blocks
                        .iter()
                        .map(|b| block_to_anthropic(b, namespace))
                        .collect();
                    if blocks.is_empty() {
                        trace!(role, "skipping message with no sendable content");
                        return None;
                    }
                    Value::Array(blocks)
                }
            };
            Some(json!({ "role": role, "content": content }))
        })
        .collect()
}

fn block_to_anthropic(block: &ContentBlock, namespace: &ToolNamespace) -> Value {
    match block {
        ContentBlock::Text { text } => json!({ "type": "text", "text": text }),
        ContentBlock::Image { source } => image_to_anthropic(source),
        ContentBlock::ToolUse { id, name, input, .. } => json!({
            "type": "tool_use",
            "id": id,
            "name": namespace.qualify(name),
            "input": input,
        }),
        ContentBlock::ToolResult {
            tool_use_id,
            content,
            is_error,
        } => {
            let content: Vec<Value> = content
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::Text { text } => Some(json!({ "type": "text", "text": text })),
                    ContentBlock::Image { source } => Some(image_to_anthropic(source)),
                    _ => None,
                })
                .collect();
            let mut result = json!({
                "type": "tool_result",
                "tool_use_id": tool_use_id,
                "content": content,
            });
            if *is_error {
                result["is_error"] = json!(true);
            }
            result
        }
        ContentBlock::Thinking {
            thinking,
            signature,
        } => json!({ "type": "thinking", "thinking": thinking, "signature": signature }),
        ContentBlock::RedactedThinking { data } => {
            json!({ "type": "redacted_thinking", "data": data })
        }
    }
}

fn image_to_anthropic(source: &ImageSource) -> Value {
    json!({
        "type": "image",
        "source": {
            "type": "base64",
            "media_type": source.media_type,
            "data": source.data,
        }
    })
}

fn tools_to_anthropic(tools: &[ToolDefinition], namespace: &ToolNamespace) -> Value {
    let arr: Vec<Value> = tools
        .iter()
        .map(|t| {
            json!({
                "name": namespace.qualify(&t.name),
                "description": t.description,
                "input_schema": t.input_schema,
            })
        })
        .collect();
    Value::Array(arr)
}

// ---------------------------------------------------------------------------
// Stream translation
// ---------------------------------------------------------------------------

/// A content block between `content_block_start` and `content_block_stop`.
#[derive(Debug)]
enum PendingBlock {
    Text(String),
    ToolUse {
        id: String,
        name: String,
        initial_input: Value,
        partial_json: String,
    },
    Thinking {
        thinking: String,
        signature: String,
    },
    RedactedThinking(String),
    /// Server-side tool blocks and future kinds; dropped on stop.
    Unsupported(String),
}

/// Translates Anthropic SSE frames.
#[derive(Debug)]
pub(crate) struct AnthropicTranslator {
    emitter: BlockEmitter,
    blocks: HashMap<u64, PendingBlock>,
    input_tokens: u64,
    output_tokens: u64,
    stop_reason: Option<String>,
    finished: bool,
}

impl AnthropicTranslator {
    pub(crate) fn new(emitter: BlockEmitter) -> Self {
        Self {
            emitter,
            blocks: HashMap::new(),
            input_tokens: 0,
            output_tokens: 0,
            stop_reason: None,
            finished: false,
        }
    }

    fn start_block(&mut self, v: &Value) {
        let index = v["index"].as_u64().unwrap_or(0);
        let block = &v["content_block"];
        let pending = match block["type"].as_str().unwrap_or_default() {
            "text" => PendingBlock::Text(json_string(block, "text")),
            "tool_use" => PendingBlock::ToolUse {
                id: json_string(block, "id"),
                name: json_string(block, "name"),
                initial_input: block.get("input").cloned().unwrap_or_else(|| json!({})),
                partial_json: String::new(),
            },
            "thinking" => PendingBlock::Thinking {
                thinking: json_string(block, "thinking"),
                signature: json_string(block, "signature"),
            },
            "redacted_thinking" => PendingBlock::RedactedThinking(json_string(block, "data")),
            other => PendingBlock::Unsupported(other.to_owned()),
        };
        self.blocks.insert(index, pending);
    }

    fn apply_delta(&mut self, v: &Value) {
        let index = v["index"].as_u64().unwrap_or(0);
        let delta = &v["delta"];
        let Some(pending) = self.blocks.get_mut(&index) else {
            trace!(index, "delta for unknown content block");
            return;
        };

        match (delta["type"].as_str().unwrap_or_default(), pending) {
            ("text_delta", PendingBlock::Text(text)) => {
                text.push_str(delta["text"].as_str().unwrap_or_default());
            }
            ("input_json_delta", PendingBlock::ToolUse { partial_json, .. }) => {
                partial_json.push_str(delta["partial_json"].as_str().unwrap_or_default());
            }
            ("thinking_delta", PendingBlock::Thinking { thinking, .. }) => {
                thinking.push_str(delta["thinking"].as_str().unwrap_or_default());
            }
            ("signature_delta", PendingBlock::Thinking { signature, .. }) => {
                signature.push_str(delta["signature"].as_str().unwrap_or_default());
            }
            (kind, _) => trace!(index, kind, "ignoring content block delta"),
        }
    }

    fn stop_block(&mut self, v: &Value) -> Result<Vec<AgentResponse>> {
        let index = v["index"].as_u64().unwrap_or(0);
        let Some(pending) = self.blocks.remove(&index) else {
            trace!(index, "stop for unknown content block");
            return Ok(Vec::new());
        };

        let block = match pending {
            PendingBlock::Text(text) => ContentBlock::Text { text },
            PendingBlock::ToolUse {
                id,
                name,
                initial_input,
                partial_json,
            } => {
                let input = if partial_json.trim().is_empty() {
                    initial_input
                } else {
                    serde_json::from_str(&partial_json).map_err(|e| {
                        AgentError::LlmParseFailed {
                            reason: format!("tool `{name}` input is not valid JSON: {e}"),
                        }
                    })?
                };
                ContentBlock::tool_use(id, name, input)
            }
            PendingBlock::Thinking {
                thinking,
                signature,
            } => ContentBlock::Thinking {
                thinking,
                signature,
            },
            PendingBlock::RedactedThinking(data) => ContentBlock::RedactedThinking { data },
            PendingBlock::Unsupported(kind) => {
                debug!(kind = %kind, "dropping unsupported content block");
                return Ok(Vec::new());
            }
        };

        Ok(self.emitter.assistant(vec![block]).into_iter().collect())
    }
}

impl Translator for AnthropicTranslator {
    type Event = SseFrame;

    fn translate(&mut self, frame: SseFrame) -> Result<Vec<AgentResponse>> {
        if self.finished {
            trace!("ignoring event after message_stop");
            return Ok(Vec::new());
        }

        let v: Value = serde_json::from_str(&frame.data).map_err(|e| AgentError::LlmParseFailed {
            reason: format!("invalid JSON in anthropic stream: {e}"),
        })?;
        let event_type = v["type"]
            .as_str()
            .map(str::to_owned)
            .or(frame.event)
            .unwrap_or_default();

        match event_type.as_str() {
            "message_start" => {
                let usage = &v["message"]["usage"];
                self.input_tokens = usage["input_tokens"].as_u64().unwrap_or(0)
                    + usage["cache_creation_input_tokens"].as_u64().unwrap_or(0)
                    + usage["cache_read_input_tokens"].as_u64().unwrap_or(0);
                self.output_tokens = usage["output_tokens"].as_u64().unwrap_or(0);
                Ok(Vec::new())
            }
            "content_block_start" => {
                self.start_block(&v);
                Ok(Vec::new())
            }
            "content_block_delta" => {
                self.apply_delta(&v);
                Ok(Vec::new())
            }
            "content_block_stop" => self.stop_block(&v),
            "message_delta" => {
                if let Some(reason) = v["delta"]["stop_reason"].as_str() {
                    self.stop_reason = Some(reason.to_owned());
                }
                if let Some(output) = v["usage"]["output_tokens"].as_u64() {
                    self.output_tokens = output;
                }
                Ok(Vec::new())
            }
            "message_stop" => {
                self.finished = true;
                let reason = self.stop_reason.take().unwrap_or_else(|| "end_turn".into());
                Ok(vec![AgentResponse::terminal(
                    reason,
                    TokenUsage::new(self.input_tokens, self.output_tokens),
                )])
            }
            "error" => {
                let error = &v["error"];
                Err(AgentError::LlmStreamError {
                    reason: format!(
                        "anthropic {}: {}",
                        error["type"].as_str().unwrap_or("error"),
                        error["message"].as_str().unwrap_or("unknown error")
                    ),
                })
            }
            "ping" => Ok(Vec::new()),
            other => {
                trace!(event = other, "ignoring unknown anthropic event");
                Ok(Vec::new())
            }
        }
    }

    fn finish(&mut self) -> Result<Vec<AgentResponse>> {
        if self.finished {
            Ok(Vec::new())
        } else {
            Err(AgentError::LlmStreamError {
                reason: "anthropic stream ended before message_stop".into(),
            })
        }
    }
}

fn json_string(v: &Value, field: &str) -> String {
    v[field].as_str().unwrap_or_default().to_owned()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

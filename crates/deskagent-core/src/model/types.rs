//! Canonical response data model.
//!
//! These types are the only vocabulary the rest of the agent sees.  Provider
//! adapters translate their native stream events into [`AgentResponse`]
//! envelopes carrying ordered [`ContentBlock`]s; the conversation loop,
//! persistence, and UI never branch on provider identity.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Roles and messages
// ---------------------------------------------------------------------------

/// The author of a message or envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    /// Input from the human user, or a tool result fed back to the model.
    User,
    /// Output from the model.
    Assistant,
}

/// A single message in the conversation history.
///
/// The history is owned by the message store; adapters only read it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Who produced this message.
    pub role: Role,
    /// Either a plain string or an ordered sequence of content blocks.
    pub content: MessageContent,
}

impl Message {
    /// Create a user message with a single text block.
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Blocks(vec![ContentBlock::text(text)]),
        }
    }

    /// Create an assistant message with a single text block.
    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: MessageContent::Blocks(vec![ContentBlock::text(text)]),
        }
    }

    /// Create a message from explicit content blocks.
    pub fn with_blocks(role: Role, blocks: Vec<ContentBlock>) -> Self {
        Self {
            role,
            content: MessageContent::Blocks(blocks),
        }
    }

    /// Return the content as blocks; plain strings become one text block.
    pub fn blocks(&self) -> Vec<ContentBlock> {
        self.content.blocks()
    }

    /// Concatenate every text block, separated by newlines.
    pub fn text(&self) -> String {
        self.content.text()
    }
}

/// Message content as stored: a bare string or a block list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

impl MessageContent {
    /// Return the content as blocks; a plain string becomes one text block.
    pub fn blocks(&self) -> Vec<ContentBlock> {
        match self {
            Self::Text(text) => vec![ContentBlock::text(text.clone())],
            Self::Blocks(blocks) => blocks.clone(),
        }
    }

    /// Concatenate the text of every text block.
    pub fn text(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Blocks(blocks) => blocks
                .iter()
                .filter_map(ContentBlock::as_text)
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

impl From<&str> for MessageContent {
    fn from(text: &str) -> Self {
        Self::Text(text.to_owned())
    }
}

impl From<Vec<ContentBlock>> for MessageContent {
    fn from(blocks: Vec<ContentBlock>) -> Self {
        Self::Blocks(blocks)
    }
}

// ---------------------------------------------------------------------------
// Content blocks
// ---------------------------------------------------------------------------

/// The smallest addressable unit of provider output.
///
/// Serialized as a tagged union on `type`.  `Image` and `ToolResult` only
/// appear in history and in user-echo envelopes; adapters never synthesize
/// them on the assistant side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Plain assistant or user text.
    Text { text: String },

    /// A base64-encoded image (user upload or tool screenshot).
    Image { source: ImageSource },

    /// A tool invocation request.  `id` is provider-assigned and must
    /// round-trip to the matching [`ContentBlock::ToolResult`].
    ToolUse {
        id: String,
        name: String,
        input: Value,
        /// Opaque reasoning token some providers attach to a call and
        /// expect back with it (Gemini `thoughtSignature`).
        #[serde(default, skip_serializing_if = "Option::is_none")]
        signature: Option<String>,
    },

    /// The result of an earlier tool invocation.
    ToolResult {
        tool_use_id: String,
        #[serde(default)]
        content: Vec<ContentBlock>,
        #[serde(default)]
        is_error: bool,
    },

    /// A disclosed reasoning trace.  `signature` is an opaque provider token
    /// passed through unmodified.
    Thinking { thinking: String, signature: String },

    /// A reasoning trace the provider declined to disclose.  Never parsed.
    RedactedThinking { data: String },
}

/// Inline image payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSource {
    /// MIME type, e.g. `image/png`.
    pub media_type: String,
    /// Base64-encoded bytes.
    pub data: String,
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn tool_use(id: impl Into<String>, name: impl Into<String>, input: Value) -> Self {
        Self::ToolUse {
            id: id.into(),
            name: name.into(),
            input,
            signature: None,
        }
    }

    pub fn thinking(thinking: impl Into<String>, signature: impl Into<String>) -> Self {
        Self::Thinking {
            thinking: thinking.into(),
            signature: signature.into(),
        }
    }

    /// Borrow the text of a [`ContentBlock::Text`] block.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            _ => None,
        }
    }

    pub fn is_tool_use(&self) -> bool {
        matches!(self, Self::ToolUse { .. })
    }
}

// ---------------------------------------------------------------------------
// Tool definitions
// ---------------------------------------------------------------------------

/// A desktop tool the host exposes to HTTP providers.
///
/// `name` is the exposed (unprefixed) name; adapters qualify it with the
/// namespace prefix on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Unique tool name.
    pub name: String,

    /// Human-readable description of what the tool does.
    #[serde(default)]
    pub description: String,

    /// JSON Schema describing the tool's input parameters.
    pub input_schema: Value,
}

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// Token accounting attached to every envelope.
///
/// Zero when the provider does not report usage for an event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
}

impl TokenUsage {
    /// Build usage from input and output counts, deriving the total.
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens: input_tokens.saturating_add(output_tokens),
        }
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::default()
    }
}

/// One discrete unit of streamed provider output.
///
/// Envelopes are constructed per native event, yielded once, and never
/// mutated afterwards.  An envelope with empty content and a stop reason is
/// the terminal envelope of a turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentResponse {
    /// `User` only for user-echo envelopes.
    pub role: Role,
    /// Render-ordered content; possibly empty.
    pub content_blocks: Vec<ContentBlock>,
    pub token_usage: TokenUsage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<String>,
}

impl AgentResponse {
    /// An assistant content envelope with zeroed usage and no stop reason.
    pub fn assistant(content_blocks: Vec<ContentBlock>) -> Self {
        Self {
            role: Role::Assistant,
            content_blocks,
            token_usage: TokenUsage::default(),
            stop_reason: None,
        }
    }

    /// A user-echo envelope.
    pub fn user(content_blocks: Vec<ContentBlock>) -> Self {
        Self {
            role: Role::User,
            content_blocks,
            token_usage: TokenUsage::default(),
            stop_reason: None,
        }
    }

    /// A zero-content envelope carrying end-of-turn metadata.
    pub fn terminal(stop_reason: impl Into<String>, token_usage: TokenUsage) -> Self {
        Self {
            role: Role::Assistant,
            content_blocks: Vec::new(),
            token_usage,
            stop_reason: Some(stop_reason.into()),
        }
    }

    #[must_use]
    pub fn with_stop_reason(mut self, stop_reason: impl Into<String>) -> Self {
        self.stop_reason = Some(stop_reason.into());
        self
    }

    /// Returns `true` for the zero-content, stop-reason-bearing envelope.
    pub fn is_terminal(&self) -> bool {
        self.content_blocks.is_empty() && self.stop_reason.is_some()
    }

    /// Iterate over the tool invocations in this envelope.
    pub fn tool_uses(&self) -> impl Iterator<Item = &ContentBlock> {
        self.content_blocks.iter().filter(|b| b.is_tool_use())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn content_blocks_serialize_with_snake_case_tags() {
        let block = ContentBlock::tool_use("t1", "click", json!({"x": 10}));
        let v = serde_json::to_value(&block).unwrap();
        assert_eq!(v["type"], "tool_use");
        assert_eq!(v["name"], "click");
        assert!(v.get("signature").is_none());

        let redacted: ContentBlock =
            serde_json::from_value(json!({"type": "redacted_thinking", "data": "opaque"})).unwrap();
        assert_eq!(
            redacted,
            ContentBlock::RedactedThinking {
                data: "opaque".into()
            }
        );
    }

    #[test]
    fn tool_result_defaults_missing_fields() {
        let block: ContentBlock =
            serde_json::from_value(json!({"type": "tool_result", "tool_use_id": "t1"})).unwrap();
        match block {
            ContentBlock::ToolResult {
                tool_use_id,
                content,
                is_error,
            } => {
                assert_eq!(tool_use_id, "t1");
                assert!(content.is_empty());
                assert!(!is_error);
            }
            other => panic!("unexpected block: {other:?}"),
        }
    }

    #[test]
    fn message_content_accepts_string_or_blocks() {
        let plain: Message =
            serde_json::from_value(json!({"role": "USER", "content": "open browser"})).unwrap();
        assert_eq!(plain.blocks(), vec![ContentBlock::text("open browser")]);

        let blocks: Message = serde_json::from_value(json!({
            "role": "ASSISTANT",
            "content": [{"type": "text", "text": "a"}, {"type": "text", "text": "b"}]
        }))
        .unwrap();
        assert_eq!(blocks.role, Role::Assistant);
        assert_eq!(blocks.text(), "a\nb");
    }

    #[test]
    fn envelope_uses_camel_case_fields() {
        let env = AgentResponse::terminal("end_turn", TokenUsage::new(3, 4));
        let v = serde_json::to_value(&env).unwrap();
        assert_eq!(v["contentBlocks"], json!([]));
        assert_eq!(v["tokenUsage"]["totalTokens"], 7);
        assert_eq!(v["stopReason"], "end_turn");
        assert_eq!(v["role"], "ASSISTANT");
        assert!(env.is_terminal());
    }

    #[test]
    fn content_envelope_is_not_terminal() {
        let env = AgentResponse::assistant(vec![ContentBlock::text("hi")]).with_stop_reason("tool_use");
        assert!(!env.is_terminal());
        assert!(env.token_usage.is_zero());
        assert_eq!(env.tool_uses().count(), 0);
    }
}

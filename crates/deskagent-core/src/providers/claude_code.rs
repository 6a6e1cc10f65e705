//! Claude Code adapter.
//!
//! Runs the `claude` CLI in print mode with `--output-format stream-json`
//! and translates its newline-delimited JSON events.  The desktop service is
//! attached as an SSE MCP server, so the model sees desktop tools as
//! `mcp__<server>__<tool>`; everything else the CLI reports (built-in tools,
//! system events) is filtered out.
//!
//! One process is spawned per turn.  Cancelling the turn kills it.

use std::collections::HashSet;
use std::process::Stdio;

use futures::stream::BoxStream;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::cancel::CancellationBridge;
use crate::config::AgentConfig;
use crate::error::{AgentError, Result};
use crate::model::{
    AgentModel, AgentResponse, ContentBlock, ImageSource, ProviderId, TokenUsage, builtin_models,
};
use crate::namespace::ToolNamespace;
use crate::providers::driver::{BlockEmitter, TOOL_USE_HINT, Translator, drive};
use crate::providers::http::join_url;
use crate::providers::{GenerateRequest, ProviderAdapter, ResponseStream, validate_request};

/// Prefix Claude Code gives every MCP tool name.
const MCP_TOOL_PREFIX: &str = "mcp__";

/// Built-in CLI tools.  The session never gets to run any of them.
const BUILTIN_TOOLS: &[&str] = &[
    "Task",
    "Bash",
    "BashOutput",
    "KillShell",
    "Glob",
    "Grep",
    "LS",
    "Read",
    "Edit",
    "MultiEdit",
    "Write",
    "NotebookEdit",
    "WebFetch",
    "WebSearch",
    "TodoWrite",
    "ExitPlanMode",
    "SlashCommand",
];

// ---------------------------------------------------------------------------
// Adapter
// ---------------------------------------------------------------------------

/// Streams turns from a local Claude Code process.
#[derive(Debug, Clone)]
pub struct ClaudeCodeAdapter {
    executable: String,
    desktop_base_url: String,
    mcp_server: String,
    namespace: ToolNamespace,
    emit_user_echo: bool,
}

impl ClaudeCodeAdapter {
    pub fn from_config(config: &AgentConfig) -> Result<Self> {
        let desktop_base_url =
            config
                .desktop_base_url
                .clone()
                .ok_or_else(|| AgentError::ProviderNotConfigured {
                    provider: ProviderId::ClaudeCode.to_string(),
                })?;
        let namespace = config.namespace()?;

        Ok(Self {
            executable: config.claude_code_path.clone(),
            desktop_base_url,
            mcp_server: mcp_server_name(&namespace)?,
            namespace,
            emit_user_echo: config.emit_user_echo,
        })
    }

    /// Command-line arguments for one turn.
    pub(crate) fn command_args(&self, request: &GenerateRequest, prompt: &str) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "--print".into(),
            prompt.into(),
            "--output-format".into(),
            "stream-json".into(),
            "--verbose".into(),
            "--model".into(),
            request.model.clone(),
            "--permission-mode".into(),
            "bypassPermissions".into(),
        ];

        if !request.system_prompt.is_empty() {
            args.push("--append-system-prompt".into());
            args.push(request.system_prompt.clone());
        }

        // Built-in tools stay off in every mode; only the desktop server is
        // allowed, and only when tools are enabled.
        args.push("--disallowedTools".into());
        args.push(BUILTIN_TOOLS.join(","));

        if request.use_tools {
            let mut servers = serde_json::Map::new();
            servers.insert(
                self.mcp_server.clone(),
                json!({ "type": "sse", "url": join_url(&self.desktop_base_url, "mcp") }),
            );
            let mcp_config = json!({ "mcpServers": servers });
            args.push("--mcp-config".into());
            args.push(mcp_config.to_string());
            args.push("--allowedTools".into());
            args.push(format!("{MCP_TOOL_PREFIX}{}", self.mcp_server));
        }

        // Ignore any MCP servers from the user's own Claude settings.
        args.push("--strict-mcp-config".into());
        args
    }
}

impl ProviderAdapter for ClaudeCodeAdapter {
    fn id(&self) -> ProviderId {
        ProviderId::ClaudeCode
    }

    fn models(&self) -> Vec<AgentModel> {
        builtin_models(ProviderId::ClaudeCode)
    }

    fn generate_message(
        &self,
        request: GenerateRequest,
        cancel: CancellationToken,
    ) -> Result<ResponseStream> {
        validate_request(self.id(), &self.models(), false, &request)?;
        let prompt = prompt_from(&request)?;
        let args = self.command_args(&request, &prompt);

        debug!(
            executable = %self.executable,
            model = %request.model,
            use_tools = request.use_tools,
            "starting claude code session"
        );

        let bridge = CancellationBridge::new(&cancel);
        let lines = session_lines(self.executable.clone(), args, bridge.session_token());
        let translator = ClaudeCodeTranslator::new(
            BlockEmitter::new(self.namespace.clone(), request.use_tools),
            self.emit_user_echo,
        );
        Ok(drive(self.id(), lines, translator, bridge))
    }
}

/// Derive the MCP server name from a `mcp__<server>__` prefix.
fn mcp_server_name(namespace: &ToolNamespace) -> Result<String> {
    namespace
        .prefix()
        .strip_prefix(MCP_TOOL_PREFIX)
        .and_then(|rest| rest.strip_suffix("__"))
        .filter(|server| !server.is_empty() && !server.contains("__"))
        .map(str::to_owned)
        .ok_or_else(|| AgentError::Config {
            reason: format!(
                "claude code needs a namespace prefix of the form mcp__<server>__, got `{}`",
                namespace.prefix()
            ),
        })
}

/// The CLI takes a single prompt: the text of the last message.
fn prompt_from(request: &GenerateRequest) -> Result<String> {
    let text = request
        .last_message()
        .map(|m| m.text())
        .unwrap_or_default();
    if text.trim().is_empty() {
        return Err(AgentError::InvalidHistory {
            reason: "the last message has no text to use as a prompt".into(),
        });
    }
    Ok(text)
}

// ---------------------------------------------------------------------------
// Process transport
// ---------------------------------------------------------------------------

/// Spawn the CLI and stream its stdout line by line.
///
/// The child is killed when `session` is cancelled or the stream is
/// dropped.  Stderr is forwarded to the log.
fn session_lines(
    executable: String,
    args: Vec<String>,
    session: CancellationToken,
) -> BoxStream<'static, Result<String>> {
    Box::pin(async_stream::try_stream! {
        let spawned = Command::new(&executable)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();
        let mut child = spawned.map_err(|e| AgentError::SessionFailed {
            reason: if e.kind() == std::io::ErrorKind::NotFound {
                format!("claude code executable not found: {executable}")
            } else {
                format!("failed to spawn {executable}: {e}")
            },
        })?;

        let stdout = child.stdout.take().ok_or_else(|| AgentError::SessionFailed {
            reason: "failed to capture claude code stdout".into(),
        })?;
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    warn!(target: "deskagent::claude_code", "{line}");
                }
            });
        }

        let mut lines = BufReader::new(stdout).lines();
        loop {
            let next = tokio::select! {
                biased;
                _ = session.cancelled() => None,
                line = lines.next_line() => Some(line),
            };
            let Some(line) = next else {
                debug!("killing claude code session after cancellation");
                if let Err(e) = child.kill().await {
                    warn!(error = %e, "failed to kill claude code process");
                }
                return;
            };
            let Some(line) = line? else {
                break;
            };
            if !line.trim().is_empty() {
                yield line;
            }
        }

        match child.wait().await {
            Ok(status) if status.success() => debug!("claude code session exited"),
            Ok(status) => warn!(%status, "claude code session exited with failure"),
            Err(e) => warn!(error = %e, "failed to reap claude code process"),
        }
    })
}

// ---------------------------------------------------------------------------
// Stream translation
// ---------------------------------------------------------------------------

/// Top-level `stream-json` events.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum CliEvent {
    /// Echo of tool results and other user-side content.
    User { message: CliMessage },
    /// One complete assistant message.
    Assistant { message: CliMessage },
    /// Session bookkeeping (init, hooks).
    System {
        #[serde(default)]
        subtype: Option<String>,
        #[serde(default)]
        session_id: Option<String>,
    },
    /// End of the session.
    Result {
        #[serde(default)]
        subtype: Option<String>,
        #[serde(default)]
        is_error: bool,
        #[serde(default)]
        usage: Option<CliUsage>,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
struct CliMessage {
    #[serde(default)]
    content: Option<CliContent>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CliContent {
    Text(String),
    Blocks(Vec<NativeBlock>),
}

impl CliContent {
    fn into_blocks(self) -> Vec<ContentBlock> {
        match self {
            Self::Text(text) if text.is_empty() => Vec::new(),
            Self::Text(text) => vec![ContentBlock::Text { text }],
            Self::Blocks(blocks) => blocks.into_iter().filter_map(NativeBlock::into_block).collect(),
        }
    }
}

/// Anthropic-format content blocks as the CLI reports them.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum NativeBlock {
    Text {
        text: String,
    },
    Image {
        source: NativeImageSource,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        #[serde(default)]
        content: Option<CliContent>,
        #[serde(default)]
        is_error: Option<bool>,
    },
    Thinking {
        thinking: String,
        #[serde(default)]
        signature: String,
    },
    RedactedThinking {
        data: String,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
struct NativeImageSource {
    #[serde(default)]
    media_type: String,
    #[serde(default)]
    data: String,
}

impl NativeBlock {
    fn into_block(self) -> Option<ContentBlock> {
        match self {
            Self::Text { text } => Some(ContentBlock::Text { text }),
            Self::Image { source } if source.data.is_empty() => {
                trace!("dropping image without inline data");
                None
            }
            Self::Image { source } => Some(ContentBlock::Image {
                source: ImageSource {
                    media_type: source.media_type,
                    data: source.data,
                },
            }),
            Self::ToolUse { id, name, input } => Some(ContentBlock::tool_use(
                id,
                name,
                if input.is_null() { json!({}) } else { input },
            )),
            Self::ToolResult {
                tool_use_id,
                content,
                is_error,
            } => Some(ContentBlock::ToolResult {
                tool_use_id,
                content: content.map(CliContent::into_blocks).unwrap_or_default(),
                is_error: is_error.unwrap_or(false),
            }),
            Self::Thinking {
                thinking,
                signature,
            } => Some(ContentBlock::Thinking {
                thinking,
                signature,
            }),
            Self::RedactedThinking { data } => Some(ContentBlock::RedactedThinking { data }),
            Self::Unknown => {
                trace!("dropping unknown content block");
                None
            }
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct CliUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
    #[serde(default)]
    cache_creation_input_tokens: u64,
    #[serde(default)]
    cache_read_input_tokens: u64,
}

/// Translates `stream-json` lines.
#[derive(Debug)]
pub(crate) struct ClaudeCodeTranslator {
    emitter: BlockEmitter,
    emit_user_echo: bool,
    /// Ids of tool calls the emitter dropped; their echoed results are
    /// dropped too.
    hidden_calls: HashSet<String>,
    finished: bool,
}

impl ClaudeCodeTranslator {
    pub(crate) fn new(emitter: BlockEmitter, emit_user_echo: bool) -> Self {
        Self {
            emitter,
            emit_user_echo,
            hidden_calls: HashSet::new(),
            finished: false,
        }
    }

    fn assistant(&mut self, blocks: Vec<ContentBlock>) -> Option<AgentResponse> {
        let mut calls: HashSet<String> = blocks.iter().filter_map(tool_use_id).collect();
        let envelope = self.emitter.assistant(blocks);
        if let Some(envelope) = &envelope {
            for id in envelope.content_blocks.iter().filter_map(tool_use_id) {
                calls.remove(&id);
            }
        }
        self.hidden_calls.extend(calls);
        envelope
    }

    fn user(&self, blocks: Vec<ContentBlock>) -> Option<AgentResponse> {
        let blocks = blocks
            .into_iter()
            .filter(|block| match block {
                ContentBlock::ToolResult { tool_use_id, .. }
                    if self.hidden_calls.contains(tool_use_id) =>
                {
                    trace!(tool_use_id = %tool_use_id, "dropping result of hidden tool call");
                    false
                }
                _ => true,
            })
            .collect();
        self.emitter.user(blocks)
    }
}

fn tool_use_id(block: &ContentBlock) -> Option<String> {
    match block {
        ContentBlock::ToolUse { id, .. } => Some(id.clone()),
        _ => None,
    }
}

impl Translator for ClaudeCodeTranslator {
    type Event = String;

    fn translate(&mut self, line: String) -> Result<Vec<AgentResponse>> {
        if self.finished {
            trace!("ignoring output after result event");
            return Ok(Vec::new());
        }

        let event: CliEvent = serde_json::from_str(&line).map_err(|e| AgentError::LlmParseFailed {
            reason: format!("invalid claude code event: {e}"),
        })?;

        let envelope = match event {
            // The session keeps going until `result`, so every assistant
            // envelope reports the interim reason `tool_use`.
            CliEvent::Assistant { message } => {
                let blocks = message.content.map(CliContent::into_blocks).unwrap_or_default();
                self.assistant(blocks)
                    .map(|e| e.with_stop_reason(TOOL_USE_HINT))
            }
            CliEvent::User { message } if self.emit_user_echo => {
                let blocks = message.content.map(CliContent::into_blocks).unwrap_or_default();
                self.user(blocks)
            }
            CliEvent::User { .. } => None,
            CliEvent::System {
                subtype,
                session_id,
            } => {
                debug!(
                    subtype = subtype.as_deref().unwrap_or_default(),
                    session_id = session_id.as_deref().unwrap_or_default(),
                    "claude code system event"
                );
                None
            }
            CliEvent::Result {
                subtype,
                is_error,
                usage,
            } => {
                self.finished = true;
                let reason = subtype.unwrap_or_else(|| "success".into());
                if is_error {
                    warn!(subtype = %reason, "claude code session finished with an error");
                }
                let usage = usage.unwrap_or_default();
                let input = usage.input_tokens
                    + usage.cache_creation_input_tokens
                    + usage.cache_read_input_tokens;
                Some(AgentResponse::terminal(
                    reason,
                    TokenUsage::new(input, usage.output_tokens),
                ))
            }
            CliEvent::Unknown => {
                trace!(line = %line, "ignoring unknown claude code event");
                None
            }
        };

        Ok(envelope.into_iter().collect())
    }

    fn finish(&mut self) -> Result<Vec<AgentResponse>> {
        if self.finished {
            Ok(Vec::new())
        } else {
            Err(AgentError::SessionFailed {
                reason: "claude code exited without a result event".into(),
            })
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

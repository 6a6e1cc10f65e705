//! Provider adapters.
//!
//! Each adapter opens one native streaming session per turn and translates
//! its events into [`AgentResponse`] envelopes:
//!
//! - [`anthropic`] -- Messages API over SSE.
//! - [`openai`] -- Chat Completions over SSE.
//! - [`google`] -- Gemini `streamGenerateContent` over SSE.
//! - [`proxy`] -- Any OpenAI-compatible gateway.
//! - [`claude_code`] -- A local Claude Code process emitting `stream-json`.
//!
//! [`ProviderRegistry`] builds the configured adapters and dispatches turns
//! by [`ProviderId`].

pub mod anthropic;
pub mod claude_code;
pub(crate) mod driver;
pub mod google;
pub(crate) mod http;
pub mod openai;
pub mod proxy;
pub mod sse;

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;

use futures::Stream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::AgentConfig;
use crate::error::{AgentError, Result};
use crate::model::catalog::ensure_known_model;
use crate::model::{AgentModel, AgentResponse, ContentBlock, Message, ProviderId};

pub use anthropic::AnthropicAdapter;
pub use claude_code::ClaudeCodeAdapter;
pub use google::GoogleAdapter;
pub use openai::OpenAiAdapter;
pub use proxy::ProxyAdapter;

/// The lazily produced envelope sequence of one turn.
///
/// Ends after the terminal envelope, after the first error, or silently
/// once cancellation is observed.
pub type ResponseStream = Pin<Box<dyn Stream<Item = Result<AgentResponse>> + Send>>;

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

/// Everything one turn needs besides the cancellation signal.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerateRequest {
    pub system_prompt: String,
    /// Conversation so far; never empty.
    pub messages: Vec<Message>,
    /// Model id; must be one the selected adapter recognizes.
    pub model: String,
    /// Whether the model may call desktop tools this turn.
    pub use_tools: bool,
}

impl GenerateRequest {
    /// A request with tools enabled.
    pub fn new(
        system_prompt: impl Into<String>,
        messages: Vec<Message>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            messages,
            model: model.into(),
            use_tools: true,
        }
    }

    pub fn with_tools(mut self, use_tools: bool) -> Self {
        self.use_tools = use_tools;
        self
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Whether any message in the history carries a tool call or result.
    pub(crate) fn history_has_tool_blocks(&self) -> bool {
        self.messages.iter().any(|message| {
            message.blocks().iter().any(|block| {
                matches!(
                    block,
                    ContentBlock::ToolUse { .. } | ContentBlock::ToolResult { .. }
                )
            })
        })
    }
}

/// Fail fast on requests no adapter can serve.
pub(crate) fn validate_request(
    provider: ProviderId,
    models: &[AgentModel],
    accept_any_model: bool,
    request: &GenerateRequest,
) -> Result<()> {
    if request.messages.is_empty() {
        return Err(AgentError::InvalidHistory {
            reason: "message history is empty".into(),
        });
    }
    if request.model.trim().is_empty() {
        return Err(AgentError::UnknownModel {
            provider: provider.to_string(),
            model: request.model.clone(),
        });
    }
    if !accept_any_model {
        ensure_known_model(provider, models, &request.model)?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Adapter trait
// ---------------------------------------------------------------------------

/// A provider that can run one streaming turn.
///
/// `generate_message` validates the request and returns immediately; the
/// native session is opened lazily when the stream is first polled.
/// Configuration problems are returned directly, transport problems
/// through the stream.
pub trait ProviderAdapter: Send + Sync {
    fn id(&self) -> ProviderId;

    /// Models this adapter recognizes.
    fn models(&self) -> Vec<AgentModel>;

    fn generate_message(
        &self,
        request: GenerateRequest,
        cancel: CancellationToken,
    ) -> Result<ResponseStream>;
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// The configured adapters, keyed by provider.
#[derive(Default)]
pub struct ProviderRegistry {
    adapters: HashMap<ProviderId, Arc<dyn ProviderAdapter>>,
    /// Providers whose settings were present but unusable, with the reason.
    rejected: HashMap<ProviderId, String>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an adapter for every provider `config` has settings for.
    ///
    /// A provider whose settings cannot produce an adapter is left out; the
    /// others are still registered and selecting it reports the reason.
    pub fn from_config(config: &AgentConfig) -> Result<Self> {
        config.validate()?;
        let mut registry = Self::new();

        for provider in ProviderId::ALL {
            if !config.is_provider_configured(provider) {
                debug!(%provider, "provider not configured; skipping");
                continue;
            }
            match build_adapter(provider, config) {
                Ok(adapter) => registry.register(adapter),
                Err(e) => {
                    warn!(%provider, error = %e, "provider settings unusable; skipping");
                    registry.rejected.insert(provider, e.to_string());
                }
            }
        }

        info!(providers = ?registry.providers(), "provider adapters ready");
        Ok(registry)
    }

    /// Add or replace the adapter for its provider.
    pub fn register(&mut self, adapter: Arc<dyn ProviderAdapter>) {
        self.rejected.remove(&adapter.id());
        self.adapters.insert(adapter.id(), adapter);
    }

    pub fn get(&self, provider: ProviderId) -> Result<Arc<dyn ProviderAdapter>> {
        if let Some(adapter) = self.adapters.get(&provider) {
            return Ok(Arc::clone(adapter));
        }
        Err(match self.rejected.get(&provider) {
            Some(reason) => AgentError::Config {
                reason: format!("{provider} is unavailable: {reason}"),
            },
            None => AgentError::ProviderNotConfigured {
                provider: provider.to_string(),
            },
        })
    }

    /// Configured providers in catalog order.
    pub fn providers(&self) -> Vec<ProviderId> {
        ProviderId::ALL
            .into_iter()
            .filter(|p| self.adapters.contains_key(p))
            .collect()
    }

    /// Every model across the configured adapters.
    pub fn models(&self) -> Vec<AgentModel> {
        self.providers()
            .into_iter()
            .filter_map(|p| self.adapters.get(&p))
            .flat_map(|adapter| adapter.models())
            .collect()
    }

    /// Dispatch one turn to `provider`.
    pub fn generate_message(
        &self,
        provider: ProviderId,
        request: GenerateRequest,
        cancel: CancellationToken,
    ) -> Result<ResponseStream> {
        self.get(provider)?.generate_message(request, cancel)
    }
}

fn build_adapter(provider: ProviderId, config: &AgentConfig) -> Result<Arc<dyn ProviderAdapter>> {
    Ok(match provider {
        ProviderId::Anthropic => Arc::new(AnthropicAdapter::from_config(config)?),
        ProviderId::OpenAi => Arc::new(OpenAiAdapter::from_config(config)?),
        ProviderId::Google => Arc::new(GoogleAdapter::from_config(config)?),
        ProviderId::Proxy => Arc::new(ProxyAdapter::from_config(config)?),
        ProviderId::ClaudeCode => Arc::new(ClaudeCodeAdapter::from_config(config)?),
    })
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.providers())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

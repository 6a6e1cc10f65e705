//! Streaming response normalizer for desktop-automation agents.
//!
//! An agent loop asks an LLM for the next step, renders what comes back,
//! and executes any desktop tool calls.  This crate sits between that loop
//! and the providers: every provider's native stream is translated into one
//! sequence of [`AgentResponse`] envelopes with the same content-block
//! model, the same tool namespace rules, and the same cancellation
//! behavior.
//!
//! ## Architecture
//!
//! ```text
//!                 ┌──────────────────┐
//!  orchestrator ─>│ ProviderRegistry │──> ProviderAdapter::generate_message
//!                 └──────────────────┘             │
//!                                                  v
//!   native session ──> Translator ──> ToolNamespace ──> AgentResponse*
//!         ^                                                    │
//!         └─────────── CancellationBridge <──── cancel signal ─┘
//! ```
//!
//! ## Modules
//!
//! - [`model`] -- Content blocks, messages, envelopes, and the model catalog.
//! - [`namespace`] -- Desktop tool namespace filtering.
//! - [`cancel`] -- Cancellation bridge between the caller and a session.
//! - [`providers`] -- Adapter trait, registry, and the five adapters.
//! - [`config`] -- Environment and TOML configuration.
//! - [`logging`] -- Tracing subscriber helpers.
//! - [`error`] -- Error types.

pub mod cancel;
pub mod config;
pub mod error;
pub mod logging;
pub mod model;
pub mod namespace;
pub mod providers;

// Re-export the most commonly used types at the crate root.
pub use cancel::{CancellationBridge, Pulled};
pub use config::AgentConfig;
pub use error::{AgentError, Result};
pub use logging::{init_json_tracing, init_tracing};
pub use model::{
    AgentModel, AgentResponse, ContentBlock, ImageSource, Message, MessageContent, ProviderId,
    Role, TokenUsage, ToolDefinition, available_models, builtin_models,
};
pub use namespace::{DEFAULT_NAMESPACE_PREFIX, ToolNamespace};
pub use providers::{
    AnthropicAdapter, ClaudeCodeAdapter, GenerateRequest, GoogleAdapter, OpenAiAdapter,
    ProviderAdapter, ProviderRegistry, ProxyAdapter, ResponseStream,
};
pub use tokio_util::sync::CancellationToken;

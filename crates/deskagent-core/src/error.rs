//! Agent error types.
//!
//! Every fallible operation in this crate surfaces an [`AgentError`].  The
//! variants fall into two families: configuration errors, raised before a
//! response stream exists, and transport errors, raised through the stream
//! at the point of failure.  Cancellation is not an error and has no variant.

/// Unified error type for the provider adapters.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    // -- Configuration errors ------------------------------------------------
    /// Configuration validation or loading failed.
    #[error("config error: {reason}")]
    Config { reason: String },

    /// The requested model is not one the selected adapter recognizes.
    #[error("unknown model `{model}` for provider {provider}")]
    UnknownModel { provider: String, model: String },

    /// The orchestrator selected a provider that has no adapter configured.
    #[error("provider not configured: {provider}")]
    ProviderNotConfigured { provider: String },

    /// The API key is missing for a provider that requires one.
    #[error("missing api key for provider: {provider}")]
    MissingApiKey { provider: String },

    /// The supplied message history cannot be submitted (empty, or the last
    /// message carries nothing the provider can use as a prompt).
    #[error("invalid message history: {reason}")]
    InvalidHistory { reason: String },

    // -- Transport errors ----------------------------------------------------
    /// An HTTP request to the provider failed or returned a non-success
    /// status.
    #[error("llm request failed: {reason}")]
    LlmRequestFailed { reason: String },

    /// The provider payload could not be parsed into the expected format.
    #[error("llm response parse error: {reason}")]
    LlmParseFailed { reason: String },

    /// The streaming connection was interrupted, reported an error event, or
    /// ended before its terminal event.
    #[error("llm stream error: {reason}")]
    LlmStreamError { reason: String },

    /// A local agent session (child process) could not be started or failed
    /// while running.
    #[error("agent session failed: {reason}")]
    SessionFailed { reason: String },

    // -- Upstream errors -----------------------------------------------------
    /// JSON serialization or deserialization failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// An I/O error from a local session pipe.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl AgentError {
    /// Returns `true` for errors that are raised before any envelope is
    /// produced and indicate a setup problem rather than a provider failure.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::Config { .. }
                | Self::UnknownModel { .. }
                | Self::ProviderNotConfigured { .. }
                | Self::MissingApiKey { .. }
                | Self::InvalidHistory { .. }
        )
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, AgentError>;

impl From<reqwest::Error> for AgentError {
    fn from(err: reqwest::Error) -> Self {
        Self::LlmRequestFailed {
            reason: err.to_string(),
        }
    }
}

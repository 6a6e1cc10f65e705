//! Provider identifiers and the built-in model catalog.
//!
//! Each adapter recognizes a fixed set of model ids; anything else is a
//! configuration error raised before streaming starts.  The proxy adapter is
//! the exception: its models come from configuration.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::config::AgentConfig;
use crate::error::AgentError;

/// Identifies which provider adapter serves a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProviderId {
    #[serde(rename = "anthropic")]
    Anthropic,
    #[serde(rename = "openai")]
    OpenAi,
    #[serde(rename = "google")]
    Google,
    #[serde(rename = "proxy")]
    Proxy,
    #[serde(rename = "claude-code")]
    ClaudeCode,
}

impl ProviderId {
    pub const ALL: [ProviderId; 5] = [
        ProviderId::Anthropic,
        ProviderId::OpenAi,
        ProviderId::Google,
        ProviderId::Proxy,
        ProviderId::ClaudeCode,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Anthropic => "anthropic",
            Self::OpenAi => "openai",
            Self::Google => "google",
            Self::Proxy => "proxy",
            Self::ClaudeCode => "claude-code",
        }
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderId {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|id| id.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| AgentError::ProviderNotConfigured {
                provider: s.to_owned(),
            })
    }
}

/// A model the agent can run a turn against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentModel {
    pub provider: ProviderId,
    /// The id sent to the provider.
    pub name: String,
    /// Human-readable label.
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_window: Option<u32>,
}

impl AgentModel {
    fn builtin(provider: ProviderId, name: &str, title: &str, context_window: u32) -> Self {
        Self {
            provider,
            name: name.to_owned(),
            title: title.to_owned(),
            context_window: Some(context_window),
        }
    }
}

/// The models the built-in adapters recognize.  Proxy models are not listed
/// here; they come from [`AgentConfig::proxy_models`].
pub fn builtin_models(provider: ProviderId) -> Vec<AgentModel> {
    use ProviderId::*;
    match provider {
        Anthropic => vec![
            AgentModel::builtin(
                Anthropic,
                "claude-opus-4-1-20250805",
                "Claude Opus 4.1",
                200_000,
            ),
            AgentModel::builtin(
                Anthropic,
                "claude-sonnet-4-20250514",
                "Claude Sonnet 4",
                200_000,
            ),
        ],
        OpenAi => vec![
            AgentModel::builtin(OpenAi, "o3-2025-04-16", "OpenAI o3", 200_000),
            AgentModel::builtin(OpenAi, "gpt-4.1-2025-04-14", "GPT-4.1", 1_047_576),
        ],
        Google => vec![
            AgentModel::builtin(Google, "gemini-2.5-pro", "Gemini 2.5 Pro", 1_048_576),
            AgentModel::builtin(Google, "gemini-2.5-flash", "Gemini 2.5 Flash", 1_048_576),
        ],
        ClaudeCode => vec![
            AgentModel::builtin(ClaudeCode, "sonnet", "Claude Code (Sonnet)", 200_000),
            AgentModel::builtin(ClaudeCode, "opus", "Claude Code (Opus)", 200_000),
        ],
        Proxy => Vec::new(),
    }
}

/// List the models of every provider that has enough configuration to run.
pub fn available_models(config: &AgentConfig) -> Vec<AgentModel> {
    let mut models = Vec::new();
    for provider in ProviderId::ALL {
        if !config.is_provider_configured(provider) {
            continue;
        }
        if provider == ProviderId::Proxy {
            models.extend(config.proxy_models.iter().map(|name| AgentModel {
                provider,
                name: name.clone(),
                title: name.clone(),
                context_window: None,
            }));
        } else {
            models.extend(builtin_models(provider));
        }
    }
    models
}

/// Fail fast when `model` is not in `known`.
pub(crate) fn ensure_known_model(
    provider: ProviderId,
    known: &[AgentModel],
    model: &str,
) -> Result<(), AgentError> {
    if known.iter().any(|m| m.name == model) {
        Ok(())
    } else {
        Err(AgentError::UnknownModel {
            provider: provider.to_string(),
            model: model.to_owned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_ids_round_trip_through_strings() {
        for id in ProviderId::ALL {
            assert_eq!(id.as_str().parse::<ProviderId>().unwrap(), id);
        }
        assert_eq!("Claude-Code".parse::<ProviderId>().unwrap(), ProviderId::ClaudeCode);
        assert!("bedrock".parse::<ProviderId>().is_err());
    }

    #[test]
    fn provider_id_serde_matches_display() {
        let v = serde_json::to_value(ProviderId::ClaudeCode).unwrap();
        assert_eq!(v, "claude-code");
        let back: ProviderId = serde_json::from_value(serde_json::json!("openai")).unwrap();
        assert_eq!(back, ProviderId::OpenAi);
    }

    #[test]
    fn unknown_model_is_rejected() {
        let known = builtin_models(ProviderId::Anthropic);
        assert!(ensure_known_model(ProviderId::Anthropic, &known, "claude-sonnet-4-20250514").is_ok());
        let err = ensure_known_model(ProviderId::Anthropic, &known, "gpt-4.1").unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn available_models_only_lists_configured_providers() {
        let config = AgentConfig {
            anthropic_api_key: Some("sk-test".into()),
            proxy_url: Some("http://localhost:4000".into()),
            proxy_models: vec!["local-llama".into()],
            ..AgentConfig::default()
        };
        let models = available_models(&config);
        assert!(models.iter().any(|m| m.provider == ProviderId::Anthropic));
        assert!(models.iter().any(|m| m.name == "local-llama"));
        assert!(!models.iter().any(|m| m.provider == ProviderId::OpenAi));
    }
}

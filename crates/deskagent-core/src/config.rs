//! Process configuration.
//!
//! [`AgentConfig`] gathers everything the adapters need from outside the
//! process: API keys, endpoint URLs, the desktop service address, the tool
//! namespace prefix, and the host's tool definitions.  It can be read from
//! the environment (after loading a `.env` file) or from a TOML file.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{AgentError, Result};
use crate::model::{ProviderId, ToolDefinition};
use crate::namespace::{DEFAULT_NAMESPACE_PREFIX, ToolNamespace};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Default Anthropic API base URL.
pub const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";

/// Default OpenAI API base URL.
pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Default Gemini API base URL.
pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Executable looked up on `PATH` when no Claude Code path is configured.
pub const DEFAULT_CLAUDE_CODE_PATH: &str = "claude";

/// Default maximum tokens per response.
pub const DEFAULT_MAX_TOKENS: u32 = 8192;

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// Configuration shared by all provider adapters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Base URL of the desktop service.  Claude Code reaches its MCP server
    /// at `<desktop_base_url>/mcp`.
    pub desktop_base_url: Option<String>,

    pub anthropic_api_key: Option<String>,
    pub anthropic_base_url: String,

    pub openai_api_key: Option<String>,
    pub openai_base_url: String,

    pub gemini_api_key: Option<String>,
    pub gemini_base_url: String,

    /// OpenAI-compatible gateway (e.g. LiteLLM).
    pub proxy_url: Option<String>,
    pub proxy_api_key: Option<String>,
    /// Models served by the proxy.  Empty means any model id is accepted.
    pub proxy_models: Vec<String>,

    /// Path to the Claude Code executable.
    pub claude_code_path: String,

    /// Reserved prefix for desktop tool names on the wire.
    pub tool_namespace_prefix: String,

    /// Whether user-echo events become `USER` envelopes.
    pub emit_user_echo: bool,

    /// Maximum tokens the model may generate in one turn.
    pub max_tokens: u32,

    /// Desktop tools advertised to HTTP providers when tools are enabled.
    pub tools: Vec<ToolDefinition>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            desktop_base_url: None,
            anthropic_api_key: None,
            anthropic_base_url: ANTHROPIC_BASE_URL.to_owned(),
            openai_api_key: None,
            openai_base_url: OPENAI_BASE_URL.to_owned(),
            gemini_api_key: None,
            gemini_base_url: GEMINI_BASE_URL.to_owned(),
            proxy_url: None,
            proxy_api_key: None,
            proxy_models: Vec::new(),
            claude_code_path: DEFAULT_CLAUDE_CODE_PATH.to_owned(),
            tool_namespace_prefix: DEFAULT_NAMESPACE_PREFIX.to_owned(),
            emit_user_echo: true,
            max_tokens: DEFAULT_MAX_TOKENS,
            tools: Vec::new(),
        }
    }
}

impl AgentConfig {
    /// Load a `.env` file if present, then read configuration from the
    /// process environment.
    pub fn from_env() -> Result<Self> {
        match dotenvy::dotenv() {
            Ok(path) => debug!(path = %path.display(), "loaded .env file"),
            Err(e) if e.not_found() => {}
            Err(e) => {
                return Err(AgentError::Config {
                    reason: format!("failed to load .env: {e}"),
                });
            }
        }
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build configuration from an arbitrary variable lookup.  Empty values
    /// count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        config.desktop_base_url = var("DESKTOP_BASE_URL");
        config.anthropic_api_key = var("ANTHROPIC_API_KEY");
        config.openai_api_key = var("OPENAI_API_KEY");
        config.gemini_api_key = var("GEMINI_API_KEY");
        config.proxy_url = var("PROXY_URL");
        config.proxy_api_key = var("PROXY_API_KEY");

        if let Some(url) = var("ANTHROPIC_BASE_URL") {
            config.anthropic_base_url = url;
        }
        if let Some(url) = var("OPENAI_BASE_URL") {
            config.openai_base_url = url;
        }
        if let Some(url) = var("GEMINI_BASE_URL") {
            config.gemini_base_url = url;
        }
        if let Some(models) = var("PROXY_MODELS") {
            config.proxy_models = models
                .split(',')
                .map(str::trim)
                .filter(|m| !m.is_empty())
                .map(str::to_owned)
                .collect();
        }
        if let Some(path) = var("CLAUDE_CODE_PATH") {
            config.claude_code_path = path;
        }
        if let Some(prefix) = var("TOOL_NAMESPACE_PREFIX") {
            config.tool_namespace_prefix = prefix;
        }
        if let Some(flag) = var("EMIT_USER_ECHO") {
            config.emit_user_echo = parse_bool("EMIT_USER_ECHO", &flag)?;
        }
        if let Some(max) = var("MAX_TOKENS") {
            config.max_tokens = max.trim().parse().map_err(|e| AgentError::Config {
                reason: format!("MAX_TOKENS must be a positive integer: {e}"),
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).map_err(|e| AgentError::Config {
            reason: format!("invalid config TOML: {e}"),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| AgentError::Config {
            reason: format!("failed to read {}: {e}", path.display()),
        })?;
        let config = Self::from_toml_str(&text)?;
        info!(path = %path.display(), "loaded agent configuration");
        Ok(config)
    }

    /// Check URLs, the namespace prefix, and numeric limits.
    pub fn validate(&self) -> Result<()> {
        let urls = [
            ("desktop_base_url", self.desktop_base_url.as_deref()),
            ("anthropic_base_url", Some(self.anthropic_base_url.as_str())),
            ("openai_base_url", Some(self.openai_base_url.as_str())),
            ("gemini_base_url", Some(self.gemini_base_url.as_str())),
            ("proxy_url", self.proxy_url.as_deref()),
        ];
        for (field, value) in urls {
            if let Some(value) = value {
                url::Url::parse(value).map_err(|e| AgentError::Config {
                    reason: format!("{field} is not a valid URL ({value}): {e}"),
                })?;
            }
        }

        self.namespace()?;

        if self.max_tokens == 0 {
            return Err(AgentError::Config {
                reason: "max_tokens must be greater than zero".into(),
            });
        }
        if self.claude_code_path.trim().is_empty() {
            return Err(AgentError::Config {
                reason: "claude_code_path must not be empty".into(),
            });
        }
        Ok(())
    }

    /// The tool namespace every adapter filters through.
    pub fn namespace(&self) -> Result<ToolNamespace> {
        ToolNamespace::new(self.tool_namespace_prefix.clone())
    }

    /// Whether `provider` has the settings it needs to open a session.
    pub fn is_provider_configured(&self, provider: ProviderId) -> bool {
        match provider {
            ProviderId::Anthropic => self.anthropic_api_key.is_some(),
            ProviderId::OpenAi => self.openai_api_key.is_some(),
            ProviderId::Google => self.gemini_api_key.is_some(),
            ProviderId::Proxy => self.proxy_url.is_some(),
            ProviderId::ClaudeCode => self.desktop_base_url.is_some(),
        }
    }
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(AgentError::Config {
            reason: format!("{name} must be a boolean, got `{other}`"),
        }),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults_are_valid() {
        let config = AgentConfig::default();
        config.validate().unwrap();
        assert_eq!(config.tool_namespace_prefix, "mcp__desktop__");
        assert!(config.emit_user_echo);
        assert!(!config.is_provider_configured(ProviderId::Anthropic));
    }

    #[test]
    fn reads_environment_variables() {
        let config = AgentConfig::from_lookup(lookup(&[
            ("DESKTOP_BASE_URL", "http://desktop:9990"),
            ("ANTHROPIC_API_KEY", "sk-ant"),
            ("OPENAI_API_KEY", ""),
            ("PROXY_URL", "http://litellm:4000"),
            ("PROXY_MODELS", "llama-3, qwen ,"),
            ("EMIT_USER_ECHO", "false"),
            ("MAX_TOKENS", "1024"),
        ]))
        .unwrap();

        assert_eq!(config.desktop_base_url.as_deref(), Some("http://desktop:9990"));
        assert_eq!(config.anthropic_api_key.as_deref(), Some("sk-ant"));
        assert!(config.openai_api_key.is_none(), "empty values count as unset");
        assert_eq!(config.proxy_models, vec!["llama-3", "qwen"]);
        assert!(!config.emit_user_echo);
        assert_eq!(config.max_tokens, 1024);
        assert!(config.is_provider_configured(ProviderId::ClaudeCode));
        assert!(config.is_provider_configured(ProviderId::Proxy));
    }

    #[test]
    fn rejects_malformed_values() {
        let err = AgentConfig::from_lookup(lookup(&[("DESKTOP_BASE_URL", "not a url")])).unwrap_err();
        assert!(err.is_configuration());

        let err = AgentConfig::from_lookup(lookup(&[("EMIT_USER_ECHO", "maybe")])).unwrap_err();
        assert!(matches!(err, AgentError::Config { .. }));

        let err = AgentConfig::from_lookup(lookup(&[("MAX_TOKENS", "0")])).unwrap_err();
        assert!(err.to_string().contains("max_tokens"));
    }

    #[test]
    fn parses_toml_with_tools() {
        let config = AgentConfig::from_toml_str(
            r#"
            desktop_base_url = "http://localhost:9990"
            gemini_api_key = "AIza-test"
            tool_namespace_prefix = "desk__"

            [[tools]]
            name = "click"
            description = "Click at a screen position"
            input_schema = { type = "object", properties = { x = { type = "integer" } } }
            "#,
        )
        .unwrap();

        assert_eq!(config.tools.len(), 1);
        assert_eq!(config.tools[0].name, "click");
        assert_eq!(config.namespace().unwrap().prefix(), "desk__");
        assert_eq!(config.anthropic_base_url, ANTHROPIC_BASE_URL);
    }

    #[test]
    fn reads_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent.toml");
        std::fs::write(&path, "openai_api_key = \"sk-test\"\nmax_tokens = 512\n").unwrap();

        let config = AgentConfig::from_file(&path).unwrap();
        assert_eq!(config.max_tokens, 512);
        assert!(config.is_provider_configured(ProviderId::OpenAi));

        let missing = AgentConfig::from_file(dir.path().join("missing.toml")).unwrap_err();
        assert!(missing.is_configuration());
    }
}

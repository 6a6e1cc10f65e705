//! OpenAI-compatible gateway adapter (LiteLLM and similar).
//!
//! Speaks the Chat Completions dialect through [`super::openai`].  The model
//! list comes from configuration; an empty list accepts any model id and
//! leaves validation to the gateway.

use tokio_util::sync::CancellationToken;

use crate::cancel::CancellationBridge;
use crate::config::AgentConfig;
use crate::error::{AgentError, Result};
use crate::model::{AgentModel, ProviderId, ToolDefinition};
use crate::namespace::ToolNamespace;
use crate::providers::driver::{BlockEmitter, drive};
use crate::providers::http::{build_client, sse_frames};
use crate::providers::openai::{Dialect, OpenAiTranslator, build_request_body, chat_request};
use crate::providers::{GenerateRequest, ProviderAdapter, ResponseStream, validate_request};

/// Streams turns through an OpenAI-compatible proxy.
#[derive(Debug, Clone)]
pub struct ProxyAdapter {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    models: Vec<String>,
    max_tokens: u32,
    namespace: ToolNamespace,
    tools: Vec<ToolDefinition>,
}

impl ProxyAdapter {
    pub fn from_config(config: &AgentConfig) -> Result<Self> {
        let base_url = config
            .proxy_url
            .clone()
            .ok_or_else(|| AgentError::ProviderNotConfigured {
                provider: ProviderId::Proxy.to_string(),
            })?;

        Ok(Self {
            http: build_client()?,
            base_url,
            api_key: config.proxy_api_key.clone(),
            models: config.proxy_models.clone(),
            max_tokens: config.max_tokens,
            namespace: config.namespace()?,
            tools: config.tools.clone(),
        })
    }
}

impl ProviderAdapter for ProxyAdapter {
    fn id(&self) -> ProviderId {
        ProviderId::Proxy
    }

    fn models(&self) -> Vec<AgentModel> {
        self.models
            .iter()
            .map(|name| AgentModel {
                provider: ProviderId::Proxy,
                name: name.clone(),
                title: name.clone(),
                context_window: None,
            })
            .collect()
    }

    fn generate_message(
        &self,
        request: GenerateRequest,
        cancel: CancellationToken,
    ) -> Result<ResponseStream> {
        validate_request(self.id(), &self.models(), self.models.is_empty(), &request)?;

        let body = build_request_body(
            &request,
            &self.namespace,
            &self.tools,
            self.max_tokens,
            Dialect::Compatible,
        );
        let builder = chat_request(
            &self.http,
            &self.base_url,
            self.api_key.as_deref(),
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

//! Completion gateway - one LlmClient that routes by model-id namespace
//!
//! `ollama:<name>` goes to the local OpenAI-compatible server with the prefix
//! stripped, ids starting with `claude` go to Anthropic, ids starting with
//! `gemini` go to Google, everything else goes to the OpenAI-compatible cloud
//! endpoint. Prefixes match in any case.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

use super::{AnthropicClient, CompletionRequest, CompletionResponse, GeminiClient, LlmClient, LlmError, OpenAIClient};
use crate::config::{BackendConfig, LlmConfig};

/// Reserved prefix for locally served models
pub const LOCAL_PREFIX: &str = "ollama:";

/// Which backend a model id belongs to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelRoute {
    /// Local backend; `model` has the prefix stripped
    Local { model: String },
    Anthropic { model: String },
    Gemini { model: String },
    OpenAi { model: String },
}

impl ModelRoute {
    pub fn parse(model_id: &str) -> Result<Self, LlmError> {
        debug!(%model_id, "ModelRoute::parse: called");
        let model_id = model_id.trim();
        if model_id.is_empty() {
            return Err(LlmError::Configuration("model id is empty".to_string()));
        }
        let lowered = model_id.to_ascii_lowercase();
        if lowered.starts_with(LOCAL_PREFIX) {
            let name = &model_id[LOCAL_PREFIX.len()..];
            if name.is_empty() {
                return Err(LlmError::Configuration(format!(
                    "model id '{}' names no local model",
                    model_id
                )));
            }
            return Ok(ModelRoute::Local { model: name.to_string() });
        }
        if lowered.starts_with("claude") {
            return Ok(ModelRoute::Anthropic {
                model: model_id.to_string(),
            });
        }
        if lowered.starts_with("gemini") {
            return Ok(ModelRoute::Gemini {
                model: model_id.to_string(),
            });
        }
        Ok(ModelRoute::OpenAi {
            model: model_id.to_string(),
        })
    }

    pub fn backend_name(&self) -> &'static str {
        match self {
            ModelRoute::Local { .. } => "local",
            ModelRoute::Anthropic { .. } => "anthropic",
            ModelRoute::Gemini { .. } => "gemini",
            ModelRoute::OpenAi { .. } => "openai",
        }
    }

    pub fn model(&self) -> &str {
        match self {
            ModelRoute::Local { model }
            | ModelRoute::Anthropic { model }
            | ModelRoute::Gemini { model }
            | ModelRoute::OpenAi { model } => model,
        }
    }
}

/// A backend slot: a ready client, or the reason one could not be built
type Backend = Result<Arc<dyn LlmClient>, String>;

/// Routes completions to per-namespace backends built once from configuration
pub struct CompletionGateway {
    openai: Backend,
    anthropic: Backend,
    gemini: Backend,
    local: Backend,
}

impl CompletionGateway {
    /// Assemble a gateway from explicit backends
    pub fn with_backends(openai: Backend, anthropic: Backend, gemini: Backend, local: Backend) -> Self {
        Self {
            openai,
            anthropic,
            gemini,
            local,
        }
    }

    /// Build every backend the configuration describes
    ///
    /// A backend whose credential is missing is recorded as unavailable rather
    /// than failing construction; requests routed to it fail permanently.
    pub fn from_config(config: &LlmConfig) -> Self {
        debug!(?config.openai.base_url, ?config.anthropic.base_url, ?config.gemini.base_url, %config.local_base_url, "CompletionGateway::from_config: called");

        let openai = match config.openai.api_key() {
            Some(key) => OpenAIClient::new(&config.openai.base_url, Some(key))
                .map(|c| Arc::new(c) as Arc<dyn LlmClient>)
                .map_err(|e| e.to_string()),
            None => Err(missing_key("OpenAI", &config.openai)),
        };

        let anthropic = match config.anthropic.api_key() {
            Some(key) => AnthropicClient::new(&config.anthropic.base_url, key)
                .map(|c| Arc::new(c) as Arc<dyn LlmClient>)
                .map_err(|e| e.to_string()),
            None => Err(missing_key("Anthropic", &config.anthropic)),
        };

        let gemini = match config.gemini.api_key() {
            Some(key) => GeminiClient::new(&config.gemini.base_url, key)
                .map(|c| Arc::new(c) as Arc<dyn LlmClient>)
                .map_err(|e| e.to_string()),
            None => Err(missing_key("Gemini", &config.gemini)),
        };

        let local = OpenAIClient::new(&config.local_base_url, None)
            .map(|c| Arc::new(c) as Arc<dyn LlmClient>)
            .map_err(|e| e.to_string());

        info!(
            openai = %openai.is_ok(),
            anthropic = %anthropic.is_ok(),
            gemini = %gemini.is_ok(),
            local = %local.is_ok(),
            "completion backends initialized"
        );
        Self::with_backends(openai, anthropic, gemini, local)
    }

    fn backend(&self, route: &ModelRoute) -> Result<&Arc<dyn LlmClient>, LlmError> {
        let slot = match route {
            ModelRoute::Local { .. } => &self.local,
            ModelRoute::Anthropic { .. } => &self.anthropic,
            ModelRoute::Gemini { .. } => &self.gemini,
            ModelRoute::OpenAi { .. } => &self.openai,
        };
        slot.as_ref().map_err(|reason| LlmError::Configuration(reason.clone()))
    }
}

fn missing_key(provider: &str, backend: &BackendConfig) -> String {
    format!(
        "{} API key not found; set the {} environment variable",
        provider,
        backend.key_env_names()
    )
}

#[async_trait]
impl LlmClient for CompletionGateway {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let route = ModelRoute::parse(&request.model)?;
        debug!(backend = %route.backend_name(), model = %route.model(), "CompletionGateway::complete: routing");
        let backend = self.backend(&route)?;
        let model = route.model().to_string();
        backend.complete(request.with_model(model)).await
    }
}

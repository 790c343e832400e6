//! Language-model backends
//!
//! Every backend implements [`ChatBackend`]; the capability traits
//! [`TextGenerator`] and [`StructuredGenerator`] are provided on top of it.

pub mod ollama;
pub mod openai;
pub mod openrouter;

pub use ollama::OllamaProvider;
pub use openai::OpenAICompatibleProvider;
pub use openrouter::OpenRouterProvider;

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::config::{AppConfig, ChatBackendSettings, ConfigError};

use super::error::{LLMError, Result};
use super::json_extract::extract_json;
use super::provider::{ModelKey, StructuredGenerator, TextGenerator, JSON_SYSTEM_PROMPT};
use super::types::{ChatMessage, ChatRequest, ChatResponse, GenerationParams, MessageRole};

// ============================================================================
// Model table
// ============================================================================

/// Model ids keyed by slot name, with `default_main` as the fallback.
#[derive(Debug, Clone)]
pub struct ModelTable {
    models: HashMap<String, String>,
    fallback: String,
}

impl ModelTable {
    pub fn new(backend: &str, models: HashMap<String, String>) -> std::result::Result<Self, ConfigError> {
        let fallback = models
            .get(ModelKey::Main.as_str())
            .filter(|m| !m.is_empty())
            .cloned()
            .ok_or_else(|| ConfigError::MissingDefaultModel(backend.to_string()))?;
        Ok(Self { models, fallback })
    }

    /// Single-model table, mostly for tests.
    pub fn single(model: impl Into<String>) -> Self {
        Self {
            models: HashMap::new(),
            fallback: model.into(),
        }
    }

    pub fn resolve(&self, key: ModelKey) -> &str {
        self.models
            .get(key.as_str())
            .filter(|m| !m.is_empty())
            .map(String::as_str)
            .unwrap_or(&self.fallback)
    }
}

// ============================================================================
// Backend seam
// ============================================================================

/// A chat-completion endpoint.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    fn id(&self) -> &str;

    fn models(&self) -> &ModelTable;

    /// Configured defaults for free-form calls.
    fn default_params(&self) -> &GenerationParams;

    /// Configured defaults for structured calls, when they differ.
    fn json_params(&self) -> Option<&GenerationParams>;

    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse>;
}

pub(crate) fn build_messages(request: &ChatRequest) -> Vec<Value> {
    let mut messages = Vec::with_capacity(request.messages.len() + 1);

    if let Some(system) = &request.system_prompt {
        messages.push(json!({
            "role": "system",
            "content": system
        }));
    }

    for msg in &request.messages {
        messages.push(json!({
            "role": match msg.role {
                MessageRole::System => "system",
                MessageRole::User => "user",
                MessageRole::Assistant => "assistant",
            },
            "content": msg.content
        }));
    }

    messages
}

fn non_empty(response: ChatResponse) -> Result<String> {
    if response.content.trim().is_empty() {
        return Err(LLMError::EmptyResponse);
    }
    Ok(response.content)
}

#[async_trait]
impl<B: ChatBackend> TextGenerator for B {
    fn id(&self) -> &str {
        ChatBackend::id(self)
    }

    async fn generate(
        &self,
        prompt: &str,
        system_prompt: Option<&str>,
        model_key: ModelKey,
        params: &GenerationParams,
    ) -> Result<String> {
        let model = self.models().resolve(model_key);
        let request = ChatRequest::new(model, vec![ChatMessage::user(prompt)])
            .with_system(system_prompt)
            .with_params(self.default_params().merged(params));

        tracing::debug!(backend = ChatBackend::id(self), model, %model_key, "text generation");
        non_empty(self.chat(request).await?)
    }

    async fn continue_conversation(
        &self,
        prompt: &str,
        prior_response: &str,
        follow_up: &str,
        model_key: ModelKey,
        params: &GenerationParams,
    ) -> Result<String> {
        let model = self.models().resolve(model_key);
        let messages = vec![
            ChatMessage::user(prompt),
            ChatMessage::assistant(prior_response),
            ChatMessage::user(follow_up),
        ];
        let request = ChatRequest::new(model, messages)
            .with_params(self.default_params().merged(params));

        tracing::debug!(backend = ChatBackend::id(self), model, %model_key, "conversation continuation");
        non_empty(self.chat(request).await?)
    }
}

#[async_trait]
impl<B: ChatBackend> StructuredGenerator for B {
    async fn generate_structured(
        &self,
        prompt: &str,
        system_prompt: Option<&str>,
        model_key: ModelKey,
        params: &GenerationParams,
    ) -> Result<Value> {
        let model = self.models().resolve(model_key);
        let base = self.json_params().unwrap_or(self.default_params());
        let request = ChatRequest::new(model, vec![ChatMessage::user(prompt)])
            .with_system(Some(system_prompt.unwrap_or(JSON_SYSTEM_PROMPT)))
            .with_params(base.merged(params))
            .with_json_mode();

        tracing::debug!(backend = ChatBackend::id(self), model, %model_key, "structured generation");
        let content = non_empty(self.chat(request).await?)?;
        extract_json(&content).map_err(|malformed| {
            tracing::warn!(
                backend = ChatBackend::id(self),
                reason = %malformed.reason,
                raw = %malformed.raw_preview(200),
                "structured output did not parse"
            );
            LLMError::Malformed(malformed)
        })
    }
}

// ============================================================================
// Strategy selection
// ============================================================================

/// Available language-model backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LanguageModelStrategy {
    OpenRouter,
    OpenAi,
    Ollama,
}

impl FromStr for LanguageModelStrategy {
    type Err = ConfigError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "openrouter" => Ok(Self::OpenRouter),
            "openai" => Ok(Self::OpenAi),
            "ollama" => Ok(Self::Ollama),
            _ => Err(ConfigError::UnknownStrategy {
                kind: "language model",
                name: s.to_string(),
            }),
        }
    }
}

/// Both capability handles, backed by one backend instance.
#[derive(Clone)]
pub struct LanguageModel {
    pub text: Arc<dyn TextGenerator>,
    pub structured: Arc<dyn StructuredGenerator>,
}

impl LanguageModel {
    pub fn from_backend<B: ChatBackend + 'static>(backend: B) -> Self {
        let backend = Arc::new(backend);
        Self {
            text: backend.clone(),
            structured: backend,
        }
    }
}

/// Build the configured backend. Unknown names and missing keys are fatal.
pub fn create_language_model(config: &AppConfig) -> std::result::Result<LanguageModel, ConfigError> {
    let lm = &config.language_model;
    let strategy: LanguageModelStrategy = lm.strategy.parse()?;
    tracing::info!(strategy = %lm.strategy, "creating language model backend");

    let require_key = |service: &str| {
        config
            .api_key(service)
            .ok_or_else(|| ConfigError::MissingApiKey(service.to_string()))
    };

    let model = match strategy {
        LanguageModelStrategy::OpenRouter => LanguageModel::from_backend(OpenRouterProvider::new(
            require_key("openrouter")?,
            &lm.openrouter,
            config.api_headers.clone(),
        )?),
        LanguageModelStrategy::OpenAi => {
            LanguageModel::from_backend(OpenAICompatibleProvider::from_settings(
                "openai",
                require_key("openai")?,
                &lm.openai,
                openai::OPENAI_BASE_URL,
                config.api_headers.clone(),
            )?)
        }
        LanguageModelStrategy::Ollama => {
            LanguageModel::from_backend(OllamaProvider::from_settings(&lm.ollama)?)
        }
    };
    Ok(model)
}

pub(crate) fn http_client(settings: &ChatBackendSettings) -> std::result::Result<reqwest::Client, ConfigError> {
    Ok(reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(settings.timeout_secs))
        .build()?)
}

//! OpenRouter Provider Implementation
//!
//! OpenRouter exposes many vendors' models behind the OpenAI chat API.

use std::collections::HashMap;

use async_trait::async_trait;

use super::openai::OpenAICompatibleProvider;
use super::{ChatBackend, ModelTable};
use crate::config::{ChatBackendSettings, ConfigError};
use crate::core::llm::error::Result;
use crate::core::llm::types::{ChatRequest, ChatResponse, GenerationParams};

pub const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";

/// OpenRouter provider
pub struct OpenRouterProvider {
    inner: OpenAICompatibleProvider,
}

impl OpenRouterProvider {
    /// `api_headers` typically carries `HTTP-Referer` and `X-Title`.
    pub fn new(
        api_key: String,
        settings: &ChatBackendSettings,
        api_headers: HashMap<String, String>,
    ) -> std::result::Result<Self, ConfigError> {
        Ok(Self {
            inner: OpenAICompatibleProvider::from_settings(
                "openrouter",
                api_key,
                settings,
                OPENROUTER_BASE_URL,
                api_headers,
            )?,
        })
    }
}

#[async_trait]
impl ChatBackend for OpenRouterProvider {
    fn id(&self) -> &str {
        "openrouter"
    }

    fn models(&self) -> &ModelTable {
        self.inner.models()
    }

    fn default_params(&self) -> &GenerationParams {
        self.inner.default_params()
    }

    fn json_params(&self) -> Option<&GenerationParams> {
        self.inner.json_params()
    }

    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse> {
        let mut response = self.inner.chat(request).await?;
        response.provider = "openrouter".to_string();
        Ok(response)
    }
}

//! OpenAI-compatible chat completions
//!
//! Also the base for OpenRouter and any other `/chat/completions` endpoint.

use std::collections::HashMap;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;

use super::{build_messages, http_client, ChatBackend, ModelTable};
use crate::config::{ChatBackendSettings, ConfigError};
use crate::core::llm::error::{LLMError, Result};
use crate::core::llm::types::{ChatRequest, ChatResponse, GenerationParams, TokenUsage};

pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Generic OpenAI-compatible provider
pub struct OpenAICompatibleProvider {
    id: String,
    api_key: String,
    base_url: String,
    models: ModelTable,
    params: GenerationParams,
    json_params: Option<GenerationParams>,
    extra_headers: HashMap<String, String>,
    client: Client,
}

impl OpenAICompatibleProvider {
    pub fn new(
        id: impl Into<String>,
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        models: ModelTable,
        client: Client,
    ) -> Self {
        Self {
            id: id.into(),
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            models,
            params: GenerationParams::default(),
            json_params: None,
            extra_headers: HashMap::new(),
            client,
        }
    }

    pub fn from_settings(
        id: &str,
        api_key: String,
        settings: &ChatBackendSettings,
        default_base_url: &str,
        extra_headers: HashMap<String, String>,
    ) -> std::result::Result<Self, ConfigError> {
        let models = ModelTable::new(id, settings.models.clone())?;
        let base_url = settings
            .base_url
            .clone()
            .unwrap_or_else(|| default_base_url.to_string());
        Ok(Self::new(id, api_key, base_url, models, http_client(settings)?)
            .with_params(settings.params.clone(), settings.json_params.clone())
            .with_headers(extra_headers))
    }

    pub fn with_params(
        mut self,
        params: GenerationParams,
        json_params: Option<GenerationParams>,
    ) -> Self {
        self.params = params;
        self.json_params = json_params;
        self
    }

    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.extra_headers = headers;
        self
    }
}

#[async_trait]
impl ChatBackend for OpenAICompatibleProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn models(&self) -> &ModelTable {
        &self.models
    }

    fn default_params(&self) -> &GenerationParams {
        &self.params
    }

    fn json_params(&self) -> Option<&GenerationParams> {
        self.json_params.as_ref()
    }

    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse> {
        let url = format!("{}/chat/completions", self.base_url);
        let messages = build_messages(&request);

        let mut body = json!({
            "model": request.model,
            "messages": messages,
        });
        if let Some(max_tokens) = request.params.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }
        if let Some(temp) = request.params.temperature {
            body["temperature"] = json!(temp);
        }
        if let Some(top_p) = request.params.top_p {
            body["top_p"] = json!(top_p);
        }
        if request.json_mode {
            body["response_format"] = json!({ "type": "json_object" });
        }

        let start = std::time::Instant::now();
        let mut req_builder = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json");

        for (name, value) in &self.extra_headers {
            req_builder = req_builder.header(name.as_str(), value.as_str());
        }

        let resp = req_builder.json(&body).send().await?;
        let status = resp.status();
        let latency = start.elapsed().as_millis() as u64;

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse().ok())
                .unwrap_or(60);
            return Err(LLMError::RateLimited {
                retry_after_secs: retry_after,
            });
        }

        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(LLMError::Auth(format!("{} rejected the API key", self.id)));
        }

        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(LLMError::Api {
                status: status.as_u16(),
                message: text,
            });
        }

        let json: serde_json::Value = resp.json().await?;

        let choice = json["choices"].as_array().and_then(|arr| arr.first());
        let content = choice
            .and_then(|c| c["message"]["content"].as_str())
            .ok_or(LLMError::EmptyResponse)?
            .to_string();

        let usage = json["usage"].as_object().map(|u| TokenUsage {
            input_tokens: u["prompt_tokens"].as_u64().unwrap_or(0) as u32,
            output_tokens: u["completion_tokens"].as_u64().unwrap_or(0) as u32,
        });

        let finish_reason = choice
            .and_then(|c| c["finish_reason"].as_str())
            .map(|s| s.to_string());

        Ok(ChatResponse {
            content,
            model: json["model"]
                .as_str()
                .unwrap_or(&request.model)
                .to_string(),
            provider: self.id.clone(),
            usage,
            finish_reason,
            latency_ms: latency,
        })
    }
}

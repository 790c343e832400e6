//! Ollama Provider Implementation
//!
//! Local models served by Ollama's `/api/chat`.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;

use super::{build_messages, http_client, ChatBackend, ModelTable};
use crate::config::{ChatBackendSettings, ConfigError};
use crate::core::llm::error::{LLMError, Result};
use crate::core::llm::types::{ChatRequest, ChatResponse, GenerationParams, TokenUsage};

pub const OLLAMA_DEFAULT_HOST: &str = "http://localhost:11434";

/// Ollama provider for local inference
pub struct OllamaProvider {
    host: String,
    models: ModelTable,
    params: GenerationParams,
    json_params: Option<GenerationParams>,
    client: Client,
}

impl OllamaProvider {
    pub fn new(host: impl Into<String>, models: ModelTable, client: Client) -> Self {
        Self {
            host: host.into().trim_end_matches('/').to_string(),
            models,
            params: GenerationParams::default(),
            json_params: None,
            client,
        }
    }

    pub fn from_settings(settings: &ChatBackendSettings) -> std::result::Result<Self, ConfigError> {
        let models = ModelTable::new("ollama", settings.models.clone())?;
        let host = settings
            .base_url
            .clone()
            .unwrap_or_else(|| OLLAMA_DEFAULT_HOST.to_string());
        let mut provider = Self::new(host, models, http_client(settings)?);
        provider.params = settings.params.clone();
        provider.json_params = settings.json_params.clone();
        Ok(provider)
    }
}

#[async_trait]
impl ChatBackend for OllamaProvider {
    fn id(&self) -> &str {
        "ollama"
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
        let url = format!("{}/api/chat", self.host);
        let messages = build_messages(&request);

        let mut options = serde_json::Map::new();
        if let Some(temp) = request.params.temperature {
            options.insert("temperature".into(), json!(temp));
        }
        if let Some(top_p) = request.params.top_p {
            options.insert("top_p".into(), json!(top_p));
        }
        if let Some(max_tokens) = request.params.max_tokens {
            options.insert("num_predict".into(), json!(max_tokens));
        }

        let mut body = json!({
            "model": request.model,
            "messages": messages,
            "stream": false,
            "options": options,
        });
        if request.json_mode {
            body["format"] = json!("json");
        }

        let start = std::time::Instant::now();
        let resp = self.client.post(&url).json(&body).send().await?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let text = resp.text().await.unwrap_or_default();
            return Err(LLMError::Api { status, message: text });
        }

        let json: serde_json::Value = resp.json().await?;
        let latency = start.elapsed().as_millis() as u64;

        let content = json["message"]["content"]
            .as_str()
            .ok_or(LLMError::EmptyResponse)?
            .to_string();

        Ok(ChatResponse {
            content,
            model: request.model,
            provider: "ollama".to_string(),
            usage: Some(TokenUsage {
                input_tokens: json["prompt_eval_count"].as_u64().unwrap_or(0) as u32,
                output_tokens: json["eval_count"].as_u64().unwrap_or(0) as u32,
            }),
            finish_reason: json["done_reason"].as_str().map(str::to_string),
            latency_ms: latency,
        })
    }
}

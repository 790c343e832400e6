//! OpenAI-compatible `/images/generations`

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use reqwest::Client;
use serde_json::json;

use super::crop::save_art;
use super::{ImageError, ImageGenerator, Result};
use crate::config::{ConfigError, CroppingSettings, OpenAiImageSettings};
use crate::core::card::Card;

/// OpenAI image generation
pub struct OpenAIImageGenerator {
    api_key: String,
    settings: OpenAiImageSettings,
    cropping: CroppingSettings,
    prompt_token_limit: Option<usize>,
    client: Client,
}

impl OpenAIImageGenerator {
    pub fn new(
        api_key: String,
        settings: OpenAiImageSettings,
        cropping: CroppingSettings,
        prompt_token_limit: Option<usize>,
    ) -> std::result::Result<Self, ConfigError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()?;
        Ok(Self {
            api_key,
            settings,
            cropping,
            prompt_token_limit,
            client,
        })
    }
}

#[async_trait]
impl ImageGenerator for OpenAIImageGenerator {
    async fn generate(&self, art_prompt: &str, card: &Card, destination: &Path) -> Result<PathBuf> {
        let vertical = card.is_vertical_layout();
        let size = if vertical {
            &self.settings.size_saga
        } else {
            &self.settings.size_standard
        };
        let url = format!(
            "{}/images/generations",
            self.settings.base_url.trim_end_matches('/')
        );
        let body = json!({
            "model": self.settings.model,
            "prompt": art_prompt,
            "n": 1,
            "size": size,
            "response_format": "b64_json",
        });

        tracing::info!(model = %self.settings.model, card = %card.name, %size, "generating image with openai");
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(ImageError::Api {
                status: status.as_u16(),
                message: text,
            });
        }

        let json: serde_json::Value = resp.json().await?;
        let encoded = json["data"]
            .as_array()
            .and_then(|arr| arr.first())
            .and_then(|d| d["b64_json"].as_str())
            .ok_or_else(|| ImageError::Failed("response carried no image data".to_string()))?;
        let bytes = STANDARD
            .decode(encoded)
            .map_err(|e| ImageError::Failed(format!("invalid base64 image: {e}")))?;

        save_art(&bytes, destination, &self.cropping, vertical)
    }

    fn prompt_token_limit(&self) -> Option<usize> {
        self.prompt_token_limit
    }
}

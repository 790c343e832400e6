//! Replicate predictions API
//!
//! Creates a prediction with `Prefer: wait`, polls `urls.get` while it is
//! still running, then downloads the first output URL.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};

use super::crop::save_art;
use super::{ImageError, ImageGenerator, Result};
use crate::config::{ConfigError, CroppingSettings, ReplicateSettings};
use crate::core::card::Card;

#[derive(Debug, Deserialize)]
struct Prediction {
    #[serde(default)]
    status: String,
    #[serde(default)]
    output: Value,
    #[serde(default)]
    error: Option<Value>,
    #[serde(default)]
    urls: PredictionUrls,
}

#[derive(Debug, Default, Deserialize)]
struct PredictionUrls {
    get: Option<String>,
}

impl Prediction {
    fn is_terminal(&self) -> bool {
        matches!(self.status.as_str(), "succeeded" | "failed" | "canceled")
    }

    /// First output URL; models return either a string or a list.
    fn first_output(&self) -> Option<&str> {
        match &self.output {
            Value::String(url) => Some(url.as_str()),
            Value::Array(items) => items.first().and_then(Value::as_str),
            _ => None,
        }
    }
}

/// Replicate-hosted text-to-image models
pub struct ReplicateImageGenerator {
    api_token: String,
    settings: ReplicateSettings,
    cropping: CroppingSettings,
    prompt_token_limit: Option<usize>,
    client: Client,
}

impl ReplicateImageGenerator {
    pub fn new(
        api_token: String,
        settings: ReplicateSettings,
        cropping: CroppingSettings,
        prompt_token_limit: Option<usize>,
    ) -> std::result::Result<Self, ConfigError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()?;
        Ok(Self {
            api_token,
            settings,
            cropping,
            prompt_token_limit,
            client,
        })
    }

    fn build_input(&self, art_prompt: &str, vertical: bool) -> Value {
        let mut input = self.settings.params.clone();
        input.insert("prompt".to_string(), json!(art_prompt));
        let aspect_ratio = if vertical {
            &self.settings.aspect_ratio_saga
        } else {
            &self.settings.aspect_ratio_standard
        };
        input.insert("aspect_ratio".to_string(), json!(aspect_ratio));
        Value::Object(input)
    }

    async fn read_prediction(&self, resp: reqwest::Response) -> Result<Prediction> {
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(ImageError::Api {
                status: status.as_u16(),
                message: text,
            });
        }
        Ok(resp.json().await?)
    }

    async fn create_prediction(&self, input: Value) -> Result<Prediction> {
        let url = format!(
            "{}/v1/models/{}/predictions",
            self.settings.base_url.trim_end_matches('/'),
            self.settings.model
        );
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_token)
            .header("Prefer", "wait")
            .json(&json!({ "input": input }))
            .send()
            .await?;
        self.read_prediction(resp).await
    }

    async fn wait_for(&self, mut prediction: Prediction) -> Result<Prediction> {
        let started = Instant::now();
        let poll = Duration::from_secs(self.settings.poll_interval_secs);

        while !prediction.is_terminal() {
            if started.elapsed().as_secs() >= self.settings.timeout_secs {
                return Err(ImageError::Timeout(self.settings.timeout_secs));
            }
            let get_url = prediction
                .urls
                .get
                .clone()
                .ok_or_else(|| ImageError::Failed("prediction has no polling URL".to_string()))?;
            tokio::time::sleep(poll).await;
            tracing::debug!(status = %prediction.status, "polling replicate prediction");
            let resp = self
                .client
                .get(&get_url)
                .bearer_auth(&self.api_token)
                .send()
                .await?;
            prediction = self.read_prediction(resp).await?;
        }
        Ok(prediction)
    }
}

#[async_trait]
impl ImageGenerator for ReplicateImageGenerator {
    async fn generate(&self, art_prompt: &str, card: &Card, destination: &Path) -> Result<PathBuf> {
        let vertical = card.is_vertical_layout();
        let input = self.build_input(art_prompt, vertical);
        tracing::info!(
            model = %self.settings.model,
            card = %card.name,
            vertical,
            "generating image with replicate"
        );

        let prediction = self.wait_for(self.create_prediction(input).await?).await?;
        if prediction.status != "succeeded" {
            let reason = prediction
                .error
                .as_ref()
                .map(|e| e.to_string())
                .unwrap_or_else(|| prediction.status.clone());
            return Err(ImageError::Failed(reason));
        }

        let image_url = prediction
            .first_output()
            .ok_or_else(|| ImageError::Failed("replicate returned no output".to_string()))?;
        let resp = self.client.get(image_url).send().await?;
        if !resp.status().is_success() {
            return Err(ImageError::Api {
                status: resp.status().as_u16(),
                message: format!("image download failed: {image_url}"),
            });
        }
        let bytes = resp.bytes().await?;

        let saved = save_art(&bytes, destination, &self.cropping, vertical)?;
        tracing::info!(path = %saved.display(), "image saved");
        Ok(saved)
    }

    fn prompt_token_limit(&self) -> Option<usize> {
        self.prompt_token_limit
    }
}

//! Art pipeline
//!
//! Per card: write an art prompt with the language model, turn it into an
//! image, and persist the card record. Failures stay on the card.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::core::card::Card;
use crate::core::image::{image_destination, ImageGenerator};
use crate::core::llm::{GenerationParams, ModelKey, TextGenerator};

use super::error::{PipelineError, Result};
use super::retry::{retry, RetryError, RetryPolicy};
use super::templates;

/// Recorded in `art_prompt` when no prompt could be generated.
pub const ART_PROMPT_FAILED: &str = "Error: Failed to generate prompt";

/// Rough token count of a prompt: words times 1.3.
pub fn estimate_tokens(prompt: &str) -> usize {
    (prompt.split_whitespace().count() as f64 * 1.3) as usize
}

/// What happened to one card's art.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtOutcome {
    Generated(PathBuf),
    /// Prompt retries exhausted; no image was attempted.
    PromptFailed,
    /// Prompt written, image retries exhausted.
    ImageFailed,
}

impl ArtOutcome {
    pub fn is_failure(&self) -> bool {
        !matches!(self, ArtOutcome::Generated(_))
    }
}

#[derive(Serialize)]
struct CardRecord<'a> {
    card: &'a Card,
}

pub struct ArtPipeline {
    text: Arc<dyn TextGenerator>,
    image: Arc<dyn ImageGenerator>,
    output_dir: PathBuf,
    image_subdir: String,
    prompt_policy: RetryPolicy,
    image_policy: RetryPolicy,
}

impl ArtPipeline {
    pub fn new(
        text: Arc<dyn TextGenerator>,
        image: Arc<dyn ImageGenerator>,
        output_dir: impl Into<PathBuf>,
        image_subdir: impl Into<String>,
    ) -> Self {
        Self {
            text,
            image,
            output_dir: output_dir.into(),
            image_subdir: image_subdir.into(),
            prompt_policy: RetryPolicy::fixed(3, 2),
            image_policy: RetryPolicy::fixed(3, 5),
        }
    }

    pub fn with_policies(mut self, prompt: RetryPolicy, image: RetryPolicy) -> Self {
        self.prompt_policy = prompt;
        self.image_policy = image;
        self
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn prompt_token_limit(&self) -> Option<usize> {
        self.image.prompt_token_limit()
    }

    /// Run every card of a batch in order. Returns the number of failures.
    pub async fn process_cards(
        &self,
        cards: &mut [Card],
        theme: &str,
        cancel: &CancellationToken,
    ) -> Result<usize> {
        let mut failures = 0;
        for card in cards.iter_mut() {
            if self.process_card(card, theme, cancel).await?.is_failure() {
                failures += 1;
            }
        }
        Ok(failures)
    }

    /// Prompt, image and record for a single card.
    ///
    /// Only cancellation and record persistence errors are returned.
    pub async fn process_card(
        &self,
        card: &mut Card,
        theme: &str,
        cancel: &CancellationToken,
    ) -> Result<ArtOutcome> {
        tracing::info!(card = %card.name, "generating art");

        let outcome = match self.art_prompt(card, theme, cancel).await? {
            Some(prompt) => {
                card.art_prompt = Some(prompt.clone());
                match self.render_image(&prompt, card, cancel).await? {
                    Some(path) => {
                        card.image_path = Some(path.display().to_string());
                        ArtOutcome::Generated(path)
                    }
                    None => {
                        card.image_path = None;
                        ArtOutcome::ImageFailed
                    }
                }
            }
            None => {
                card.art_prompt = Some(ART_PROMPT_FAILED.to_string());
                card.image_path = None;
                ArtOutcome::PromptFailed
            }
        };

        self.write_card_record(card).await?;
        Ok(outcome)
    }

    /// Ask the model for an art prompt, retrying per policy.
    ///
    /// `Ok(None)` means every attempt failed.
    pub async fn art_prompt(
        &self,
        card: &Card,
        theme: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<String>> {
        let limit = self.image.prompt_token_limit();
        let label = format!("art prompt for {}", card.name);
        let result = retry(&self.prompt_policy, cancel, &label, |attempt| {
            let request = templates::art_prompt(card, theme, attempt, limit);
            let text = Arc::clone(&self.text);
            async move {
                text.generate(
                    &request,
                    Some(templates::ART_PROMPT_SYSTEM_PROMPT),
                    ModelKey::ArtPrompt,
                    &GenerationParams::default(),
                )
                .await
            }
        })
        .await;

        match result {
            Ok(prompt) => {
                let prompt = prompt.trim().to_string();
                self.check_token_limit(&card.name, &prompt);
                Ok(Some(prompt))
            }
            Err(RetryError::Cancelled) => Err(PipelineError::Cancelled),
            Err(RetryError::Exhausted { attempts, last }) => {
                tracing::error!(card = %card.name, attempts, error = %last, "art prompt generation failed");
                Ok(None)
            }
        }
    }

    /// Generate the image for an existing prompt, retrying per policy.
    ///
    /// `Ok(None)` means every attempt failed.
    pub async fn render_image(
        &self,
        prompt: &str,
        card: &Card,
        cancel: &CancellationToken,
    ) -> Result<Option<PathBuf>> {
        let destination = image_destination(&self.output_dir, &self.image_subdir, card);
        let label = format!("image for {}", card.name);
        let result = retry(&self.image_policy, cancel, &label, |_| {
            let image = Arc::clone(&self.image);
            let destination = destination.clone();
            async move { image.generate(prompt, card, &destination).await }
        })
        .await;

        match result {
            Ok(path) => {
                tracing::info!(card = %card.name, path = %path.display(), "saved art");
                Ok(Some(path))
            }
            Err(RetryError::Cancelled) => Err(PipelineError::Cancelled),
            Err(RetryError::Exhausted { attempts, last }) => {
                tracing::error!(card = %card.name, attempts, error = %last, "image generation failed");
                Ok(None)
            }
        }
    }

    /// Persist `{"card": {...}}` as `<output>/<Card_Name>.json`.
    pub async fn write_card_record(&self, card: &Card) -> Result<PathBuf> {
        let path = self.output_dir.join(format!("{}.json", card.file_stem()));
        let body = serde_json::to_string_pretty(&CardRecord { card })?;
        tokio::fs::write(&path, body).await?;
        Ok(path)
    }

    fn check_token_limit(&self, card: &str, prompt: &str) {
        if let Some(limit) = self.image.prompt_token_limit() {
            let estimated = estimate_tokens(prompt);
            if estimated > limit {
                tracing::warn!(card, estimated, limit, "art prompt likely exceeds the image model's token limit");
            }
        }
    }
}

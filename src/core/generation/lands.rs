//! Basic land variations

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::core::card::{Card, Color, Rarity};
use crate::core::llm::{GenerationParams, ModelKey, TextGenerator};

use super::art::{ArtPipeline, ART_PROMPT_FAILED};
use super::error::{PipelineError, Result};
use super::numbering::CollectorNumbering;
use super::retry::{retry, RetryError, RetryPolicy};
use super::templates;

/// The five basic land types and their colours, in WUBRG order.
pub const BASIC_LANDS: [(&str, Color); 5] = [
    ("Plains", Color::White),
    ("Island", Color::Blue),
    ("Swamp", Color::Black),
    ("Mountain", Color::Red),
    ("Forest", Color::Green),
];

/// Bare land card for one variation, before art.
pub fn basic_land(land_type: &str, color: Color, variation: u32) -> Card {
    Card::new(
        format!("{land_type} {variation}"),
        format!("Basic Land — {land_type}"),
        Rarity::Common,
    )
    .with_colors(vec![color])
    .with_description(format!(
        "A {} from which {} mana can be drawn. Variation {}.",
        land_type.to_lowercase(),
        color.code(),
        variation
    ))
}

pub struct LandGenerator {
    text: Arc<dyn TextGenerator>,
    variations: u32,
    prompt_policy: RetryPolicy,
}

impl LandGenerator {
    pub fn new(text: Arc<dyn TextGenerator>, variations: u32) -> Self {
        Self {
            text,
            variations,
            prompt_policy: RetryPolicy::fixed(3, 2),
        }
    }

    pub fn with_prompt_policy(mut self, policy: RetryPolicy) -> Self {
        self.prompt_policy = policy;
        self
    }

    /// Generate every variation of every basic land type.
    ///
    /// Numbers come from `numbering`, which the caller positions after the
    /// highest number already in the set. Art failures leave a variation's
    /// `image_path` empty without affecting the others.
    pub async fn generate_lands(
        &self,
        theme: &str,
        art: &ArtPipeline,
        numbering: &mut CollectorNumbering,
        cancel: &CancellationToken,
    ) -> Result<Vec<Card>> {
        tracing::info!(
            variations = self.variations,
            first_number = numbering.peek(),
            "generating basic lands"
        );

        let mut lands = Vec::with_capacity(BASIC_LANDS.len() * self.variations as usize);
        for (land_type, color) in BASIC_LANDS {
            let mut siblings: Vec<String> = Vec::new();
            for variation in 1..=self.variations {
                if cancel.is_cancelled() {
                    return Err(PipelineError::Cancelled);
                }

                let mut card = basic_land(land_type, color, variation);
                card.collector_number = Some(numbering.next());

                match self.land_prompt(land_type, variation, theme, &siblings, cancel).await? {
                    Some(prompt) => {
                        card.art_prompt = Some(prompt.clone());
                        card.image_path = art
                            .render_image(&prompt, &card, cancel)
                            .await?
                            .map(|p| p.display().to_string());
                        siblings.push(prompt);
                    }
                    None => card.art_prompt = Some(ART_PROMPT_FAILED.to_string()),
                }

                art.write_card_record(&card).await?;
                lands.push(card);
            }
        }
        Ok(lands)
    }

    /// Art prompt for one variation; a reply identical to a sibling counts
    /// as a failed attempt.
    async fn land_prompt(
        &self,
        land_type: &str,
        variation: u32,
        theme: &str,
        siblings: &[String],
        cancel: &CancellationToken,
    ) -> Result<Option<String>> {
        let request = templates::land_art_prompt(land_type, variation, self.variations, theme, siblings);
        let label = format!("art prompt for {land_type} {variation}");
        let result = retry(&self.prompt_policy, cancel, &label, |_| {
            let text = Arc::clone(&self.text);
            let request = &request;
            async move {
                let prompt = text
                    .generate(
                        request,
                        Some(templates::ART_PROMPT_SYSTEM_PROMPT),
                        ModelKey::ArtPrompt,
                        &GenerationParams::default(),
                    )
                    .await
                    .map_err(|e| e.to_string())?;
                let prompt = prompt.trim().to_string();
                if siblings.iter().any(|s| s == &prompt) {
                    return Err(format!("duplicate of an earlier {land_type} prompt"));
                }
                Ok(prompt)
            }
        })
        .await;

        match result {
            Ok(prompt) => Ok(Some(prompt)),
            Err(RetryError::Cancelled) => Err(PipelineError::Cancelled),
            Err(RetryError::Exhausted { attempts, last }) => {
                tracing::error!(land = land_type, variation, attempts, error = %last, "land art prompt failed");
                Ok(None)
            }
        }
    }
}

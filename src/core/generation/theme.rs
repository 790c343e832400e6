//! Theme synthesis

use std::sync::Arc;

use crate::core::llm::{GenerationParams, ModelKey, TextGenerator};

use super::error::Result;
use super::inspiration::InspirationCard;
use super::templates;

/// Produces the set theme once per run.
pub struct ThemeSynthesizer {
    text: Arc<dyn TextGenerator>,
}

impl ThemeSynthesizer {
    pub fn new(text: Arc<dyn TextGenerator>) -> Self {
        Self { text }
    }

    /// Return `override_text` verbatim when set, otherwise ask the model.
    pub async fn synthesize(
        &self,
        inspiration: &[InspirationCard],
        theme_prompt: Option<&str>,
        override_text: Option<&str>,
    ) -> Result<String> {
        if let Some(theme) = override_text.filter(|t| !t.trim().is_empty()) {
            tracing::info!(chars = theme.len(), "using theme override");
            return Ok(theme.to_string());
        }

        let prompt = templates::theme_prompt(inspiration, theme_prompt);
        let params = GenerationParams::default().with_temperature(1.0);
        tracing::info!(
            inspiration = inspiration.len(),
            backend = self.text.id(),
            "synthesizing set theme"
        );
        let theme = self
            .text
            .generate(&prompt, None, ModelKey::Theme, &params)
            .await?;
        Ok(theme.trim().to_string())
    }
}

//! Inspiration sampling from the bulk card corpus
//!
//! Reference cards ground theme and batch prompts. They never enter the set.

use std::path::Path;

use rand::seq::SliceRandom;
use rand::Rng;
use serde::Deserialize;

use super::error::{PipelineError, Result};

/// One row of the corpus CSV.
///
/// Only `name` is required; every other column defaults to empty.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct InspirationCard {
    pub name: String,
    pub mana_cost: String,
    #[serde(rename = "type")]
    pub type_line: String,
    pub rarity: String,
    pub power: String,
    pub toughness: String,
    pub text: String,
    pub flavor: String,
    pub colors: String,
    pub set_name: String,
}

impl InspirationCard {
    /// Line used in the theme prompt.
    pub fn theme_line(&self) -> String {
        format!("- {}: {} with abilities: {}", self.name, self.type_line, self.text)
    }

    /// Line used in batch prompts.
    pub fn batch_line(&self) -> String {
        format!(
            "- {} ({}): {} with {}, {}",
            self.name, self.rarity, self.type_line, self.mana_cost, self.text
        )
    }
}

/// Loaded corpus, sampled without replacement.
#[derive(Debug, Clone)]
pub struct InspirationCorpus {
    cards: Vec<InspirationCard>,
}

impl InspirationCorpus {
    pub fn load(path: &Path) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_path(path)?;
        let cards = reader
            .deserialize()
            .collect::<std::result::Result<Vec<InspirationCard>, _>>()?;
        tracing::info!(path = %path.display(), rows = cards.len(), "loaded inspiration corpus");
        Self::from_cards(cards)
    }

    pub fn from_cards(cards: Vec<InspirationCard>) -> Result<Self> {
        if cards.is_empty() {
            return Err(PipelineError::Corpus("corpus contains no cards".to_string()));
        }
        Ok(Self { cards })
    }

    pub fn len(&self) -> usize {
        self.cards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }

    /// Draw `min(count, len)` distinct rows.
    pub fn sample<R: Rng + ?Sized>(&self, count: usize, rng: &mut R) -> Vec<InspirationCard> {
        let count = count.min(self.cards.len());
        if count < self.cards.len() {
            tracing::debug!(requested = count, available = self.cards.len(), "sampling inspiration");
        }
        self.cards.choose_multiple(rng, count).cloned().collect()
    }
}

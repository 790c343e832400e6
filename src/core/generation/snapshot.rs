//! Set snapshots and statistics
//!
//! Snapshots are overwritten by file name, never appended to.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::config::{ColorTargets, RunSettings};
use crate::core::card::{Card, Rarity};

use super::error::Result;

pub const OUTPUT_FILE: &str = "mtg_set_output.json";
pub const COMPLETE_FILE: &str = "mtg_set_complete.json";

pub fn batch_file_name(batch_no: u32) -> String {
    format!("mtg_set_batch_{batch_no}.json")
}

// ============================================================================
// Statistics
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RarityCounts {
    pub mythic: usize,
    pub rare: usize,
    pub uncommon: usize,
    pub common: usize,
}

impl RarityCounts {
    fn bump(&mut self, rarity: Rarity) {
        match rarity {
            Rarity::Mythic => self.mythic += 1,
            Rarity::Rare => self.rare += 1,
            Rarity::Uncommon => self.uncommon += 1,
            Rarity::Common => self.common += 1,
        }
    }
}

/// Full (unweighted) colour counts; a two-colour card counts once for each.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColorCounts {
    #[serde(rename = "W")]
    pub white: usize,
    #[serde(rename = "U")]
    pub blue: usize,
    #[serde(rename = "B")]
    pub black: usize,
    #[serde(rename = "R")]
    pub red: usize,
    #[serde(rename = "G")]
    pub green: usize,
    pub colorless: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetStatistics {
    pub card_count: usize,
    pub rarity_distribution: RarityCounts,
    pub color_distribution: ColorCounts,
    /// Cards without an image.
    pub art_failures: usize,
    pub conversion_failures: usize,
}

impl SetStatistics {
    pub fn compute(cards: &[Card], conversion_failures: usize) -> Self {
        use crate::core::card::Color;

        let mut stats = SetStatistics {
            card_count: cards.len(),
            conversion_failures,
            ..Default::default()
        };
        for card in cards {
            stats.rarity_distribution.bump(card.rarity);
            if card.colors.is_empty() {
                stats.color_distribution.colorless += 1;
            }
            for color in &card.colors {
                let counts = &mut stats.color_distribution;
                match color {
                    Color::White => counts.white += 1,
                    Color::Blue => counts.blue += 1,
                    Color::Black => counts.black += 1,
                    Color::Red => counts.red += 1,
                    Color::Green => counts.green += 1,
                }
            }
            if card.image_path.is_none() {
                stats.art_failures += 1;
            }
        }
        stats
    }

    /// Multi-line summary printed after each batch.
    pub fn summary(&self) -> String {
        let r = &self.rarity_distribution;
        let c = &self.color_distribution;
        format!(
            "Cards: {}\nRarity: {} mythic, {} rare, {} uncommon, {} common\n\
             Colors: W {} / U {} / B {} / R {} / G {} / colorless {}\n\
             Art failures: {}, conversion failures: {}",
            self.card_count,
            r.mythic,
            r.rare,
            r.uncommon,
            r.common,
            c.white,
            c.blue,
            c.black,
            c.red,
            c.green,
            c.colorless,
            self.art_failures,
            self.conversion_failures
        )
    }
}

// ============================================================================
// Configuration echo
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuotaEcho {
    pub mythic_per_batch: u32,
    pub rare_per_batch: u32,
    pub uncommon_per_batch: u32,
    pub common_per_batch: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LandEcho {
    pub enabled: bool,
    pub variations_per_type: u32,
}

/// Run parameters recorded in every snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunEcho {
    pub inspiration_cards_count: usize,
    pub total_cards: u32,
    pub theme_prompt: Option<String>,
    pub rarity_distribution: QuotaEcho,
    pub target_color_distribution: ColorTargets,
    pub models: BTreeMap<String, String>,
    pub basic_lands: LandEcho,
}

impl RunEcho {
    pub fn new(settings: &RunSettings, models: BTreeMap<String, String>) -> Self {
        let quota = settings.quota();
        Self {
            inspiration_cards_count: settings.inspiration_cards_count,
            total_cards: settings.batches_count * quota.total(),
            theme_prompt: settings.theme_prompt.clone(),
            rarity_distribution: QuotaEcho {
                mythic_per_batch: quota.mythic,
                rare_per_batch: quota.rare,
                uncommon_per_batch: quota.uncommon,
                common_per_batch: quota.common,
            },
            target_color_distribution: settings.color_distribution,
            models,
            basic_lands: LandEcho {
                enabled: settings.generate_basic_lands,
                variations_per_type: settings.land_variations_per_type,
            },
        }
    }
}

// ============================================================================
// Snapshots
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetInfo {
    pub theme: String,
    pub generation_date: DateTime<Local>,
    pub config: RunEcho,
    #[serde(flatten)]
    pub statistics: SetStatistics,
}

/// Theme, run parameters, statistics and every accepted card.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetSnapshot {
    pub set_info: SetInfo,
    pub cards: Vec<Card>,
}

impl SetSnapshot {
    pub fn new(theme: &str, echo: &RunEcho, cards: &[Card], conversion_failures: usize) -> Self {
        Self {
            set_info: SetInfo {
                theme: theme.to_string(),
                generation_date: Local::now(),
                config: echo.clone(),
                statistics: SetStatistics::compute(cards, conversion_failures),
            },
            cards: cards.to_vec(),
        }
    }

    pub fn statistics(&self) -> &SetStatistics {
        &self.set_info.statistics
    }

    pub async fn write(&self, path: &Path) -> Result<()> {
        write_json(path, self).await
    }

    pub async fn read(path: &Path) -> Result<Self> {
        let raw = tokio::fs::read_to_string(path).await?;
        Ok(serde_json::from_str(&raw)?)
    }
}

#[derive(Serialize)]
struct ProgressFile<'a> {
    theme: &'a str,
    cards: &'a [Card],
}

/// Rolling `{theme, cards}` progress file, rewritten after every batch.
pub async fn write_progress(output_dir: &Path, theme: &str, cards: &[Card]) -> Result<PathBuf> {
    let path = output_dir.join(OUTPUT_FILE);
    write_json(&path, &ProgressFile { theme, cards }).await?;
    Ok(path)
}

async fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let body = serde_json::to_string_pretty(value)?;
    tokio::fs::write(path, body).await?;
    Ok(())
}

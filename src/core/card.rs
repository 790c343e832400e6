//! Card Record Model
//!
//! The canonical in-memory representation of a generated card. Model output is
//! deserialized leniently (numbers or strings for stats, loose rarity names,
//! colour names or letters) and normalized into these types.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Colors
// ============================================================================

/// The five colours, in canonical WUBRG order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Color {
    White,
    Blue,
    Black,
    Red,
    Green,
}

impl Color {
    /// All colours in WUBRG order.
    pub const ALL: [Color; 5] = [
        Color::White,
        Color::Blue,
        Color::Black,
        Color::Red,
        Color::Green,
    ];

    /// Single-letter code used in mana symbols and render output.
    pub fn code(&self) -> &'static str {
        match self {
            Color::White => "W",
            Color::Blue => "U",
            Color::Black => "B",
            Color::Red => "R",
            Color::Green => "G",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Color::White => "White",
            Color::Blue => "Blue",
            Color::Black => "Black",
            Color::Red => "Red",
            Color::Green => "Green",
        }
    }

    /// Position in WUBRG order, usable as an array index.
    pub fn index(&self) -> usize {
        match self {
            Color::White => 0,
            Color::Blue => 1,
            Color::Black => 2,
            Color::Red => 3,
            Color::Green => 4,
        }
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

impl FromStr for Color {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "w" | "white" => Ok(Color::White),
            "u" | "blue" => Ok(Color::Blue),
            "b" | "black" => Ok(Color::Black),
            "r" | "red" => Ok(Color::Red),
            "g" | "green" => Ok(Color::Green),
            other => Err(format!("unknown color '{other}'")),
        }
    }
}

impl Serialize for Color {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.code())
    }
}

impl<'de> Deserialize<'de> for Color {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Sort into WUBRG order and drop duplicates.
pub fn normalize_colors(mut colors: Vec<Color>) -> Vec<Color> {
    colors.sort();
    colors.dedup();
    colors
}

// ============================================================================
// Rarity
// ============================================================================

/// Rarity tiers, each matching one of the per-batch quota buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Rarity {
    Common,
    Uncommon,
    Rare,
    Mythic,
}

impl Rarity {
    pub const ALL: [Rarity; 4] = [Rarity::Mythic, Rarity::Rare, Rarity::Uncommon, Rarity::Common];

    /// Name used in prompts and the internal card files.
    pub fn display_name(&self) -> &'static str {
        match self {
            Rarity::Common => "Common",
            Rarity::Uncommon => "Uncommon",
            Rarity::Rare => "Rare",
            Rarity::Mythic => "Mythic Rare",
        }
    }

    /// Lowercase key used by the render format and statistics.
    pub fn key(&self) -> &'static str {
        match self {
            Rarity::Common => "common",
            Rarity::Uncommon => "uncommon",
            Rarity::Rare => "rare",
            Rarity::Mythic => "mythic",
        }
    }
}

impl fmt::Display for Rarity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

impl FromStr for Rarity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "common" | "c" => Ok(Rarity::Common),
            "uncommon" | "u" => Ok(Rarity::Uncommon),
            "rare" | "r" => Ok(Rarity::Rare),
            "mythic" | "mythic rare" | "mythic_rare" | "m" => Ok(Rarity::Mythic),
            other => Err(format!("unknown rarity '{other}'")),
        }
    }
}

impl Serialize for Rarity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.display_name())
    }
}

impl<'de> Deserialize<'de> for Rarity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// Card
// ============================================================================

/// A single card of the generated set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Card {
    pub name: String,
    #[serde(default)]
    pub mana_cost: String,
    #[serde(rename = "type", alias = "type_line", default)]
    pub type_line: String,
    pub rarity: Rarity,
    #[serde(default, deserialize_with = "de_opt_stringish")]
    pub power: Option<String>,
    #[serde(default, deserialize_with = "de_opt_stringish")]
    pub toughness: Option<String>,
    #[serde(default, deserialize_with = "de_opt_stringish")]
    pub loyalty: Option<String>,
    #[serde(default, deserialize_with = "de_opt_stringish")]
    pub authority: Option<String>,
    #[serde(rename = "text", alias = "rules_text", default, deserialize_with = "de_stringish")]
    pub rules_text: String,
    #[serde(rename = "flavor", alias = "flavor_text", default, deserialize_with = "de_stringish")]
    pub flavor_text: String,
    #[serde(default, deserialize_with = "de_colors")]
    pub colors: Vec<Color>,
    #[serde(default)]
    pub set_name: String,
    #[serde(default)]
    pub art_prompt: Option<String>,
    #[serde(default)]
    pub image_path: Option<String>,
    #[serde(default, deserialize_with = "de_collector_number")]
    pub collector_number: Option<u32>,
    #[serde(default, deserialize_with = "de_stringish")]
    pub description: String,
}

impl Card {
    /// Create a bare card; text fields start empty.
    pub fn new(name: impl Into<String>, type_line: impl Into<String>, rarity: Rarity) -> Self {
        Self {
            name: name.into(),
            mana_cost: String::new(),
            type_line: type_line.into(),
            rarity,
            power: None,
            toughness: None,
            loyalty: None,
            authority: None,
            rules_text: String::new(),
            flavor_text: String::new(),
            colors: Vec::new(),
            set_name: String::new(),
            art_prompt: None,
            image_path: None,
            collector_number: None,
            description: String::new(),
        }
    }

    pub fn with_colors(mut self, colors: Vec<Color>) -> Self {
        self.colors = normalize_colors(colors);
        self
    }

    pub fn with_mana_cost(mut self, cost: impl Into<String>) -> Self {
        self.mana_cost = cost.into();
        self
    }

    pub fn with_rules_text(mut self, text: impl Into<String>) -> Self {
        self.rules_text = text.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Parse one card dictionary produced by the model.
    ///
    /// Colours are normalized to WUBRG order. Stats are kept only for the
    /// permanents that carry them (power/toughness on creatures, loyalty or
    /// authority on planeswalker-like permanents).
    pub fn from_generated(value: serde_json::Value) -> Result<Self, serde_json::Error> {
        let mut card: Card = serde_json::from_value(value)?;
        card.colors = normalize_colors(std::mem::take(&mut card.colors));
        if !card.is_creature() && !card.type_line.contains("Vehicle") {
            card.power = None;
            card.toughness = None;
        }
        if !card.is_planeswalker_like() {
            card.loyalty = None;
            card.authority = None;
        }
        // Numbering belongs to the pipeline, never to the model.
        card.collector_number = None;
        card.art_prompt = None;
        card.image_path = None;
        Ok(card)
    }

    pub fn is_creature(&self) -> bool {
        self.type_line.contains("Creature")
    }

    pub fn is_planeswalker_like(&self) -> bool {
        self.type_line.contains("Planeswalker") || self.type_line.contains("Battle")
    }

    /// Saga-like cards use tall, portrait-oriented art.
    pub fn is_vertical_layout(&self) -> bool {
        self.type_line.contains("Saga")
    }

    pub fn is_colorless(&self) -> bool {
        self.colors.is_empty()
    }

    /// Deterministic per-card file stem, safe to use as a file name.
    pub fn file_stem(&self) -> String {
        file_stem_for(&self.name)
    }

    /// Single-line summary used in prompts listing existing cards.
    pub fn summary_line(&self) -> String {
        format!(
            "- {} ({}): {} with {}, {}",
            self.name, self.rarity, self.type_line, self.mana_cost, self.rules_text
        )
    }
}

impl fmt::Display for Card {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}) - {}", self.name, self.rarity, self.mana_cost)
    }
}

/// File stem for a card name: whitespace runs and characters that are not
/// allowed in file names become `_`.
pub fn file_stem_for(name: &str) -> String {
    let stem: String = name
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    if stem.is_empty() {
        "unnamed".to_string()
    } else {
        stem
    }
}

// ============================================================================
// Lenient deserializers
// ============================================================================

fn value_to_string(value: serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::Null => None,
        serde_json::Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("null") {
                None
            } else {
                Some(trimmed.to_string())
            }
        }
        serde_json::Value::Number(n) => Some(n.to_string()),
        serde_json::Value::Bool(b) => Some(b.to_string()),
        other => Some(other.to_string()),
    }
}

fn de_opt_stringish<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    let value = serde_json::Value::deserialize(d)?;
    Ok(value_to_string(value))
}

fn de_stringish<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    let value = serde_json::Value::deserialize(d)?;
    Ok(value_to_string(value).unwrap_or_default())
}

fn de_colors<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<Color>, D::Error> {
    let value = serde_json::Value::deserialize(d)?;
    let raw: Vec<String> = match value {
        serde_json::Value::Array(items) => items.into_iter().filter_map(value_to_string).collect(),
        serde_json::Value::String(s) => s
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    };
    // "none", "colorless" and unknown entries are dropped.
    Ok(raw.iter().filter_map(|c| c.parse().ok()).collect())
}

fn de_collector_number<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u32>, D::Error> {
    let value = serde_json::Value::deserialize(d)?;
    Ok(match value {
        serde_json::Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}

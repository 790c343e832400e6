//! Colour-balance control loop
//!
//! Measures how far the accumulated set has drifted from its colour targets
//! and renders the analysis that steers the next batch request.

use std::collections::BTreeMap;
use std::fmt;

use crate::config::ColorTargets;
use crate::core::card::{Card, Color};

// ============================================================================
// Distribution
// ============================================================================

/// Share of each colour in the accumulated set, indexed WUBRG.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorDistribution {
    shares: [f64; 5],
}

impl ColorDistribution {
    pub fn uniform() -> Self {
        Self { shares: [0.2; 5] }
    }

    pub fn share(&self, color: Color) -> f64 {
        self.shares[color.index()]
    }

    /// `{"W": .., "U": .., ...}` in WUBRG order.
    pub fn to_map(&self) -> BTreeMap<&'static str, f64> {
        Color::ALL.iter().map(|c| (c.code(), self.share(*c))).collect()
    }

    /// Pretty JSON in WUBRG order, as embedded in batch prompts.
    pub fn to_json_pretty(&self) -> String {
        let mut out = String::from("{\n");
        for (i, color) in Color::ALL.iter().enumerate() {
            let sep = if i + 1 < Color::ALL.len() { "," } else { "" };
            out.push_str(&format!("  \"{}\": {}{}\n", color.code(), self.share(*color), sep));
        }
        out.push('}');
        out
    }
}

/// Raw colour weights: a card with `k` colours adds `1/k` to each.
pub fn color_weights(cards: &[Card]) -> [f64; 5] {
    let mut weights = [0.0; 5];
    for card in cards {
        if card.colors.is_empty() {
            continue;
        }
        let per_color = 1.0 / card.colors.len() as f64;
        for color in &card.colors {
            weights[color.index()] += per_color;
        }
    }
    weights
}

/// Current distribution of the accumulated cards.
///
/// With no coloured cards yet every colour gets an equal share; otherwise
/// colours without cards get 0.
pub fn current_distribution(cards: &[Card]) -> ColorDistribution {
    let weights = color_weights(cards);
    let total: f64 = weights.iter().sum();
    if total <= 0.0 {
        return ColorDistribution::uniform();
    }
    let mut shares = [0.0; 5];
    for (share, weight) in shares.iter_mut().zip(weights) {
        *share = weight / total;
    }
    ColorDistribution { shares }
}

// ============================================================================
// Classification
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Under,
    Over,
}

/// Relative deviation band of one colour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Representation {
    WellBalanced,
    Slightly(Direction),
    Significantly(Direction),
    Severely(Direction),
}

impl Representation {
    /// Classify `diff = target - current` relative to `target`.
    ///
    /// Bands: under 10% well-balanced, under 25% slightly, under 50%
    /// significantly, otherwise severely.
    pub fn classify(diff: f64, target: f64) -> Self {
        let pct = if target > 0.0 {
            (diff / target * 100.0).abs()
        } else if diff == 0.0 {
            0.0
        } else {
            f64::INFINITY
        };
        let direction = if diff > 0.0 {
            Direction::Under
        } else {
            Direction::Over
        };

        if pct < 10.0 {
            Representation::WellBalanced
        } else if pct < 25.0 {
            Representation::Slightly(direction)
        } else if pct < 50.0 {
            Representation::Significantly(direction)
        } else {
            Representation::Severely(direction)
        }
    }

    pub fn direction(&self) -> Option<Direction> {
        match self {
            Representation::WellBalanced => None,
            Representation::Slightly(d)
            | Representation::Significantly(d)
            | Representation::Severely(d) => Some(*d),
        }
    }
}

impl fmt::Display for Representation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (degree, direction) = match self {
            Representation::WellBalanced => return f.write_str("well-balanced"),
            Representation::Slightly(d) => ("slightly", d),
            Representation::Significantly(d) => ("significantly", d),
            Representation::Severely(d) => ("severely", d),
        };
        let side = match direction {
            Direction::Under => "under",
            Direction::Over => "over",
        };
        write!(f, "{degree} {side}-represented")
    }
}

// ============================================================================
// Report
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct ColorDeviation {
    pub color: Color,
    pub current: f64,
    pub target: f64,
    pub representation: Representation,
}

impl ColorDeviation {
    /// `target - current`; positive means the colour needs more cards.
    pub fn diff(&self) -> f64 {
        self.target - self.current
    }
}

/// Deviation of every colour from its target.
#[derive(Debug, Clone, PartialEq)]
pub struct BalanceReport {
    pub current: ColorDistribution,
    pub deviations: Vec<ColorDeviation>,
}

impl BalanceReport {
    pub fn new(cards: &[Card], targets: &ColorTargets) -> Self {
        let current = current_distribution(cards);
        let deviations = Color::ALL
            .iter()
            .map(|&color| {
                let target = targets.target(color);
                let share = current.share(color);
                ColorDeviation {
                    color,
                    current: share,
                    target,
                    representation: Representation::classify(target - share, target),
                }
            })
            .collect();
        Self {
            current,
            deviations,
        }
    }

    pub fn deviation(&self, color: Color) -> &ColorDeviation {
        &self.deviations[color.index()]
    }

    /// Under-represented colours, most severe first.
    pub fn priority_colors(&self) -> Vec<Color> {
        let mut under: Vec<&ColorDeviation> = self
            .deviations
            .iter()
            .filter(|d| d.representation.direction() == Some(Direction::Under))
            .collect();
        under.sort_by(|a, b| b.diff().total_cmp(&a.diff()));
        under.into_iter().map(|d| d.color).collect()
    }

    /// Over-represented colours to throttle.
    pub fn over_represented(&self) -> Vec<Color> {
        self.deviations
            .iter()
            .filter(|d| d.representation.direction() == Some(Direction::Over))
            .map(|d| d.color)
            .collect()
    }

    /// Analysis block embedded in the batch prompt.
    pub fn analysis_text(&self) -> String {
        let mut out = String::from("Color Distribution Analysis:\n");
        for d in &self.deviations {
            out.push_str(&format!(
                "- {} ({}): {:.1}% {}\n",
                d.color.display_name(),
                d.color.code(),
                d.diff().abs() * 100.0,
                d.representation
            ));
        }

        let priority = self.priority_colors();
        if !priority.is_empty() {
            let codes: Vec<&str> = priority.iter().map(|c| c.code()).collect();
            out.push_str(&format!("\nMost needed colors right now: {}\n", codes.join(", ")));
        }
        let over = self.over_represented();
        if !over.is_empty() {
            let codes: Vec<&str> = over.iter().map(|c| c.code()).collect();
            out.push_str(&format!("Colors to throttle: {}\n", codes.join(", ")));
        }

        out.push_str(
            "\nPriority for upcoming cards:\n\
             1. Colors that are severely under-represented should be highest priority\n\
             2. Colors that are significantly under-represented should be high priority\n\
             3. Colors that are over-represented should be avoided unless necessary for mechanics\n\
             4. Maintain overall color balance while serving the set's themes",
        );
        out
    }
}

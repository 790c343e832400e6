//! Prompt templates
//!
//! Every model-facing prompt is built here so the generator modules only
//! deal with control flow.

use crate::config::{ColorTargets, RarityQuota};
use crate::core::card::{Card, Color};

use super::balance::{BalanceReport, ColorDistribution};
use super::inspiration::InspirationCard;

pub const JSON_CONVERTER_SYSTEM_PROMPT: &str = "You are a JSON converter.";
pub const ART_PROMPT_SYSTEM_PROMPT: &str = "You are an expert MTG art prompt generator.";
pub const RENDER_CONVERTER_SYSTEM_PROMPT: &str = "You are a JSON converter that converts MTG card data to rendering format. Return only the JSON object with no additional text.";

/// Opening words every card art prompt must start with.
pub const ART_PROMPT_PREFIX: &str = "Oil on canvas painting. Magic the gathering art. Rough brushstrokes.";
/// Opening words every basic land art prompt must start with.
pub const LAND_PROMPT_PREFIX: &str = "Oil on canvas painting. Magic the gathering art. Detailed landscape.";

// ============================================================================
// Theme
// ============================================================================

pub fn theme_prompt(inspiration: &[InspirationCard], theme_prompt: Option<&str>) -> String {
    let summary = inspiration
        .iter()
        .map(InspirationCard::theme_line)
        .collect::<Vec<_>>()
        .join("\n");

    let mut prompt = format!(
        "Some inspirational cards. These cards are not in the set and not part of the theme. \
You can just use them to get a feel for the mechanics, types etc.:
{summary}

Create a detailed theme for a new Magic The Gathering set. Include:
1. Detailed history and lore of the set, including notable characters/creatures and events
2. Key locations and events, themes of the set
3. A list of creature types that appear in the set (not all, just the most common ones)
4. Main mechanical themes and gameplay elements. No new mechanics, unless prompted by the user.
5. Potential synergies between different card types and mechanics
6. How the theme supports different play styles

Be as detailed as possible to create a rich and engaging world for the set.
"
    );

    if let Some(user_prompt) = theme_prompt.filter(|p| !p.trim().is_empty()) {
        prompt = format!("Base the theme on the following prompt: {user_prompt}\n\n{prompt}");
    }

    prompt.push_str(
        "\n\nThe theme should be original while maintaining the core elements that make Magic engaging.",
    );
    prompt
}

// ============================================================================
// Batch
// ============================================================================

/// Everything a batch request is built from.
pub struct BatchPromptContext<'a> {
    pub inspiration: &'a [InspirationCard],
    pub theme: &'a str,
    pub existing: &'a [Card],
    pub report: &'a BalanceReport,
    pub targets: &'a ColorTargets,
    pub quota: RarityQuota,
}

const RARITY_GUIDELINES: &str = "# Card Rarity Guidelines

## Common
- Simple, vanilla effects that work in multiples
- Basic creature types and spells
- Usually clean, short rules text, or no rules at all
- Foundation of gameplay mechanics

## Uncommon
- Moderately complex abilities
- Support for specific strategies
- Clear synergies with other cards

## Rare
- Format-defining effects
- Important characters or spells
- Unique mechanics
- Can shape deck strategies

## Mythic Rare
- Game-changing effects
- Major characters
- Splashy, memorable designs
- Build-around centerpieces";

const BATCH_INSTRUCTIONS: &str = "Instructions:

- Create a batch of new cards that fit into the theme of the set.
- Think of how this batch adds to the existing cards in the set.
- Make sure each batch has some memorable cards.
- Ensure that these cards are different enough from the cards already in the set. They should add to the variety and depth of the set.
- Think about already existing cards, and how the cards in this batch complement those cards.
- Think about the color distribution analysis above and prioritize underrepresented colors.
- Try to keep card types in the set well-balanced.
- Make sure the color distribution in the whole set is balanced. Artifacts and colorless cards are also important, if they fit the theme.
- ALWAYS include an explanation between brackets for any new mechanics or keywords introduced in this set, or for less common mechanics. Well known mechanics like flying, haste, etc. do not need explanations.
- Think about synergy in the set.
- Look at the rarity instructions.";

const CARD_TEMPLATE: &str = "For each card, provide a complete description in this format:
Card Name (Rarity)
Mana Cost: [cost]
Type: [type]
Power/Toughness: [P/T] (if creature)
Rules Text: [text]
Flavor Text: [flavor]
Colors: [colors]
Description: [short lore + visual description]";

fn targets_json(targets: &ColorTargets) -> String {
    let lines: Vec<String> = Color::ALL
        .iter()
        .map(|c| format!("  \"{}\": {}", c.code(), targets.target(*c)))
        .collect();
    format!("{{\n{}\n}}", lines.join(",\n"))
}

pub fn batch_prompt(ctx: &BatchPromptContext<'_>) -> String {
    let inspiration = ctx
        .inspiration
        .iter()
        .map(InspirationCard::batch_line)
        .collect::<Vec<_>>()
        .join("\n");
    let existing = if ctx.existing.is_empty() {
        "(none yet)".to_string()
    } else {
        ctx.existing
            .iter()
            .map(Card::summary_line)
            .collect::<Vec<_>>()
            .join("\n")
    };
    let current: &ColorDistribution = &ctx.report.current;
    let q = ctx.quota;

    format!(
        "Based on the following context for a Magic The Gathering set:

Some inspirational cards. Just use these for mechanics, types etc. These cards are not in the set and not part of the theme:
{inspiration}

Theme:
{theme}

{RARITY_GUIDELINES}

Existing cards in the set:
{existing}

Current color distribution:
{current_json}

Target color distribution:
{target_json}

{analysis}

{BATCH_INSTRUCTIONS}

First describe a few unique characters or events for the theme that are not already in the existing cards (notable characters in theme is fine).
Keep in mind the number of rarities in this batch. These could inspire the cards in the batch.

Then generate {total} new cards, fitting the theme, with the following rarity distribution:
- {mythic} Mythic Rare
- {rare} Rare
- {uncommon} Uncommon
- {common} Common

{CARD_TEMPLATE}",
        theme = ctx.theme,
        current_json = current.to_json_pretty(),
        target_json = targets_json(ctx.targets),
        analysis = ctx.report.analysis_text(),
        total = q.total(),
        mythic = q.mythic,
        rare = q.rare,
        uncommon = q.uncommon,
        common = q.common,
    )
}

pub fn continuation_prompt(missing: usize) -> String {
    format!("continue with the remaining {missing} cards")
}

pub fn text_to_json_prompt(cards_text: &str) -> String {
    format!(
        "Convert the following Magic: The Gathering card descriptions into a JSON array.
Each card should have the following fields: name, mana_cost, type, rarity, power (null if not creature), \
toughness (null if not creature), loyalty (null if not planeswalker), text, flavor, \
colors (array of W, U, B, R, G or empty if colorless), description.

Cards to convert:

{cards_text}

Return only the JSON array with no additional text or explanation."
    )
}

// ============================================================================
// Art
// ============================================================================

const VERTICAL_INSTRUCTIONS: &str = "IMPORTANT: This is a Saga card which requires VERTICAL art composition (portrait orientation).
The art should be tall rather than wide. Saga cards display art along the right side of the card in a vertical format.
Create a VERTICAL composition that works well with the Saga card layout.";

fn compression_instructions(limit: usize) -> String {
    let words = (limit as f64 / 1.3).floor() as usize;
    format!(
        "IMPORTANT: The image model only reads about {limit} tokens. Keep the prompt under {words} words, \
using short comma-separated phrases and leading with the most important visual elements."
    )
}

/// Art prompt request for a card. `attempt` is 1-based; later attempts add
/// a safety nudge.
pub fn art_prompt(card: &Card, theme: &str, attempt: u32, token_limit: Option<usize>) -> String {
    let theme_context = if theme.trim().is_empty() {
        String::new()
    } else {
        format!(
            "Set Theme Context:
{theme}

Consider this theme when creating the art prompt. The art should reflect both the card's individual characteristics and the overall set theme."
        )
    };
    let colors = if card.colors.is_empty() {
        "Colorless".to_string()
    } else {
        card.colors
            .iter()
            .map(|c| c.code())
            .collect::<Vec<_>>()
            .join(", ")
    };
    let stats = match (&card.power, &card.toughness) {
        (Some(p), Some(t)) => format!("P/T: {p}/{t}\n"),
        _ => String::new(),
    };

    let mut sections = vec!["Create a detailed art prompt for a Magic: The Gathering card.".to_string()];
    if card.is_vertical_layout() {
        sections.push(VERTICAL_INSTRUCTIONS.to_string());
    }
    if let Some(limit) = token_limit {
        sections.push(compression_instructions(limit));
    }
    sections.push(format!(
        "Theme: {theme_context}
Card Name: {name}
Type: {type_line}
Rarity: {rarity}
Card Text: {text}
Flavor Text: {flavor}
Colors: {colors}
{stats}Description: {description}",
        name = card.name,
        type_line = card.type_line,
        rarity = card.rarity,
        text = card.rules_text,
        flavor = card.flavor_text,
        description = card.description,
    ));

    let mut instructions = format!(
        "Instructions for prompt generation:
- Focus on vivid, detailed scenes reflecting mechanics and flavor.
- Specify composition, lighting, mood, and key details.
- Start with \"{ART_PROMPT_PREFIX}\"
- Ensure prompt is safe for work.
- If a character name is present, include their full name.
- Return only the prompt text."
    );
    if attempt > 1 {
        instructions.push_str(&format!(
            "\nRetry attempt {}: Focus on safety and clarity.",
            attempt - 1
        ));
    }
    sections.push(instructions);
    sections.join("\n\n")
}

/// Art prompt request for one basic land variation.
///
/// `siblings` are the prompts already produced for the same land type.
pub fn land_art_prompt(
    land_type: &str,
    variation: u32,
    variations: u32,
    theme: &str,
    siblings: &[String],
) -> String {
    let sibling_block = if siblings.is_empty() {
        String::new()
    } else {
        let listed = siblings
            .iter()
            .enumerate()
            .map(|(i, p)| format!("Variation {}: {}", i + 1, p))
            .collect::<Vec<_>>()
            .join("\n");
        format!(
            "\nPrompts already written for other {land_type} variations (do NOT repeat their scenes, \
landmarks, time of day or weather):\n{listed}\n"
        )
    };

    format!(
        "Create a detailed art prompt for a {land_type} basic land card in Magic: The Gathering.

Set Theme Context:
{theme}

This is variation {variation} of {variations} of the {land_type} for this set. Make it unique and distinct from other variations while still fitting the overall set theme.
{sibling_block}
Create a vivid, detailed scene that captures the essence of a {land_type}. The art should reflect the color identity and mana characteristics of this land type, while incorporating elements from the set's theme.

The prompt should begin with \"{LAND_PROMPT_PREFIX}\" and should include elements that make this land distinctly a {land_type} while fitting the theme.

Focus on:
- The landscape features typical of a {land_type}
- The mood and atmosphere that reflects the land's color identity
- How this landscape connects to the set's theme
- What makes this variation unique from other versions of the same land type
- Environmental details, weather conditions, time of day, and lighting that create a distinctive scene
- Any characteristic flora, fauna, or geographical elements associated with this land type

Example land art prompts:

Example 1 (Mountain): \"{LAND_PROMPT_PREFIX} Jagged crimson peaks emerging from mist, with streams of molten lava creating veins of orange light down their faces. The mountain range extends into the distance, with storm clouds gathering above. Lightning strikes illuminate the rugged terrain, revealing ancient dwarven ruins carved into the cliffs.\"

Example 2 (Island): \"{LAND_PROMPT_PREFIX} A secluded cove surrounded by towering blue-crystal formations that rise from turquoise waters. Spiral-shaped coral formations emit an ethereal blue glow beneath the water's surface. Mist hangs over the waters, creating an otherworldly atmosphere.\"

Return only the art prompt text with no additional explanation."
    )
}

// ============================================================================
// Render format
// ============================================================================

const RENDER_RULES: &str = "# Valid Color Values
Single colors: W, U, B, R, G
Dual colors: WU, WB, WR, WG, UB, UR, UG, BR, BG, RG
Special types: Artifact, Vehicle, Land, Gold
Rarity values: common, uncommon, rare, mythic

# Transformation Rules
1. Use the image_path from input, but prepend \"../card-generator/\" to the path, as image_uris.art_crop
2. Convert colors from individual letters to paired format (e.g., [\"G\", \"W\"] becomes [\"WG\"]), from the dual-color list above. Cards with three or more colors use [\"Gold\"]; colorless artifacts use [\"Artifact\"], vehicles [\"Vehicle\"] and lands [\"Land\"]
3. Set 'layout' to \"normal\" (\"saga\" for Saga cards)
4. Set 'set' to \"thb\"
5. Set 'artist' to \"Vincent Bons\"
6. Convert all power/toughness/loyalty values to strings, when they exist. Otherwise don't include them
7. Replace \"—\" with \"-\" in type_line
8. Add double newlines between separate rules in oracle_text
9. Include the collector_number from the input exactly as provided
10. Convert the card text to oracle_text, handling line breaks and quotes properly. Keep Saga chapter markers (I, II, III) at the start of their lines
11. Convert type to type_line
12. Convert flavor to flavor_text (when present)
13. Make rarity lowercase in the output (\"Mythic Rare\" becomes \"mythic\")
14. For basic lands named like \"Forest 2\", set name to the bare land type (\"Forest\") and keep the full name as original_name";

const RENDER_EXAMPLES: [(&str, &str); 3] = [
    (
        r#"{
  "name": "Ancient Grovekeeper",
  "mana_cost": "{2}{G}{W}",
  "type": "Creature — Treefolk Druid",
  "rarity": "Uncommon",
  "power": 3,
  "toughness": 5,
  "text": "Whenever you Stabilize, create a 1/1 green Saproling creature token.\nCreatures you control with toughness 4 or greater have vigilance.",
  "flavor": "The Dissenting Ancients believe Yros must regrow from destruction, one root at a time.",
  "colors": ["G", "W"],
  "image_path": "output/20250208_152032/card_images/Ancient_Grovekeeper.png",
  "collector_number": "87"
}"#,
        r#"{
  "name": "Ancient Grovekeeper",
  "layout": "normal",
  "collector_number": "87",
  "image_uris": {
    "art_crop": "../card-generator/output/20250208_152032/card_images/Ancient_Grovekeeper.png"
  },
  "mana_cost": "{2}{G}{W}",
  "type_line": "Creature - Treefolk Druid",
  "oracle_text": "Whenever you Stabilize, create a 1/1 green Saproling creature token.\n\nCreatures you control with toughness 4 or greater have vigilance.",
  "colors": ["WG"],
  "set": "thb",
  "rarity": "uncommon",
  "artist": "Vincent Bons",
  "power": "3",
  "toughness": "5",
  "flavor_text": "The Dissenting Ancients believe Yros must regrow from destruction, one root at a time."
}"#,
    ),
    (
        r#"{
  "name": "Cindershard Raider",
  "mana_cost": "{3}{B}{R}",
  "type": "Creature — Spirit Warrior",
  "rarity": "Uncommon",
  "power": 4,
  "toughness": 3,
  "text": "Haste\nWhenever Cindershard Raider attacks, you may sacrifice an artifact. If you do, it gains first strike and 'When this creature dies, it deals 3 damage to any target' until end of turn.",
  "flavor": "The rift-touched burn twice, once in battle and once in the memory of the dead.",
  "colors": ["B", "R"],
  "image_path": "output/20250208_152032/card_images/Cindershard_Raider.png",
  "collector_number": "88"
}"#,
        r#"{
  "name": "Cindershard Raider",
  "layout": "normal",
  "collector_number": "88",
  "image_uris": {
    "art_crop": "../card-generator/output/20250208_152032/card_images/Cindershard_Raider.png"
  },
  "mana_cost": "{3}{B}{R}",
  "type_line": "Creature - Spirit Warrior",
  "oracle_text": "Haste\n\nWhenever Cindershard Raider attacks, you may sacrifice an artifact. If you do, it gains first strike and \"When this creature dies, it deals 3 damage to any target\" until end of turn.",
  "colors": ["BR"],
  "set": "thb",
  "rarity": "uncommon",
  "artist": "Vincent Bons",
  "power": "4",
  "toughness": "3",
  "flavor_text": "The rift-touched burn twice, once in battle and once in the memory of the dead."
}"#,
    ),
    (
        r#"{
  "name": "Molten Cataclysm",
  "mana_cost": "{2}{R}{R}{G}",
  "type": "Sorcery",
  "rarity": "Rare",
  "power": null,
  "toughness": null,
  "text": "Destroy all artifacts, then destroy target land for each artifact destroyed this way.\nIf Molten Cataclysm had three or more colors spent to cast it, create a 5/5 red Elemental creature token with trample.",
  "flavor": "The Scavenger Tribes see opportunity in fire and ruin.",
  "colors": ["R", "G"],
  "image_path": "output/20250208_152032/card_images/Molten_Cataclysm.png",
  "collector_number": "89"
}"#,
        r#"{
  "name": "Molten Cataclysm",
  "layout": "normal",
  "collector_number": "89",
  "image_uris": {
    "art_crop": "../card-generator/output/20250208_152032/card_images/Molten_Cataclysm.png"
  },
  "mana_cost": "{2}{R}{R}{G}",
  "type_line": "Sorcery",
  "oracle_text": "Destroy all artifacts, then destroy target land for each artifact destroyed this way.\n\nIf Molten Cataclysm had three or more colors spent to cast it, create a 5/5 red Elemental creature token with trample.",
  "colors": ["RG"],
  "set": "thb",
  "rarity": "rare",
  "artist": "Vincent Bons",
  "flavor_text": "The Scavenger Tribes see opportunity in fire and ruin."
}"#,
    ),
];

/// Few-shot request converting one card record to render format.
pub fn render_conversion_prompt(card_json: &str) -> String {
    let mut prompt = format!(
        "Convert the following MTG card data to the rendering format following these rules:\n\n{RENDER_RULES}\n\nHere are some examples:\n"
    );
    for (i, (input, output)) in RENDER_EXAMPLES.iter().enumerate() {
        prompt.push_str(&format!(
            "\nExample {}:\nInput: {}\n\nOutput: {}\n",
            i + 1,
            input,
            output
        ));
    }
    prompt.push_str(&format!(
        "\nNow convert this card data to the same format:\n{card_json}\n\nReturn only the JSON object with no additional text."
    ));
    prompt
}

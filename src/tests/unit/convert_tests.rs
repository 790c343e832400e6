//! Render format converter: retries, post-processing, directory mode

use std::sync::Arc;

use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::core::card::{Card, Color, Rarity};
use crate::core::generation::{RenderFormatConverter, RetryPolicy};
use crate::core::llm::ModelKey;
use crate::tests::mocks::{ScriptedStructuredGenerator, StructuredReply};

fn grovekeeper() -> Card {
    let mut card = Card::new("Ancient Grovekeeper", "Creature — Treefolk Druid", Rarity::Uncommon)
        .with_colors(vec![Color::Green, Color::White])
        .with_mana_cost("{2}{G}{W}");
    card.power = Some("3".into());
    card.toughness = Some("5".into());
    card.collector_number = Some(87);
    card.image_path = Some("output/set/card_images/Ancient_Grovekeeper.png".into());
    card
}

fn model_output() -> Value {
    json!({
        "name": "Ancient Grovekeeper",
        "layout": "normal",
        "collector_number": 87,
        "mana_cost": "{2}{G}{W}",
        "type_line": "Creature — Treefolk Druid",
        "oracle_text": "Vigilance",
        "colors": ["WG"],
        "set": "thb",
        "rarity": "Uncommon",
        "artist": "Vincent Bons",
        "power": 3,
        "toughness": 5
    })
}

fn converter(structured: &Arc<ScriptedStructuredGenerator>, out: &std::path::Path) -> RenderFormatConverter {
    RenderFormatConverter::new(structured.clone(), out).with_policy(RetryPolicy::fixed(3, 0))
}

fn read_json(path: &std::path::Path) -> Value {
    serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
}

#[tokio::test]
async fn test_convert_card_writes_normalized_record() {
    let dir = tempfile::tempdir().unwrap();
    let structured = Arc::new(ScriptedStructuredGenerator::values(vec![model_output()]));

    let path = converter(&structured, dir.path())
        .convert_card(&grovekeeper(), "Ancient_Grovekeeper", &CancellationToken::new())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(path, dir.path().join("render_format").join("Ancient_Grovekeeper_render.json"));
    let record = read_json(&path);
    assert_eq!(record["collector_number"], "87");
    assert_eq!(record["rarity"], "uncommon");
    assert_eq!(record["type_line"], "Creature - Treefolk Druid");
    assert_eq!(record["power"], "3");
    assert_eq!(
        record["image_uris"]["art_crop"],
        "../card-generator/output/set/card_images/Ancient_Grovekeeper.png"
    );

    let call = &structured.calls()[0];
    assert_eq!(call.model_key, ModelKey::Json);
    assert!(call.prompt.contains("\"collector_number\": \"87\""));
    assert!(call.prompt.starts_with("Convert the following MTG card data to the rendering format"));
}

#[tokio::test]
async fn test_conversion_is_idempotent_for_fixed_output() {
    let dir = tempfile::tempdir().unwrap();
    let structured = Arc::new(ScriptedStructuredGenerator::values(vec![model_output(), model_output()]));
    let conv = converter(&structured, dir.path());
    let cancel = CancellationToken::new();

    let path = conv
        .convert_card(&grovekeeper(), "Ancient_Grovekeeper", &cancel)
        .await
        .unwrap()
        .unwrap();
    let first = std::fs::read(&path).unwrap();
    conv.convert_card(&grovekeeper(), "Ancient_Grovekeeper", &cancel)
        .await
        .unwrap()
        .unwrap();
    let second = std::fs::read(&path).unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_malformed_output_is_retried() {
    let dir = tempfile::tempdir().unwrap();
    let structured = Arc::new(ScriptedStructuredGenerator::new(vec![
        StructuredReply::Malformed("Sure! Here you go".into()),
        StructuredReply::Value(json!(["not", "an", "object"])),
        StructuredReply::Value(model_output()),
    ]));

    let written = converter(&structured, dir.path())
        .convert_card(&grovekeeper(), "Ancient_Grovekeeper", &CancellationToken::new())
        .await
        .unwrap();
    assert!(written.is_some());

    let calls = structured.calls();
    assert_eq!(calls.len(), 3);
    // retries re-issue the identical request
    assert_eq!(calls[0].prompt, calls[2].prompt);
}

#[tokio::test]
async fn test_exhausted_conversion_is_reported_not_raised() {
    let dir = tempfile::tempdir().unwrap();
    let structured = Arc::new(ScriptedStructuredGenerator::new(vec![
        StructuredReply::Malformed("a".into()),
        StructuredReply::Malformed("b".into()),
        StructuredReply::Malformed("c".into()),
    ]));

    let report = converter(&structured, dir.path())
        .convert_cards(&[grovekeeper()], &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.failures, 1);
    assert!(report.written.is_empty());
}

#[tokio::test]
async fn test_land_variant_keeps_original_name() {
    let dir = tempfile::tempdir().unwrap();
    let mut forest = Card::new("Forest 3", "Basic Land — Forest", Rarity::Common).with_colors(vec![Color::Green]);
    forest.collector_number = Some(120);
    forest.image_path = Some("out/card_images/Forest_3.png".into());
    let structured = Arc::new(ScriptedStructuredGenerator::values(vec![json!({
        "name": "Forest 3",
        "type_line": "Basic Land — Forest",
        "colors": ["Land"]
    })]));

    let report = converter(&structured, dir.path())
        .convert_cards(&[forest], &CancellationToken::new())
        .await
        .unwrap();
    let record = read_json(&report.written[0]);
    assert_eq!(record["name"], "Forest");
    assert_eq!(record["original_name"], "Forest 3");
    assert_eq!(record["image_uris"]["art_crop"], "../card-generator/out/card_images/Forest_3.png");
    assert!(report.written[0].ends_with("Forest_3_render.json"));
}

#[tokio::test]
async fn test_convert_directory_skips_snapshots() {
    let dir = tempfile::tempdir().unwrap();
    let record = json!({ "card": serde_json::to_value(grovekeeper()).unwrap() });
    std::fs::write(dir.path().join("Ancient_Grovekeeper.json"), record.to_string()).unwrap();
    std::fs::write(dir.path().join("mtg_set_batch_1.json"), "{}").unwrap();
    std::fs::write(dir.path().join("mtg_set_complete.json"), "{}").unwrap();
    std::fs::write(dir.path().join("mtg_set_output.json"), "{}").unwrap();
    std::fs::write(dir.path().join("broken.json"), "{ nope").unwrap();

    let structured = Arc::new(ScriptedStructuredGenerator::values(vec![model_output()]));
    let report = converter(&structured, dir.path())
        .convert_directory(dir.path(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(structured.calls().len(), 1);
    assert_eq!(report.written.len(), 1);
    assert_eq!(report.failures, 1);
    let out = read_json(&report.written[0]);
    // numbers survive the round trip through the card file
    assert_eq!(out["collector_number"], "87");
}

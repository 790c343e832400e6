//! Art pipeline: prompt and image retries, failure recording

use std::path::PathBuf;
use std::sync::Arc;

use mockall::predicate::always;
use tokio_util::sync::CancellationToken;

use crate::core::card::{Card, Color, Rarity};
use crate::core::generation::{ArtOutcome, ArtPipeline, RetryPolicy, ART_PROMPT_FAILED};
use crate::core::image::ImageError;
use crate::core::llm::ModelKey;
use crate::tests::common::card;
use crate::tests::mocks::{MockImageGenerator, Reply, ScriptedTextGenerator};

fn pipeline(text: &Arc<ScriptedTextGenerator>, image: MockImageGenerator, out: &std::path::Path) -> ArtPipeline {
    ArtPipeline::new(text.clone(), Arc::new(image), out, "card_images")
        .with_policies(RetryPolicy::fixed(3, 0), RetryPolicy::fixed(3, 0))
}

fn read_record(out: &std::path::Path, stem: &str) -> serde_json::Value {
    let raw = std::fs::read_to_string(out.join(format!("{stem}.json"))).unwrap();
    serde_json::from_str(&raw).unwrap()
}

#[tokio::test]
async fn test_successful_card_records_prompt_and_path() {
    let dir = tempfile::tempdir().unwrap();
    let text = Arc::new(ScriptedTextGenerator::new(vec!["Oil on canvas painting. A druid."]));
    let mut image = MockImageGenerator::new();
    image.expect_prompt_token_limit().return_const(None::<usize>);
    image
        .expect_generate()
        .with(mockall::predicate::eq("Oil on canvas painting. A druid."), always(), always())
        .times(1)
        .returning(|_, _, dest| Ok(dest.to_path_buf()));

    let mut card = card("Grove Warden", Rarity::Uncommon, vec![Color::Green]);
    let outcome = pipeline(&text, image, dir.path())
        .process_card(&mut card, "Forest theme", &CancellationToken::new())
        .await
        .unwrap();

    let expected = dir.path().join("card_images").join("Grove_Warden.png");
    assert_eq!(outcome, ArtOutcome::Generated(expected.clone()));
    assert_eq!(card.image_path.as_deref(), Some(expected.display().to_string().as_str()));
    assert_eq!(card.art_prompt.as_deref(), Some("Oil on canvas painting. A druid."));

    let call = &text.calls()[0];
    assert_eq!(call.model_key, ModelKey::ArtPrompt);
    assert_eq!(call.system_prompt.as_deref(), Some("You are an expert MTG art prompt generator."));
    assert!(call.prompt.contains("Card Name: Grove Warden"));
    assert!(call.prompt.contains("Forest theme"));

    let record = read_record(dir.path(), "Grove_Warden");
    assert_eq!(record["card"]["name"], "Grove Warden");
    assert_eq!(record["card"]["art_prompt"], "Oil on canvas painting. A druid.");
}

#[tokio::test]
async fn test_image_failing_every_attempt_leaves_path_empty() {
    let dir = tempfile::tempdir().unwrap();
    let text = Arc::new(ScriptedTextGenerator::new(vec!["A stormy coast"]));
    let mut image = MockImageGenerator::new();
    image.expect_prompt_token_limit().return_const(None::<usize>);
    image
        .expect_generate()
        .times(3)
        .returning(|_, _, _| Err(ImageError::Failed("nsfw filter".into())));

    let mut card = card("X", Rarity::Rare, vec![Color::Blue]);
    let outcome = pipeline(&text, image, dir.path())
        .process_card(&mut card, "", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome, ArtOutcome::ImageFailed);
    assert!(card.image_path.is_none());
    assert_eq!(card.art_prompt.as_deref(), Some("A stormy coast"));

    let record = read_record(dir.path(), "X");
    assert!(record["card"]["image_path"].is_null());
    assert_eq!(record["card"]["art_prompt"], "A stormy coast");
}

#[tokio::test]
async fn test_prompt_exhaustion_records_sentinel_and_skips_image() {
    let dir = tempfile::tempdir().unwrap();
    let text = Arc::new(ScriptedTextGenerator::from_replies(vec![
        Reply::Fail(500),
        Reply::Fail(500),
        Reply::Fail(500),
    ]));
    let mut image = MockImageGenerator::new();
    image.expect_prompt_token_limit().return_const(None::<usize>);
    image.expect_generate().times(0);

    let mut card = card("Lost Soul", Rarity::Common, vec![Color::Black]);
    let outcome = pipeline(&text, image, dir.path())
        .process_card(&mut card, "", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome, ArtOutcome::PromptFailed);
    assert_eq!(card.art_prompt.as_deref(), Some(ART_PROMPT_FAILED));
    assert!(card.image_path.is_none());

    // later attempts ask for safety
    let calls = text.calls();
    assert_eq!(calls.len(), 3);
    assert!(!calls[0].prompt.contains("Retry attempt"));
    assert!(calls[1].prompt.contains("Retry attempt 1: Focus on safety and clarity."));
    assert!(calls[2].prompt.contains("Retry attempt 2: Focus on safety and clarity."));
}

#[tokio::test]
async fn test_prompt_retry_then_success() {
    let dir = tempfile::tempdir().unwrap();
    let text = Arc::new(ScriptedTextGenerator::from_replies(vec![
        Reply::Fail(429),
        Reply::Text("Second try".into()),
    ]));
    let mut image = MockImageGenerator::new();
    image.expect_prompt_token_limit().return_const(None::<usize>);
    image.expect_generate().times(1).returning(|_, _, dest| Ok(dest.to_path_buf()));

    let mut card = card("Phoenix", Rarity::Mythic, vec![Color::Red]);
    let outcome = pipeline(&text, image, dir.path())
        .process_card(&mut card, "", &CancellationToken::new())
        .await
        .unwrap();
    assert!(!outcome.is_failure());
    assert_eq!(card.art_prompt.as_deref(), Some("Second try"));
}

#[tokio::test]
async fn test_token_limit_and_vertical_instructions_reach_prompt() {
    let dir = tempfile::tempdir().unwrap();
    let text = Arc::new(ScriptedTextGenerator::new(vec!["short prompt"]));
    let mut image = MockImageGenerator::new();
    image.expect_prompt_token_limit().return_const(Some(77usize));
    image.expect_generate().returning(|_, _, dest| Ok(dest.to_path_buf()));

    let mut saga = Card::new("The Long Winter", "Enchantment — Saga", Rarity::Rare)
        .with_colors(vec![Color::White]);
    pipeline(&text, image, dir.path())
        .process_card(&mut saga, "", &CancellationToken::new())
        .await
        .unwrap();

    let prompt = &text.calls()[0].prompt;
    assert!(prompt.contains("VERTICAL art composition"));
    assert!(prompt.contains("about 77 tokens"));
}

#[tokio::test]
async fn test_batch_failures_do_not_stop_siblings() {
    let dir = tempfile::tempdir().unwrap();
    let text = Arc::new(ScriptedTextGenerator::new(vec!["prompt a", "prompt b"]));
    let mut image = MockImageGenerator::new();
    image.expect_prompt_token_limit().return_const(None::<usize>);
    image.expect_generate().returning(|prompt, _, dest| {
        if prompt == "prompt a" {
            Err(ImageError::Timeout(300))
        } else {
            Ok(dest.to_path_buf())
        }
    });

    let mut cards = vec![
        card("A", Rarity::Common, vec![Color::Red]),
        card("B", Rarity::Common, vec![Color::Green]),
    ];
    let failures = pipeline(&text, image, dir.path())
        .process_cards(&mut cards, "", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(failures, 1);
    assert!(cards[0].image_path.is_none());
    assert_eq!(
        cards[1].image_path.as_deref().map(PathBuf::from),
        Some(dir.path().join("card_images").join("B.png"))
    );
}

#[tokio::test]
async fn test_split_card_name_writes_sanitized_files() {
    let dir = tempfile::tempdir().unwrap();
    let text = Arc::new(ScriptedTextGenerator::new(vec!["Fire and frost", "A druid"]));
    let mut image = MockImageGenerator::new();
    image.expect_prompt_token_limit().return_const(None::<usize>);
    image
        .expect_generate()
        .times(2)
        .returning(|_, _, dest| Ok(dest.to_path_buf()));

    let mut cards = vec![
        card("Fire // Ice", Rarity::Uncommon, vec![Color::Red, Color::Blue]),
        card("Grove Warden", Rarity::Uncommon, vec![Color::Green]),
    ];
    let failures = pipeline(&text, image, dir.path())
        .process_cards(&mut cards, "", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(failures, 0);
    assert!(cards.iter().all(|c| c.art_prompt.is_some() && c.image_path.is_some()));
    assert_eq!(
        cards[0].image_path.as_deref().map(PathBuf::from),
        Some(dir.path().join("card_images").join("Fire___Ice.png"))
    );
    assert_eq!(read_record(dir.path(), "Fire___Ice")["card"]["name"], "Fire // Ice");
    assert!(dir.path().join("Grove_Warden.json").exists());
}

//! Basic land generation: naming, numbering, distinct prompts

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::core::card::{Card, Color, Rarity};
use crate::core::generation::{ArtPipeline, CollectorNumbering, LandGenerator, RetryPolicy};
use crate::core::image::ImageError;
use crate::tests::common::card;
use crate::tests::mocks::{MockImageGenerator, Reply, ScriptedTextGenerator};

fn counting_text() -> Arc<ScriptedTextGenerator> {
    let counter = AtomicUsize::new(0);
    Arc::new(ScriptedTextGenerator::from_replies(Vec::new()).with_responder(move |_| {
        Reply::Text(format!("Landscape #{}", counter.fetch_add(1, Ordering::SeqCst)))
    }))
}

fn ok_images() -> MockImageGenerator {
    let mut image = MockImageGenerator::new();
    image.expect_prompt_token_limit().return_const(None::<usize>);
    image.expect_generate().returning(|_, _, dest| Ok(dest.to_path_buf()));
    image
}

fn art(text: &Arc<ScriptedTextGenerator>, image: MockImageGenerator, out: &std::path::Path) -> ArtPipeline {
    ArtPipeline::new(text.clone(), Arc::new(image), out, "card_images")
        .with_policies(RetryPolicy::fixed(3, 0), RetryPolicy::fixed(3, 0))
}

fn lands_of<'a>(lands: &'a [Card], land_type: &str) -> Vec<&'a Card> {
    lands
        .iter()
        .filter(|c| c.type_line == format!("Basic Land — {land_type}"))
        .collect()
}

#[tokio::test]
async fn test_three_forest_variations() {
    let dir = tempfile::tempdir().unwrap();
    let text = counting_text();
    let generator = LandGenerator::new(text.clone(), 3).with_prompt_policy(RetryPolicy::fixed(3, 0));
    let mut numbering = CollectorNumbering::new();

    let lands = generator
        .generate_lands("Theme", &art(&text, ok_images(), dir.path()), &mut numbering, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(lands.len(), 15);
    let forests = lands_of(&lands, "Forest");
    let names: Vec<&str> = forests.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["Forest 1", "Forest 2", "Forest 3"]);

    let prompts: HashSet<&str> = forests
        .iter()
        .map(|c| c.art_prompt.as_deref().unwrap())
        .collect();
    assert_eq!(prompts.len(), 3);
    for forest in &forests {
        assert_eq!(forest.colors, vec![Color::Green]);
        assert_eq!(forest.rarity, Rarity::Common);
        assert!(forest.image_path.is_some());
    }

    // later variations see their siblings
    let forest_requests: Vec<_> = text
        .calls()
        .into_iter()
        .filter(|c| c.prompt.contains("for a Forest basic land"))
        .collect();
    assert_eq!(forest_requests.len(), 3);
    assert!(!forest_requests[0].prompt.contains("Variation 1: "));
    assert!(forest_requests[2].prompt.contains("Variation 2: "));

    // per-card records are written
    assert!(dir.path().join("Forest_3.json").exists());
}

#[tokio::test]
async fn test_numbering_starts_after_existing_cards() {
    let dir = tempfile::tempdir().unwrap();
    let mut existing: Vec<Card> = (0..4)
        .map(|i| card(&format!("Card {i}"), Rarity::Common, vec![Color::Red]))
        .collect();
    for (i, c) in existing.iter_mut().enumerate() {
        c.collector_number = Some(9 + i as u32);
    }

    let text = counting_text();
    let generator = LandGenerator::new(text.clone(), 2).with_prompt_policy(RetryPolicy::fixed(3, 0));
    let mut numbering = CollectorNumbering::after(&existing);

    let lands = generator
        .generate_lands("Theme", &art(&text, ok_images(), dir.path()), &mut numbering, &CancellationToken::new())
        .await
        .unwrap();

    let numbers: Vec<u32> = lands.iter().map(|c| c.collector_number.unwrap()).collect();
    assert_eq!(numbers.first(), Some(&13));
    assert_eq!(numbers, (13..23).collect::<Vec<_>>());
    assert_eq!(lands[0].name, "Plains 1");
}

#[tokio::test]
async fn test_duplicate_prompt_is_retried() {
    let dir = tempfile::tempdir().unwrap();
    let counter = AtomicUsize::new(0);
    let text = Arc::new(
        ScriptedTextGenerator::new(vec!["same scene", "same scene", "another scene"]).with_responder(
            move |_| Reply::Text(format!("Landscape #{}", counter.fetch_add(1, Ordering::SeqCst))),
        ),
    );
    let generator = LandGenerator::new(text.clone(), 2).with_prompt_policy(RetryPolicy::fixed(3, 0));
    let mut numbering = CollectorNumbering::new();

    let lands = generator
        .generate_lands("Theme", &art(&text, ok_images(), dir.path()), &mut numbering, &CancellationToken::new())
        .await
        .unwrap();

    let plains = lands_of(&lands, "Plains");
    assert_eq!(plains[0].art_prompt.as_deref(), Some("same scene"));
    assert_eq!(plains[1].art_prompt.as_deref(), Some("another scene"));
}

#[tokio::test]
async fn test_one_variation_failing_does_not_block_others() {
    let dir = tempfile::tempdir().unwrap();
    let text = counting_text();
    let mut image = MockImageGenerator::new();
    image.expect_prompt_token_limit().return_const(None::<usize>);
    image.expect_generate().returning(|_, card, dest| {
        if card.name == "Island 1" {
            Err(ImageError::Failed("backend down".into()))
        } else {
            Ok(dest.to_path_buf())
        }
    });
    let generator = LandGenerator::new(text.clone(), 2).with_prompt_policy(RetryPolicy::fixed(3, 0));
    let mut numbering = CollectorNumbering::new();

    let lands = generator
        .generate_lands("Theme", &art(&text, image, dir.path()), &mut numbering, &CancellationToken::new())
        .await
        .unwrap();

    let islands = lands_of(&lands, "Island");
    assert!(islands[0].image_path.is_none());
    assert!(islands[0].art_prompt.is_some());
    assert!(islands[1].image_path.is_some());
    assert_eq!(lands.iter().filter(|c| c.image_path.is_none()).count(), 1);
}

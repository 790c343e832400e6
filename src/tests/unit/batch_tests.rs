//! Batch generator: continuation protocol, numbering and parse failures

use std::sync::Arc;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::config::{ColorTargets, RarityQuota};
use crate::core::card::{Color, Rarity};
use crate::core::generation::{BatchGenerator, CollectorNumbering, PipelineError, RetryPolicy};
use crate::core::llm::{LLMError, ModelKey};
use crate::tests::common::{card, generated_cards, CapturedEvents};
use crate::tests::mocks::{Reply, ScriptedStructuredGenerator, ScriptedTextGenerator, StructuredReply};

fn standard_quota() -> RarityQuota {
    RarityQuota {
        mythic: 1,
        rare: 3,
        uncommon: 4,
        common: 5,
    }
}

fn generator(
    text: &Arc<ScriptedTextGenerator>,
    structured: &Arc<ScriptedStructuredGenerator>,
    quota: RarityQuota,
) -> BatchGenerator {
    BatchGenerator::new(text.clone(), structured.clone(), quota, ColorTargets::default())
        .with_policy(RetryPolicy::fixed(3, 0))
}

fn names(value: &Value) -> Vec<String> {
    value
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c["name"].as_str().unwrap().to_string())
        .collect()
}

#[tokio::test]
async fn test_short_batch_requests_continuation_for_missing_cards() {
    let events = CapturedEvents::default();
    let _guard = events.install();
    let text = Arc::new(ScriptedTextGenerator::new(vec!["ten cards of text", "two more cards"]));
    let structured = Arc::new(ScriptedStructuredGenerator::values(vec![
        generated_cards("First", 10),
        generated_cards("Extra", 2),
    ]));
    let mut numbering = CollectorNumbering::new();

    let cards = generator(&text, &structured, standard_quota())
        .generate_batch(1, "Theme", &[], &[], &mut numbering, &CancellationToken::new())
        .await
        .unwrap();

    let calls = text.calls();
    assert_eq!(calls.len(), 2);
    assert!(!calls[0].is_continuation());
    assert!(calls[0].prompt.contains("Then generate 13 new cards"));
    assert_eq!(calls[1].follow_up.as_deref(), Some("continue with the remaining 3 cards"));
    assert_eq!(calls[1].prior_response.as_deref(), Some("ten cards of text"));
    assert_eq!(calls[1].prompt, calls[0].prompt);

    // 10 + 2 accepted; the shortfall is only a warning.
    assert_eq!(cards.len(), 12);
    let numbers: Vec<u32> = cards.iter().map(|c| c.collector_number.unwrap()).collect();
    assert_eq!(numbers, (1..=12).collect::<Vec<_>>());
    assert_eq!(numbering.peek(), 13);

    let shortfall = events.with_message(tracing::Level::WARN, "batch yield short of quota");
    assert_eq!(shortfall.len(), 1);
    assert_eq!(shortfall[0].fields["produced"], "12");
    assert_eq!(shortfall[0].fields["quota"], "13");
}

#[tokio::test]
async fn test_full_batch_logs_no_shortfall() {
    let events = CapturedEvents::default();
    let _guard = events.install();
    let text = Arc::new(ScriptedTextGenerator::new(vec!["thirteen cards"]));
    let structured = Arc::new(ScriptedStructuredGenerator::values(vec![generated_cards("Card", 13)]));

    generator(&text, &structured, standard_quota())
        .generate_batch(1, "Theme", &[], &[], &mut CollectorNumbering::new(), &CancellationToken::new())
        .await
        .unwrap();
    assert!(events
        .with_message(tracing::Level::WARN, "batch yield short of quota")
        .is_empty());
}

#[tokio::test]
async fn test_full_batch_skips_continuation() {
    let text = Arc::new(ScriptedTextGenerator::new(vec!["thirteen cards"]));
    let structured = Arc::new(ScriptedStructuredGenerator::values(vec![generated_cards("Card", 13)]));
    let mut numbering = CollectorNumbering::new();

    let cards = generator(&text, &structured, standard_quota())
        .generate_batch(1, "Theme", &[], &[], &mut numbering, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(cards.len(), 13);
    assert_eq!(text.calls().len(), 1);

    let structured_calls = structured.calls();
    assert_eq!(structured_calls.len(), 1);
    assert_eq!(structured_calls[0].model_key, ModelKey::Json);
    assert_eq!(structured_calls[0].system_prompt.as_deref(), Some("You are a JSON converter."));
    assert!(structured_calls[0].prompt.contains("thirteen cards"));
}

#[tokio::test]
async fn test_surplus_cards_truncated_to_quota() {
    let quota = RarityQuota {
        mythic: 0,
        rare: 1,
        uncommon: 1,
        common: 1,
    };
    let text = Arc::new(ScriptedTextGenerator::new(vec!["too many"]));
    let structured = Arc::new(ScriptedStructuredGenerator::values(vec![generated_cards("Card", 5)]));
    let mut numbering = CollectorNumbering::new();

    let cards = generator(&text, &structured, quota)
        .generate_batch(1, "Theme", &[], &[], &mut numbering, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(cards.len(), 3);
    assert_eq!(cards[2].name, "Card 2");
}

#[tokio::test]
async fn test_initial_parse_failure_yields_empty_then_continues() {
    let text = Arc::new(ScriptedTextGenerator::new(vec!["garbled", "all thirteen"]));
    let structured = Arc::new(ScriptedStructuredGenerator::new(vec![
        StructuredReply::Malformed("not json at all".into()),
        StructuredReply::Value(generated_cards("Recovered", 13)),
    ]));
    let mut numbering = CollectorNumbering::new();

    let cards = generator(&text, &structured, standard_quota())
        .generate_batch(1, "Theme", &[], &[], &mut numbering, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(
        text.calls()[1].follow_up.as_deref(),
        Some("continue with the remaining 13 cards")
    );
    assert_eq!(cards.len(), 13);
}

#[tokio::test]
async fn test_continuation_parse_failure_is_swallowed() {
    let text = Arc::new(ScriptedTextGenerator::new(vec!["ten", "junk"]));
    let structured = Arc::new(ScriptedStructuredGenerator::new(vec![
        StructuredReply::Value(generated_cards("First", 10)),
        StructuredReply::Malformed("junk".into()),
    ]));
    let mut numbering = CollectorNumbering::new();

    let cards = generator(&text, &structured, standard_quota())
        .generate_batch(1, "Theme", &[], &[], &mut numbering, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(names(&generated_cards("First", 10)), cards.iter().map(|c| c.name.clone()).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_at_most_one_continuation_by_default() {
    let text = Arc::new(ScriptedTextGenerator::new(vec!["one", "another one", "never asked"]));
    let structured = Arc::new(ScriptedStructuredGenerator::values(vec![
        generated_cards("A", 1),
        generated_cards("B", 1),
    ]));
    let mut numbering = CollectorNumbering::new();

    let cards = generator(&text, &structured, standard_quota())
        .generate_batch(1, "Theme", &[], &[], &mut numbering, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(cards.len(), 2);
    assert_eq!(text.calls().len(), 2);
}

#[tokio::test]
async fn test_extra_continuation_rounds() {
    let text = Arc::new(ScriptedTextGenerator::new(vec!["one", "two", "three"]));
    let structured = Arc::new(ScriptedStructuredGenerator::values(vec![
        generated_cards("A", 2),
        generated_cards("B", 1),
        generated_cards("C", 1),
    ]));
    let quota = RarityQuota {
        mythic: 1,
        rare: 1,
        uncommon: 1,
        common: 1,
    };
    let mut numbering = CollectorNumbering::new();

    let cards = generator(&text, &structured, quota)
        .with_continuation_rounds(2)
        .generate_batch(1, "Theme", &[], &[], &mut numbering, &CancellationToken::new())
        .await
        .unwrap();

    let calls = text.calls();
    assert_eq!(calls[1].follow_up.as_deref(), Some("continue with the remaining 2 cards"));
    assert_eq!(calls[2].follow_up.as_deref(), Some("continue with the remaining 1 cards"));
    assert_eq!(calls[2].prior_response.as_deref(), Some("two"));
    assert_eq!(cards.len(), 4);
}

#[tokio::test]
async fn test_numbering_continues_from_counter() {
    let text = Arc::new(ScriptedTextGenerator::new(vec!["four"]));
    let structured = Arc::new(ScriptedStructuredGenerator::values(vec![generated_cards("Card", 4)]));
    let quota = RarityQuota {
        mythic: 1,
        rare: 1,
        uncommon: 1,
        common: 1,
    };
    let mut numbering = CollectorNumbering::new();
    for _ in 0..20 {
        numbering.next();
    }

    let cards = generator(&text, &structured, quota)
        .generate_batch(2, "Theme", &[], &[], &mut numbering, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(cards[0].collector_number, Some(21));
    assert_eq!(cards[3].collector_number, Some(24));
}

#[tokio::test]
async fn test_prompt_reflects_existing_cards_and_balance() {
    let existing = vec![
        card("Red One", Rarity::Common, vec![Color::Red]),
        card("Red Two", Rarity::Rare, vec![Color::Red]),
    ];
    let text = Arc::new(ScriptedTextGenerator::new(vec!["cards"]));
    let structured = Arc::new(ScriptedStructuredGenerator::values(vec![generated_cards("Card", 13)]));
    let mut numbering = CollectorNumbering::after(&existing);

    generator(&text, &structured, standard_quota())
        .generate_batch(2, "Volcanic isles", &[], &existing, &mut numbering, &CancellationToken::new())
        .await
        .unwrap();

    let prompt = &text.calls()[0].prompt;
    assert!(prompt.contains("- Red One (Common): Creature — Test with {2}, Vigilance"));
    assert!(prompt.contains("- Red (R): 80.0% severely over-represented"));
    assert!(prompt.contains("Most needed colors right now: W, U, B, G"));
    assert!(prompt.contains("Volcanic isles"));
}

#[tokio::test]
async fn test_cancelled_before_call() {
    let text = Arc::new(ScriptedTextGenerator::new(vec!["unused"]));
    let structured = Arc::new(ScriptedStructuredGenerator::values(Vec::new()));
    let cancel = CancellationToken::new();
    cancel.cancel();
    let mut numbering = CollectorNumbering::new();

    let err = generator(&text, &structured, standard_quota())
        .generate_batch(1, "Theme", &[], &[], &mut numbering, &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Cancelled));
    assert!(text.calls().is_empty());
}

#[tokio::test]
async fn test_batch_request_failing_every_attempt_propagates() {
    let text = Arc::new(ScriptedTextGenerator::from_replies(vec![
        Reply::Fail(503),
        Reply::Fail(503),
        Reply::Fail(503),
    ]));
    let structured = Arc::new(ScriptedStructuredGenerator::values(Vec::new()));
    let mut numbering = CollectorNumbering::new();

    let err = generator(&text, &structured, standard_quota())
        .generate_batch(1, "Theme", &[], &[], &mut numbering, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Llm(LLMError::Api { status: 503, .. })));
    assert_eq!(text.calls().len(), 3);
    assert!(structured.calls().is_empty());
}

#[tokio::test]
async fn test_batch_request_retried_after_transient_failure() {
    let text = Arc::new(ScriptedTextGenerator::from_replies(vec![
        Reply::Fail(503),
        Reply::Text("thirteen cards".into()),
    ]));
    let structured = Arc::new(ScriptedStructuredGenerator::values(vec![generated_cards("Card", 13)]));

    let cards = generator(&text, &structured, standard_quota())
        .generate_batch(1, "Theme", &[], &[], &mut CollectorNumbering::new(), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(cards.len(), 13);
    let calls = text.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].prompt, calls[1].prompt);
}

#[tokio::test]
async fn test_structured_failure_on_initial_parse_still_continues() {
    // No structured replies: every conversion fails with an empty response.
    let text = Arc::new(ScriptedTextGenerator::new(vec!["batch text", "continued text"]));
    let structured = Arc::new(ScriptedStructuredGenerator::new(Vec::new()));
    let mut numbering = CollectorNumbering::new();

    let cards = generator(&text, &structured, standard_quota())
        .generate_batch(1, "Theme", &[], &[], &mut numbering, &CancellationToken::new())
        .await
        .unwrap();

    assert!(cards.is_empty());
    let calls = text.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[1].follow_up.as_deref(), Some("continue with the remaining 13 cards"));
    assert_eq!(structured.calls().len(), 2);
}

#[tokio::test]
async fn test_failed_continuation_keeps_parsed_cards() {
    let text = Arc::new(ScriptedTextGenerator::from_replies(vec![
        Reply::Text("ten".into()),
        Reply::Fail(503),
        Reply::Fail(503),
        Reply::Fail(503),
    ]));
    let structured = Arc::new(ScriptedStructuredGenerator::values(vec![generated_cards("First", 10)]));
    let mut numbering = CollectorNumbering::new();

    let cards = generator(&text, &structured, standard_quota())
        .generate_batch(1, "Theme", &[], &[], &mut numbering, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(cards.len(), 10);
    assert_eq!(cards[9].collector_number, Some(10));
    // one initial request plus three continuation attempts
    assert_eq!(text.calls().len(), 4);
    assert!(text.calls()[3].is_continuation());
}

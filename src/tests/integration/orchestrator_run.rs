//! Full orchestrator runs against scripted backends in a temp directory

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::config::RetrySettings;
use crate::core::generation::{Orchestrator, PipelineError, RetryPolicy, RunPhase, SetSnapshot};
use crate::core::llm::LanguageModel;
use crate::core::llm::LLMError;
use crate::core::render::{CardRenderer, RenderOutcome};
use crate::tests::common::{corpus, generated_cards, run_config, small_settings};
use crate::tests::mocks::{
    MockCardRenderer, MockImageGenerator, Reply, ScriptedStructuredGenerator, ScriptedTextGenerator,
    StructuredCall, StructuredReply,
};

fn fast_retry() -> RetrySettings {
    RetrySettings {
        batch: RetryPolicy::fixed(3, 0),
        art_prompt: RetryPolicy::fixed(3, 0),
        image: RetryPolicy::fixed(3, 0),
        conversion: RetryPolicy::fixed(3, 0),
    }
}

fn text_backend() -> ScriptedTextGenerator {
    let counter = AtomicUsize::new(0);
    ScriptedTextGenerator::from_replies(vec![Reply::Text("A realm of drifting sky islands".into())])
        .with_responder(move |call| {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            if call.prompt.contains("Then generate") {
                Reply::Text(format!("batch text {n}"))
            } else {
                Reply::Text(format!("Oil on canvas painting. Scene {n}."))
            }
        })
}

/// Batch parses return four fresh cards; render conversions echo the name.
fn structured_backend() -> ScriptedStructuredGenerator {
    let batches = AtomicUsize::new(0);
    ScriptedStructuredGenerator::new(Vec::new()).with_responder(move |call: &StructuredCall| {
        if call.prompt.starts_with("Convert the following Magic: The Gathering card descriptions") {
            let n = batches.fetch_add(1, Ordering::SeqCst);
            StructuredReply::Value(generated_cards(&format!("Batch{n} Card"), 4))
        } else {
            StructuredReply::Value(json!({"layout": "normal", "set": "thb", "colors": ["G"]}))
        }
    })
}

fn images() -> MockImageGenerator {
    let mut image = MockImageGenerator::new();
    image.expect_prompt_token_limit().return_const(None::<usize>);
    image.expect_generate().returning(|_, _, dest| Ok(dest.to_path_buf()));
    image
}

fn language_model(text: ScriptedTextGenerator, structured: ScriptedStructuredGenerator) -> LanguageModel {
    LanguageModel {
        text: Arc::new(text),
        structured: Arc::new(structured),
    }
}

fn read_json(path: &std::path::Path) -> Value {
    serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
}

#[tokio::test]
async fn test_full_run_writes_all_artifacts() {
    let dir = tempfile::tempdir().unwrap();
    let mut settings = small_settings(dir.path(), 2);
    settings.generate_basic_lands = true;
    settings.land_variations_per_type = 1;
    let run = run_config(settings, dir.path());
    let out = run.output_dir.clone();

    let mut renderer = MockCardRenderer::new();
    renderer.expect_render().times(3).returning(|files| {
        files
            .iter()
            .map(|f| RenderOutcome {
                input: f.clone(),
                result: Ok(f.with_extension("png")),
            })
            .collect()
    });

    let mut orchestrator = Orchestrator::new(
        run,
        language_model(text_backend(), structured_backend()),
        Arc::new(images()),
        Arc::new(renderer),
        fast_retry(),
        CancellationToken::new(),
    )
    .with_corpus(corpus(20));

    let snapshot = orchestrator.generate_complete_set().await.unwrap();

    // 2 batches of 4 plus one variation of each basic land
    assert_eq!(snapshot.cards.len(), 13);
    let numbers: Vec<u32> = snapshot.cards.iter().map(|c| c.collector_number.unwrap()).collect();
    assert_eq!(numbers, (1..=13).collect::<Vec<_>>());
    assert_eq!(snapshot.cards[8].name, "Plains 1");
    assert_eq!(snapshot.set_info.theme, "A realm of drifting sky islands");
    assert_eq!(snapshot.statistics().art_failures, 0);
    assert_eq!(snapshot.statistics().rarity_distribution.common, 2 + 5);

    for file in [
        "mtg_set_batch_1.json",
        "mtg_set_batch_2.json",
        "mtg_set_complete.json",
        "mtg_set_output.json",
        "theme.txt",
        "Plains_1.json",
        "Batch0_Card_0.json",
    ] {
        assert!(out.join(file).exists(), "missing {file}");
    }
    let batch_one = read_json(&out.join("mtg_set_batch_1.json"));
    assert_eq!(batch_one["cards"].as_array().unwrap().len(), 4);
    assert_eq!(batch_one["set_info"]["config"]["total_cards"], 8);

    let render_files = std::fs::read_dir(out.join("render_format")).unwrap().count();
    assert_eq!(render_files, 13);
    let forest = read_json(&out.join("render_format").join("Forest_1_render.json"));
    assert_eq!(forest["name"], "Forest");
    assert_eq!(forest["original_name"], "Forest 1");
    assert_eq!(forest["collector_number"], "13");

    let complete = SetSnapshot::read(&out.join("mtg_set_complete.json")).await.unwrap();
    assert_eq!(complete.cards, snapshot.cards);

    let phases = orchestrator.phases();
    assert_eq!(phases.first(), Some(&RunPhase::Idle));
    assert_eq!(phases[1], RunPhase::ThemeReady);
    assert_eq!(
        &phases[2..7],
        &[
            RunPhase::GenerateBatch(1),
            RunPhase::Art(1),
            RunPhase::Convert(1),
            RunPhase::Render(1),
            RunPhase::Checkpoint(1),
        ]
    );
    assert_eq!(
        &phases[phases.len() - 4..],
        &[
            RunPhase::GenerateLands,
            RunPhase::ConvertLands,
            RunPhase::RenderLands,
            RunPhase::Finalize,
        ]
    );
}

#[tokio::test]
async fn test_collector_numbers_unique_across_run() {
    let dir = tempfile::tempdir().unwrap();
    let mut settings = small_settings(dir.path(), 3);
    settings.generate_basic_lands = true;
    settings.land_variations_per_type = 2;
    let run = run_config(settings, dir.path());

    let mut orchestrator = Orchestrator::new(
        run,
        language_model(text_backend(), structured_backend()),
        Arc::new(images()),
        Arc::new(crate::core::render::DisabledRenderer) as Arc<dyn CardRenderer>,
        fast_retry(),
        CancellationToken::new(),
    )
    .with_corpus(corpus(3));

    let snapshot = orchestrator.generate_complete_set().await.unwrap();
    let numbers: Vec<u32> = snapshot.cards.iter().map(|c| c.collector_number.unwrap()).collect();
    let unique: HashSet<u32> = numbers.iter().copied().collect();
    assert_eq!(unique.len(), numbers.len());
    assert!(numbers.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(numbers.len(), 3 * 4 + 5 * 2);
}

#[tokio::test]
async fn test_theme_override_skips_theme_call() {
    let dir = tempfile::tempdir().unwrap();
    let mut settings = small_settings(dir.path(), 1);
    settings.complete_theme_override = Some("Override theme".into());
    let run = run_config(settings, dir.path());

    let text = Arc::new(text_backend());
    let lm = LanguageModel {
        text: text.clone(),
        structured: Arc::new(structured_backend()),
    };
    let mut orchestrator = Orchestrator::new(
        run,
        lm,
        Arc::new(images()),
        Arc::new(crate::core::render::DisabledRenderer),
        fast_retry(),
        CancellationToken::new(),
    )
    .with_corpus(corpus(3));

    let snapshot = orchestrator.generate_complete_set().await.unwrap();
    assert_eq!(snapshot.set_info.theme, "Override theme");
    // first text call is the batch request, not a theme request
    assert!(text.calls()[0].prompt.contains("Then generate 4 new cards"));
}

#[tokio::test]
async fn test_cancellation_persists_accumulated_cards() {
    let dir = tempfile::tempdir().unwrap();
    let run = run_config(small_settings(dir.path(), 3), dir.path());
    let out = run.output_dir.clone();
    let cancel = CancellationToken::new();

    // Cancel as soon as the first art prompt is requested.
    let trigger = cancel.clone();
    let text = ScriptedTextGenerator::from_replies(vec![Reply::Text("Theme".into())]).with_responder(
        move |call| {
            if call.prompt.contains("Then generate") {
                Reply::Text("batch text".into())
            } else {
                trigger.cancel();
                Reply::Text("Oil on canvas painting.".into())
            }
        },
    );

    let mut orchestrator = Orchestrator::new(
        run,
        language_model(text, structured_backend()),
        Arc::new(images()),
        Arc::new(crate::core::render::DisabledRenderer),
        fast_retry(),
        cancel,
    )
    .with_corpus(corpus(3));

    let err = orchestrator.generate_complete_set().await.unwrap_err();
    assert!(matches!(err, PipelineError::Cancelled));
    assert_eq!(orchestrator.phase(), RunPhase::Cancelled);
    assert!(!orchestrator.phases().contains(&RunPhase::GenerateBatch(2)));

    let complete = read_json(&out.join("mtg_set_complete.json"));
    assert_eq!(complete["cards"].as_array().unwrap().len(), 4);
    assert!(!out.join("mtg_set_batch_1.json").exists());
}

#[tokio::test]
async fn test_failed_batch_still_writes_final_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let run = run_config(small_settings(dir.path(), 3), dir.path());
    let out = run.output_dir.clone();

    // The second batch prompt lists the first batch's cards; its request never succeeds.
    let text = ScriptedTextGenerator::from_replies(vec![Reply::Text("Theme".into())]).with_responder(
        |call| {
            if call.prompt.contains("Then generate") && call.prompt.contains("Batch0 Card 0") {
                Reply::Fail(503)
            } else if call.prompt.contains("Then generate") {
                Reply::Text("batch text".into())
            } else {
                Reply::Text("Oil on canvas painting.".into())
            }
        },
    );

    let mut orchestrator = Orchestrator::new(
        run,
        language_model(text, structured_backend()),
        Arc::new(images()),
        Arc::new(crate::core::render::DisabledRenderer),
        fast_retry(),
        CancellationToken::new(),
    )
    .with_corpus(corpus(3));

    let err = orchestrator.generate_complete_set().await.unwrap_err();
    assert!(matches!(err, PipelineError::Llm(LLMError::Api { status: 503, .. })));
    assert_eq!(orchestrator.phases().last(), Some(&RunPhase::Finalize));
    assert!(!orchestrator.phases().contains(&RunPhase::GenerateBatch(3)));

    let complete = SetSnapshot::read(&out.join("mtg_set_complete.json")).await.unwrap();
    assert_eq!(complete.cards.len(), 4);
    assert_eq!(complete.cards[0].name, "Batch0 Card 0");
    assert!(out.join("mtg_set_batch_1.json").exists());
    assert!(!out.join("mtg_set_batch_2.json").exists());
    let progress = read_json(&out.join("mtg_set_output.json"));
    assert_eq!(progress["cards"].as_array().unwrap().len(), 4);
}

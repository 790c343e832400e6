//! Set generation orchestrator
//!
//! Runs the whole pipeline strictly in sequence:
//! theme, then per batch generate → art → convert → render → checkpoint,
//! then basic lands and the final snapshot.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio_util::sync::CancellationToken;

use crate::config::{RetrySettings, RunConfiguration};
use crate::core::card::Card;
use crate::core::image::ImageGenerator;
use crate::core::llm::LanguageModel;
use crate::core::render::CardRenderer;

use super::art::ArtPipeline;
use super::batch::BatchGenerator;
use super::convert::RenderFormatConverter;
use super::error::{PipelineError, Result};
use super::inspiration::{InspirationCard, InspirationCorpus};
use super::lands::LandGenerator;
use super::numbering::CollectorNumbering;
use super::snapshot::{batch_file_name, write_progress, RunEcho, SetSnapshot, COMPLETE_FILE};
use super::theme::ThemeSynthesizer;

/// Default image subdirectory inside the set directory.
pub const DEFAULT_IMAGE_SUBDIR: &str = "card_images";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Idle,
    ThemeReady,
    GenerateBatch(u32),
    Art(u32),
    Convert(u32),
    Render(u32),
    Checkpoint(u32),
    GenerateLands,
    ConvertLands,
    RenderLands,
    Finalize,
    Cancelled,
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunPhase::Idle => write!(f, "idle"),
            RunPhase::ThemeReady => write!(f, "theme ready"),
            RunPhase::GenerateBatch(n) => write!(f, "generate batch {n}"),
            RunPhase::Art(n) => write!(f, "art for batch {n}"),
            RunPhase::Convert(n) => write!(f, "convert batch {n}"),
            RunPhase::Render(n) => write!(f, "render batch {n}"),
            RunPhase::Checkpoint(n) => write!(f, "checkpoint batch {n}"),
            RunPhase::GenerateLands => write!(f, "generate lands"),
            RunPhase::ConvertLands => write!(f, "convert lands"),
            RunPhase::RenderLands => write!(f, "render lands"),
            RunPhase::Finalize => write!(f, "finalize"),
            RunPhase::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Mutable state of one run; owned by the orchestrator for its duration.
struct RunState {
    theme: String,
    inspiration: Vec<InspirationCard>,
    echo: RunEcho,
    cards: Vec<Card>,
    numbering: CollectorNumbering,
    conversion_failures: usize,
}

pub struct Orchestrator {
    run: RunConfiguration,
    language_model: LanguageModel,
    image: Arc<dyn ImageGenerator>,
    renderer: Arc<dyn CardRenderer>,
    retry: RetrySettings,
    cancel: CancellationToken,
    image_subdir: String,
    models: BTreeMap<String, String>,
    corpus: Option<InspirationCorpus>,
    phases: Vec<RunPhase>,
}

impl Orchestrator {
    pub fn new(
        run: RunConfiguration,
        language_model: LanguageModel,
        image: Arc<dyn ImageGenerator>,
        renderer: Arc<dyn CardRenderer>,
        retry: RetrySettings,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            run,
            language_model,
            image,
            renderer,
            retry,
            cancel,
            image_subdir: DEFAULT_IMAGE_SUBDIR.to_string(),
            models: BTreeMap::new(),
            corpus: None,
            phases: vec![RunPhase::Idle],
        }
    }

    pub fn with_image_subdir(mut self, subdir: impl Into<String>) -> Self {
        self.image_subdir = subdir.into();
        self
    }

    /// Model ids echoed into snapshots.
    pub fn with_models(mut self, models: BTreeMap<String, String>) -> Self {
        self.models = models;
        self
    }

    /// Use an already loaded corpus instead of reading the configured CSV.
    pub fn with_corpus(mut self, corpus: InspirationCorpus) -> Self {
        self.corpus = Some(corpus);
        self
    }

    pub fn phase(&self) -> RunPhase {
        self.phases.last().copied().unwrap_or(RunPhase::Idle)
    }

    /// Every phase entered so far, in order.
    pub fn phases(&self) -> &[RunPhase] {
        &self.phases
    }

    pub fn output_dir(&self) -> &std::path::Path {
        &self.run.output_dir
    }

    /// Run the whole pipeline and return the final snapshot.
    ///
    /// On cancellation or failure the cards accepted so far are written as
    /// the final snapshot before the error is returned.
    pub async fn generate_complete_set(&mut self) -> Result<SetSnapshot> {
        let mut state = self.prepare().await?;

        let art = ArtPipeline::new(
            Arc::clone(&self.language_model.text),
            Arc::clone(&self.image),
            &self.run.output_dir,
            self.image_subdir.clone(),
        )
        .with_policies(self.retry.art_prompt.clone(), self.retry.image.clone());
        let converter = RenderFormatConverter::new(
            Arc::clone(&self.language_model.structured),
            &self.run.output_dir,
        )
        .with_policy(self.retry.conversion.clone());

        let outcome = match self.run_batches(&mut state, &art, &converter).await {
            Ok(()) => self.run_lands(&mut state, &art, &converter).await,
            Err(e) => Err(e),
        };

        match outcome {
            Ok(()) => self.finalize(&state).await,
            Err(e) if e.is_cancelled() => {
                self.enter(RunPhase::Cancelled);
                tracing::warn!(cards = state.cards.len(), "run cancelled, writing accumulated cards");
                self.finalize(&state).await?;
                Err(PipelineError::Cancelled)
            }
            Err(e) => {
                tracing::error!(error = %e, cards = state.cards.len(), "run failed, writing accumulated cards");
                if let Err(write_err) = self.finalize(&state).await {
                    tracing::error!(error = %write_err, "could not write final snapshot");
                }
                Err(e)
            }
        }
    }

    fn enter(&mut self, phase: RunPhase) {
        tracing::info!(from = %self.phase(), to = %phase, "run phase");
        self.phases.push(phase);
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(PipelineError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Sample inspiration and settle the theme.
    async fn prepare(&mut self) -> Result<RunState> {
        let settings = &self.run.settings;
        tracing::info!(
            set = %self.run.set_id,
            output = %self.run.output_dir.display(),
            batches = settings.batches_count,
            quota = settings.quota().total(),
            "starting set generation"
        );

        let corpus = match self.corpus.take() {
            Some(corpus) => corpus,
            None => InspirationCorpus::load(&settings.csv_file_path)?,
        };
        let mut rng = match settings.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let inspiration = corpus.sample(settings.inspiration_cards_count, &mut rng);

        let synthesizer = ThemeSynthesizer::new(Arc::clone(&self.language_model.text));
        let theme = tokio::select! {
            _ = self.cancel.cancelled() => return Err(PipelineError::Cancelled),
            theme = synthesizer.synthesize(
                &inspiration,
                settings.theme_prompt.as_deref(),
                settings.complete_theme_override.as_deref(),
            ) => theme?,
        };
        tokio::fs::write(self.run.output_path("theme.txt"), &theme).await?;

        let echo = RunEcho::new(settings, self.models.clone());
        self.enter(RunPhase::ThemeReady);

        Ok(RunState {
            theme,
            inspiration,
            echo,
            cards: Vec::new(),
            numbering: CollectorNumbering::new(),
            conversion_failures: 0,
        })
    }

    async fn run_batches(
        &mut self,
        state: &mut RunState,
        art: &ArtPipeline,
        converter: &RenderFormatConverter,
    ) -> Result<()> {
        let settings = &self.run.settings;
        let generator = BatchGenerator::new(
            Arc::clone(&self.language_model.text),
            Arc::clone(&self.language_model.structured),
            settings.quota(),
            settings.color_distribution,
        )
        .with_continuation_rounds(settings.continuation_rounds)
        .with_policy(self.retry.batch.clone());
        let batches = settings.batches_count;

        for batch_no in 1..=batches {
            self.check_cancelled()?;

            self.enter(RunPhase::GenerateBatch(batch_no));
            let new_cards = generator
                .generate_batch(
                    batch_no,
                    &state.theme,
                    &state.inspiration,
                    &state.cards,
                    &mut state.numbering,
                    &self.cancel,
                )
                .await?;
            let start = state.cards.len();
            state.cards.extend(new_cards);

            self.enter(RunPhase::Art(batch_no));
            let art_failures = art
                .process_cards(&mut state.cards[start..], &state.theme, &self.cancel)
                .await?;

            self.enter(RunPhase::Convert(batch_no));
            let report = converter
                .convert_cards(&state.cards[start..], &self.cancel)
                .await?;
            state.conversion_failures += report.failures;

            self.enter(RunPhase::Render(batch_no));
            self.render(&report.written).await;

            self.enter(RunPhase::Checkpoint(batch_no));
            let snapshot = SetSnapshot::new(&state.theme, &state.echo, &state.cards, state.conversion_failures);
            snapshot
                .write(&self.run.output_path(&batch_file_name(batch_no)))
                .await?;
            write_progress(&self.run.output_dir, &state.theme, &state.cards).await?;
            state.numbering = CollectorNumbering::after(&state.cards);

            tracing::info!(
                batch = batch_no,
                of = batches,
                added = state.cards.len() - start,
                art_failures,
                "batch complete\n{}",
                snapshot.statistics().summary()
            );
        }
        Ok(())
    }

    async fn run_lands(
        &mut self,
        state: &mut RunState,
        art: &ArtPipeline,
        converter: &RenderFormatConverter,
    ) -> Result<()> {
        let settings = &self.run.settings;
        if !settings.generate_basic_lands || settings.land_variations_per_type == 0 {
            return Ok(());
        }
        self.check_cancelled()?;

        self.enter(RunPhase::GenerateLands);
        let generator = LandGenerator::new(
            Arc::clone(&self.language_model.text),
            self.run.settings.land_variations_per_type,
        )
        .with_prompt_policy(self.retry.art_prompt.clone());
        let mut numbering = CollectorNumbering::after(&state.cards);
        let lands = generator
            .generate_lands(&state.theme, art, &mut numbering, &self.cancel)
            .await?;
        let start = state.cards.len();
        state.cards.extend(lands);
        state.numbering = numbering;

        self.enter(RunPhase::ConvertLands);
        let report = converter
            .convert_cards(&state.cards[start..], &self.cancel)
            .await?;
        state.conversion_failures += report.failures;

        self.enter(RunPhase::RenderLands);
        self.render(&report.written).await;
        Ok(())
    }

    async fn render(&self, files: &[PathBuf]) {
        if files.is_empty() {
            return;
        }
        let outcomes = self.renderer.render(files).await;
        let failed = outcomes.iter().filter(|o| !o.is_success()).count();
        if failed > 0 {
            tracing::warn!(rendered = outcomes.len() - failed, failed, "some cards failed to render");
        }
    }

    async fn finalize(&mut self, state: &RunState) -> Result<SetSnapshot> {
        if self.phase() != RunPhase::Cancelled {
            self.enter(RunPhase::Finalize);
        }
        let snapshot = SetSnapshot::new(&state.theme, &state.echo, &state.cards, state.conversion_failures);
        snapshot.write(&self.run.output_path(COMPLETE_FILE)).await?;
        write_progress(&self.run.output_dir, &state.theme, &state.cards).await?;
        tracing::info!(
            cards = state.cards.len(),
            output = %self.run.output_dir.display(),
            "set written\n{}",
            snapshot.statistics().summary()
        );
        Ok(snapshot)
    }
}

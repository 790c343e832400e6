//! Set generation pipeline
//!
//! Inspiration sampling, theme synthesis, colour-balanced batch generation,
//! collector numbering, art, basic lands, render conversion and the
//! orchestrator sequencing them.

pub mod art;
pub mod balance;
pub mod batch;
pub mod convert;
pub mod error;
pub mod inspiration;
pub mod lands;
pub mod numbering;
pub mod orchestrator;
pub mod retry;
pub mod snapshot;
pub mod templates;
pub mod theme;

pub use art::{estimate_tokens, ArtOutcome, ArtPipeline, ART_PROMPT_FAILED};
pub use balance::{BalanceReport, ColorDistribution, Representation};
pub use batch::BatchGenerator;
pub use convert::{ConversionReport, RenderFormatConverter};
pub use error::{PipelineError, Result};
pub use inspiration::{InspirationCard, InspirationCorpus};
pub use lands::{LandGenerator, BASIC_LANDS};
pub use numbering::CollectorNumbering;
pub use orchestrator::{Orchestrator, RunPhase};
pub use retry::{retry, Backoff, RetryError, RetryPolicy};
pub use snapshot::{SetSnapshot, SetStatistics};
pub use theme::ThemeSynthesizer;

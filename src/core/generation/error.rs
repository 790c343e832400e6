//! Pipeline Error Types

use crate::config::ConfigError;
use crate::core::image::ImageError;
use crate::core::llm::LLMError;

/// Errors surfaced by the set-generation pipeline.
///
/// Per-card art and conversion failures never reach this type; they are
/// recorded on the card or counted in the statistics.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Language model error: {0}")]
    Llm(#[from] LLMError),

    #[error("Image generation error: {0}")]
    Image(#[from] ImageError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Inspiration corpus error: {0}")]
    Corpus(String),

    #[error("Run cancelled")]
    Cancelled,
}

impl PipelineError {
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            PipelineError::Cancelled
                | PipelineError::Llm(LLMError::Cancelled)
                | PipelineError::Image(ImageError::Cancelled)
        )
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

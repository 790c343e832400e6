//! Image generation capability
//!
//! [`ImageGenerator`] is the contract the art pipeline depends on. Backends
//! own their aspect-ratio and cropping policy, keyed off whether the card
//! uses a vertical (Saga) frame.

pub mod crop;
pub mod openai;
pub mod replicate;

pub use openai::OpenAIImageGenerator;
pub use replicate::ReplicateImageGenerator;

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{AppConfig, ConfigError};
use crate::core::card::Card;

/// Errors from image backends
#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    #[error("HTTP request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("Failed to decode image: {0}")]
    Decode(#[from] image::ImageError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Timed out after {0}s waiting for the image")]
    Timeout(u64),

    #[error("Image generation failed: {0}")]
    Failed(String),

    #[error("Image generation cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, ImageError>;

/// Text-to-image backend.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ImageGenerator: Send + Sync {
    /// Generate art for `card` and write it to `destination`.
    ///
    /// Returns the path actually written.
    async fn generate(&self, art_prompt: &str, card: &Card, destination: &Path) -> Result<PathBuf>;

    /// Known input-length ceiling of the backend, in tokens.
    fn prompt_token_limit(&self) -> Option<usize>;
}

/// Available image backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageStrategy {
    Replicate,
    OpenAi,
}

impl FromStr for ImageStrategy {
    type Err = ConfigError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "replicate" => Ok(Self::Replicate),
            "openai" => Ok(Self::OpenAi),
            _ => Err(ConfigError::UnknownStrategy {
                kind: "image",
                name: s.to_string(),
            }),
        }
    }
}

/// Build the configured image backend. Unknown names and missing keys are fatal.
pub fn create_image_generator(
    config: &AppConfig,
) -> std::result::Result<Arc<dyn ImageGenerator>, ConfigError> {
    let settings = &config.image_generation;
    let strategy: ImageStrategy = settings.strategy.parse()?;
    tracing::info!(strategy = %settings.strategy, "creating image backend");

    let generator: Arc<dyn ImageGenerator> = match strategy {
        ImageStrategy::Replicate => {
            let token = config
                .api_key("replicate")
                .ok_or_else(|| ConfigError::MissingApiKey("replicate".to_string()))?;
            Arc::new(ReplicateImageGenerator::new(
                token,
                settings.replicate.clone(),
                settings.cropping,
                settings.prompt_token_limit,
            )?)
        }
        ImageStrategy::OpenAi => {
            let key = config
                .api_key("openai")
                .ok_or_else(|| ConfigError::MissingApiKey("openai".to_string()))?;
            Arc::new(OpenAIImageGenerator::new(
                key,
                settings.openai.clone(),
                settings.cropping,
                settings.prompt_token_limit,
            )?)
        }
    };
    Ok(generator)
}

/// `<output>/<image_subdir>/<Card_Name>.png`
pub fn image_destination(output_dir: &Path, image_subdir: &str, card: &Card) -> PathBuf {
    output_dir
        .join(image_subdir)
        .join(format!("{}.png", card.file_stem()))
}

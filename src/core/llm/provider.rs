//! Language-model capability traits
//!
//! The pipeline depends only on these two contracts; concrete backends live
//! in `providers`.

use async_trait::async_trait;
use serde_json::Value;

use super::error::Result;
use super::types::GenerationParams;

/// Named model slots looked up in the backend's `models` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelKey {
    /// Card text and general completions
    Main,
    /// Structured (JSON) conversions
    Json,
    /// Art prompt writing
    ArtPrompt,
    /// Set theme synthesis
    Theme,
}

impl ModelKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelKey::Main => "default_main",
            ModelKey::Json => "default_json",
            ModelKey::ArtPrompt => "art_prompt_generation",
            ModelKey::Theme => "theme_generation",
        }
    }
}

impl std::fmt::Display for ModelKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Free-form text completion.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Identifier of the backend, for logs.
    fn id(&self) -> &str;

    /// Complete a single user prompt.
    async fn generate(
        &self,
        prompt: &str,
        system_prompt: Option<&str>,
        model_key: ModelKey,
        params: &GenerationParams,
    ) -> Result<String>;

    /// Continue a conversation: the original prompt, the prior assistant
    /// reply and a follow-up instruction.
    async fn continue_conversation(
        &self,
        prompt: &str,
        prior_response: &str,
        follow_up: &str,
        model_key: ModelKey,
        params: &GenerationParams,
    ) -> Result<String>;
}

/// Completion whose output must contain a single JSON object or array.
///
/// Implementations locate the value with
/// [`extract_json`](super::json_extract::extract_json) and fail with
/// [`LLMError::Malformed`](super::error::LLMError::Malformed) carrying the
/// raw text when no region parses.
#[async_trait]
pub trait StructuredGenerator: Send + Sync {
    async fn generate_structured(
        &self,
        prompt: &str,
        system_prompt: Option<&str>,
        model_key: ModelKey,
        params: &GenerationParams,
    ) -> Result<Value>;
}

/// Default system prompt for structured calls.
pub const JSON_SYSTEM_PROMPT: &str = "You are a helpful assistant designed to output JSON.";

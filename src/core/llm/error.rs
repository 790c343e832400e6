//! LLM Error Types
//!
//! Defines error types for language-model operations.

use std::fmt;

/// Model output that could not be parsed into the expected structure.
///
/// The raw text is kept so failures can be diagnosed from the logs.
#[derive(Debug, Clone, PartialEq)]
pub struct MalformedResponse {
    pub reason: String,
    pub raw: String,
}

impl MalformedResponse {
    pub fn new(reason: impl Into<String>, raw: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            raw: raw.into(),
        }
    }

    /// Leading slice of the raw text, for log lines.
    pub fn raw_preview(&self, max_chars: usize) -> String {
        let preview: String = self.raw.chars().take(max_chars).collect();
        if self.raw.chars().count() > max_chars {
            format!("{preview}...")
        } else {
            preview
        }
    }
}

impl fmt::Display for MalformedResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} chars of raw output)", self.reason, self.raw.len())
    }
}

/// Errors that can occur during language-model operations
#[derive(Debug, thiserror::Error)]
pub enum LLMError {
    #[error("HTTP request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Rate limited: retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Provider returned an empty completion")]
    EmptyResponse,

    #[error("Malformed response: {0}")]
    Malformed(MalformedResponse),

    #[error("Generation cancelled")]
    Cancelled,
}

impl LLMError {
    /// Transport-level failures worth another attempt.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            LLMError::Transport(_) | LLMError::RateLimited { .. } | LLMError::EmptyResponse
        ) || matches!(self, LLMError::Api { status, .. } if *status >= 500)
    }
}

impl From<MalformedResponse> for LLMError {
    fn from(m: MalformedResponse) -> Self {
        LLMError::Malformed(m)
    }
}

/// Result type for LLM operations
pub type Result<T> = std::result::Result<T, LLMError>;

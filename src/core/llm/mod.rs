//! Language-model layer
//!
//! Capability traits, message types, JSON extraction and the concrete
//! backends.

pub mod error;
pub mod json_extract;
pub mod provider;
pub mod providers;
pub mod types;

pub use error::{LLMError, MalformedResponse, Result};
pub use json_extract::{extract_json, extract_json_shaped, JsonShape};
pub use provider::{ModelKey, StructuredGenerator, TextGenerator, JSON_SYSTEM_PROMPT};
pub use providers::{create_language_model, LanguageModel, LanguageModelStrategy, ModelTable};
pub use types::{ChatMessage, ChatRequest, ChatResponse, GenerationParams, MessageRole, TokenUsage};

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::core::card::{Color, Rarity};
use crate::core::generation::retry::RetryPolicy;
use crate::core::llm::GenerationParams;

/// Fatal configuration and strategy-selection errors, raised at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),

    #[error("Unknown {kind} strategy: {name}")]
    UnknownStrategy { kind: &'static str, name: String },

    #[error("Missing API key for {0}")]
    MissingApiKey(String),

    #[error("Model table for {0} has no 'default_main' entry")]
    MissingDefaultModel(String),

    #[error("Invalid run configuration: {0}")]
    Invalid(String),

    #[error("Failed to create output directory {path}: {source}")]
    OutputDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub run: RunSettings,
    pub language_model: LanguageModelConfig,
    pub image_generation: ImageGenerationConfig,
    pub renderer: RendererConfig,
    pub retry: RetrySettings,
    pub api_keys: HashMap<String, String>,
    pub api_headers: HashMap<String, String>,
}

// ============================================================================
// Run settings
// ============================================================================

/// Per-batch rarity quotas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RarityQuota {
    pub mythic: u32,
    pub rare: u32,
    pub uncommon: u32,
    pub common: u32,
}

impl RarityQuota {
    pub fn total(&self) -> u32 {
        self.mythic + self.rare + self.uncommon + self.common
    }

    pub fn count(&self, rarity: Rarity) -> u32 {
        match rarity {
            Rarity::Mythic => self.mythic,
            Rarity::Rare => self.rare,
            Rarity::Uncommon => self.uncommon,
            Rarity::Common => self.common,
        }
    }
}

/// Target share of each colour; the five fractions sum to 1.0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ColorTargets {
    #[serde(rename = "W")]
    pub white: f64,
    #[serde(rename = "U")]
    pub blue: f64,
    #[serde(rename = "B")]
    pub black: f64,
    #[serde(rename = "R")]
    pub red: f64,
    #[serde(rename = "G")]
    pub green: f64,
}

impl Default for ColorTargets {
    fn default() -> Self {
        Self {
            white: 0.2,
            blue: 0.2,
            black: 0.2,
            red: 0.2,
            green: 0.2,
        }
    }
}

impl ColorTargets {
    pub fn target(&self, color: Color) -> f64 {
        match color {
            Color::White => self.white,
            Color::Blue => self.blue,
            Color::Black => self.black,
            Color::Red => self.red,
            Color::Green => self.green,
        }
    }

    pub fn sum(&self) -> f64 {
        Color::ALL.iter().map(|c| self.target(*c)).sum()
    }
}

/// Run parameters as read from configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunSettings {
    pub csv_file_path: PathBuf,
    pub inspiration_cards_count: usize,
    pub batches_count: u32,
    pub theme_prompt: Option<String>,
    pub complete_theme_override: Option<String>,
    pub mythics_per_batch: u32,
    pub rares_per_batch: u32,
    pub uncommons_per_batch: u32,
    pub commons_per_batch: u32,
    pub color_distribution: ColorTargets,
    pub generate_basic_lands: bool,
    pub land_variations_per_type: u32,
    pub output_directory_base: PathBuf,
    /// Follow-up requests allowed when a batch under-produces.
    pub continuation_rounds: u32,
    /// Seed for the inspiration sampler; random when unset.
    pub seed: Option<u64>,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            csv_file_path: PathBuf::from("./assets/mtg_cards_english.csv"),
            inspiration_cards_count: 100,
            batches_count: 20,
            theme_prompt: None,
            complete_theme_override: None,
            mythics_per_batch: 1,
            rares_per_batch: 3,
            uncommons_per_batch: 4,
            commons_per_batch: 5,
            color_distribution: ColorTargets::default(),
            generate_basic_lands: true,
            land_variations_per_type: 3,
            output_directory_base: PathBuf::from("output_sets"),
            continuation_rounds: 1,
            seed: None,
        }
    }
}

impl RunSettings {
    pub fn quota(&self) -> RarityQuota {
        RarityQuota {
            mythic: self.mythics_per_batch,
            rare: self.rares_per_batch,
            uncommon: self.uncommons_per_batch,
            common: self.commons_per_batch,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(c) = Color::ALL
            .iter()
            .find(|c| !self.color_distribution.target(**c).is_finite())
        {
            return Err(ConfigError::Invalid(format!(
                "color_distribution entry {c} is not a finite number"
            )));
        }
        let sum = self.color_distribution.sum();
        if (sum - 1.0).abs() > 0.001 {
            return Err(ConfigError::Invalid(format!(
                "color_distribution must sum to 1.0, got {sum:.3}"
            )));
        }
        if Color::ALL
            .iter()
            .any(|c| self.color_distribution.target(*c) < 0.0)
        {
            return Err(ConfigError::Invalid(
                "color_distribution entries must be non-negative".to_string(),
            ));
        }
        if self.quota().total() == 0 {
            return Err(ConfigError::Invalid(
                "per-batch rarity quotas must request at least one card".to_string(),
            ));
        }
        Ok(())
    }
}

/// Validated run configuration with its output directory.
///
/// Read-only once constructed; the output directory is created here and
/// never changes.
#[derive(Debug, Clone)]
pub struct RunConfiguration {
    pub settings: RunSettings,
    pub set_id: String,
    pub output_dir: PathBuf,
}

impl RunConfiguration {
    /// Validate settings and create `<output_directory_base>/<timestamp>`.
    pub fn create(settings: RunSettings) -> Result<Self, ConfigError> {
        let set_id = chrono::Local::now().format("%Y%m%d_%H%M%S").to_string();
        let output_dir = settings.output_directory_base.join(&set_id);
        Self::at(settings, set_id, output_dir)
    }

    /// Validate settings and use an explicit output directory.
    pub fn at(
        settings: RunSettings,
        set_id: impl Into<String>,
        output_dir: impl Into<PathBuf>,
    ) -> Result<Self, ConfigError> {
        settings.validate()?;
        let output_dir = output_dir.into();
        std::fs::create_dir_all(&output_dir).map_err(|source| ConfigError::OutputDir {
            path: output_dir.clone(),
            source,
        })?;
        Ok(Self {
            settings,
            set_id: set_id.into(),
            output_dir,
        })
    }

    pub fn quota(&self) -> RarityQuota {
        self.settings.quota()
    }

    pub fn output_path(&self, filename: &str) -> PathBuf {
        self.output_dir.join(filename)
    }
}

// ============================================================================
// Backend settings
// ============================================================================

/// Settings shared by chat-completion backends.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatBackendSettings {
    pub base_url: Option<String>,
    /// Model ids keyed by model slot (`default_main`, `default_json`, ...).
    pub models: HashMap<String, String>,
    pub params: GenerationParams,
    pub json_params: Option<GenerationParams>,
    pub timeout_secs: u64,
}

impl Default for ChatBackendSettings {
    fn default() -> Self {
        Self {
            base_url: None,
            models: HashMap::new(),
            params: GenerationParams::default(),
            json_params: None,
            timeout_secs: 300,
        }
    }
}

/// Language-model backend selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LanguageModelConfig {
    pub strategy: String,
    pub openrouter: ChatBackendSettings,
    pub openai: ChatBackendSettings,
    pub ollama: ChatBackendSettings,
}

impl Default for LanguageModelConfig {
    fn default() -> Self {
        let mut openrouter = ChatBackendSettings::default();
        openrouter.models.insert(
            "default_main".to_string(),
            "openai/chatgpt-4o-latest".to_string(),
        );
        let mut ollama = ChatBackendSettings::default();
        ollama
            .models
            .insert("default_main".to_string(), "llama3.2".to_string());
        let mut openai = ChatBackendSettings::default();
        openai
            .models
            .insert("default_main".to_string(), "gpt-4o".to_string());
        Self {
            strategy: "openrouter".to_string(),
            openrouter,
            openai,
            ollama,
        }
    }
}

impl LanguageModelConfig {
    /// Settings of the selected backend, or `None` for an unknown strategy.
    pub fn active(&self) -> Option<&ChatBackendSettings> {
        match self.strategy.trim().to_ascii_lowercase().as_str() {
            "openrouter" => Some(&self.openrouter),
            "openai" => Some(&self.openai),
            "ollama" => Some(&self.ollama),
            _ => None,
        }
    }
}

/// Replicate image backend settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicateSettings {
    pub base_url: String,
    pub model: String,
    pub aspect_ratio_standard: String,
    pub aspect_ratio_saga: String,
    /// Extra model inputs passed through verbatim.
    pub params: serde_json::Map<String, serde_json::Value>,
    pub poll_interval_secs: u64,
    pub timeout_secs: u64,
}

impl Default for ReplicateSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.replicate.com".to_string(),
            model: "black-forest-labs/flux-1.1-pro".to_string(),
            aspect_ratio_standard: "5:4".to_string(),
            aspect_ratio_saga: "9:16".to_string(),
            params: serde_json::Map::new(),
            poll_interval_secs: 2,
            timeout_secs: 300,
        }
    }
}

/// OpenAI-compatible image backend settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenAiImageSettings {
    pub base_url: String,
    pub model: String,
    pub size_standard: String,
    pub size_saga: String,
    pub timeout_secs: u64,
}

impl Default for OpenAiImageSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "dall-e-3".to_string(),
            size_standard: "1792x1024".to_string(),
            size_saga: "1024x1792".to_string(),
            timeout_secs: 300,
        }
    }
}

/// Centre-crop generated art to the card frame's ratio.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CroppingSettings {
    /// Crop vertical (Saga) art to 4:5
    pub crop_vertical: bool,
    /// Crop standard art to 5:4
    pub crop_standard: bool,
}

/// Image backend selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageGenerationConfig {
    pub strategy: String,
    pub default_output_dir_name: String,
    /// Known input-length ceiling of the backend, in tokens.
    pub prompt_token_limit: Option<usize>,
    pub cropping: CroppingSettings,
    pub replicate: ReplicateSettings,
    pub openai: OpenAiImageSettings,
}

impl Default for ImageGenerationConfig {
    fn default() -> Self {
        Self {
            strategy: "replicate".to_string(),
            default_output_dir_name: "card_images".to_string(),
            prompt_token_limit: None,
            cropping: CroppingSettings::default(),
            replicate: ReplicateSettings::default(),
            openai: OpenAiImageSettings::default(),
        }
    }
}

/// External renderer invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    pub enabled: bool,
    /// Program and arguments; `{input}` and `{output}` are substituted.
    pub command: Vec<String>,
    pub output_dir_name: String,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            command: Vec::new(),
            output_dir_name: "rendered_cards".to_string(),
        }
    }
}

/// Retry policies per stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Batch and continuation text requests
    pub batch: RetryPolicy,
    pub art_prompt: RetryPolicy,
    pub image: RetryPolicy,
    pub conversion: RetryPolicy,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            batch: RetryPolicy::fixed(3, 5),
            art_prompt: RetryPolicy::fixed(3, 2),
            image: RetryPolicy::fixed(3, 5),
            conversion: RetryPolicy::fixed(3, 2),
        }
    }
}

// ============================================================================
// Loading
// ============================================================================

impl AppConfig {
    /// Layer defaults, the TOML file and `SETFORGE_*` environment variables.
    ///
    /// A missing file is not an error; defaults and environment still apply.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = path.map(Path::to_path_buf).unwrap_or_else(Self::config_path);
        let config: AppConfig = Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(&path))
            .merge(Env::prefixed("SETFORGE_").split("__"))
            .extract()
            .map_err(Box::new)?;
        tracing::debug!(path = %path.display(), "configuration loaded");
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.run.validate()
    }

    /// API key from the `api_keys` table, else the service's conventional
    /// environment variable.
    pub fn api_key(&self, service: &str) -> Option<String> {
        if let Some(key) = self.api_keys.get(service).filter(|k| !k.is_empty()) {
            return Some(key.clone());
        }
        let env_name = match service {
            "openrouter" => "OPENROUTER_API_KEY",
            "openai" => "OPENAI_API_KEY",
            "replicate" => "REPLICATE_API_TOKEN",
            _ => return None,
        };
        std::env::var(env_name).ok().filter(|k| !k.is_empty())
    }

    fn config_path() -> PathBuf {
        let local = PathBuf::from("setforge.toml");
        if local.exists() {
            return local;
        }
        dirs::config_dir()
            .map(|d| d.join("setforge").join("config.toml"))
            .unwrap_or(local)
    }
}

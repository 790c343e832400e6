//! Render format conversion
//!
//! Maps internal card records to the external renderer's schema through a
//! few-shot structured call, then enforces the fields that must not depend
//! on the model.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Map, Value};
use tokio_util::sync::CancellationToken;

use crate::core::card::Card;
use crate::core::llm::{
    GenerationParams, LLMError, MalformedResponse, ModelKey, StructuredGenerator,
};

use super::error::{PipelineError, Result};
use super::retry::{retry, RetryError, RetryPolicy};
use super::templates;

pub const RENDER_DIR_NAME: &str = "render_format";
pub const RENDER_FILE_SUFFIX: &str = "_render.json";
const ART_CROP_PREFIX: &str = "../card-generator/";
const RENDER_SET_CODE: &str = "thb";
const RENDER_ARTIST: &str = "Vincent Bons";

/// Files in a set directory that are snapshots, not card records.
pub fn is_snapshot_file(file_name: &str) -> bool {
    file_name == "mtg_set_output.json"
        || file_name == "mtg_set_complete.json"
        || (file_name.starts_with("mtg_set_batch_") && file_name.ends_with(".json"))
}

/// Basic land variant names: "Forest 2".
static LAND_VARIANT_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(Plains|Island|Swamp|Mountain|Forest)\s+\d+$")
        .expect("Failed to compile land variant regex")
});

/// Bare land type for a variant name like `"Forest 2"`.
pub fn land_base_name(name: &str) -> Option<&str> {
    LAND_VARIANT_PATTERN
        .captures(name.trim())
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

/// Per-run conversion tally.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversionReport {
    pub written: Vec<PathBuf>,
    pub failures: usize,
}

pub struct RenderFormatConverter {
    structured: Arc<dyn StructuredGenerator>,
    output_dir: PathBuf,
    policy: RetryPolicy,
}

impl RenderFormatConverter {
    pub fn new(structured: Arc<dyn StructuredGenerator>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            structured,
            output_dir: output_dir.into(),
            policy: RetryPolicy::fixed(3, 2),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn render_dir(&self) -> PathBuf {
        self.output_dir.join(RENDER_DIR_NAME)
    }

    /// Convert and write one card.
    ///
    /// `Ok(None)` means every attempt failed; the failure is logged.
    pub async fn convert_card(
        &self,
        card: &Card,
        stem: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<PathBuf>> {
        let input = card_input(card)?;
        let request = templates::render_conversion_prompt(&serde_json::to_string_pretty(&input)?);
        let label = format!("render conversion for {}", card.name);

        let result = retry(&self.policy, cancel, &label, |_| {
            let structured = Arc::clone(&self.structured);
            let request = &request;
            async move {
                let value = structured
                    .generate_structured(
                        request,
                        Some(templates::RENDER_CONVERTER_SYSTEM_PROMPT),
                        ModelKey::Json,
                        &GenerationParams::default(),
                    )
                    .await?;
                match value {
                    Value::Object(map) => Ok(map),
                    other => Err(LLMError::Malformed(MalformedResponse::new(
                        "expected a JSON object",
                        other.to_string(),
                    ))),
                }
            }
        })
        .await;

        let converted = match result {
            Ok(map) => finalize_render_record(map, card),
            Err(RetryError::Cancelled) => return Err(PipelineError::Cancelled),
            Err(RetryError::Exhausted { attempts, last }) => {
                tracing::error!(card = %card.name, attempts, error = %last, "render conversion failed");
                return Ok(None);
            }
        };

        let dir = self.render_dir();
        tokio::fs::create_dir_all(&dir).await?;
        let path = dir.join(format!("{stem}{RENDER_FILE_SUFFIX}"));
        tokio::fs::write(&path, serde_json::to_string_pretty(&converted)?).await?;
        tracing::debug!(card = %card.name, path = %path.display(), "wrote render record");
        Ok(Some(path))
    }

    /// Convert a list of cards in order.
    pub async fn convert_cards(
        &self,
        cards: &[Card],
        cancel: &CancellationToken,
    ) -> Result<ConversionReport> {
        let mut report = ConversionReport::default();
        for card in cards {
            match self.convert_card(card, &card.file_stem(), cancel).await? {
                Some(path) => report.written.push(path),
                None => report.failures += 1,
            }
        }
        tracing::info!(
            converted = report.written.len(),
            failures = report.failures,
            "render conversion finished"
        );
        Ok(report)
    }

    /// Convert every card record in `dir`, skipping snapshot files.
    ///
    /// Unreadable records count as failures.
    pub async fn convert_directory(
        &self,
        dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<ConversionReport> {
        let mut files = Vec::new();
        let mut entries = tokio::fs::read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_json = path.extension().is_some_and(|e| e == "json");
            let name = entry.file_name().to_string_lossy().into_owned();
            if is_json && !is_snapshot_file(&name) && entry.file_type().await?.is_file() {
                files.push(path);
            }
        }
        files.sort();
        tracing::info!(dir = %dir.display(), files = files.len(), "converting card records");

        let mut report = ConversionReport::default();
        for path in files {
            let card = match read_card_record(&path).await {
                Ok(card) => card,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping unreadable card record");
                    report.failures += 1;
                    continue;
                }
            };
            let stem = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| card.file_stem());
            match self.convert_card(&card, &stem, cancel).await? {
                Some(written) => report.written.push(written),
                None => report.failures += 1,
            }
        }
        Ok(report)
    }
}

/// Read a `{"card": {...}}` record (a bare card object is accepted too).
pub async fn read_card_record(path: &Path) -> Result<Card> {
    let raw = tokio::fs::read_to_string(path).await?;
    let mut value: Value = serde_json::from_str(&raw)?;
    let card = match value.get_mut("card") {
        Some(inner) => inner.take(),
        None => value,
    };
    Ok(serde_json::from_value(card)?)
}

/// Card fields as sent to the converter; collector numbers go as strings.
fn card_input(card: &Card) -> Result<Value> {
    let mut value = serde_json::to_value(card)?;
    if let Some(obj) = value.as_object_mut() {
        obj.remove("art_prompt");
        obj.remove("description");
        if let Some(n) = card.collector_number {
            obj.insert("collector_number".into(), Value::String(n.to_string()));
        }
    }
    Ok(value)
}

fn stringify(value: Value) -> Option<Value> {
    match value {
        Value::Null => None,
        Value::String(s) if s.trim().is_empty() => None,
        Value::String(s) => Some(Value::String(s)),
        other => Some(Value::String(other.to_string())),
    }
}

/// Enforce the deterministic part of the render mapping on model output.
pub fn finalize_render_record(mut out: Map<String, Value>, card: &Card) -> Value {
    match land_base_name(&card.name) {
        Some(base) if card.type_line.contains("Basic Land") => {
            out.insert("name".into(), json!(base));
            out.insert("original_name".into(), json!(card.name));
        }
        _ => {
            out.insert("name".into(), json!(card.name));
            out.remove("original_name");
        }
    }

    match card.collector_number {
        Some(n) => out.insert("collector_number".into(), json!(n.to_string())),
        None => out.remove("collector_number"),
    };

    match &card.image_path {
        Some(path) => {
            let uris = out
                .entry("image_uris")
                .or_insert_with(|| Value::Object(Map::new()));
            if !uris.is_object() {
                *uris = Value::Object(Map::new());
            }
            if let Some(uris) = uris.as_object_mut() {
                uris.insert("art_crop".into(), json!(format!("{ART_CROP_PREFIX}{path}")));
            }
        }
        None => {
            out.remove("image_uris");
        }
    }

    out.insert("rarity".into(), json!(card.rarity.key()));

    let type_line = out
        .get("type_line")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| card.type_line.clone());
    out.insert("type_line".into(), json!(type_line.replace('—', "-")));

    for key in ["power", "toughness", "loyalty", "authority"] {
        if let Some(v) = out.remove(key).and_then(stringify) {
            out.insert(key.into(), v);
        }
    }

    out.entry("set").or_insert_with(|| json!(RENDER_SET_CODE));
    out.entry("artist").or_insert_with(|| json!(RENDER_ARTIST));
    out.entry("layout").or_insert_with(|| {
        json!(if card.is_vertical_layout() { "saga" } else { "normal" })
    });

    Value::Object(out)
}

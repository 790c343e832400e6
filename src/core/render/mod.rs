//! External card renderer
//!
//! Render-format records are handed to an external program, one file at a
//! time. A failure for one file is recorded and the rest carry on.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::config::{ConfigError, RendererConfig};
use crate::core::card::file_stem_for;

pub const INPUT_PLACEHOLDER: &str = "{input}";
pub const OUTPUT_PLACEHOLDER: &str = "{output}";

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid render record: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Render record has no name")]
    MissingName,

    #[error("Renderer exited with {status}: {stderr}")]
    CommandFailed { status: String, stderr: String },
}

/// Result of rendering one file.
#[derive(Debug)]
pub struct RenderOutcome {
    pub input: PathBuf,
    pub result: std::result::Result<PathBuf, RenderError>,
}

impl RenderOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CardRenderer: Send + Sync {
    /// Render every file; the outcome list matches `files` in order.
    async fn render(&self, files: &[PathBuf]) -> Vec<RenderOutcome>;
}

/// PNG file name for a render record: `original_name` wins over `name`.
pub fn rendered_file_name(record: &Value) -> Option<String> {
    record
        .get("original_name")
        .or_else(|| record.get("name"))
        .and_then(Value::as_str)
        .map(|name| format!("{}.png", file_stem_for(name)))
}

/// All `*_render.json` files under `dir`, sorted.
pub async fn render_records_in(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let matches = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.ends_with("_render.json"));
        if matches {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

// ============================================================================
// Command renderer
// ============================================================================

/// Runs a configured command per file with `{input}`/`{output}` substituted.
pub struct CommandRenderer {
    command: Vec<String>,
    output_dir: PathBuf,
}

impl CommandRenderer {
    pub fn new(command: Vec<String>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            command,
            output_dir: output_dir.into(),
        }
    }

    async fn render_one(&self, input: &Path) -> std::result::Result<PathBuf, RenderError> {
        let raw = tokio::fs::read_to_string(input).await?;
        let record: Value = serde_json::from_str(&raw)?;
        let file_name = rendered_file_name(&record).ok_or(RenderError::MissingName)?;
        let output = self.output_dir.join(file_name);

        let input_str = input.display().to_string();
        let output_str = output.display().to_string();
        let args: Vec<String> = self
            .command
            .iter()
            .map(|arg| {
                arg.replace(INPUT_PLACEHOLDER, &input_str)
                    .replace(OUTPUT_PLACEHOLDER, &output_str)
            })
            .collect();

        let Some((program, rest)) = args.split_first() else {
            return Err(RenderError::CommandFailed {
                status: "not started".to_string(),
                stderr: "empty renderer command".to_string(),
            });
        };
        let result = tokio::process::Command::new(program).args(rest).output().await?;
        if !result.status.success() {
            return Err(RenderError::CommandFailed {
                status: result.status.to_string(),
                stderr: String::from_utf8_lossy(&result.stderr).trim().to_string(),
            });
        }
        Ok(output)
    }
}

#[async_trait]
impl CardRenderer for CommandRenderer {
    async fn render(&self, files: &[PathBuf]) -> Vec<RenderOutcome> {
        if let Err(e) = tokio::fs::create_dir_all(&self.output_dir).await {
            tracing::error!(dir = %self.output_dir.display(), error = %e, "cannot create render directory");
        }

        let mut outcomes = Vec::with_capacity(files.len());
        for input in files {
            let result = self.render_one(input).await;
            match &result {
                Ok(path) => tracing::info!(input = %input.display(), output = %path.display(), "rendered card"),
                Err(e) => tracing::warn!(input = %input.display(), error = %e, "render failed"),
            }
            outcomes.push(RenderOutcome {
                input: input.clone(),
                result,
            });
        }
        outcomes
    }
}

/// Renderer used when rendering is switched off.
pub struct DisabledRenderer;

#[async_trait]
impl CardRenderer for DisabledRenderer {
    async fn render(&self, files: &[PathBuf]) -> Vec<RenderOutcome> {
        tracing::debug!(files = files.len(), "renderer disabled, skipping");
        Vec::new()
    }
}

/// Build the renderer for a run writing into `set_dir`.
pub fn create_renderer(
    config: &RendererConfig,
    set_dir: &Path,
) -> Result<Arc<dyn CardRenderer>, ConfigError> {
    if !config.enabled {
        return Ok(Arc::new(DisabledRenderer));
    }
    if config.command.is_empty() {
        return Err(ConfigError::Invalid(
            "renderer is enabled but no command is configured".to_string(),
        ));
    }
    Ok(Arc::new(CommandRenderer::new(
        config.command.clone(),
        set_dir.join(&config.output_dir_name),
    )))
}

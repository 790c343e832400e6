use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use rand::SeedableRng;
use tokio_util::sync::CancellationToken;

use setforge::config::{AppConfig, RunConfiguration};
use setforge::core::generation::convert::RENDER_DIR_NAME;
use setforge::core::generation::{
    InspirationCorpus, Orchestrator, PipelineError, RenderFormatConverter, RetryPolicy,
};
use setforge::core::image::create_image_generator;
use setforge::core::llm::create_language_model;
use setforge::core::logging;
use setforge::core::render::{create_renderer, render_records_in, CardRenderer};

#[derive(Parser)]
#[command(name = "setforge")]
#[command(about = "Themed trading-card set generator", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file (default: user config dir, then ./setforge.toml)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a complete set
    Generate {
        /// Number of batches to generate
        #[arg(long)]
        batches: Option<u32>,

        /// Extra direction for the theme
        #[arg(long, value_name = "TEXT", conflicts_with = "theme_file")]
        theme_prompt: Option<String>,

        /// Use the contents of this file as the complete theme
        #[arg(long, value_name = "PATH")]
        theme_file: Option<PathBuf>,

        /// Skip basic land generation
        #[arg(long)]
        no_lands: bool,

        /// Base directory for set output
        #[arg(long, value_name = "DIR")]
        output: Option<PathBuf>,
    },

    /// Convert the card records of a set directory to render format
    Convert {
        /// Set directory holding per-card JSON files
        #[arg(value_name = "DIR")]
        dir: PathBuf,

        /// Attempts per card
        #[arg(long)]
        retries: Option<u32>,
    },

    /// Re-render the render-format records of a set directory
    Render {
        #[arg(value_name = "DIR")]
        dir: PathBuf,
    },

    /// Print a sample from the inspiration corpus
    Sample {
        #[arg(long, default_value_t = 10)]
        count: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Generate {
            batches,
            theme_prompt,
            theme_file,
            no_lands,
            output,
        } => {
            let mut config = load_config(cli.config.as_ref())?;
            if let Some(batches) = batches {
                config.run.batches_count = batches;
            }
            if theme_prompt.is_some() {
                config.run.theme_prompt = theme_prompt;
            }
            if let Some(path) = theme_file {
                let theme = std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read theme file {}", path.display()))?;
                config.run.complete_theme_override = Some(theme);
            }
            if no_lands {
                config.run.generate_basic_lands = false;
            }
            if let Some(output) = output {
                config.run.output_directory_base = output;
            }
            generate(config).await
        }
        Commands::Convert { dir, retries } => {
            let config = load_config(cli.config.as_ref())?;
            convert(config, dir, retries).await
        }
        Commands::Render { dir } => {
            let config = load_config(cli.config.as_ref())?;
            render(config, dir).await
        }
        Commands::Sample { count } => {
            let config = load_config(cli.config.as_ref())?;
            sample(config, count)
        }
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<AppConfig> {
    AppConfig::load(path.map(PathBuf::as_path)).context("Failed to load configuration")
}

/// Cancel `token` on Ctrl-C.
fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, finishing current step");
            token.cancel();
        }
    });
}

async fn generate(config: AppConfig) -> Result<()> {
    let run = RunConfiguration::create(config.run.clone()).context("Invalid run configuration")?;
    let _log_guard = logging::init(&run.output_dir);
    tracing::info!("{} v{} starting", setforge::NAME, setforge::VERSION);

    let language_model = create_language_model(&config)?;
    let image = create_image_generator(&config)?;
    let renderer = create_renderer(&config.renderer, &run.output_dir)?;

    let models: BTreeMap<String, String> = config
        .language_model
        .active()
        .map(|settings| {
            settings
                .models
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()
        })
        .unwrap_or_default();

    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());

    let mut orchestrator = Orchestrator::new(
        run,
        language_model,
        image,
        renderer,
        config.retry.clone(),
        cancel,
    )
    .with_image_subdir(config.image_generation.default_output_dir_name.clone())
    .with_models(models);

    match orchestrator.generate_complete_set().await {
        Ok(snapshot) => {
            println!("{}", snapshot.statistics().summary());
            println!("Set written to {}", orchestrator.output_dir().display());
            Ok(())
        }
        Err(PipelineError::Cancelled) => {
            bail!(
                "Generation cancelled; partial set saved in {}",
                orchestrator.output_dir().display()
            )
        }
        Err(e) => Err(e).context("Set generation failed"),
    }
}

async fn convert(config: AppConfig, dir: PathBuf, retries: Option<u32>) -> Result<()> {
    let _log_guard = logging::init_in_set_dir(&dir)?;

    let mut policy = config.retry.conversion.clone();
    if let Some(attempts) = retries {
        policy = RetryPolicy {
            max_attempts: attempts.max(1),
            ..policy
        };
    }
    let language_model = create_language_model(&config)?;
    let converter = RenderFormatConverter::new(language_model.structured, &dir).with_policy(policy);

    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());

    let report = converter
        .convert_directory(&dir, &cancel)
        .await
        .context("Conversion failed")?;
    println!(
        "Converted {} card(s) into {}, {} failure(s)",
        report.written.len(),
        converter.render_dir().display(),
        report.failures
    );
    Ok(())
}

async fn render(config: AppConfig, dir: PathBuf) -> Result<()> {
    let _log_guard = logging::init_in_set_dir(&dir)?;
    let mut renderer_config = config.renderer.clone();
    renderer_config.enabled = true;
    let renderer = create_renderer(&renderer_config, &dir)?;

    let records_dir = dir.join(RENDER_DIR_NAME);
    let files = render_records_in(&records_dir)
        .await
        .with_context(|| format!("Failed to list {}", records_dir.display()))?;
    if files.is_empty() {
        println!("No render records found in {}", records_dir.display());
        return Ok(());
    }

    let outcomes = renderer.render(&files).await;
    let failed = outcomes.iter().filter(|o| !o.is_success()).count();
    for outcome in outcomes.iter().filter(|o| !o.is_success()) {
        if let Err(e) = &outcome.result {
            eprintln!("{}: {}", outcome.input.display(), e);
        }
    }
    println!("Rendered {} card(s), {} failure(s)", outcomes.len() - failed, failed);
    Ok(())
}

fn sample(config: AppConfig, count: usize) -> Result<()> {
    logging::init_console();
    let corpus = InspirationCorpus::load(&config.run.csv_file_path).with_context(|| {
        format!(
            "Failed to load inspiration corpus {}",
            config.run.csv_file_path.display()
        )
    })?;
    let mut rng = match config.run.seed {
        Some(seed) => rand::rngs::StdRng::seed_from_u64(seed),
        None => rand::rngs::StdRng::from_entropy(),
    };
    for card in corpus.sample(count, &mut rng) {
        println!("{}", card.batch_line());
    }
    Ok(())
}

//! CLI binary for edgequake-receipt2json.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `PipelineConfig`, prints the item array and turns failures into exit codes.

use anyhow::{Context, Result};
use clap::Parser;
use edgequake_receipt2json::config::{api_key_var, DEFAULT_MODEL, DEFAULT_PROVIDER};
use edgequake_receipt2json::{
    run, run_to_file, ErrorKind, ExtractionMode, PipelineConfig, PipelineProgressCallback,
    ProgressCallback, ReceiptError, Stage,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal spinner that names the current stage and logs each finished one.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(style);
        bar.set_prefix("Receipt");
        bar.set_message("checking configuration…");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }
}

fn stage_label(stage: Stage) -> &'static str {
    match stage {
        Stage::Configure => "configuration",
        Stage::Preprocess => "preprocessing image",
        Stage::Extract => "extracting items",
        Stage::Normalize => "normalizing items",
    }
}

impl PipelineProgressCallback for CliProgressCallback {
    fn on_stage_start(&self, stage: Stage) {
        self.bar.set_message(format!("{}…", stage_label(stage)));
    }

    fn on_stage_complete(&self, stage: Stage, elapsed_ms: u64) {
        self.bar.println(format!(
            "  {} {:<10} {}",
            green("✓"),
            stage.to_string(),
            dim(&format!("{:.1}s", elapsed_ms as f64 / 1000.0)),
        ));
    }

    fn on_stage_error(&self, stage: Stage, _error: &str) {
        self.bar.println(format!("  {} {}", red("✗"), stage));
        self.bar.finish_and_clear();
    }

    fn on_run_complete(&self, item_count: usize) {
        self.bar.finish_and_clear();
        eprintln!(
            "{} {} items extracted",
            green("✔"),
            bold(&item_count.to_string())
        );
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Read uploads/test1.jpg and print the items
  receipt2json

  # A specific photo
  receipt2json ~/Pictures/receipt.jpg

  # Write the items to a file
  receipt2json receipt.jpg -o items.json

  # OCR.space text path instead of the vision model
  receipt2json --mode ocr receipt.jpg

  # Items, raw model items and run stats as one JSON object
  receipt2json --raw receipt.jpg

  # Another provider / model
  receipt2json --provider openai --model gpt-4.1-mini receipt.jpg

OUTPUT:
  [
    {"name": "milk", "price": 3.49, "quantity": 1, "unit": ""},
    {"name": "bread lvovskiy", "price": 3.69, "quantity": 440, "unit": "gr"}
  ]

EXIT CODES:
  0  success
  2  configuration error (missing API key, bad setting)
  3  I/O error (photo missing, unreadable, not an image)
  4  service error (OCR or model unreachable, timed out)
  5  contract violation (model answer was not a bare JSON array)
  1  anything else

ENVIRONMENT VARIABLES:
  GEMINI_API_KEY          Google Gemini API key (default provider)
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  OCR_API_KEY             OCR.space API key (--mode ocr only)
  RECEIPT_LLM_PROVIDER    Provider (gemini, openai, anthropic, ollama, …)
  RECEIPT_MODEL           Model ID
  UPLOAD_DIR              Working directory for photos (default: uploads)
"#;

/// Convert receipt photos to JSON line items using vision LLMs.
#[derive(Parser, Debug)]
#[command(
    name = "receipt2json",
    version,
    about = "Convert receipt photos to JSON line items using vision LLMs",
    long_about = "Convert a photo of a retail receipt into a JSON array of line items \
(name, price, quantity, unit). The photo is downscaled and grayscaled, read by a hosted \
vision model (or OCR.space plus a text model), and normalized into canonical units.",
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Receipt photo. Defaults to <UPLOAD_DIR>/test1.jpg.
    image: Option<PathBuf>,

    /// Write the JSON items to this file instead of stdout.
    #[arg(short, long, env = "RECEIPT_OUTPUT")]
    output: Option<PathBuf>,

    /// Pipeline shape: vision (image → model) or ocr (image → OCR.space → model).
    #[arg(long, env = "RECEIPT_MODE", value_enum, default_value = "vision")]
    mode: ModeArg,

    /// LLM provider: gemini, openai, anthropic, ollama, azure, …
    #[arg(long, env = "RECEIPT_LLM_PROVIDER", default_value = DEFAULT_PROVIDER)]
    provider: String,

    /// Model ID used for extraction and normalization.
    #[arg(long, env = "RECEIPT_MODEL", default_value = DEFAULT_MODEL)]
    model: String,

    /// API key for the LLM provider. Default: the provider's own variable
    /// (GEMINI_API_KEY, OPENAI_API_KEY, …).
    #[arg(long)]
    api_key: Option<String>,

    /// OCR.space API key (ocr mode only).
    #[arg(long, env = "OCR_API_KEY", hide_env_values = true)]
    ocr_api_key: Option<String>,

    /// OCR language code.
    #[arg(long, env = "RECEIPT_OCR_LANGUAGE", default_value = "eng")]
    ocr_language: String,

    /// Upload / working directory.
    #[arg(long, env = "UPLOAD_DIR", default_value = "uploads")]
    upload_dir: PathBuf,

    /// Where preprocessed JPEGs go. Default: <UPLOAD_DIR>/processed.
    #[arg(long, env = "RECEIPT_PROCESSED_DIR")]
    processed_dir: Option<PathBuf>,

    /// Longest side of the preprocessed image in pixels.
    #[arg(long, env = "RECEIPT_MAX_DIMENSION", default_value_t = 1800,
          value_parser = clap::value_parser!(u32).range(1..))]
    max_dimension: u32,

    /// JPEG quality (0–100).
    #[arg(long, env = "RECEIPT_JPEG_QUALITY", default_value_t = 85,
          value_parser = clap::value_parser!(u8).range(0..=100))]
    quality: u8,

    /// Skip the model normalization pass; apply only the deterministic rules.
    #[arg(long, env = "RECEIPT_NO_MODEL_NORMALIZATION")]
    no_model_normalization: bool,

    /// Accept model answers wrapped in a ```json fence.
    #[arg(long, env = "RECEIPT_ACCEPT_FENCED_JSON")]
    accept_fenced_json: bool,

    /// LLM temperature (0.0–2.0).
    #[arg(long, env = "RECEIPT_TEMPERATURE", default_value_t = 0.0)]
    temperature: f32,

    /// Max LLM output tokens per call.
    #[arg(long, env = "RECEIPT_MAX_TOKENS", default_value_t = 4096)]
    max_tokens: usize,

    /// Retries per call on service failure.
    #[arg(long, env = "RECEIPT_MAX_RETRIES", default_value_t = 3)]
    max_retries: u32,

    /// Per-call OCR / LLM timeout in seconds.
    #[arg(long, env = "RECEIPT_API_TIMEOUT", default_value_t = 60,
          value_parser = clap::value_parser!(u64).range(1..))]
    api_timeout: u64,

    /// Print items, raw model items and run stats as one JSON object.
    #[arg(long)]
    raw: bool,

    /// Disable the progress spinner.
    #[arg(long, env = "RECEIPT_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "RECEIPT_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "RECEIPT_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Debug)]
enum ModeArg {
    Vision,
    Ocr,
}

impl From<ModeArg> for ExtractionMode {
    fn from(v: ModeArg) -> Self {
        match v {
            ModeArg::Vision => ExtractionMode::Vision,
            ModeArg::Ocr => ExtractionMode::OcrText,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // Suppress INFO-level library logs while the spinner is active.
    let show_progress = !cli.quiet && !cli.no_progress;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    match execute(cli, show_progress).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {:#}", red("error:"), e);
            ExitCode::from(exit_code(&e))
        }
    }
}

async fn execute(cli: Cli, show_progress: bool) -> Result<()> {
    let image = match cli.image.clone() {
        Some(path) => path,
        None => {
            let fallback = cli.upload_dir.join("test1.jpg");
            if !cli.quiet {
                eprintln!("Usage: receipt2json [IMAGE]");
                eprintln!("{}", dim(&format!("No image given, using {}", fallback.display())));
            }
            fallback
        }
    };

    let progress_cb: Option<ProgressCallback> = if show_progress {
        let cb = CliProgressCallback::new();
        Some(cb as Arc<dyn PipelineProgressCallback>)
    } else {
        None
    };

    let config = build_config(&cli, progress_cb)?;

    if let Some(ref output_path) = cli.output {
        let output = run_to_file(&image, output_path, &config)
            .await
            .with_context(|| format!("Failed to process {}", image.display()))?;

        if !cli.quiet {
            eprintln!(
                "{}  {} items  {}ms  →  {}",
                green("✔"),
                output.items.len(),
                output.stats.total_ms,
                bold(&output_path.display().to_string()),
            );
        }
        if cli.raw {
            print_json(&output)?;
        }
    } else {
        let output = run(&image, &config)
            .await
            .with_context(|| format!("Failed to process {}", image.display()))?;

        if cli.raw {
            print_json(&output)?;
        } else {
            print_json(&output.items)?;
        }

        if !cli.quiet && !show_progress {
            eprintln!(
                "Extracted {} items in {}ms ({} preprocessed bytes)",
                output.items.len(),
                output.stats.total_ms,
                output.stats.preprocessed_bytes
            );
        }
    }

    Ok(())
}

/// Map CLI args to `PipelineConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<PipelineConfig> {
    let mut builder = PipelineConfig::builder()
        .provider_name(&cli.provider)
        .model(&cli.model)
        .mode(cli.mode.clone().into())
        .ocr_language(&cli.ocr_language)
        .upload_dir(&cli.upload_dir)
        .max_dimension(cli.max_dimension)
        .jpeg_quality(cli.quality)
        .model_normalization(!cli.no_model_normalization)
        .accept_fenced_json(cli.accept_fenced_json)
        .temperature(cli.temperature)
        .max_tokens(cli.max_tokens)
        .max_retries(cli.max_retries)
        .api_timeout_secs(cli.api_timeout);

    // The library never reads the environment; the CLI is where the
    // provider's key variable is looked up.
    let llm_key = cli
        .api_key
        .clone()
        .or_else(|| api_key_var(&cli.provider).and_then(|var| std::env::var(var).ok()));
    if let Some(key) = llm_key {
        builder = builder.llm_api_key(key);
    }
    if let Some(ref key) = cli.ocr_api_key {
        builder = builder.ocr_api_key(key);
    }
    if let Some(ref dir) = cli.processed_dir {
        builder = builder.processed_dir(dir);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to serialise output")?;
    println!("{json}");
    Ok(())
}

/// Exit code for the first `ReceiptError` in the error chain.
fn exit_code(err: &anyhow::Error) -> u8 {
    let kind = err
        .chain()
        .find_map(|cause| cause.downcast_ref::<ReceiptError>())
        .map(ReceiptError::kind);

    match kind {
        Some(ErrorKind::Configuration) => 2,
        Some(ErrorKind::Io) => 3,
        Some(ErrorKind::Service) => 4,
        Some(ErrorKind::ContractViolation) => 5,
        Some(ErrorKind::Internal) | None => 1,
    }
}

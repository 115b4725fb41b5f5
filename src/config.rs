//! Configuration types for receipt-to-JSON conversion.
//!
//! All pipeline behaviour is controlled through [`PipelineConfig`], built via
//! [`PipelineConfigBuilder`] or loaded with [`PipelineConfig::from_env`].
//! The config is created once at process start and is read-only afterwards,
//! so a single `Arc<PipelineConfig>` can be shared by any number of
//! concurrent receipt runs without locking.
//!
//! Credentials live here too. Nothing below the orchestrator reads the
//! environment; stages receive the config by reference.

use crate::error::ReceiptError;
use crate::pipeline::llm::ChatModel;
use crate::pipeline::ocr::TextRecognizer;
use crate::progress::ProgressCallback;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

/// Default provider; its vision model reads receipts well at low cost.
pub const DEFAULT_PROVIDER: &str = "gemini";
/// Default model for both the extraction and the normalization call.
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";
/// Default OCR.space endpoint for [`ExtractionMode::OcrText`].
pub const DEFAULT_OCR_ENDPOINT: &str = "https://api.ocr.space/parse/image";

/// Configuration for a receipt pipeline run.
///
/// # Example
/// ```rust
/// use edgequake_receipt2json::{ExtractionMode, PipelineConfig};
///
/// let config = PipelineConfig::builder()
///     .llm_api_key("test-key")
///     .max_dimension(1600)
///     .jpeg_quality(80)
///     .mode(ExtractionMode::Vision)
///     .build()
///     .unwrap();
/// assert!(config.validate_credentials().is_ok());
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    /// LLM provider name (`gemini`, `openai`, `anthropic`, `ollama`, …). Default: `gemini`.
    pub provider_name: String,

    /// Model used for extraction and normalization. Default: `gemini-2.5-flash`.
    pub model: String,

    /// API key for the LLM provider. Required unless the provider is local
    /// (ollama, lmstudio) or a model/provider was injected.
    pub llm_api_key: Option<String>,

    /// OCR.space API key. Required only in [`ExtractionMode::OcrText`].
    pub ocr_api_key: Option<String>,

    /// OCR language hint. Default: `eng`.
    pub ocr_language: String,

    /// OCR endpoint URL. Default: [`DEFAULT_OCR_ENDPOINT`].
    pub ocr_endpoint: String,

    /// Upload / working directory. Default: `uploads`.
    pub upload_dir: PathBuf,

    /// Where preprocessed JPEGs are written. Default: `<upload_dir>/processed`.
    pub processed_dir: Option<PathBuf>,

    /// Longest side of the preprocessed image, in pixels. Default: 1800.
    ///
    /// Receipt text stays legible at 1800 px while the grayscale JPEG almost
    /// always lands under the 1 MB upload target.
    pub max_dimension: u32,

    /// JPEG quality 0–100. Default: 85.
    pub jpeg_quality: u8,

    /// Which pipeline shape this deployment uses. Default: [`ExtractionMode::Vision`].
    pub mode: ExtractionMode,

    /// Run the model normalization pass before the deterministic rules. Default: true.
    pub model_normalization: bool,

    /// Tolerate a single outer ```` ```json ```` fence around model output. Default: false.
    ///
    /// Off by default: a fenced answer breaks the bare-array contract and is
    /// reported as a contract violation.
    pub accept_fenced_json: bool,

    /// Sampling temperature. Default: 0.0.
    pub temperature: f32,

    /// Maximum tokens per model answer. Default: 4096.
    pub max_tokens: usize,

    /// Retries on transport failures (never on contract violations). Default: 3.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds, doubled per attempt. Default: 500.
    pub retry_backoff_ms: u64,

    /// Per-call timeout for OCR and model requests, in seconds. Default: 60.
    pub api_timeout_secs: u64,

    /// Receipts processed at once by `run_batch` / `run_stream`. Default: 4.
    pub concurrency: usize,

    /// Override for the extraction instruction.
    pub extraction_prompt: Option<String>,

    /// Override for the normalization instruction.
    pub normalization_prompt: Option<String>,

    /// Pre-built chat model. Takes precedence over `provider` and `provider_name`.
    pub chat_model: Option<Arc<dyn ChatModel>>,

    /// Pre-constructed edgequake-llm provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Pre-built OCR backend. Takes precedence over the OCR.space client.
    pub text_recognizer: Option<Arc<dyn TextRecognizer>>,

    /// Optional stage-progress callback.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            provider_name: DEFAULT_PROVIDER.to_string(),
            model: DEFAULT_MODEL.to_string(),
            llm_api_key: None,
            ocr_api_key: None,
            ocr_language: "eng".to_string(),
            ocr_endpoint: DEFAULT_OCR_ENDPOINT.to_string(),
            upload_dir: PathBuf::from("uploads"),
            processed_dir: None,
            max_dimension: 1800,
            jpeg_quality: 85,
            mode: ExtractionMode::default(),
            model_normalization: true,
            accept_fenced_json: false,
            temperature: 0.0,
            max_tokens: 4096,
            max_retries: 3,
            retry_backoff_ms: 500,
            api_timeout_secs: 60,
            concurrency: 4,
            extraction_prompt: None,
            normalization_prompt: None,
            chat_model: None,
            provider: None,
            text_recognizer: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |k: &Option<String>| k.as_ref().map(|_| "<redacted>");
        f.debug_struct("PipelineConfig")
            .field("provider_name", &self.provider_name)
            .field("model", &self.model)
            .field("llm_api_key", &redact(&self.llm_api_key))
            .field("ocr_api_key", &redact(&self.ocr_api_key))
            .field("upload_dir", &self.upload_dir)
            .field("max_dimension", &self.max_dimension)
            .field("jpeg_quality", &self.jpeg_quality)
            .field("mode", &self.mode)
            .field("model_normalization", &self.model_normalization)
            .field("temperature", &self.temperature)
            .field("max_retries", &self.max_retries)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("chat_model", &self.chat_model.as_ref().map(|_| "<dyn ChatModel>"))
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field(
                "text_recognizer",
                &self.text_recognizer.as_ref().map(|_| "<dyn TextRecognizer>"),
            )
            .finish()
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }

    /// Load the configuration from environment variables.
    ///
    /// | Variable | Meaning |
    /// |----------|---------|
    /// | `RECEIPT_LLM_PROVIDER` | provider name (default `gemini`) |
    /// | `RECEIPT_MODEL` | model id (default `gemini-2.5-flash`) |
    /// | `GEMINI_API_KEY`, `OPENAI_API_KEY`, … | key for the chosen provider |
    /// | `OCR_API_KEY` | OCR.space key (ocr mode only) |
    /// | `UPLOAD_DIR` | upload / working directory (default `uploads`) |
    /// | `RECEIPT_MODE` | `vision` or `ocr` |
    /// | `RECEIPT_MAX_DIMENSION` | longest side in px (default 1800) |
    /// | `RECEIPT_JPEG_QUALITY` | 0–100 (default 85) |
    ///
    /// Missing keys are not an error here; [`PipelineConfig::validate_credentials`]
    /// reports them when a run starts.
    pub fn from_env() -> Result<Self, ReceiptError> {
        let mut builder = Self::builder();

        if let Some(provider) = env_non_empty("RECEIPT_LLM_PROVIDER") {
            builder = builder.provider_name(provider);
        }
        if let Some(model) = env_non_empty("RECEIPT_MODEL") {
            builder = builder.model(model);
        }
        let provider_name = builder.config.provider_name.clone();
        if let Some(key) = api_key_var(&provider_name).and_then(env_non_empty) {
            builder = builder.llm_api_key(key);
        }
        if let Some(key) = env_non_empty("OCR_API_KEY") {
            builder = builder.ocr_api_key(key);
        }
        if let Some(dir) = env_non_empty("UPLOAD_DIR") {
            builder = builder.upload_dir(dir);
        }
        if let Some(mode) = env_non_empty("RECEIPT_MODE") {
            builder = builder.mode(mode.parse()?);
        }
        if let Some(px) = env_non_empty("RECEIPT_MAX_DIMENSION") {
            let px: u32 = px.parse().map_err(|_| {
                ReceiptError::InvalidConfig(format!(
                    "RECEIPT_MAX_DIMENSION must be a positive integer, got '{px}'"
                ))
            })?;
            builder = builder.max_dimension(px);
        }
        if let Some(q) = env_non_empty("RECEIPT_JPEG_QUALITY") {
            let q: u8 = q.parse().map_err(|_| {
                ReceiptError::InvalidConfig(format!(
                    "RECEIPT_JPEG_QUALITY must be 0–100, got '{q}'"
                ))
            })?;
            builder = builder.jpeg_quality(q);
        }

        builder.build()
    }

    /// Directory that receives preprocessed JPEGs.
    pub fn processed_dir(&self) -> PathBuf {
        self.processed_dir
            .clone()
            .unwrap_or_else(|| self.upload_dir.join("processed"))
    }

    /// Check that every credential the chosen pipeline shape needs is present.
    ///
    /// Called by the orchestrator before any file or network I/O.
    pub fn validate_credentials(&self) -> Result<(), ReceiptError> {
        let llm_injected = self.chat_model.is_some() || self.provider.is_some();
        if !llm_injected && is_blank(&self.llm_api_key) {
            if let Some(var) = api_key_var(&self.provider_name) {
                return Err(ReceiptError::MissingCredential {
                    key: var.to_string(),
                    hint: format!(
                        "Provider '{}' needs an API key. Try: export {var}=...",
                        self.provider_name
                    ),
                });
            }
        }

        if self.mode == ExtractionMode::OcrText
            && self.text_recognizer.is_none()
            && is_blank(&self.ocr_api_key)
        {
            return Err(ReceiptError::MissingCredential {
                key: "OCR_API_KEY".to_string(),
                hint: "OCR mode sends the photo to OCR.space first. Set OCR_API_KEY \
                       or switch to --mode vision."
                    .to_string(),
            });
        }

        Ok(())
    }
}

/// Environment variable holding the API key for a provider.
///
/// `None` for local providers that need no key, and for providers this crate
/// does not know (their factory reports missing keys itself).
pub fn api_key_var(provider: &str) -> Option<&'static str> {
    match provider.to_lowercase().as_str() {
        "gemini" | "google" => Some("GEMINI_API_KEY"),
        "openai" => Some("OPENAI_API_KEY"),
        "anthropic" | "claude" => Some("ANTHROPIC_API_KEY"),
        "mistral" => Some("MISTRAL_API_KEY"),
        "openrouter" => Some("OPENROUTER_API_KEY"),
        "azure" => Some("AZURE_OPENAI_API_KEY"),
        _ => None,
    }
}

fn env_non_empty(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().map(str::trim).unwrap_or("").is_empty()
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = name.into();
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = model.into();
        self
    }

    pub fn llm_api_key(mut self, key: impl Into<String>) -> Self {
        self.config.llm_api_key = Some(key.into());
        self
    }

    pub fn ocr_api_key(mut self, key: impl Into<String>) -> Self {
        self.config.ocr_api_key = Some(key.into());
        self
    }

    pub fn ocr_language(mut self, lang: impl Into<String>) -> Self {
        self.config.ocr_language = lang.into();
        self
    }

    pub fn ocr_endpoint(mut self, url: impl Into<String>) -> Self {
        self.config.ocr_endpoint = url.into();
        self
    }

    pub fn upload_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.upload_dir = dir.into();
        self
    }

    pub fn processed_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.processed_dir = Some(dir.into());
        self
    }

    pub fn max_dimension(mut self, px: u32) -> Self {
        self.config.max_dimension = px;
        self
    }

    pub fn jpeg_quality(mut self, q: u8) -> Self {
        self.config.jpeg_quality = q;
        self
    }

    pub fn mode(mut self, mode: ExtractionMode) -> Self {
        self.config.mode = mode;
        self
    }

    pub fn model_normalization(mut self, v: bool) -> Self {
        self.config.model_normalization = v;
        self
    }

    pub fn accept_fenced_json(mut self, v: bool) -> Self {
        self.config.accept_fenced_json = v;
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn extraction_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.extraction_prompt = Some(prompt.into());
        self
    }

    pub fn normalization_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.normalization_prompt = Some(prompt.into());
        self
    }

    pub fn chat_model(mut self, model: Arc<dyn ChatModel>) -> Self {
        self.config.chat_model = Some(model);
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn text_recognizer(mut self, recognizer: Arc<dyn TextRecognizer>) -> Self {
        self.config.text_recognizer = Some(recognizer);
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    ///
    /// Credentials are checked separately by
    /// [`PipelineConfig::validate_credentials`] so a config can be built
    /// before keys are known (e.g. for `--help` or tests).
    pub fn build(self) -> Result<PipelineConfig, ReceiptError> {
        let c = &self.config;
        if c.max_dimension == 0 {
            return Err(ReceiptError::InvalidConfig(
                "max_dimension must be > 0".into(),
            ));
        }
        if c.jpeg_quality > 100 {
            return Err(ReceiptError::InvalidConfig(format!(
                "jpeg_quality must be 0–100, got {}",
                c.jpeg_quality
            )));
        }
        if c.api_timeout_secs == 0 {
            return Err(ReceiptError::InvalidConfig(
                "api_timeout_secs must be ≥ 1".into(),
            ));
        }
        if c.provider_name.trim().is_empty() || c.model.trim().is_empty() {
            return Err(ReceiptError::InvalidConfig(
                "provider and model must not be empty".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Pipeline shape for a deployment.
///
/// | Mode | Extraction input |
/// |------|------------------|
/// | `Vision` | preprocessed JPEG sent straight to a multimodal model (default) |
/// | `OcrText` | JPEG → OCR.space → plain text → text model |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMode {
    #[default]
    Vision,
    OcrText,
}

impl FromStr for ExtractionMode {
    type Err = ReceiptError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "vision" | "image" => Ok(ExtractionMode::Vision),
            "ocr" | "ocr-text" | "ocr_text" | "text" => Ok(ExtractionMode::OcrText),
            other => Err(ReceiptError::InvalidConfig(format!(
                "unknown extraction mode '{other}' (expected 'vision' or 'ocr')"
            ))),
        }
    }
}

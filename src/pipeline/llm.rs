//! Model interaction: the narrow chat seam and the retry loop around it.
//!
//! Stages never talk to a vendor SDK directly. They hand an instruction and
//! an input (image or text) to a [`ChatModel`] and get text back. The default
//! implementation, [`ProviderChatModel`], forwards to an `edgequake-llm`
//! provider; tests plug in a fixture-returning mock instead.
//!
//! ## Retry Strategy
//!
//! Only transport failures are retried: non-success status, network errors
//! and timeouts. A response that arrived but broke the JSON-array contract is
//! never retried here; the caller turns it into a contract violation.
//! Backoff doubles per attempt (`retry_backoff_ms * 2^(attempt-1)`), and every
//! attempt is bounded by `api_timeout_secs`.

use crate::config::PipelineConfig;
use crate::error::{ReceiptError, Stage};
use async_trait::async_trait;
use edgequake_llm::{
    AnthropicProvider, ChatMessage, CompletionOptions, GeminiProvider, ImageData, LLMProvider,
    MistralProvider, OpenAIProvider, OpenRouterProvider, ProviderFactory,
};
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, warn};

/// What the model is asked to read.
#[derive(Clone)]
pub enum ModelInput {
    /// Preprocessed receipt photo.
    Image(ImageData),
    /// Plain text: OCR output or a JSON array of items.
    Text(String),
}

impl ModelInput {
    pub fn is_image(&self) -> bool {
        matches!(self, ModelInput::Image(_))
    }

    /// The text payload, if this is a text input.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ModelInput::Text(t) => Some(t),
            ModelInput::Image(_) => None,
        }
    }
}

/// Generation parameters for one call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CallOptions {
    pub temperature: f32,
    pub max_tokens: usize,
}

impl CallOptions {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        }
    }
}

/// Transport-level failure of a model call.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct ModelCallError(pub String);

/// A hosted chat model that answers an instruction about one input.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Short service name used in logs and errors (e.g. `gemini`).
    fn name(&self) -> &str;

    /// Send `instruction` plus `input`; return the raw completion text.
    async fn complete(
        &self,
        instruction: &str,
        input: ModelInput,
        options: &CallOptions,
    ) -> Result<String, ModelCallError>;
}

/// [`ChatModel`] backed by an `edgequake-llm` provider.
pub struct ProviderChatModel {
    name: String,
    provider: Arc<dyn LLMProvider>,
}

impl ProviderChatModel {
    pub fn new(name: impl Into<String>, provider: Arc<dyn LLMProvider>) -> Self {
        Self {
            name: name.into(),
            provider,
        }
    }
}

#[async_trait]
impl ChatModel for ProviderChatModel {
    fn name(&self) -> &str {
        &self.name
    }

    /// ## Message Layout
    ///
    /// 1. **System message** — the fixed extraction or normalization instruction
    /// 2. **User message** — the receipt image (with a one-line nudge) or the text payload
    async fn complete(
        &self,
        instruction: &str,
        input: ModelInput,
        options: &CallOptions,
    ) -> Result<String, ModelCallError> {
        let user = match input {
            ModelInput::Image(image) => ChatMessage::user_with_images(
                "Extract the line items from this receipt.",
                vec![image],
            ),
            ModelInput::Text(text) => ChatMessage::user(text),
        };
        let messages = vec![ChatMessage::system(instruction), user];
        let opts = build_options(options);

        let response = self
            .provider
            .chat(&messages, Some(&opts))
            .await
            .map_err(|e| ModelCallError(e.to_string()))?;

        debug!(
            "{}: {} input tokens, {} output tokens",
            self.name, response.prompt_tokens, response.completion_tokens
        );
        Ok(response.content)
    }
}

/// Build `CompletionOptions` from the call options.
fn build_options(options: &CallOptions) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(options.temperature),
        max_tokens: Some(options.max_tokens),
        ..Default::default()
    }
}

/// Resolve the chat model, from most-specific to least-specific.
///
/// 1. **Injected model** (`config.chat_model`) — used as-is (tests, custom middleware).
/// 2. **Injected provider** (`config.provider`) — wrapped in [`ProviderChatModel`].
/// 3. **Configured key** (`config.llm_api_key`) — the named provider is built
///    directly from it, never from the environment.
/// 4. **Named provider + model** — built by [`ProviderFactory::create_llm_provider`]
///    (local servers, azure, providers without a configured key).
pub fn resolve_chat_model(config: &PipelineConfig) -> Result<Arc<dyn ChatModel>, ReceiptError> {
    if let Some(ref model) = config.chat_model {
        return Ok(Arc::clone(model));
    }

    if let Some(ref provider) = config.provider {
        return Ok(Arc::new(ProviderChatModel::new(
            config.provider_name.clone(),
            Arc::clone(provider),
        )));
    }

    let provider = match keyed_provider(config)? {
        Some(provider) => provider,
        None => ProviderFactory::create_llm_provider(&config.provider_name, &config.model)
            .map_err(|e| ReceiptError::ProviderNotConfigured {
                provider: config.provider_name.clone(),
                hint: format!("{e}"),
            })?,
    };

    Ok(Arc::new(ProviderChatModel::new(
        config.provider_name.clone(),
        provider,
    )))
}

/// Build a provider from `config.llm_api_key` for the providers that only
/// need a key. `None` when no key is set or the provider needs more than a
/// key (azure endpoints, local servers); the factory handles those.
fn keyed_provider(config: &PipelineConfig) -> Result<Option<Arc<dyn LLMProvider>>, ReceiptError> {
    let Some(key) = config
        .llm_api_key
        .as_deref()
        .map(str::trim)
        .filter(|k| !k.is_empty())
    else {
        return Ok(None);
    };
    let model = config.model.as_str();

    let provider: Arc<dyn LLMProvider> = match config.provider_name.to_lowercase().as_str() {
        "gemini" | "google" => Arc::new(GeminiProvider::new(key).with_model(model)),
        "openai" => Arc::new(OpenAIProvider::new(key).with_model(model)),
        "anthropic" | "claude" => Arc::new(AnthropicProvider::new(key).with_model(model)),
        "openrouter" => Arc::new(OpenRouterProvider::new(key).with_model(model)),
        "mistral" => Arc::new(
            MistralProvider::new(
                key.to_string(),
                model.to_string(),
                "mistral-embed".to_string(),
                None,
            )
            .map_err(|e| ReceiptError::ProviderNotConfigured {
                provider: config.provider_name.clone(),
                hint: format!("{e}"),
            })?,
        ),
        _ => return Ok(None),
    };
    debug!("Built {} provider from the configured API key", config.provider_name);
    Ok(Some(provider))
}

/// Run `call` with per-attempt timeout and exponential backoff.
///
/// `call` is re-invoked for each attempt, so it must rebuild its request
/// (the same deterministic request every time).
pub(crate) async fn with_retries<T, E, F, Fut>(
    stage: Stage,
    service: &str,
    config: &PipelineConfig,
    mut call: F,
) -> Result<T, ReceiptError>
where
    E: Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let start = Instant::now();
    let per_call = Duration::from_secs(config.api_timeout_secs);
    let mut last_err: Option<String> = None;
    let mut timed_out = false;

    for attempt in 0..=config.max_retries {
        if attempt > 0 {
            let backoff = backoff_ms(config.retry_backoff_ms, attempt);
            warn!(
                "{} ({}): retry {}/{} after {}ms",
                service, stage, attempt, config.max_retries, backoff
            );
            sleep(Duration::from_millis(backoff)).await;
        }

        match timeout(per_call, call()).await {
            Ok(Ok(value)) => {
                debug!("{} ({}): ok in {:?}", service, stage, start.elapsed());
                return Ok(value);
            }
            Ok(Err(e)) => {
                let msg = e.to_string();
                warn!("{} ({}): attempt {} failed — {}", service, stage, attempt + 1, msg);
                last_err = Some(msg);
                timed_out = false;
            }
            Err(_) => {
                warn!(
                    "{} ({}): attempt {} timed out after {}s",
                    service,
                    stage,
                    attempt + 1,
                    config.api_timeout_secs
                );
                timed_out = true;
            }
        }
    }

    if timed_out {
        return Err(ReceiptError::ServiceTimeout {
            stage,
            service: service.to_string(),
            secs: config.api_timeout_secs,
        });
    }

    Err(ReceiptError::Service {
        stage,
        service: service.to_string(),
        retries: config.max_retries,
        detail: last_err.unwrap_or_else(|| "Unknown error".to_string()),
    })
}

fn backoff_ms(base: u64, attempt: u32) -> u64 {
    base.saturating_mul(1u64 << (attempt - 1).min(16))
}

//! OCR backend for [`ExtractionMode::OcrText`](crate::config::ExtractionMode).
//!
//! The preprocessed JPEG is uploaded to the OCR.space `parse/image` endpoint
//! as a multipart form; the recognised text of every parsed page is joined
//! with newlines and handed to the text extractor.

use crate::config::PipelineConfig;
use crate::error::{ReceiptError, Stage};
use crate::pipeline::llm::with_retries;
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use tracing::debug;

/// Turns an encoded receipt image into plain text.
#[async_trait]
pub trait TextRecognizer: Send + Sync {
    /// Short service name used in logs and errors.
    fn name(&self) -> &str;

    /// Recognise the text in `jpeg`. Transport failures come back as
    /// [`ReceiptError::Service`] / [`ReceiptError::ServiceTimeout`].
    async fn recognize(&self, jpeg: &[u8], config: &PipelineConfig)
        -> Result<String, ReceiptError>;
}

/// OCR.space HTTP client.
#[derive(Debug, Clone)]
pub struct OcrSpaceClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    language: String,
}

impl OcrSpaceClient {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        language: impl Into<String>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            language: language.into(),
        }
    }

    /// Build a client from the config's endpoint, key and language.
    pub fn from_config(config: &PipelineConfig) -> Result<Self, ReceiptError> {
        let key = config
            .ocr_api_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| ReceiptError::MissingCredential {
                key: "OCR_API_KEY".to_string(),
                hint: "Try: export OCR_API_KEY=...".to_string(),
            })?;
        Ok(Self::new(
            config.ocr_endpoint.clone(),
            key,
            config.ocr_language.clone(),
        ))
    }

    async fn post_once(&self, jpeg: &[u8]) -> Result<String, String> {
        let part = Part::bytes(jpeg.to_vec())
            .file_name("receipt.jpg")
            .mime_str("image/jpeg")
            .map_err(|e| e.to_string())?;
        let form = Form::new()
            .text("apikey", self.api_key.clone())
            .text("language", self.language.clone())
            .text("isOverlayRequired", "false")
            .part("file", part);

        let response = self
            .http
            .post(&self.endpoint)
            .multipart(form)
            .send()
            .await
            .map_err(|e| e.to_string())?;

        let status = response.status();
        let body = response.text().await.map_err(|e| e.to_string())?;
        if !status.is_success() {
            return Err(format!("HTTP {status}: {}", truncate(&body, 200)));
        }
        parse_ocr_response(&body)
    }
}

#[async_trait]
impl TextRecognizer for OcrSpaceClient {
    fn name(&self) -> &str {
        "ocr.space"
    }

    async fn recognize(
        &self,
        jpeg: &[u8],
        config: &PipelineConfig,
    ) -> Result<String, ReceiptError> {
        let text = with_retries(Stage::Extract, self.name(), config, || self.post_once(jpeg)).await?;
        debug!("ocr.space: {} chars recognised", text.len());
        Ok(text)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct OcrResponse {
    #[serde(default)]
    parsed_results: Vec<ParsedResult>,
    #[serde(default)]
    is_errored_on_processing: bool,
    #[serde(default)]
    error_message: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ParsedResult {
    #[serde(default)]
    parsed_text: String,
}

/// Extract the recognised text from an OCR.space JSON body.
fn parse_ocr_response(body: &str) -> Result<String, String> {
    let parsed: OcrResponse =
        serde_json::from_str(body).map_err(|e| format!("unreadable OCR response: {e}"))?;

    if parsed.is_errored_on_processing {
        let detail = match parsed.error_message {
            Some(serde_json::Value::String(s)) => s,
            Some(serde_json::Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str())
                .collect::<Vec<_>>()
                .join("; "),
            _ => "processing failed".to_string(),
        };
        return Err(format!("OCR error: {detail}"));
    }

    Ok(parsed
        .parsed_results
        .iter()
        .map(|r| r.parsed_text.trim_end())
        .collect::<Vec<_>>()
        .join("\n"))
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

//! Item extraction: preprocessed receipt → raw item array.
//!
//! Two input shapes share one instruction and one response contract:
//!
//! - [`ExtractionMode::Vision`] sends the JPEG straight to a multimodal model.
//! - [`ExtractionMode::OcrText`] first runs a [`TextRecognizer`] and sends the
//!   recognised text to the model.

use crate::config::{ExtractionMode, PipelineConfig};
use crate::error::{ReceiptError, Stage};
use crate::output::RawItem;
use crate::pipeline::encode::encode_jpeg;
use crate::pipeline::llm::{with_retries, CallOptions, ChatModel, ModelInput};
use crate::pipeline::ocr::{OcrSpaceClient, TextRecognizer};
use crate::pipeline::response::parse_item_array;
use crate::prompts::{ocr_text_message, EXTRACTION_PROMPT};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Extract raw items from a preprocessed JPEG using the configured mode.
pub async fn extract_items(
    model: &dyn ChatModel,
    jpeg: &[u8],
    config: &PipelineConfig,
) -> Result<Vec<RawItem>, ReceiptError> {
    match config.mode {
        ExtractionMode::Vision => extract_from_image(model, jpeg, config).await,
        ExtractionMode::OcrText => {
            let recognizer = resolve_recognizer(config)?;
            let text = recognizer.recognize(jpeg, config).await?;
            if text.trim().is_empty() {
                warn!("{} found no text on the receipt", recognizer.name());
                return Ok(Vec::new());
            }
            extract_from_text(model, &text, config).await
        }
    }
}

/// Image path: JPEG bytes → multimodal model.
pub async fn extract_from_image(
    model: &dyn ChatModel,
    jpeg: &[u8],
    config: &PipelineConfig,
) -> Result<Vec<RawItem>, ReceiptError> {
    let input = ModelInput::Image(encode_jpeg(jpeg));
    request_items(model, input, config).await
}

/// Text path: OCR output → text model, same instruction as the image path.
pub async fn extract_from_text(
    model: &dyn ChatModel,
    ocr_text: &str,
    config: &PipelineConfig,
) -> Result<Vec<RawItem>, ReceiptError> {
    debug!("Extracting from {} chars of OCR text", ocr_text.len());
    let input = ModelInput::Text(ocr_text_message(ocr_text));
    request_items(model, input, config).await
}

async fn request_items(
    model: &dyn ChatModel,
    input: ModelInput,
    config: &PipelineConfig,
) -> Result<Vec<RawItem>, ReceiptError> {
    let instruction = config
        .extraction_prompt
        .as_deref()
        .unwrap_or(EXTRACTION_PROMPT);
    let options = CallOptions::from_config(config);

    let raw = with_retries(Stage::Extract, model.name(), config, || {
        model.complete(instruction, input.clone(), &options)
    })
    .await?;

    let items = parse_item_array(&raw, Stage::Extract, config.accept_fenced_json)?;
    info!("Extracted {} raw items", items.len());
    Ok(items)
}

fn resolve_recognizer(config: &PipelineConfig) -> Result<Arc<dyn TextRecognizer>, ReceiptError> {
    if let Some(ref recognizer) = config.text_recognizer {
        return Ok(Arc::clone(recognizer));
    }
    Ok(Arc::new(OcrSpaceClient::from_config(config)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::pipeline::llm::ModelCallError;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Returns a fixed answer and records what it was sent.
    struct Scripted {
        answer: String,
        seen: Mutex<Vec<(bool, Option<String>)>>,
    }

    impl Scripted {
        fn new(answer: &str) -> Self {
            Self {
                answer: answer.to_string(),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ChatModel for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn complete(
            &self,
            _instruction: &str,
            input: ModelInput,
            _options: &CallOptions,
        ) -> Result<String, ModelCallError> {
            self.seen
                .lock()
                .unwrap()
                .push((input.is_image(), input.as_text().map(str::to_string)));
            Ok(self.answer.clone())
        }
    }

    struct FixedText(&'static str);

    #[async_trait]
    impl TextRecognizer for FixedText {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn recognize(
            &self,
            _jpeg: &[u8],
            _config: &PipelineConfig,
        ) -> Result<String, ReceiptError> {
            Ok(self.0.to_string())
        }
    }

    #[tokio::test]
    async fn vision_mode_sends_image() {
        let model = Scripted::new(r#"[{"name":"Milk","price":3.49,"quantity":1,"unit":""}]"#);
        let config = PipelineConfig::default();
        let items = extract_items(&model, b"jpeg", &config).await.unwrap();
        assert_eq!(items.len(), 1);
        let seen = model.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].0);
    }

    #[tokio::test]
    async fn ocr_mode_sends_recognised_text() {
        let model = Scripted::new("[]");
        let config = PipelineConfig::builder()
            .mode(ExtractionMode::OcrText)
            .text_recognizer(Arc::new(FixedText("MILK 3.49")))
            .build()
            .unwrap();
        let items = extract_items(&model, b"jpeg", &config).await.unwrap();
        assert!(items.is_empty());
        let seen = model.seen.lock().unwrap();
        assert!(!seen[0].0);
        assert!(seen[0].1.as_deref().unwrap().contains("MILK 3.49"));
    }

    #[tokio::test]
    async fn blank_ocr_text_skips_the_model() {
        let model = Scripted::new("not json");
        let config = PipelineConfig::builder()
            .mode(ExtractionMode::OcrText)
            .text_recognizer(Arc::new(FixedText("  \n")))
            .build()
            .unwrap();
        assert!(extract_items(&model, b"jpeg", &config)
            .await
            .unwrap()
            .is_empty());
        assert!(model.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn non_array_answer_is_contract_violation() {
        let model = Scripted::new("I could not read this receipt.");
        let err = extract_from_image(&model, b"jpeg", &PipelineConfig::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ContractViolation);
        assert_eq!(err.stage(), Some(Stage::Extract));
        assert_eq!(err.raw_response(), Some("I could not read this receipt."));
    }
}

//! Item normalization: raw items → canonical [`ReceiptItem`]s.
//!
//! An optional model pass corrects spelling and OCR damage the rules cannot
//! know about (`lvovskiy` vs `lvovsky`). Its answer must be a bare JSON array
//! of the same length as the input; anything else fails the stage, and the
//! unnormalized input is never used as a fallback. The deterministic rules
//! in [`crate::pipeline::rules`] then run on whatever came out.

use crate::config::PipelineConfig;
use crate::error::{ReceiptError, Stage};
use crate::output::{RawItem, ReceiptItem};
use crate::pipeline::llm::{with_retries, CallOptions, ChatModel, ModelInput};
use crate::pipeline::response::parse_item_array;
use crate::pipeline::rules::normalize_all;
use crate::prompts::NORMALIZATION_PROMPT;
use tracing::{debug, info};

/// Half a cent: `"3,49"` and `3.49` are the same price.
const PRICE_TOLERANCE: f64 = 0.005;

/// Normalize `raw` items; runs the model pass first when enabled.
///
/// Returns the items and whether the model pass ran.
pub async fn normalize_items(
    model: &dyn ChatModel,
    raw: &[RawItem],
    config: &PipelineConfig,
) -> Result<(Vec<ReceiptItem>, bool), ReceiptError> {
    if raw.is_empty() {
        debug!("No items to normalize");
        return Ok((Vec::new(), false));
    }

    if config.model_normalization {
        let corrected = model_pass(model, raw, config).await?;
        let items = apply_rules(&corrected)?;
        Ok((items, true))
    } else {
        Ok((apply_rules(raw)?, false))
    }
}

/// Send the raw array to the model and read back the corrected array.
async fn model_pass(
    model: &dyn ChatModel,
    raw: &[RawItem],
    config: &PipelineConfig,
) -> Result<Vec<RawItem>, ReceiptError> {
    let payload = serde_json::to_string(raw)
        .map_err(|e| ReceiptError::Internal(format!("serialising raw items: {e}")))?;
    let instruction = config
        .normalization_prompt
        .as_deref()
        .unwrap_or(NORMALIZATION_PROMPT);
    let options = CallOptions::from_config(config);

    let answer = with_retries(Stage::Normalize, model.name(), config, || {
        model.complete(instruction, ModelInput::Text(payload.clone()), &options)
    })
    .await?;

    let corrected = parse_item_array(&answer, Stage::Normalize, config.accept_fenced_json)?;
    if corrected.len() != raw.len() {
        return Err(ReceiptError::ContractViolation {
            stage: Stage::Normalize,
            reason: format!(
                "expected {} items back, got {}",
                raw.len(),
                corrected.len()
            ),
            raw: answer,
        });
    }

    // Prices are never corrected, so they pin each item to its position.
    for (index, (before, after)) in raw.iter().zip(&corrected).enumerate() {
        if let (Some(was), Some(now)) = (before.price.to_f64(), after.price.to_f64()) {
            if (was - now).abs() > PRICE_TOLERANCE {
                return Err(ReceiptError::ContractViolation {
                    stage: Stage::Normalize,
                    reason: format!(
                        "item {index}: price changed from {} to {} (items reordered or replaced)",
                        before.price.as_written(),
                        after.price.as_written()
                    ),
                    raw: answer,
                });
            }
        }
    }

    info!("Model normalization returned {} items", corrected.len());
    Ok(corrected)
}

/// Run the deterministic rules; a bad item fails the whole stage.
pub fn apply_rules(items: &[RawItem]) -> Result<Vec<ReceiptItem>, ReceiptError> {
    normalize_all(items).map_err(|(index, violation)| {
        let raw = serde_json::to_string(&items[index]).unwrap_or_default();
        ReceiptError::ContractViolation {
            stage: Stage::Normalize,
            reason: format!("item {index}: {violation}"),
            raw,
        }
    })
}

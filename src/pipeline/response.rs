//! Model response contract: the answer must be a bare JSON array of items.
//!
//! Anything else (prose around the array, an object wrapper, truncated JSON)
//! is a [`ReceiptError::ContractViolation`] that keeps the raw text. There is
//! no best-effort repair; the single exception is one outer ```` ```json ````
//! fence, tolerated only when `accept_fenced_json` is on.

use crate::error::{ReceiptError, Stage};
use crate::output::RawItem;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

static RE_OUTER_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```(?:json|JSON)?[ \t]*\r?\n(.*?)\r?\n?```$").unwrap());

/// Parse a model answer into raw items.
pub fn parse_item_array(
    raw: &str,
    stage: Stage,
    accept_fenced: bool,
) -> Result<Vec<RawItem>, ReceiptError> {
    let violation = |reason: String| ReceiptError::ContractViolation {
        stage,
        reason,
        raw: raw.to_string(),
    };

    let trimmed = raw.trim();
    let body = if accept_fenced {
        strip_outer_fence(trimmed)
    } else {
        trimmed
    };

    let value: Value = serde_json::from_str(body)
        .map_err(|e| violation(format!("response is not valid JSON ({e})")))?;

    let elements = match value {
        Value::Array(elements) => elements,
        other => {
            return Err(violation(format!(
                "expected a JSON array, got {}",
                json_type_name(&other)
            )))
        }
    };

    elements
        .into_iter()
        .enumerate()
        .map(|(i, element)| {
            serde_json::from_value::<RawItem>(element)
                .map_err(|e| violation(format!("item {i} does not match the item shape ({e})")))
        })
        .collect()
}

fn strip_outer_fence(s: &str) -> &str {
    match RE_OUTER_FENCE.captures(s).and_then(|c| c.get(1)) {
        Some(m) => m.as_str().trim(),
        None => s,
    }
}

fn json_type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

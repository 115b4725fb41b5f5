//! Data types flowing out of the pipeline.
//!
//! [`RawItem`] is what the extractor model hands back: loosely typed, prices
//! sometimes as strings, units in whatever spelling the receipt used.
//! [`ReceiptItem`] is the canonical record after normalization.

use crate::units::Unit;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::path::PathBuf;

/// One normalized receipt line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceiptItem {
    /// Lowercase product name, free of quantity/unit tokens and trailing codes.
    pub name: String,
    /// Total line price. Never negative.
    #[serde(serialize_with = "serialize_number")]
    pub price: f64,
    /// Measured amount when `unit` is set, otherwise the item count.
    #[serde(serialize_with = "serialize_number")]
    pub quantity: f64,
    /// Canonical unit, or `""` for discrete items.
    #[serde(default)]
    pub unit: Unit,
}

impl ReceiptItem {
    pub fn new(name: impl Into<String>, price: f64, quantity: f64, unit: Unit) -> Self {
        Self {
            name: name.into(),
            price,
            quantity,
            unit,
        }
    }
}

/// A line item as returned by the extractor (or any loosely shaped input).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawItem {
    #[serde(default)]
    pub name: String,
    pub price: LooseNumber,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantity: Option<LooseNumber>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

impl RawItem {
    pub fn new(name: impl Into<String>, price: f64, quantity: Option<f64>, unit: &str) -> Self {
        Self {
            name: name.into(),
            price: LooseNumber::Number(price),
            quantity: quantity.map(LooseNumber::Number),
            unit: Some(unit.to_string()),
        }
    }
}

impl From<ReceiptItem> for RawItem {
    fn from(item: ReceiptItem) -> Self {
        Self {
            name: item.name,
            price: LooseNumber::Number(item.price),
            quantity: Some(LooseNumber::Number(item.quantity)),
            unit: Some(item.unit.as_str().to_string()),
        }
    }
}

/// A number the model may have written as a JSON number or as text (`"$3.49"`).
#[derive(Debug, Clone, PartialEq)]
pub enum LooseNumber {
    Number(f64),
    Text(String),
}

impl LooseNumber {
    /// Read the value as a finite `f64`.
    ///
    /// Text accepts a leading currency sign and either `,` or `.` as the
    /// decimal separator (`"3,49"` → 3.49); with both present `,` is a
    /// thousands separator (`"1,299.00"` → 1299.0).
    pub fn to_f64(&self) -> Option<f64> {
        let v = match self {
            LooseNumber::Number(n) => *n,
            LooseNumber::Text(s) => {
                let t = s.trim().trim_start_matches(['$', '€', '£']).trim();
                let t = if t.contains('.') {
                    t.replace(',', "")
                } else {
                    t.replace(',', ".")
                };
                t.parse::<f64>().ok()?
            }
        };
        v.is_finite().then_some(v)
    }

    /// The value as written, for error messages.
    pub fn as_written(&self) -> String {
        match self {
            LooseNumber::Number(n) => n.to_string(),
            LooseNumber::Text(s) => s.clone(),
        }
    }
}

impl Serialize for LooseNumber {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            LooseNumber::Number(n) => serialize_number(n, serializer),
            LooseNumber::Text(s) => serializer.serialize_str(s),
        }
    }
}

impl<'de> Deserialize<'de> for LooseNumber {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Number(f64),
            Text(String),
        }
        Ok(match Repr::deserialize(deserializer)? {
            Repr::Number(n) => LooseNumber::Number(n),
            Repr::Text(s) => LooseNumber::Text(s),
        })
    }
}

/// Write whole numbers as JSON integers (`440`, not `440.0`).
pub fn serialize_number<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 9.0e15 {
        serializer.serialize_i64(*value as i64)
    } else {
        serializer.serialize_f64(*value)
    }
}

/// Result of one successful pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiptOutput {
    /// Normalized items, in receipt line order.
    pub items: Vec<ReceiptItem>,
    /// Items exactly as the extractor returned them.
    pub raw_items: Vec<RawItem>,
    pub stats: RunStats,
}

/// Timing and artifact details for one run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunStats {
    /// Where the preprocessed JPEG was written (empty for in-memory runs).
    pub preprocessed_path: PathBuf,
    /// Size of the preprocessed JPEG in bytes.
    pub preprocessed_bytes: u64,
    /// Whether the JPEG is under the 1 MB soft target.
    pub under_soft_target: bool,
    /// Whether the model normalization pass ran before the rules.
    pub model_normalized: bool,
    pub raw_item_count: usize,
    pub item_count: usize,
    pub preprocess_ms: u64,
    pub extract_ms: u64,
    pub normalize_ms: u64,
    pub total_ms: u64,
}

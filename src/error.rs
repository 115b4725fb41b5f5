//! Error types for the edgequake-receipt2json library.
//!
//! Two error types reflect two levels of failure:
//!
//! * [`ReceiptError`] — **Fatal** for the run: the receipt cannot be turned
//!   into items (missing API key, unreadable photo, model unreachable, model
//!   answered outside the JSON-array contract). Returned as
//!   `Err(ReceiptError)` from every `run*` entry point.
//!
//! * [`ItemViolation`]: a single line item broke the item schema (unknown
//!   unit, negative price). The normalizer lifts it into a
//!   [`ReceiptError::ContractViolation`] naming the item index, so a bad item
//!   still fails the run but the message points at the offending line.
//!
//! Every fatal error maps to one [`ErrorKind`], which the CLI turns into an
//! exit code.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Pipeline stage an error (or progress event) belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Configuration and credential checks before any I/O.
    Configure,
    /// Resize / grayscale / JPEG re-encode.
    Preprocess,
    /// OCR (text mode) and item extraction.
    Extract,
    /// Model normalization plus deterministic rules.
    Normalize,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Configure => "configure",
            Stage::Preprocess => "preprocess",
            Stage::Extract => "extract",
            Stage::Normalize => "normalize",
        };
        f.write_str(s)
    }
}

/// Coarse error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Required credential or setting missing/invalid.
    Configuration,
    /// Local file missing, unreadable, undecodable or unwritable.
    Io,
    /// OCR or model service failed at the transport level.
    Service,
    /// A model response did not honour the bare JSON array contract.
    ContractViolation,
    /// Bug or runtime failure inside the library.
    Internal,
}

/// All fatal errors returned by the edgequake-receipt2json library.
#[derive(Debug, Error)]
pub enum ReceiptError {
    // ── Configuration errors ──────────────────────────────────────────────
    /// A required credential or setting is absent.
    #[error("Missing required setting '{key}'.\n{hint}")]
    MissingCredential { key: String, hint: String },

    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The LLM provider could not be constructed.
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Input image was not found at the given path.
    #[error("Image file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The file was read but is not a decodable image.
    #[error("Could not decode image '{path}': {detail}")]
    ImageDecode { path: PathBuf, detail: String },

    /// Re-encoding the preprocessed image failed.
    #[error("Could not encode preprocessed image: {detail}")]
    ImageEncode { detail: String },

    /// Could not create or write an output artifact.
    #[error("Failed to write '{path}': {source}")]
    ArtifactWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Service errors ────────────────────────────────────────────────────
    /// The OCR or model service call failed after all retries.
    #[error("{service} call failed during {stage} after {retries} retries: {detail}")]
    Service {
        stage: Stage,
        service: String,
        retries: u32,
        detail: String,
    },

    /// The OCR or model service did not answer in time (after all retries).
    #[error("{service} call timed out after {secs}s during {stage}")]
    ServiceTimeout {
        stage: Stage,
        service: String,
        secs: u64,
    },

    // ── Contract errors ───────────────────────────────────────────────────
    /// The model answered, but not with the agreed bare JSON array.
    ///
    /// `raw` keeps the offending response verbatim for diagnosis.
    #[error("Model response violated the JSON array contract during {stage}: {reason}\nRaw response: {raw}")]
    ContractViolation {
        stage: Stage,
        reason: String,
        raw: String,
    },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ReceiptError {
    /// Classify the error into the four-way taxonomy (plus `Internal`).
    pub fn kind(&self) -> ErrorKind {
        match self {
            ReceiptError::MissingCredential { .. }
            | ReceiptError::InvalidConfig(_)
            | ReceiptError::ProviderNotConfigured { .. } => ErrorKind::Configuration,
            ReceiptError::FileNotFound { .. }
            | ReceiptError::PermissionDenied { .. }
            | ReceiptError::ImageDecode { .. }
            | ReceiptError::ImageEncode { .. }
            | ReceiptError::ArtifactWrite { .. } => ErrorKind::Io,
            ReceiptError::Service { .. } | ReceiptError::ServiceTimeout { .. } => {
                ErrorKind::Service
            }
            ReceiptError::ContractViolation { .. } => ErrorKind::ContractViolation,
            ReceiptError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// The stage that failed, when the error carries one.
    ///
    /// Configuration errors always belong to [`Stage::Configure`] and local
    /// file errors to [`Stage::Preprocess`].
    pub fn stage(&self) -> Option<Stage> {
        match self {
            ReceiptError::Service { stage, .. }
            | ReceiptError::ServiceTimeout { stage, .. }
            | ReceiptError::ContractViolation { stage, .. } => Some(*stage),
            _ => match self.kind() {
                ErrorKind::Configuration => Some(Stage::Configure),
                ErrorKind::Io => Some(Stage::Preprocess),
                _ => None,
            },
        }
    }

    /// The raw model response attached to a contract violation.
    pub fn raw_response(&self) -> Option<&str> {
        match self {
            ReceiptError::ContractViolation { raw, .. } => Some(raw),
            _ => None,
        }
    }
}

/// A single line item that does not fit the item schema.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
pub enum ItemViolation {
    /// The `unit` value is not a known unit or synonym.
    #[error("unknown unit '{0}'")]
    UnknownUnit(String),

    /// The `price` value could not be read as a number.
    #[error("price '{0}' is not a number")]
    InvalidPrice(String),

    /// Line prices are totals and must not be negative.
    #[error("price {0} is negative")]
    NegativePrice(f64),

    /// The `quantity` value could not be read as a number.
    #[error("quantity '{0}' is not a number")]
    InvalidQuantity(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contract_violation_keeps_raw_response() {
        let e = ReceiptError::ContractViolation {
            stage: Stage::Extract,
            reason: "expected a JSON array, got an object".into(),
            raw: "{\"items\": []}".into(),
        };
        assert_eq!(e.kind(), ErrorKind::ContractViolation);
        assert_eq!(e.stage(), Some(Stage::Extract));
        assert_eq!(e.raw_response(), Some("{\"items\": []}"));
        assert!(e.to_string().contains("{\"items\": []}"));
    }

    #[test]
    fn service_display_names_stage_and_service() {
        let e = ReceiptError::Service {
            stage: Stage::Normalize,
            service: "gemini".into(),
            retries: 3,
            detail: "HTTP 503".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("gemini"), "got: {msg}");
        assert!(msg.contains("normalize"), "got: {msg}");
        assert_eq!(e.kind(), ErrorKind::Service);
    }

    #[test]
    fn missing_credential_is_configuration() {
        let e = ReceiptError::MissingCredential {
            key: "GEMINI_API_KEY".into(),
            hint: "export GEMINI_API_KEY=...".into(),
        };
        assert_eq!(e.kind(), ErrorKind::Configuration);
        assert_eq!(e.stage(), Some(Stage::Configure));
        assert!(e.raw_response().is_none());
    }

    #[test]
    fn file_not_found_is_io_in_preprocess() {
        let e = ReceiptError::FileNotFound {
            path: PathBuf::from("/nope.jpg"),
        };
        assert_eq!(e.kind(), ErrorKind::Io);
        assert_eq!(e.stage(), Some(Stage::Preprocess));
    }

    #[test]
    fn timeout_display() {
        let e = ReceiptError::ServiceTimeout {
            stage: Stage::Extract,
            service: "ocr.space".into(),
            secs: 30,
        };
        assert!(e.to_string().contains("30s"));
        assert_eq!(e.kind(), ErrorKind::Service);
    }

    #[test]
    fn item_violation_display() {
        assert_eq!(
            ItemViolation::UnknownUnit("gal".into()).to_string(),
            "unknown unit 'gal'"
        );
        assert!(ItemViolation::NegativePrice(-1.5).to_string().contains("-1.5"));
    }
}

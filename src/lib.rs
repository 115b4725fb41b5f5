//! # edgequake-receipt2json
//!
//! Turn photos of retail receipts into structured line items
//! (`name`, `price`, `quantity`, `unit`) using hosted vision and language models.
//!
//! ## Why this crate?
//!
//! Receipt text is small, skewed and full of abbreviations; classic OCR gets
//! the characters but not the structure (`BREAD LVOVSKIY 44DGR 3.69`). This
//! crate lets a multimodal model read the photo as a human would, then holds
//! the answer to a strict contract: a bare JSON array, canonical units, and
//! amounts moved out of product names by deterministic rules.
//!
//! ## Pipeline Overview
//!
//! ```text
//! receipt photo
//!  │
//!  ├─ 1. Preprocess  resize ≤ 1800 px, grayscale, JPEG (spawn_blocking)
//!  ├─ 2. Extract     vision model (or OCR.space + text model) → JSON array
//!  ├─ 3. Normalize   optional model correction pass + deterministic rules
//!  └─ 4. Output      [{"name","price","quantity","unit"}, …] + run stats
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_receipt2json::{run, PipelineConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // GEMINI_API_KEY (or the key of RECEIPT_LLM_PROVIDER) must be set
//!     let config = PipelineConfig::from_env()?;
//!     let output = run("uploads/test1.jpg", &config).await?;
//!     println!("{}", serde_json::to_string_pretty(&output.items)?);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `receipt2json` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! edgequake-receipt2json = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod run;
pub mod stream;
pub mod units;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ExtractionMode, PipelineConfig, PipelineConfigBuilder};
pub use error::{ErrorKind, ItemViolation, ReceiptError, Stage};
pub use output::{LooseNumber, RawItem, ReceiptItem, ReceiptOutput, RunStats};
pub use pipeline::llm::{CallOptions, ChatModel, ModelCallError, ModelInput, ProviderChatModel};
pub use pipeline::ocr::{OcrSpaceClient, TextRecognizer};
pub use pipeline::rules::normalize_item;
pub use progress::{NoopProgressCallback, PipelineProgressCallback, ProgressCallback};
pub use run::{run, run_batch, run_bytes, run_sync, run_to_file, RunState};
pub use stream::{run_stream, ReceiptResult, ReceiptStream};
pub use units::Unit;

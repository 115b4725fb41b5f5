//! Pipeline stages for receipt-to-JSON conversion.
//!
//! Each submodule implements exactly one transformation step, so each can be
//! tested on its own and the model or OCR backend swapped without touching
//! the other stages.
//!
//! ## Data Flow
//!
//! ```text
//! preprocess ──▶ [ocr] ──▶ extract ──▶ normalize ──▶ rules
//!  (resize,     (text     (model →    (model       (deterministic
//!   grayscale,   mode)     JSON        correction)   cleanup)
//!   JPEG)                  array)
//! ```
//!
//! 1. [`preprocess`] — bound the photo's size; runs in `spawn_blocking`
//! 2. [`ocr`]        — OCR.space text recognition, text mode only
//! 3. [`encode`]     — base64-wrap the JPEG for the multimodal request body
//! 4. [`extract`]    — image or text → raw item array
//! 5. [`response`]   — enforce the bare JSON array contract on model answers
//! 6. [`normalize`]  — optional model correction pass
//! 7. [`rules`]      — deterministic normalization, always applied
//!
//! [`llm`] holds the chat seam and the retry loop shared by every network call.

pub mod encode;
pub mod extract;
pub mod llm;
pub mod normalize;
pub mod ocr;
pub mod preprocess;
pub mod response;
pub mod rules;

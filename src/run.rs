//! Eager (whole-receipt) entry points.
//!
//! Every run walks the same state machine:
//!
//! ```text
//! START ──▶ PREPROCESSED ──▶ EXTRACTED ──▶ NORMALIZED ──▶ DONE
//!   │             │               │              │
//!   └─────────────┴───────────────┴──────────────┴──▶ FAILED
//! ```
//!
//! `START` validates credentials before touching the file system or the
//! network. A failure in any stage ends the run with an error naming that
//! stage; partial item lists are never returned.
//!
//! Use [`crate::stream::run_stream`] to process many receipts and receive
//! results as they finish.

use crate::config::PipelineConfig;
use crate::error::{ReceiptError, Stage};
use crate::output::{ReceiptOutput, RunStats};
use crate::pipeline::extract::extract_items;
use crate::pipeline::llm::resolve_chat_model;
use crate::pipeline::normalize::normalize_items;
use crate::pipeline::preprocess::{preprocess_bytes, preprocess_image, PreprocessedImage};
use futures::stream::{self, StreamExt};
use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Where a run currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Start,
    Preprocessed,
    Extracted,
    Normalized,
    Done,
    Failed,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunState::Start => "START",
            RunState::Preprocessed => "PREPROCESSED",
            RunState::Extracted => "EXTRACTED",
            RunState::Normalized => "NORMALIZED",
            RunState::Done => "DONE",
            RunState::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// Convert a receipt photo into normalized line items.
///
/// This is the primary entry point for the library.
///
/// # Errors
/// Every failure is fatal for the run:
/// - missing credential or bad setting (configuration)
/// - missing/unreadable/undecodable photo, unwritable artifact (I/O)
/// - OCR or model unreachable after retries (service)
/// - model answer that is not a bare JSON array, or a bad item (contract violation)
pub async fn run(
    image_path: impl AsRef<Path>,
    config: &PipelineConfig,
) -> Result<ReceiptOutput, ReceiptError> {
    let path = image_path.as_ref();
    info!("Starting receipt run: {}", path.display());
    let processed_dir = config.processed_dir();

    run_with(path, config, || {
        preprocess_image(
            path,
            &processed_dir,
            config.max_dimension,
            config.jpeg_quality,
        )
    })
    .await
}

/// Convert an in-memory receipt image. No preprocessed artifact is written.
pub async fn run_bytes(
    bytes: &[u8],
    config: &PipelineConfig,
) -> Result<ReceiptOutput, ReceiptError> {
    info!("Starting receipt run: {} bytes in memory", bytes.len());
    let owned = bytes.to_vec();

    run_with(Path::new("<memory>"), config, move || {
        preprocess_bytes(owned, config.max_dimension, config.jpeg_quality)
    })
    .await
}

/// Synchronous wrapper around [`run`].
///
/// Creates a temporary tokio runtime internally.
pub fn run_sync(
    image_path: impl AsRef<Path>,
    config: &PipelineConfig,
) -> Result<ReceiptOutput, ReceiptError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| ReceiptError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(run(image_path, config))
}

/// Run the pipeline and write the item array as pretty JSON to `output_path`.
///
/// Uses atomic write (temp file + rename) to prevent partial files.
pub async fn run_to_file(
    image_path: impl AsRef<Path>,
    output_path: impl AsRef<Path>,
    config: &PipelineConfig,
) -> Result<ReceiptOutput, ReceiptError> {
    let output = run(image_path, config).await?;
    write_items_json(output_path.as_ref(), &output).await?;
    Ok(output)
}

/// Run many receipts with at most `config.concurrency` in flight.
///
/// Results come back in input order; one receipt failing does not affect
/// the others.
pub async fn run_batch<P: AsRef<Path>>(
    image_paths: &[P],
    config: &PipelineConfig,
) -> Vec<Result<ReceiptOutput, ReceiptError>> {
    info!(
        "Starting batch of {} receipts (concurrency {})",
        image_paths.len(),
        config.concurrency
    );
    stream::iter(image_paths.iter().map(|p| run(p.as_ref(), config)))
        .buffered(config.concurrency.max(1))
        .collect()
        .await
}

// ── Internal helpers ─────────────────────────────────────────────────────

async fn run_with<F, Fut>(
    input: &Path,
    config: &PipelineConfig,
    preprocess: F,
) -> Result<ReceiptOutput, ReceiptError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<PreprocessedImage, ReceiptError>>,
{
    let total_start = Instant::now();
    let mut state = RunState::Start;

    // ── START: configuration is checked before any I/O ───────────────────
    let model = config
        .validate_credentials()
        .and_then(|_| resolve_chat_model(config))
        .inspect_err(|e| {
            fail(&mut state, Stage::Configure, e, config);
        })?;
    if let Some(ref cb) = config.progress_callback {
        cb.on_run_start(input);
    }

    // ── PREPROCESSED ─────────────────────────────────────────────────────
    let (pre, preprocess_ms) = run_stage(Stage::Preprocess, &mut state, config, preprocess()).await?;
    advance(&mut state, RunState::Preprocessed);

    // ── EXTRACTED ────────────────────────────────────────────────────────
    let (raw_items, extract_ms) = run_stage(
        Stage::Extract,
        &mut state,
        config,
        extract_items(model.as_ref(), &pre.jpeg, config),
    )
    .await?;
    advance(&mut state, RunState::Extracted);

    // ── NORMALIZED ───────────────────────────────────────────────────────
    let ((items, model_normalized), normalize_ms) = run_stage(
        Stage::Normalize,
        &mut state,
        config,
        normalize_items(model.as_ref(), &raw_items, config),
    )
    .await?;
    advance(&mut state, RunState::Normalized);

    // ── DONE ─────────────────────────────────────────────────────────────
    let stats = RunStats {
        preprocessed_bytes: pre.size_bytes(),
        under_soft_target: pre.under_soft_target,
        preprocessed_path: pre.path,
        model_normalized,
        raw_item_count: raw_items.len(),
        item_count: items.len(),
        preprocess_ms,
        extract_ms,
        normalize_ms,
        total_ms: total_start.elapsed().as_millis() as u64,
    };
    advance(&mut state, RunState::Done);

    info!(
        "Receipt run complete: {} items in {}ms",
        stats.item_count, stats.total_ms
    );
    if let Some(ref cb) = config.progress_callback {
        cb.on_run_complete(items.len());
    }

    Ok(ReceiptOutput {
        items,
        raw_items,
        stats,
    })
}

/// Await one stage, timing it and reporting progress.
async fn run_stage<T, Fut>(
    stage: Stage,
    state: &mut RunState,
    config: &PipelineConfig,
    fut: Fut,
) -> Result<(T, u64), ReceiptError>
where
    Fut: Future<Output = Result<T, ReceiptError>>,
{
    if let Some(ref cb) = config.progress_callback {
        cb.on_stage_start(stage);
    }
    let start = Instant::now();

    match fut.await {
        Ok(value) => {
            let elapsed_ms = start.elapsed().as_millis() as u64;
            debug!("Stage {} finished in {}ms", stage, elapsed_ms);
            if let Some(ref cb) = config.progress_callback {
                cb.on_stage_complete(stage, elapsed_ms);
            }
            Ok((value, elapsed_ms))
        }
        Err(e) => {
            fail(state, stage, &e, config);
            Err(e)
        }
    }
}

fn advance(state: &mut RunState, next: RunState) {
    debug!("{} → {}", state, next);
    *state = next;
}

fn fail(state: &mut RunState, stage: Stage, error: &ReceiptError, config: &PipelineConfig) {
    warn!("Run failed in {} stage ({} → FAILED): {}", stage, state, error);
    *state = RunState::Failed;
    if let Some(ref cb) = config.progress_callback {
        cb.on_stage_error(stage, &error.to_string());
    }
}

async fn write_items_json(path: &Path, output: &ReceiptOutput) -> Result<(), ReceiptError> {
    let write_err = |source: std::io::Error| ReceiptError::ArtifactWrite {
        path: path.to_path_buf(),
        source,
    };

    let mut json = serde_json::to_string_pretty(&output.items)
        .map_err(|e| ReceiptError::Internal(format!("serialising items: {e}")))?;
    json.push('\n');

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
    }

    let tmp_path = tmp_sibling(path);
    tokio::fs::write(&tmp_path, json).await.map_err(write_err)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(write_err)?;
    Ok(())
}

fn tmp_sibling(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "items.json".into());
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_names_match_the_diagram() {
        assert_eq!(RunState::Start.to_string(), "START");
        assert_eq!(RunState::Normalized.to_string(), "NORMALIZED");
        assert_eq!(RunState::Failed.to_string(), "FAILED");
    }

    #[test]
    fn advance_moves_state() {
        let mut state = RunState::Start;
        advance(&mut state, RunState::Preprocessed);
        assert_eq!(state, RunState::Preprocessed);
    }

    #[test]
    fn tmp_sibling_keeps_directory() {
        assert_eq!(
            tmp_sibling(Path::new("out/items.json")),
            PathBuf::from("out/items.json.tmp")
        );
    }

    #[tokio::test]
    async fn config_failure_happens_before_io() {
        let config = PipelineConfig::default();
        let err = run("/definitely/not/here.jpg", &config).await.unwrap_err();
        assert_eq!(err.stage(), Some(Stage::Configure));
    }
}

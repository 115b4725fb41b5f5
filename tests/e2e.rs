//! End-to-end tests against live services.
//!
//! These tests read real receipt photos from `./uploads/` and call the hosted
//! model (and OCR.space in ocr mode). They are gated behind the `E2E_ENABLED`
//! environment variable so they do not run in CI unless explicitly requested.
//!
//! Run with:
//!   E2E_ENABLED=1 GEMINI_API_KEY=... cargo test --test e2e -- --nocapture

use edgequake_receipt2json::{run, run_to_file, ExtractionMode, PipelineConfig, ReceiptItem};
use std::path::PathBuf;

// ── Test helpers ─────────────────────────────────────────────────────────────

fn uploads_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("uploads")
}

/// Skip this test if E2E_ENABLED is not set *or* no photo at `path`.
macro_rules! e2e_skip_unless_ready {
    ($path:expr) => {{
        if std::env::var("E2E_ENABLED").is_err() {
            println!("SKIP — set E2E_ENABLED=1 to run e2e tests");
            return;
        }
        let p: PathBuf = $path;
        if !p.exists() {
            println!("SKIP — receipt photo not found: {}", p.display());
            return;
        }
        p
    }};
}

fn live_config() -> PipelineConfig {
    PipelineConfig::from_env().expect("valid environment configuration")
}

/// Every item must honour the output contract.
fn assert_items_well_formed(items: &[ReceiptItem], context: &str) {
    for (i, item) in items.iter().enumerate() {
        assert_eq!(
            item.name,
            item.name.to_lowercase(),
            "[{context}] item {i} name is not lowercase"
        );
        assert!(item.price >= 0.0, "[{context}] item {i} has negative price");
        assert!(item.quantity > 0.0, "[{context}] item {i} has quantity ≤ 0");
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_vision_receipt() {
    let photo = e2e_skip_unless_ready!(uploads_dir().join("test1.jpg"));
    let config = live_config();

    let output = run(&photo, &config).await.expect("vision run");
    println!("{}", serde_json::to_string_pretty(&output.items).unwrap());
    println!("stats: {:?}", output.stats);

    assert!(!output.items.is_empty(), "expected at least one item");
    assert_items_well_formed(&output.items, "vision");
    assert!(output.stats.preprocessed_path.exists());
}

#[tokio::test]
async fn test_ocr_receipt() {
    let photo = e2e_skip_unless_ready!(uploads_dir().join("test1.jpg"));
    if std::env::var("OCR_API_KEY").is_err() {
        println!("SKIP — set OCR_API_KEY to run the ocr path");
        return;
    }
    let mut config = live_config();
    config.mode = ExtractionMode::OcrText;

    let output = run(&photo, &config).await.expect("ocr run");
    println!("{}", serde_json::to_string_pretty(&output.items).unwrap());
    assert_items_well_formed(&output.items, "ocr");
}

#[tokio::test]
async fn test_run_to_file() {
    let photo = e2e_skip_unless_ready!(uploads_dir().join("test1.jpg"));
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("test1.json");

    let output = run_to_file(&photo, &out, &live_config())
        .await
        .expect("run to file");

    let written: Vec<ReceiptItem> =
        serde_json::from_str(&std::fs::read_to_string(&out).unwrap()).unwrap();
    assert_eq!(written, output.items);
}

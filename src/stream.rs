//! Streaming API: emit receipt results as they complete.
//!
//! Unlike [`crate::run::run_batch`], which returns only after every receipt
//! finished and keeps input order, [`run_stream`] yields each result as soon
//! as its run ends. Up to `config.concurrency` receipts are in flight; results
//! may arrive out of order, so each carries its input index.

use crate::config::PipelineConfig;
use crate::error::ReceiptError;
use crate::output::ReceiptOutput;
use crate::run::run;
use futures::stream::{self, StreamExt};
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use tokio_stream::Stream;
use tracing::info;

/// One finished receipt run.
#[derive(Debug)]
pub struct ReceiptResult {
    /// Position of the image in the input list.
    pub index: usize,
    pub path: PathBuf,
    pub result: Result<ReceiptOutput, ReceiptError>,
}

/// A boxed stream of receipt results.
pub type ReceiptStream = Pin<Box<dyn Stream<Item = ReceiptResult> + Send>>;

/// Process many receipts, streaming results in completion order.
///
/// # Example
/// ```rust,no_run
/// use edgequake_receipt2json::{run_stream, PipelineConfig};
/// use futures::StreamExt;
/// use std::sync::Arc;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = Arc::new(PipelineConfig::from_env()?);
/// let paths = vec!["uploads/a.jpg".into(), "uploads/b.jpg".into()];
/// let mut results = run_stream(paths, config);
/// while let Some(r) = results.next().await {
///     match r.result {
///         Ok(out) => println!("{}: {} items", r.path.display(), out.items.len()),
///         Err(e) => eprintln!("{}: {e}", r.path.display()),
///     }
/// }
/// # Ok(())
/// # }
/// ```
pub fn run_stream(image_paths: Vec<PathBuf>, config: Arc<PipelineConfig>) -> ReceiptStream {
    info!(
        "Starting streaming run of {} receipts (concurrency {})",
        image_paths.len(),
        config.concurrency
    );
    // the field is public, so a zero can skip the builder's clamp
    let concurrency = config.concurrency.max(1);

    let s = stream::iter(image_paths.into_iter().enumerate().map(move |(index, path)| {
        let cfg = Arc::clone(&config);
        async move {
            let result = run(&path, &cfg).await;
            ReceiptResult {
                index,
                path,
                result,
            }
        }
    }))
    .buffer_unordered(concurrency);

    Box::pin(s)
}

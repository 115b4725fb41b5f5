//! Image preprocessing: bound the photo's size before it leaves the machine.
//!
//! Phone photos of receipts are 4000+ px colour JPEGs of several MB. Both the
//! OCR service and the vision models read text just as well from a 1800 px
//! grayscale JPEG, which is a fraction of the upload.
//!
//! Steps, in order:
//!
//! 1. Decode (format guessed from content, not extension)
//! 2. Downscale with Lanczos3 if the longer side exceeds `max_dimension`
//! 3. Convert to 8-bit grayscale
//! 4. Re-encode as JPEG at `quality`
//! 5. Write `<stem>_processed.jpg` atomically (temp file + rename)
//!
//! All of this is CPU-bound and runs inside `spawn_blocking`.

use crate::error::ReceiptError;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::DynamicImage;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Upload size the preprocessor aims for. Advisory only.
pub const SOFT_TARGET_BYTES: u64 = 1024 * 1024;

/// The bounded artifact produced by preprocessing.
#[derive(Debug, Clone)]
pub struct PreprocessedImage {
    /// Where the JPEG was written. Empty for in-memory runs.
    pub path: PathBuf,
    /// Encoded grayscale JPEG.
    pub jpeg: Vec<u8>,
    pub original_dimensions: (u32, u32),
    pub dimensions: (u32, u32),
    pub under_soft_target: bool,
}

impl PreprocessedImage {
    pub fn size_bytes(&self) -> u64 {
        self.jpeg.len() as u64
    }
}

/// Preprocess the image at `input` and write the result into `output_dir`.
pub async fn preprocess_image(
    input: &Path,
    output_dir: &Path,
    max_dimension: u32,
    quality: u8,
) -> Result<PreprocessedImage, ReceiptError> {
    let input = input.to_path_buf();
    let output_dir = output_dir.to_path_buf();

    tokio::task::spawn_blocking(move || {
        let bytes = read_input(&input)?;
        let mut out = process_blocking(&bytes, &input, max_dimension, quality)?;
        let target = output_dir.join(processed_file_name(&input));
        write_atomic(&output_dir, &target, &out.jpeg)?;
        info!(
            "Preprocessed {} → {} ({} bytes, {}x{})",
            input.display(),
            target.display(),
            out.jpeg.len(),
            out.dimensions.0,
            out.dimensions.1
        );
        out.path = target;
        Ok(out)
    })
    .await
    .map_err(|e| ReceiptError::Internal(format!("Preprocess task panicked: {}", e)))?
}

/// Preprocess an in-memory image. Nothing is written to disk.
pub async fn preprocess_bytes(
    bytes: Vec<u8>,
    max_dimension: u32,
    quality: u8,
) -> Result<PreprocessedImage, ReceiptError> {
    tokio::task::spawn_blocking(move || {
        process_blocking(&bytes, Path::new("<memory>"), max_dimension, quality)
    })
    .await
    .map_err(|e| ReceiptError::Internal(format!("Preprocess task panicked: {}", e)))?
}

/// `photo.HEIC.jpg` → `photo.HEIC_processed.jpg`; no stem → `receipt_processed.jpg`.
pub fn processed_file_name(input: &Path) -> String {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "receipt".to_string());
    format!("{stem}_processed.jpg")
}

fn read_input(path: &Path) -> Result<Vec<u8>, ReceiptError> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(bytes),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(ReceiptError::FileNotFound {
            path: path.to_path_buf(),
        }),
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            Err(ReceiptError::PermissionDenied {
                path: path.to_path_buf(),
            })
        }
        Err(e) if path.is_dir() => Err(ReceiptError::ImageDecode {
            path: path.to_path_buf(),
            detail: format!("is a directory ({e})"),
        }),
        Err(e) => Err(ReceiptError::ImageDecode {
            path: path.to_path_buf(),
            detail: e.to_string(),
        }),
    }
}

fn process_blocking(
    bytes: &[u8],
    source: &Path,
    max_dimension: u32,
    quality: u8,
) -> Result<PreprocessedImage, ReceiptError> {
    let img = image::load_from_memory(bytes).map_err(|e| ReceiptError::ImageDecode {
        path: source.to_path_buf(),
        detail: e.to_string(),
    })?;
    let original_dimensions = (img.width(), img.height());

    let gray = to_bounded_grayscale(img, max_dimension);
    let dimensions = (gray.width(), gray.height());
    let jpeg = encode_jpeg(&gray, quality)?;

    let under_soft_target = jpeg.len() as u64 <= SOFT_TARGET_BYTES;
    if under_soft_target {
        debug!("Preprocessed JPEG is {} bytes, under the 1 MB target", jpeg.len());
    } else {
        warn!(
            "Preprocessed JPEG is {} bytes, over the 1 MB target; consider a lower quality or dimension",
            jpeg.len()
        );
    }

    Ok(PreprocessedImage {
        path: PathBuf::new(),
        jpeg,
        original_dimensions,
        dimensions,
        under_soft_target,
    })
}

/// Downscale so the longer side is at most `max_dimension`, then grayscale.
///
/// Smaller images are never upscaled.
fn to_bounded_grayscale(img: DynamicImage, max_dimension: u32) -> DynamicImage {
    let longest = img.width().max(img.height());
    let img = if longest > max_dimension {
        debug!(
            "Resizing {}x{} to fit {} px",
            img.width(),
            img.height(),
            max_dimension
        );
        img.resize(max_dimension, max_dimension, FilterType::Lanczos3)
    } else {
        img
    };
    DynamicImage::ImageLuma8(img.to_luma8())
}

fn encode_jpeg(img: &DynamicImage, quality: u8) -> Result<Vec<u8>, ReceiptError> {
    let mut buf = Vec::new();
    // The encoder accepts 1–100.
    let encoder = JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100));
    img.write_with_encoder(encoder)
        .map_err(|e| ReceiptError::ImageEncode {
            detail: e.to_string(),
        })?;
    Ok(buf)
}

fn write_atomic(dir: &Path, target: &Path, bytes: &[u8]) -> Result<(), ReceiptError> {
    let write_err = |source: std::io::Error| ReceiptError::ArtifactWrite {
        path: target.to_path_buf(),
        source,
    };

    std::fs::create_dir_all(dir).map_err(write_err)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(write_err)?;
    tmp.write_all(bytes).map_err(write_err)?;
    tmp.flush().map_err(write_err)?;
    tmp.persist(target).map_err(|e| write_err(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn write_png(path: &Path, w: u32, h: u32) {
        let img = RgbImage::from_fn(w, h, |x, y| Rgb([(x % 256) as u8, (y % 256) as u8, 128]));
        img.save(path).unwrap();
    }

    #[tokio::test]
    async fn large_image_is_downscaled_and_grayscaled() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("receipt.png");
        write_png(&input, 3000, 1500);
        let out_dir = dir.path().join("processed");

        let out = preprocess_image(&input, &out_dir, 1800, 85).await.unwrap();

        assert_eq!(out.original_dimensions, (3000, 1500));
        assert_eq!(out.dimensions, (1800, 900));
        assert_eq!(out.path, out_dir.join("receipt_processed.jpg"));
        assert!(out.path.exists());

        let written = std::fs::read(&out.path).unwrap();
        assert_eq!(written, out.jpeg);
        let decoded = image::load_from_memory(&written).unwrap();
        assert_eq!(decoded.color(), image::ColorType::L8);
        assert_eq!((decoded.width(), decoded.height()), (1800, 900));
    }

    #[tokio::test]
    async fn portrait_receipt_keeps_aspect_ratio() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("tall.png");
        write_png(&input, 1000, 4000);

        let out = preprocess_image(&input, dir.path(), 2000, 80).await.unwrap();
        assert_eq!(out.dimensions, (500, 2000));
    }

    #[tokio::test]
    async fn small_image_is_not_upscaled() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("small.png");
        write_png(&input, 400, 300);

        let out = preprocess_image(&input, dir.path(), 1800, 85).await.unwrap();
        assert_eq!(out.dimensions, (400, 300));
        assert!(out.under_soft_target);
    }

    #[tokio::test]
    async fn quality_zero_still_encodes() {
        let out = preprocess_bytes(png_bytes(64, 64), 1800, 0).await.unwrap();
        assert!(!out.jpeg.is_empty());
        assert_eq!(out.path, PathBuf::new());
    }

    #[tokio::test]
    async fn missing_input_is_file_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = preprocess_image(&dir.path().join("nope.jpg"), dir.path(), 1800, 85)
            .await
            .unwrap_err();
        assert!(matches!(err, ReceiptError::FileNotFound { .. }));
    }

    #[tokio::test]
    async fn corrupt_input_leaves_no_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("broken.jpg");
        std::fs::write(&input, b"definitely not a jpeg").unwrap();
        let out_dir = dir.path().join("processed");

        let err = preprocess_image(&input, &out_dir, 1800, 85).await.unwrap_err();
        assert!(matches!(err, ReceiptError::ImageDecode { .. }));
        assert!(!out_dir.join("broken_processed.jpg").exists());
    }

    #[test]
    fn processed_name_uses_stem() {
        assert_eq!(processed_file_name(Path::new("up/test1.jpg")), "test1_processed.jpg");
        assert_eq!(processed_file_name(Path::new("")), "receipt_processed.jpg");
    }

    fn png_bytes(w: u32, h: u32) -> Vec<u8> {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(w, h, Rgb([200, 10, 10])));
        let mut buf = Vec::new();
        img.write_to(&mut std::io::Cursor::new(&mut buf), image::ImageFormat::Png)
            .unwrap();
        buf
    }
}

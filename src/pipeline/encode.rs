//! Image encoding: preprocessed JPEG bytes → base64 `ImageData`.
//!
//! Multimodal APIs take images as base64 payloads inside the JSON request
//! body. The preprocessor already produced a compact grayscale JPEG, so no
//! re-encode happens here. `detail: "high"` keeps the small receipt print
//! legible for models that tile images.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use tracing::debug;

/// Wrap an encoded JPEG for the model request.
pub fn encode_jpeg(jpeg: &[u8]) -> ImageData {
    let b64 = STANDARD.encode(jpeg);
    debug!("Encoded receipt image → {} bytes base64", b64.len());

    ImageData::new(b64, "image/jpeg").with_detail("high")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_keeps_bytes_and_mime() {
        let jpeg = [0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10];
        let data = encode_jpeg(&jpeg);
        assert_eq!(data.mime_type, "image/jpeg");
        let decoded = STANDARD.decode(&data.data).expect("valid base64");
        assert_eq!(decoded, jpeg);
    }
}

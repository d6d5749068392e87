//! Image encoding: camera frames → JPEG, rendered formulas ← base64 PNG.
//!
//! Frames are sent raw as `image/jpeg`. JPEG keeps a 1280×720 frame in the
//! tens of kilobytes, which matters when one is uploaded every few seconds.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::DynamicImage;
use tracing::{debug, warn};

/// Fit a frame into `width`×`height` (aspect preserved) and JPEG-encode it.
pub fn encode_frame(
    img: &DynamicImage,
    width: u32,
    height: u32,
    quality: u8,
) -> Result<Vec<u8>, image::ImageError> {
    let fitted = if img.width() == width && img.height() == height {
        img.to_rgb8()
    } else {
        img.resize(width, height, FilterType::Triangle).to_rgb8()
    };

    let mut buf = Vec::new();
    DynamicImage::ImageRgb8(fitted)
        .write_with_encoder(JpegEncoder::new_with_quality(&mut buf, quality))?;

    debug!("Encoded frame → {} bytes JPEG", buf.len());
    Ok(buf)
}

/// Decode an image file's bytes (PNG, JPEG or WebP).
pub fn decode_image(bytes: &[u8]) -> Result<DynamicImage, image::ImageError> {
    image::load_from_memory(bytes)
}

/// Decode the base64 PNG the service returns as `latex_image`.
///
/// Returns `None` for an empty or corrupt value. The rendering is optional
/// in the result, so a bad one is dropped rather than failing the upload.
pub fn decode_rendered_image(b64: &str) -> Option<Vec<u8>> {
    let trimmed = b64.trim();
    if trimmed.is_empty() {
        return None;
    }
    match STANDARD.decode(trimmed) {
        Ok(bytes) if !bytes.is_empty() => Some(bytes),
        Ok(_) => None,
        Err(e) => {
            warn!("Discarding undecodable rendered image: {}", e);
            None
        }
    }
}

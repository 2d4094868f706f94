//! Coarse image features used to pick a processing strategy.
//!
//! These are weak, best-effort signals: the thresholds carry no derivation and
//! are tunable rather than load-bearing.

use crate::upload::UploadedImage;
use serde::Serialize;
use std::io::Cursor;
use tracing::debug;

pub const HIGH_QUALITY_MIN_BYTES: u64 = 500_000;
pub const HIGH_QUALITY_MIN_SIDE: u32 = 1000;
pub const COMPLEX_CONTENT_MIN_BYTES: u64 = 1_000_000;
pub const TEXT_ASPECT_MIN: f64 = 0.5;
pub const TEXT_ASPECT_MAX: f64 = 2.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ImageFeatures {
    pub has_text: bool,
    pub has_complex_content: bool,
    pub is_high_quality: bool,
    pub is_uncertain: bool,
    pub aspect_ratio: f64,
}

/// Derive features from byte size and pixel dimensions.
///
/// Dimensions the caller did not supply are probed from the image header;
/// anything undecodable is treated as 0x0.
pub fn analyze(image: &UploadedImage) -> ImageFeatures {
    let (width, height) = match (image.width, image.height) {
        (Some(w), Some(h)) => (w, h),
        _ => probe_dimensions(&image.data).unwrap_or((0, 0)),
    };
    from_measurements(image.byte_size(), width, height)
}

pub fn from_measurements(byte_size: u64, width: u32, height: u32) -> ImageFeatures {
    let is_high_quality = byte_size > HIGH_QUALITY_MIN_BYTES
        && width > HIGH_QUALITY_MIN_SIDE
        && height > HIGH_QUALITY_MIN_SIDE;

    let aspect_ratio = width as f64 / height.max(1) as f64;
    let has_text = aspect_ratio > TEXT_ASPECT_MIN && aspect_ratio < TEXT_ASPECT_MAX;
    let has_complex_content =
        aspect_ratio > TEXT_ASPECT_MAX || byte_size > COMPLEX_CONTENT_MIN_BYTES;

    ImageFeatures {
        has_text,
        has_complex_content,
        is_high_quality,
        is_uncertain: !has_text && !has_complex_content,
        aspect_ratio,
    }
}

fn probe_dimensions(data: &[u8]) -> Option<(u32, u32)> {
    let reader = image::io::Reader::new(Cursor::new(data))
        .with_guessed_format()
        .ok()?;
    match reader.into_dimensions() {
        Ok(dims) => Some(dims),
        Err(e) => {
            debug!("Could not probe image dimensions: {}", e);
            None
        }
    }
}

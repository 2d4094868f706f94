//! Uploaded image descriptor and pre-flight validation.

use serde::{Deserialize, Serialize};

/// Immutable view of an image handed to the processor by its caller.
#[derive(Debug, Clone)]
pub struct UploadedImage {
    pub filename: String,
    pub mime_type: String,
    pub data: Vec<u8>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

impl UploadedImage {
    pub fn new(filename: impl Into<String>, mime_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            mime_type: mime_type.into(),
            data,
            width: None,
            height: None,
        }
    }

    pub fn with_dimensions(mut self, width: u32, height: u32) -> Self {
        self.width = Some(width);
        self.height = Some(height);
        self
    }

    pub fn byte_size(&self) -> u64 {
        self.data.len() as u64
    }

    /// Lowercased format token, taken from the file extension and falling back
    /// to the MIME subtype (`image/png` -> `png`).
    pub fn format(&self) -> Option<String> {
        let from_name = self
            .filename
            .rsplit_once('.')
            .map(|(_, ext)| ext.trim().to_lowercase())
            .filter(|ext| !ext.is_empty());

        from_name.or_else(|| {
            self.mime_type
                .split_once('/')
                .map(|(_, sub)| sub.split(';').next().unwrap_or(sub).trim().to_lowercase())
                .filter(|sub| !sub.is_empty())
        })
    }

    /// MIME type to declare to providers; guessed from the format when the
    /// caller sent something generic.
    pub fn content_type(&self) -> String {
        if self.mime_type.starts_with("image/") {
            return self.mime_type.clone();
        }
        match self.format().as_deref() {
            Some("jpg") | Some("jpeg") => "image/jpeg".to_string(),
            Some("tif") | Some("tiff") => "image/tiff".to_string(),
            Some(other) => format!("image/{}", other),
            None => "application/octet-stream".to_string(),
        }
    }
}

/// Size and format limits applied before any provider is touched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageLimits {
    #[serde(default = "default_max_bytes")]
    pub max_bytes: u64,
    #[serde(default = "default_allowed_formats")]
    pub allowed_formats: Vec<String>,
}

pub const DEFAULT_MAX_BYTES: u64 = 10 * 1024 * 1024;

fn default_max_bytes() -> u64 {
    DEFAULT_MAX_BYTES
}

fn default_allowed_formats() -> Vec<String> {
    ["jpg", "jpeg", "png", "gif", "webp", "bmp", "tiff", "tif"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl Default for ImageLimits {
    fn default() -> Self {
        Self {
            max_bytes: default_max_bytes(),
            allowed_formats: default_allowed_formats(),
        }
    }
}

/// Outcome of [`validate_image`], returned as-is by the `/validate` endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationReport {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ValidationReport {
    fn ok() -> Self {
        Self {
            valid: true,
            error: None,
        }
    }

    fn rejected(error: String) -> Self {
        Self {
            valid: false,
            error: Some(error),
        }
    }
}

/// Check byte size and format against the limits.
pub fn validate_image(image: &UploadedImage, limits: &ImageLimits) -> ValidationReport {
    if image.data.is_empty() {
        return ValidationReport::rejected("Image is empty".to_string());
    }

    if image.byte_size() > limits.max_bytes {
        return ValidationReport::rejected(format!(
            "Image is {} bytes, exceeding the {} byte limit",
            image.byte_size(),
            limits.max_bytes
        ));
    }

    match image.format() {
        Some(format)
            if limits
                .allowed_formats
                .iter()
                .any(|allowed| allowed.eq_ignore_ascii_case(&format)) =>
        {
            ValidationReport::ok()
        }
        Some(format) => ValidationReport::rejected(format!(
            "Unsupported image format '{}'. Allowed: {}",
            format,
            limits.allowed_formats.join(", ")
        )),
        None => ValidationReport::rejected("Could not determine image format".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_oversized_image() {
        let image = UploadedImage::new("scan.png", "image/png", vec![0u8; 11 * 1024 * 1024]);
        let report = validate_image(&image, &ImageLimits::default());
        assert!(!report.valid);
        assert!(report.error.unwrap().contains("exceeding"));
    }

    #[test]
    fn test_accepts_allowed_format() {
        let image = UploadedImage::new("Photo.JPG", "image/jpeg", vec![1, 2, 3]);
        assert_eq!(validate_image(&image, &ImageLimits::default()), ValidationReport::ok());
    }

    #[test]
    fn test_rejects_unlisted_format() {
        let image = UploadedImage::new("notes.pdf", "application/pdf", vec![1, 2, 3]);
        let report = validate_image(&image, &ImageLimits::default());
        assert!(!report.valid);
        assert!(report.error.unwrap().contains("'pdf'"));
    }

    #[test]
    fn test_format_falls_back_to_mime() {
        let image = UploadedImage::new("upload", "image/webp", vec![1]);
        assert_eq!(image.format().as_deref(), Some("webp"));
        assert!(validate_image(&image, &ImageLimits::default()).valid);
    }

    #[test]
    fn test_content_type_guess() {
        let image = UploadedImage::new("a.jpg", "application/octet-stream", vec![1]);
        assert_eq!(image.content_type(), "image/jpeg");
    }
}

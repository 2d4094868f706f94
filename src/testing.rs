//! Call-counting provider doubles shared by the unit tests.

use crate::chain::Provider;
use crate::error::ExtractError;
use crate::ocr::OcrProvider;
use crate::upload::UploadedImage;
use crate::vision::{VisionAnalysis, VisionProvider};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub fn sample_image() -> UploadedImage {
    UploadedImage::new("receipt.png", "image/png", b"\x89PNG\r\n\x1a\nstub".to_vec())
        .with_dimensions(800, 600)
}

#[derive(Debug, Clone)]
enum Behaviour {
    Reply(String),
    Fail(String),
    Slow(Duration, String),
}

pub struct Stub {
    name: String,
    available: bool,
    behaviour: Behaviour,
    calls: AtomicUsize,
}

impl Stub {
    fn build(name: &str, available: bool, behaviour: Behaviour) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            available,
            behaviour,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    async fn respond(&self) -> Result<String, ExtractError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.behaviour {
            Behaviour::Reply(text) => Ok(text.clone()),
            Behaviour::Fail(message) => Err(ExtractError::transient(&self.name, message)),
            Behaviour::Slow(delay, text) => {
                tokio::time::sleep(*delay).await;
                Ok(text.clone())
            }
        }
    }
}

/// OCR double; replies with plain text.
pub type StubOcr = Stub;
/// Vision double; replies become the analysis description.
pub type StubVision = Stub;

impl Stub {
    pub fn text(name: &str, text: &str) -> Arc<Self> {
        Self::build(name, true, Behaviour::Reply(text.to_string()))
    }

    pub fn failing(name: &str, message: &str) -> Arc<Self> {
        Self::build(name, true, Behaviour::Fail(message.to_string()))
    }

    pub fn unavailable(name: &str) -> Arc<Self> {
        Self::build(name, false, Behaviour::Reply("should never be returned".to_string()))
    }

    pub fn slow(name: &str, delay: Duration, text: &str) -> Arc<Self> {
        Self::build(name, true, Behaviour::Slow(delay, text.to_string()))
    }
}

impl Provider for Stub {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_available(&self) -> bool {
        self.available
    }
}

#[async_trait::async_trait]
impl OcrProvider for Stub {
    async fn extract(&self, _image: &UploadedImage) -> Result<String, ExtractError> {
        self.respond().await
    }
}

#[async_trait::async_trait]
impl VisionProvider for Stub {
    async fn analyze(&self, _image: &UploadedImage) -> Result<VisionAnalysis, ExtractError> {
        let description = self.respond().await?;
        Ok(VisionAnalysis {
            description,
            objects: Vec::new(),
            has_math: false,
            has_diagram: false,
            confidence: 0.8,
        })
    }
}

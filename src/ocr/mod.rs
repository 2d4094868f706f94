//! OCR provider abstraction.
//!
//! Defines the [`OcrProvider`] trait so different OCR backends (Mistral OCR,
//! OCR.space, a Docling sidecar) can be ordered into a fallback chain from
//! configuration.

pub mod docling;
pub mod mistral;
pub mod ocr_space;

use crate::chain::{FallbackChain, Link, Provider, Usable};
use crate::config::{ProviderConfig, ProviderEntry};
use crate::error::ExtractError;
use crate::quality::{self, QualityScore};
use crate::upload::UploadedImage;
use std::sync::Arc;
use tracing::debug;

/// Text accepted from an OCR provider, scored by the quality assessor.
#[derive(Debug, Clone)]
pub struct OcrText {
    pub text: String,
    pub quality: QualityScore,
}

impl Usable for OcrText {
    fn is_usable(&self) -> bool {
        !self.text.trim().is_empty()
    }
}

/// Async trait implemented by each OCR backend.
#[async_trait::async_trait]
pub trait OcrProvider: Provider {
    /// One outbound call; returns the recognised plain text.
    async fn extract(&self, image: &UploadedImage) -> Result<String, ExtractError>;
}

#[async_trait::async_trait]
impl<'p> Link for dyn OcrProvider + 'p {
    type Output = OcrText;

    async fn run(&self, image: &UploadedImage) -> Result<OcrText, ExtractError> {
        let text = self.extract(image).await?;
        let quality = quality::assess(&text);
        debug!(
            "{}: {} chars, quality {:?} ({})",
            self.name(),
            text.chars().count(),
            quality.quality,
            quality.confidence
        );
        Ok(OcrText { text, quality })
    }
}

pub type OcrChain = FallbackChain<dyn OcrProvider>;

/// Known provider identifiers used for registry lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OcrProviderKind {
    MistralOcr,
    OcrSpace,
    Docling,
}

impl OcrProviderKind {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "mistral_ocr" => Some(Self::MistralOcr),
            "ocr_space" => Some(Self::OcrSpace),
            "docling" => Some(Self::Docling),
            _ => None,
        }
    }
}

/// Instantiate the configured OCR providers in order.
pub fn build_providers(
    config: &ProviderConfig,
    client: &reqwest::Client,
) -> anyhow::Result<Vec<Arc<dyn OcrProvider>>> {
    config
        .ocr
        .iter()
        .map(|entry| build_one(entry, config, client))
        .collect()
}

fn build_one(
    entry: &ProviderEntry,
    config: &ProviderConfig,
    client: &reqwest::Client,
) -> anyhow::Result<Arc<dyn OcrProvider>> {
    let kind = OcrProviderKind::from_str(&entry.id)
        .ok_or_else(|| anyhow::anyhow!("Unknown OCR provider: {}", entry.id))?;

    let provider: Arc<dyn OcrProvider> = match kind {
        OcrProviderKind::MistralOcr => {
            Arc::new(mistral::MistralOcrProvider::new(entry, client.clone()))
        }
        OcrProviderKind::OcrSpace => Arc::new(ocr_space::OcrSpaceProvider::new(
            entry,
            &config.ocr_languages,
            client.clone(),
        )),
        OcrProviderKind::Docling => Arc::new(docling::DoclingProvider::new(entry, client.clone())),
    };
    Ok(provider)
}

/// Build the OCR chain with the configured per-call timeout.
pub fn build_chain(config: &ProviderConfig, client: &reqwest::Client) -> anyhow::Result<OcrChain> {
    Ok(FallbackChain::new("ocr", build_providers(config, client)?)
        .with_call_timeout(config.call_timeout()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{sample_image, StubOcr};

    #[tokio::test]
    async fn test_link_scores_quality() {
        let stub: Arc<dyn OcrProvider> = StubOcr::text("stub", "Total due: 1,250.00 EUR");
        let out = stub.run(&sample_image()).await.unwrap();
        assert_eq!(out.quality.quality, quality::QualityTier::High);
        assert!(out.is_usable());
    }

    #[test]
    fn test_build_providers_keeps_order() {
        let config = ProviderConfig {
            ocr: vec![
                ProviderEntry::new("docling"),
                ProviderEntry::new("mistral_ocr"),
                ProviderEntry::new("ocr_space"),
            ],
            ..ProviderConfig::default()
        };
        let providers = build_providers(&config, &reqwest::Client::new()).unwrap();
        let names: Vec<_> = providers.iter().map(|p| p.name().to_string()).collect();
        assert_eq!(names, vec!["docling", "mistral_ocr", "ocr_space"]);
        assert!(providers.iter().all(|p| !p.is_available()));
    }

    #[test]
    fn test_unknown_provider_is_an_error() {
        let config = ProviderConfig {
            ocr: vec![ProviderEntry::new("tesseract_cloud")],
            ..ProviderConfig::default()
        };
        let err = build_providers(&config, &reqwest::Client::new())
            .err()
            .unwrap();
        assert!(err.to_string().contains("tesseract_cloud"));
    }
}

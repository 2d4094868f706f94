//! Docling sidecar OCR provider.

use super::OcrProvider;
use crate::chain::Provider;
use crate::config::ProviderEntry;
use crate::error::ExtractError;
use crate::upload::UploadedImage;
use anyhow::Context;
use serde::Deserialize;
use tracing::info;

/// Docling sidecar response (private deserialization types).
#[derive(Debug, Deserialize)]
struct DoclingResponse {
    #[serde(default)]
    markdown: String,
    #[serde(default)]
    pages: Vec<DoclingPageContent>,
}

#[derive(Debug, Deserialize)]
struct DoclingPageContent {
    text: String,
}

pub struct DoclingProvider {
    url: Option<String>,
    api_key: Option<String>,
    enabled: bool,
    client: reqwest::Client,
}

impl DoclingProvider {
    /// The sidecar is only considered available once its URL is configured.
    pub fn new(entry: &ProviderEntry, client: reqwest::Client) -> Self {
        Self {
            url: entry
                .base_url
                .as_deref()
                .map(|u| u.trim_end_matches('/').to_string()),
            api_key: entry.credential().map(str::to_string),
            enabled: entry.enabled,
            client,
        }
    }
}

impl Provider for DoclingProvider {
    fn name(&self) -> &str {
        "docling"
    }

    fn is_available(&self) -> bool {
        self.enabled && self.url.is_some()
    }
}

#[async_trait::async_trait]
impl OcrProvider for DoclingProvider {
    async fn extract(&self, image: &UploadedImage) -> Result<String, ExtractError> {
        let url = match (&self.url, self.enabled) {
            (Some(url), true) => url,
            _ => {
                return Err(ExtractError::ProviderUnavailable {
                    provider: self.name().to_string(),
                })
            }
        };

        let docling = self
            .convert(url, image)
            .await
            .map_err(|e| ExtractError::transient(self.name(), e))?;

        // Prefer the full markdown; fall back to stitching page text.
        let text = if docling.markdown.trim().is_empty() {
            docling
                .pages
                .into_iter()
                .map(|p| p.text)
                .collect::<Vec<_>>()
                .join("\n\n")
        } else {
            docling.markdown
        };

        if text.trim().is_empty() {
            return Err(ExtractError::empty(self.name()));
        }
        Ok(text)
    }
}

impl DoclingProvider {
    async fn convert(&self, url: &str, image: &UploadedImage) -> anyhow::Result<DoclingResponse> {
        use reqwest::multipart::{Form, Part};

        info!(
            "DoclingProvider: sending {} ({} bytes) to sidecar",
            image.filename,
            image.data.len()
        );

        let part = Part::bytes(image.data.clone())
            .file_name(image.filename.clone())
            .mime_str(&image.content_type())?;

        let form = Form::new().part("file", part);

        let mut request = self.client.post(format!("{}/convert", url)).multipart(form);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .context("Failed to reach Docling sidecar")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            anyhow::bail!("Docling sidecar error ({}): {}", status, error_text);
        }

        response
            .json()
            .await
            .context("Failed to parse Docling response")
    }
}

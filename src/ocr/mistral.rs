//! Mistral OCR provider (uses Mistral's OCR API).

use super::OcrProvider;
use crate::chain::Provider;
use crate::config::ProviderEntry;
use crate::error::ExtractError;
use crate::upload::UploadedImage;
use anyhow::Context;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

const DEFAULT_BASE_URL: &str = "https://api.mistral.ai/v1";
const DEFAULT_MODEL: &str = "mistral-ocr-latest";

pub struct MistralOcrProvider {
    api_key: Option<String>,
    base_url: String,
    model: String,
    client: reqwest::Client,
}

impl MistralOcrProvider {
    pub fn new(entry: &ProviderEntry, client: reqwest::Client) -> Self {
        Self {
            api_key: entry.credential().map(str::to_string),
            base_url: entry
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            model: entry.model.clone().unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            client,
        }
    }
}

// ── Mistral API request/response types ──────────────────────────────────────

#[derive(Serialize)]
struct OcrRequest {
    model: String,
    document: DocumentSource,
}

#[derive(Serialize)]
#[serde(tag = "type")]
enum DocumentSource {
    #[serde(rename = "image_url")]
    Image { image_url: String },
}

#[derive(Deserialize)]
struct OcrResponse {
    pages: Vec<MistralPage>,
}

#[derive(Deserialize)]
struct MistralPage {
    markdown: String,
}

// ── Provider implementation ─────────────────────────────────────────────────

impl Provider for MistralOcrProvider {
    fn name(&self) -> &str {
        "mistral_ocr"
    }

    fn is_available(&self) -> bool {
        self.api_key.is_some()
    }
}

#[async_trait::async_trait]
impl OcrProvider for MistralOcrProvider {
    async fn extract(&self, image: &UploadedImage) -> Result<String, ExtractError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ExtractError::ProviderUnavailable {
                provider: self.name().to_string(),
            })?;

        let text = self
            .call_api(api_key, image)
            .await
            .map_err(|e| ExtractError::transient(self.name(), e))?;

        if text.trim().is_empty() {
            return Err(ExtractError::empty(self.name()));
        }
        Ok(text)
    }
}

impl MistralOcrProvider {
    async fn call_api(&self, api_key: &str, image: &UploadedImage) -> anyhow::Result<String> {
        let data_url = format!(
            "data:{};base64,{}",
            image.content_type(),
            BASE64.encode(&image.data)
        );

        let body = OcrRequest {
            model: self.model.clone(),
            document: DocumentSource::Image {
                image_url: data_url,
            },
        };

        info!(
            "MistralOcrProvider: calling OCR API for {} ({} bytes)",
            image.filename,
            image.data.len()
        );

        let resp = self
            .client
            .post(format!("{}/ocr", self.base_url))
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .context("Failed to send request to Mistral OCR")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            anyhow::bail!("Mistral OCR API error ({}): {}", status, text);
        }

        let raw_text = resp.text().await?;
        debug!(
            "MistralOcrProvider: raw response ({} bytes): {}",
            raw_text.len(),
            raw_text.chars().take(500).collect::<String>()
        );
        let ocr: OcrResponse =
            serde_json::from_str(&raw_text).context("Failed to parse Mistral OCR response")?;

        Ok(ocr
            .pages
            .into_iter()
            .map(|p| p.markdown)
            .collect::<Vec<_>>()
            .join("\n\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::sample_image;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(server: &MockServer) -> MistralOcrProvider {
        let entry = ProviderEntry::new("mistral_ocr")
            .with_api_key("test-key")
            .with_base_url(server.uri());
        MistralOcrProvider::new(&entry, reqwest::Client::new())
    }

    #[tokio::test]
    async fn test_joins_page_markdown() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/ocr"))
            .and(header("Authorization", "Bearer test-key"))
            .and(body_partial_json(serde_json::json!({
                "model": "mistral-ocr-latest",
                "document": {"type": "image_url"}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "pages": [
                    {"index": 0, "markdown": "# Receipt"},
                    {"index": 1, "markdown": "Total: 12.50"}
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let text = provider(&server).extract(&sample_image()).await.unwrap();
        assert_eq!(text, "# Receipt\n\nTotal: 12.50");
    }

    #[tokio::test]
    async fn test_server_error_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/ocr"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let err = provider(&server).extract(&sample_image()).await.unwrap_err();
        match err {
            ExtractError::ProviderTransientFailure { provider, message } => {
                assert_eq!(provider, "mistral_ocr");
                assert!(message.contains("503"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_blank_pages_are_empty_result() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/ocr"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"pages": [{"index": 0, "markdown": " "}]})),
            )
            .mount(&server)
            .await;

        let err = provider(&server).extract(&sample_image()).await.unwrap_err();
        assert_eq!(err, ExtractError::empty("mistral_ocr"));
    }

    #[tokio::test]
    async fn test_missing_key_is_unavailable_without_a_call() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let entry = ProviderEntry::new("mistral_ocr").with_base_url(server.uri());
        let provider = MistralOcrProvider::new(&entry, reqwest::Client::new());
        assert!(!provider.is_available());
        let err = provider.extract(&sample_image()).await.unwrap_err();
        assert!(matches!(err, ExtractError::ProviderUnavailable { .. }));
    }
}

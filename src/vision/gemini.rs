//! Google Gemini `generateContent` with inline image data.

use super::{parse_analysis, VisionAnalysis, VisionProvider, ANALYSIS_PROMPT};
use crate::chain::Provider;
use crate::config::ProviderEntry;
use crate::error::ExtractError;
use crate::upload::UploadedImage;
use anyhow::Context;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::Deserialize;
use tracing::info;

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_MODEL: &str = "gemini-2.0-flash";

pub struct GeminiProvider {
    api_key: Option<String>,
    base_url: String,
    model: String,
    client: reqwest::Client,
}

impl GeminiProvider {
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

    async fn generate(&self, api_key: &str, image: &UploadedImage) -> anyhow::Result<String> {
        let body = serde_json::json!({
            "contents": [{ "parts": [
                { "text": ANALYSIS_PROMPT },
                { "inlineData": {
                    "mimeType": image.content_type(),
                    "data": BASE64.encode(&image.data)
                } }
            ]}]
        });

        let resp = self
            .client
            .post(format!("{}/models/{}:generateContent", self.base_url, self.model))
            .header("x-goog-api-key", api_key)
            .json(&body)
            .send()
            .await
            .context("Failed to send request to Gemini")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            anyhow::bail!("Gemini API error ({}): {}", status, text);
        }

        let parsed: GenerateResponse = resp
            .json()
            .await
            .context("Failed to parse Gemini response")?;

        Ok(parsed
            .candidates
            .into_iter()
            .next()
            .map(|c| {
                c.content
                    .parts
                    .into_iter()
                    .filter_map(|p| p.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default())
    }
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: CandidateContent,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    text: Option<String>,
}

impl Provider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    fn is_available(&self) -> bool {
        self.api_key.is_some()
    }
}

#[async_trait::async_trait]
impl VisionProvider for GeminiProvider {
    async fn analyze(&self, image: &UploadedImage) -> Result<VisionAnalysis, ExtractError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ExtractError::ProviderUnavailable {
                provider: self.name().to_string(),
            })?;

        info!("[Vision] Analyzing {} via Gemini {}", image.filename, self.model);

        let content = self
            .generate(api_key, image)
            .await
            .map_err(|e| ExtractError::transient(self.name(), e))?;

        parse_analysis(self.name(), &content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::sample_image;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_concatenates_candidate_parts() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/models/gemini-2.0-flash:generateContent"))
            .and(header("x-goog-api-key", "g-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "candidates": [{"content": {"parts": [
                    {"text": "{\"description\": \"A flow"},
                    {"text": "chart\", \"has_diagram\": true}"}
                ]}}]
            })))
            .mount(&server)
            .await;

        let entry = ProviderEntry::new("gemini")
            .with_api_key("g-key")
            .with_base_url(server.uri());
        let provider = GeminiProvider::new(&entry, reqwest::Client::new());
        let analysis = provider.analyze(&sample_image()).await.unwrap();
        assert_eq!(analysis.description, "A flowchart");
        assert!(analysis.has_diagram);
        assert_eq!(analysis.confidence, 0.8);
    }
}

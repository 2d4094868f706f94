//! OCR.space provider. Honours the configured OCR language set.

use super::OcrProvider;
use crate::chain::Provider;
use crate::config::ProviderEntry;
use crate::error::ExtractError;
use crate::upload::UploadedImage;
use anyhow::Context;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::Deserialize;
use tracing::{debug, info};

const DEFAULT_BASE_URL: &str = "https://api.ocr.space";
const DEFAULT_ENGINE: &str = "2";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ParseResponse {
    #[serde(default)]
    parsed_results: Vec<ParsedResult>,
    #[serde(default)]
    is_errored_on_processing: bool,
    #[serde(default)]
    error_message: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ParsedResult {
    #[serde(default)]
    parsed_text: String,
}

pub struct OcrSpaceProvider {
    api_key: Option<String>,
    base_url: String,
    /// OCR.space takes a single language code; the first configured one wins.
    language: String,
    engine: String,
    client: reqwest::Client,
}

impl OcrSpaceProvider {
    pub fn new(entry: &ProviderEntry, languages: &[String], client: reqwest::Client) -> Self {
        Self {
            api_key: entry.credential().map(str::to_string),
            base_url: entry
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            language: languages
                .first()
                .cloned()
                .unwrap_or_else(|| "eng".to_string()),
            engine: entry
                .model
                .clone()
                .unwrap_or_else(|| DEFAULT_ENGINE.to_string()),
            client,
        }
    }
}

impl Provider for OcrSpaceProvider {
    fn name(&self) -> &str {
        "ocr_space"
    }

    fn is_available(&self) -> bool {
        self.api_key.is_some()
    }
}

#[async_trait::async_trait]
impl OcrProvider for OcrSpaceProvider {
    async fn extract(&self, image: &UploadedImage) -> Result<String, ExtractError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ExtractError::ProviderUnavailable {
                provider: self.name().to_string(),
            })?;

        let text = self
            .parse(api_key, image)
            .await
            .map_err(|e| ExtractError::transient(self.name(), e))?;

        if text.trim().is_empty() {
            return Err(ExtractError::empty(self.name()));
        }
        Ok(text)
    }
}

impl OcrSpaceProvider {
    async fn parse(&self, api_key: &str, image: &UploadedImage) -> anyhow::Result<String> {
        let data_url = format!(
            "data:{};base64,{}",
            image.content_type(),
            BASE64.encode(&image.data)
        );

        info!(
            "OcrSpaceProvider: parsing {} (language={}, engine={})",
            image.filename, self.language, self.engine
        );

        let resp = self
            .client
            .post(format!("{}/parse/image", self.base_url))
            .header("apikey", api_key)
            .form(&[
                ("base64Image", data_url.as_str()),
                ("language", self.language.as_str()),
                ("OCREngine", self.engine.as_str()),
                ("scale", "true"),
            ])
            .send()
            .await
            .context("Failed to send request to OCR.space")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            anyhow::bail!("OCR.space API error ({}): {}", status, text);
        }

        let parsed: ParseResponse = resp
            .json()
            .await
            .context("Failed to parse OCR.space response")?;

        // OCR.space reports processing failures with HTTP 200.
        if parsed.is_errored_on_processing {
            let message = parsed
                .error_message
                .map(|m| m.to_string())
                .unwrap_or_else(|| "unknown error".to_string());
            anyhow::bail!("OCR.space processing error: {}", message);
        }

        debug!(
            "OcrSpaceProvider: {} parsed result(s)",
            parsed.parsed_results.len()
        );

        Ok(parsed
            .parsed_results
            .into_iter()
            .map(|r| r.parsed_text)
            .collect::<Vec<_>>()
            .join("\n"))
    }
}

//! OpenAI-compatible chat completions with an image part.
//!
//! Serves both OpenRouter and OpenAI; they differ only in endpoint, default
//! model and the env var carrying the key.

use super::{parse_analysis, VisionAnalysis, VisionProvider, ANALYSIS_PROMPT};
use crate::chain::Provider;
use crate::config::ProviderEntry;
use crate::error::ExtractError;
use crate::upload::UploadedImage;
use anyhow::Context;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";
const OPENROUTER_MODEL: &str = "google/gemini-2.0-flash-001";
const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const OPENAI_MODEL: &str = "gpt-4o";

/// Chat-completions client for one vision endpoint.
pub struct ChatVisionProvider {
    name: &'static str,
    client: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
    model: String,
}

impl ChatVisionProvider {
    pub fn openrouter(entry: &ProviderEntry, client: reqwest::Client) -> Self {
        Self::build("openrouter", OPENROUTER_BASE_URL, OPENROUTER_MODEL, entry, client)
    }

    pub fn openai(entry: &ProviderEntry, client: reqwest::Client) -> Self {
        Self::build("openai", OPENAI_BASE_URL, OPENAI_MODEL, entry, client)
    }

    fn build(
        name: &'static str,
        base_url: &str,
        model: &str,
        entry: &ProviderEntry,
        client: reqwest::Client,
    ) -> Self {
        Self {
            name,
            client,
            api_key: entry.credential().map(str::to_string),
            base_url: entry
                .base_url
                .clone()
                .unwrap_or_else(|| base_url.to_string()),
            model: entry.model.clone().unwrap_or_else(|| model.to_string()),
        }
    }

    async fn send_request(
        &self,
        api_key: &str,
        request: ChatCompletionRequest,
    ) -> anyhow::Result<String> {
        debug!("Sending request to {}: model={}", self.name, request.model);

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await
            .with_context(|| format!("Failed to send request to {}", self.name))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            anyhow::bail!("{} API error ({}): {}", self.name, status, error_text);
        }

        let response: ChatCompletionResponse = response
            .json()
            .await
            .with_context(|| format!("Failed to parse {} response", self.name))?;

        if let Some(usage) = &response.usage {
            info!(
                "{} response: {} tokens (prompt: {}, completion: {})",
                self.name, usage.total_tokens, usage.prompt_tokens, usage.completion_tokens
            );
        }

        Ok(response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default())
    }
}

impl Provider for ChatVisionProvider {
    fn name(&self) -> &str {
        self.name
    }

    fn is_available(&self) -> bool {
        self.api_key.is_some()
    }
}

#[async_trait::async_trait]
impl VisionProvider for ChatVisionProvider {
    async fn analyze(&self, image: &UploadedImage) -> Result<VisionAnalysis, ExtractError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ExtractError::ProviderUnavailable {
                provider: self.name.to_string(),
            })?;

        info!("[Vision] Analyzing {} via {} {}", image.filename, self.name, self.model);

        let request = ChatCompletionRequest {
            model: self.model.clone(),
            messages: vec![Message::user_with_image(ANALYSIS_PROMPT, image)],
            max_tokens: Some(2048),
        };

        let content = self
            .send_request(api_key, request)
            .await
            .map_err(|e| ExtractError::transient(self.name, e))?;

        parse_analysis(self.name, &content)
    }
}

// ============================================================================
// Request/Response types
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

#[derive(Debug, Clone, Serialize)]
struct Message {
    role: &'static str,
    content: Vec<ContentPart>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Clone, Serialize)]
struct ImageUrl {
    url: String,
}

impl Message {
    /// User message with the prompt and the image as a base64 data URL.
    fn user_with_image(text: &str, image: &UploadedImage) -> Self {
        let data_url = format!(
            "data:{};base64,{}",
            image.content_type(),
            BASE64.encode(&image.data)
        );
        Self {
            role: "user",
            content: vec![
                ContentPart::Text {
                    text: text.to_string(),
                },
                ContentPart::ImageUrl {
                    image_url: ImageUrl { url: data_url },
                },
            ],
        }
    }
}

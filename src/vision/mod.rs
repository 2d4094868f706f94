//! Vision-capable LLM providers.
//!
//! Every backend is asked for the same JSON description of the image, so the
//! chain can treat them interchangeably.

pub mod chat;
pub mod gemini;

use crate::chain::{FallbackChain, Link, Provider, Usable};
use crate::config::{ProviderConfig, ProviderEntry};
use crate::error::ExtractError;
use crate::upload::UploadedImage;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::debug;

/// Structured description of an image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisionAnalysis {
    pub description: String,
    #[serde(default)]
    pub objects: Vec<String>,
    #[serde(default)]
    pub has_math: bool,
    #[serde(default)]
    pub has_diagram: bool,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
}

fn default_confidence() -> f64 {
    0.8
}

/// Confidence assigned when the model ignored the JSON instructions.
const FREE_TEXT_CONFIDENCE: f64 = 0.5;

impl Usable for VisionAnalysis {
    fn is_usable(&self) -> bool {
        !self.description.trim().is_empty()
    }
}

pub const ANALYSIS_PROMPT: &str = r#"Analyze this image. Transcribe any readable text and describe everything else that matters (objects, charts, diagrams, formulas).
Return ONLY valid JSON with this structure:

{
  "description": "Full description, including all transcribed text",
  "objects": ["object", "..."],
  "has_math": false,
  "has_diagram": false,
  "confidence": 0.0
}"#;

#[async_trait::async_trait]
pub trait VisionProvider: Provider {
    /// One outbound call; returns the model's structured analysis.
    async fn analyze(&self, image: &UploadedImage) -> Result<VisionAnalysis, ExtractError>;
}

#[async_trait::async_trait]
impl<'p> Link for dyn VisionProvider + 'p {
    type Output = VisionAnalysis;

    async fn run(&self, image: &UploadedImage) -> Result<VisionAnalysis, ExtractError> {
        self.analyze(image).await
    }
}

pub type VisionChain = FallbackChain<dyn VisionProvider>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VisionProviderKind {
    OpenRouter,
    OpenAi,
    Gemini,
}

impl VisionProviderKind {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "openrouter" => Some(Self::OpenRouter),
            "openai" => Some(Self::OpenAi),
            "gemini" => Some(Self::Gemini),
            _ => None,
        }
    }
}

pub fn build_providers(
    config: &ProviderConfig,
    client: &reqwest::Client,
) -> anyhow::Result<Vec<Arc<dyn VisionProvider>>> {
    config
        .vision
        .iter()
        .map(|entry| build_one(entry, client))
        .collect()
}

fn build_one(
    entry: &ProviderEntry,
    client: &reqwest::Client,
) -> anyhow::Result<Arc<dyn VisionProvider>> {
    let kind = VisionProviderKind::from_str(&entry.id)
        .ok_or_else(|| anyhow::anyhow!("Unknown vision provider: {}", entry.id))?;

    let provider: Arc<dyn VisionProvider> = match kind {
        VisionProviderKind::OpenRouter => Arc::new(chat::ChatVisionProvider::openrouter(
            entry,
            client.clone(),
        )),
        VisionProviderKind::OpenAi => {
            Arc::new(chat::ChatVisionProvider::openai(entry, client.clone()))
        }
        VisionProviderKind::Gemini => Arc::new(gemini::GeminiProvider::new(entry, client.clone())),
    };
    Ok(provider)
}

pub fn build_chain(
    config: &ProviderConfig,
    client: &reqwest::Client,
) -> anyhow::Result<VisionChain> {
    Ok(FallbackChain::new("vision", build_providers(config, client)?)
        .with_call_timeout(config.call_timeout()))
}

/// Turn a model reply into an analysis. Replies wrapped in code fences are
/// accepted and fields with the wrong type fall back to their defaults. Only a
/// reply that is not a JSON object becomes a plain description.
pub fn parse_analysis(provider: &str, response: &str) -> Result<VisionAnalysis, ExtractError> {
    if response.trim().is_empty() {
        return Err(ExtractError::empty(provider));
    }

    let fields = match serde_json::from_str::<Value>(strip_code_fence(response)) {
        Ok(Value::Object(fields)) => fields,
        Ok(_) | Err(_) => {
            debug!("{}: reply is not analysis JSON, using it as text", provider);
            return Ok(VisionAnalysis {
                description: response.trim().to_string(),
                objects: Vec::new(),
                has_math: false,
                has_diagram: false,
                confidence: FREE_TEXT_CONFIDENCE,
            });
        }
    };

    let description = ["description", "text"]
        .iter()
        .filter_map(|key| fields.get(*key).and_then(Value::as_str))
        .map(str::trim)
        .find(|text| !text.is_empty())
        .ok_or_else(|| ExtractError::empty(provider))?;

    let objects = fields
        .get("objects")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    Ok(VisionAnalysis {
        description: description.to_string(),
        objects,
        has_math: flag(&fields, "has_math"),
        has_diagram: flag(&fields, "has_diagram"),
        confidence: fields
            .get("confidence")
            .and_then(Value::as_f64)
            .unwrap_or_else(default_confidence)
            .clamp(0.0, 1.0),
    })
}

fn flag(fields: &Map<String, Value>, key: &str) -> bool {
    fields.get(key).and_then(Value::as_bool).unwrap_or(false)
}

fn strip_code_fence(response: &str) -> &str {
    if response.contains("```json") {
        response
            .split("```json")
            .nth(1)
            .and_then(|s| s.split("```").next())
            .unwrap_or(response)
            .trim()
    } else if response.contains("```") {
        response.split("```").nth(1).unwrap_or(response).trim()
    } else {
        response.trim()
    }
}

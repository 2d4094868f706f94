//! Provider ordering, per-request processing options and server settings.
//!
//! Provider config is loaded once at startup, from a JSON file when
//! `PROVIDER_CONFIG_PATH` is set and from individual env vars otherwise. It is
//! read-only afterwards and shared behind `Arc`.

use crate::chain::DEFAULT_CALL_TIMEOUT;
use crate::strategy::ProcessorKind;
use crate::upload::{ImageLimits, DEFAULT_MAX_BYTES};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

const DEFAULT_OCR_ORDER: &str = "mistral_ocr,ocr_space,docling";
const DEFAULT_VISION_ORDER: &str = "openrouter,openai,gemini";

/// One provider slot in a chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderEntry {
    pub id: String,
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
    /// Endpoint override (self-hosted proxy, sidecar URL).
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

impl ProviderEntry {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            api_key: None,
            base_url: None,
            model: None,
            enabled: true,
        }
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// API key, if the entry is enabled and the key is non-blank.
    pub fn credential(&self) -> Option<&str> {
        self.api_key
            .as_deref()
            .filter(|k| self.enabled && !k.trim().is_empty())
    }
}

/// Ordered provider lists for both chains.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default)]
    pub ocr: Vec<ProviderEntry>,
    #[serde(default)]
    pub vision: Vec<ProviderEntry>,
    /// Languages requested from OCR backends that accept a language hint.
    #[serde(default = "default_languages")]
    pub ocr_languages: Vec<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_languages() -> Vec<String> {
    vec!["eng".to_string()]
}

fn default_timeout_secs() -> u64 {
    DEFAULT_CALL_TIMEOUT.as_secs()
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            ocr: Vec::new(),
            vision: Vec::new(),
            ocr_languages: default_languages(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl ProviderConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }

    /// Load from `PROVIDER_CONFIG_PATH` if set, otherwise from env vars.
    pub fn load() -> Result<Self> {
        match std::env::var("PROVIDER_CONFIG_PATH") {
            Ok(path) => Self::load_from_file(Path::new(&path)),
            Err(_) => Ok(Self::from_env()),
        }
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read provider config: {:?}", path))?;
        let config: ProviderConfig = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse provider config: {:?}", path))?;
        info!(
            "Loaded provider config from {:?}: ocr={:?} vision={:?}",
            path,
            config.ocr_ids(),
            config.vision_ids()
        );
        Ok(config)
    }

    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from a key lookup. Order comes from `OCR_PROVIDERS` /
    /// `VISION_PROVIDERS`; each provider then picks up `<ID>_API_KEY`-style
    /// credentials plus optional `<ID>_BASE_URL` and `<ID>_MODEL`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let entries = |list_key: &str, default: &str| -> Vec<ProviderEntry> {
            lookup(list_key)
                .unwrap_or_else(|| default.to_string())
                .split(',')
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .map(|id| entry_from_lookup(id, &lookup))
                .collect()
        };

        let ocr = entries("OCR_PROVIDERS", DEFAULT_OCR_ORDER);
        let vision = entries("VISION_PROVIDERS", DEFAULT_VISION_ORDER);

        let ocr_languages = lookup("OCR_LANGUAGES")
            .map(|s| {
                s.split(',')
                    .map(|l| l.trim().to_string())
                    .filter(|l| !l.is_empty())
                    .collect::<Vec<_>>()
            })
            .filter(|l| !l.is_empty())
            .unwrap_or_else(default_languages);

        let timeout_secs = lookup("PROVIDER_TIMEOUT_SECS")
            .and_then(|s| s.parse().ok())
            .unwrap_or_else(default_timeout_secs);

        Self {
            ocr,
            vision,
            ocr_languages,
            timeout_secs,
        }
    }

    pub fn ocr_ids(&self) -> Vec<&str> {
        self.ocr.iter().map(|e| e.id.as_str()).collect()
    }

    pub fn vision_ids(&self) -> Vec<&str> {
        self.vision.iter().map(|e| e.id.as_str()).collect()
    }
}

/// Env var holding the credential for a provider id.
fn credential_var(id: &str) -> String {
    match id {
        "mistral_ocr" => "MISTRAL_API_KEY".to_string(),
        "docling" => "DOCLING_API_KEY".to_string(),
        other => format!("{}_API_KEY", other.to_uppercase()),
    }
}

fn entry_from_lookup(id: &str, lookup: &impl Fn(&str) -> Option<String>) -> ProviderEntry {
    let prefix = id.to_uppercase();
    // Docling is keyed by its sidecar URL rather than a base-url override.
    let base_url = match id {
        "docling" => lookup("DOCLING_URL"),
        _ => lookup(&format!("{}_BASE_URL", prefix)),
    };
    ProviderEntry {
        id: id.to_string(),
        api_key: lookup(&credential_var(id)),
        base_url,
        model: lookup(&format!("{}_MODEL", prefix)),
        enabled: true,
    }
}

/// Per-request processing options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingConfig {
    /// `None` lets the feature analyzer pick.
    #[serde(default)]
    pub method: Option<ProcessorKind>,
    #[serde(default = "default_true")]
    pub fallback_to_vision: bool,
    #[serde(default)]
    pub limits: ImageLimits,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            method: None,
            fallback_to_vision: true,
            limits: ImageLimits::default(),
        }
    }
}

impl ProcessingConfig {
    pub fn with_method(mut self, method: ProcessorKind) -> Self {
        self.method = Some(method);
        self
    }
}

/// HTTP server settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub request_deadline: Duration,
    pub limits: ImageLimits,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let bind_addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string());

        let request_deadline = std::env::var("REQUEST_DEADLINE_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(60));

        let max_bytes = std::env::var("MAX_IMAGE_BYTES")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_MAX_BYTES);

        let mut limits = ImageLimits {
            max_bytes,
            ..ImageLimits::default()
        };
        if let Ok(formats) = std::env::var("ALLOWED_IMAGE_FORMATS") {
            let parsed: Vec<String> = formats
                .split(',')
                .map(|f| f.trim().to_lowercase())
                .filter(|f| !f.is_empty())
                .collect();
            if !parsed.is_empty() {
                limits.allowed_formats = parsed;
            }
        }

        Self {
            bind_addr,
            request_deadline,
            limits,
        }
    }
}

//! The single record returned for every processing run.

use crate::error::{ExtractError, FailureKind};
use crate::strategy::{ProcessorKind, Strategy};
use crate::vision::VisionAnalysis;
use serde::{Serialize, Serializer};

/// What the run produced. Text and vision payloads are mutually exclusive, and
/// a failure carries no payload at all.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Text {
        text: String,
        provider: String,
        confidence: f64,
    },
    Vision {
        analysis: VisionAnalysis,
        provider: String,
    },
    Failed {
        kind: FailureKind,
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProcessingResult {
    pub method: ProcessorKind,
    pub outcome: Outcome,
    pub processing_time_ms: u64,
    /// Set when the processor was chosen from image features.
    pub strategy: Option<Strategy>,
}

impl ProcessingResult {
    pub fn failed(method: ProcessorKind, error: &ExtractError, processing_time_ms: u64) -> Self {
        Self {
            method,
            outcome: Outcome::Failed {
                kind: error.kind(),
                message: error.to_string(),
            },
            processing_time_ms,
            strategy: None,
        }
    }

    pub fn success(&self) -> bool {
        !matches!(self.outcome, Outcome::Failed { .. })
    }

    /// OCR text, or the vision description when Vision supplied the data.
    pub fn extracted_text(&self) -> Option<&str> {
        match &self.outcome {
            Outcome::Text { text, .. } => Some(text),
            Outcome::Vision { analysis, .. } => Some(&analysis.description),
            Outcome::Failed { .. } => None,
        }
    }

    pub fn vision_analysis(&self) -> Option<&VisionAnalysis> {
        match &self.outcome {
            Outcome::Vision { analysis, .. } => Some(analysis),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match &self.outcome {
            Outcome::Failed { message, .. } => Some(message),
            _ => None,
        }
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match &self.outcome {
            Outcome::Failed { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    pub fn provider(&self) -> Option<&str> {
        match &self.outcome {
            Outcome::Text { provider, .. } | Outcome::Vision { provider, .. } => Some(provider),
            Outcome::Failed { .. } => None,
        }
    }
}

/// Flat wire shape handed to HTTP callers.
#[derive(Serialize)]
struct WireResult<'a> {
    method: ProcessorKind,
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    extracted_text: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    vision_analysis: Option<&'a VisionAnalysis>,
    #[serde(skip_serializing_if = "Option::is_none")]
    provider: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    confidence: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_kind: Option<FailureKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    strategy: Option<Strategy>,
    processing_time_ms: u64,
}

impl Serialize for ProcessingResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let confidence = match &self.outcome {
            Outcome::Text { confidence, .. } => Some(*confidence),
            Outcome::Vision { analysis, .. } => Some(analysis.confidence),
            Outcome::Failed { .. } => None,
        };

        WireResult {
            method: self.method,
            success: self.success(),
            extracted_text: self.extracted_text(),
            vision_analysis: self.vision_analysis(),
            provider: self.provider(),
            confidence,
            error: self.error(),
            error_kind: self.failure_kind(),
            strategy: self.strategy,
            processing_time_ms: self.processing_time_ms,
        }
        .serialize(serializer)
    }
}

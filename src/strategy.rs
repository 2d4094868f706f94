//! Maps image features to a strategy and a processor kind.

use crate::features::ImageFeatures;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    OcrFirst,
    VisionFirst,
    /// Runs exactly like `Adaptive` (sequential OCR then Vision); the name is
    /// kept for compatibility with existing callers.
    Parallel,
    Adaptive,
}

/// Which processor actually runs (and, on a result, which one produced it).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessorKind {
    Ocr,
    Vision,
    Hybrid,
}

impl ProcessorKind {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "ocr" => Some(Self::Ocr),
            "vision" => Some(Self::Vision),
            "hybrid" => Some(Self::Hybrid),
            _ => None,
        }
    }
}

pub fn select_strategy(features: &ImageFeatures) -> Strategy {
    if features.has_text && features.is_high_quality {
        Strategy::OcrFirst
    } else if features.has_complex_content {
        Strategy::VisionFirst
    } else if features.is_uncertain {
        Strategy::Parallel
    } else {
        Strategy::Adaptive
    }
}

pub fn select_processor(strategy: Strategy) -> ProcessorKind {
    match strategy {
        Strategy::OcrFirst => ProcessorKind::Ocr,
        Strategy::VisionFirst => ProcessorKind::Vision,
        Strategy::Parallel | Strategy::Adaptive => ProcessorKind::Hybrid,
    }
}

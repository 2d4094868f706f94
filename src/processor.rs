//! Top-level entry point: validate, pick a processor, drive the chains.
//!
//! Hybrid runs are a two-state machine. OCR is attempted first; if it yields
//! more than [`MIN_OCR_CHARS`] characters the run is done with method `ocr`.
//! Otherwise the Vision chain runs once and its outcome, good or bad, is the
//! final result with method `hybrid`. With `fallback_to_vision` off the OCR
//! outcome is returned as-is and Vision is never attempted.

use crate::chain::Accepted;
use crate::config::ProcessingConfig;
use crate::error::ExtractError;
use crate::features;
use crate::ocr::{OcrChain, OcrText};
use crate::result::{Outcome, ProcessingResult};
use crate::strategy::{self, ProcessorKind, Strategy};
use crate::upload::{validate_image, UploadedImage};
use crate::vision::{VisionAnalysis, VisionChain};
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// OCR text must be longer than this to skip the Vision fallback.
pub const MIN_OCR_CHARS: usize = 10;

/// Owns both chains; safe to share across concurrent requests.
pub struct ImageProcessor {
    ocr: OcrChain,
    vision: VisionChain,
}

impl ImageProcessor {
    pub fn new(ocr: OcrChain, vision: VisionChain) -> Self {
        Self { ocr, vision }
    }

    pub fn ocr_chain(&self) -> &OcrChain {
        &self.ocr
    }

    pub fn vision_chain(&self) -> &VisionChain {
        &self.vision
    }

    /// Always returns a well-formed result; errors are folded into it.
    pub async fn process_image(
        &self,
        image: &UploadedImage,
        config: &ProcessingConfig,
        cancel: &CancellationToken,
    ) -> ProcessingResult {
        let started = Instant::now();

        let report = validate_image(image, &config.limits);
        if let Some(error) = report.error.filter(|_| !report.valid) {
            warn!("Rejected {}: {}", image.filename, error);
            return ProcessingResult::failed(
                config.method.unwrap_or(ProcessorKind::Hybrid),
                &ExtractError::ValidationFailure(error),
                elapsed_ms(started),
            );
        }

        let (kind, strategy) = match config.method {
            Some(kind) => (kind, None),
            None => {
                let features = features::analyze(image);
                let strategy = strategy::select_strategy(&features);
                let kind = strategy::select_processor(strategy);
                info!(
                    "Auto-selected {:?} -> {:?} for {} (aspect {:.2}, {} bytes)",
                    strategy,
                    kind,
                    image.filename,
                    features.aspect_ratio,
                    image.byte_size()
                );
                (kind, Some(strategy))
            }
        };

        let (method, outcome) = match kind {
            ProcessorKind::Ocr => (
                ProcessorKind::Ocr,
                self.ocr.run(image, cancel).await.map(text_outcome),
            ),
            ProcessorKind::Vision => (
                ProcessorKind::Vision,
                self.vision.run(image, cancel).await.map(vision_outcome),
            ),
            ProcessorKind::Hybrid => self.run_hybrid(image, config, cancel).await,
        };

        finish(method, outcome, strategy, started)
    }

    async fn run_hybrid(
        &self,
        image: &UploadedImage,
        config: &ProcessingConfig,
        cancel: &CancellationToken,
    ) -> (ProcessorKind, Result<Outcome, ExtractError>) {
        let ocr = self.ocr.run(image, cancel).await;

        let ocr_note = match &ocr {
            Ok(accepted) => match accepted.output.text.trim().chars().count() {
                chars if chars > MIN_OCR_CHARS => None,
                chars => Some(format!("OCR text too short ({} chars)", chars)),
            },
            Err(ExtractError::Cancelled) => {
                return (ProcessorKind::Hybrid, Err(ExtractError::Cancelled))
            }
            Err(e) => Some(e.to_string()),
        };
        let Some(ocr_note) = ocr_note else {
            return (ProcessorKind::Ocr, ocr.map(text_outcome));
        };

        if !config.fallback_to_vision {
            info!("{}; vision fallback disabled", ocr_note);
            return (ProcessorKind::Ocr, ocr.map(text_outcome));
        }

        info!("{}; falling back to vision", ocr_note);
        (
            ProcessorKind::Hybrid,
            self.vision.run(image, cancel).await.map(vision_outcome),
        )
    }
}

fn text_outcome(accepted: Accepted<OcrText>) -> Outcome {
    Outcome::Text {
        confidence: accepted.output.quality.confidence,
        text: accepted.output.text,
        provider: accepted.provider,
    }
}

fn vision_outcome(accepted: Accepted<VisionAnalysis>) -> Outcome {
    Outcome::Vision {
        analysis: accepted.output,
        provider: accepted.provider,
    }
}

fn finish(
    method: ProcessorKind,
    outcome: Result<Outcome, ExtractError>,
    strategy: Option<Strategy>,
    started: Instant,
) -> ProcessingResult {
    let mut result = match outcome {
        Ok(outcome) => ProcessingResult {
            method,
            outcome,
            processing_time_ms: elapsed_ms(started),
            strategy: None,
        },
        Err(e) => {
            warn!("Processing failed ({:?}): {}", method, e);
            ProcessingResult::failed(method, &e, elapsed_ms(started))
        }
    };
    result.strategy = strategy;
    result
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

//! Heuristic usability score for OCR text.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityTier {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct QualityScore {
    pub quality: QualityTier,
    pub confidence: f64,
}

const MIN_CHARS: usize = 5;
const PUNCTUATION: &str = ".,;:!?'\"()[]{}-_/\\%&@#*+=<>$€£";

/// Letters from the Latin (including accented ranges), Cyrillic and Arabic scripts.
fn is_target_letter(c: char) -> bool {
    c.is_ascii_alphabetic()
        || (c.is_alphabetic()
            && matches!(
                c as u32,
                0x00C0..=0x024F
                    | 0x0400..=0x04FF
                    | 0x0600..=0x06FF
                    | 0x0750..=0x077F
                    | 0x1E00..=0x1EFF
            ))
}

fn is_valid_char(c: char) -> bool {
    is_target_letter(c) || c.is_ascii_digit() || c.is_whitespace() || PUNCTUATION.contains(c)
}

/// Score extracted text by the share of recognisable characters.
///
/// Thresholds are strict: a ratio of exactly 0.9 is `medium`, exactly 0.7 is `low`.
pub fn assess(text: &str) -> QualityScore {
    let total = text.chars().count();
    if total < MIN_CHARS {
        return QualityScore {
            quality: QualityTier::Low,
            confidence: 0.0,
        };
    }

    let valid = text.chars().filter(|c| is_valid_char(*c)).count();
    let ratio = valid as f64 / total as f64;

    let (quality, confidence) = if ratio > 0.9 {
        (QualityTier::High, 0.9)
    } else if ratio > 0.7 {
        (QualityTier::Medium, 0.7)
    } else {
        (QualityTier::Low, 0.5)
    };

    QualityScore {
        quality,
        confidence,
    }
}

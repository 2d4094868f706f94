//! Error taxonomy shared by providers, chains and the processor.

use serde::Serialize;
use thiserror::Error;

/// Every way an extraction attempt can go wrong.
///
/// Provider-level variants never leave a [`crate::chain::FallbackChain`]; they
/// are folded into [`ExtractError::ChainExhausted`] once all providers fail.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ExtractError {
    #[error("provider '{provider}' has no credentials configured")]
    ProviderUnavailable { provider: String },

    #[error("provider '{provider}' failed: {message}")]
    ProviderTransientFailure { provider: String, message: String },

    #[error("provider '{provider}' returned no usable content")]
    ProviderEmptyResult { provider: String },

    #[error("{chain} chain exhausted after {attempts} attempt(s): {last_error}")]
    ChainExhausted {
        chain: &'static str,
        attempts: usize,
        last_error: String,
    },

    #[error("{0}")]
    ValidationFailure(String),

    #[error("processing cancelled")]
    Cancelled,
}

impl ExtractError {
    pub fn transient(provider: &str, err: impl std::fmt::Display) -> Self {
        Self::ProviderTransientFailure {
            provider: provider.to_string(),
            message: format!("{:#}", err),
        }
    }

    pub fn empty(provider: &str) -> Self {
        Self::ProviderEmptyResult {
            provider: provider.to_string(),
        }
    }

    /// Coarse classification surfaced to callers on a failed result.
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::ValidationFailure(_) => FailureKind::Validation,
            Self::Cancelled => FailureKind::Cancelled,
            _ => FailureKind::ChainExhausted,
        }
    }
}

/// Failure classification carried by a failed `ProcessingResult`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Validation,
    ChainExhausted,
    Cancelled,
}

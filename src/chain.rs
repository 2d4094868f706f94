//! Ordered provider fallback, shared by the OCR and Vision chains.

use crate::error::ExtractError;
use crate::upload::UploadedImage;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(15);

/// Whether a provider's output is worth returning to the caller.
pub trait Usable {
    fn is_usable(&self) -> bool;
}

/// Identity and credential state common to every provider adapter.
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;

    /// Whether credentials/endpoint are configured. Checked before any call is made.
    fn is_available(&self) -> bool;
}

/// One step of a chain. Implemented for `dyn OcrProvider` and `dyn VisionProvider`.
#[async_trait::async_trait]
pub trait Link: Provider {
    type Output: Usable + Send;

    async fn run(&self, image: &UploadedImage) -> Result<Self::Output, ExtractError>;
}

/// Output accepted by a chain, tagged with the provider that produced it.
#[derive(Debug, Clone)]
pub struct Accepted<T> {
    pub output: T,
    pub provider: String,
    pub attempts: usize,
}

pub struct FallbackChain<P: Link + ?Sized> {
    label: &'static str,
    providers: Vec<Arc<P>>,
    call_timeout: Duration,
}

impl<P: Link + ?Sized> FallbackChain<P> {
    pub fn new(label: &'static str, providers: Vec<Arc<P>>) -> Self {
        Self {
            label,
            providers,
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn providers(&self) -> &[Arc<P>] {
        &self.providers
    }

    /// Try each provider once, in configured order, and return the first usable
    /// output. Later providers are never called once one is accepted.
    pub async fn run(
        &self,
        image: &UploadedImage,
        cancel: &CancellationToken,
    ) -> Result<Accepted<P::Output>, ExtractError> {
        let mut attempts = 0;
        let mut last_error: Option<ExtractError> = None;
        let mut skipped: Option<ExtractError> = None;

        for (idx, provider) in self.providers.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(ExtractError::Cancelled);
            }

            let name = provider.name().to_string();
            if !provider.is_available() {
                debug!("{} chain: skipping '{}' (not configured)", self.label, name);
                skipped = Some(ExtractError::ProviderUnavailable { provider: name });
                continue;
            }

            attempts += 1;
            info!(
                "{} chain: trying '{}' ({}/{})",
                self.label,
                name,
                idx + 1,
                self.providers.len()
            );

            let call = tokio::time::timeout(self.call_timeout, provider.run(image));
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    warn!("{} chain: cancelled while '{}' was in flight", self.label, name);
                    return Err(ExtractError::Cancelled);
                }
                outcome = call => outcome,
            };

            let err = match outcome {
                Ok(Ok(output)) if output.is_usable() => {
                    info!("{} chain: accepted result from '{}'", self.label, name);
                    return Ok(Accepted {
                        output,
                        provider: name,
                        attempts,
                    });
                }
                Ok(Ok(_)) => ExtractError::empty(&name),
                Ok(Err(ExtractError::Cancelled)) => return Err(ExtractError::Cancelled),
                Ok(Err(e)) => e,
                Err(_) => ExtractError::transient(
                    &name,
                    format!("timed out after {}s", self.call_timeout.as_secs_f64()),
                ),
            };

            warn!("{} chain: {}", self.label, err);
            last_error = Some(err);
        }

        Err(ExtractError::ChainExhausted {
            chain: self.label,
            attempts,
            // A skipped provider never hides the failure of one that was called.
            last_error: last_error
                .or(skipped)
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no providers configured".to_string()),
        })
    }
}

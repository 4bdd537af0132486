//! Model client with throttling, retries, and usage accounting.
//!
//! [`ResilientClient`] wraps any [`LlmProvider`] and is the only
//! [`ModelClient`] the agents talk to in production. Every call first asks
//! the shared [`RateLimiter`] for a slot, then retries failures on the
//! [`RetryPolicy`] schedule. Sleeps race the caller's cancellation token.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::backoff::RetryPolicy;
use super::clock::{Clock, TokioClock};
use super::config::AgentConfig;
use super::message::{ChatRequest, TokenUsage};
use super::provider::LlmProvider;
use super::rate_limit::{RateLimitConfig, RateLimiter, UsageSnapshot};
use crate::error::AgentError;

/// A successful model completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    /// Generated text.
    pub content: String,
    /// Prompt tokens billed for this call.
    pub prompt_tokens: u32,
    /// Response tokens billed for this call.
    pub response_tokens: u32,
    /// Why the model stopped generating, when reported.
    pub finish_reason: Option<String>,
}

impl Completion {
    /// Usage of this completion as a [`TokenUsage`] record.
    #[must_use]
    pub const fn usage(&self) -> TokenUsage {
        TokenUsage {
            prompt_tokens: self.prompt_tokens,
            completion_tokens: self.response_tokens,
            total_tokens: self.prompt_tokens.saturating_add(self.response_tokens),
        }
    }
}

/// What agents use to talk to a model.
///
/// Injected into every agent at construction time so tests can substitute
/// scripted clients.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Sends `request` and returns the completion.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::Cancelled`] if `cancel` fires, or the terminal
    /// error once the client gives up.
    async fn complete(
        &self,
        request: &ChatRequest,
        cancel: &CancellationToken,
    ) -> Result<Completion, AgentError>;
}

/// Rate-limited, retrying [`ModelClient`] over an [`LlmProvider`].
pub struct ResilientClient {
    provider: Arc<dyn LlmProvider>,
    retry: RetryPolicy,
    limiter: RateLimiter,
    clock: Arc<dyn Clock>,
    rng: Mutex<StdRng>,
}

impl ResilientClient {
    /// Creates a client using the wall clock and an entropy-seeded jitter source.
    #[must_use]
    pub fn new(provider: Arc<dyn LlmProvider>, retry: RetryPolicy, rate_limit: RateLimitConfig) -> Self {
        Self {
            provider,
            retry,
            limiter: RateLimiter::new(rate_limit),
            clock: Arc::new(TokioClock),
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Creates a client from the retry and rate-limit sections of `config`.
    #[must_use]
    pub fn from_config(provider: Arc<dyn LlmProvider>, config: &AgentConfig) -> Self {
        Self::new(provider, config.retry, config.rate_limit)
    }

    /// Replaces the time source.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Seeds the jitter source for reproducible schedules.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = Mutex::new(StdRng::seed_from_u64(seed));
        self
    }

    /// Accumulated token usage and window state.
    #[must_use]
    pub fn usage(&self) -> UsageSnapshot {
        self.limiter.snapshot(self.clock.now())
    }

    /// Retry schedule in effect.
    #[must_use]
    pub const fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    fn draw(&self) -> f64 {
        self.rng
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .gen_range(0.0..1.0)
    }

    async fn pause(&self, duration: Duration, cancel: &CancellationToken) -> Result<(), AgentError> {
        if duration.is_zero() {
            return Ok(());
        }
        tokio::select! {
            () = self.clock.sleep(duration) => Ok(()),
            () = cancel.cancelled() => Err(AgentError::Cancelled),
        }
    }
}

impl std::fmt::Debug for ResilientClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilientClient")
            .field("provider", &self.provider.name())
            .field("retry", &self.retry)
            .field("limiter", &self.limiter)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ModelClient for ResilientClient {
    async fn complete(
        &self,
        request: &ChatRequest,
        cancel: &CancellationToken,
    ) -> Result<Completion, AgentError> {
        let mut retries: u32 = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(AgentError::Cancelled);
            }

            let throttle = self.limiter.plan(self.clock.now(), self.draw());
            if !throttle.pressure.is_zero() {
                warn!(
                    pressure_ms = throttle.pressure.as_millis(),
                    jittered = throttle.jittered,
                    "approaching per-minute request cap, throttling"
                );
            }
            self.pause(throttle.wait, cancel).await?;

            let outcome = tokio::select! {
                result = self.provider.chat(request) => result,
                () = cancel.cancelled() => return Err(AgentError::Cancelled),
            };

            let err = match outcome {
                Ok(response) => {
                    self.limiter.record_success(
                        self.clock.now(),
                        response.usage.prompt_tokens,
                        response.usage.completion_tokens,
                    );
                    debug!(
                        model = %request.model,
                        retries,
                        prompt_tokens = response.usage.prompt_tokens,
                        completion_tokens = response.usage.completion_tokens,
                        "model call succeeded"
                    );
                    return Ok(Completion {
                        content: response.content,
                        prompt_tokens: response.usage.prompt_tokens,
                        response_tokens: response.usage.completion_tokens,
                        finish_reason: response.finish_reason,
                    });
                }
                Err(err) => err,
            };

            let rate_limited = err.is_rate_limit();
            if rate_limited {
                self.limiter.record_rate_limited();
            }

            if !self.retry.allows_retry(retries) {
                warn!(attempts = retries + 1, error = %err, "giving up on model call");
                return Err(AgentError::RetriesExhausted {
                    attempts: retries + 1,
                    last: Box::new(err),
                });
            }

            let delay = self.retry.delay_for_retry(retries, self.draw());
            warn!(
                retry = retries + 1,
                max_retries = self.retry.max_retries,
                delay_ms = delay.as_millis(),
                rate_limited,
                error = %err,
                "model call failed, backing off"
            );
            self.pause(delay, cancel).await?;
            retries += 1;
        }
    }
}

//! Sliding-window rate limiter and usage accounting for model calls.
//!
//! One [`RateLimiter`] is shared by every task using the same client. All
//! state lives behind a single mutex that is never held across an await:
//! callers ask for a [`Throttle`] plan, release the lock, and sleep.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::error::AgentError;

/// Length of the sliding window.
pub const WINDOW: Duration = Duration::from_secs(60);

/// Utilization above which callers start backing off.
const SOFT_LIMIT: f64 = 0.80;
/// Utilization above which random jitter is added.
const HARD_LIMIT: f64 = 0.95;
/// Pressure delay at full utilization.
const MAX_PRESSURE_DELAY: Duration = Duration::from_secs(2);
/// Minimum and span of the high-pressure jitter.
const JITTER_MIN: Duration = Duration::from_secs(1);
const JITTER_SPAN: Duration = Duration::from_secs(2);

/// Slowest accepted per-second rate: one call an hour.
pub const MIN_REQUESTS_PER_SECOND: f64 = 1.0 / 3600.0;

/// Per-minute and per-second request caps.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimitConfig {
    /// Maximum calls in any 60-second window.
    pub requests_per_minute: u32,
    /// Maximum calls per second; sets the minimum spacing between calls.
    pub requests_per_second: f64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: 500,
            requests_per_second: 10.0,
        }
    }
}

impl RateLimitConfig {
    /// Checks that both caps are positive and the call spacing is bounded.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::InvalidConfig`] for a zero cap or a per-second
    /// rate below [`MIN_REQUESTS_PER_SECOND`].
    pub fn validate(&self) -> Result<(), AgentError> {
        if self.requests_per_minute == 0 {
            return Err(AgentError::InvalidConfig {
                message: "requests_per_minute must be at least 1".to_string(),
            });
        }
        if !self.requests_per_second.is_finite()
            || self.requests_per_second < MIN_REQUESTS_PER_SECOND
        {
            return Err(AgentError::InvalidConfig {
                message: format!(
                    "requests_per_second must be at least {MIN_REQUESTS_PER_SECOND}, got {}",
                    self.requests_per_second
                ),
            });
        }
        Ok(())
    }

    /// Minimum spacing between consecutive calls.
    #[must_use]
    pub fn min_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.requests_per_second)
    }
}

/// How long a caller must wait before issuing its call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Throttle {
    /// Wait caused by window utilization (including jitter, if any).
    pub pressure: Duration,
    /// Whether high-pressure jitter was applied.
    pub jittered: bool,
    /// Total wait until the reserved call slot.
    pub wait: Duration,
}

/// Point-in-time view of the limiter's accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UsageSnapshot {
    /// Prompt tokens across all successful calls.
    pub total_prompt_tokens: u64,
    /// Response tokens across all successful calls.
    pub total_response_tokens: u64,
    /// Successful calls.
    pub total_calls: u64,
    /// Calls currently inside the sliding window.
    pub calls_in_window: usize,
    /// Current adaptive per-minute capacity.
    pub effective_per_minute: u32,
}

#[derive(Debug)]
struct RateLimiterState {
    recent_calls: VecDeque<Instant>,
    total_prompt_tokens: u64,
    total_response_tokens: u64,
    total_calls: u64,
    next_slot: Option<Instant>,
    effective_per_minute: u32,
}

impl RateLimiterState {
    fn prune(&mut self, now: Instant) {
        while let Some(&oldest) = self.recent_calls.front() {
            if now.saturating_duration_since(oldest) > WINDOW {
                self.recent_calls.pop_front();
            } else {
                break;
            }
        }
    }
}

/// Shared sliding-window limiter with token accounting.
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    state: Mutex<RateLimiterState>,
}

impl RateLimiter {
    /// Creates an empty limiter.
    #[must_use]
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            state: Mutex::new(RateLimiterState {
                recent_calls: VecDeque::new(),
                total_prompt_tokens: 0,
                total_response_tokens: 0,
                total_calls: 0,
                next_slot: None,
                effective_per_minute: config.requests_per_minute,
            }),
        }
    }

    /// Limiter configuration.
    #[must_use]
    pub const fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, RateLimiterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Plans the wait before the next call and reserves its slot.
    ///
    /// `jitter_draw` in `[0, 1)` selects the high-pressure jitter within
    /// 1–3 seconds; it is ignored unless utilization exceeds 95%. The slot
    /// reservation keeps concurrent callers at least
    /// [`RateLimitConfig::min_interval`] apart.
    pub fn plan(&self, now: Instant, jitter_draw: f64) -> Throttle {
        let mut state = self.lock();
        state.prune(now);

        let capacity = f64::from(state.effective_per_minute.max(1));
        #[allow(clippy::cast_precision_loss)]
        let utilization = state.recent_calls.len() as f64 / capacity;

        let mut pressure = Duration::ZERO;
        let mut jittered = false;
        if utilization > SOFT_LIMIT {
            let scale = ((utilization - SOFT_LIMIT) / (1.0 - SOFT_LIMIT)).min(1.0);
            pressure = MAX_PRESSURE_DELAY.mul_f64(scale);
            if utilization > HARD_LIMIT {
                pressure += JITTER_MIN + JITTER_SPAN.mul_f64(jitter_draw.clamp(0.0, 1.0));
                jittered = true;
            }
        }

        let earliest = now + pressure;
        let slot = state.next_slot.map_or(earliest, |next| next.max(earliest));
        state.next_slot = Some(slot + self.config.min_interval());
        drop(state);

        Throttle {
            pressure,
            jittered,
            wait: slot.saturating_duration_since(now),
        }
    }

    /// Records a successful call: tokens, timestamp, and capacity recovery.
    pub fn record_success(&self, now: Instant, prompt_tokens: u32, response_tokens: u32) {
        let mut state = self.lock();
        state.total_prompt_tokens = state
            .total_prompt_tokens
            .saturating_add(u64::from(prompt_tokens));
        state.total_response_tokens = state
            .total_response_tokens
            .saturating_add(u64::from(response_tokens));
        state.total_calls = state.total_calls.saturating_add(1);
        state.recent_calls.push_back(now);
        state.prune(now);
        if state.effective_per_minute < self.config.requests_per_minute {
            state.effective_per_minute += 1;
        }
    }

    /// Shrinks the effective per-minute capacity by a quarter after the
    /// provider signalled throttling.
    pub fn record_rate_limited(&self) {
        let mut state = self.lock();
        let shrunk = state.effective_per_minute.saturating_mul(3) / 4;
        state.effective_per_minute = shrunk.max(1);
    }

    /// Returns the current accounting after pruning the window at `now`.
    pub fn snapshot(&self, now: Instant) -> UsageSnapshot {
        let mut state = self.lock();
        state.prune(now);
        UsageSnapshot {
            total_prompt_tokens: state.total_prompt_tokens,
            total_response_tokens: state.total_response_tokens,
            total_calls: state.total_calls,
            calls_in_window: state.recent_calls.len(),
            effective_per_minute: state.effective_per_minute,
        }
    }
}

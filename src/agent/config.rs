//! Agent configuration with builder pattern and environment variable support.
//!
//! Configuration is resolved in order: explicit values → environment variables → defaults.

use std::path::PathBuf;
use std::time::Duration;

use tracing::warn;

use super::backoff::RetryPolicy;
use super::rate_limit::RateLimitConfig;
use crate::error::AgentError;

/// Default model for every agent.
const DEFAULT_MODEL: &str = "gpt-4o-mini";
/// Default OpenAI-compatible endpoint.
const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
/// Default selector max tokens.
const DEFAULT_SELECTOR_MAX_TOKENS: u32 = 1024;
/// Default decomposer max tokens. Decomposition answers carry sub-questions
/// and intermediate SQL before the final statement.
const DEFAULT_DECOMPOSER_MAX_TOKENS: u32 = 2048;
/// Default refiner max tokens.
const DEFAULT_REFINER_MAX_TOKENS: u32 = 1024;
/// Default request timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 120;
/// Default max retries per model call.
const DEFAULT_MAX_RETRIES: u32 = 8;
/// Default first backoff delay in milliseconds.
const DEFAULT_INITIAL_BACKOFF_MS: u64 = 1_000;
/// Default backoff multiplier.
const DEFAULT_BACKOFF_FACTOR: f64 = 2.0;
/// Default backoff cap in seconds.
const DEFAULT_MAX_BACKOFF_SECS: u64 = 120;
/// Default per-minute request cap.
const DEFAULT_REQUESTS_PER_MINUTE: u32 = 500;
/// Default per-second request cap.
const DEFAULT_REQUESTS_PER_SECOND: f64 = 10.0;
/// Default orchestrator round budget: selector, decomposer, and one refiner
/// round per repair attempt plus the initial execution.
const DEFAULT_MAX_ROUNDS: u32 = 6;
/// Default repair attempts per item.
const DEFAULT_MAX_REPAIR_ATTEMPTS: u32 = 3;
/// Rounds spent outside the repair loop.
const FIXED_ROUNDS: u32 = 3;
/// Default statement timeout in seconds.
pub const DEFAULT_STATEMENT_TIMEOUT_SECS: u64 = 30;
/// Default pool acquire timeout in seconds.
pub const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 10;
/// Default connections per database.
pub const DEFAULT_POOL_SIZE: usize = 4;
/// Default concurrent work items during batch evaluation.
const DEFAULT_MAX_CONCURRENCY: usize = 8;

/// Configuration for the agent pipeline and its model client.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// LLM provider name (e.g., "openai").
    pub provider: String,
    /// API key for the provider.
    pub api_key: String,
    /// Base URL of the OpenAI-compatible endpoint.
    pub base_url: String,
    /// Model for the selector (schema pruning) agent.
    pub selector_model: String,
    /// Model for the decomposer (SQL synthesis) agent.
    pub decomposer_model: String,
    /// Model for the refiner (repair) agent.
    pub refiner_model: String,
    /// Maximum tokens for selector responses.
    pub selector_max_tokens: u32,
    /// Maximum tokens for decomposer responses.
    pub decomposer_max_tokens: u32,
    /// Maximum tokens for refiner responses.
    pub refiner_max_tokens: u32,
    /// HTTP request timeout.
    pub timeout: Duration,
    /// Retry and backoff schedule for model calls.
    pub retry: RetryPolicy,
    /// Sliding-window throttling for model calls.
    pub rate_limit: RateLimitConfig,
    /// Orchestrator round budget per item.
    pub max_rounds: u32,
    /// Maximum repair attempts per item.
    pub max_repair_attempts: u32,
    /// Per-statement execution timeout.
    pub statement_timeout: Duration,
    /// Maximum wait for a pooled connection.
    pub acquire_timeout: Duration,
    /// Connections per database.
    pub pool_size: usize,
    /// Concurrent work items during batch evaluation.
    pub max_concurrency: usize,
    /// Directory containing prompt template files.
    ///
    /// When set, system prompts are loaded from markdown files in this
    /// directory, falling back to compiled-in defaults for missing files.
    pub prompt_dir: Option<PathBuf>,
}

impl AgentConfig {
    /// Creates a new builder for `AgentConfig`.
    #[must_use]
    pub fn builder() -> AgentConfigBuilder {
        AgentConfigBuilder::default()
    }

    /// Creates configuration from environment variables with defaults.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::ApiKeyMissing`] if no API key is found.
    pub fn from_env() -> Result<Self, AgentError> {
        Self::builder().from_env().build()
    }
}

/// Builder for [`AgentConfig`].
#[derive(Debug, Clone, Default)]
pub struct AgentConfigBuilder {
    provider: Option<String>,
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    selector_model: Option<String>,
    decomposer_model: Option<String>,
    refiner_model: Option<String>,
    timeout: Option<Duration>,
    max_retries: Option<u32>,
    initial_backoff: Option<Duration>,
    backoff_factor: Option<f64>,
    max_backoff: Option<Duration>,
    requests_per_minute: Option<u32>,
    requests_per_second: Option<f64>,
    max_rounds: Option<u32>,
    max_repair_attempts: Option<u32>,
    statement_timeout: Option<Duration>,
    acquire_timeout: Option<Duration>,
    pool_size: Option<usize>,
    max_concurrency: Option<usize>,
    prompt_dir: Option<PathBuf>,
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

impl AgentConfigBuilder {
    /// Populates unset fields from environment variables.
    #[must_use]
    pub fn from_env(mut self) -> Self {
        if self.provider.is_none() {
            self.provider = std::env::var("SQLWRIGHT_PROVIDER").ok();
        }
        if self.api_key.is_none() {
            self.api_key = std::env::var("SQLWRIGHT_API_KEY")
                .or_else(|_| std::env::var("OPENAI_API_KEY"))
                .ok();
        }
        if self.base_url.is_none() {
            self.base_url = std::env::var("SQLWRIGHT_BASE_URL")
                .or_else(|_| std::env::var("OPENAI_BASE_URL"))
                .ok();
        }
        if self.model.is_none() {
            self.model = std::env::var("SQLWRIGHT_MODEL").ok();
        }
        if self.max_retries.is_none() {
            self.max_retries = env_parse("SQLWRIGHT_MAX_RETRIES");
        }
        if self.requests_per_minute.is_none() {
            self.requests_per_minute = env_parse("SQLWRIGHT_REQUESTS_PER_MINUTE");
        }
        if self.requests_per_second.is_none() {
            self.requests_per_second = env_parse("SQLWRIGHT_REQUESTS_PER_SECOND");
        }
        if self.max_rounds.is_none() {
            self.max_rounds = env_parse("SQLWRIGHT_MAX_ROUNDS");
        }
        if self.max_repair_attempts.is_none() {
            self.max_repair_attempts = env_parse("SQLWRIGHT_MAX_REPAIR_ATTEMPTS");
        }
        if self.prompt_dir.is_none() {
            self.prompt_dir = std::env::var("SQLWRIGHT_PROMPT_DIR")
                .ok()
                .map(PathBuf::from);
        }
        self
    }

    /// Sets the LLM provider name.
    #[must_use]
    pub fn provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    /// Sets the API key.
    #[must_use]
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Sets the base URL override.
    #[must_use]
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Sets the model shared by all agents unless overridden per agent.
    #[must_use]
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Sets the selector model.
    #[must_use]
    pub fn selector_model(mut self, model: impl Into<String>) -> Self {
        self.selector_model = Some(model.into());
        self
    }

    /// Sets the decomposer model.
    #[must_use]
    pub fn decomposer_model(mut self, model: impl Into<String>) -> Self {
        self.decomposer_model = Some(model.into());
        self
    }

    /// Sets the refiner model.
    #[must_use]
    pub fn refiner_model(mut self, model: impl Into<String>) -> Self {
        self.refiner_model = Some(model.into());
        self
    }

    /// Sets the request timeout.
    #[must_use]
    pub const fn timeout(mut self, duration: Duration) -> Self {
        self.timeout = Some(duration);
        self
    }

    /// Sets the max retries per model call.
    #[must_use]
    pub const fn max_retries(mut self, n: u32) -> Self {
        self.max_retries = Some(n);
        self
    }

    /// Sets the first backoff delay.
    #[must_use]
    pub const fn initial_backoff(mut self, delay: Duration) -> Self {
        self.initial_backoff = Some(delay);
        self
    }

    /// Sets the backoff multiplier (must be between 2 and 3).
    #[must_use]
    pub const fn backoff_factor(mut self, factor: f64) -> Self {
        self.backoff_factor = Some(factor);
        self
    }

    /// Sets the backoff cap.
    #[must_use]
    pub const fn max_backoff(mut self, delay: Duration) -> Self {
        self.max_backoff = Some(delay);
        self
    }

    /// Sets the per-minute request cap.
    #[must_use]
    pub const fn requests_per_minute(mut self, n: u32) -> Self {
        self.requests_per_minute = Some(n);
        self
    }

    /// Sets the per-second request cap.
    #[must_use]
    pub const fn requests_per_second(mut self, n: f64) -> Self {
        self.requests_per_second = Some(n);
        self
    }

    /// Sets the orchestrator round budget.
    #[must_use]
    pub const fn max_rounds(mut self, n: u32) -> Self {
        self.max_rounds = Some(n);
        self
    }

    /// Sets the maximum repair attempts per item.
    #[must_use]
    pub const fn max_repair_attempts(mut self, n: u32) -> Self {
        self.max_repair_attempts = Some(n);
        self
    }

    /// Sets the statement timeout.
    #[must_use]
    pub const fn statement_timeout(mut self, duration: Duration) -> Self {
        self.statement_timeout = Some(duration);
        self
    }

    /// Sets the pool acquire timeout.
    #[must_use]
    pub const fn acquire_timeout(mut self, duration: Duration) -> Self {
        self.acquire_timeout = Some(duration);
        self
    }

    /// Sets the number of connections per database.
    #[must_use]
    pub const fn pool_size(mut self, n: usize) -> Self {
        self.pool_size = Some(n);
        self
    }

    /// Sets the batch evaluation concurrency.
    #[must_use]
    pub const fn max_concurrency(mut self, n: usize) -> Self {
        self.max_concurrency = Some(n);
        self
    }

    /// Sets the prompt template directory.
    #[must_use]
    pub fn prompt_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.prompt_dir = Some(dir.into());
        self
    }

    /// Builds the [`AgentConfig`].
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::ApiKeyMissing`] if no API key was set, or
    /// [`AgentError::InvalidConfig`] if a numeric setting is out of range.
    pub fn build(self) -> Result<AgentConfig, AgentError> {
        let api_key = self.api_key.ok_or(AgentError::ApiKeyMissing)?;
        let model = self.model.unwrap_or_else(|| DEFAULT_MODEL.to_string());

        let retry = RetryPolicy {
            max_retries: self.max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
            initial_delay: self
                .initial_backoff
                .unwrap_or(Duration::from_millis(DEFAULT_INITIAL_BACKOFF_MS)),
            factor: self.backoff_factor.unwrap_or(DEFAULT_BACKOFF_FACTOR),
            max_delay: self
                .max_backoff
                .unwrap_or(Duration::from_secs(DEFAULT_MAX_BACKOFF_SECS)),
        };
        retry.validate()?;

        let rate_limit = RateLimitConfig {
            requests_per_minute: self
                .requests_per_minute
                .unwrap_or(DEFAULT_REQUESTS_PER_MINUTE),
            requests_per_second: self
                .requests_per_second
                .unwrap_or(DEFAULT_REQUESTS_PER_SECOND),
        };
        rate_limit.validate()?;

        let max_rounds = self.max_rounds.unwrap_or(DEFAULT_MAX_ROUNDS);
        if max_rounds == 0 {
            return Err(AgentError::InvalidConfig {
                message: "max_rounds must be at least 1".to_string(),
            });
        }
        let max_repair_attempts = self
            .max_repair_attempts
            .unwrap_or(DEFAULT_MAX_REPAIR_ATTEMPTS);
        // Selector, decomposer, first execution, then one round per repair.
        let needed_rounds = max_repair_attempts.saturating_add(FIXED_ROUNDS);
        let max_rounds = if max_rounds < needed_rounds {
            warn!(
                max_rounds,
                max_repair_attempts,
                raised_to = needed_rounds,
                "round budget too small for the repair budget, raising it"
            );
            needed_rounds
        } else {
            max_rounds
        };

        let pool_size = self.pool_size.unwrap_or(DEFAULT_POOL_SIZE);
        if pool_size == 0 {
            return Err(AgentError::InvalidConfig {
                message: "pool_size must be at least 1".to_string(),
            });
        }

        Ok(AgentConfig {
            provider: self.provider.unwrap_or_else(|| "openai".to_string()),
            api_key,
            base_url: self
                .base_url
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            selector_model: self.selector_model.unwrap_or_else(|| model.clone()),
            decomposer_model: self.decomposer_model.unwrap_or_else(|| model.clone()),
            refiner_model: self.refiner_model.unwrap_or(model),
            selector_max_tokens: DEFAULT_SELECTOR_MAX_TOKENS,
            decomposer_max_tokens: DEFAULT_DECOMPOSER_MAX_TOKENS,
            refiner_max_tokens: DEFAULT_REFINER_MAX_TOKENS,
            timeout: self
                .timeout
                .unwrap_or(Duration::from_secs(DEFAULT_TIMEOUT_SECS)),
            retry,
            rate_limit,
            max_rounds,
            max_repair_attempts,
            statement_timeout: self
                .statement_timeout
                .unwrap_or(Duration::from_secs(DEFAULT_STATEMENT_TIMEOUT_SECS)),
            acquire_timeout: self
                .acquire_timeout
                .unwrap_or(Duration::from_secs(DEFAULT_ACQUIRE_TIMEOUT_SECS)),
            pool_size,
            max_concurrency: self
                .max_concurrency
                .unwrap_or(DEFAULT_MAX_CONCURRENCY)
                .max(1),
            prompt_dir: self.prompt_dir,
        })
    }
}

//! Error types for sqlwright.
//!
//! Each layer owns a `thiserror` enum: [`AgentError`] for the model client
//! and agent pipeline, [`DbError`] for connection pooling and query
//! execution, and [`CommandError`] for the CLI. [`Error`] unifies them for
//! callers that cross layers.

use thiserror::Error;

/// Convenience alias used by the CLI layer.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type.
#[derive(Debug, Error)]
pub enum Error {
    /// Agent or model client failure.
    #[error(transparent)]
    Agent(#[from] AgentError),

    /// Database failure.
    #[error(transparent)]
    Db(#[from] DbError),

    /// CLI command failure.
    #[error(transparent)]
    Command(#[from] CommandError),

    /// I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by the model client and the agent pipeline.
#[derive(Debug, Clone, Error)]
pub enum AgentError {
    /// No API key was configured.
    #[error("API key missing: set SQLWRIGHT_API_KEY or OPENAI_API_KEY")]
    ApiKeyMissing,

    /// The configured provider name is unknown.
    #[error("unsupported provider: {name}")]
    UnsupportedProvider {
        /// Provider name that was requested.
        name: String,
    },

    /// A configuration value is out of range.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Description of the invalid setting.
        message: String,
    },

    /// The model endpoint returned an error or could not be reached.
    #[error("API request failed{}: {message}", status_suffix(.status))]
    ApiRequest {
        /// Error description.
        message: String,
        /// HTTP status code, when the server answered.
        status: Option<u16>,
    },

    /// Every retry was spent without a successful response.
    #[error("model call failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        /// Total attempts made (initial call plus retries).
        attempts: u32,
        /// The error returned by the final attempt.
        last: Box<AgentError>,
    },

    /// The model response could not be interpreted.
    #[error("failed to parse model response: {message}")]
    ResponseParse {
        /// What went wrong.
        message: String,
        /// Raw response content.
        content: String,
    },

    /// The caller cancelled the operation.
    #[error("operation cancelled")]
    Cancelled,

    /// A pipeline-level failure outside the model call.
    #[error("orchestration error: {message}")]
    Orchestration {
        /// Error description.
        message: String,
    },
}

impl AgentError {
    /// Returns true when the error signals that the provider is throttling us.
    ///
    /// Matches HTTP 429 as well as transport messages carrying a known
    /// rate-limit signature (some proxies answer 200/500 with a throttling body).
    #[must_use]
    pub fn is_rate_limit(&self) -> bool {
        const SIGNATURES: &[&str] = &[
            "rate limit",
            "rate_limit",
            "ratelimit",
            "too many requests",
            "requests per min",
            "tokens per min",
            "quota exceeded",
        ];

        match self {
            Self::ApiRequest { status: Some(429), .. } => true,
            Self::ApiRequest { message, .. } => {
                let lower = message.to_lowercase();
                SIGNATURES.iter().any(|sig| lower.contains(sig))
            }
            Self::RetriesExhausted { last, .. } => last.is_rate_limit(),
            _ => false,
        }
    }
}

#[allow(clippy::ref_option)]
fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" (HTTP {s})")).unwrap_or_default()
}

/// Errors raised by the connection pool, schema store, and query execution.
#[derive(Debug, Clone, Error)]
pub enum DbError {
    /// No database file exists for the identifier.
    #[error("database not found: {database_id}")]
    NotFound {
        /// Database identifier that was requested.
        database_id: String,
    },

    /// No connection became available before the acquire timeout.
    #[error("connection pool exhausted for {database_id} (waited {waited_ms} ms)")]
    PoolExhausted {
        /// Database identifier.
        database_id: String,
        /// How long the caller waited.
        waited_ms: u64,
    },

    /// The database file could not be opened.
    #[error("failed to open {database_id}: {message}")]
    Open {
        /// Database identifier.
        database_id: String,
        /// Underlying error text.
        message: String,
    },

    /// The SQL statement failed.
    #[error("{message}")]
    Execution {
        /// Engine error text, fed verbatim into repair prompts.
        message: String,
    },

    /// The statement exceeded the configured timeout and was interrupted.
    #[error("statement timed out after {timeout_ms} ms")]
    Timeout {
        /// Configured timeout.
        timeout_ms: u64,
    },

    /// A blocking task panicked or was aborted.
    #[error("blocking task failed: {message}")]
    Join {
        /// Join error text.
        message: String,
    },
}

/// Errors raised by CLI commands.
#[derive(Debug, Error)]
pub enum CommandError {
    /// The command could not run.
    #[error("command failed: {0}")]
    ExecutionFailed(String),

    /// Input file could not be read or parsed.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Output could not be formatted.
    #[error("output formatting failed: {0}")]
    OutputFormat(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limit_by_status() {
        let err = AgentError::ApiRequest {
            message: "slow down".to_string(),
            status: Some(429),
        };
        assert!(err.is_rate_limit());
    }

    #[test]
    fn test_rate_limit_by_signature() {
        let err = AgentError::ApiRequest {
            message: "Error: Rate limit reached for requests".to_string(),
            status: Some(500),
        };
        assert!(err.is_rate_limit());
    }

    #[test]
    fn test_generic_error_not_rate_limit() {
        let err = AgentError::ApiRequest {
            message: "bad gateway".to_string(),
            status: Some(502),
        };
        assert!(!err.is_rate_limit());
        assert!(!AgentError::Cancelled.is_rate_limit());
    }

    #[test]
    fn test_api_request_display_includes_status() {
        let err = AgentError::ApiRequest {
            message: "boom".to_string(),
            status: Some(503),
        };
        assert_eq!(err.to_string(), "API request failed (HTTP 503): boom");
    }

    #[test]
    fn test_execution_error_display_is_verbatim() {
        let err = DbError::Execution {
            message: "no such table: users".to_string(),
        };
        assert_eq!(err.to_string(), "no such table: users");
    }
}

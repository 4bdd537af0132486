//! Provider registry and factory.
//!
//! Maps provider names to concrete [`LlmProvider`] implementations and wraps
//! them in the [`ResilientClient`] the agents share.

use std::sync::Arc;

use crate::agent::config::AgentConfig;
use crate::agent::provider::LlmProvider;
use crate::agent::providers::OpenAiProvider;
use crate::agent::resilient::ResilientClient;
use crate::error::AgentError;

/// Creates an [`LlmProvider`] based on the configured provider name.
///
/// # Supported Providers
///
/// - `"openai"` (default): any OpenAI-compatible chat completions endpoint
///
/// # Errors
///
/// Returns [`AgentError::UnsupportedProvider`] for unknown provider names.
pub fn create_provider(config: &AgentConfig) -> Result<Arc<dyn LlmProvider>, AgentError> {
    match config.provider.as_str() {
        "openai" => Ok(Arc::new(OpenAiProvider::new(config)?)),
        other => Err(AgentError::UnsupportedProvider {
            name: other.to_string(),
        }),
    }
}

/// Creates the shared, rate-limited model client for `config`.
///
/// # Errors
///
/// Propagates provider construction failures.
pub fn create_client(config: &AgentConfig) -> Result<Arc<ResilientClient>, AgentError> {
    let provider = create_provider(config)?;
    Ok(Arc::new(ResilientClient::from_config(provider, config)))
}

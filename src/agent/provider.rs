//! Pluggable LLM provider trait.
//!
//! Implementations translate provider-agnostic [`ChatRequest`]/[`ChatResponse`]
//! into a single transport call. Retries, throttling, and accounting are not
//! the provider's job; [`ResilientClient`](super::resilient::ResilientClient)
//! layers them on top of any provider.

use async_trait::async_trait;

use super::message::{ChatRequest, ChatResponse};
use crate::error::AgentError;

/// Trait for LLM provider backends.
///
/// A provider performs exactly one request per [`LlmProvider::chat`] call
/// and reports failures as [`AgentError::ApiRequest`] with the HTTP status
/// when one is available, so the caller can classify rate limiting.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider name (e.g., `"openai"`).
    fn name(&self) -> &'static str;

    /// Executes a chat completion request.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError`] on API failures, timeouts, or parse errors.
    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, AgentError>;
}

//! `OpenAI` provider implementation over plain HTTP.
//!
//! Supports any `OpenAI`-compatible API (`OpenAI`, Azure, local proxies)
//! via the base URL in [`AgentConfig`]. Talking to the endpoint directly
//! keeps the HTTP status of failures, which the retry layer needs to tell
//! throttling apart from other errors.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::agent::config::AgentConfig;
use crate::agent::message::{ChatMessage, ChatRequest, ChatResponse, TokenUsage};
use crate::agent::provider::LlmProvider;
use crate::error::AgentError;

/// Longest error body carried into an error message.
const ERROR_BODY_LIMIT: usize = 512;

/// `OpenAI`-compatible LLM provider.
pub struct OpenAiProvider {
    http: reqwest::Client,
    api_key: String,
    endpoint: String,
}

#[derive(Debug, Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    #[serde(default)]
    choices: Vec<WireChoice>,
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: WireMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
    total_tokens: Option<u32>,
}

impl OpenAiProvider {
    /// Creates a new provider from agent configuration.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::InvalidConfig`] if the HTTP client cannot be built.
    pub fn new(config: &AgentConfig) -> Result<Self, AgentError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| AgentError::InvalidConfig {
                message: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            http,
            api_key: config.api_key.clone(),
            endpoint: Self::endpoint(&config.base_url),
        })
    }

    fn endpoint(base_url: &str) -> String {
        format!("{}/chat/completions", base_url.trim_end_matches('/'))
    }

    fn build_request(request: &ChatRequest) -> WireRequest<'_> {
        WireRequest {
            model: &request.model,
            messages: &request.messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        }
    }

    fn parse_response(body: &str) -> Result<ChatResponse, AgentError> {
        let wire: WireResponse =
            serde_json::from_str(body).map_err(|e| AgentError::ResponseParse {
                message: e.to_string(),
                content: truncate(body),
            })?;

        let choice = wire.choices.into_iter().next();
        let finish_reason = choice.as_ref().and_then(|c| c.finish_reason.clone());
        let content = choice
            .and_then(|c| c.message.content)
            .unwrap_or_default();

        let usage = wire.usage.map_or_else(TokenUsage::default, |u| TokenUsage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u
                .total_tokens
                .unwrap_or_else(|| u.prompt_tokens.saturating_add(u.completion_tokens)),
        });

        Ok(ChatResponse {
            content,
            usage,
            finish_reason,
        })
    }
}

fn truncate(body: &str) -> String {
    if body.len() <= ERROR_BODY_LIMIT {
        return body.to_string();
    }
    let mut end = ERROR_BODY_LIMIT;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &body[..end])
}

impl std::fmt::Debug for OpenAiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiProvider")
            .field("endpoint", &self.endpoint)
            .field("api_key", &"<redacted>")
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &'static str {
        "openai"
    }

    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, AgentError> {
        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&Self::build_request(request))
            .send()
            .await
            .map_err(|e| AgentError::ApiRequest {
                message: e.to_string(),
                status: e.status().map(|s| s.as_u16()),
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| AgentError::ApiRequest {
            message: format!("failed to read response body: {e}"),
            status: Some(status.as_u16()),
        })?;

        if !status.is_success() {
            return Err(AgentError::ApiRequest {
                message: truncate(body.trim()),
                status: Some(status.as_u16()),
            });
        }

        Self::parse_response(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::message;

    #[test]
    fn test_endpoint_strips_trailing_slash() {
        assert_eq!(
            OpenAiProvider::endpoint("http://localhost:8080/v1/"),
            "http://localhost:8080/v1/chat/completions"
        );
    }

    #[test]
    fn test_build_request_omits_unset_fields() {
        let request = ChatRequest {
            model: "gpt-4o-mini".to_string(),
            messages: vec![message::system_message("sys"), message::user_message("q")],
            temperature: None,
            max_tokens: Some(64),
        };
        let json = serde_json::to_value(OpenAiProvider::build_request(&request))
            .unwrap_or_default();
        assert_eq!(json["model"], "gpt-4o-mini");
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["content"], "q");
        assert_eq!(json["max_tokens"], 64);
        assert!(json.get("temperature").is_none());
    }

    #[test]
    fn test_parse_response() {
        let body = r#"{
            "choices": [{"message": {"role": "assistant", "content": "SELECT 1"}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 12, "completion_tokens": 3, "total_tokens": 15}
        }"#;
        let parsed = OpenAiProvider::parse_response(body).unwrap_or_else(|_| unreachable!());
        assert_eq!(parsed.content, "SELECT 1");
        assert_eq!(parsed.usage.prompt_tokens, 12);
        assert_eq!(parsed.usage.completion_tokens, 3);
        assert_eq!(parsed.finish_reason.as_deref(), Some("stop"));
    }

    #[test]
    fn test_parse_response_without_usage() {
        let body = r#"{"choices": [{"message": {"content": null}, "finish_reason": "length"}]}"#;
        let parsed = OpenAiProvider::parse_response(body).unwrap_or_else(|_| unreachable!());
        assert!(parsed.content.is_empty());
        assert_eq!(parsed.usage, TokenUsage::default());
    }

    #[test]
    fn test_parse_response_rejects_garbage() {
        let result = OpenAiProvider::parse_response("<html>bad gateway</html>");
        assert!(matches!(result, Err(AgentError::ResponseParse { .. })));
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        let long = "é".repeat(ERROR_BODY_LIMIT);
        let cut = truncate(&long);
        assert!(cut.ends_with('…'));
        assert!(cut.len() <= ERROR_BODY_LIMIT + '…'.len_utf8());
    }
}

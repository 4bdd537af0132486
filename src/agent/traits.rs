//! Agent trait definition.
//!
//! All agents (selector, decomposer, refiner) implement this trait, which
//! gives the orchestrator a uniform way to hand them the work item.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::message::{ChatRequest, system_message, user_message};
use super::resilient::{Completion, ModelClient};
use super::work_item::{Route, WorkItem};
use crate::error::AgentError;

/// Trait implemented by all agents in the pipeline.
///
/// An agent reads the fields it needs from the [`WorkItem`], writes its
/// outputs, and sets `item.route` to the next agent. Failures other than
/// cancellation are recorded on the item rather than returned.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Agent name for logging and identification.
    fn name(&self) -> &'static str;

    /// The route this agent serves.
    fn route(&self) -> Route;

    /// Processes the item for one round.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::Cancelled`] if `cancel` fires mid-round.
    async fn process(&self, item: &mut WorkItem, cancel: &CancellationToken)
    -> Result<(), AgentError>;
}

/// The model half of an agent: which model it calls and how.
#[derive(Clone)]
pub struct AgentModel {
    client: Arc<dyn ModelClient>,
    model: String,
    system_prompt: String,
    temperature: f32,
    max_tokens: u32,
}

impl AgentModel {
    /// Creates a model binding with temperature 0.
    #[must_use]
    pub fn new(
        client: Arc<dyn ModelClient>,
        model: impl Into<String>,
        system_prompt: impl Into<String>,
        max_tokens: u32,
    ) -> Self {
        Self {
            client,
            model: model.into(),
            system_prompt: system_prompt.into(),
            temperature: 0.0,
            max_tokens,
        }
    }

    /// Sets the sampling temperature.
    #[must_use]
    pub const fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Model identifier.
    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    /// System prompt.
    #[must_use]
    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    /// Sends the system prompt plus `user_msg` and returns the completion.
    ///
    /// # Errors
    ///
    /// Returns whatever the underlying [`ModelClient`] returns.
    pub async fn ask(
        &self,
        user_msg: &str,
        cancel: &CancellationToken,
    ) -> Result<Completion, AgentError> {
        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![system_message(&self.system_prompt), user_message(user_msg)],
            temperature: Some(self.temperature),
            max_tokens: Some(self.max_tokens),
        };
        self.client.complete(&request, cancel).await
    }
}

impl std::fmt::Debug for AgentModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentModel")
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted model client shared by agent unit tests.

    use std::collections::VecDeque;
    use std::sync::Mutex;

    use super::*;

    /// Replays scripted completions and records every request.
    #[derive(Default)]
    pub(crate) struct ScriptedClient {
        replies: Mutex<VecDeque<Result<Completion, AgentError>>>,
        requests: Mutex<Vec<ChatRequest>>,
    }

    impl ScriptedClient {
        pub(crate) fn new(replies: Vec<Result<Completion, AgentError>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                requests: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn reply(content: &str) -> Result<Completion, AgentError> {
            Ok(Completion {
                content: content.to_string(),
                prompt_tokens: 10,
                response_tokens: 5,
                finish_reason: Some("stop".to_string()),
            })
        }

        pub(crate) fn requests(&self) -> Vec<ChatRequest> {
            self.requests
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .clone()
        }
    }

    #[async_trait]
    impl ModelClient for ScriptedClient {
        async fn complete(
            &self,
            request: &ChatRequest,
            _cancel: &CancellationToken,
        ) -> Result<Completion, AgentError> {
            self.requests
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .push(request.clone());
            self.replies
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .pop_front()
                .unwrap_or_else(|| {
                    Err(AgentError::RetriesExhausted {
                        attempts: 1,
                        last: Box::new(AgentError::ApiRequest {
                            message: "script exhausted".to_string(),
                            status: Some(500),
                        }),
                    })
                })
        }
    }
}

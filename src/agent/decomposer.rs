//! Decomposer agent: writes the candidate SQL.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::config::AgentConfig;
use super::extract::extract_sql;
use super::prompt::{DecomposeStyle, SchemaContext, build_decomposer_prompt};
use super::resilient::ModelClient;
use super::traits::{Agent, AgentModel};
use super::work_item::{Route, WorkItem};
use crate::error::AgentError;

/// Agent that turns the question and selected schema into SQL.
///
/// Always routes to the refiner. A failed model call or an answer without
/// SQL is recorded as the item's execution error so the refiner repairs it.
pub struct DecomposerAgent {
    model: AgentModel,
    style: DecomposeStyle,
}

impl DecomposerAgent {
    /// Creates a new decomposer agent.
    #[must_use]
    pub fn new(
        config: &AgentConfig,
        client: Arc<dyn ModelClient>,
        system_prompt: String,
        style: DecomposeStyle,
    ) -> Self {
        Self {
            model: AgentModel::new(
                client,
                config.decomposer_model.clone(),
                system_prompt,
                config.decomposer_max_tokens,
            ),
            style,
        }
    }
}

impl std::fmt::Debug for DecomposerAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecomposerAgent")
            .field("model", &self.model)
            .field("style", &self.style)
            .finish()
    }
}

#[async_trait]
impl Agent for DecomposerAgent {
    fn name(&self) -> &'static str {
        "decomposer"
    }

    fn route(&self) -> Route {
        Route::Decomposer
    }

    async fn process(
        &self,
        item: &mut WorkItem,
        cancel: &CancellationToken,
    ) -> Result<(), AgentError> {
        let ctx = SchemaContext {
            database_id: &item.database_id,
            schema: &item.schema_description,
            foreign_keys: &item.foreign_key_description,
        };
        let prompt = build_decomposer_prompt(self.style, &ctx, &item.question, &item.evidence);
        item.route = Route::Refiner;

        let completion = match self.model.ask(&prompt, cancel).await {
            Ok(completion) => completion,
            Err(AgentError::Cancelled) => return Err(AgentError::Cancelled),
            Err(e) => {
                warn!(database_id = %item.database_id, error = %e, "decomposer model failed");
                item.candidate_sql.clear();
                item.last_execution_error = Some(e.to_string());
                return Ok(());
            }
        };
        item.usage.accumulate(completion.usage());

        match extract_sql(&completion.content) {
            Ok(sql) => {
                debug!(database_id = %item.database_id, sql = %sql, "candidate generated");
                item.candidate_sql = sql;
                item.last_execution_error = None;
            }
            Err(e) => {
                warn!(database_id = %item.database_id, "decomposer answer contained no SQL");
                item.candidate_sql.clear();
                item.last_execution_error = Some(e.to_string());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::traits::testing::ScriptedClient;

    fn config() -> AgentConfig {
        AgentConfig::builder()
            .api_key("k")
            .model("gen-model")
            .build()
            .unwrap_or_else(|_| unreachable!())
    }

    fn item() -> WorkItem {
        let mut item = WorkItem::new("shop", "How many users?", "users are rows in users");
        item.schema_description = "# Table: users\n[\n  (id, id.),\n]".to_string();
        item.route = Route::Decomposer;
        item
    }

    #[tokio::test]
    async fn test_generates_candidate() {
        let client = Arc::new(ScriptedClient::new(vec![ScriptedClient::reply(
            "Sub question 1...\n```sql\nSELECT COUNT(*) FROM users\n```",
        )]));
        let agent = DecomposerAgent::new(
            &config(),
            client.clone(),
            "sys".to_string(),
            DecomposeStyle::Decomposition,
        );
        let mut item = item();
        agent
            .process(&mut item, &CancellationToken::new())
            .await
            .unwrap_or_else(|_| unreachable!());

        assert_eq!(item.candidate_sql, "SELECT COUNT(*) FROM users");
        assert_eq!(item.route, Route::Refiner);
        assert!(item.last_execution_error.is_none());
        assert_eq!(item.usage.total_tokens, 15);

        let requests = client.requests();
        assert_eq!(requests[0].model, "gen-model");
        assert!(requests[0].messages[1].content.contains("users are rows in users"));
    }

    #[tokio::test]
    async fn test_gold_sql_never_in_prompt() {
        let client = Arc::new(ScriptedClient::new(vec![ScriptedClient::reply("SELECT 1")]));
        let agent = DecomposerAgent::new(&config(), client.clone(), "sys".to_string(), DecomposeStyle::Plain);
        let mut item = item().with_gold_sql("SELECT secret_gold FROM users");
        agent
            .process(&mut item, &CancellationToken::new())
            .await
            .unwrap_or_else(|_| unreachable!());

        let requests = client.requests();
        assert!(
            requests[0]
                .messages
                .iter()
                .all(|m| !m.content.contains("secret_gold"))
        );
    }

    #[tokio::test]
    async fn test_empty_answer_recorded_as_error() {
        let client = Arc::new(ScriptedClient::new(vec![ScriptedClient::reply("   ")]));
        let agent = DecomposerAgent::new(&config(), client, "sys".to_string(), DecomposeStyle::Plain);
        let mut item = item();
        agent
            .process(&mut item, &CancellationToken::new())
            .await
            .unwrap_or_else(|_| unreachable!());

        assert_eq!(item.route, Route::Refiner);
        assert!(item.candidate_sql.is_empty());
        assert_eq!(
            item.last_execution_error.as_deref(),
            Some("model response contained no SQL")
        );
    }

    #[tokio::test]
    async fn test_model_failure_routes_to_refiner() {
        let client = Arc::new(ScriptedClient::new(Vec::new()));
        let agent = DecomposerAgent::new(&config(), client, "sys".to_string(), DecomposeStyle::Plain);
        let mut item = item();
        agent
            .process(&mut item, &CancellationToken::new())
            .await
            .unwrap_or_else(|_| unreachable!());

        assert_eq!(item.route, Route::Refiner);
        assert!(
            item.last_execution_error
                .as_deref()
                .is_some_and(|e| e.contains("after 1 attempts"))
        );
    }
}

//! Selector agent: loads the schema and prunes it to what the question needs.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::config::AgentConfig;
use super::prompt::{SchemaContext, build_selector_prompt};
use super::resilient::ModelClient;
use super::traits::{Agent, AgentModel};
use super::work_item::{Route, WorkItem};
use crate::db::schema::{DatabaseSchema, PruneDecision, SchemaStore};
use crate::error::AgentError;

/// Agent that fills in the schema description for an item.
///
/// Large schemas are shown to the model, which answers with a per-table
/// keep/drop decision; the decision is then applied by
/// [`DatabaseSchema::prune`]. Any trouble with the model keeps the full
/// schema.
pub struct SelectorAgent {
    model: AgentModel,
    schemas: Arc<dyn SchemaStore>,
}

impl SelectorAgent {
    /// Creates a new selector agent.
    #[must_use]
    pub fn new(
        config: &AgentConfig,
        client: Arc<dyn ModelClient>,
        schemas: Arc<dyn SchemaStore>,
        system_prompt: String,
    ) -> Self {
        Self {
            model: AgentModel::new(
                client,
                config.selector_model.clone(),
                system_prompt,
                config.selector_max_tokens,
            ),
            schemas,
        }
    }

    /// Parses the model's JSON decision, tolerating surrounding prose or fences.
    fn parse_decision(content: &str) -> Result<PruneDecision, AgentError> {
        let parse_error = |message: String| AgentError::ResponseParse {
            message,
            content: content.to_string(),
        };

        let start = content
            .find('{')
            .ok_or_else(|| parse_error("no JSON object in selector response".to_string()))?;
        let end = content
            .rfind('}')
            .filter(|&end| end > start)
            .ok_or_else(|| parse_error("unterminated JSON object in selector response".to_string()))?;

        serde_json::from_str(&content[start..=end]).map_err(|e| parse_error(e.to_string()))
    }

    /// Asks the model for a pruning decision. `None` means keep everything.
    async fn decide(
        &self,
        item: &mut WorkItem,
        schema: &DatabaseSchema,
        cancel: &CancellationToken,
    ) -> Result<Option<PruneDecision>, AgentError> {
        let description = schema.describe();
        let foreign_keys = schema.describe_foreign_keys();
        let ctx = SchemaContext {
            database_id: &item.database_id,
            schema: &description,
            foreign_keys: &foreign_keys,
        };
        let prompt = build_selector_prompt(&ctx, &item.question, &item.evidence);

        let completion = match self.model.ask(&prompt, cancel).await {
            Ok(completion) => completion,
            Err(AgentError::Cancelled) => return Err(AgentError::Cancelled),
            Err(e) => {
                warn!(database_id = %item.database_id, error = %e, "selector model failed, keeping full schema");
                return Ok(None);
            }
        };
        item.usage.accumulate(completion.usage());

        match Self::parse_decision(&completion.content) {
            Ok(decision) => Ok(Some(decision)),
            Err(e) => {
                warn!(database_id = %item.database_id, error = %e, "unparseable selector answer, keeping full schema");
                Ok(None)
            }
        }
    }
}

impl std::fmt::Debug for SelectorAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SelectorAgent")
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Agent for SelectorAgent {
    fn name(&self) -> &'static str {
        "selector"
    }

    fn route(&self) -> Route {
        Route::Selector
    }

    async fn process(
        &self,
        item: &mut WorkItem,
        cancel: &CancellationToken,
    ) -> Result<(), AgentError> {
        let schema = match self.schemas.load(&item.database_id).await {
            Ok(schema) => schema,
            Err(e) => {
                warn!(database_id = %item.database_id, error = %e, "schema unavailable");
                item.fail(e.to_string());
                return Ok(());
            }
        };

        let pruned = if schema.needs_pruning() {
            self.decide(item, &*schema, cancel)
                .await?
                .map(|decision| schema.prune(&decision))
        } else {
            None
        };
        let view = pruned.as_ref().unwrap_or(&*schema);

        debug!(
            database_id = %item.database_id,
            tables = view.tables.len(),
            columns = view.total_columns(),
            pruned = pruned.is_some(),
            "schema selected"
        );

        item.schema_description = view.describe();
        item.foreign_key_description = view.describe_foreign_keys();
        item.route = Route::Decomposer;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::traits::testing::ScriptedClient;
    use crate::db::schema::{ColumnInfo, ForeignKey, TableInfo};
    use crate::error::DbError;

    struct FixedStore(Option<DatabaseSchema>);

    #[async_trait]
    impl SchemaStore for FixedStore {
        async fn load(&self, database_id: &str) -> Result<Arc<DatabaseSchema>, DbError> {
            self.0.clone().map(Arc::new).ok_or_else(|| DbError::NotFound {
                database_id: database_id.to_string(),
            })
        }
    }

    fn table(name: &str, n: usize) -> TableInfo {
        TableInfo {
            name: name.to_string(),
            columns: (0..n)
                .map(|i| ColumnInfo {
                    name: if i == 0 { "id".to_string() } else { format!("{name}_c{i}") },
                    data_type: "INTEGER".to_string(),
                    primary_key: i == 0,
                    examples: Vec::new(),
                })
                .collect(),
        }
    }

    fn large_schema() -> DatabaseSchema {
        DatabaseSchema {
            database_id: "big".to_string(),
            tables: vec![table("a", 20), table("b", 20), table("c", 4)],
            foreign_keys: vec![ForeignKey {
                from_table: "b".to_string(),
                from_column: "b_c1".to_string(),
                to_table: "a".to_string(),
                to_column: "id".to_string(),
            }],
        }
    }

    fn config() -> AgentConfig {
        AgentConfig::builder()
            .api_key("k")
            .build()
            .unwrap_or_else(|_| unreachable!())
    }

    fn agent(client: Arc<ScriptedClient>, schema: Option<DatabaseSchema>) -> SelectorAgent {
        SelectorAgent::new(&config(), client, Arc::new(FixedStore(schema)), "sys".to_string())
    }

    #[tokio::test]
    async fn test_small_schema_skips_model() {
        let client = Arc::new(ScriptedClient::new(Vec::new()));
        let small = DatabaseSchema {
            database_id: "s".to_string(),
            tables: vec![table("t", 3)],
            foreign_keys: Vec::new(),
        };
        let selector = agent(Arc::clone(&client), Some(small));
        let mut item = WorkItem::new("s", "q", "");
        selector
            .process(&mut item, &CancellationToken::new())
            .await
            .unwrap_or_else(|_| unreachable!());

        assert!(client.requests().is_empty());
        assert_eq!(item.route, Route::Decomposer);
        assert!(item.schema_description.starts_with("# Table: t"));
    }

    #[tokio::test]
    async fn test_prunes_with_model_decision() {
        let client = Arc::new(ScriptedClient::new(vec![ScriptedClient::reply(
            "```json\n{\"a\": [\"a_c2\"], \"b\": \"drop_all\"}\n```",
        )]));
        let selector = agent(Arc::clone(&client), Some(large_schema()));
        let mut item = WorkItem::new("big", "q", "");
        selector
            .process(&mut item, &CancellationToken::new())
            .await
            .unwrap_or_else(|_| unreachable!());

        assert_eq!(client.requests().len(), 1);
        assert!(item.schema_description.contains("(a_c2, a_c2.)"));
        assert!(!item.schema_description.contains("a_c3"));
        assert!(!item.schema_description.contains("# Table: b"));
        assert!(item.schema_description.contains("# Table: c"));
        assert!(item.foreign_key_description.is_empty());
        assert_eq!(item.usage.prompt_tokens, 10);
    }

    #[tokio::test]
    async fn test_unparseable_answer_keeps_full_schema() {
        let client = Arc::new(ScriptedClient::new(vec![ScriptedClient::reply("keep everything")]));
        let selector = agent(client, Some(large_schema()));
        let mut item = WorkItem::new("big", "q", "");
        selector
            .process(&mut item, &CancellationToken::new())
            .await
            .unwrap_or_else(|_| unreachable!());

        assert_eq!(item.schema_description, large_schema().describe());
        assert_eq!(item.foreign_key_description, "b.`b_c1` = a.`id`");
        assert_eq!(item.route, Route::Decomposer);
    }

    #[tokio::test]
    async fn test_model_failure_keeps_full_schema() {
        let client = Arc::new(ScriptedClient::new(Vec::new()));
        let selector = agent(client, Some(large_schema()));
        let mut item = WorkItem::new("big", "q", "");
        selector
            .process(&mut item, &CancellationToken::new())
            .await
            .unwrap_or_else(|_| unreachable!());
        assert_eq!(item.schema_description, large_schema().describe());
        assert!(item.fatal_error.is_none());
    }

    #[tokio::test]
    async fn test_missing_schema_is_fatal() {
        let client = Arc::new(ScriptedClient::new(Vec::new()));
        let selector = agent(client, None);
        let mut item = WorkItem::new("nope", "q", "");
        selector
            .process(&mut item, &CancellationToken::new())
            .await
            .unwrap_or_else(|_| unreachable!());
        assert_eq!(item.route, Route::Terminal);
        assert_eq!(item.fatal_error.as_deref(), Some("database not found: nope"));
        assert_eq!(item.attempt_count, 0);
    }

    #[test]
    fn test_parse_decision_with_prose() {
        let decision = SelectorAgent::parse_decision("Here you go: {\"t\": \"keep_all\"} done");
        assert!(decision.is_ok());
        assert!(SelectorAgent::parse_decision("} nothing {").is_err());
    }
}

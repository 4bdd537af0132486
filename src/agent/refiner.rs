//! Refiner agent: executes the candidate and repairs it on failure.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::config::AgentConfig;
use super::dialect::Dialect;
use super::extract::extract_sql;
use super::prompt::{SchemaContext, build_refiner_prompt};
use super::resilient::ModelClient;
use super::traits::{Agent, AgentModel};
use super::work_item::{Route, WorkItem};
use crate::db::pool::{ConnectionPool, execute_query};
use crate::db::value::QueryOutput;
use crate::error::AgentError;

/// Error text for a query that returned no rows.
pub const EMPTY_RESULT_ERROR: &str = "no data selected";
/// Error text for a query that returned NULL cells.
pub const NULL_VALUE_ERROR: &str = "exist None value, you can add NOT NULL in SQL";
/// Error text for an empty candidate.
const EMPTY_SQL_ERROR: &str = "empty SQL statement";

/// Which successful executions still count as failures.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefinePolicy {
    /// Treat a result with no rows as a failure.
    pub empty_result_is_failure: bool,
    /// Treat a result containing NULL cells as a failure.
    pub null_value_is_failure: bool,
}

impl RefinePolicy {
    /// Policy that accepts any successful execution.
    #[must_use]
    pub const fn lenient() -> Self {
        Self {
            empty_result_is_failure: false,
            null_value_is_failure: false,
        }
    }

    /// Policy that rejects empty results and NULL cells.
    #[must_use]
    pub const fn strict() -> Self {
        Self {
            empty_result_is_failure: true,
            null_value_is_failure: true,
        }
    }

    /// Returns the error text for a result this policy rejects.
    #[must_use]
    pub fn violation(&self, output: &QueryOutput) -> Option<&'static str> {
        if self.empty_result_is_failure && output.is_empty() {
            Some(EMPTY_RESULT_ERROR)
        } else if self.null_value_is_failure && output.has_null() {
            Some(NULL_VALUE_ERROR)
        } else {
            None
        }
    }
}

/// Agent that validates the candidate by execution and drives repair.
pub struct RefinerAgent {
    model: AgentModel,
    pool: Arc<dyn ConnectionPool>,
    dialect: Dialect,
    policy: RefinePolicy,
    max_repair_attempts: u32,
}

impl RefinerAgent {
    /// Creates a new refiner agent.
    #[must_use]
    pub fn new(
        config: &AgentConfig,
        client: Arc<dyn ModelClient>,
        pool: Arc<dyn ConnectionPool>,
        system_prompt: String,
    ) -> Self {
        Self {
            model: AgentModel::new(
                client,
                config.refiner_model.clone(),
                system_prompt,
                config.refiner_max_tokens,
            ),
            pool,
            dialect: Dialect::default(),
            policy: RefinePolicy::default(),
            max_repair_attempts: config.max_repair_attempts,
        }
    }

    /// Sets the dialect used to post-process candidates.
    #[must_use]
    pub const fn with_dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = dialect;
        self
    }

    /// Sets the result policy.
    #[must_use]
    pub const fn with_policy(mut self, policy: RefinePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Executes `sql` and returns the error text if it failed.
    async fn check(
        &self,
        item: &WorkItem,
        sql: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<String>, AgentError> {
        if sql.is_empty() {
            return Ok(Some(
                item.last_execution_error
                    .clone()
                    .unwrap_or_else(|| EMPTY_SQL_ERROR.to_string()),
            ));
        }

        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(AgentError::Cancelled),
            result = execute_query(&self.pool, &item.database_id, sql) => result,
        };

        Ok(match result {
            Ok(timed) => {
                debug!(
                    database_id = %item.database_id,
                    rows = timed.output.rows.len(),
                    elapsed_ms = timed.elapsed.as_millis(),
                    "candidate executed"
                );
                self.policy.violation(&timed.output).map(str::to_string)
            }
            Err(e) => Some(e.to_string()),
        })
    }

    /// Asks the model for a corrected query. `None` means give up.
    async fn repair(
        &self,
        item: &mut WorkItem,
        failed_sql: &str,
        error: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<String>, AgentError> {
        let ctx = SchemaContext {
            database_id: &item.database_id,
            schema: &item.schema_description,
            foreign_keys: &item.foreign_key_description,
        };
        let prompt = build_refiner_prompt(&ctx, &item.question, &item.evidence, failed_sql, error);

        let completion = match self.model.ask(&prompt, cancel).await {
            Ok(completion) => completion,
            Err(AgentError::Cancelled) => return Err(AgentError::Cancelled),
            Err(e) => {
                warn!(database_id = %item.database_id, error = %e, "refiner model failed");
                return Ok(None);
            }
        };
        item.usage.accumulate(completion.usage());

        let Ok(sql) = extract_sql(&completion.content) else {
            warn!(database_id = %item.database_id, "repair answer contained no SQL");
            return Ok(None);
        };
        let sql = self.dialect.postprocess(&sql);
        if sql == failed_sql {
            warn!(database_id = %item.database_id, "repair returned the same SQL");
            return Ok(None);
        }
        Ok(Some(sql))
    }
}

impl std::fmt::Debug for RefinerAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefinerAgent")
            .field("model", &self.model)
            .field("dialect", &self.dialect)
            .field("policy", &self.policy)
            .field("max_repair_attempts", &self.max_repair_attempts)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Agent for RefinerAgent {
    fn name(&self) -> &'static str {
        "refiner"
    }

    fn route(&self) -> Route {
        Route::Refiner
    }

    async fn process(
        &self,
        item: &mut WorkItem,
        cancel: &CancellationToken,
    ) -> Result<(), AgentError> {
        let sql = self.dialect.postprocess(&item.candidate_sql);
        item.candidate_sql.clone_from(&sql);

        let Some(error) = self.check(item, &sql, cancel).await? else {
            info!(
                database_id = %item.database_id,
                attempts = item.attempt_count,
                "candidate executed successfully"
            );
            item.last_execution_error = None;
            item.route = Route::Terminal;
            return Ok(());
        };

        debug!(database_id = %item.database_id, error = %error, attempt = item.attempt_count, "candidate failed");
        item.last_execution_error = Some(error.clone());
        item.route = Route::Terminal;

        if item.attempt_count >= self.max_repair_attempts {
            warn!(
                database_id = %item.database_id,
                attempts = item.attempt_count,
                "repair attempts exhausted"
            );
            return Ok(());
        }

        if let Some(repaired) = self.repair(item, &sql, &error, cancel).await?
            && item.record_repair_attempt(self.max_repair_attempts)
        {
            item.candidate_sql = repaired;
            item.route = Route::Refiner;
        }
        Ok(())
    }
}

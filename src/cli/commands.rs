//! CLI command implementations.
//!
//! Contains the business logic for each CLI command. Async work runs on a
//! tokio runtime created per command; Ctrl-C cancels in-flight pipelines.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::agent::client::create_client;
use crate::agent::config::{
    AgentConfig, DEFAULT_ACQUIRE_TIMEOUT_SECS, DEFAULT_POOL_SIZE, DEFAULT_STATEMENT_TIMEOUT_SECS,
};
use crate::agent::orchestrator::{Dataset, Pipeline};
use crate::agent::prompt::PromptSet;
use crate::agent::resilient::{ModelClient, ResilientClient};
use crate::agent::work_item::WorkItem;
use crate::cli::output::{
    OutputFormat, RunReport, format_comparison, format_evaluation, format_run, format_schema,
};
use crate::cli::parser::{Cli, Commands, ModelArgs};
use crate::db::pool::{ConnectionPool, SqlitePool};
use crate::db::schema::{SchemaStore, SqliteSchemaStore};
use crate::error::{CommandError, Result};
use crate::eval::batch::BatchEvaluator;
use crate::eval::compare::{ColumnOrder, MatchMode, ResultComparator};
use crate::eval::record::load_questions;

/// Executes the CLI command.
///
/// # Arguments
///
/// * `cli` - Parsed CLI arguments.
///
/// # Returns
///
/// Result with output string on success.
///
/// # Errors
///
/// Returns an error if the command fails to execute.
pub fn execute(cli: &Cli) -> Result<String> {
    let format = OutputFormat::parse(&cli.format);
    let db_root = cli.get_db_root();

    match &cli.command {
        Commands::Run {
            db_id,
            question,
            evidence,
            dataset,
            gold,
            model,
        } => {
            let params = RunParams {
                db_id,
                question,
                evidence,
                dataset: *dataset,
                gold: gold.as_deref(),
            };
            cmd_run(&db_root, &params, model, format)
        }
        Commands::Evaluate {
            questions,
            dataset,
            concurrency,
            limit,
            mode,
            output,
            model,
        } => {
            let params = EvaluateParams {
                questions,
                dataset: *dataset,
                concurrency: *concurrency,
                limit: *limit,
                mode: *mode,
                output: output.as_deref(),
            };
            cmd_evaluate(&db_root, &params, model, format)
        }
        Commands::Compare {
            db_id,
            candidate,
            gold,
            mode,
            respect_column_order,
        } => {
            let order = if *respect_column_order {
                ColumnOrder::Respect
            } else {
                ColumnOrder::Ignore
            };
            cmd_compare(&db_root, db_id, candidate, gold, *mode, order, format)
        }
        Commands::Schema { db_id } => cmd_schema(&db_root, db_id, format),
        Commands::InitPrompts { dir } => cmd_init_prompts(dir.as_deref(), format),
    }
}

// ==================== Parameter Structs ====================

/// Parameters for the run command.
#[derive(Debug, Clone)]
struct RunParams<'a> {
    db_id: &'a str,
    question: &'a str,
    evidence: &'a str,
    dataset: Dataset,
    gold: Option<&'a str>,
}

/// Parameters for the evaluate command.
#[derive(Debug, Clone)]
struct EvaluateParams<'a> {
    questions: &'a Path,
    dataset: Dataset,
    concurrency: Option<usize>,
    limit: Option<usize>,
    mode: MatchMode,
    output: Option<&'a Path>,
}

// ==================== Shared Setup ====================

/// Resolves agent configuration: environment first, CLI flags on top.
fn build_config(overrides: &ModelArgs, concurrency: Option<usize>) -> Result<AgentConfig> {
    let mut builder = AgentConfig::builder().from_env();
    if let Some(model) = &overrides.model {
        builder = builder.model(model.as_str());
    }
    if let Some(n) = overrides.max_rounds {
        builder = builder.max_rounds(n);
    }
    if let Some(n) = overrides.max_repair_attempts {
        builder = builder.max_repair_attempts(n);
    }
    if let Some(dir) = &overrides.prompt_dir {
        builder = builder.prompt_dir(dir.as_path());
    }
    if let Some(n) = concurrency {
        builder = builder.max_concurrency(n);
    }

    builder.build().map_err(|e| {
        CommandError::ExecutionFailed(format!("Agent configuration error: {e}")).into()
    })
}

/// Pool with default limits, for commands that never call the model.
fn default_pool(db_root: &Path) -> Arc<dyn ConnectionPool> {
    Arc::new(SqlitePool::new(
        db_root,
        DEFAULT_POOL_SIZE,
        Duration::from_secs(DEFAULT_ACQUIRE_TIMEOUT_SECS),
        Duration::from_secs(DEFAULT_STATEMENT_TIMEOUT_SECS),
    ))
}

/// The shared model client and the pipeline built on it.
struct Wiring {
    client: Arc<ResilientClient>,
    pipeline: Pipeline,
}

fn wire_pipeline(db_root: &Path, config: &AgentConfig) -> Result<Wiring> {
    let client = create_client(config).map_err(|e| {
        CommandError::ExecutionFailed(format!("Provider creation failed: {e}"))
    })?;
    let pool: Arc<dyn ConnectionPool> = Arc::new(SqlitePool::new(
        db_root,
        config.pool_size,
        config.acquire_timeout,
        config.statement_timeout,
    ));
    let schemas: Arc<dyn SchemaStore> = Arc::new(SqliteSchemaStore::new(Arc::clone(&pool)));
    let model_client: Arc<dyn ModelClient> = client.clone();

    Ok(Wiring {
        client,
        pipeline: Pipeline {
            client: model_client,
            pool,
            schemas,
            prompts: PromptSet::load(config.prompt_dir.as_deref()),
        },
    })
}

/// Runs `task` on a fresh runtime, cancelling its token on Ctrl-C.
fn block_on_cancellable<F, Fut, T>(task: F) -> Result<T>
where
    F: FnOnce(CancellationToken) -> Fut,
    Fut: Future<Output = T>,
{
    // Create tokio runtime as sync/async bridge
    let rt = tokio::runtime::Runtime::new().map_err(|e| {
        CommandError::ExecutionFailed(format!("Failed to create async runtime: {e}"))
    })?;

    let cancel = CancellationToken::new();
    let watcher = cancel.clone();
    Ok(rt.block_on(async move {
        let signal = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupted, cancelling");
                watcher.cancel();
            }
        });
        let output = task(cancel).await;
        signal.abort();
        output
    }))
}

// ==================== Commands ====================

fn cmd_run(
    db_root: &Path,
    params: &RunParams<'_>,
    overrides: &ModelArgs,
    format: OutputFormat,
) -> Result<String> {
    let config = build_config(overrides, None)?;
    let wiring = wire_pipeline(db_root, &config)?;
    let orchestrator = wiring.pipeline.for_dataset(params.dataset, &config);
    let comparator = ResultComparator::new(Arc::clone(&wiring.pipeline.pool));

    let mut item = WorkItem::new(params.db_id, params.question, params.evidence);

    let (run, comparison) = block_on_cancellable(|cancel| async move {
        let run = orchestrator.run(&mut item, &cancel).await;
        let comparison = match (params.gold, &run) {
            (Some(gold), Ok(_)) if !item.candidate_sql.is_empty() => {
                Some(comparator.compare(&item.database_id, &item.candidate_sql, gold).await)
            }
            _ => None,
        };
        (run.map(|summary| (summary, item)), comparison)
    })?;

    let (summary, item) =
        run.map_err(|e| CommandError::ExecutionFailed(format!("Run failed: {e}")))?;

    let report = RunReport {
        database_id: item.database_id.clone(),
        question: item.question.clone(),
        sql: item.candidate_sql.clone(),
        rounds: summary.rounds,
        completed: summary.completed,
        repair_attempts: item.attempt_count,
        error: item.failure().map(String::from),
        usage: item.usage,
        comparison,
    };
    Ok(format_run(&report, format))
}

fn cmd_evaluate(
    db_root: &Path,
    params: &EvaluateParams<'_>,
    overrides: &ModelArgs,
    format: OutputFormat,
) -> Result<String> {
    let mut questions = load_questions(params.questions)?;
    if let Some(limit) = params.limit {
        questions.truncate(limit);
    }

    let config = build_config(overrides, params.concurrency)?;
    let wiring = wire_pipeline(db_root, &config)?;
    let orchestrator = Arc::new(wiring.pipeline.for_dataset(params.dataset, &config));
    let comparator =
        ResultComparator::new(Arc::clone(&wiring.pipeline.pool)).with_mode(params.mode);
    let evaluator = BatchEvaluator::new(orchestrator, comparator, config.max_concurrency);

    let outcome = block_on_cancellable(|cancel| async move {
        evaluator.evaluate(&questions, &cancel).await
    })?;

    if let Some(path) = params.output {
        let json = serde_json::to_string_pretty(&outcome.records).map_err(|e| {
            CommandError::OutputFormat(format!("JSON serialization failed: {e}"))
        })?;
        std::fs::write(path, json).map_err(|e| {
            CommandError::ExecutionFailed(format!("Failed to write {}: {e}", path.display()))
        })?;
    }

    Ok(format_evaluation(&outcome, &wiring.client.usage(), format))
}

fn cmd_compare(
    db_root: &Path,
    db_id: &str,
    candidate: &str,
    gold: &str,
    mode: MatchMode,
    order: ColumnOrder,
    format: OutputFormat,
) -> Result<String> {
    let comparator = ResultComparator::new(default_pool(db_root))
        .with_mode(mode)
        .with_column_order(order);

    let result =
        block_on_cancellable(|_| async move { comparator.compare(db_id, candidate, gold).await })?;
    Ok(format_comparison(&result, format))
}

fn cmd_schema(db_root: &Path, db_id: &str, format: OutputFormat) -> Result<String> {
    let store = SqliteSchemaStore::new(default_pool(db_root));
    let schema = block_on_cancellable(|_| async move { store.load(db_id).await })??;
    Ok(format_schema(&schema, format))
}

fn cmd_init_prompts(dir: Option<&Path>, format: OutputFormat) -> Result<String> {
    let target_dir = dir
        .map(PathBuf::from)
        .or_else(PromptSet::default_dir)
        .ok_or_else(|| {
            CommandError::ExecutionFailed(
                "Could not determine home directory for default prompt path".to_string(),
            )
        })?;

    let written = PromptSet::write_defaults(&target_dir).map_err(|e| {
        CommandError::ExecutionFailed(format!("Failed to write prompt templates: {e}"))
    })?;

    match format {
        OutputFormat::Text => {
            if written.is_empty() {
                return Ok(format!(
                    "All prompt templates already exist in: {}\n",
                    target_dir.display()
                ));
            }
            let mut output = format!(
                "Wrote {} prompt template(s) to: {}\n",
                written.len(),
                target_dir.display()
            );
            for path in &written {
                output.push_str("  ");
                output.push_str(
                    path.file_name()
                        .and_then(|n| n.to_str())
                        .unwrap_or("unknown"),
                );
                output.push('\n');
            }
            output.push_str("\nEdit these files to customize agent system prompts.\n");
            Ok(output)
        }
        OutputFormat::Json => {
            let json = serde_json::json!({
                "directory": target_dir.to_string_lossy(),
                "written": written.iter().map(|p| p.to_string_lossy().into_owned()).collect::<Vec<_>>(),
                "count": written.len()
            });
            Ok(format.to_json(&json))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_prompts_writes_once() {
        let dir = tempfile::tempdir().unwrap_or_else(|_| unreachable!());
        let first = cmd_init_prompts(Some(dir.path()), OutputFormat::Text).unwrap_or_default();
        assert!(first.starts_with("Wrote 3 prompt template(s)"));
        assert!(first.contains("selector.md"));

        let second = cmd_init_prompts(Some(dir.path()), OutputFormat::Json).unwrap_or_default();
        let value: serde_json::Value = serde_json::from_str(&second).unwrap_or_default();
        assert_eq!(value["count"], 0);
    }

    #[test]
    fn test_schema_of_missing_database() {
        let dir = tempfile::tempdir().unwrap_or_else(|_| unreachable!());
        let result = cmd_schema(dir.path(), "ghost", OutputFormat::Text);
        assert!(result.is_err_and(|e| e.to_string() == "database not found: ghost"));
    }
}

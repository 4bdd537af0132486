//! Output formatting for CLI commands.

use std::fmt::Write as _;

use serde::Serialize;

use crate::agent::message::TokenUsage;
use crate::agent::rate_limit::UsageSnapshot;
use crate::db::schema::DatabaseSchema;
use crate::eval::batch::BatchOutcome;
use crate::eval::compare::ComparisonResult;

/// Output format for command results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable text.
    #[default]
    Text,
    /// Pretty-printed JSON.
    Json,
}

impl OutputFormat {
    /// Parses a format name; anything unrecognized falls back to text.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "json" => Self::Json,
            _ => Self::Text,
        }
    }

    /// Serializes `value` as pretty JSON, or an error object if that fails.
    #[must_use]
    pub fn to_json<T: Serialize>(self, value: &T) -> String {
        serde_json::to_string_pretty(value)
            .unwrap_or_else(|e| format!("{{\"error\": \"serialization failed: {e}\"}}"))
    }
}

/// Result of generating SQL for one question.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// Database identifier.
    pub database_id: String,
    /// The question asked.
    pub question: String,
    /// Final SQL, possibly empty.
    pub sql: String,
    /// Orchestrator rounds used.
    pub rounds: u32,
    /// Whether the pipeline reached a terminal state.
    pub completed: bool,
    /// Repair attempts spent.
    pub repair_attempts: u32,
    /// Why the SQL is not known to execute, if it is not.
    pub error: Option<String>,
    /// Tokens spent.
    pub usage: TokenUsage,
    /// Comparison against `--gold`, when given.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comparison: Option<ComparisonResult>,
}

/// Formats a run report.
#[must_use]
pub fn format_run(report: &RunReport, format: OutputFormat) -> String {
    match format {
        OutputFormat::Json => format.to_json(report),
        OutputFormat::Text => {
            let mut output = if report.sql.is_empty() {
                "-- no SQL generated\n".to_string()
            } else {
                format!("{}\n", report.sql)
            };
            output.push_str("\n---\n");
            let _ = writeln!(
                output,
                "Rounds: {}{} | Repairs: {} | Tokens: {}",
                report.rounds,
                if report.completed { "" } else { " (budget exhausted)" },
                report.repair_attempts,
                report.usage.total_tokens
            );
            if let Some(error) = &report.error {
                let _ = writeln!(output, "Error: {error}");
            }
            if let Some(comparison) = &report.comparison {
                output.push_str(&format_comparison_text(comparison));
            }
            output
        }
    }
}

/// Formats a comparison result.
#[must_use]
pub fn format_comparison(result: &ComparisonResult, format: OutputFormat) -> String {
    match format {
        OutputFormat::Json => format.to_json(result),
        OutputFormat::Text => format_comparison_text(result),
    }
}

fn format_comparison_text(result: &ComparisonResult) -> String {
    let mut output = format!(
        "Match: {}\nGold time: {:.4}s | Candidate time: {:.4}s\n",
        if result.matched { "yes" } else { "no" },
        result.gold_time_secs,
        result.candidate_time_secs
    );
    if let Some(error) = &result.gold_error {
        let _ = writeln!(output, "Gold error: {error}");
    }
    if let Some(error) = &result.candidate_error {
        let _ = writeln!(output, "Candidate error: {error}");
    }
    output
}

/// Formats a schema as the agents see it.
#[must_use]
pub fn format_schema(schema: &DatabaseSchema, format: OutputFormat) -> String {
    match format {
        OutputFormat::Json => format.to_json(&serde_json::json!({
            "database_id": schema.database_id,
            "tables": schema.tables.len(),
            "columns": schema.total_columns(),
            "needs_pruning": schema.needs_pruning(),
            "description": schema.describe(),
            "foreign_keys": schema.describe_foreign_keys(),
        })),
        OutputFormat::Text => {
            let mut output = schema.describe();
            let foreign_keys = schema.describe_foreign_keys();
            if !foreign_keys.is_empty() {
                let _ = write!(output, "\nForeign keys:\n{foreign_keys}\n");
            }
            let _ = write!(
                output,
                "\n---\nTables: {} | Columns: {} | Pruned by selector: {}\n",
                schema.tables.len(),
                schema.total_columns(),
                if schema.needs_pruning() { "yes" } else { "no" }
            );
            output
        }
    }
}

/// Formats a batch evaluation with client usage totals.
#[must_use]
pub fn format_evaluation(
    outcome: &BatchOutcome,
    usage: &UsageSnapshot,
    format: OutputFormat,
) -> String {
    match format {
        OutputFormat::Json => format.to_json(&serde_json::json!({
            "summary": outcome.summary,
            "records": outcome.records,
            "client": {
                "calls": usage.total_calls,
                "prompt_tokens": usage.total_prompt_tokens,
                "response_tokens": usage.total_response_tokens,
            },
        })),
        OutputFormat::Text => {
            let summary = &outcome.summary;
            let mut output = String::new();
            for record in &outcome.records {
                let _ = write!(
                    output,
                    "{:>6}  {:<5}  {}",
                    record.question_id,
                    if record.execution_match { "ok" } else { "miss" },
                    record.database_id
                );
                if let Some(error) = &record.error {
                    let _ = write!(output, "  ({error})");
                }
                output.push('\n');
            }
            let _ = write!(
                output,
                "\n---\nQuestions: {} | Matched: {} | Accuracy: {:.2}% | Errors: {}\n",
                summary.count,
                summary.matched,
                summary.accuracy * 100.0,
                summary.errors
            );
            let _ = writeln!(
                output,
                "Mean time: agent {:.2}s, gold {:.4}s, predicted {:.4}s",
                summary.mean_agent_time_seconds,
                summary.mean_gold_time_seconds,
                summary.mean_pred_time_seconds
            );
            let _ = writeln!(
                output,
                "Model calls: {} | Tokens: {} prompt, {} response",
                usage.total_calls, usage.total_prompt_tokens, usage.total_response_tokens
            );
            output
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report() -> RunReport {
        RunReport {
            database_id: "shop".to_string(),
            question: "How many users?".to_string(),
            sql: "SELECT COUNT(*) FROM users".to_string(),
            rounds: 3,
            completed: true,
            repair_attempts: 0,
            error: None,
            usage: TokenUsage::default(),
            comparison: None,
        }
    }

    #[test]
    fn test_parse_format() {
        assert_eq!(OutputFormat::parse("JSON"), OutputFormat::Json);
        assert_eq!(OutputFormat::parse("text"), OutputFormat::Text);
        assert_eq!(OutputFormat::parse("yaml"), OutputFormat::Text);
    }

    #[test]
    fn test_run_text() {
        let text = format_run(&report(), OutputFormat::Text);
        assert!(text.starts_with("SELECT COUNT(*) FROM users\n"));
        assert!(text.contains("Rounds: 3 | Repairs: 0"));
        assert!(!text.contains("Error:"));
    }

    #[test]
    fn test_run_json_omits_missing_comparison() {
        let json = format_run(&report(), OutputFormat::Json);
        let value: serde_json::Value = serde_json::from_str(&json).unwrap_or_default();
        assert_eq!(value["sql"], "SELECT COUNT(*) FROM users");
        assert!(value.get("comparison").is_none());
    }

    #[test]
    fn test_comparison_text() {
        let result = ComparisonResult {
            candidate_error: Some("no such table: x".to_string()),
            ..ComparisonResult::default()
        };
        let text = format_comparison(&result, OutputFormat::Text);
        assert!(text.starts_with("Match: no"));
        assert!(text.contains("Candidate error: no such table: x"));
    }
}

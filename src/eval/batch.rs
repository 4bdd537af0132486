//! Concurrent evaluation of a question set.

use std::sync::Arc;
use std::time::Instant;

use futures_util::StreamExt;
use futures_util::stream;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::compare::ResultComparator;
use super::record::{EvaluationRecord, QuestionRecord};
use crate::agent::message::TokenUsage;
use crate::agent::orchestrator::Orchestrator;

/// Aggregate numbers over a set of evaluation records.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EvaluationSummary {
    /// Questions evaluated.
    pub count: usize,
    /// Questions whose results matched.
    pub matched: usize,
    /// `matched / count`, or 0 for an empty set.
    pub accuracy: f64,
    /// Questions that carry an error.
    pub errors: usize,
    /// Mean pipeline wall time.
    pub mean_agent_time_seconds: f64,
    /// Mean gold execution time.
    pub mean_gold_time_seconds: f64,
    /// Mean predicted execution time.
    pub mean_pred_time_seconds: f64,
    /// Tokens spent across all questions.
    pub usage: TokenUsage,
}

impl EvaluationSummary {
    /// Summarizes `records`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn from_records(records: &[EvaluationRecord]) -> Self {
        let count = records.len();
        if count == 0 {
            return Self::default();
        }
        let n = count as f64;
        let mean = |f: fn(&EvaluationRecord) -> f64| records.iter().map(f).sum::<f64>() / n;

        let mut usage = TokenUsage::default();
        for record in records {
            usage.accumulate(record.usage);
        }
        let matched = records.iter().filter(|r| r.execution_match).count();

        Self {
            count,
            matched,
            accuracy: matched as f64 / n,
            errors: records.iter().filter(|r| r.error.is_some()).count(),
            mean_agent_time_seconds: mean(|r| r.agent_time_seconds),
            mean_gold_time_seconds: mean(|r| r.gold_time_seconds),
            mean_pred_time_seconds: mean(|r| r.pred_time_seconds),
            usage,
        }
    }
}

/// Records in question order plus their summary.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchOutcome {
    /// One record per input question.
    pub records: Vec<EvaluationRecord>,
    /// Aggregates over `records`.
    pub summary: EvaluationSummary,
}

/// Runs the pipeline over many questions and scores each against gold.
pub struct BatchEvaluator {
    orchestrator: Arc<Orchestrator>,
    comparator: ResultComparator,
    concurrency: usize,
}

impl BatchEvaluator {
    /// Creates an evaluator running at most `concurrency` questions at once.
    #[must_use]
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        comparator: ResultComparator,
        concurrency: usize,
    ) -> Self {
        Self {
            orchestrator,
            comparator,
            concurrency: concurrency.max(1),
        }
    }

    /// Evaluates every question. Failures, including cancellation, are
    /// reported on the question's record rather than dropping it.
    pub async fn evaluate(
        &self,
        questions: &[QuestionRecord],
        cancel: &CancellationToken,
    ) -> BatchOutcome {
        let started = Instant::now();

        let mut indexed: Vec<(usize, EvaluationRecord)> = stream::iter(questions.iter().enumerate())
            .map(|(index, question)| async move {
                (index, self.evaluate_one(index, question, cancel).await)
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;
        indexed.sort_unstable_by_key(|(index, _)| *index);

        let records: Vec<EvaluationRecord> = indexed.into_iter().map(|(_, r)| r).collect();
        let summary = EvaluationSummary::from_records(&records);
        info!(
            count = summary.count,
            matched = summary.matched,
            accuracy = summary.accuracy,
            elapsed_ms = started.elapsed().as_millis(),
            "evaluation finished"
        );
        BatchOutcome { records, summary }
    }

    async fn evaluate_one(
        &self,
        index: usize,
        question: &QuestionRecord,
        cancel: &CancellationToken,
    ) -> EvaluationRecord {
        let question_id = question.question_id.unwrap_or(index as u64);
        let mut item = question.to_work_item();

        let started = Instant::now();
        let run = self.orchestrator.run(&mut item, cancel).await;
        let agent_time_seconds = started.elapsed().as_secs_f64();

        let mut record = EvaluationRecord {
            question_id,
            database_id: item.database_id.clone(),
            question: item.question.clone(),
            gold_sql: item.gold_sql.clone().unwrap_or_default(),
            pred_sql: item.candidate_sql.clone(),
            agent_time_seconds,
            usage: item.usage,
            ..EvaluationRecord::default()
        };

        record.error = match run {
            Err(e) => Some(e.to_string()),
            Ok(summary) if !summary.completed => Some(format!(
                "round budget exhausted after {} rounds",
                summary.rounds
            )),
            Ok(_) => item.failure().map(String::from),
        };
        if cancel.is_cancelled() || item.fatal_error.is_some() {
            return record;
        }

        let Some(gold_sql) = item.gold_sql.as_deref() else {
            record.error.get_or_insert_with(|| "no gold SQL".to_string());
            return record;
        };
        if item.candidate_sql.trim().is_empty() {
            record
                .error
                .get_or_insert_with(|| "no SQL generated".to_string());
            return record;
        }

        let comparison = self
            .comparator
            .compare(&item.database_id, &item.candidate_sql, gold_sql)
            .await;
        item.execution_match = Some(comparison.matched);
        debug!(question_id, matched = comparison.matched, "question scored");

        record.execution_match = comparison.matched;
        record.gold_time_seconds = comparison.gold_time_secs;
        record.pred_time_seconds = comparison.candidate_time_secs;
        if let Some(gold_error) = comparison.gold_error {
            record.error = Some(format!("gold query failed: {gold_error}"));
        } else if let Some(candidate_error) = comparison.candidate_error {
            record.error.get_or_insert(candidate_error);
        }
        record
    }
}

impl std::fmt::Debug for BatchEvaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchEvaluator")
            .field("orchestrator", &self.orchestrator)
            .field("comparator", &self.comparator)
            .field("concurrency", &self.concurrency)
            .finish()
    }
}

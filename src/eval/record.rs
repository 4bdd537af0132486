//! Benchmark question input and per-question evaluation output.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::agent::message::TokenUsage;
use crate::agent::work_item::WorkItem;
use crate::error::{CommandError, Result};

/// One benchmark question as found in BIRD/Spider style JSON files.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionRecord {
    /// Stable identifier; Spider files omit it and the list index is used.
    #[serde(default)]
    pub question_id: Option<u64>,
    /// Database the question targets.
    pub db_id: String,
    /// Natural-language question.
    pub question: String,
    /// External knowledge hint (BIRD only).
    #[serde(default)]
    pub evidence: String,
    /// Gold SQL: `SQL` in BIRD, `query` in Spider.
    #[serde(default, alias = "SQL")]
    pub query: Option<String>,
}

impl QuestionRecord {
    /// Builds the work item for this question, carrying the gold SQL.
    #[must_use]
    pub fn to_work_item(&self) -> WorkItem {
        let item = WorkItem::new(&self.db_id, &self.question, &self.evidence);
        match &self.query {
            Some(gold) => item.with_gold_sql(gold.as_str()),
            None => item,
        }
    }
}

/// Reads a JSON array of questions, filling missing ids from the index.
///
/// # Errors
///
/// Returns an error if the file cannot be read or is not a JSON array of
/// questions.
pub fn load_questions(path: &Path) -> Result<Vec<QuestionRecord>> {
    let raw = std::fs::read_to_string(path)?;
    let mut questions: Vec<QuestionRecord> = serde_json::from_str(&raw).map_err(|e| {
        CommandError::InvalidInput(format!("{}: not a question list: {e}", path.display()))
    })?;
    for (index, question) in questions.iter_mut().enumerate() {
        if question.question_id.is_none() {
            question.question_id = Some(index as u64);
        }
    }
    Ok(questions)
}

/// Evaluation result for one question.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationRecord {
    /// Question identifier.
    #[serde(rename = "questionID")]
    pub question_id: u64,
    /// Database identifier.
    #[serde(rename = "databaseID")]
    pub database_id: String,
    /// Natural-language question.
    pub question: String,
    /// Reference SQL.
    #[serde(rename = "goldSQL")]
    pub gold_sql: String,
    /// SQL produced by the pipeline.
    #[serde(rename = "predSQL")]
    pub pred_sql: String,
    /// Whether predicted and gold results matched.
    pub execution_match: bool,
    /// Wall time spent in the agent pipeline.
    pub agent_time_seconds: f64,
    /// Gold execution time.
    pub gold_time_seconds: f64,
    /// Predicted execution time.
    pub pred_time_seconds: f64,
    /// Why the question failed, when it did.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Tokens spent on the question.
    #[serde(default)]
    pub usage: TokenUsage,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[test]
    fn test_bird_and_spider_shapes() {
        let bird: QuestionRecord = serde_json::from_str(
            r#"{"question_id": 7, "db_id": "shop", "question": "q", "evidence": "e", "SQL": "SELECT 1"}"#,
        )
        .unwrap_or_default();
        assert_eq!(bird.question_id, Some(7));
        assert_eq!(bird.query.as_deref(), Some("SELECT 1"));

        let spider: QuestionRecord =
            serde_json::from_str(r#"{"db_id": "shop", "question": "q", "query": "SELECT 2"}"#)
                .unwrap_or_default();
        assert_eq!(spider.question_id, None);
        assert!(spider.evidence.is_empty());
        assert_eq!(spider.query.as_deref(), Some("SELECT 2"));
    }

    #[test]
    fn test_work_item_carries_gold() {
        let record = QuestionRecord {
            question_id: Some(1),
            db_id: "shop".to_string(),
            question: "How many?".to_string(),
            evidence: String::new(),
            query: Some("SELECT 1".to_string()),
        };
        let item = record.to_work_item();
        assert_eq!(item.database_id, "shop");
        assert_eq!(item.gold_sql.as_deref(), Some("SELECT 1"));
    }

    #[test]
    fn test_load_questions_fills_ids() {
        let mut file = tempfile::NamedTempFile::new().unwrap_or_else(|_| unreachable!());
        write!(
            file,
            r#"[{{"db_id": "a", "question": "q1", "query": "SELECT 1"}},
               {{"db_id": "b", "question": "q2", "question_id": 40}}]"#
        )
        .unwrap_or_else(|_| unreachable!());

        let questions = load_questions(file.path()).unwrap_or_default();
        assert_eq!(questions.len(), 2);
        assert_eq!(questions[0].question_id, Some(0));
        assert_eq!(questions[1].question_id, Some(40));
    }

    #[test]
    fn test_load_questions_rejects_garbage() {
        let mut file = tempfile::NamedTempFile::new().unwrap_or_else(|_| unreachable!());
        write!(file, "{{\"not\": \"a list\"}}").unwrap_or_else(|_| unreachable!());
        assert!(load_questions(file.path()).is_err());
    }

    #[test]
    fn test_record_field_names() {
        let record = EvaluationRecord {
            question_id: 3,
            database_id: "shop".to_string(),
            execution_match: true,
            ..EvaluationRecord::default()
        };
        let json = serde_json::to_value(&record).unwrap_or_default();
        assert_eq!(json["questionID"], 3);
        assert_eq!(json["databaseID"], "shop");
        assert_eq!(json["executionMatch"], true);
        assert!(json.get("goldSQL").is_some());
        assert!(json.get("predTimeSeconds").is_some());
        assert!(json.get("error").is_none());
    }
}

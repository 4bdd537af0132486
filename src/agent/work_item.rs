//! The shared state passed between agents for one question.

use serde::{Deserialize, Serialize};

use super::message::TokenUsage;

/// Which agent processes the work item next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Route {
    /// Schema loading and pruning.
    Selector,
    /// SQL synthesis.
    Decomposer,
    /// Execution and repair.
    Refiner,
    /// Processing is finished.
    Terminal,
}

impl std::fmt::Display for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Selector => "selector",
            Self::Decomposer => "decomposer",
            Self::Refiner => "refiner",
            Self::Terminal => "terminal",
        };
        f.write_str(name)
    }
}

/// One question moving through the pipeline.
///
/// Owned exclusively by the orchestrator while it runs; agents receive it
/// by `&mut` for the duration of their round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    /// Database the question is asked against.
    pub database_id: String,
    /// Natural-language question.
    pub question: String,
    /// Domain hints accompanying the question (may be empty).
    pub evidence: String,
    /// Reference query, used only by offline evaluation.
    pub gold_sql: Option<String>,
    /// Rendered (possibly pruned) schema.
    pub schema_description: String,
    /// Rendered foreign-key relations.
    pub foreign_key_description: String,
    /// Current candidate query.
    pub candidate_sql: String,
    /// Error from the latest execution or extraction, cleared on success.
    pub last_execution_error: Option<String>,
    /// Item-level failure that ends processing without repair.
    pub fatal_error: Option<String>,
    /// Repair attempts consumed so far.
    pub attempt_count: u32,
    /// Next agent to run.
    pub route: Route,
    /// Rounds executed by the orchestrator.
    pub rounds: u32,
    /// Tokens spent on this item.
    pub usage: TokenUsage,
    /// Whether the candidate matched the gold query, once evaluated.
    pub execution_match: Option<bool>,
}

impl WorkItem {
    /// Creates a fresh item routed to the selector.
    #[must_use]
    pub fn new(
        database_id: impl Into<String>,
        question: impl Into<String>,
        evidence: impl Into<String>,
    ) -> Self {
        Self {
            database_id: database_id.into(),
            question: question.into(),
            evidence: evidence.into(),
            gold_sql: None,
            schema_description: String::new(),
            foreign_key_description: String::new(),
            candidate_sql: String::new(),
            last_execution_error: None,
            fatal_error: None,
            attempt_count: 0,
            route: Route::Selector,
            rounds: 0,
            usage: TokenUsage::default(),
            execution_match: None,
        }
    }

    /// Attaches a reference query for evaluation.
    #[must_use]
    pub fn with_gold_sql(mut self, gold_sql: impl Into<String>) -> Self {
        self.gold_sql = Some(gold_sql.into());
        self
    }

    /// Consumes one repair attempt if the budget allows it.
    ///
    /// Returns `false` and leaves the count untouched once `max_attempts`
    /// have been used.
    pub fn record_repair_attempt(&mut self, max_attempts: u32) -> bool {
        if self.attempt_count >= max_attempts {
            return false;
        }
        self.attempt_count += 1;
        debug_assert!(self.attempt_count <= max_attempts);
        true
    }

    /// Marks the item as fatally failed and terminal.
    pub fn fail(&mut self, message: impl Into<String>) {
        self.fatal_error = Some(message.into());
        self.route = Route::Terminal;
    }

    /// Whether processing has finished.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.route == Route::Terminal
    }

    /// The error that best explains why the item did not succeed, if any.
    #[must_use]
    pub fn failure(&self) -> Option<&str> {
        self.fatal_error
            .as_deref()
            .or(self.last_execution_error.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_new_item_starts_at_selector() {
        let item = WorkItem::new("db", "how many?", "");
        assert_eq!(item.route, Route::Selector);
        assert_eq!(item.attempt_count, 0);
        assert!(item.failure().is_none());
    }

    #[test]
    fn test_fail_is_terminal() {
        let mut item = WorkItem::new("db", "q", "");
        item.last_execution_error = Some("no such column".to_string());
        item.fail("database not found: db");
        assert!(item.is_terminal());
        assert_eq!(item.failure(), Some("database not found: db"));
    }

    #[test]
    fn test_route_serializes_lowercase() {
        let json = serde_json::to_string(&Route::Refiner).unwrap_or_default();
        assert_eq!(json, "\"refiner\"");
        assert_eq!(Route::Terminal.to_string(), "terminal");
    }

    proptest! {
        #[test]
        fn prop_attempt_count_never_exceeds_budget(max in 0u32..10, tries in 0usize..30) {
            let mut item = WorkItem::new("db", "q", "");
            let mut granted = 0u32;
            for _ in 0..tries {
                if item.record_repair_attempt(max) {
                    granted += 1;
                }
                prop_assert!(item.attempt_count <= max);
            }
            prop_assert_eq!(item.attempt_count, granted);
        }
    }
}

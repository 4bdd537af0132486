//! Pulling a SQL statement out of free-form model output.
//!
//! Order of preference: the last fenced block tagged `sql`, the last fenced
//! block of any tag, the first `SELECT` or CTE statement in prose, and
//! finally the whole trimmed response.

use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

/// Fenced code blocks with an optional info string.
static FENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```[ \t]*([A-Za-z0-9_+-]*)[^\n]*\n(.*?)```")
        .unwrap_or_else(|_| unreachable!())
});

/// Start of a query in prose: `SELECT`, or `WITH` only when it opens a CTE.
static STATEMENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:SELECT\b|WITH\s+(?:RECURSIVE\s+)?\w+\s*(?:\([^)]*\))?\s+AS\s*\()")
        .unwrap_or_else(|_| unreachable!())
});

/// Extraction failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractionError {
    /// The response contained nothing usable as SQL.
    #[error("model response contained no SQL")]
    Empty,
}

/// Extracts the candidate SQL from a model response.
///
/// # Errors
///
/// Returns [`ExtractionError::Empty`] when every strategy yields an empty
/// string.
pub fn extract_sql(response: &str) -> Result<String, ExtractionError> {
    let sql = fenced_block(response)
        .or_else(|| prose_statement(response))
        .unwrap_or_else(|| response.trim().to_string());

    if sql.is_empty() {
        Err(ExtractionError::Empty)
    } else {
        Ok(sql)
    }
}

fn fenced_block(response: &str) -> Option<String> {
    let mut last_sql = None;
    let mut last_any = None;

    for caps in FENCE_RE.captures_iter(response) {
        let body = caps.get(2).map_or("", |m| m.as_str()).trim();
        if body.is_empty() {
            continue;
        }
        let tag = caps.get(1).map_or("", |m| m.as_str());
        if tag.eq_ignore_ascii_case("sql") || tag.eq_ignore_ascii_case("sqlite") {
            last_sql = Some(body);
        }
        last_any = Some(body);
    }

    last_sql.or(last_any).map(str::to_string)
}

fn prose_statement(response: &str) -> Option<String> {
    let start = STATEMENT_RE.find(response)?.start();
    let rest = &response[start..];
    let end = rest.find(';').map_or(rest.len(), |i| i + 1);
    let statement = rest[..end].trim();
    (!statement.is_empty()).then(|| statement.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("```sql\nSELECT 1\n```", "SELECT 1" ; "single sql fence")]
    #[test_case("```sql\nSELECT 1\n```\nthen\n```sql\nSELECT 2\n```", "SELECT 2" ; "last sql fence wins")]
    #[test_case("```sql\nSELECT 1\n```\n```text\nnote\n```", "SELECT 1" ; "sql tag preferred over later block")]
    #[test_case("```\nSELECT name FROM t\n```", "SELECT name FROM t" ; "untagged fence")]
    #[test_case("```SQL\nselect 3;\n```", "select 3;" ; "tag is case insensitive")]
    #[test_case("The answer is SELECT a FROM t; hope it helps", "SELECT a FROM t;" ; "prose through semicolon")]
    #[test_case("Query: with x as (select 1) select * from x", "with x as (select 1) select * from x" ; "prose through end")]
    #[test_case("Sure, with pleasure. SELECT name FROM users;", "SELECT name FROM users;" ; "english with is not a cte")]
    #[test_case("Done with it: WITH RECURSIVE n(i) AS (SELECT 1) SELECT i FROM n", "WITH RECURSIVE n(i) AS (SELECT 1) SELECT i FROM n" ; "recursive cte after prose with")]
    #[test_case("  SELECTED items are none  ", "SELECTED items are none" ; "word boundary falls back to whole text")]
    #[test_case("  PRAGMA table_info(t)  ", "PRAGMA table_info(t)" ; "whole trimmed response")]
    fn test_extract(input: &str, expected: &str) {
        assert_eq!(extract_sql(input).as_deref(), Ok(expected));
    }

    #[test]
    fn test_empty_response() {
        assert_eq!(extract_sql("   \n "), Err(ExtractionError::Empty));
    }

    #[test]
    fn test_empty_fence_skipped() {
        let response = "```sql\n```\nSELECT 5";
        assert_eq!(extract_sql(response).as_deref(), Ok("SELECT 5"));
    }

    #[test]
    fn test_decomposition_answer() {
        let response = "Sub question 1: which schools?\n```sql\nSELECT id FROM schools\n```\n\
                        Sub question 2: how many?\n```sql\nSELECT COUNT(*) FROM schools WHERE id > 0\n```";
        assert_eq!(
            extract_sql(response).as_deref(),
            Ok("SELECT COUNT(*) FROM schools WHERE id > 0")
        );
    }
}

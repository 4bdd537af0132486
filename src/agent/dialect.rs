//! Dialect-specific clean-up applied to candidate SQL before execution.

use serde::{Deserialize, Serialize};

/// Target SQL dialect.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    /// `SQLite`: boolean keywords become integers.
    #[default]
    Sqlite,
    /// No dialect rewrites beyond generic clean-up.
    Generic,
}

impl Dialect {
    /// Normalizes `sql` for execution.
    ///
    /// Trims whitespace, removes a pair of backticks or quotes wrapping the
    /// whole statement, and drops trailing semicolons. `SQLite` also maps
    /// `TRUE`/`FALSE` outside quoted text to `1`/`0`. Applying the
    /// transform twice gives the same result as applying it once.
    #[must_use]
    pub fn postprocess(self, sql: &str) -> String {
        let stripped = strip_wrapping(sql);
        match self {
            Self::Sqlite => rewrite_booleans(stripped),
            Self::Generic => stripped.to_string(),
        }
    }
}

fn strip_wrapping(sql: &str) -> &str {
    let mut current = sql;
    loop {
        let next = current
            .trim()
            .trim_end_matches(|c: char| c == ';' || c.is_whitespace());
        let next = unwrap_quotes(next).unwrap_or(next);
        if next.len() == current.len() {
            return next;
        }
        current = next;
    }
}

fn unwrap_quotes(sql: &str) -> Option<&str> {
    let first = sql.chars().next()?;
    if !matches!(first, '`' | '"' | '\'') || sql.len() < 2 || !sql.ends_with(first) {
        return None;
    }
    let inner = &sql[1..sql.len() - 1];
    (!inner.contains(first)).then_some(inner)
}

fn rewrite_booleans(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut word = String::new();
    let mut chars = sql.chars();

    let flush = |word: &mut String, out: &mut String| {
        if word.eq_ignore_ascii_case("true") {
            out.push('1');
        } else if word.eq_ignore_ascii_case("false") {
            out.push('0');
        } else {
            out.push_str(word);
        }
        word.clear();
    };

    while let Some(c) = chars.next() {
        if c.is_ascii_alphanumeric() || c == '_' {
            word.push(c);
            continue;
        }
        flush(&mut word, &mut out);
        out.push(c);

        let close = match c {
            '\'' | '"' | '`' => c,
            '[' => ']',
            _ => continue,
        };
        for inner in chars.by_ref() {
            out.push(inner);
            if inner == close {
                break;
            }
        }
    }
    flush(&mut word, &mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use test_case::test_case;

    #[test_case("  SELECT 1;  ", "SELECT 1" ; "trim and semicolon")]
    #[test_case("SELECT 1;;\n", "SELECT 1" ; "repeated semicolons")]
    #[test_case("`SELECT 1`", "SELECT 1" ; "backtick wrapped")]
    #[test_case("\"SELECT a FROM t;\"", "SELECT a FROM t" ; "quote wrapped")]
    #[test_case("SELECT `a` FROM `t`", "SELECT `a` FROM `t`" ; "inner identifiers kept")]
    #[test_case("SELECT * FROM t WHERE flag = TRUE", "SELECT * FROM t WHERE flag = 1" ; "true rewritten")]
    #[test_case("SELECT * FROM t WHERE flag = false", "SELECT * FROM t WHERE flag = 0" ; "lowercase false")]
    #[test_case("SELECT 'TRUE' FROM t WHERE x = TRUE", "SELECT 'TRUE' FROM t WHERE x = 1" ; "string literal untouched")]
    #[test_case("SELECT is_true, [TRUE] FROM t", "SELECT is_true, [TRUE] FROM t" ; "identifiers untouched")]
    fn test_sqlite(input: &str, expected: &str) {
        assert_eq!(Dialect::Sqlite.postprocess(input), expected);
    }

    #[test]
    fn test_generic_keeps_booleans() {
        assert_eq!(
            Dialect::Generic.postprocess("`SELECT TRUE;`"),
            "SELECT TRUE"
        );
    }

    #[test]
    fn test_escaped_quote_in_literal() {
        let sql = "SELECT * FROM t WHERE name = 'it''s true' AND ok = TRUE";
        assert_eq!(
            Dialect::Sqlite.postprocess(sql),
            "SELECT * FROM t WHERE name = 'it''s true' AND ok = 1"
        );
    }

    proptest! {
        #[test]
        fn prop_postprocess_idempotent(sql in "\\PC{0,64}") {
            for dialect in [Dialect::Sqlite, Dialect::Generic] {
                let once = dialect.postprocess(&sql);
                let twice = dialect.postprocess(&once);
                prop_assert_eq!(once, twice);
            }
        }
    }
}

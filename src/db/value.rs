//! Query result values independent of the database driver.

use std::fmt::{self, Write as _};

use rusqlite::types::Value as SqlValue;
use serde::Serialize;

/// A single result cell.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CellValue {
    /// SQL NULL.
    Null,
    /// 64-bit integer.
    Integer(i64),
    /// Floating-point value.
    Real(f64),
    /// UTF-8 text.
    Text(String),
    /// Raw bytes.
    Blob(Vec<u8>),
}

impl CellValue {
    /// Whether the cell is NULL.
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl From<SqlValue> for CellValue {
    fn from(value: SqlValue) -> Self {
        match value {
            SqlValue::Null => Self::Null,
            SqlValue::Integer(i) => Self::Integer(i),
            SqlValue::Real(r) => Self::Real(r),
            SqlValue::Text(t) => Self::Text(t),
            SqlValue::Blob(b) => Self::Blob(b),
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("NULL"),
            Self::Integer(i) => write!(f, "{i}"),
            Self::Real(r) => write!(f, "{r}"),
            Self::Text(t) => f.write_str(t),
            Self::Blob(b) => f.write_str(&encode_hex(b)),
        }
    }
}

/// Lowercase hex rendering of a blob, prefixed with `x'` like a SQL literal.
#[must_use]
pub fn encode_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2 + 3);
    out.push_str("x'");
    for byte in bytes {
        let _ = write!(out, "{byte:02x}");
    }
    out.push('\'');
    out
}

/// Columns and rows returned by one statement.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryOutput {
    /// Column names in select order.
    pub columns: Vec<String>,
    /// Rows of cells, one cell per column.
    pub rows: Vec<Vec<CellValue>>,
}

impl QueryOutput {
    /// Whether no rows were returned.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Whether any cell is NULL.
    #[must_use]
    pub fn has_null(&self) -> bool {
        self.rows.iter().flatten().any(CellValue::is_null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_sql_value() {
        assert_eq!(CellValue::from(SqlValue::Integer(3)), CellValue::Integer(3));
        assert_eq!(
            CellValue::from(SqlValue::Text("a".to_string())),
            CellValue::Text("a".to_string())
        );
        assert!(CellValue::from(SqlValue::Null).is_null());
    }

    #[test]
    fn test_display() {
        assert_eq!(CellValue::Null.to_string(), "NULL");
        assert_eq!(CellValue::Real(1.5).to_string(), "1.5");
        assert_eq!(CellValue::Blob(vec![0xab, 0x01]).to_string(), "x'ab01'");
    }

    #[test]
    fn test_has_null() {
        let output = QueryOutput {
            columns: vec!["a".to_string(), "b".to_string()],
            rows: vec![vec![CellValue::Integer(1), CellValue::Null]],
        };
        assert!(output.has_null());
        assert!(!output.is_empty());
        assert!(!QueryOutput::default().has_null());
    }

    #[test]
    fn test_serialize_untagged() {
        let json = serde_json::to_string(&vec![
            CellValue::Null,
            CellValue::Integer(2),
            CellValue::Text("x".to_string()),
        ])
        .unwrap_or_default();
        assert_eq!(json, r#"[null,2,"x"]"#);
    }
}

//! Execution-match comparison of a candidate query against a gold query.
//!
//! Both statements are executed on the same database and their result
//! rows are normalized before comparison, so that row order, cell order
//! within a row, and integral floats (`3.0` vs `3`) do not cause false
//! mismatches.

use std::collections::HashSet;
use std::sync::Arc;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::db::pool::{ConnectionPool, execute_query};
use crate::db::value::{CellValue, QueryOutput};

/// Row counts at or above this are normalized and sorted in parallel.
pub const PARALLEL_THRESHOLD: usize = 2_048;

/// How two normalized row collections are compared.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchMode {
    /// Same rows with the same multiplicities.
    #[default]
    Multiset,
    /// Same distinct rows; duplicates ignored.
    Set,
}

impl std::str::FromStr for MatchMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "multiset" => Ok(Self::Multiset),
            "set" => Ok(Self::Set),
            other => Err(format!("unknown match mode '{other}' (expected multiset or set)")),
        }
    }
}

/// Whether the position of a cell within its row matters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnOrder {
    /// Cells are sorted within each row, so column order is ignored.
    #[default]
    Ignore,
    /// Cells keep their select-list position.
    Respect,
}

/// A cell reduced to a comparable, hashable form.
///
/// Reals with an integral value in `i64` range become [`NormCell::Integer`];
/// other reals are kept by their bit pattern with `-0.0` and NaN folded to
/// one representation each.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NormCell {
    /// SQL NULL, distinct from every other value.
    Null,
    /// Integers and integral reals.
    Integer(i64),
    /// Non-integral reals, as IEEE-754 bits.
    Real(u64),
    /// Text.
    Text(String),
    /// Bytes.
    Blob(Vec<u8>),
}

/// One normalized row.
pub type NormalizedRow = Vec<NormCell>;

#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn normalize_real(r: f64) -> NormCell {
    // 2^63 is the first integral f64 outside i64.
    const LIMIT: f64 = 9_223_372_036_854_775_808.0;
    if r.is_finite() && r.fract() == 0.0 && (-LIMIT..LIMIT).contains(&r) {
        return NormCell::Integer(r as i64);
    }
    if r.is_nan() {
        return NormCell::Real(f64::NAN.to_bits());
    }
    NormCell::Real(r.to_bits())
}

impl From<&CellValue> for NormCell {
    fn from(cell: &CellValue) -> Self {
        match cell {
            CellValue::Null => Self::Null,
            CellValue::Integer(i) => Self::Integer(*i),
            CellValue::Real(r) => normalize_real(*r),
            CellValue::Text(t) => Self::Text(t.clone()),
            CellValue::Blob(b) => Self::Blob(b.clone()),
        }
    }
}

impl From<&NormCell> for CellValue {
    fn from(cell: &NormCell) -> Self {
        match cell {
            NormCell::Null => Self::Null,
            NormCell::Integer(i) => Self::Integer(*i),
            NormCell::Real(bits) => Self::Real(f64::from_bits(*bits)),
            NormCell::Text(t) => Self::Text(t.clone()),
            NormCell::Blob(b) => Self::Blob(b.clone()),
        }
    }
}

/// Converts a normalized row back into driver-independent cells.
#[must_use]
pub fn to_cells(row: &[NormCell]) -> Vec<CellValue> {
    row.iter().map(CellValue::from).collect()
}

/// Normalizes one row.
#[must_use]
pub fn normalize_row(row: &[CellValue], order: ColumnOrder) -> NormalizedRow {
    let mut cells: NormalizedRow = row.iter().map(NormCell::from).collect();
    if order == ColumnOrder::Ignore {
        cells.sort_unstable();
    }
    cells
}

/// Normalizes every row of `rows`, in parallel for large inputs.
#[must_use]
pub fn normalize_rows(rows: &[Vec<CellValue>], order: ColumnOrder) -> Vec<NormalizedRow> {
    if rows.len() >= PARALLEL_THRESHOLD {
        rows.par_iter().map(|row| normalize_row(row, order)).collect()
    } else {
        rows.iter().map(|row| normalize_row(row, order)).collect()
    }
}

/// Outcome of comparing a candidate query with a gold query.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ComparisonResult {
    /// Whether both executed and produced equivalent results.
    pub matched: bool,
    /// Candidate execution time in seconds (0 when it failed).
    pub candidate_time_secs: f64,
    /// Gold execution time in seconds (0 when it failed).
    pub gold_time_secs: f64,
    /// Candidate execution error, if any.
    pub candidate_error: Option<String>,
    /// Gold execution error, if any.
    pub gold_error: Option<String>,
}

/// Executes query pairs and decides whether their results match.
#[derive(Clone)]
pub struct ResultComparator {
    pool: Arc<dyn ConnectionPool>,
    mode: MatchMode,
    column_order: ColumnOrder,
}

impl ResultComparator {
    /// Creates a comparator with multiset matching and column order ignored.
    #[must_use]
    pub fn new(pool: Arc<dyn ConnectionPool>) -> Self {
        Self {
            pool,
            mode: MatchMode::default(),
            column_order: ColumnOrder::default(),
        }
    }

    /// Sets the match mode.
    #[must_use]
    pub const fn with_mode(mut self, mode: MatchMode) -> Self {
        self.mode = mode;
        self
    }

    /// Sets whether cell position within a row matters.
    #[must_use]
    pub const fn with_column_order(mut self, order: ColumnOrder) -> Self {
        self.column_order = order;
        self
    }

    /// Match mode in use.
    #[must_use]
    pub const fn mode(&self) -> MatchMode {
        self.mode
    }

    /// Executes gold then candidate on `database_id` and compares them.
    ///
    /// A failing gold query short-circuits: the candidate is not run.
    pub async fn compare(
        &self,
        database_id: &str,
        candidate_sql: &str,
        gold_sql: &str,
    ) -> ComparisonResult {
        let gold = match execute_query(&self.pool, database_id, gold_sql).await {
            Ok(timed) => timed,
            Err(e) => {
                debug!(database_id, error = %e, "gold query failed");
                return ComparisonResult {
                    gold_error: Some(e.to_string()),
                    ..ComparisonResult::default()
                };
            }
        };
        let gold_time_secs = gold.elapsed.as_secs_f64();

        let candidate = match execute_query(&self.pool, database_id, candidate_sql).await {
            Ok(timed) => timed,
            Err(e) => {
                debug!(database_id, error = %e, "candidate query failed");
                return ComparisonResult {
                    gold_time_secs,
                    candidate_error: Some(e.to_string()),
                    ..ComparisonResult::default()
                };
            }
        };

        let matched = self.outputs_match(&candidate.output, &gold.output);
        debug!(
            database_id,
            matched,
            candidate_rows = candidate.output.rows.len(),
            gold_rows = gold.output.rows.len(),
            "compared results"
        );

        ComparisonResult {
            matched,
            candidate_time_secs: candidate.elapsed.as_secs_f64(),
            gold_time_secs,
            candidate_error: None,
            gold_error: None,
        }
    }

    /// Compares two already-executed results.
    #[must_use]
    pub fn outputs_match(&self, candidate: &QueryOutput, gold: &QueryOutput) -> bool {
        rows_match(&candidate.rows, &gold.rows, self.mode, self.column_order)
    }
}

impl std::fmt::Debug for ResultComparator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultComparator")
            .field("mode", &self.mode)
            .field("column_order", &self.column_order)
            .finish_non_exhaustive()
    }
}

/// Compares two row collections under `mode` and `order`.
#[must_use]
pub fn rows_match(
    candidate: &[Vec<CellValue>],
    gold: &[Vec<CellValue>],
    mode: MatchMode,
    order: ColumnOrder,
) -> bool {
    if mode == MatchMode::Multiset && candidate.len() != gold.len() {
        return false;
    }
    let candidate = normalize_rows(candidate, order);
    let gold = normalize_rows(gold, order);

    match mode {
        MatchMode::Set => {
            let candidate: HashSet<&NormalizedRow> = candidate.iter().collect();
            let gold: HashSet<&NormalizedRow> = gold.iter().collect();
            candidate == gold
        }
        MatchMode::Multiset => sorted(candidate) == sorted(gold),
    }
}

fn sorted(mut rows: Vec<NormalizedRow>) -> Vec<NormalizedRow> {
    if rows.len() >= PARALLEL_THRESHOLD {
        rows.par_sort_unstable();
    } else {
        rows.sort_unstable();
    }
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use test_case::test_case;

    fn int(i: i64) -> CellValue {
        CellValue::Integer(i)
    }

    fn text(s: &str) -> CellValue {
        CellValue::Text(s.to_string())
    }

    #[test_case(CellValue::Real(3.0), NormCell::Integer(3) ; "integral real")]
    #[test_case(CellValue::Real(-0.0), NormCell::Integer(0) ; "negative zero")]
    #[test_case(CellValue::Real(2.5), NormCell::Real(2.5_f64.to_bits()) ; "fractional real")]
    #[test_case(CellValue::Null, NormCell::Null ; "null")]
    #[test_case(text("0"), NormCell::Text("0".to_string()) ; "text stays text")]
    fn test_normalize_cell(input: CellValue, expected: NormCell) {
        assert_eq!(NormCell::from(&input), expected);
    }

    #[test]
    fn test_huge_real_is_not_integer() {
        assert!(matches!(NormCell::from(&CellValue::Real(1e300)), NormCell::Real(_)));
        assert!(matches!(
            NormCell::from(&CellValue::Real(f64::INFINITY)),
            NormCell::Real(_)
        ));
    }

    #[test]
    fn test_null_distinct_from_text() {
        assert_ne!(
            NormCell::from(&CellValue::Null),
            NormCell::from(&text("NULL"))
        );
    }

    #[test]
    fn test_reordered_rows_match() {
        let gold = vec![vec![int(1), text("a")], vec![int(2), text("b")]];
        let candidate = vec![vec![int(2), text("b")], vec![int(1), text("a")]];
        assert!(rows_match(&candidate, &gold, MatchMode::Multiset, ColumnOrder::Ignore));
    }

    #[test]
    fn test_column_order() {
        let gold = vec![vec![int(1), text("a")]];
        let candidate = vec![vec![text("a"), int(1)]];
        assert!(rows_match(&candidate, &gold, MatchMode::Multiset, ColumnOrder::Ignore));
        assert!(!rows_match(&candidate, &gold, MatchMode::Multiset, ColumnOrder::Respect));
    }

    #[test]
    fn test_duplicates_depend_on_mode() {
        let gold = vec![vec![int(1)], vec![int(1)], vec![int(2)]];
        let candidate = vec![vec![int(1)], vec![int(2)]];
        assert!(!rows_match(&candidate, &gold, MatchMode::Multiset, ColumnOrder::Ignore));
        assert!(rows_match(&candidate, &gold, MatchMode::Set, ColumnOrder::Ignore));
    }

    #[test]
    fn test_integral_real_matches_integer() {
        let gold = vec![vec![int(3)]];
        let candidate = vec![vec![CellValue::Real(3.0)]];
        assert!(rows_match(&candidate, &gold, MatchMode::Multiset, ColumnOrder::Ignore));
    }

    #[test]
    fn test_large_inputs_use_parallel_path() {
        let gold: Vec<Vec<CellValue>> = (0..5_000).map(|i| vec![int(i), text("x")]).collect();
        let mut candidate = gold.clone();
        candidate.reverse();
        assert!(rows_match(&candidate, &gold, MatchMode::Multiset, ColumnOrder::Ignore));
        candidate[0] = vec![int(-1), text("x")];
        assert!(!rows_match(&candidate, &gold, MatchMode::Multiset, ColumnOrder::Ignore));
    }

    fn cell_strategy() -> impl Strategy<Value = CellValue> {
        prop_oneof![
            Just(CellValue::Null),
            any::<i64>().prop_map(CellValue::Integer),
            (-1.0e6_f64..1.0e6).prop_map(CellValue::Real),
            "[a-z]{0,6}".prop_map(CellValue::Text),
        ]
    }

    fn rows_strategy() -> impl Strategy<Value = Vec<Vec<CellValue>>> {
        prop::collection::vec(prop::collection::vec(cell_strategy(), 2), 0..24)
    }

    proptest! {
        #[test]
        fn normalization_is_idempotent(rows in rows_strategy()) {
            for order in [ColumnOrder::Ignore, ColumnOrder::Respect] {
                let once = normalize_rows(&rows, order);
                let back: Vec<Vec<CellValue>> = once.iter().map(|r| to_cells(r)).collect();
                let twice = normalize_rows(&back, order);
                prop_assert_eq!(once, twice);
            }
        }

        #[test]
        fn compare_ignores_row_order(
            (rows, shuffled) in rows_strategy().prop_flat_map(|rows| {
                (Just(rows.clone()), Just(rows).prop_shuffle())
            })
        ) {
            prop_assert!(rows_match(&shuffled, &rows, MatchMode::Multiset, ColumnOrder::Ignore));
            prop_assert!(rows_match(&shuffled, &rows, MatchMode::Set, ColumnOrder::Respect));
        }
    }
}

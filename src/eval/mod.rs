//! Offline evaluation: execution-match scoring of generated SQL.

pub mod batch;
pub mod compare;
pub mod record;

pub use batch::{BatchEvaluator, BatchOutcome, EvaluationSummary};
pub use compare::{
    ColumnOrder, ComparisonResult, MatchMode, NormCell, NormalizedRow, ResultComparator,
    normalize_row, normalize_rows, rows_match, to_cells,
};
pub use record::{EvaluationRecord, QuestionRecord, load_questions};

//! Database schema introspection, rendering, and pruning.

use std::collections::{HashMap, HashSet};
use std::fmt::Write;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;
use unicode_segmentation::UnicodeSegmentation;

use super::pool::{ConnectionPool, PooledConnection};
use super::value::{CellValue, QueryOutput};
use crate::error::DbError;

/// Distinct example values collected per column.
const EXAMPLE_COUNT: usize = 3;
/// Longest example text kept verbatim.
const EXAMPLE_MAX_CHARS: usize = 48;
/// Tables with at most this many columns are never pruned.
pub const SMALL_TABLE_COLUMNS: usize = 10;
/// Average columns per table above which the selector prunes.
const PRUNE_AVG_COLUMNS: f64 = 6.0;
/// Total columns above which the selector prunes.
const PRUNE_TOTAL_COLUMNS: usize = 30;

/// One column of a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    /// Column name.
    pub name: String,
    /// Declared type, possibly empty.
    pub data_type: String,
    /// Whether the column is part of the primary key.
    pub primary_key: bool,
    /// Example values, already rendered for prompts.
    pub examples: Vec<String>,
}

/// One table and its columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableInfo {
    /// Table name.
    pub name: String,
    /// Columns in declaration order.
    pub columns: Vec<ColumnInfo>,
}

/// A foreign-key edge between two columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKey {
    /// Referencing table.
    pub from_table: String,
    /// Referencing column.
    pub from_column: String,
    /// Referenced table.
    pub to_table: String,
    /// Referenced column.
    pub to_column: String,
}

impl ForeignKey {
    /// Whether either end of the key is `table`.`column`, ignoring case.
    #[must_use]
    pub fn touches(&self, table: &str, column: &str) -> bool {
        (self.from_table.eq_ignore_ascii_case(table) && self.from_column.eq_ignore_ascii_case(column))
            || (self.to_table.eq_ignore_ascii_case(table) && self.to_column.eq_ignore_ascii_case(column))
    }
}

/// What the selector model decided for one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TableDecision {
    /// `"keep_all"` or `"drop_all"`.
    Keyword(String),
    /// Columns to keep.
    Columns(Vec<String>),
}

/// Per-table pruning decisions, keyed by table name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PruneDecision(pub HashMap<String, TableDecision>);

impl PruneDecision {
    fn lookup(&self, table: &str) -> Option<&TableDecision> {
        self.0
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(table))
            .map(|(_, decision)| decision)
    }

    fn drops(&self, table: &str) -> bool {
        matches!(
            self.lookup(table),
            Some(TableDecision::Keyword(k)) if k.eq_ignore_ascii_case("drop_all")
        )
    }
}

/// Full schema of one database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseSchema {
    /// Database identifier.
    pub database_id: String,
    /// Tables in creation order.
    pub tables: Vec<TableInfo>,
    /// Foreign keys between tables.
    pub foreign_keys: Vec<ForeignKey>,
}

impl DatabaseSchema {
    /// Total number of columns across all tables.
    #[must_use]
    pub fn total_columns(&self) -> usize {
        self.tables.iter().map(|t| t.columns.len()).sum()
    }

    /// Average number of columns per table.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn average_columns(&self) -> f64 {
        if self.tables.is_empty() {
            return 0.0;
        }
        self.total_columns() as f64 / self.tables.len() as f64
    }

    /// Whether the schema is large enough to ask the model to prune it.
    #[must_use]
    pub fn needs_pruning(&self) -> bool {
        self.average_columns() > PRUNE_AVG_COLUMNS || self.total_columns() > PRUNE_TOTAL_COLUMNS
    }

    /// Renders the tables for prompts.
    #[must_use]
    pub fn describe(&self) -> String {
        let mut out = String::new();
        for table in &self.tables {
            let _ = writeln!(out, "# Table: {}", table.name);
            out.push_str("[\n");
            for column in &table.columns {
                let _ = write!(out, "  ({}, {}.", column.name, column.name);
                if !column.examples.is_empty() {
                    let _ = write!(out, " Value examples: [{}].", column.examples.join(", "));
                }
                out.push_str("),\n");
            }
            out.push_str("]\n");
        }
        out.trim_end().to_string()
    }

    /// Renders the foreign keys for prompts, one per line.
    #[must_use]
    pub fn describe_foreign_keys(&self) -> String {
        self.foreign_keys
            .iter()
            .map(|fk| {
                format!(
                    "{}.`{}` = {}.`{}`",
                    fk.from_table, fk.from_column, fk.to_table, fk.to_column
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Applies the model's decision.
    ///
    /// Small tables stay whole. Tables the decision does not mention stay
    /// whole. A column list keeps those columns plus primary-key columns
    /// plus columns of foreign keys whose two tables both survive.
    #[must_use]
    pub fn prune(&self, decision: &PruneDecision) -> Self {
        // SQLite identifiers are case-insensitive; key the kept set by lowercase name.
        let kept_tables: HashSet<String> = self
            .tables
            .iter()
            .filter(|t| t.columns.len() <= SMALL_TABLE_COLUMNS || !decision.drops(&t.name))
            .map(|t| t.name.to_ascii_lowercase())
            .collect();
        let is_kept = |name: &str| kept_tables.contains(&name.to_ascii_lowercase());

        let foreign_keys: Vec<ForeignKey> = self
            .foreign_keys
            .iter()
            .filter(|fk| is_kept(&fk.from_table) && is_kept(&fk.to_table))
            .cloned()
            .collect();

        let tables = self
            .tables
            .iter()
            .filter(|t| is_kept(&t.name))
            .map(|table| {
                let listed = match decision.lookup(&table.name) {
                    Some(TableDecision::Columns(cols)) if table.columns.len() > SMALL_TABLE_COLUMNS => cols,
                    _ => return table.clone(),
                };
                let columns = table
                    .columns
                    .iter()
                    .filter(|col| {
                        col.primary_key
                            || listed.iter().any(|l| l.eq_ignore_ascii_case(&col.name))
                            || foreign_keys.iter().any(|fk| {
                                fk.touches(&table.name, &col.name)
                            })
                    })
                    .cloned()
                    .collect();
                TableInfo {
                    name: table.name.clone(),
                    columns,
                }
            })
            .collect();

        Self {
            database_id: self.database_id.clone(),
            tables,
            foreign_keys,
        }
    }
}

/// Source of database schemas.
#[async_trait]
pub trait SchemaStore: Send + Sync {
    /// Loads the schema of `database_id`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::NotFound`] for an unknown database, or any error
    /// raised while introspecting.
    async fn load(&self, database_id: &str) -> Result<Arc<DatabaseSchema>, DbError>;
}

/// Schema store that introspects `SQLite` databases through the pool and
/// caches the result per database.
pub struct SqliteSchemaStore {
    pool: Arc<dyn ConnectionPool>,
    cache: Mutex<HashMap<String, Arc<DatabaseSchema>>>,
}

impl SqliteSchemaStore {
    /// Creates a store reading through `pool`.
    #[must_use]
    pub fn new(pool: Arc<dyn ConnectionPool>) -> Self {
        Self {
            pool,
            cache: Mutex::new(HashMap::new()),
        }
    }

    fn cached(&self, database_id: &str) -> Option<Arc<DatabaseSchema>> {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(database_id)
            .cloned()
    }
}

impl std::fmt::Debug for SqliteSchemaStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteSchemaStore").finish_non_exhaustive()
    }
}

#[async_trait]
impl SchemaStore for SqliteSchemaStore {
    async fn load(&self, database_id: &str) -> Result<Arc<DatabaseSchema>, DbError> {
        if let Some(schema) = self.cached(database_id) {
            return Ok(schema);
        }

        let pool = Arc::clone(&self.pool);
        let id = database_id.to_string();
        let schema = tokio::task::spawn_blocking(move || {
            let mut conn = PooledConnection::acquire(&pool, &id)?;
            conn.set_statement_timeout(pool.statement_timeout());
            introspect(&mut conn)
        })
        .await
        .map_err(|e| DbError::Join {
            message: e.to_string(),
        })??;

        debug!(
            database_id,
            tables = schema.tables.len(),
            columns = schema.total_columns(),
            "introspected schema"
        );

        let schema = Arc::new(schema);
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(database_id.to_string(), Arc::clone(&schema));
        Ok(schema)
    }
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn text_at(output: &QueryOutput, row: usize, column: &str) -> Option<String> {
    let index = output.columns.iter().position(|c| c == column)?;
    match output.rows.get(row)?.get(index)? {
        CellValue::Text(t) => Some(t.clone()),
        CellValue::Integer(i) => Some(i.to_string()),
        _ => None,
    }
}

fn integer_at(output: &QueryOutput, row: usize, column: &str) -> i64 {
    let index = output.columns.iter().position(|c| c == column);
    match index.and_then(|i| output.rows.get(row)?.get(i)) {
        Some(CellValue::Integer(i)) => *i,
        _ => 0,
    }
}

fn render_example(value: &CellValue) -> Option<String> {
    match value {
        CellValue::Null | CellValue::Blob(_) => None,
        CellValue::Integer(i) => Some(i.to_string()),
        CellValue::Real(r) => Some(r.to_string()),
        CellValue::Text(t) => {
            let t = t.trim();
            if t.is_empty() {
                return None;
            }
            let shown: String = if t.graphemes(true).nth(EXAMPLE_MAX_CHARS).is_some() {
                let head: String = t.graphemes(true).take(EXAMPLE_MAX_CHARS).collect();
                format!("{head}...")
            } else {
                t.to_string()
            };
            Some(quote_literal(&shown))
        }
    }
}

fn introspect(conn: &mut PooledConnection) -> Result<DatabaseSchema, DbError> {
    let names = conn.execute(
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%'",
    )?;
    let table_names: Vec<String> = (0..names.rows.len())
        .filter_map(|row| text_at(&names, row, "name"))
        .collect();

    let mut tables = Vec::with_capacity(table_names.len());
    let mut foreign_keys = Vec::new();

    for table in &table_names {
        let info = conn.execute(&format!("PRAGMA table_info({})", quote_literal(table)))?;
        let mut columns = Vec::with_capacity(info.rows.len());
        for row in 0..info.rows.len() {
            let Some(name) = text_at(&info, row, "name") else {
                continue;
            };
            let examples = conn
                .execute(&format!(
                    "SELECT DISTINCT {col} FROM {tbl} WHERE {col} IS NOT NULL LIMIT {EXAMPLE_COUNT}",
                    col = quote_ident(&name),
                    tbl = quote_ident(table),
                ))?
                .rows
                .iter()
                .filter_map(|r| r.first().and_then(render_example))
                .collect();
            columns.push(ColumnInfo {
                data_type: text_at(&info, row, "type").unwrap_or_default(),
                primary_key: integer_at(&info, row, "pk") > 0,
                name,
                examples,
            });
        }
        tables.push(TableInfo {
            name: table.clone(),
            columns,
        });

        let fks = conn.execute(&format!("PRAGMA foreign_key_list({})", quote_literal(table)))?;
        for row in 0..fks.rows.len() {
            let (Some(to_table), Some(from_column)) =
                (text_at(&fks, row, "table"), text_at(&fks, row, "from"))
            else {
                continue;
            };
            foreign_keys.push(ForeignKey {
                from_table: table.clone(),
                from_column,
                to_column: text_at(&fks, row, "to").unwrap_or_default(),
                to_table,
            });
        }
    }

    // Targets are reported as written in REFERENCES; use the declared names.
    // A foreign key without a target column references the primary key.
    for fk in &mut foreign_keys {
        let Some(target) = tables
            .iter()
            .find(|t| t.name.eq_ignore_ascii_case(&fk.to_table))
        else {
            continue;
        };
        fk.to_table.clone_from(&target.name);
        if fk.to_column.is_empty() {
            if let Some(pk) = target.columns.iter().find(|c| c.primary_key) {
                fk.to_column = pk.name.clone();
            }
        } else if let Some(col) = target
            .columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(&fk.to_column))
        {
            fk.to_column = col.name.clone();
        }
    }
    foreign_keys.retain(|fk| !fk.to_column.is_empty());

    Ok(DatabaseSchema {
        database_id: conn.database_id().to_string(),
        tables,
        foreign_keys,
    })
}

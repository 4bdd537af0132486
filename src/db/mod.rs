//! Database access: pooled read-only connections, result values, and
//! schema introspection.

pub mod pool;
pub mod schema;
pub mod value;

pub use pool::{
    ConnectionPool, PooledConnection, SqlSession, SqlitePool, TimedOutput, execute_query,
    resolve_database_path,
};
pub use schema::{
    ColumnInfo, DatabaseSchema, ForeignKey, PruneDecision, SchemaStore, SqliteSchemaStore,
    TableDecision, TableInfo,
};
pub use value::{CellValue, QueryOutput};

//! Connection pooling and statement execution.
//!
//! [`ConnectionPool`] is the contract the agents and the comparator depend
//! on. Connections are only ever touched on blocking threads: callers go
//! through [`execute_query`], which acquires a [`PooledConnection`] inside
//! `spawn_blocking`. The guard hands the session back to the pool when it
//! drops, whether the statement succeeded, failed, or panicked.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use rusqlite::{Connection, ErrorCode, OpenFlags};
use tracing::{debug, warn};

use super::value::{CellValue, QueryOutput};
use crate::error::DbError;

/// SQLite virtual-machine instructions between timeout checks.
const PROGRESS_OPS: i32 = 1_000;

/// An open handle to one database.
pub trait SqlSession: Send {
    /// Sets the timeout applied to each subsequent statement.
    fn set_statement_timeout(&mut self, timeout: Duration);

    /// Executes one statement and collects every row.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Execution`] with the engine's message, or
    /// [`DbError::Timeout`] if the statement ran past its timeout.
    fn execute(&mut self, sql: &str) -> Result<QueryOutput, DbError>;
}

/// Source of database sessions, keyed by database identifier.
///
/// Both methods may block and must be called off the async runtime.
pub trait ConnectionPool: Send + Sync {
    /// Takes a session for `database_id`, waiting up to the pool's acquire
    /// timeout for one to become free.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::NotFound`] for an unknown database,
    /// [`DbError::PoolExhausted`] on timeout, or [`DbError::Open`].
    fn acquire(&self, database_id: &str) -> Result<Box<dyn SqlSession>, DbError>;

    /// Returns a session taken with [`ConnectionPool::acquire`].
    fn release(&self, database_id: &str, session: Box<dyn SqlSession>);

    /// Timeout applied to statements run through [`execute_query`].
    fn statement_timeout(&self) -> Duration;
}

/// RAII guard that releases its session back to the pool on drop.
pub struct PooledConnection {
    pool: Arc<dyn ConnectionPool>,
    database_id: String,
    session: Option<Box<dyn SqlSession>>,
}

impl PooledConnection {
    /// Acquires a session from `pool`. Blocks.
    ///
    /// # Errors
    ///
    /// Propagates [`ConnectionPool::acquire`] failures.
    pub fn acquire(pool: &Arc<dyn ConnectionPool>, database_id: &str) -> Result<Self, DbError> {
        let session = pool.acquire(database_id)?;
        Ok(Self {
            pool: Arc::clone(pool),
            database_id: database_id.to_string(),
            session: Some(session),
        })
    }

    /// Database this connection belongs to.
    #[must_use]
    pub fn database_id(&self) -> &str {
        &self.database_id
    }

    /// Sets the per-statement timeout.
    pub fn set_statement_timeout(&mut self, timeout: Duration) {
        if let Some(session) = self.session.as_mut() {
            session.set_statement_timeout(timeout);
        }
    }

    /// Executes `sql` on the held session. Blocks.
    ///
    /// # Errors
    ///
    /// See [`SqlSession::execute`].
    pub fn execute(&mut self, sql: &str) -> Result<QueryOutput, DbError> {
        match self.session.as_mut() {
            Some(session) => session.execute(sql),
            None => Err(DbError::Execution {
                message: "connection already released".to_string(),
            }),
        }
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            self.pool.release(&self.database_id, session);
        }
    }
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("database_id", &self.database_id)
            .finish_non_exhaustive()
    }
}

/// Query output together with the time the statement took.
#[derive(Debug, Clone, PartialEq)]
pub struct TimedOutput {
    /// Rows returned.
    pub output: QueryOutput,
    /// Execution time, excluding the wait for a connection.
    pub elapsed: Duration,
}

/// Runs `sql` against `database_id` on a blocking thread.
///
/// # Errors
///
/// Returns any acquire or execution error, or [`DbError::Join`] if the
/// blocking task panicked.
pub async fn execute_query(
    pool: &Arc<dyn ConnectionPool>,
    database_id: &str,
    sql: &str,
) -> Result<TimedOutput, DbError> {
    let pool = Arc::clone(pool);
    let database_id = database_id.to_string();
    let sql = sql.to_string();

    tokio::task::spawn_blocking(move || {
        let mut conn = PooledConnection::acquire(&pool, &database_id)?;
        conn.set_statement_timeout(pool.statement_timeout());
        let started = Instant::now();
        let output = conn.execute(&sql)?;
        Ok(TimedOutput {
            output,
            elapsed: started.elapsed(),
        })
    })
    .await
    .map_err(|e| DbError::Join {
        message: e.to_string(),
    })?
}

/// Locates the `SQLite` file for a database identifier under `root`.
///
/// Looks for `{root}/{id}/{id}.sqlite` first, then `{root}/{id}.sqlite`.
///
/// # Errors
///
/// Returns [`DbError::NotFound`] if neither file exists or the identifier
/// is not a plain name.
pub fn resolve_database_path(root: &Path, database_id: &str) -> Result<PathBuf, DbError> {
    let not_found = || DbError::NotFound {
        database_id: database_id.to_string(),
    };

    let plain = !database_id.is_empty()
        && !database_id.contains(['/', '\\'])
        && database_id != "."
        && database_id != "..";
    if !plain {
        return Err(not_found());
    }

    let nested = root
        .join(database_id)
        .join(format!("{database_id}.sqlite"));
    if nested.is_file() {
        return Ok(nested);
    }
    let flat = root.join(format!("{database_id}.sqlite"));
    if flat.is_file() {
        return Ok(flat);
    }
    Err(not_found())
}

/// A read-only `SQLite` connection.
struct SqliteSession {
    conn: Connection,
    timeout: Duration,
}

impl SqliteSession {
    fn run(&self, sql: &str) -> rusqlite::Result<QueryOutput> {
        let mut statement = self.conn.prepare(sql)?;
        let columns = statement
            .column_names()
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>();
        let width = columns.len();

        let mut rows = statement.query([])?;
        let mut collected = Vec::new();
        while let Some(row) = rows.next()? {
            let mut cells = Vec::with_capacity(width);
            for index in 0..width {
                cells.push(CellValue::from(row.get::<usize, rusqlite::types::Value>(index)?));
            }
            collected.push(cells);
        }

        Ok(QueryOutput {
            columns,
            rows: collected,
        })
    }
}

impl SqlSession for SqliteSession {
    fn set_statement_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    fn execute(&mut self, sql: &str) -> Result<QueryOutput, DbError> {
        let deadline = Instant::now() + self.timeout;
        self.conn
            .progress_handler(PROGRESS_OPS, Some(move || Instant::now() >= deadline))
            .map_err(|e| DbError::Execution {
                message: engine_message(&e),
            })?;
        let result = self.run(sql);
        if let Err(e) = self.conn.progress_handler(PROGRESS_OPS, None::<fn() -> bool>) {
            warn!(error = %e, "failed to clear statement timeout handler");
        }

        result.map_err(|e| {
            if e.sqlite_error_code() == Some(ErrorCode::OperationInterrupted) {
                DbError::Timeout {
                    timeout_ms: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
                }
            } else {
                DbError::Execution {
                    message: engine_message(&e),
                }
            }
        })
    }
}

/// Engine error text without the statement echo added for input errors.
fn engine_message(error: &rusqlite::Error) -> String {
    match error {
        rusqlite::Error::SqlInputError { msg, .. } => msg.clone(),
        other => other.to_string(),
    }
}

#[derive(Default)]
struct Slot {
    idle: Vec<Box<dyn SqlSession>>,
    open: usize,
}

/// Bounded pool of read-only `SQLite` connections, per database.
pub struct SqlitePool {
    root: PathBuf,
    pool_size: usize,
    acquire_timeout: Duration,
    statement_timeout: Duration,
    slots: Mutex<HashMap<String, Slot>>,
    available: Condvar,
}

impl SqlitePool {
    /// Creates a pool over the databases under `root`.
    #[must_use]
    pub fn new(
        root: impl Into<PathBuf>,
        pool_size: usize,
        acquire_timeout: Duration,
        statement_timeout: Duration,
    ) -> Self {
        Self {
            root: root.into(),
            pool_size: pool_size.max(1),
            acquire_timeout,
            statement_timeout,
            slots: Mutex::new(HashMap::new()),
            available: Condvar::new(),
        }
    }

    /// Directory holding the databases.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn open(&self, database_id: &str, path: &Path) -> Result<Box<dyn SqlSession>, DbError> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| DbError::Open {
            database_id: database_id.to_string(),
            message: e.to_string(),
        })?;
        debug!(database_id, path = %path.display(), "opened connection");
        Ok(Box::new(SqliteSession {
            conn,
            timeout: self.statement_timeout,
        }))
    }
}

impl ConnectionPool for SqlitePool {
    fn acquire(&self, database_id: &str) -> Result<Box<dyn SqlSession>, DbError> {
        let path = resolve_database_path(&self.root, database_id)?;
        let started = Instant::now();
        let deadline = started + self.acquire_timeout;

        let mut slots = self.lock();
        loop {
            let slot = slots.entry(database_id.to_string()).or_default();
            if let Some(session) = slot.idle.pop() {
                return Ok(session);
            }
            if slot.open < self.pool_size {
                slot.open += 1;
                drop(slots);
                return self.open(database_id, &path).inspect_err(|_| {
                    let mut slots = self.lock();
                    if let Some(slot) = slots.get_mut(database_id) {
                        slot.open = slot.open.saturating_sub(1);
                    }
                    self.available.notify_one();
                });
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(DbError::PoolExhausted {
                    database_id: database_id.to_string(),
                    waited_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
                });
            }
            let (guard, _) = self
                .available
                .wait_timeout(slots, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            slots = guard;
        }
    }

    fn release(&self, database_id: &str, session: Box<dyn SqlSession>) {
        let mut slots = self.lock();
        slots
            .entry(database_id.to_string())
            .or_default()
            .idle
            .push(session);
        drop(slots);
        self.available.notify_one();
    }

    fn statement_timeout(&self) -> Duration {
        self.statement_timeout
    }
}

impl std::fmt::Debug for SqlitePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlitePool")
            .field("root", &self.root)
            .field("pool_size", &self.pool_size)
            .field("acquire_timeout", &self.acquire_timeout)
            .field("statement_timeout", &self.statement_timeout)
            .finish_non_exhaustive()
    }
}

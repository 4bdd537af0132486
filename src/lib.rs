//! sqlwright: multi-agent text-to-SQL with execution-guided repair.
//!
//! A question is turned into SQL by three cooperating agents: a selector
//! that prunes the database schema, a decomposer that writes the query,
//! and a refiner that executes it and asks the model to repair failures.
//! Generated queries can be scored against reference queries by comparing
//! execution results.
//!
//! # Modules
//!
//! - [`agent`]: model client, agents, orchestrator
//! - [`db`]: pooled read-only `SQLite` access and schema introspection
//! - [`eval`]: execution-match comparison and batch evaluation
//! - [`cli`]: the `sqlwright` command line

pub mod agent;
pub mod cli;
pub mod db;
pub mod error;
pub mod eval;

pub use agent::{AgentConfig, Dataset, Orchestrator, Pipeline, Route, WorkItem};
pub use db::{ConnectionPool, SqlitePool, SqliteSchemaStore};
pub use error::{AgentError, CommandError, DbError, Error, Result};
pub use eval::{BatchEvaluator, ComparisonResult, MatchMode, ResultComparator};

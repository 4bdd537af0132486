//! CLI layer for sqlwright.
//!
//! Provides the command-line interface using clap, with commands for
//! generating SQL, evaluating question sets, comparing queries, and
//! inspecting schemas.

pub mod commands;
pub mod output;
pub mod parser;

pub use commands::execute;
pub use output::OutputFormat;
pub use parser::{Cli, Commands, ModelArgs};

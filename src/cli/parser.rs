//! Command-line argument parsing.
//!
//! Defines the CLI structure using clap derive macros.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::agent::orchestrator::Dataset;
use crate::eval::compare::MatchMode;

/// Default directory holding `<db_id>/<db_id>.sqlite` databases.
pub const DEFAULT_DB_ROOT: &str = ".";

/// sqlwright: multi-agent text-to-SQL.
///
/// Generates SQL for natural-language questions with a selector,
/// decomposer, and refiner agent, and scores generated SQL by execution
/// match against reference queries.
#[derive(Parser, Debug)]
#[command(name = "sqlwright")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Directory containing the databases.
    ///
    /// A database id `shop` resolves to `shop/shop.sqlite` or `shop.sqlite`
    /// under this directory.
    #[arg(long, env = "SQLWRIGHT_DB_ROOT", global = true)]
    pub db_root: Option<PathBuf>,

    /// Enable verbose output (debug logging on stderr).
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format (text, json).
    #[arg(long, default_value = "text", global = true)]
    pub format: String,

    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Model and pipeline overrides shared by commands that call the model.
#[derive(Args, Debug, Clone, Default)]
pub struct ModelArgs {
    /// Model for every agent (overrides `SQLWRIGHT_MODEL`).
    #[arg(long)]
    pub model: Option<String>,

    /// Orchestrator round budget per question.
    #[arg(long)]
    pub max_rounds: Option<u32>,

    /// Repair attempts per question.
    #[arg(long)]
    pub max_repair_attempts: Option<u32>,

    /// Directory containing prompt template files.
    #[arg(long)]
    pub prompt_dir: Option<PathBuf>,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Generate SQL for one question.
    ///
    /// Requires an OpenAI-compatible API key.
    #[command(after_help = r#"Examples:
  sqlwright run shop "How many users signed up in 2023?"
  sqlwright run shop "Top customer?" --evidence "top means most orders"
  sqlwright run shop "How many users?" --gold "SELECT COUNT(*) FROM users"
  OPENAI_API_KEY=sk-... sqlwright --format json run shop "Oldest order?"
"#)]
    Run {
        /// Database identifier.
        db_id: String,

        /// The natural-language question.
        question: String,

        /// External knowledge that helps answer the question.
        #[arg(short, long, default_value = "")]
        evidence: String,

        /// Dataset profile (bird, spider, generic).
        #[arg(short, long, default_value = "generic")]
        dataset: Dataset,

        /// Reference SQL to compare the generated query against.
        #[arg(long)]
        gold: Option<String>,

        /// Model and pipeline overrides.
        #[command(flatten)]
        model: ModelArgs,
    },

    /// Evaluate a question file by execution match.
    ///
    /// The file is a JSON array of BIRD (`question_id`, `db_id`,
    /// `question`, `evidence`, `SQL`) or Spider (`db_id`, `question`,
    /// `query`) records.
    #[command(after_help = r#"Examples:
  sqlwright --db-root dev_databases evaluate dev.json --dataset bird
  sqlwright evaluate dev.json --limit 20 --concurrency 4
  sqlwright evaluate dev.json --output records.json --mode set
"#)]
    Evaluate {
        /// Question file.
        questions: PathBuf,

        /// Dataset profile (bird, spider, generic).
        #[arg(short, long, default_value = "generic")]
        dataset: Dataset,

        /// Maximum questions processed at once.
        #[arg(long)]
        concurrency: Option<usize>,

        /// Evaluate only the first N questions.
        #[arg(long)]
        limit: Option<usize>,

        /// Result comparison mode (multiset, set).
        #[arg(long, default_value = "multiset")]
        mode: MatchMode,

        /// Write per-question records to this JSON file.
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Model and pipeline overrides.
        #[command(flatten)]
        model: ModelArgs,
    },

    /// Compare two queries by executing both.
    #[command(after_help = r#"Examples:
  sqlwright compare shop "SELECT name FROM users" "SELECT name FROM users ORDER BY id"
  sqlwright --format json compare shop "SELECT 1" "SELECT 1.0"
"#)]
    Compare {
        /// Database identifier.
        db_id: String,

        /// Candidate SQL.
        candidate: String,

        /// Reference SQL.
        gold: String,

        /// Result comparison mode (multiset, set).
        #[arg(long, default_value = "multiset")]
        mode: MatchMode,

        /// Treat differently ordered columns as a mismatch.
        #[arg(long)]
        respect_column_order: bool,
    },

    /// Print a database schema as the agents see it.
    Schema {
        /// Database identifier.
        db_id: String,
    },

    /// Write default prompt templates to disk for customization.
    ///
    /// Creates markdown template files in the prompt directory so users
    /// can customize agent system prompts without recompiling.
    #[command(name = "init-prompts")]
    #[command(after_help = r#"Examples:
  sqlwright init-prompts                      # Write to ~/.config/sqlwright/prompts/
  sqlwright init-prompts --dir ./my-prompts   # Write to custom directory
"#)]
    InitPrompts {
        /// Target directory for prompt templates.
        ///
        /// Defaults to `~/.config/sqlwright/prompts/`.
        #[arg(long)]
        dir: Option<PathBuf>,
    },
}

impl Cli {
    /// Returns the database root, using the default if not specified.
    #[must_use]
    pub fn get_db_root(&self) -> PathBuf {
        self.db_root
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DB_ROOT))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_parse() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_default_db_root() {
        let cli = Cli {
            db_root: None,
            verbose: false,
            format: "text".to_string(),
            command: Commands::Schema {
                db_id: "shop".to_string(),
            },
        };
        assert_eq!(cli.get_db_root(), PathBuf::from(DEFAULT_DB_ROOT));
    }

    #[test]
    fn test_run_arguments() {
        let cli = Cli::try_parse_from([
            "sqlwright",
            "--db-root",
            "/data",
            "run",
            "shop",
            "How many users?",
            "--dataset",
            "bird",
            "--model",
            "m",
        ])
        .unwrap_or_else(|_| unreachable!());

        assert_eq!(cli.get_db_root(), PathBuf::from("/data"));
        match cli.command {
            Commands::Run {
                db_id,
                dataset,
                model,
                ..
            } => {
                assert_eq!(db_id, "shop");
                assert_eq!(dataset, Dataset::Bird);
                assert_eq!(model.model.as_deref(), Some("m"));
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_rejects_unknown_mode() {
        let parsed = Cli::try_parse_from(["sqlwright", "compare", "db", "SELECT 1", "SELECT 1", "--mode", "bag"]);
        assert!(parsed.is_err());
    }
}

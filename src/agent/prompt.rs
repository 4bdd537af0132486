//! System prompts and template builders for agents.
//!
//! System prompts define each agent's role and output contract. Template
//! builders format the per-item user message from the work item's fields.
//! The gold query is never passed to any builder.

use std::fmt::Write;
use std::path::{Path, PathBuf};

/// System prompt for the selector (schema pruning) agent.
pub const SELECTOR_SYSTEM_PROMPT: &str = r#"You are an experienced database administrator. Given a database schema, a question, and optional evidence, decide which tables and columns are needed to answer the question with SQL.

## Instructions

1. Discard any table that is irrelevant to the question and evidence.
2. For a relevant table with many columns, list only the columns that could be used: selected values, filters, joins, grouping, or ordering. Rank them by relevance.
3. Keep a table in full when most of its columns could matter.
4. Foreign-key and primary-key columns are retained automatically; you do not need to list them.

## Output Format (JSON)

Return a single JSON object with one entry per table:
```json
{
  "table_a": "keep_all",
  "table_b": "drop_all",
  "table_c": ["column_1", "column_2"]
}
```

Only return the JSON object."#;

/// System prompt for the decomposer (SQL synthesis) agent.
pub const DECOMPOSER_SYSTEM_PROMPT: &str = r"You are an expert SQL writer. Given a database schema, foreign keys, a question, and optional evidence, write one SQLite query that answers the question.

## Instructions

1. Use only tables and columns that appear in the schema.
2. Use the evidence as ground truth for domain terms, formulas, and value mappings.
3. When the question is complex, break it into sub-questions, answer each with SQL, and build the final query from them.
4. Select only the columns the question asks for, in the order it asks for them.
5. Quote identifiers containing spaces or special characters with backticks.
6. Prefer JOIN over nested subqueries when both work, and avoid unnecessary DISTINCT.

## Output Format

Finish with exactly one fenced block containing the final query:
```sql
SELECT ...
```";

/// System prompt for the refiner (repair) agent.
pub const REFINER_SYSTEM_PROMPT: &str = r"You are an expert at fixing SQL. A query was executed against a SQLite database and failed or returned an unusable result. Using the schema, foreign keys, question, and evidence, correct the query.

## Instructions

1. Read the error text carefully: it names the missing table or column, the syntax problem, or the result problem.
2. Fix only what is needed; keep the intent of the original query.
3. Use only tables and columns that appear in the schema.
4. If the result was empty or contained NULL values, reconsider filters, join conditions, and add NOT NULL conditions where the question implies existing values.

## Output Format

Return exactly one fenced block containing the corrected query:
```sql
SELECT ...
```";

/// Default prompt directory relative to the user's home.
const DEFAULT_PROMPT_DIR: &str = ".config/sqlwright/prompts";

/// Filename for the selector prompt template.
const SELECTOR_FILENAME: &str = "selector.md";
/// Filename for the decomposer prompt template.
const DECOMPOSER_FILENAME: &str = "decomposer.md";
/// Filename for the refiner prompt template.
const REFINER_FILENAME: &str = "refiner.md";

/// A set of system prompts for all agents.
///
/// Loaded from external template files when available, falling back to
/// compiled-in defaults. Use [`PromptSet::load`] to resolve the prompt
/// directory from CLI flags, environment variables, or the default path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptSet {
    /// System prompt for the selector agent.
    pub selector: String,
    /// System prompt for the decomposer agent.
    pub decomposer: String,
    /// System prompt for the refiner agent.
    pub refiner: String,
}

impl PromptSet {
    /// Loads prompts from the given directory, falling back to compiled-in defaults.
    ///
    /// Resolution order for `prompt_dir`:
    /// 1. Explicit `prompt_dir` argument (from `--prompt-dir` CLI flag)
    /// 2. `SQLWRIGHT_PROMPT_DIR` environment variable
    /// 3. `~/.config/sqlwright/prompts/`
    ///
    /// Each file is loaded independently; a missing file uses its default.
    #[must_use]
    pub fn load(prompt_dir: Option<&Path>) -> Self {
        let resolved_dir = prompt_dir
            .map(PathBuf::from)
            .or_else(|| std::env::var("SQLWRIGHT_PROMPT_DIR").ok().map(PathBuf::from))
            .or_else(Self::default_dir);

        let load_file = |filename: &str, default: &str| -> String {
            resolved_dir
                .as_ref()
                .map(|dir| dir.join(filename))
                .and_then(|path| std::fs::read_to_string(&path).ok())
                .filter(|content| !content.trim().is_empty())
                .unwrap_or_else(|| default.to_string())
        };

        Self {
            selector: load_file(SELECTOR_FILENAME, SELECTOR_SYSTEM_PROMPT),
            decomposer: load_file(DECOMPOSER_FILENAME, DECOMPOSER_SYSTEM_PROMPT),
            refiner: load_file(REFINER_FILENAME, REFINER_SYSTEM_PROMPT),
        }
    }

    /// Returns compiled-in defaults without checking the filesystem.
    #[must_use]
    pub fn defaults() -> Self {
        Self {
            selector: SELECTOR_SYSTEM_PROMPT.to_string(),
            decomposer: DECOMPOSER_SYSTEM_PROMPT.to_string(),
            refiner: REFINER_SYSTEM_PROMPT.to_string(),
        }
    }

    /// Writes the compiled-in default prompts to the given directory.
    ///
    /// Creates the directory if it does not exist. Existing files are
    /// **not** overwritten.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if directory creation or file writing fails.
    pub fn write_defaults(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
        std::fs::create_dir_all(dir)?;

        let templates = [
            (SELECTOR_FILENAME, SELECTOR_SYSTEM_PROMPT),
            (DECOMPOSER_FILENAME, DECOMPOSER_SYSTEM_PROMPT),
            (REFINER_FILENAME, REFINER_SYSTEM_PROMPT),
        ];

        let mut written = Vec::new();
        for (filename, content) in &templates {
            let path = dir.join(filename);
            if !path.exists() {
                std::fs::write(&path, content)?;
                written.push(path);
            }
        }

        Ok(written)
    }

    /// Returns the default prompt directory under the user's home.
    ///
    /// Returns `None` if the home directory cannot be determined.
    #[must_use]
    pub fn default_dir() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(DEFAULT_PROMPT_DIR))
    }
}

/// How the decomposer frames the generation task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecomposeStyle {
    /// Step-by-step sub-questions, evidence included (BIRD-style data).
    Decomposition,
    /// A single direct query (Spider-style data, no evidence).
    Plain,
}

/// Schema context shared by all builders.
#[derive(Debug, Clone, Copy)]
pub struct SchemaContext<'a> {
    /// Database identifier.
    pub database_id: &'a str,
    /// Rendered schema.
    pub schema: &'a str,
    /// Rendered foreign keys.
    pub foreign_keys: &'a str,
}

fn push_question(prompt: &mut String, question: &str, evidence: &str) {
    let _ = write!(prompt, "<question>{question}</question>\n\n");
    if !evidence.trim().is_empty() {
        let _ = write!(prompt, "<evidence>{evidence}</evidence>\n\n");
    }
}

fn push_schema(prompt: &mut String, ctx: &SchemaContext<'_>) {
    let _ = write!(
        prompt,
        "<database id=\"{}\">\n<schema>\n{}\n</schema>\n<foreign_keys>\n{}\n</foreign_keys>\n</database>\n\n",
        ctx.database_id,
        ctx.schema.trim_end(),
        ctx.foreign_keys.trim_end(),
    );
}

/// Builds the user message for the selector agent.
#[must_use]
pub fn build_selector_prompt(ctx: &SchemaContext<'_>, question: &str, evidence: &str) -> String {
    let mut prompt = String::new();
    push_schema(&mut prompt, ctx);
    push_question(&mut prompt, question, evidence);
    prompt.push_str("Return the JSON object of tables to keep.");
    prompt
}

/// Builds the user message for the decomposer agent.
#[must_use]
pub fn build_decomposer_prompt(
    style: DecomposeStyle,
    ctx: &SchemaContext<'_>,
    question: &str,
    evidence: &str,
) -> String {
    let mut prompt = String::new();
    push_schema(&mut prompt, ctx);
    match style {
        DecomposeStyle::Decomposition => {
            push_question(&mut prompt, question, evidence);
            prompt.push_str(
                "Decompose the question into sub-questions, write SQL for each one step \
                 by step, and end with the final SQL in a ```sql block.",
            );
        }
        DecomposeStyle::Plain => {
            push_question(&mut prompt, question, "");
            prompt.push_str("Write the SQL that answers the question in a ```sql block.");
        }
    }
    prompt
}

/// Builds the user message for the refiner agent.
#[must_use]
pub fn build_refiner_prompt(
    ctx: &SchemaContext<'_>,
    question: &str,
    evidence: &str,
    failed_sql: &str,
    error: &str,
) -> String {
    let mut prompt = String::new();
    push_schema(&mut prompt, ctx);
    push_question(&mut prompt, question, evidence);
    let _ = write!(
        prompt,
        "<failed_sql>\n{failed_sql}\n</failed_sql>\n\n<error>{error}</error>\n\n\
         Correct the SQL and return it in a ```sql block."
    );
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> SchemaContext<'static> {
        SchemaContext {
            database_id: "shop",
            schema: "# Table: users\n[\n  (id, id.),\n]",
            foreign_keys: "orders.`user_id` = users.`id`",
        }
    }

    #[test]
    fn test_build_selector_prompt() {
        let prompt = build_selector_prompt(&ctx(), "how many users?", "users are people");
        assert!(prompt.contains(r#"<database id="shop">"#));
        assert!(prompt.contains("# Table: users"));
        assert!(prompt.contains("<question>how many users?</question>"));
        assert!(prompt.contains("<evidence>users are people</evidence>"));
    }

    #[test]
    fn test_empty_evidence_omitted() {
        let prompt = build_selector_prompt(&ctx(), "q", "  ");
        assert!(!prompt.contains("<evidence>"));
    }

    #[test]
    fn test_plain_style_drops_evidence() {
        let prompt = build_decomposer_prompt(DecomposeStyle::Plain, &ctx(), "q", "hint");
        assert!(!prompt.contains("hint"));
        assert!(!prompt.contains("sub-questions"));
    }

    #[test]
    fn test_decomposition_style_includes_evidence() {
        let prompt = build_decomposer_prompt(DecomposeStyle::Decomposition, &ctx(), "q", "hint");
        assert!(prompt.contains("<evidence>hint</evidence>"));
        assert!(prompt.contains("sub-questions"));
        assert!(prompt.contains("orders.`user_id` = users.`id`"));
    }

    #[test]
    fn test_build_refiner_prompt() {
        let prompt = build_refiner_prompt(&ctx(), "q", "", "SELECT nme FROM users", "no such column: nme");
        assert!(prompt.contains("<failed_sql>\nSELECT nme FROM users\n</failed_sql>"));
        assert!(prompt.contains("<error>no such column: nme</error>"));
    }

    #[test]
    fn test_write_defaults_then_load() {
        let dir = tempfile::tempdir().unwrap_or_else(|_| unreachable!());
        let written = PromptSet::write_defaults(dir.path()).unwrap_or_default();
        assert_eq!(written.len(), 3);

        std::fs::write(dir.path().join(REFINER_FILENAME), "custom refiner")
            .unwrap_or_else(|_| unreachable!());
        let prompts = PromptSet::load(Some(dir.path()));
        assert_eq!(prompts.selector, SELECTOR_SYSTEM_PROMPT);
        assert_eq!(prompts.refiner, "custom refiner");

        let again = PromptSet::write_defaults(dir.path()).unwrap_or_default();
        assert!(again.is_empty());
    }

    #[test]
    fn test_prompts_not_empty() {
        let defaults = PromptSet::defaults();
        assert!(!defaults.selector.is_empty());
        assert!(!defaults.decomposer.is_empty());
        assert!(!defaults.refiner.is_empty());
    }
}

//! Default prompt for PostgreSQL question answering

use std::fmt::Write;

use super::{GenerationRequest, Prompt, PromptBuilder};

/// System prompt for read-oriented PostgreSQL generation
pub const SQL_GENERATION_SYSTEM_PROMPT: &str = "\
You are a PostgreSQL expert who translates questions into SQL.

Rules:
- Write a single PostgreSQL SELECT statement (WITH clauses are fine).
- Never modify data or schema: no INSERT, UPDATE, DELETE, DDL, or session commands.
- Never use dynamic SQL (EXECUTE, PREPARE, dblink) or functions with side effects.
- Only reference tables and columns that appear in the schema you are given.
- Qualify table names with their schema when the schema is known.
- Add a LIMIT clause when the question does not bound the number of rows.
- Reply with the SQL only, inside one ```sql fenced block, with no explanation.";

/// Prompt builder used unless a caller supplies its own
#[derive(Debug, Clone)]
pub struct DefaultPromptBuilder {
    system: String,
}

impl Default for DefaultPromptBuilder {
    fn default() -> Self {
        Self { system: SQL_GENERATION_SYSTEM_PROMPT.to_string() }
    }
}

impl DefaultPromptBuilder {
    /// Builder with a custom system prompt
    pub fn with_system_prompt(system: impl Into<String>) -> Self {
        Self { system: system.into() }
    }
}

impl PromptBuilder for DefaultPromptBuilder {
    fn build(&self, request: &GenerationRequest) -> Prompt {
        let mut user = String::new();

        let _ = writeln!(user, "Database: {}", request.database);
        if let Some(schema) = request.schema_context.as_deref().filter(|s| !s.trim().is_empty()) {
            let _ = writeln!(user, "\nSchema:\n{}", schema.trim_end());
        }
        let _ = writeln!(user, "\nQuestion: {}", request.question.trim());

        if let Some(prior) = &request.prior_rejection {
            let _ = write!(
                user,
                "\nYour previous answer was rejected.\n\
                 Previous SQL:\n```sql\n{}\n```\n\
                 Rejected by rule {}: {}\n\
                 Write a corrected query that satisfies the rules.\n",
                prior.sql.trim(),
                prior.rule,
                prior.reason
            );
        }

        Prompt { system: self.system.clone(), user }
    }
}

//! SQL Generation
//!
//! Turns a natural-language question plus schema context into candidate SQL
//! through a completion service. Candidates are untrusted until the
//! validator accepts them.
//!
//! # Retry Feedback
//! The generator never retries on its own. When a request carries a
//! [`PriorRejection`], the prompt includes the rejected SQL and the reason so
//! the next candidate can correct it.

pub mod openai;
pub mod prompt;

use std::future::Future;
use std::time::Duration;

use serde::Serialize;

use crate::engine::millis;
use crate::error::{CompletionError, GenerationError};
use crate::validator::RuleId;

pub use openai::{CompletionConfig, OpenAiClient};
pub use prompt::DefaultPromptBuilder;

/// Leading keywords that mark the start of a bare SQL statement
const STATEMENT_KEYWORDS: &[&str] = &[
    "SELECT", "WITH", "INSERT", "UPDATE", "DELETE", "EXPLAIN", "SHOW", "VALUES", "TABLE", "CREATE",
    "ALTER", "DROP", "TRUNCATE", "MERGE",
];

/// Prompt sent to the completion service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

/// A previous candidate and why the validator rejected it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PriorRejection {
    pub sql: String,
    pub reason: String,
    pub rule: RuleId,
}

/// Input of one generation attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub question: String,
    pub database: String,
    pub schema_context: Option<String>,
    pub prior_rejection: Option<PriorRejection>,
}

impl GenerationRequest {
    pub fn new(question: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            database: database.into(),
            schema_context: None,
            prior_rejection: None,
        }
    }

    #[must_use]
    pub fn with_schema_context(mut self, context: impl Into<String>) -> Self {
        self.schema_context = Some(context.into());
        self
    }
}

/// SQL text produced by generation, never executed before validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateSql {
    pub sql: String,
    pub request: GenerationRequest,
}

/// Builds the prompt for one generation attempt
pub trait PromptBuilder: Send + Sync {
    fn build(&self, request: &GenerationRequest) -> Prompt;
}

/// Completion service capability
pub trait CompletionClient: Send + Sync + 'static {
    /// Send `prompt` and return the raw response text
    fn complete(
        &self,
        prompt: &Prompt,
    ) -> impl Future<Output = Result<String, CompletionError>> + Send;
}

/// SQL generator
pub struct SqlGenerator<C, B = DefaultPromptBuilder> {
    client: C,
    builder: B,
    timeout: Duration,
}

impl<C: CompletionClient> SqlGenerator<C> {
    /// Generator with the default prompt builder
    pub fn new(client: C, timeout: Duration) -> Self {
        Self::with_builder(client, DefaultPromptBuilder::default(), timeout)
    }
}

impl<C: CompletionClient, B: PromptBuilder> SqlGenerator<C, B> {
    pub const fn with_builder(client: C, builder: B, timeout: Duration) -> Self {
        Self { client, builder, timeout }
    }

    /// Produce one candidate for `request`
    ///
    /// The completion call is bounded by the generation timeout.
    pub async fn generate(
        &self,
        request: GenerationRequest,
    ) -> Result<CandidateSql, GenerationError> {
        let prompt = self.builder.build(&request);

        let response = tokio::time::timeout(self.timeout, self.client.complete(&prompt))
            .await
            .map_err(|_| GenerationError::Timeout(millis(self.timeout)))??;

        let sql = extract_sql(&response).ok_or(GenerationError::NoSql)?;
        tracing::debug!(database = %request.database, sql = %sql, "Generated candidate SQL");

        Ok(CandidateSql { sql, request })
    }
}

/// Pull the SQL out of a completion response
///
/// Prefers a ```` ```sql ```` fence, then any fence, then the first line that
/// starts with a statement keyword through the end of the text.
#[must_use]
pub fn extract_sql(response: &str) -> Option<String> {
    let lower = response.to_ascii_lowercase();

    let fenced = lower
        .find("```sql")
        .and_then(|start| fence_body(response, start + "```sql".len()))
        .or_else(|| {
            lower.find("```").and_then(|start| {
                let after = start + 3;
                // Skip a language tag on the opening fence line
                let body_start = match response[after..].find('\n') {
                    Some(nl) if !response[after..after + nl].trim().contains(' ') => after + nl + 1,
                    _ => after,
                };
                fence_body(response, body_start)
            })
        });

    let sql = fenced.or_else(|| {
        let mut offset = 0;
        for line in response.split_inclusive('\n') {
            if starts_with_keyword(line.trim_start()) {
                return Some(response[offset..].to_string());
            }
            offset += line.len();
        }
        None
    })?;

    let sql = sql.trim();
    (!sql.is_empty()).then(|| sql.to_string())
}

/// Text from `start` up to the closing fence (or the end when unclosed)
fn fence_body(text: &str, start: usize) -> Option<String> {
    let rest = text.get(start..)?;
    let end = rest.find("```").unwrap_or(rest.len());
    Some(rest[..end].to_string())
}

fn starts_with_keyword(line: &str) -> bool {
    let word: String =
        line.chars().take_while(char::is_ascii_alphabetic).collect::<String>().to_ascii_uppercase();
    STATEMENT_KEYWORDS.contains(&word.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[test]
    fn test_extract_sql_fenced_block() {
        let response = "Here you go:\n```sql\nSELECT * FROM users;\n```\nThis lists users.";
        assert_eq!(extract_sql(response).as_deref(), Some("SELECT * FROM users;"));
    }

    #[test]
    fn test_extract_sql_uppercase_fence_tag() {
        let response = "```SQL\nSELECT 1\n```";
        assert_eq!(extract_sql(response).as_deref(), Some("SELECT 1"));
    }

    #[test]
    fn test_extract_sql_generic_fence() {
        let response = "```\nSELECT count(*) FROM orders\n```";
        assert_eq!(extract_sql(response).as_deref(), Some("SELECT count(*) FROM orders"));

        let response = "```postgresql\nSELECT 2\n```";
        assert_eq!(extract_sql(response).as_deref(), Some("SELECT 2"));
    }

    #[test]
    fn test_extract_sql_bare_statement() {
        let response = "Sure.\nselect id\nfrom users";
        assert_eq!(extract_sql(response).as_deref(), Some("select id\nfrom users"));

        let response = "WITH x AS (SELECT 1) SELECT * FROM x";
        assert_eq!(extract_sql(response).as_deref(), Some(response));
    }

    #[test]
    fn test_extract_sql_none() {
        assert_eq!(extract_sql("I cannot answer that."), None);
        assert_eq!(extract_sql("```sql\n\n```"), None);
        assert_eq!(extract_sql("Selection criteria are unclear"), None);
    }

    struct ScriptedClient {
        response: Result<String, CompletionError>,
        prompts: Mutex<Vec<Prompt>>,
    }

    impl CompletionClient for ScriptedClient {
        async fn complete(&self, prompt: &Prompt) -> Result<String, CompletionError> {
            self.prompts.lock().unwrap().push(prompt.clone());
            self.response.clone()
        }
    }

    struct StalledClient;

    impl CompletionClient for StalledClient {
        async fn complete(&self, _prompt: &Prompt) -> Result<String, CompletionError> {
            std::future::pending().await
        }
    }

    fn scripted(response: Result<String, CompletionError>) -> ScriptedClient {
        ScriptedClient { response, prompts: Mutex::new(Vec::new()) }
    }

    #[tokio::test]
    async fn test_generate_returns_candidate_with_request() {
        let generator =
            SqlGenerator::new(scripted(Ok("```sql\nSELECT 1\n```".to_string())), TIMEOUT);
        let request = GenerationRequest::new("one", "sales");

        let candidate = generator.generate(request.clone()).await.unwrap();
        assert_eq!(candidate.sql, "SELECT 1");
        assert_eq!(candidate.request, request);
    }

    #[tokio::test]
    async fn test_generate_includes_prior_rejection() {
        let client = scripted(Ok("SELECT 1".to_string()));
        let generator = SqlGenerator::new(client, TIMEOUT);
        let mut request = GenerationRequest::new("remove old users", "sales");
        request.prior_rejection = Some(PriorRejection {
            sql: "DELETE FROM users".to_string(),
            reason: "DELETE is a write operation".to_string(),
            rule: RuleId::WriteNotAllowed,
        });

        generator.generate(request).await.unwrap();

        let prompts = generator.client.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].user.contains("DELETE FROM users"));
        assert!(prompts[0].user.contains("DELETE is a write operation"));
    }

    #[tokio::test]
    async fn test_generate_errors() {
        let generator = SqlGenerator::new(scripted(Ok("no idea".to_string())), TIMEOUT);
        let err = generator.generate(GenerationRequest::new("?", "sales")).await.unwrap_err();
        assert_eq!(err, GenerationError::NoSql);

        let generator = SqlGenerator::new(
            scripted(Err(CompletionError::RateLimited("slow down".to_string()))),
            TIMEOUT,
        );
        let err = generator.generate(GenerationRequest::new("?", "sales")).await.unwrap_err();
        assert!(matches!(err, GenerationError::Completion(CompletionError::RateLimited(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_generate_timeout() {
        let generator = SqlGenerator::new(StalledClient, Duration::from_millis(250));
        let err = generator.generate(GenerationRequest::new("?", "sales")).await.unwrap_err();
        assert_eq!(err, GenerationError::Timeout(250));
    }
}

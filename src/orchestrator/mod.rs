//! Query Orchestration
//!
//! Sequences one natural-language request through generation, validation and
//! execution:
//!
//! ```text
//! Generating -> Validating -> Accepted -> Acquiring -> Executing -> Done
//!                    |
//!                    +-> Rejected -> (attempts left) -> Generating
//!                                 -> (bound reached) -> ValidationRejected
//! ```
//!
//! Rejections are fed back to the generator up to `max_attempts` generations
//! in total. Execution failures are never retried. Every failure surfaces as
//! exactly one [`OrchestrationError`].
//!
//! # Cancellation
//! Dropping the future returned by [`QueryOrchestrator::run`] cancels the
//! request at whatever suspension point it reached; the scoped connection
//! guarantees the pool gets its capacity back.
//! [`QueryOrchestrator::run_cancellable`] does the same driven by a
//! [`CancellationToken`].

pub mod schema;

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::engine::{Driver, QueryResult};
use crate::error::OrchestrationError;
use crate::generator::{
    CompletionClient, DefaultPromptBuilder, GenerationRequest, PriorRejection, PromptBuilder,
    SqlGenerator,
};
use crate::registry::{PoolRegistry, PoolStatus};
use crate::validator::{
    AcceptedStatement, SqlParser, SqlValidator, SqlparserBackend, ValidationPolicy,
    ValidationVerdict,
};

pub use schema::SchemaCatalog;

/// Result type for orchestrated requests
pub type Result<T> = std::result::Result<T, OrchestrationError>;

/// Where a request currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum Stage {
    Generating,
    Validating,
    Acquiring,
    Executing,
}

impl Stage {
    const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Generating,
            1 => Self::Validating,
            2 => Self::Acquiring,
            _ => Self::Executing,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Generating => "generating SQL",
            Self::Validating => "validating SQL",
            Self::Acquiring => "acquiring a connection",
            Self::Executing => "executing SQL",
        };
        f.write_str(text)
    }
}

/// Current stage of one request, readable after its future was dropped
struct StageTracker(AtomicU8);

impl StageTracker {
    const fn new() -> Self {
        Self(AtomicU8::new(Stage::Generating as u8))
    }

    fn enter(&self, stage: Stage) {
        self.0.store(stage as u8, Ordering::Release);
    }

    fn current(&self) -> Stage {
        Stage::from_u8(self.0.load(Ordering::Acquire))
    }
}

const fn default_max_attempts() -> u32 {
    3
}

const fn default_generation_timeout_ms() -> u64 {
    30_000
}

const fn default_true() -> bool {
    true
}

/// Orchestrator settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Total generation attempts per request (minimum 1)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Bound on each completion call
    #[serde(default = "default_generation_timeout_ms")]
    pub generation_timeout_ms: u64,

    /// Optional deadline for a whole request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_timeout_ms: Option<u64>,

    /// Load the database catalog and include it in prompts
    #[serde(default = "default_true")]
    pub schema_context: bool,

    /// Reject references to tables missing from the loaded catalog
    #[serde(default)]
    pub enforce_known_tables: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            generation_timeout_ms: default_generation_timeout_ms(),
            request_timeout_ms: None,
            schema_context: true,
            enforce_known_tables: false,
        }
    }
}

impl OrchestratorConfig {
    #[must_use]
    pub const fn generation_timeout(&self) -> Duration {
        Duration::from_millis(self.generation_timeout_ms)
    }
}

/// A natural-language request against one database
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryRequest {
    pub question: String,
    pub database: String,
    /// Caller-supplied schema context; replaces the loaded catalog
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_context: Option<String>,
}

impl QueryRequest {
    pub fn new(question: impl Into<String>, database: impl Into<String>) -> Self {
        Self { question: question.into(), database: database.into(), schema_context: None }
    }
}

/// Outcome of a successful request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryAnswer {
    /// SQL that ran (sanitized by the validator)
    pub sql: String,
    /// Generation attempts used (1 for caller-supplied SQL)
    pub attempts: u32,
    pub result: QueryResult,
}

/// Registered database as reported to clients
#[derive(Debug, Clone, Serialize)]
pub struct DatabaseInfo {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub database: String,
    pub allow_write: bool,
    pub pool: PoolStatus,
}

/// Retry bookkeeping of one request
struct AttemptState {
    attempt: u32,
    max_attempts: u32,
    prior_rejection: Option<PriorRejection>,
}

impl AttemptState {
    const fn new(max_attempts: u32) -> Self {
        Self { attempt: 0, max_attempts, prior_rejection: None }
    }

    fn begin(&mut self) -> u32 {
        self.attempt += 1;
        self.attempt
    }

    const fn exhausted(&self) -> bool {
        self.attempt >= self.max_attempts
    }
}

/// Composes the registry, generator and validator
pub struct QueryOrchestrator<D, C, P = SqlparserBackend, B = DefaultPromptBuilder>
where
    D: Driver,
{
    registry: Arc<PoolRegistry<D>>,
    generator: SqlGenerator<C, B>,
    validator: SqlValidator<P>,
    policy: ValidationPolicy,
    database_policies: HashMap<String, ValidationPolicy>,
    config: OrchestratorConfig,
    schemas: RwLock<HashMap<String, Arc<SchemaCatalog>>>,
}

impl<D, C, P, B> QueryOrchestrator<D, C, P, B>
where
    D: Driver,
    C: CompletionClient,
    P: SqlParser,
    B: PromptBuilder,
{
    pub fn new(
        registry: Arc<PoolRegistry<D>>,
        generator: SqlGenerator<C, B>,
        validator: SqlValidator<P>,
        policy: ValidationPolicy,
        mut config: OrchestratorConfig,
    ) -> Self {
        config.max_attempts = config.max_attempts.max(1);
        Self {
            registry,
            generator,
            validator,
            policy,
            database_policies: HashMap::new(),
            config,
            schemas: RwLock::new(HashMap::new()),
        }
    }

    /// Override the policy for one database
    #[must_use]
    pub fn with_database_policy(
        mut self,
        database: impl Into<String>,
        policy: ValidationPolicy,
    ) -> Self {
        self.database_policies.insert(database.into(), policy);
        self
    }

    /// Registry this orchestrator executes against
    #[must_use]
    pub fn registry(&self) -> &Arc<PoolRegistry<D>> {
        &self.registry
    }

    #[must_use]
    pub const fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Policy that applies to `database`
    #[must_use]
    pub fn policy_for(&self, database: &str) -> &ValidationPolicy {
        self.database_policies.get(database).unwrap_or(&self.policy)
    }

    /// Answer a natural-language request
    ///
    /// Dropping the returned future cancels the request.
    pub async fn run(&self, request: QueryRequest) -> Result<QueryAnswer> {
        let stage = StageTracker::new();
        self.with_deadline(&stage, self.answer(request, &stage)).await
    }

    /// [`run`](Self::run), cancelled when `token` fires
    ///
    /// A token cancelled before the call returns [`OrchestrationError::Cancelled`]
    /// without contacting the completion service.
    pub async fn run_cancellable(
        &self,
        request: QueryRequest,
        token: CancellationToken,
    ) -> Result<QueryAnswer> {
        tokio::select! {
            biased;
            () = token.cancelled() => {
                tracing::info!(database = %request.database, "Request cancelled");
                Err(OrchestrationError::Cancelled)
            }
            result = self.run(request.clone()) => result,
        }
    }

    /// Validate caller-supplied SQL and execute it, without generation
    pub async fn execute_sql(&self, database: &str, sql: &str) -> Result<QueryAnswer> {
        let stage = StageTracker::new();
        stage.enter(Stage::Validating);
        self.with_deadline(&stage, async {
            self.ensure_registered(database).await?;
            let catalog = self.catalog_for(database, false).await?;
            let policy = self.request_policy(database, catalog.as_deref());

            match self.validator.validate(sql, &policy) {
                ValidationVerdict::Accepted { sql, statements } => {
                    let result = self.execute(database, &statements, &policy, &stage).await?;
                    Ok(QueryAnswer { sql, attempts: 1, result })
                }
                ValidationVerdict::Rejected(rejection) => {
                    tracing::warn!(
                        database = %database,
                        rule = %rejection.rule,
                        reason = %rejection.reason,
                        "Caller SQL rejected"
                    );
                    Err(OrchestrationError::ValidationRejected {
                        attempts: 1,
                        reason: rejection.reason,
                        rule: rejection.rule,
                    })
                }
            }
        })
        .await
    }

    /// Validate SQL against the policy for `database` without running it
    #[must_use]
    pub fn validate_sql(&self, database: &str, sql: &str) -> ValidationVerdict {
        self.validator.validate(sql, self.policy_for(database))
    }

    /// Registered databases with their pool counters
    pub async fn databases(&self) -> Vec<DatabaseInfo> {
        let mut infos = Vec::new();
        for name in self.registry.names().await {
            let Some(pool) = self.registry.pool(&name).await else {
                continue;
            };
            let config = pool.config();
            infos.push(DatabaseInfo {
                name: config.name.clone(),
                host: config.host.clone(),
                port: config.port,
                database: config.database_name().to_string(),
                allow_write: self.policy_for(&name).allow_write,
                pool: pool.status(),
            });
        }
        infos
    }

    /// Apply the optional whole-request deadline
    async fn with_deadline<F>(&self, stage: &StageTracker, work: F) -> Result<QueryAnswer>
    where
        F: Future<Output = Result<QueryAnswer>>,
    {
        let Some(timeout_ms) = self.config.request_timeout_ms else {
            return work.await;
        };

        match tokio::time::timeout(Duration::from_millis(timeout_ms), work).await {
            Ok(result) => result,
            Err(_) => {
                let stage = stage.current();
                tracing::warn!(timeout_ms, stage = %stage, "Request deadline expired");
                Err(OrchestrationError::Timeout { stage, timeout_ms })
            }
        }
    }

    async fn ensure_registered(&self, database: &str) -> Result<()> {
        if self.registry.contains(database).await {
            return Ok(());
        }
        Err(OrchestrationError::pool_unavailable(
            database,
            crate::error::RegistryError::UnknownDatabase(database.to_string()),
        ))
    }

    /// The bounded generate/validate loop followed by execution
    async fn answer(&self, request: QueryRequest, stage: &StageTracker) -> Result<QueryAnswer> {
        let database = request.database.as_str();

        // Fail before spending a completion call
        self.ensure_registered(database).await?;

        let catalog = self.catalog_for(database, request.schema_context.is_none()).await?;
        let schema_context = request.schema_context.clone().or_else(|| {
            catalog.as_ref().filter(|_| self.config.schema_context).map(|c| c.render())
        });
        let policy = self.request_policy(database, catalog.as_deref());

        let mut state = AttemptState::new(self.config.max_attempts);
        loop {
            let attempt = state.begin();

            stage.enter(Stage::Generating);
            let generation = GenerationRequest {
                question: request.question.clone(),
                database: database.to_string(),
                schema_context: schema_context.clone(),
                prior_rejection: state.prior_rejection.take(),
            };
            let candidate = self
                .generator
                .generate(generation)
                .await
                .map_err(OrchestrationError::GenerationFailed)?;

            stage.enter(Stage::Validating);
            match self.validator.validate(&candidate.sql, &policy) {
                ValidationVerdict::Accepted { sql, statements } => {
                    tracing::info!(database = %database, attempt, "Candidate SQL accepted");
                    let result = self.execute(database, &statements, &policy, stage).await?;
                    return Ok(QueryAnswer { sql, attempts: attempt, result });
                }
                ValidationVerdict::Rejected(rejection) => {
                    tracing::warn!(
                        database = %database,
                        attempt,
                        rule = %rejection.rule,
                        reason = %rejection.reason,
                        "Candidate SQL rejected"
                    );
                    if state.exhausted() {
                        return Err(OrchestrationError::ValidationRejected {
                            attempts: attempt,
                            reason: rejection.reason,
                            rule: rejection.rule,
                        });
                    }
                    state.prior_rejection = Some(PriorRejection {
                        sql: candidate.sql,
                        reason: rejection.reason,
                        rule: rejection.rule,
                    });
                }
            }
        }
    }

    /// Run accepted statements in order on one scoped connection
    ///
    /// The result of the last statement is returned.
    async fn execute(
        &self,
        database: &str,
        statements: &[AcceptedStatement],
        policy: &ValidationPolicy,
        stage: &StageTracker,
    ) -> Result<QueryResult> {
        stage.enter(Stage::Acquiring);
        let mut conn = self
            .registry
            .acquire(database)
            .await
            .map_err(|e| OrchestrationError::pool_unavailable(database, e))?;

        stage.enter(Stage::Executing);
        let mut result = QueryResult::default();
        for statement in statements {
            result = conn.execute(&statement.sql).await.map_err(|e| {
                tracing::warn!(database = %database, error = %e, "Execution failed");
                OrchestrationError::from_driver(database, e)
            })?;

            match policy.max_result_rows {
                Some(cap) if statement.capped => result.truncated = result.row_count as u64 >= cap,
                _ => {}
            }
        }

        tracing::info!(
            database = %database,
            rows = result.row_count,
            execution_ms = result.execution_ms,
            "Query executed"
        );
        Ok(result)
    }

    /// Whether requests on `database` check tables against the live catalog
    fn enforces_known_tables(&self, database: &str) -> bool {
        self.config.enforce_known_tables && self.policy_for(database).known_tables.is_none()
    }

    /// Policy for one request, with the catalog's tables when enforcement is on
    fn request_policy(&self, database: &str, catalog: Option<&SchemaCatalog>) -> ValidationPolicy {
        let mut policy = self.policy_for(database).clone();
        if self.enforces_known_tables(database) {
            policy.known_tables = catalog.map(SchemaCatalog::table_names);
        }
        policy
    }

    /// Catalog used for prompts and known-table checks, loaded once per database
    ///
    /// A catalog wanted only for prompt context may fail to load; one needed
    /// for known-table checks may not, since the check would pass everything.
    async fn catalog_for(
        &self,
        database: &str,
        for_prompt: bool,
    ) -> Result<Option<Arc<SchemaCatalog>>> {
        let enforce = self.enforces_known_tables(database);
        if !enforce && !(for_prompt && self.config.schema_context) {
            return Ok(None);
        }

        if let Some(catalog) = self.schemas.read().await.get(database) {
            return Ok(Some(Arc::clone(catalog)));
        }

        match self.load_catalog(database).await {
            Ok(catalog) => {
                tracing::debug!(
                    database = %database,
                    tables = catalog.len(),
                    "Schema catalog loaded"
                );
                let catalog = Arc::new(catalog);
                self.schemas.write().await.insert(database.to_string(), Arc::clone(&catalog));
                Ok(Some(catalog))
            }
            Err(e) if enforce => {
                tracing::warn!(
                    database = %database,
                    error = %e,
                    "Schema catalog unavailable, known-table checks cannot run"
                );
                Err(e)
            }
            Err(e) => {
                tracing::warn!(
                    database = %database,
                    error = %e,
                    "Could not load schema catalog, continuing without it"
                );
                Ok(None)
            }
        }
    }

    async fn load_catalog(&self, database: &str) -> Result<SchemaCatalog> {
        let mut conn = self
            .registry
            .acquire(database)
            .await
            .map_err(|e| OrchestrationError::pool_unavailable(database, e))?;
        let result = conn
            .execute(schema::CATALOG_QUERY)
            .await
            .map_err(|e| OrchestrationError::from_driver(database, e))?;
        Ok(SchemaCatalog::from_rows(&result.rows))
    }

    /// Drop cached catalogs so the next request reloads them
    pub async fn invalidate_schemas(&self) {
        self.schemas.write().await.clear();
    }
}

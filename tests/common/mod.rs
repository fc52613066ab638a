//! In-memory collaborators shared by the integration tests

#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use pg_mcp::engine::{DatabaseConfig, Driver, QueryResult, Row};
use pg_mcp::error::{CompletionError, DriverError};
use pg_mcp::generator::{CompletionClient, Prompt, SqlGenerator};
use pg_mcp::orchestrator::{OrchestratorConfig, QueryOrchestrator};
use pg_mcp::registry::PoolRegistry;
use pg_mcp::validator::{SqlValidator, ValidationPolicy};

/// What a [`FakeDriver`] did, readable after the driver moved into a registry
#[derive(Default)]
pub struct DriverProbe {
    pub opened: AtomicUsize,
    pub closed: AtomicUsize,
    pub cancelled: AtomicUsize,
    pub statements: Mutex<Vec<String>>,
}

impl DriverProbe {
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn cancelled(&self) -> usize {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn statements(&self) -> Vec<String> {
        self.statements.lock().unwrap().clone()
    }
}

/// Driver backed by nothing
///
/// - connecting to a database listed in `failing` fails, after its delay
/// - statements containing `pg_sleep` never finish on their own
/// - statements containing `fail_me` fail on the server
/// - the schema catalog query returns `catalog`, or fails when
///   `catalog_unavailable` is set
/// - anything else returns one row `{"n": 1}`
#[derive(Clone, Default)]
pub struct FakeDriver {
    pub probe: Arc<DriverProbe>,
    failing: Arc<HashSet<String>>,
    connect_delays: Arc<HashMap<String, Duration>>,
    catalog: Arc<Vec<Row>>,
    catalog_unavailable: bool,
}

impl FakeDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing<I: IntoIterator<Item = &'static str>>(mut self, names: I) -> Self {
        self.failing = Arc::new(names.into_iter().map(str::to_string).collect());
        self
    }

    pub fn connect_delay(mut self, name: &str, delay: Duration) -> Self {
        let mut delays = (*self.connect_delays).clone();
        delays.insert(name.to_string(), delay);
        self.connect_delays = Arc::new(delays);
        self
    }

    pub fn with_catalog(mut self, tables: &[(&str, &str, &str)]) -> Self {
        let rows = tables
            .iter()
            .map(|(schema, table, column)| {
                let mut row = Row::new();
                row.insert("table_schema".to_string(), serde_json::json!(schema));
                row.insert("table_name".to_string(), serde_json::json!(table));
                row.insert("column_name".to_string(), serde_json::json!(column));
                row.insert("data_type".to_string(), serde_json::json!("integer"));
                row
            })
            .collect();
        self.catalog = Arc::new(rows);
        self
    }

    pub fn catalog_unavailable(mut self) -> Self {
        self.catalog_unavailable = true;
        self
    }
}

pub struct FakeConnection {
    pub database: String,
    pub broken: bool,
}

impl Driver for FakeDriver {
    type Connection = FakeConnection;
    type CancelHandle = Arc<DriverProbe>;

    fn engine(&self) -> &'static str {
        "fake"
    }

    async fn connect(&self, config: &DatabaseConfig) -> Result<FakeConnection, DriverError> {
        if let Some(delay) = self.connect_delays.get(&config.name) {
            tokio::time::sleep(*delay).await;
        }
        if self.failing.contains(&config.name) {
            return Err(DriverError::Connect(format!(
                "password authentication failed for user \"{}\"",
                config.user
            )));
        }
        self.probe.opened.fetch_add(1, Ordering::SeqCst);
        Ok(FakeConnection { database: config.name.clone(), broken: false })
    }

    async fn execute(
        &self,
        conn: &mut FakeConnection,
        sql: &str,
    ) -> Result<QueryResult, DriverError> {
        self.probe.statements.lock().unwrap().push(sql.to_string());

        if sql.contains("information_schema.columns") {
            if self.catalog_unavailable {
                return Err(DriverError::Query(
                    "permission denied for schema information_schema (42501)".to_string(),
                ));
            }
            return Ok(QueryResult::with_rows(
                vec![
                    "table_schema".to_string(),
                    "table_name".to_string(),
                    "column_name".to_string(),
                    "data_type".to_string(),
                ],
                self.catalog.as_ref().clone(),
            ));
        }
        if sql.contains("pg_sleep") {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        if sql.contains("fail_me") {
            return Err(DriverError::Query(format!(
                "relation \"fail_me\" does not exist on {} (42P01)",
                conn.database
            )));
        }

        let mut row = Row::new();
        row.insert("n".to_string(), serde_json::json!(1));
        Ok(QueryResult::with_rows(vec!["n".to_string()], vec![row]))
    }

    fn cancel_handle(&self, _conn: &FakeConnection) -> Arc<DriverProbe> {
        Arc::clone(&self.probe)
    }

    async fn cancel(&self, handle: Arc<DriverProbe>) {
        handle.cancelled.fetch_add(1, Ordering::SeqCst);
    }

    fn is_broken(&self, conn: &FakeConnection) -> bool {
        conn.broken
    }

    async fn close(&self, _conn: FakeConnection) {
        self.probe.closed.fetch_add(1, Ordering::SeqCst);
    }
}

/// What a [`ScriptedClient`] was asked
#[derive(Default)]
pub struct ClientProbe {
    pub prompts: Mutex<Vec<Prompt>>,
}

impl ClientProbe {
    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }

    pub fn prompt(&self, index: usize) -> Prompt {
        self.prompts.lock().unwrap()[index].clone()
    }
}

/// Completion client replaying scripted answers
///
/// The last answer repeats once the script runs out. A stalled client never
/// answers.
pub struct ScriptedClient {
    pub probe: Arc<ClientProbe>,
    script: Mutex<VecDeque<Result<String, CompletionError>>>,
    stalled: bool,
}

impl ScriptedClient {
    pub fn new<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            probe: Arc::default(),
            script: Mutex::new(answers.into_iter().map(|a| Ok(a.into())).collect()),
            stalled: false,
        }
    }

    pub fn failing(err: CompletionError) -> Self {
        Self {
            probe: Arc::default(),
            script: Mutex::new(VecDeque::from([Err(err)])),
            stalled: false,
        }
    }

    pub fn stalled() -> Self {
        Self { probe: Arc::default(), script: Mutex::new(VecDeque::new()), stalled: true }
    }

    fn next_answer(&self) -> Result<String, CompletionError> {
        let mut script = self.script.lock().unwrap();
        if script.len() > 1 {
            script.pop_front().unwrap_or(Err(CompletionError::EmptyResponse))
        } else {
            script.front().cloned().unwrap_or(Err(CompletionError::EmptyResponse))
        }
    }
}

impl CompletionClient for ScriptedClient {
    async fn complete(&self, prompt: &Prompt) -> Result<String, CompletionError> {
        self.probe.prompts.lock().unwrap().push(prompt.clone());
        if self.stalled {
            std::future::pending::<()>().await;
        }
        self.next_answer()
    }
}

pub type TestOrchestrator = QueryOrchestrator<FakeDriver, ScriptedClient>;

/// Small pool with short timeouts
pub fn database(name: &str) -> DatabaseConfig {
    DatabaseConfig::new(name)
        .with_pool_size(0, 2)
        .with_pool_timeout(Duration::from_millis(200))
        .with_command_timeout(Duration::from_secs(5))
}

/// Orchestrator config without schema loading, so statement logs stay clean
pub fn orchestrator_config(max_attempts: u32) -> OrchestratorConfig {
    OrchestratorConfig { max_attempts, schema_context: false, ..OrchestratorConfig::default() }
}

/// Registry with one pool per name, already created
pub async fn registry(driver: FakeDriver, names: &[&str]) -> Arc<PoolRegistry<FakeDriver>> {
    let registry = Arc::new(PoolRegistry::new(driver));
    registry
        .create_pools(names.iter().map(|name| database(name)).collect())
        .await
        .unwrap();
    registry
}

pub fn orchestrator(
    registry: Arc<PoolRegistry<FakeDriver>>,
    client: ScriptedClient,
    policy: ValidationPolicy,
    config: OrchestratorConfig,
) -> TestOrchestrator {
    let generator = SqlGenerator::new(client, Duration::from_secs(10));
    QueryOrchestrator::new(registry, generator, SqlValidator::standard(), policy, config)
}

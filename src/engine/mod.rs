//! Database Driver Trait and Core Types
//!
//! This module defines the narrow capability interface the pool registry uses
//! to talk to a database, plus the types that cross it.
//!
//! # Driver Isolation
//! The registry never sees a concrete client type. A [`Driver`] opens
//! connections, runs one statement at a time on a connection, and can cancel
//! an in-flight statement through a detached handle. Any driver can be
//! substituted, including in-memory fakes for testing.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::time::Duration;

use crate::error::{ConfigError, ConfigResult, DriverError};

#[cfg(feature = "postgres")]
pub mod postgres;

const DEFAULT_HOST: &str = "localhost";
const DEFAULT_PORT: u16 = 5432;
const DEFAULT_USER: &str = "postgres";

/// Configuration of one target database and its pool
///
/// Immutable once loaded. `name` is the unique key used by the registry and
/// by requests; `database` is the server-side database name and defaults to
/// `name`.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DatabaseConfig {
    /// Unique registry key
    pub name: String,

    /// Hostname
    #[serde(default = "default_host")]
    pub host: String,

    /// Port number
    #[serde(default = "default_port")]
    pub port: u16,

    /// Server-side database name (defaults to `name`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,

    /// Username
    #[serde(default = "default_user")]
    pub user: String,

    /// Password
    /// WARNING: Sensitive data, do not log or include in error messages
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Connections opened eagerly when the pool is created
    #[serde(default = "default_min_pool_size")]
    pub min_pool_size: u32,

    /// Upper bound on concurrently checked-out connections
    #[serde(default = "default_max_pool_size")]
    pub max_pool_size: u32,

    /// Max wait to acquire a connection, in milliseconds
    #[serde(default = "default_pool_timeout_ms")]
    pub pool_timeout_ms: u64,

    /// Max wait per statement, in milliseconds
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,

    /// Max wait to open one connection, in milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

const fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_user() -> String {
    DEFAULT_USER.to_string()
}

const fn default_min_pool_size() -> u32 {
    1
}

const fn default_max_pool_size() -> u32 {
    10
}

const fn default_pool_timeout_ms() -> u64 {
    10_000
}

const fn default_command_timeout_ms() -> u64 {
    30_000
}

const fn default_connect_timeout_ms() -> u64 {
    10_000
}

impl DatabaseConfig {
    /// Create a config with default host, credentials and pool settings
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            host: default_host(),
            port: DEFAULT_PORT,
            database: None,
            user: default_user(),
            password: None,
            min_pool_size: default_min_pool_size(),
            max_pool_size: default_max_pool_size(),
            pool_timeout_ms: default_pool_timeout_ms(),
            command_timeout_ms: default_command_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }

    /// Set pool sizing bounds
    #[must_use]
    pub const fn with_pool_size(mut self, min: u32, max: u32) -> Self {
        self.min_pool_size = min;
        self.max_pool_size = max;
        self
    }

    /// Set the acquire timeout
    #[must_use]
    pub fn with_pool_timeout(mut self, timeout: Duration) -> Self {
        self.pool_timeout_ms = millis(timeout);
        self
    }

    /// Set the per-statement timeout
    #[must_use]
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout_ms = millis(timeout);
        self
    }

    /// Server-side database name
    #[must_use]
    pub fn database_name(&self) -> &str {
        self.database.as_deref().unwrap_or(&self.name)
    }

    /// Max wait to acquire a connection
    #[must_use]
    pub const fn pool_timeout(&self) -> Duration {
        Duration::from_millis(self.pool_timeout_ms)
    }

    /// Max wait per statement
    #[must_use]
    pub const fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    /// Max wait to open one connection
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Check the invariants the registry relies on
    pub fn validate(&self) -> ConfigResult<()> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::new("Database name cannot be empty"));
        }
        if self.max_pool_size == 0 {
            return Err(ConfigError::new(format!(
                "Database '{}': max_pool_size must be at least 1",
                self.name
            )));
        }
        if self.min_pool_size > self.max_pool_size {
            return Err(ConfigError::new(format!(
                "Database '{}': min_pool_size ({}) exceeds max_pool_size ({})",
                self.name, self.min_pool_size, self.max_pool_size
            )));
        }
        if self.pool_timeout_ms == 0 || self.command_timeout_ms == 0 || self.connect_timeout_ms == 0
        {
            return Err(ConfigError::new(format!(
                "Database '{}': timeouts must be greater than zero",
                self.name
            )));
        }
        Ok(())
    }
}

// Password stays out of logs and panics.
impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("name", &self.name)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database_name())
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("min_pool_size", &self.min_pool_size)
            .field("max_pool_size", &self.max_pool_size)
            .field("pool_timeout_ms", &self.pool_timeout_ms)
            .field("command_timeout_ms", &self.command_timeout_ms)
            .field("connect_timeout_ms", &self.connect_timeout_ms)
            .finish()
    }
}

/// One result row: column name to JSON value
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Query execution result
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    /// Column names in result order
    pub columns: Vec<String>,

    /// Result rows, in the order the server returned them
    pub rows: Vec<Row>,

    /// Number of rows in `rows`
    pub row_count: usize,

    /// Number of rows affected (for INSERT/UPDATE/DELETE)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows_affected: Option<u64>,

    /// Execution time in milliseconds
    pub execution_ms: u64,

    /// True when a row cap was applied and reached, so more rows may exist
    #[serde(default)]
    pub truncated: bool,
}

impl QueryResult {
    /// Build a row-returning result
    #[must_use]
    pub fn with_rows(columns: Vec<String>, rows: Vec<Row>) -> Self {
        let row_count = rows.len();
        Self { columns, rows, row_count, ..Self::default() }
    }

    /// Build a result for a statement that returns no rows
    #[must_use]
    pub fn affected(rows_affected: u64) -> Self {
        Self { rows_affected: Some(rows_affected), ..Self::default() }
    }
}

/// Database driver trait
///
/// The registry owns connections of type [`Driver::Connection`]; it hands them
/// back to the driver for every statement.
pub trait Driver: Send + Sync + 'static {
    /// A live connection owned by a pool
    type Connection: Send + 'static;

    /// Detached handle able to cancel whatever runs on a connection
    type CancelHandle: Send + 'static;

    /// Engine name used in output envelopes
    fn engine(&self) -> &'static str;

    /// Open one connection
    ///
    /// Fails with [`DriverError::Connect`] if the server is unreachable or
    /// rejects authentication.
    fn connect(
        &self,
        config: &DatabaseConfig,
    ) -> impl Future<Output = Result<Self::Connection, DriverError>> + Send;

    /// Execute one statement and collect its result
    fn execute(
        &self,
        conn: &mut Self::Connection,
        sql: &str,
    ) -> impl Future<Output = Result<QueryResult, DriverError>> + Send;

    /// Take a cancel handle for the statement about to run on `conn`
    fn cancel_handle(&self, conn: &Self::Connection) -> Self::CancelHandle;

    /// Ask the server to cancel the statement running behind `handle`
    fn cancel(&self, handle: Self::CancelHandle) -> impl Future<Output = ()> + Send;

    /// Whether `conn` can no longer be used
    fn is_broken(&self, conn: &Self::Connection) -> bool;

    /// Close a connection the pool no longer wants
    ///
    /// The default drops it, which is enough for drivers whose connection
    /// shuts its socket down on drop.
    fn close(&self, conn: Self::Connection) -> impl Future<Output = ()> + Send {
        async move { drop(conn) }
    }
}

/// Whole milliseconds in `duration`, saturating at `u64::MAX`
#[must_use]
pub fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

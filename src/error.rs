//! Error Handling Infrastructure
//!
//! This module defines all error types used throughout pg-mcp.
//! All errors are structured and map to stable error codes for JSON output.
//!
//! # Error Categories
//! - [`DriverError`]: Database driver failures (connect, statement, type conversion)
//! - [`RegistryError`]: Pool lifecycle and connection acquisition failures
//! - [`CompletionError`] / [`GenerationError`]: Completion service and SQL extraction failures
//! - [`ParseError`]: SQL text the parser could not understand
//! - [`ConfigError`]: Configuration file or database definition errors
//! - [`OrchestrationError`]: The single terminal error a request can end with

use thiserror::Error;

use crate::orchestrator::Stage;
use crate::validator::RuleId;

/// Error reported by a database driver
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DriverError {
    /// Connection could not be established (unreachable host, rejected credentials)
    #[error("Connection failed: {0}")]
    Connect(String),

    /// Statement was rejected or failed on the server
    #[error("Query execution failed: {0}")]
    Query(String),

    /// Statement exceeded the command timeout and was cancelled
    #[error("Statement exceeded timeout of {0}ms")]
    Timeout(u64),

    /// Connection broke while in use
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// A result column could not be converted to JSON
    #[error("Failed to convert column value: {0}")]
    Conversion(String),
}

impl DriverError {
    /// Stable error code for JSON output
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::Connect(_) => "CONNECTION_FAILED",
            Self::Query(_) => "QUERY_FAILED",
            Self::Timeout(_) => "STATEMENT_TIMEOUT",
            Self::ConnectionLost(_) => "CONNECTION_LOST",
            Self::Conversion(_) => "CONVERSION_FAILED",
        }
    }
}

/// Error reported by the pool registry
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// Pool creation failed for `database`.
    ///
    /// `created` lists the pools that were successfully created in the same
    /// batch and are still registered and open.
    #[error("Failed to create pool for database '{database}': {cause}")]
    PoolCreation { database: String, cause: String, created: Vec<String> },

    /// A pool with this name already exists
    #[error("Database '{0}' is already registered")]
    DuplicateDatabase(String),

    /// No pool is registered under this name
    #[error("Unknown database '{0}'")]
    UnknownDatabase(String),

    /// No connection became available within the pool timeout
    #[error("No connection available for database '{database}' within {waited_ms}ms")]
    PoolExhausted { database: String, waited_ms: u64 },

    /// The pool (or the whole registry) is shutting down
    #[error("Pool for database '{0}' is closing")]
    RegistryClosing(String),

    /// A new connection could not be opened while growing the pool
    #[error("Could not open connection to database '{database}': {cause}")]
    Connect { database: String, cause: String },
}

impl RegistryError {
    /// Stable error code for JSON output
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::PoolCreation { .. } => "POOL_CREATION_FAILED",
            Self::DuplicateDatabase(_) => "DUPLICATE_DATABASE",
            Self::UnknownDatabase(_) => "UNKNOWN_DATABASE",
            Self::PoolExhausted { .. } => "POOL_EXHAUSTED",
            Self::RegistryClosing(_) => "REGISTRY_CLOSING",
            Self::Connect { .. } => "CONNECTION_FAILED",
        }
    }

    /// Name of the database this error refers to
    #[must_use]
    pub fn database(&self) -> &str {
        match self {
            Self::PoolCreation { database, .. }
            | Self::PoolExhausted { database, .. }
            | Self::Connect { database, .. } => database,
            Self::DuplicateDatabase(name)
            | Self::UnknownDatabase(name)
            | Self::RegistryClosing(name) => name,
        }
    }
}

/// Error reported by a completion service client
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CompletionError {
    /// Transport-level failure (DNS, TLS, connection reset)
    #[error("Completion request failed: {0}")]
    Request(String),

    /// Service answered 429
    #[error("Completion service rate limited the request: {0}")]
    RateLimited(String),

    /// Service answered with a non-success status
    #[error("Completion service returned status {status}: {body}")]
    Status { status: u16, body: String },

    /// Service answered without any text
    #[error("Completion service returned an empty response")]
    EmptyResponse,

    /// Response body did not have the expected shape
    #[error("Malformed completion response: {0}")]
    Malformed(String),

    /// API key environment variable is not set
    #[error("Missing API key: environment variable {0} is not set")]
    MissingApiKey(String),
}

/// Error reported by the SQL generator
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GenerationError {
    /// The completion service failed
    #[error(transparent)]
    Completion(#[from] CompletionError),

    /// The completion service did not answer in time
    #[error("Completion service did not answer within {0}ms")]
    Timeout(u64),

    /// The response contained no SQL statement
    #[error("No SQL statement found in completion response")]
    NoSql,
}

/// SQL text could not be parsed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct ParseError {
    /// Parser message (position information included when available)
    pub message: String,
}

impl ParseError {
    /// Create a parse error
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

/// Configuration error (file not found, invalid JSON, invalid pool bounds, etc.)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Configuration error: {0}")]
pub struct ConfigError(pub String);

impl ConfigError {
    /// Create a configuration error
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }

    /// Stable error code for JSON output
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        "CONFIG_ERROR"
    }
}

/// Terminal error of one orchestrated request
///
/// Callers always receive either a result or exactly one of these variants,
/// never a raw driver or parser error.
#[derive(Error, Debug)]
pub enum OrchestrationError {
    /// Candidate SQL could not be produced
    #[error("SQL generation failed: {0}")]
    GenerationFailed(#[source] GenerationError),

    /// Every candidate was rejected by the validator
    #[error("SQL rejected after {attempts} attempt(s) [{rule}]: {reason}")]
    ValidationRejected { attempts: u32, reason: String, rule: RuleId },

    /// The target database has no usable pool or no free connection
    #[error("Database '{database}' is unavailable: {source}")]
    PoolUnavailable {
        database: String,
        #[source]
        source: RegistryError,
    },

    /// The accepted statement failed on the server
    #[error("Execution failed on database '{database}': {cause}")]
    ExecutionFailed { database: String, cause: String },

    /// A deadline expired
    #[error("Request timed out after {timeout_ms}ms while {stage}")]
    Timeout { stage: Stage, timeout_ms: u64 },

    /// The caller cancelled the request
    #[error("Request was cancelled")]
    Cancelled,
}

impl OrchestrationError {
    /// Stable error code for JSON output
    ///
    /// Error codes are stable and suitable for programmatic handling by agents.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::GenerationFailed(_) => "GENERATION_FAILED",
            Self::ValidationRejected { .. } => "VALIDATION_REJECTED",
            Self::PoolUnavailable { .. } => "POOL_UNAVAILABLE",
            Self::ExecutionFailed { .. } => "EXECUTION_FAILED",
            Self::Timeout { .. } => "TIMEOUT",
            Self::Cancelled => "CANCELLED",
        }
    }

    /// Human-readable message (agent-appropriate, no credentials)
    #[must_use]
    pub fn message(&self) -> String {
        self.to_string()
    }

    /// Wrap a registry error for `database`
    pub fn pool_unavailable(database: impl Into<String>, source: RegistryError) -> Self {
        Self::PoolUnavailable { database: database.into(), source }
    }

    /// Map a driver error raised while executing on `database`
    ///
    /// Statement timeouts keep their own variant so callers can tell a slow
    /// query from a failing one.
    pub fn from_driver(database: impl Into<String>, err: DriverError) -> Self {
        match err {
            DriverError::Timeout(timeout_ms) => {
                Self::Timeout { stage: Stage::Executing, timeout_ms }
            }
            other => Self::ExecutionFailed { database: database.into(), cause: other.to_string() },
        }
    }
}

/// Result type alias for configuration loading
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

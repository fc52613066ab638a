//! pg-mcp - Natural-language queries over pooled PostgreSQL connections
//!
//! pg-mcp turns questions into SQL with a language model, checks every
//! candidate statement against a safety policy before it reaches a database,
//! and executes accepted SQL on per-database connection pools. It is exposed
//! as an MCP server (JSON-RPC 2.0 over stdio) and as a small CLI.
//!
//! # Core Principles
//! - Generated SQL is untrusted: nothing runs without passing the validator
//! - Read-only by default; writes and DDL are opt-in per policy
//! - Every request ends in a result or exactly one [`OrchestrationError`]
//! - Cancelling a request always gives its connection back to the pool
//! - JSON-only stdout, logs on stderr
//!
//! # Module Organization
//! - [`error`] - Error types and stable error codes
//! - [`output`] - JSON output envelope types
//! - [`engine`] - Database configuration, results and the [`Driver`] trait
//! - [`registry`] - Per-database connection pools and scoped connections
//! - [`validator`] - Static SQL analysis and policy enforcement
//! - [`generator`] - Prompt building, completion client and SQL extraction
//! - [`orchestrator`] - The generate/validate/execute request pipeline
//! - [`config`] - Configuration file loading
//! - [`mcp`] - MCP server

pub mod config;
pub mod engine;
pub mod error;
pub mod generator;
pub mod mcp;
pub mod orchestrator;
pub mod output;
pub mod registry;
pub mod validator;

pub use config::{AppConfig, ConfigLocation, StoredDatabase};
pub use engine::{DatabaseConfig, Driver, QueryResult, Row};
pub use error::{
    CompletionError, ConfigError, DriverError, GenerationError, OrchestrationError, ParseError,
    RegistryError,
};
pub use generator::{
    CompletionClient, CompletionConfig, DefaultPromptBuilder, OpenAiClient, Prompt, PromptBuilder,
    SqlGenerator,
};
pub use orchestrator::{
    DatabaseInfo, OrchestratorConfig, QueryAnswer, QueryOrchestrator, QueryRequest, Stage,
};
pub use output::{ErrorEnvelope, ErrorInfo, Metadata, SuccessEnvelope, ValidationReport};
pub use registry::{PoolHandle, PoolRegistry, PoolStatus, ScopedConnection};
pub use validator::{
    Rejection, RuleId, SqlDialect, SqlParser, SqlValidator, SqlparserBackend, StatementClass,
    ValidationPolicy, ValidationVerdict,
};

#[cfg(feature = "postgres")]
pub use engine::postgres::PostgresDriver;

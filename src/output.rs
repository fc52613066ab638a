//! JSON Output Envelope Types
//!
//! This module defines the structured JSON output format for all pg-mcp operations.
//! All operations return either a SuccessEnvelope or an ErrorEnvelope, on the CLI's
//! stdout and inside MCP tool results alike.
//!
//! # Output Contract
//! - Success: `{"ok": true, "engine": "...", "command": "...", "data": {...}, "meta": {...}}`
//! - Error: `{"ok": false, "engine": "...", "command": "...",
//!   "error": {"code": "...", "message": "..."}}`
//!
//! Output is stable, versioned, and suitable for programmatic parsing by agents.

use serde::{Deserialize, Serialize};

use crate::error::OrchestrationError;
use crate::orchestrator::QueryAnswer;
use crate::validator::{AcceptedStatement, RuleId, ValidationVerdict};

/// Success envelope for operation results
///
/// Generic over the data type to support different operation return values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuccessEnvelope<T> {
    /// Always true for success envelopes
    pub ok: bool,

    /// Database engine used for this operation (postgres)
    pub engine: String,

    /// Command that was executed (query, execute_sql, validate, list_databases)
    pub command: String,

    /// Operation-specific data
    pub data: T,

    /// Execution metadata
    pub meta: Metadata,
}

impl<T> SuccessEnvelope<T> {
    /// Create a new success envelope
    pub fn new(
        engine: impl Into<String>,
        command: impl Into<String>,
        data: T,
        meta: Metadata,
    ) -> Self {
        Self {
            ok: true,
            engine: engine.into(),
            command: command.into(),
            data,
            meta,
        }
    }
}

/// Error envelope for operation failures
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    /// Always false for error envelopes
    pub ok: bool,

    /// Database engine (if applicable, empty string if not engine-specific)
    pub engine: String,

    /// Command that was attempted (query, execute_sql, validate, list_databases)
    pub command: String,

    /// Error information
    pub error: ErrorInfo,
}

impl ErrorEnvelope {
    /// Create a new error envelope
    pub fn new(
        engine: impl Into<String>,
        command: impl Into<String>,
        error: ErrorInfo,
    ) -> Self {
        Self {
            ok: false,
            engine: engine.into(),
            command: command.into(),
            error,
        }
    }

    /// Create error envelope from an `OrchestrationError`
    pub fn from_error(
        engine: impl Into<String>,
        command: impl Into<String>,
        err: &OrchestrationError,
    ) -> Self {
        Self::new(engine, command, ErrorInfo::from(err))
    }
}

/// Error information structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Stable error code (e.g., "VALIDATION_REJECTED", "POOL_UNAVAILABLE")
    pub code: String,

    /// Human-readable error message (agent-appropriate, no sensitive data)
    pub message: String,

    /// Validator rule behind a rejection
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule: Option<RuleId>,
}

impl ErrorInfo {
    /// Create a new error info
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            rule: None,
        }
    }
}

impl From<&OrchestrationError> for ErrorInfo {
    fn from(err: &OrchestrationError) -> Self {
        let rule = match err {
            OrchestrationError::ValidationRejected { rule, .. } => Some(*rule),
            _ => None,
        };
        Self { code: err.error_code().to_string(), message: err.message(), rule }
    }
}

/// Execution metadata included in all success responses
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metadata {
    /// Execution time in milliseconds
    pub execution_ms: u64,

    /// Number of rows returned (for query results, None for other operations)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows_returned: Option<usize>,
}

impl Metadata {
    /// Create new metadata with just execution time
    pub fn new(execution_ms: u64) -> Self {
        Self {
            execution_ms,
            rows_returned: None,
        }
    }

    /// Create new metadata with execution time and row count
    pub fn with_rows(execution_ms: u64, rows_returned: usize) -> Self {
        Self {
            execution_ms,
            rows_returned: Some(rows_returned),
        }
    }
}

/// Result of validating SQL without running it
#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    pub accepted: bool,

    /// Sanitized SQL (accepted only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sql: Option<String>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub statements: Vec<AcceptedStatement>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule: Option<RuleId>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl From<ValidationVerdict> for ValidationReport {
    fn from(verdict: ValidationVerdict) -> Self {
        match verdict {
            ValidationVerdict::Accepted { sql, statements } => Self {
                accepted: true,
                sql: Some(sql),
                statements,
                rule: None,
                reason: None,
            },
            ValidationVerdict::Rejected(rejection) => Self {
                accepted: false,
                sql: None,
                statements: Vec::new(),
                rule: Some(rejection.rule),
                reason: Some(rejection.reason),
            },
        }
    }
}

/// Success envelope for an answered query
#[must_use]
pub fn answer_envelope(
    engine: impl Into<String>,
    command: impl Into<String>,
    answer: QueryAnswer,
) -> SuccessEnvelope<QueryAnswer> {
    let meta = Metadata::with_rows(answer.result.execution_ms, answer.result.row_count);
    SuccessEnvelope::new(engine, command, answer, meta)
}

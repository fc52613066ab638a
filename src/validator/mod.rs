//! Static SQL Validation
//!
//! Decides whether untrusted candidate SQL may run, before it ever reaches a
//! database. Validation is pure: same text and policy, same verdict.
//!
//! # Rule Order
//! Rules run in a fixed order and the first violation wins:
//! 1. empty input
//! 2. parse (fails closed)
//! 3. statement count
//! 4. dynamic execution primitives (always rejected)
//! 5. statement class against the policy's read/write/DDL tier
//! 6. schema allow-list
//! 7. known-table catalog
//!
//! Accepted SQL is re-rendered by the parser, and read queries get a row cap
//! when the policy sets `max_result_rows`.

pub mod parser;

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

pub use parser::{
    LimitShape, ParsedStatement, SqlDialect, SqlParser, SqlparserBackend, StatementKind, TableRef,
};

const DEFAULT_SCHEMA: &str = "public";

/// Functions that run SQL built from strings, which defeats static analysis
const DYNAMIC_FUNCTIONS: &[&str] = &[
    "dblink",
    "dblink_exec",
    "dblink_send_query",
    "dblink_open",
    "query_to_xml",
    "query_to_xml_and_xmlschema",
    "query_to_xmlschema",
    "cursor_to_xml",
    "exec",
    "sp_executesql",
    "execute",
];

/// Functions with side effects; a query calling them is a write
const SIDE_EFFECT_FUNCTIONS: &[&str] = &[
    "nextval",
    "setval",
    "pg_terminate_backend",
    "pg_cancel_backend",
    "pg_reload_conf",
    "pg_rotate_logfile",
    "pg_advisory_lock",
    "pg_advisory_xact_lock",
    "pg_try_advisory_lock",
    "pg_notify",
    "lo_import",
    "lo_export",
    "lo_unlink",
    "pg_file_write",
    "set_config",
    "txid_current",
];

/// Stable identifier of the rule that rejected a candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RuleId {
    EmptyInput,
    Unparseable,
    TooManyStatements,
    WriteNotAllowed,
    DdlNotAllowed,
    SchemaNotAllowed,
    DynamicExecution,
    UnknownTable,
}

impl RuleId {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::EmptyInput => "empty-input",
            Self::Unparseable => "unparseable",
            Self::TooManyStatements => "too-many-statements",
            Self::WriteNotAllowed => "write-not-allowed",
            Self::DdlNotAllowed => "ddl-not-allowed",
            Self::SchemaNotAllowed => "schema-not-allowed",
            Self::DynamicExecution => "dynamic-execution",
            Self::UnknownTable => "unknown-table",
        }
    }
}

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Capability tier a statement needs
///
/// Ordered: `Read < Write < Ddl`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatementClass {
    Read,
    Write,
    Ddl,
}

/// Validation policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationPolicy {
    /// Permit INSERT/UPDATE/DELETE (and DDL unless `allow_ddl` says otherwise)
    pub allow_write: bool,

    /// DDL tier override: unset follows `allow_write`, `false` refuses DDL
    /// even when writes pass, `true` permits DDL and writes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allow_ddl: Option<bool>,

    /// Schemas table references must stay within (empty means any)
    pub allowed_schemas: Vec<String>,

    /// Upper bound on statements per candidate
    pub max_statements: usize,

    /// Row cap injected into read queries
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_result_rows: Option<u64>,

    /// Schema that unqualified table names resolve to
    pub default_schema: String,

    /// Catalog of `schema.table` names; references outside it are rejected
    #[serde(skip_serializing_if = "Option::is_none")]
    pub known_tables: Option<Vec<String>>,

    /// Dialect used to parse candidates
    pub dialect: SqlDialect,
}

impl Default for ValidationPolicy {
    fn default() -> Self {
        Self {
            allow_write: false,
            allow_ddl: None,
            allowed_schemas: Vec::new(),
            max_statements: 1,
            max_result_rows: None,
            default_schema: DEFAULT_SCHEMA.to_string(),
            known_tables: None,
            dialect: SqlDialect::Postgres,
        }
    }
}

impl ValidationPolicy {
    /// Read-only policy with default settings
    #[must_use]
    pub fn read_only() -> Self {
        Self::default()
    }

    /// Restrict table references to `schemas`
    #[must_use]
    pub fn with_allowed_schemas<I, S>(mut self, schemas: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_schemas = schemas.into_iter().map(Into::into).collect();
        self
    }

    /// Restrict table references to a known catalog
    #[must_use]
    pub fn with_known_tables<I, S>(mut self, tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.known_tables = Some(tables.into_iter().map(Into::into).collect());
        self
    }

    /// Cap rows returned by read queries
    #[must_use]
    pub const fn with_max_result_rows(mut self, rows: u64) -> Self {
        self.max_result_rows = Some(rows);
        self
    }

    /// Permit writes
    #[must_use]
    pub const fn with_write(mut self) -> Self {
        self.allow_write = true;
        self
    }

    /// Whether statements of `class` may run under this policy
    #[must_use]
    pub fn permits(&self, class: StatementClass) -> bool {
        match class {
            StatementClass::Read => true,
            StatementClass::Write => self.allow_write || self.allow_ddl == Some(true),
            StatementClass::Ddl => self.allow_ddl.unwrap_or(self.allow_write),
        }
    }
}

/// Why a candidate was rejected
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rejection {
    pub rule: RuleId,
    pub reason: String,
}

impl Rejection {
    fn new(rule: RuleId, reason: impl Into<String>) -> Self {
        Self { rule, reason: reason.into() }
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.rule, self.reason)
    }
}

/// One accepted statement, ready to run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AcceptedStatement {
    /// Canonical text, row cap applied
    pub sql: String,
    pub class: StatementClass,
    /// A row cap was injected or already bounded the query
    pub capped: bool,
}

/// The validator's decision
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationVerdict {
    Accepted {
        /// Sanitized SQL: every statement re-rendered, joined with `;\n`
        sql: String,
        statements: Vec<AcceptedStatement>,
    },
    Rejected(Rejection),
}

impl ValidationVerdict {
    #[must_use]
    pub const fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }

    #[must_use]
    pub const fn rejection(&self) -> Option<&Rejection> {
        match self {
            Self::Rejected(rejection) => Some(rejection),
            Self::Accepted { .. } => None,
        }
    }
}

/// Static SQL validator
#[derive(Debug, Clone, Default)]
pub struct SqlValidator<P = SqlparserBackend> {
    parser: P,
}

impl SqlValidator {
    /// Validator backed by `sqlparser`
    #[must_use]
    pub const fn standard() -> Self {
        Self { parser: SqlparserBackend }
    }
}

impl<P: SqlParser> SqlValidator<P> {
    pub const fn new(parser: P) -> Self {
        Self { parser }
    }

    /// Validate `sql` against `policy`
    pub fn validate(&self, sql: &str, policy: &ValidationPolicy) -> ValidationVerdict {
        match self.check(sql, policy) {
            Ok(statements) => {
                let sql = statements.iter().map(|s| s.sql.as_str()).collect::<Vec<_>>().join(";\n");
                ValidationVerdict::Accepted { sql, statements }
            }
            Err(rejection) => ValidationVerdict::Rejected(rejection),
        }
    }

    fn check(
        &self,
        sql: &str,
        policy: &ValidationPolicy,
    ) -> Result<Vec<AcceptedStatement>, Rejection> {
        if sql.trim().is_empty() {
            return Err(Rejection::new(RuleId::EmptyInput, "SQL text is empty"));
        }

        let parsed = self.parser.parse(sql, policy.dialect).map_err(|e| {
            Rejection::new(RuleId::Unparseable, format!("SQL could not be parsed: {e}"))
        })?;

        if parsed.is_empty() {
            return Err(Rejection::new(RuleId::EmptyInput, "SQL text contains no statements"));
        }

        if parsed.len() > policy.max_statements {
            return Err(Rejection::new(
                RuleId::TooManyStatements,
                format!(
                    "{} statements found, at most {} allowed",
                    parsed.len(),
                    policy.max_statements
                ),
            ));
        }

        let known_tables = policy.known_tables.as_ref().map(|tables| catalog(tables, policy));

        parsed
            .iter()
            .map(|stmt| {
                check_dynamic(stmt)?;
                let class = classify(stmt);
                check_class(stmt, class, policy)?;
                check_schemas(stmt, policy)?;
                if let Some(known) = &known_tables {
                    check_known_tables(stmt, known, policy)?;
                }
                Ok(finish(stmt, class, policy))
            })
            .collect()
    }
}

fn check_dynamic(stmt: &ParsedStatement) -> Result<(), Rejection> {
    let dynamic_kind = std::iter::once(&stmt.kind).chain(&stmt.nested).find(|kind| {
        matches!(kind, StatementKind::Execute | StatementKind::Prepare | StatementKind::Deallocate)
    });
    if let Some(kind) = dynamic_kind {
        return Err(Rejection::new(
            RuleId::DynamicExecution,
            format!("{kind} statements run SQL that cannot be checked statically"),
        ));
    }

    // Includes table functions such as `FROM dblink(...)`
    let dynamic = stmt.functions.iter().find(|f| DYNAMIC_FUNCTIONS.contains(&f.as_str()));
    if let Some(function) = dynamic {
        return Err(Rejection::new(
            RuleId::DynamicExecution,
            format!("function {function}() runs SQL that cannot be checked statically"),
        ));
    }
    Ok(())
}

const fn kind_class(kind: &StatementKind) -> StatementClass {
    match kind {
        StatementKind::Query | StatementKind::Show | StatementKind::Explain { .. } => {
            StatementClass::Read
        }
        StatementKind::Insert
        | StatementKind::Update
        | StatementKind::Delete
        | StatementKind::Merge => StatementClass::Write,
        // Everything else, COPY and session changes included, takes the top tier
        StatementKind::Copy
        | StatementKind::Transaction
        | StatementKind::Set
        | StatementKind::Execute
        | StatementKind::Prepare
        | StatementKind::Deallocate
        | StatementKind::Other(_) => StatementClass::Ddl,
    }
}

/// Class of a statement, nested statements and side effects included
fn classify(stmt: &ParsedStatement) -> StatementClass {
    let mut class = std::iter::once(&stmt.kind)
        .chain(&stmt.nested)
        .map(kind_class)
        .max()
        .unwrap_or(StatementClass::Read);

    if stmt.select_into {
        class = StatementClass::Ddl;
    }
    let side_effects = stmt.functions.iter().any(|f| SIDE_EFFECT_FUNCTIONS.contains(&f.as_str()));
    if stmt.locking_read || side_effects {
        class = class.max(StatementClass::Write);
    }
    class
}

fn describe(stmt: &ParsedStatement) -> String {
    if stmt.select_into {
        return "SELECT INTO".to_string();
    }
    if stmt.kind == StatementKind::Query && stmt.locking_read {
        return "SELECT with a locking clause".to_string();
    }
    if let Some(function) =
        stmt.functions.iter().find(|f| SIDE_EFFECT_FUNCTIONS.contains(&f.as_str()))
    {
        if kind_class(&stmt.kind) == StatementClass::Read {
            return format!("call to {function}()");
        }
    }
    stmt.nested
        .iter()
        .find(|kind| kind_class(kind) > kind_class(&stmt.kind))
        .map_or_else(|| stmt.kind.to_string(), |kind| format!("{} containing {kind}", stmt.kind))
}

fn check_class(
    stmt: &ParsedStatement,
    class: StatementClass,
    policy: &ValidationPolicy,
) -> Result<(), Rejection> {
    if policy.permits(class) {
        return Ok(());
    }
    let rejection = match class {
        StatementClass::Write => Rejection::new(
            RuleId::WriteNotAllowed,
            format!("{} is a write operation; only read queries are allowed", describe(stmt)),
        ),
        _ => Rejection::new(
            RuleId::DdlNotAllowed,
            format!("{} is a DDL or session-level statement and is not allowed", describe(stmt)),
        ),
    };
    Err(rejection)
}

/// References subject to schema and catalog checks; CTE names are local
fn table_references<'a>(stmt: &'a ParsedStatement) -> impl Iterator<Item = &'a TableRef> {
    stmt.relations
        .iter()
        .chain(&stmt.qualified_columns)
        .filter(|table| table.schema.is_some() || !stmt.cte_names.contains(&table.name))
}

fn check_schemas(stmt: &ParsedStatement, policy: &ValidationPolicy) -> Result<(), Rejection> {
    if policy.allowed_schemas.is_empty() {
        return Ok(());
    }

    let allowed = policy.allowed_schemas.join(", ");
    if stmt.unresolved_targets {
        return Err(Rejection::new(
            RuleId::SchemaNotAllowed,
            format!(
                "{} changes objects whose schema cannot be determined; \
                 only objects in the allowed schemas ({allowed}) may be touched",
                stmt.kind
            ),
        ));
    }

    let is_allowed = |schema: &str| policy.allowed_schemas.iter().any(|a| a == schema);

    if let Some(schema) = stmt.schemas.iter().find(|schema| !is_allowed(schema)) {
        return Err(Rejection::new(
            RuleId::SchemaNotAllowed,
            format!("schema {schema} is outside the allowed schemas ({allowed})"),
        ));
    }

    for table in table_references(stmt) {
        let schema = table.schema_or(&policy.default_schema);
        if !is_allowed(schema) {
            return Err(Rejection::new(
                RuleId::SchemaNotAllowed,
                format!(
                    "table {schema}.{} is outside the allowed schemas ({allowed})",
                    table.name
                ),
            ));
        }
    }
    Ok(())
}

fn catalog(tables: &[String], policy: &ValidationPolicy) -> HashSet<(String, String)> {
    tables
        .iter()
        .map(|entry| match entry.split_once('.') {
            Some((schema, table)) => (schema.to_string(), table.to_string()),
            None => (policy.default_schema.clone(), entry.clone()),
        })
        .collect()
}

fn check_known_tables(
    stmt: &ParsedStatement,
    known: &HashSet<(String, String)>,
    policy: &ValidationPolicy,
) -> Result<(), Rejection> {
    for table in table_references(stmt) {
        let key = (table.schema_or(&policy.default_schema).to_string(), table.name.clone());
        if !known.contains(&key) {
            return Err(Rejection::new(
                RuleId::UnknownTable,
                format!("table {}.{} does not exist in the database schema", key.0, key.1),
            ));
        }
    }
    Ok(())
}

/// Canonical text of an accepted statement, row cap applied to plain reads
fn finish(
    stmt: &ParsedStatement,
    class: StatementClass,
    policy: &ValidationPolicy,
) -> AcceptedStatement {
    let cap = match (policy.max_result_rows, &stmt.kind) {
        (Some(rows), StatementKind::Query) if class == StatementClass::Read => Some(rows),
        _ => None,
    };

    let Some(rows) = cap else {
        return AcceptedStatement { sql: stmt.text.clone(), class, capped: false };
    };

    let sql = match stmt.limit {
        LimitShape::None => format!("{} LIMIT {rows}", stmt.text),
        LimitShape::Literal(limit) if limit <= rows => stmt.text.clone(),
        LimitShape::Literal(_) | LimitShape::Other => {
            format!("SELECT * FROM ({}) AS capped LIMIT {rows}", stmt.text)
        }
    };
    AcceptedStatement { sql, class, capped: true }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn validate(sql: &str, policy: &ValidationPolicy) -> ValidationVerdict {
        SqlValidator::standard().validate(sql, policy)
    }

    fn rule(sql: &str, policy: &ValidationPolicy) -> Option<RuleId> {
        validate(sql, policy).rejection().map(|r| r.rule)
    }

    #[test]
    fn test_rule_id_serialization() {
        assert_eq!(
            serde_json::to_string(&RuleId::TooManyStatements).unwrap(),
            "\"too-many-statements\""
        );
        assert_eq!(RuleId::SchemaNotAllowed.to_string(), "schema-not-allowed");
    }

    #[test]
    fn test_policy_defaults_from_empty_json() {
        let policy: ValidationPolicy = serde_json::from_str("{}").unwrap();
        assert_eq!(policy, ValidationPolicy::default());
        assert_eq!(policy.max_statements, 1);
        assert_eq!(policy.default_schema, "public");
    }

    #[test]
    fn test_policy_tiers() {
        let read = ValidationPolicy::read_only();
        assert!(read.permits(StatementClass::Read));
        assert!(!read.permits(StatementClass::Write));
        assert!(!read.permits(StatementClass::Ddl));

        let write = ValidationPolicy::default().with_write();
        assert!(write.permits(StatementClass::Write));
        assert!(write.permits(StatementClass::Ddl));

        let write_no_ddl = ValidationPolicy { allow_ddl: Some(false), ..write };
        assert!(write_no_ddl.permits(StatementClass::Write));
        assert!(!write_no_ddl.permits(StatementClass::Ddl));

        let ddl = ValidationPolicy { allow_ddl: Some(true), ..ValidationPolicy::default() };
        assert!(ddl.permits(StatementClass::Write));
        assert!(ddl.permits(StatementClass::Ddl));
    }

    #[test]
    fn test_empty_and_comment_only_input() {
        let policy = ValidationPolicy::default();
        assert_eq!(rule("   \n\t", &policy), Some(RuleId::EmptyInput));
        assert_eq!(rule("", &policy), Some(RuleId::EmptyInput));
    }

    #[test]
    fn test_unparseable_fails_closed() {
        let policy = ValidationPolicy::default();
        assert_eq!(rule("SELEC * FORM users", &policy), Some(RuleId::Unparseable));
    }

    #[test]
    fn test_dynamic_execution_rejected_even_with_write() {
        let policy = ValidationPolicy::default().with_write();
        assert_eq!(rule("EXECUTE stmt", &policy), Some(RuleId::DynamicExecution));
        assert_eq!(
            rule("SELECT dblink_exec('host=x', 'DELETE FROM t')", &policy),
            Some(RuleId::DynamicExecution)
        );
        assert_eq!(
            rule("SELECT * FROM dblink('host=x', 'SELECT 1') AS remote", &policy),
            Some(RuleId::DynamicExecution)
        );
        assert_eq!(
            rule("SELECT query_to_xml('select 1', true, false, '')", &policy),
            Some(RuleId::DynamicExecution)
        );
    }

    #[test]
    fn test_side_effect_functions_are_writes() {
        let verdict = validate("SELECT nextval('orders_id_seq')", &ValidationPolicy::default());
        let rejection = verdict.rejection().unwrap();
        assert_eq!(rejection.rule, RuleId::WriteNotAllowed);
        assert!(rejection.reason.contains("nextval"));
    }

    #[test]
    fn test_locking_read_is_write() {
        let policy = ValidationPolicy::default();
        let rejection = validate("SELECT * FROM users u WHERE u.id = 1 FOR UPDATE", &policy)
            .rejection()
            .cloned()
            .unwrap();
        assert_eq!(rejection.rule, RuleId::WriteNotAllowed);
        assert!(rejection.reason.contains("locking clause"));

        assert_eq!(
            rule("SELECT id FROM users WHERE id IN (SELECT id FROM users u FOR SHARE)", &policy),
            Some(RuleId::WriteNotAllowed)
        );
        // Lock clause straight after a bare table name fails closed
        assert_eq!(rule("SELECT * FROM users FOR UPDATE", &policy), Some(RuleId::Unparseable));
    }

    #[test]
    fn test_schema_rule_covers_drop_grant_copy() {
        let policy = ValidationPolicy::default().with_write().with_allowed_schemas(["public"]);

        for sql in [
            "DROP TABLE secret.accounts",
            "DROP TABLE public.users, secret.accounts",
            "GRANT SELECT ON secret.accounts TO public",
            "REVOKE SELECT ON TABLE secret.accounts FROM analyst",
            "GRANT USAGE ON SCHEMA secret TO analyst",
            "COPY secret.accounts TO STDOUT",
            "DROP SCHEMA secret CASCADE",
            "CREATE SCHEMA secret",
        ] {
            assert_eq!(rule(sql, &policy), Some(RuleId::SchemaNotAllowed), "verdict for {sql:?}");
        }

        assert!(validate("DROP TABLE public.users", &policy).is_accepted());
        assert!(validate("GRANT SELECT ON users TO analyst", &policy).is_accepted());
        assert!(validate("COPY public.users TO STDOUT", &policy).is_accepted());
    }

    #[test]
    fn test_unresolved_targets_rejected_when_schemas_restricted() {
        let restricted = ValidationPolicy::default().with_write().with_allowed_schemas(["public"]);
        let rejection = validate("DROP ROLE analyst", &restricted).rejection().cloned().unwrap();
        assert_eq!(rejection.rule, RuleId::SchemaNotAllowed);
        assert!(rejection.reason.contains("cannot be determined"));

        let open = ValidationPolicy::default().with_write();
        assert!(validate("DROP ROLE analyst", &open).is_accepted());
    }

    #[test]
    fn test_table_functions_pass_schema_and_catalog_checks() {
        let policy = ValidationPolicy::default()
            .with_allowed_schemas(["sales"])
            .with_known_tables(["sales.orders"]);

        assert!(validate("SELECT * FROM sales.orders, generate_series(1, 3) AS g", &policy)
            .is_accepted());
        assert!(validate("SELECT * FROM generate_series(1, 10) AS g", &policy).is_accepted());
        assert!(validate("SELECT * FROM unnest(ARRAY[1, 2]) AS u", &policy).is_accepted());
        assert_eq!(rule("SELECT * FROM public.users", &policy), Some(RuleId::SchemaNotAllowed));
    }

    #[test]
    fn test_select_into_is_ddl() {
        assert_eq!(
            rule("SELECT * INTO copy_of_users FROM users", &ValidationPolicy::default()),
            Some(RuleId::DdlNotAllowed)
        );
    }

    #[test]
    fn test_ddl_and_session_statements() {
        let policy = ValidationPolicy::default();
        assert_eq!(rule("DROP TABLE users", &policy), Some(RuleId::DdlNotAllowed));
        assert_eq!(rule("TRUNCATE users", &policy), Some(RuleId::DdlNotAllowed));
        assert_eq!(rule("SET statement_timeout = 0", &policy), Some(RuleId::DdlNotAllowed));
        assert_eq!(rule("BEGIN", &policy), Some(RuleId::DdlNotAllowed));
    }

    #[test]
    fn test_write_allowed_by_policy() {
        let policy = ValidationPolicy::default().with_write();
        match validate("UPDATE users SET name = 'x' WHERE id = 1", &policy) {
            ValidationVerdict::Accepted { statements, .. } => {
                assert_eq!(statements[0].class, StatementClass::Write);
                assert!(!statements[0].capped);
            }
            ValidationVerdict::Rejected(r) => panic!("unexpected rejection: {r}"),
        }
    }

    #[test]
    fn test_schema_rule_resolves_unqualified_names() {
        let policy = ValidationPolicy::default().with_allowed_schemas(["public"]);
        assert!(validate("SELECT * FROM users", &policy).is_accepted());

        let policy = ValidationPolicy::default().with_allowed_schemas(["sales"]);
        assert_eq!(rule("SELECT * FROM users", &policy), Some(RuleId::SchemaNotAllowed));
    }

    #[test]
    fn test_schema_rule_checks_qualified_columns() {
        let policy = ValidationPolicy::default().with_allowed_schemas(["public"]);
        assert_eq!(
            rule("SELECT secret.accounts.balance FROM users", &policy),
            Some(RuleId::SchemaNotAllowed)
        );
    }

    #[test]
    fn test_cte_names_exempt_from_schema_and_catalog() {
        let policy = ValidationPolicy::default()
            .with_allowed_schemas(["public"])
            .with_known_tables(["public.orders"]);
        assert!(validate("WITH recent AS (SELECT * FROM orders) SELECT * FROM recent", &policy)
            .is_accepted());
    }

    #[test]
    fn test_unknown_table() {
        let policy = ValidationPolicy::default().with_known_tables(["public.users", "orders"]);
        assert!(validate("SELECT * FROM users JOIN orders ON true", &policy).is_accepted());
        assert_eq!(rule("SELECT * FROM invoices", &policy), Some(RuleId::UnknownTable));
    }

    #[test]
    fn test_rule_order_first_violation_wins() {
        // Too many statements beats the DDL rule on the second statement
        let policy = ValidationPolicy::default().with_allowed_schemas(["public"]);
        assert_eq!(rule("SELECT 1; DROP TABLE users;", &policy), Some(RuleId::TooManyStatements));

        // Class beats schema
        assert_eq!(rule("DELETE FROM secret.accounts", &policy), Some(RuleId::WriteNotAllowed));
    }

    #[test]
    fn test_row_cap_appended_when_missing() {
        let policy = ValidationPolicy::default().with_max_result_rows(100);
        match validate("select id from users order by id", &policy) {
            ValidationVerdict::Accepted { sql, statements } => {
                assert_eq!(sql, "SELECT id FROM users ORDER BY id LIMIT 100");
                assert!(statements[0].capped);
            }
            ValidationVerdict::Rejected(r) => panic!("unexpected rejection: {r}"),
        }
    }

    #[test]
    fn test_row_cap_respects_smaller_limit_and_wraps_larger() {
        let policy = ValidationPolicy::default().with_max_result_rows(100);
        let small = validate("SELECT id FROM users LIMIT 10", &policy);
        assert_eq!(
            small,
            ValidationVerdict::Accepted {
                sql: "SELECT id FROM users LIMIT 10".to_string(),
                statements: vec![AcceptedStatement {
                    sql: "SELECT id FROM users LIMIT 10".to_string(),
                    class: StatementClass::Read,
                    capped: true,
                }],
            }
        );

        match validate("SELECT id FROM users LIMIT 5000", &policy) {
            ValidationVerdict::Accepted { sql, .. } => {
                assert_eq!(
                    sql,
                    "SELECT * FROM (SELECT id FROM users LIMIT 5000) AS capped LIMIT 100"
                );
            }
            ValidationVerdict::Rejected(r) => panic!("unexpected rejection: {r}"),
        }
    }

    #[test]
    fn test_multiple_statements_joined_when_allowed() {
        let policy = ValidationPolicy { max_statements: 2, ..ValidationPolicy::default() };
        match validate("SELECT 1; SELECT 2", &policy) {
            ValidationVerdict::Accepted { sql, statements } => {
                assert_eq!(sql, "SELECT 1;\nSELECT 2");
                assert_eq!(statements.len(), 2);
            }
            ValidationVerdict::Rejected(r) => panic!("unexpected rejection: {r}"),
        }
    }
}

//! SQL Parsing Backend
//!
//! Turns SQL text into [`ParsedStatement`]s: a flat summary of what each
//! statement does and what it touches, which is all the validator reasons
//! about. The [`SqlParser`] trait keeps the validator independent of the
//! parsing library; [`SqlparserBackend`] implements it with `sqlparser`.

use std::fmt;
use std::ops::ControlFlow;

use serde::{Deserialize, Serialize};
use sqlparser::ast::{
    CopySource, Expr, GrantObjects, Ident, ObjectName, ObjectType, Query, SchemaName, SetExpr,
    Statement, TableFactor, Visit, Visitor,
};
use sqlparser::dialect::{Dialect, GenericDialect, MySqlDialect, PostgreSqlDialect, SQLiteDialect};
use sqlparser::parser::Parser;

use crate::error::ParseError;

/// SQL dialect used to parse candidate text
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SqlDialect {
    #[default]
    Postgres,
    Mysql,
    Sqlite,
    Generic,
}

impl SqlDialect {
    fn dialect(self) -> Box<dyn Dialect> {
        match self {
            Self::Postgres => Box::new(PostgreSqlDialect {}),
            Self::Mysql => Box::new(MySqlDialect {}),
            Self::Sqlite => Box::new(SQLiteDialect {}),
            Self::Generic => Box::new(GenericDialect {}),
        }
    }
}

impl fmt::Display for SqlDialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Postgres => "postgres",
            Self::Mysql => "mysql",
            Self::Sqlite => "sqlite",
            Self::Generic => "generic",
        };
        f.write_str(name)
    }
}

/// What a statement is, independent of what it touches
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatementKind {
    Query,
    Explain { analyze: bool },
    Show,
    Insert,
    Update,
    Delete,
    Merge,
    Copy,
    Transaction,
    Set,
    Execute,
    Prepare,
    Deallocate,
    /// Anything else, named by its leading keyword (`CREATE`, `DROP`, ...)
    Other(String),
}

impl fmt::Display for StatementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Query => f.write_str("SELECT"),
            Self::Explain { analyze: true } => f.write_str("EXPLAIN ANALYZE"),
            Self::Explain { analyze: false } => f.write_str("EXPLAIN"),
            Self::Show => f.write_str("SHOW"),
            Self::Insert => f.write_str("INSERT"),
            Self::Update => f.write_str("UPDATE"),
            Self::Delete => f.write_str("DELETE"),
            Self::Merge => f.write_str("MERGE"),
            Self::Copy => f.write_str("COPY"),
            Self::Transaction => f.write_str("transaction control"),
            Self::Set => f.write_str("SET"),
            Self::Execute => f.write_str("EXECUTE"),
            Self::Prepare => f.write_str("PREPARE"),
            Self::Deallocate => f.write_str("DEALLOCATE"),
            Self::Other(keyword) => f.write_str(keyword),
        }
    }
}

/// Table reference with identifiers normalized
///
/// Unquoted identifiers are lowercased the way `PostgreSQL` folds them;
/// quoted ones keep their case.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableRef {
    pub schema: Option<String>,
    pub name: String,
}

impl TableRef {
    /// Schema this reference resolves to
    #[must_use]
    pub fn schema_or<'a>(&'a self, default_schema: &'a str) -> &'a str {
        self.schema.as_deref().unwrap_or(default_schema)
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.schema {
            Some(schema) => write!(f, "{schema}.{}", self.name),
            None => f.write_str(&self.name),
        }
    }
}

/// How a query bounds its row count
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitShape {
    /// No LIMIT, OFFSET or FETCH clause
    None,
    /// `LIMIT <integer literal>` without OFFSET or FETCH
    Literal(u64),
    /// Any other combination (expression limits, OFFSET, FETCH)
    Other,
}

/// One parsed statement, summarized for validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedStatement {
    pub kind: StatementKind,
    /// Kinds of statements nested inside this one (writes inside CTEs,
    /// the statement behind EXPLAIN, the body of PREPARE)
    pub nested: Vec<StatementKind>,
    /// `SELECT ... FOR UPDATE` / `FOR SHARE`, at any nesting level
    pub locking_read: bool,
    /// `SELECT ... INTO new_table`
    pub select_into: bool,
    /// Tables, views, indexes and sequences the statement reads or changes
    pub relations: Vec<TableRef>,
    /// Schemas named as objects (`DROP SCHEMA`, `GRANT ... IN SCHEMA`)
    pub schemas: Vec<String>,
    /// The statement changes objects whose names could not be extracted
    /// (`CREATE FUNCTION`, `DROP ROLE`, ...)
    pub unresolved_targets: bool,
    /// Tables named by `schema.table.column` references
    pub qualified_columns: Vec<TableRef>,
    /// Names introduced by WITH clauses
    pub cte_names: Vec<String>,
    /// Called function names, lowercased and unqualified
    pub functions: Vec<String>,
    pub limit: LimitShape,
    /// Canonical text rendered by the parser
    pub text: String,
}

/// Narrow parsing capability the validator depends on
pub trait SqlParser: Send + Sync {
    /// Parse `sql` into its statements
    ///
    /// Fails with [`ParseError`] when the text is not valid in `dialect`.
    fn parse(&self, sql: &str, dialect: SqlDialect) -> Result<Vec<ParsedStatement>, ParseError>;
}

/// [`SqlParser`] backed by the `sqlparser` crate
#[derive(Debug, Clone, Copy, Default)]
pub struct SqlparserBackend;

impl SqlParser for SqlparserBackend {
    fn parse(&self, sql: &str, dialect: SqlDialect) -> Result<Vec<ParsedStatement>, ParseError> {
        let dialect = dialect.dialect();
        let statements = Parser::parse_sql(dialect.as_ref(), sql)
            .map_err(|e| ParseError::new(e.to_string()))?;

        Ok(statements.iter().map(summarize).collect())
    }
}

fn summarize(stmt: &Statement) -> ParsedStatement {
    let mut collector = Collector::default();
    if let Statement::Insert { table_name, .. } = stmt {
        collector.relations.extend(table_ref(&table_name.0));
    }
    let _ = stmt.visit(&mut collector);

    let (limit, select_into, cte_names) = match stmt {
        Statement::Query(query) => {
            let mut cte_names = Vec::new();
            collect_cte_names(query, &mut cte_names);
            (limit_shape(query), body_selects_into(&query.body), cte_names)
        }
        _ => (LimitShape::None, false, Vec::new()),
    };

    let kind = statement_kind(stmt);
    let unresolved_targets = matches!(kind, StatementKind::Other(_))
        && collector.relations.is_empty()
        && collector.schemas.is_empty();

    ParsedStatement {
        kind,
        nested: collector.nested,
        locking_read: collector.locking,
        select_into,
        relations: dedup(collector.relations),
        schemas: dedup(collector.schemas),
        unresolved_targets,
        qualified_columns: dedup(collector.qualified_columns),
        cte_names,
        functions: dedup(collector.functions),
        limit,
        text: stmt.to_string(),
    }
}

fn statement_kind(stmt: &Statement) -> StatementKind {
    match stmt {
        Statement::Query(_) => StatementKind::Query,
        Statement::Explain { analyze, .. } => StatementKind::Explain { analyze: *analyze },
        Statement::ExplainTable { .. }
        | Statement::ShowTables { .. }
        | Statement::ShowColumns { .. }
        | Statement::ShowVariable { .. } => StatementKind::Show,
        Statement::Insert { .. } => StatementKind::Insert,
        Statement::Update { .. } => StatementKind::Update,
        Statement::Delete { .. } => StatementKind::Delete,
        Statement::Merge { .. } => StatementKind::Merge,
        Statement::Copy { .. } => StatementKind::Copy,
        Statement::StartTransaction { .. }
        | Statement::Commit { .. }
        | Statement::Rollback { .. }
        | Statement::Savepoint { .. } => StatementKind::Transaction,
        Statement::SetVariable { .. } => StatementKind::Set,
        Statement::Execute { .. } => StatementKind::Execute,
        Statement::Prepare { .. } => StatementKind::Prepare,
        Statement::Deallocate { .. } => StatementKind::Deallocate,
        other => {
            let text = other.to_string();
            let keyword = text.split_whitespace().next().unwrap_or("UNKNOWN").to_uppercase();
            StatementKind::Other(keyword)
        }
    }
}

/// Walks the whole statement tree, subqueries included
#[derive(Default)]
struct Collector {
    depth: usize,
    nested: Vec<StatementKind>,
    relations: Vec<TableRef>,
    schemas: Vec<String>,
    qualified_columns: Vec<TableRef>,
    functions: Vec<String>,
    locking: bool,
    /// Name of a table function whose relation visit is next
    table_function: Option<ObjectName>,
}

impl Collector {
    fn push_function(&mut self, name: &ObjectName) {
        if let Some(ident) = name.0.last() {
            self.functions.push(ident.value.to_lowercase());
        }
    }

    fn push_relations(&mut self, names: &[ObjectName]) {
        self.relations.extend(names.iter().filter_map(|name| table_ref(&name.0)));
    }

    fn push_schemas(&mut self, names: &[ObjectName]) {
        self.schemas.extend(names.iter().filter_map(|name| name.0.last().map(normalize)));
    }

    /// Object names the visitor does not report as relations
    fn push_targets(&mut self, statement: &Statement) {
        match statement {
            Statement::Drop { object_type: ObjectType::Schema, names, .. } => {
                self.push_schemas(names);
            }
            Statement::Drop { object_type: ObjectType::Role, .. } => {}
            Statement::Drop { names, .. } => self.push_relations(names),
            Statement::Grant { objects, .. } | Statement::Revoke { objects, .. } => match objects {
                GrantObjects::Tables(names) | GrantObjects::Sequences(names) => {
                    self.push_relations(names);
                }
                GrantObjects::AllTablesInSchema { schemas }
                | GrantObjects::AllSequencesInSchema { schemas }
                | GrantObjects::Schemas(schemas) => self.push_schemas(schemas),
            },
            Statement::Copy { source: CopySource::Table { table_name, .. }, .. } => {
                self.push_relations(std::slice::from_ref(table_name));
            }
            Statement::CreateSchema {
                schema_name: SchemaName::Simple(name) | SchemaName::NamedAuthorization(name, _),
                ..
            } => self.push_schemas(std::slice::from_ref(name)),
            _ => {}
        }
    }
}

impl Visitor for Collector {
    type Break = ();

    fn pre_visit_statement(&mut self, statement: &Statement) -> ControlFlow<Self::Break> {
        if self.depth > 0 {
            self.nested.push(statement_kind(statement));
        }
        if let Statement::Query(query) = statement {
            self.locking |= query_locks(query);
        }
        self.push_targets(statement);
        self.depth += 1;
        ControlFlow::Continue(())
    }

    fn post_visit_statement(&mut self, _statement: &Statement) -> ControlFlow<Self::Break> {
        self.depth = self.depth.saturating_sub(1);
        ControlFlow::Continue(())
    }

    fn pre_visit_table_factor(&mut self, table_factor: &TableFactor) -> ControlFlow<Self::Break> {
        match table_factor {
            // `FROM generate_series(1, 10)` is a function call, not a table
            TableFactor::Table { name, args: Some(_), .. } => {
                self.push_function(name);
                self.table_function = Some(name.clone());
            }
            TableFactor::Function { name, .. } => self.push_function(name),
            TableFactor::Derived { subquery, .. } => self.locking |= query_locks(subquery),
            _ => {}
        }
        ControlFlow::Continue(())
    }

    fn pre_visit_relation(&mut self, relation: &ObjectName) -> ControlFlow<Self::Break> {
        if self.table_function.as_ref() == Some(relation) {
            self.table_function = None;
            return ControlFlow::Continue(());
        }
        if let Some(table) = table_ref(&relation.0) {
            self.relations.push(table);
        }
        ControlFlow::Continue(())
    }

    fn pre_visit_expr(&mut self, expr: &Expr) -> ControlFlow<Self::Break> {
        match expr {
            Expr::Function(function) => self.push_function(&function.name),
            Expr::Subquery(query)
            | Expr::ArraySubquery(query)
            | Expr::InSubquery { subquery: query, .. }
            | Expr::Exists { subquery: query, .. } => self.locking |= query_locks(query),
            // schema.table.column (or catalog.schema.table.column)
            Expr::CompoundIdentifier(parts) if parts.len() >= 3 => {
                if let Some(table) = table_ref(&parts[..parts.len() - 1]) {
                    self.qualified_columns.push(table);
                }
            }
            _ => {}
        }
        ControlFlow::Continue(())
    }
}

fn normalize(ident: &Ident) -> String {
    if ident.quote_style.is_some() {
        ident.value.clone()
    } else {
        ident.value.to_lowercase()
    }
}

/// Last two parts of a dotted name as schema and table
fn table_ref(parts: &[Ident]) -> Option<TableRef> {
    let (name, rest) = parts.split_last()?;
    Some(TableRef { schema: rest.last().map(normalize), name: normalize(name) })
}

fn collect_cte_names(query: &Query, names: &mut Vec<String>) {
    if let Some(with) = &query.with {
        for cte in &with.cte_tables {
            names.push(normalize(&cte.alias.name));
            collect_cte_names(&cte.query, names);
        }
    }
}

fn limit_shape(query: &Query) -> LimitShape {
    if query.offset.is_some() || query.fetch.is_some() {
        return LimitShape::Other;
    }
    match &query.limit {
        None => LimitShape::None,
        Some(Expr::Value(sqlparser::ast::Value::Number(n, _))) => {
            n.parse().map_or(LimitShape::Other, LimitShape::Literal)
        }
        Some(_) => LimitShape::Other,
    }
}

fn body_selects_into(body: &SetExpr) -> bool {
    match body {
        SetExpr::Select(select) => select.into.is_some(),
        SetExpr::Query(query) => body_selects_into(&query.body),
        SetExpr::SetOperation { left, right, .. } => {
            body_selects_into(left) || body_selects_into(right)
        }
        _ => false,
    }
}

/// Locking clause on the query, its CTEs or a parenthesized body
///
/// Subqueries in FROM and in expressions are reached through the visitor.
fn query_locks(query: &Query) -> bool {
    let in_body = match query.body.as_ref() {
        SetExpr::Query(inner) => query_locks(inner),
        _ => false,
    };
    let in_ctes = query
        .with
        .as_ref()
        .is_some_and(|with| with.cte_tables.iter().any(|cte| query_locks(&cte.query)));
    !query.locks.is_empty() || in_body || in_ctes
}

fn dedup<T: PartialEq>(items: Vec<T>) -> Vec<T> {
    let mut unique = Vec::with_capacity(items.len());
    for item in items {
        if !unique.contains(&item) {
            unique.push(item);
        }
    }
    unique
}

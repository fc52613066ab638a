//! `PostgreSQL` Driver Implementation
//!
//! This module implements the [`Driver`] trait for `PostgreSQL` databases.
//!
//! # Implementation Notes
//! - Uses `tokio-postgres` (async driver, requires tokio runtime)
//! - The server-side `statement_timeout` is set to the configured command timeout,
//!   so a statement is also bounded when the client side is gone
//! - In-flight statements are cancelled through `CancelToken`
//! - Arrays of common element types converted to JSON arrays
//! - JSON/JSONB preserved as nested JSON
//! - NUMERIC rendered as an exact decimal string
//! - BYTEA data is Base64-encoded for JSON safety

use std::time::Instant;

use tokio_postgres::error::SqlState;
use tokio_postgres::types::{FromSql, Type};
use tokio_postgres::{CancelToken, Client, Config, NoTls, Row};

use crate::engine::{millis, DatabaseConfig, Driver, QueryResult};
use crate::error::DriverError;

const APPLICATION_NAME: &str = "pg-mcp";

/// `PostgreSQL` driver
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresDriver;

/// A live `PostgreSQL` connection
pub struct PgConnection {
    client: Client,
    /// Server-side `statement_timeout`, reported when the server cancels
    statement_timeout_ms: u64,
}

impl Driver for PostgresDriver {
    type Connection = PgConnection;
    type CancelHandle = CancelToken;

    fn engine(&self) -> &'static str {
        "postgres"
    }

    async fn connect(&self, config: &DatabaseConfig) -> Result<PgConnection, DriverError> {
        let pg_config = build_pg_config(config);

        let (client, connection) = pg_config.connect(NoTls).await.map_err(|e| {
            DriverError::Connect(format!(
                "Failed to connect to PostgreSQL at {}:{}: {e}",
                config.host, config.port
            ))
        })?;

        // Spawn connection handler
        // Note: Connection errors are not logged to prevent credential leakage
        tokio::spawn(async move {
            let _ = connection.await;
        });

        Ok(PgConnection { client, statement_timeout_ms: config.command_timeout_ms })
    }

    async fn execute(
        &self,
        conn: &mut PgConnection,
        sql: &str,
    ) -> Result<QueryResult, DriverError> {
        let start = Instant::now();
        let client = &conn.client;
        let timeout_ms = conn.statement_timeout_ms;
        let map_err = |e: tokio_postgres::Error| map_pg_error(client, &e, timeout_ms);

        let stmt = client.prepare(sql).await.map_err(map_err)?;

        // Statements without result columns report an affected-row count instead
        let mut result = if stmt.columns().is_empty() {
            let rows_affected = client.execute(&stmt, &[]).await.map_err(map_err)?;
            QueryResult::affected(rows_affected)
        } else {
            let rows = client.query(&stmt, &[]).await.map_err(map_err)?;

            let column_names: Vec<String> =
                stmt.columns().iter().map(|c| c.name().to_string()).collect();

            let mut rows_data = Vec::with_capacity(rows.len());
            for row in &rows {
                rows_data.push(row_to_json(&column_names, row)?);
            }

            QueryResult::with_rows(column_names, rows_data)
        };

        result.execution_ms = millis(start.elapsed());
        Ok(result)
    }

    fn cancel_handle(&self, conn: &PgConnection) -> CancelToken {
        conn.client.cancel_token()
    }

    async fn cancel(&self, handle: CancelToken) {
        if let Err(e) = handle.cancel_query(NoTls).await {
            tracing::debug!(error = %e, "PostgreSQL cancel request failed");
        }
    }

    fn is_broken(&self, conn: &PgConnection) -> bool {
        conn.client.is_closed()
    }
}

/// Build `tokio-postgres` connection config from `DatabaseConfig`
fn build_pg_config(config: &DatabaseConfig) -> Config {
    let mut pg_config = Config::new();
    pg_config
        .host(&config.host)
        .port(config.port)
        .user(&config.user)
        .dbname(config.database_name())
        .application_name(APPLICATION_NAME)
        .connect_timeout(config.connect_timeout())
        .options(&format!("-c statement_timeout={}", config.command_timeout_ms));

    if let Some(password) = &config.password {
        pg_config.password(password);
    }

    pg_config
}

/// Map a `tokio-postgres` error, preferring the server's SQLSTATE and message
fn map_pg_error(client: &Client, err: &tokio_postgres::Error, timeout_ms: u64) -> DriverError {
    if client.is_closed() {
        return DriverError::ConnectionLost(err.to_string());
    }

    match err.as_db_error() {
        Some(db) => map_server_error(db.code(), db.message(), timeout_ms),
        None => DriverError::Query(err.to_string()),
    }
}

/// Map a server-reported error by SQLSTATE
///
/// `57014` (`query_canceled`) is what `statement_timeout` raises. Cancels
/// sent by this process only hit statements whose caller already left, so
/// the code is reported as a statement timeout.
fn map_server_error(code: &SqlState, message: &str, timeout_ms: u64) -> DriverError {
    if *code == SqlState::QUERY_CANCELED {
        return DriverError::Timeout(timeout_ms);
    }
    DriverError::Query(format!("{message} ({})", code.code()))
}

/// Convert a `PostgreSQL` row to a column-name keyed JSON object
fn row_to_json(column_names: &[String], row: &Row) -> Result<crate::engine::Row, DriverError> {
    let mut values = crate::engine::Row::new();

    for (idx, name) in column_names.iter().enumerate() {
        values.insert(name.clone(), postgres_value_to_json(row, idx)?);
    }

    Ok(values)
}

/// Read a nullable column value of type `T`
fn get<'a, T: FromSql<'a>>(row: &'a Row, idx: usize, what: &str) -> Result<Option<T>, DriverError> {
    row.try_get::<_, Option<T>>(idx)
        .map_err(|e| DriverError::Conversion(format!("Failed to get {what} value: {e}")))
}

/// Serialize a value that has a serde representation
fn to_json<T: serde::Serialize>(value: &T) -> Result<serde_json::Value, DriverError> {
    serde_json::to_value(value).map_err(|e| DriverError::Conversion(e.to_string()))
}

fn float_to_json(v: f64) -> serde_json::Value {
    // NaN/Infinity have no JSON representation
    serde_json::Number::from_f64(v).map_or(serde_json::Value::Null, serde_json::Value::Number)
}

/// Convert `PostgreSQL` value to JSON value
fn postgres_value_to_json(row: &Row, idx: usize) -> Result<serde_json::Value, DriverError> {
    use serde_json::Value;

    let column = &row.columns()[idx];
    let col_type = column.type_();

    let value = match *col_type {
        Type::BOOL => get::<bool>(row, idx, "boolean")?.map(Value::Bool),

        Type::INT2 => get::<i16>(row, idx, "i16")?.map(Value::from),
        Type::INT4 => get::<i32>(row, idx, "i32")?.map(Value::from),
        Type::INT8 => get::<i64>(row, idx, "i64")?.map(Value::from),
        Type::OID => get::<u32>(row, idx, "oid")?.map(Value::from),

        Type::FLOAT4 => get::<f32>(row, idx, "f32")?.map(|v| float_to_json(f64::from(v))),
        Type::FLOAT8 => get::<f64>(row, idx, "f64")?.map(float_to_json),

        // Exact decimal, kept as a string to avoid float rounding
        Type::NUMERIC => get::<NumericText>(row, idx, "numeric")?.map(|v| Value::String(v.0)),

        Type::VARCHAR | Type::TEXT | Type::BPCHAR | Type::NAME | Type::UNKNOWN => {
            get::<String>(row, idx, "string")?.map(Value::String)
        }

        Type::JSON | Type::JSONB => get::<Value>(row, idx, "JSON")?,

        // BYTEA (binary data) - encode as Base64
        Type::BYTEA => get::<Vec<u8>>(row, idx, "bytea")?.map(|v| {
            use base64::Engine;
            Value::String(base64::engine::general_purpose::STANDARD.encode(v))
        }),

        // Timestamps - convert to ISO 8601 strings
        Type::TIMESTAMP => get::<chrono::NaiveDateTime>(row, idx, "timestamp")?
            .map(|v| Value::String(v.format("%Y-%m-%dT%H:%M:%S%.f").to_string())),
        Type::TIMESTAMPTZ => get::<chrono::DateTime<chrono::Utc>>(row, idx, "timestamptz")?
            .map(|v| Value::String(v.to_rfc3339())),
        Type::DATE => get::<chrono::NaiveDate>(row, idx, "date")?
            .map(|v| Value::String(v.format("%Y-%m-%d").to_string())),
        Type::TIME => get::<chrono::NaiveTime>(row, idx, "time")?
            .map(|v| Value::String(v.format("%H:%M:%S%.f").to_string())),

        Type::UUID => get::<uuid::Uuid>(row, idx, "UUID")?.map(|v| Value::String(v.to_string())),

        // Arrays of common element types
        Type::TEXT_ARRAY | Type::VARCHAR_ARRAY | Type::NAME_ARRAY => {
            match get::<Vec<Option<String>>>(row, idx, "text array")? {
                Some(v) => Some(to_json(&v)?),
                None => None,
            }
        }
        Type::INT2_ARRAY => match get::<Vec<Option<i16>>>(row, idx, "int2 array")? {
            Some(v) => Some(to_json(&v)?),
            None => None,
        },
        Type::INT4_ARRAY => match get::<Vec<Option<i32>>>(row, idx, "int4 array")? {
            Some(v) => Some(to_json(&v)?),
            None => None,
        },
        Type::INT8_ARRAY => match get::<Vec<Option<i64>>>(row, idx, "int8 array")? {
            Some(v) => Some(to_json(&v)?),
            None => None,
        },
        Type::BOOL_ARRAY => match get::<Vec<Option<bool>>>(row, idx, "bool array")? {
            Some(v) => Some(to_json(&v)?),
            None => None,
        },
        Type::FLOAT8_ARRAY => get::<Vec<Option<f64>>>(row, idx, "float8 array")?.map(|v| {
            Value::Array(v.into_iter().map(|x| x.map_or(Value::Null, float_to_json)).collect())
        }),

        // Default: try to get as string (enums, citext and other text-like types)
        _ => row.try_get::<_, Option<String>>(idx).map_err(|e| {
            DriverError::Conversion(format!(
                "Unsupported PostgreSQL type '{}' in column '{}': {e}",
                col_type.name(),
                column.name()
            ))
        })?
        .map(Value::String),
    };

    Ok(value.unwrap_or(Value::Null))
}

/// NUMERIC value decoded from the binary wire format into its decimal text
struct NumericText(String);

impl<'a> FromSql<'a> for NumericText {
    fn from_sql(
        _ty: &Type,
        raw: &'a [u8],
    ) -> Result<Self, Box<dyn std::error::Error + Sync + Send>> {
        decode_numeric(raw).map(Self).map_err(Into::into)
    }

    fn accepts(ty: &Type) -> bool {
        *ty == Type::NUMERIC
    }
}

const NUMERIC_POS: u16 = 0x0000;
const NUMERIC_NEG: u16 = 0x4000;
const NUMERIC_NAN: u16 = 0xC000;
const NUMERIC_PINF: u16 = 0xD000;
const NUMERIC_NINF: u16 = 0xF000;

/// Decode the binary NUMERIC layout: ndigits, weight, sign, dscale, then
/// base-10000 digits, all big-endian 16-bit.
fn decode_numeric(raw: &[u8]) -> Result<String, String> {
    let read_u16 = |offset: usize| -> Result<u16, String> {
        raw.get(offset..offset + 2)
            .map(|b| u16::from_be_bytes([b[0], b[1]]))
            .ok_or_else(|| "truncated numeric value".to_string())
    };

    let ndigits = read_u16(0)? as usize;
    let weight = read_u16(2)? as i16;
    let sign = read_u16(4)?;
    let dscale = read_u16(6)? as usize;

    match sign {
        NUMERIC_NAN => return Ok("NaN".to_string()),
        NUMERIC_PINF => return Ok("Infinity".to_string()),
        NUMERIC_NINF => return Ok("-Infinity".to_string()),
        NUMERIC_POS | NUMERIC_NEG => {}
        other => return Err(format!("invalid numeric sign 0x{other:04x}")),
    }

    let mut digits = Vec::with_capacity(ndigits);
    for i in 0..ndigits {
        digits.push(read_u16(8 + i * 2)?);
    }
    let digit_at = |group: i32| -> u16 {
        usize::try_from(group).ok().and_then(|g| digits.get(g).copied()).unwrap_or(0)
    };

    let mut text = String::new();
    if sign == NUMERIC_NEG {
        text.push('-');
    }

    // Integer part: groups 0..=weight
    if weight < 0 {
        text.push('0');
    } else {
        for group in 0..=i32::from(weight) {
            let d = digit_at(group);
            if group == 0 {
                text.push_str(&d.to_string());
            } else {
                text.push_str(&format!("{d:04}"));
            }
        }
    }

    // Fractional part: groups after weight, cut to dscale digits
    if dscale > 0 {
        let mut fraction = String::with_capacity(dscale + 4);
        let mut group = i32::from(weight) + 1;
        while fraction.len() < dscale {
            fraction.push_str(&format!("{:04}", digit_at(group)));
            group += 1;
        }
        fraction.truncate(dscale);
        text.push('.');
        text.push_str(&fraction);
    }

    Ok(text)
}

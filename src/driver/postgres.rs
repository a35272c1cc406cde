//! PostgreSQL driver implementation.
//!
//! Provides the `PgDriver` struct that implements the `Driver` trait for
//! PostgreSQL databases using sqlx. Binds positionally with `$n` parameters;
//! the normalizer rewrites templates accordingly before they reach here.

use crate::config::{Dialect, PoolConfig};
use crate::driver::{Driver, DriverConnection, PoolStatus, Row, Value};
use crate::error::{Result, StashError};
use crate::normalize::{BoundArgs, ParamStyle};
use async_trait::async_trait;
use sqlx::postgres::{PgArguments, PgPool, PgPoolOptions, PgRow};
use sqlx::query::Query;
use sqlx::{Column as SqlxColumn, Executor, Postgres, Row as SqlxRow, TypeInfo};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Maximum number of connection retry attempts.
const MAX_RETRY_ATTEMPTS: u32 = 3;

/// Base delay between retry attempts (doubles each retry).
const RETRY_BASE_DELAY_MS: u64 = 500;

/// PostgreSQL driver backed by an sqlx connection pool.
#[derive(Debug)]
pub struct PgDriver {
    pool: PgPool,
}

impl PgDriver {
    /// Connects a new pool from the given configuration.
    ///
    /// Transient connection failures are retried with exponential backoff.
    pub async fn connect(config: &PoolConfig) -> Result<Self> {
        config.validate()?;
        let dsn = config.to_dsn()?;

        let mut last_error = None;
        let mut delay = Duration::from_millis(RETRY_BASE_DELAY_MS);

        for attempt in 1..=MAX_RETRY_ATTEMPTS {
            debug!("Connection attempt {} of {}", attempt, MAX_RETRY_ATTEMPTS);

            let result = PgPoolOptions::new()
                .min_connections(config.min_connections)
                .max_connections(config.max_connections)
                .acquire_timeout(config.acquire_timeout)
                .idle_timeout(config.idle_timeout)
                .max_lifetime(config.max_lifetime)
                .connect(&dsn)
                .await;

            match result {
                Ok(pool) => {
                    debug!("Successfully connected to database");
                    return Ok(Self { pool });
                }
                Err(e) => {
                    let is_transient = is_transient_error(&e);
                    last_error = Some(e);

                    if attempt < MAX_RETRY_ATTEMPTS && is_transient {
                        warn!(
                            "Connection attempt {} failed (transient error), retrying in {:?}",
                            attempt, delay
                        );
                        tokio::time::sleep(delay).await;
                        delay *= 2; // Exponential backoff
                    }
                }
            }
        }

        // All retries exhausted
        Err(map_connection_error(
            last_error.expect("at least one attempt was made"),
            config,
        ))
    }

    /// Creates a driver from an existing connection pool.
    ///
    /// This is primarily useful for testing.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Driver for PgDriver {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    fn param_style(&self) -> ParamStyle {
        ParamStyle::Dollar
    }

    async fn acquire(&self, timeout: Duration) -> Result<Box<dyn DriverConnection>> {
        let acquired = tokio::time::timeout(timeout, self.pool.acquire())
            .await
            .map_err(|_| StashError::PoolTimeout(timeout))?;
        let conn = acquired.map_err(|e| match e {
            sqlx::Error::PoolTimedOut => StashError::PoolTimeout(timeout),
            other => StashError::connection(other.to_string()),
        })?;
        Ok(Box::new(PgDriverConnection {
            conn,
            broken: false,
        }))
    }

    fn status(&self) -> PoolStatus {
        PoolStatus {
            size: self.pool.size(),
            idle: self.pool.num_idle() as u32,
        }
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

/// One pooled PostgreSQL connection.
#[derive(Debug)]
struct PgDriverConnection {
    conn: sqlx::pool::PoolConnection<Postgres>,
    broken: bool,
}

#[async_trait]
impl DriverConnection for PgDriverConnection {
    async fn begin(&mut self) -> Result<()> {
        self.simple("BEGIN").await
    }

    async fn commit(&mut self) -> Result<()> {
        self.simple("COMMIT").await
    }

    async fn rollback(&mut self) -> Result<()> {
        self.simple("ROLLBACK").await
    }

    async fn fetch_all(&mut self, sql: &str, args: &BoundArgs) -> Result<Vec<Row>> {
        let query = build_query(sql, args)?;
        let pg_rows = query
            .fetch_all(&mut *self.conn)
            .await
            .map_err(|e| StashError::execution(format_query_error(e)))?;
        Ok(convert_rows(&pg_rows))
    }

    async fn execute(&mut self, sql: &str, args: &BoundArgs) -> Result<u64> {
        let query = build_query(sql, args)?;
        let result = query
            .execute(&mut *self.conn)
            .await
            .map_err(|e| StashError::execution(format_query_error(e)))?;
        Ok(result.rows_affected())
    }

    fn mark_broken(&mut self) {
        self.broken = true;
    }

    fn is_broken(&self) -> bool {
        self.broken
    }
}

impl PgDriverConnection {
    /// Runs a transaction-control statement over the simple query protocol.
    async fn simple(&mut self, sql: &str) -> Result<()> {
        (&mut *self.conn)
            .execute(sql)
            .await
            .map_err(|e| StashError::execution(format_query_error(e)))?;
        Ok(())
    }
}

/// Builds an sqlx query with every argument bound in order.
fn build_query<'q>(
    sql: &'q str,
    args: &BoundArgs,
) -> Result<Query<'q, Postgres, PgArguments>> {
    let mut query = sqlx::query(sql);
    for value in args.as_positional()? {
        query = bind_value(query, value)?;
    }
    Ok(query)
}

/// Binds one value onto an sqlx query.
fn bind_value<'q>(
    query: Query<'q, Postgres, PgArguments>,
    value: &Value,
) -> Result<Query<'q, Postgres, PgArguments>> {
    Ok(match value {
        Value::Null => query.bind(Option::<String>::None),
        Value::Bool(b) => query.bind(*b),
        Value::Int(i) => query.bind(*i),
        Value::Float(f) => query.bind(*f),
        Value::String(s) => query.bind(s.clone()),
        Value::Bytes(b) => query.bind(b.clone()),
        Value::Array(items) => bind_array(query, items)?,
    })
}

/// Binds an array value as a homogeneous PostgreSQL array.
fn bind_array<'q>(
    query: Query<'q, Postgres, PgArguments>,
    items: &[Value],
) -> Result<Query<'q, Postgres, PgArguments>> {
    let Some(first) = items.first() else {
        return Ok(query.bind(Vec::<String>::new()));
    };
    macro_rules! collect {
        ($variant:ident, $ty:ty) => {{
            let mut out: Vec<$ty> = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    Value::$variant(v) => out.push(v.clone()),
                    other => {
                        return Err(StashError::execution(format!(
                            "array parameters must be homogeneous; found {other} in a {} array",
                            stringify!($variant)
                        )))
                    }
                }
            }
            out
        }};
    }
    Ok(match first {
        Value::Bool(_) => query.bind(collect!(Bool, bool)),
        Value::Int(_) => query.bind(collect!(Int, i64)),
        Value::Float(_) => query.bind(collect!(Float, f64)),
        Value::String(_) => query.bind(collect!(String, String)),
        Value::Bytes(_) => query.bind(collect!(Bytes, Vec<u8>)),
        Value::Null | Value::Array(_) => {
            return Err(StashError::execution(
                "array parameters may not contain NULL or nested arrays",
            ))
        }
    })
}

/// Converts sqlx rows to our row type, sharing the column names.
fn convert_rows(pg_rows: &[PgRow]) -> Vec<Row> {
    let Some(first) = pg_rows.first() else {
        return Vec::new();
    };
    let columns: Arc<[String]> = first
        .columns()
        .iter()
        .map(|col| col.name().to_string())
        .collect::<Vec<_>>()
        .into();
    pg_rows
        .iter()
        .map(|row| {
            let values = row
                .columns()
                .iter()
                .enumerate()
                .map(|(i, col)| convert_value(row, i, col.type_info().name()))
                .collect();
            Row::new(columns.clone(), values)
        })
        .collect()
}

/// Converts a single column value from a PgRow to our Value type.
fn convert_value(row: &PgRow, index: usize, type_name: &str) -> Value {
    // Try to get the value based on the type
    // We use a match on type name and try to decode appropriately
    match type_name.to_uppercase().as_str() {
        "BOOL" | "BOOLEAN" => row
            .try_get::<Option<bool>, _>(index)
            .ok()
            .flatten()
            .map(Value::Bool)
            .unwrap_or(Value::Null),

        "INT2" | "SMALLINT" => row
            .try_get::<Option<i16>, _>(index)
            .ok()
            .flatten()
            .map(|v| Value::Int(v as i64))
            .unwrap_or(Value::Null),

        "INT4" | "INT" | "INTEGER" => row
            .try_get::<Option<i32>, _>(index)
            .ok()
            .flatten()
            .map(|v| Value::Int(v as i64))
            .unwrap_or(Value::Null),

        "INT8" | "BIGINT" => row
            .try_get::<Option<i64>, _>(index)
            .ok()
            .flatten()
            .map(Value::Int)
            .unwrap_or(Value::Null),

        "FLOAT4" | "REAL" => row
            .try_get::<Option<f32>, _>(index)
            .ok()
            .flatten()
            .map(|v| Value::Float(v as f64))
            .unwrap_or(Value::Null),

        "FLOAT8" | "DOUBLE PRECISION" => row
            .try_get::<Option<f64>, _>(index)
            .ok()
            .flatten()
            .map(Value::Float)
            .unwrap_or(Value::Null),

        "BYTEA" => row
            .try_get::<Option<Vec<u8>>, _>(index)
            .ok()
            .flatten()
            .map(Value::Bytes)
            .unwrap_or(Value::Null),

        // For all other types, try to get as string
        _ => row
            .try_get::<Option<String>, _>(index)
            .ok()
            .flatten()
            .map(Value::String)
            .unwrap_or(Value::Null),
    }
}

/// Determines if an error is transient and worth retrying.
fn is_transient_error(error: &sqlx::Error) -> bool {
    let error_str = error.to_string().to_lowercase();

    // Connection refused or timeout are often transient
    if error_str.contains("connection refused")
        || error_str.contains("timed out")
        || error_str.contains("timeout")
        || error_str.contains("temporarily unavailable")
        || error_str.contains("connection reset")
        || error_str.contains("broken pipe")
    {
        return true;
    }

    // Authentication and database-not-found errors are not transient
    if error_str.contains("password authentication failed")
        || error_str.contains("authentication failed")
        || error_str.contains("does not exist")
        || error_str.contains("ssl")
        || error_str.contains("tls")
    {
        return false;
    }

    // Default to not retrying unknown errors
    false
}

/// Maps sqlx connection errors to user-friendly messages.
fn map_connection_error(error: sqlx::Error, config: &PoolConfig) -> StashError {
    let host = config.host.as_deref().unwrap_or("localhost");
    let port = config.port;
    let user = config.user.as_deref().unwrap_or("unknown");
    let database = config.database.as_deref().unwrap_or("unknown");

    let error_str = error.to_string().to_lowercase();

    if error_str.contains("connection refused") || error_str.contains("could not connect") {
        StashError::connection(format!(
            "Cannot connect to {host}:{port}. Check that the server is running."
        ))
    } else if error_str.contains("password authentication failed")
        || error_str.contains("authentication failed")
    {
        StashError::connection(format!(
            "Authentication failed for user '{user}'. Check your credentials."
        ))
    } else if error_str.contains("does not exist") && error_str.contains("database") {
        StashError::connection(format!("Database '{database}' does not exist."))
    } else if error_str.contains("ssl") || error_str.contains("tls") {
        StashError::connection(
            "Server requires SSL. Add '?sslmode=require' to connection string.".to_string(),
        )
    } else if error_str.contains("timed out") || error_str.contains("timeout") {
        StashError::connection(format!(
            "Connection to {host}:{port} timed out. The server may be overloaded or unreachable."
        ))
    } else {
        StashError::connection(error.to_string())
    }
}

/// Formats a query error with detail and hints if available.
fn format_query_error(error: sqlx::Error) -> String {
    let error_str = error.to_string();

    // Parse PostgreSQL error format to extract useful information
    let mut result = String::new();

    if let Some(db_error) = error.as_database_error() {
        result.push_str("ERROR: ");
        result.push_str(db_error.message());

        // Try to downcast to PgDatabaseError for Postgres-specific fields
        if let Some(pg_error) = db_error.try_downcast_ref::<sqlx::postgres::PgDatabaseError>() {
            if let Some(detail) = pg_error.detail() {
                result.push_str("\n  DETAIL: ");
                result.push_str(detail);
            }

            if let Some(hint) = pg_error.hint() {
                result.push_str("\n  HINT: ");
                result.push_str(hint);
            }

            if let Some(table) = pg_error.table() {
                result.push_str("\n  TABLE: ");
                result.push_str(table);
            }

            if let Some(column) = pg_error.column() {
                result.push_str("\n  COLUMN: ");
                result.push_str(column);
            }

            if let Some(constraint) = pg_error.constraint() {
                result.push_str("\n  CONSTRAINT: ");
                result.push_str(constraint);
            }
        }
    } else {
        // Fallback for non-database errors
        result = error_str;
    }

    result
}

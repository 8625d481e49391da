//! PostgreSQL connection implementation.
//!
//! Provides the `PostgresConnection` struct that implements the `Connection`
//! trait for a single PostgreSQL session using sqlx.

use crate::batch::Query;
use crate::config::ConnectionConfig;
use crate::db::{
    map_sqlx_error, ColumnInfo, Connection, DatabaseBackend, DriverError, DriverResult, Row,
    RowSet, Value,
};
use crate::error::{BatchError, Result};
use async_trait::async_trait;
use futures::TryStreamExt;
use sqlx::encode::IsNull;
use sqlx::error::BoxDynError;
use sqlx::postgres::types::Oid;
use sqlx::postgres::{PgArgumentBuffer, PgConnection, PgRow, PgTypeInfo, Postgres};
use sqlx::{
    Column as SqlxColumn, Connection as SqlxConnection, Either, Encode, Executor, Row as SqlxRow,
};
use sqlx::TypeInfo;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Maximum number of connection retry attempts.
const MAX_RETRY_ATTEMPTS: u32 = 3;

/// Base delay between retry attempts (doubles each retry).
const RETRY_BASE_DELAY_MS: u64 = 500;

/// PostgreSQL session.
#[derive(Debug)]
pub struct PostgresConnection {
    conn: PgConnection,
    closed: bool,
}

impl PostgresConnection {
    /// Opens a session, retrying transient failures with exponential backoff.
    pub async fn connect(config: &ConnectionConfig) -> Result<Self> {
        let conn_str = config.to_connection_string()?;

        let mut last_error = None;
        let mut delay = Duration::from_millis(RETRY_BASE_DELAY_MS);

        for attempt in 1..=MAX_RETRY_ATTEMPTS {
            debug!("Connection attempt {} of {}", attempt, MAX_RETRY_ATTEMPTS);

            match PgConnection::connect(&conn_str).await {
                Ok(conn) => {
                    debug!("Successfully connected to database");
                    return Ok(Self::from_connection(conn));
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
                        delay *= 2;
                    } else {
                        break;
                    }
                }
            }
        }

        match last_error {
            Some(e) => Err(map_connection_error(e, config)),
            None => Err(BatchError::internal("no connection attempt was made")),
        }
    }

    /// Wraps an existing sqlx connection.
    pub fn from_connection(conn: PgConnection) -> Self {
        Self {
            conn,
            closed: false,
        }
    }

    /// Column metadata for a statement that returned no rows, read from the
    /// prepared statement without running it again.
    ///
    /// Parameterized statements are skipped: preparing them without their
    /// argument types can fail, and a failed prepare aborts an open
    /// transaction.
    async fn describe_columns(&mut self, sql: &str) -> Vec<ColumnInfo> {
        match (&mut self.conn).describe(sql).await {
            Ok(described) => described
                .columns()
                .iter()
                .map(|col| ColumnInfo::new(col.name(), col.type_info().name()))
                .collect(),
            Err(e) => {
                debug!("Could not describe statement: {}", e);
                Vec::new()
            }
        }
    }

    fn track(&mut self, error: sqlx::Error) -> DriverError {
        let details = format_error_details(&error);
        let mut error = map_sqlx_error(error, DatabaseBackend::Postgres, is_connection_code);
        error.message.push_str(&details);
        if error.is_connection_level() {
            self.closed = true;
        }
        error
    }
}

#[async_trait]
impl Connection for PostgresConnection {
    fn is_closed(&self) -> bool {
        self.closed
    }

    async fn run(&mut self, query: &Query) -> DriverResult<RowSet> {
        if self.closed {
            return Err(DriverError::connection("connection is closed"));
        }

        let start = Instant::now();
        let mut statement = sqlx::query(query.text());
        for param in query.params() {
            statement = match &param.value {
                Value::Null => statement.bind(UntypedNull),
                Value::Bool(b) => statement.bind(*b),
                Value::Int(i) => statement.bind(*i),
                Value::Float(f) => statement.bind(*f),
                Value::String(s) => statement.bind(s.clone()),
                Value::Bytes(b) => statement.bind(b.clone()),
            };
        }

        let mut columns = Vec::new();
        let mut rows = Vec::new();
        let mut rows_affected = 0;

        let collected = async {
            let mut stream = (&mut self.conn).fetch_many(statement);
            while let Some(step) = stream.try_next().await? {
                match step {
                    Either::Left(done) => rows_affected += done.rows_affected(),
                    Either::Right(row) => {
                        if columns.is_empty() {
                            columns = column_info(&row);
                        }
                        rows.push(convert_row(&row));
                    }
                }
            }
            Ok::<(), sqlx::Error>(())
        }
        .await;

        if let Err(e) = collected {
            return Err(self.track(e));
        }

        if rows.is_empty() && query.params().is_empty() {
            columns = self.describe_columns(query.text()).await;
        }

        Ok(RowSet {
            columns,
            rows,
            rows_affected,
            execution_time: start.elapsed(),
        })
    }

    async fn control(&mut self, sql: &str) -> DriverResult<()> {
        if self.closed {
            return Err(DriverError::connection("connection is closed"));
        }
        match self.conn.execute(sql).await {
            Ok(_) => Ok(()),
            Err(e) => Err(self.track(e)),
        }
    }

    async fn close(self: Box<Self>) -> Result<()> {
        self.conn
            .close()
            .await
            .map_err(|e| BatchError::connection(format!("Failed to close connection: {e}")))
    }
}

/// A NULL parameter sent with an unspecified type (OID 0), so the server
/// infers it from context the way it does for an untyped literal NULL.
struct UntypedNull;

impl sqlx::Type<Postgres> for UntypedNull {
    fn type_info() -> PgTypeInfo {
        PgTypeInfo::with_oid(Oid(0))
    }
}

impl<'q> Encode<'q, Postgres> for UntypedNull {
    fn encode_by_ref(
        &self,
        _buf: &mut PgArgumentBuffer,
    ) -> std::result::Result<IsNull, BoxDynError> {
        Ok(IsNull::Yes)
    }
}

/// SQLSTATE codes that mean the session is gone: class 08 (connection
/// exception) and the 57P0x operator interventions.
fn is_connection_code(code: &str) -> bool {
    code.starts_with("08") || matches!(code, "57P01" | "57P02" | "57P03")
}

fn column_info(row: &PgRow) -> Vec<ColumnInfo> {
    row.columns()
        .iter()
        .map(|col| ColumnInfo::new(col.name(), col.type_info().name()))
        .collect()
}

/// Converts a sqlx PgRow to our Row type.
fn convert_row(row: &PgRow) -> Row {
    row.columns()
        .iter()
        .enumerate()
        .map(|(i, col)| convert_value(row, i, col.type_info().name()))
        .collect()
}

/// Converts a single column value from a PgRow to our Value type.
fn convert_value(row: &PgRow, index: usize, type_name: &str) -> Value {
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

        // Everything else is read as text when the driver allows it
        _ => row
            .try_get::<Option<String>, _>(index)
            .ok()
            .flatten()
            .map(Value::String)
            .unwrap_or(Value::Null),
    }
}

/// Determines if a connect error is transient and worth retrying.
fn is_transient_error(error: &sqlx::Error) -> bool {
    let error_str = error.to_string().to_lowercase();

    if error_str.contains("password authentication failed")
        || error_str.contains("authentication failed")
        || error_str.contains("does not exist")
        || error_str.contains("ssl")
        || error_str.contains("tls")
    {
        return false;
    }

    error_str.contains("connection refused")
        || error_str.contains("timed out")
        || error_str.contains("timeout")
        || error_str.contains("temporarily unavailable")
        || error_str.contains("connection reset")
        || error_str.contains("broken pipe")
}

/// Maps sqlx connect errors to user-friendly messages.
fn map_connection_error(error: sqlx::Error, config: &ConnectionConfig) -> BatchError {
    let host = config.host.as_deref().unwrap_or("localhost");
    let port = config.port;
    let user = config.user.as_deref().unwrap_or("unknown");
    let database = config.database.as_deref().unwrap_or("unknown");

    let error_str = error.to_string().to_lowercase();

    if error_str.contains("connection refused") || error_str.contains("could not connect") {
        BatchError::connection(format!(
            "Cannot connect to {host}:{port}. Check that the server is running."
        ))
    } else if error_str.contains("password authentication failed")
        || error_str.contains("authentication failed")
    {
        BatchError::connection(format!(
            "Authentication failed for user '{user}'. Check your credentials."
        ))
    } else if error_str.contains("does not exist") && error_str.contains("database") {
        BatchError::connection(format!("Database '{database}' does not exist."))
    } else if error_str.contains("ssl") || error_str.contains("tls") {
        BatchError::connection(
            "Server requires SSL. Add '?sslmode=require' to connection string.".to_string(),
        )
    } else if error_str.contains("timed out") || error_str.contains("timeout") {
        BatchError::connection(format!(
            "Connection to {host}:{port} timed out. The server may be overloaded or unreachable."
        ))
    } else {
        BatchError::connection(error.to_string())
    }
}

/// Collects the PostgreSQL-specific DETAIL / HINT / CONSTRAINT fields.
fn format_error_details(error: &sqlx::Error) -> String {
    let mut result = String::new();

    let Some(pg_error) = error
        .as_database_error()
        .and_then(|e| e.try_downcast_ref::<sqlx::postgres::PgDatabaseError>())
    else {
        return result;
    };

    if let Some(detail) = pg_error.detail() {
        result.push_str("\n  DETAIL: ");
        result.push_str(detail);
    }
    if let Some(hint) = pg_error.hint() {
        result.push_str("\n  HINT: ");
        result.push_str(hint);
    }
    if let Some(constraint) = pg_error.constraint() {
        result.push_str("\n  CONSTRAINT: ");
        result.push_str(constraint);
    }

    result
}

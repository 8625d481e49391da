//! SQLite connection implementation.
//!
//! Wraps a single sqlx `SqliteConnection`. Used for local files and for
//! in-memory databases (`sqlite::memory:`), which is what most tests run
//! against.

use crate::batch::Query;
use crate::config::ConnectionConfig;
use crate::db::{
    map_sqlx_error, ColumnInfo, Connection, DatabaseBackend, DriverError, DriverResult, Row,
    RowSet, Value,
};
use crate::error::{BatchError, Result};
use async_trait::async_trait;
use futures::TryStreamExt;
use sqlx::sqlite::{SqliteConnection as RawSqliteConnection, SqliteRow};
use sqlx::{Column as SqlxColumn, Connection as SqlxConnection, Either, Executor, Row as SqlxRow};
use sqlx::{TypeInfo, ValueRef};
use std::time::Instant;
use tracing::debug;

/// SQLite session.
#[derive(Debug)]
pub struct SqliteConnection {
    conn: RawSqliteConnection,
    closed: bool,
}

impl SqliteConnection {
    /// Opens a connection for the given configuration.
    pub async fn connect(config: &ConnectionConfig) -> Result<Self> {
        let url = config.to_connection_string()?;
        Self::connect_url(&url).await
    }

    /// Opens a connection from a sqlx SQLite URL, e.g. `sqlite::memory:`.
    pub async fn connect_url(url: &str) -> Result<Self> {
        debug!("Opening SQLite database {}", url);
        let conn = RawSqliteConnection::connect(url)
            .await
            .map_err(|e| BatchError::connection(format!("Cannot open SQLite database: {e}")))?;
        Ok(Self::from_connection(conn))
    }

    /// Wraps an existing sqlx connection.
    pub fn from_connection(conn: RawSqliteConnection) -> Self {
        Self {
            conn,
            closed: false,
        }
    }

    fn track(&mut self, error: sqlx::Error) -> DriverError {
        let error = map_sqlx_error(error, DatabaseBackend::Sqlite, is_connection_code);
        if error.is_connection_level() {
            self.closed = true;
        }
        error
    }
}

#[async_trait]
impl Connection for SqliteConnection {
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
                Value::Null => statement.bind(None::<String>),
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
            .map_err(|e| BatchError::connection(format!("Failed to close SQLite database: {e}")))
    }
}

/// SQLite result codes that mean the database file itself is unusable.
fn is_connection_code(code: &str) -> bool {
    match code.parse::<u32>() {
        // IOERR, CORRUPT, CANTOPEN, NOTADB
        Ok(n) => matches!(n & 0xff, 10 | 11 | 14 | 26),
        Err(_) => false,
    }
}

fn column_info(row: &SqliteRow) -> Vec<ColumnInfo> {
    row.columns()
        .iter()
        .map(|col| ColumnInfo::new(col.name(), col.type_info().name()))
        .collect()
}

fn convert_row(row: &SqliteRow) -> Row {
    (0..row.len()).map(|i| convert_value(row, i)).collect()
}

/// Converts one cell using the value's storage class rather than the
/// declared column type, since SQLite columns are dynamically typed.
fn convert_value(row: &SqliteRow, index: usize) -> Value {
    let storage = match row.try_get_raw(index) {
        Ok(raw) if raw.is_null() => return Value::Null,
        Ok(raw) => raw.type_info().name().to_uppercase(),
        Err(_) => return Value::Null,
    };

    match storage.as_str() {
        "INTEGER" | "INT8" | "BIGINT" => row
            .try_get::<i64, _>(index)
            .map(Value::Int)
            .unwrap_or(Value::Null),
        "BOOLEAN" => row
            .try_get::<bool, _>(index)
            .map(Value::Bool)
            .unwrap_or(Value::Null),
        "REAL" | "FLOAT" | "DOUBLE" => row
            .try_get::<f64, _>(index)
            .map(Value::Float)
            .unwrap_or(Value::Null),
        "BLOB" => row
            .try_get::<Vec<u8>, _>(index)
            .map(Value::Bytes)
            .unwrap_or(Value::Null),
        _ => row
            .try_get::<String, _>(index)
            .map(Value::String)
            .unwrap_or(Value::Null),
    }
}

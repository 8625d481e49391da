//! Database connection layer for querybatch.
//!
//! Provides a trait-based interface over an open, driver-specific session so
//! the batch executor can run statements without knowing which backend it
//! is talking to.

mod mock;
mod postgres;
mod sqlite;
mod types;

pub use mock::{MockCall, MockConnection};
pub use postgres::PostgresConnection;
pub use sqlite::SqliteConnection;
pub use types::{ColumnInfo, Row, RowSet, Value};

use crate::batch::{Query, QueryErrorKind};
use crate::config::ConnectionConfig;
use crate::error::Result;
use async_trait::async_trait;
use std::fmt;

/// Supported database backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseBackend {
    #[default]
    Postgres,
    Sqlite,
}

impl DatabaseBackend {
    /// Returns the backend as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Postgres => "postgres",
            Self::Sqlite => "sqlite",
        }
    }

    /// Parses a backend from a string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "postgres" | "postgresql" => Some(Self::Postgres),
            "sqlite" | "sqlite3" => Some(Self::Sqlite),
            _ => None,
        }
    }

    /// Returns the default port for this backend, if it uses one.
    pub fn default_port(&self) -> Option<u16> {
        match self {
            Self::Postgres => Some(5432),
            Self::Sqlite => None,
        }
    }

}

/// Opens a connection for the given configuration.
///
/// The caller owns the returned handle and is responsible for closing it.
pub async fn connect(config: &ConnectionConfig) -> Result<Box<dyn Connection>> {
    match config.backend {
        DatabaseBackend::Postgres => {
            let conn = PostgresConnection::connect(config).await?;
            Ok(Box::new(conn))
        }
        DatabaseBackend::Sqlite => {
            let conn = SqliteConnection::connect(config).await?;
            Ok(Box::new(conn))
        }
    }
}

/// Whether a driver error affects the whole session or only one statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorScope {
    /// The session is unusable.
    Connection,
    /// Only the current statement failed; the session can keep going.
    Statement,
}

/// An error reported by a driver while running a statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverError {
    pub scope: ErrorScope,
    pub kind: QueryErrorKind,
    /// Driver error code (SQLSTATE for PostgreSQL, result code for SQLite).
    pub code: Option<String>,
    pub message: String,
}

impl DriverError {
    /// A session-level failure.
    pub fn connection(message: impl Into<String>) -> Self {
        Self {
            scope: ErrorScope::Connection,
            kind: QueryErrorKind::Other,
            code: None,
            message: message.into(),
        }
    }

    /// A failure of a single statement.
    pub fn statement(kind: QueryErrorKind, message: impl Into<String>) -> Self {
        Self {
            scope: ErrorScope::Statement,
            kind,
            code: None,
            message: message.into(),
        }
    }

    pub fn with_code(mut self, code: Option<String>) -> Self {
        self.code = code;
        self
    }

    pub fn is_connection_level(&self) -> bool {
        self.scope == ErrorScope::Connection
    }
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.code {
            Some(code) => write!(f, "[{}] {}", code, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for DriverError {}

/// Result type for driver calls.
pub type DriverResult<T> = std::result::Result<T, DriverError>;

/// An open session with a data source.
///
/// Handles are single-threaded: every method takes `&mut self`, so one batch
/// has exclusive use of the session while it runs.
#[async_trait]
pub trait Connection: Send {
    /// Returns true once the session can no longer be used.
    fn is_closed(&self) -> bool;

    /// Prepares and runs one parameterized statement, returning its rows.
    async fn run(&mut self, query: &Query) -> DriverResult<RowSet>;

    /// Runs a parameterless control statement (transaction management).
    async fn control(&mut self, sql: &str) -> DriverResult<()>;

    async fn begin(&mut self) -> DriverResult<()> {
        self.control("BEGIN").await
    }

    async fn commit(&mut self) -> DriverResult<()> {
        self.control("COMMIT").await
    }

    async fn rollback(&mut self) -> DriverResult<()> {
        self.control("ROLLBACK").await
    }

    async fn savepoint(&mut self, name: &str) -> DriverResult<()> {
        self.control(&format!("SAVEPOINT {name}")).await
    }

    async fn release_savepoint(&mut self, name: &str) -> DriverResult<()> {
        self.control(&format!("RELEASE SAVEPOINT {name}")).await
    }

    async fn rollback_to_savepoint(&mut self, name: &str) -> DriverResult<()> {
        self.control(&format!("ROLLBACK TO SAVEPOINT {name}")).await
    }

    /// Closes the session.
    async fn close(self: Box<Self>) -> Result<()>;
}

/// Maps a sqlx error to a driver error.
///
/// `is_connection_code` decides which database error codes of `backend` mean
/// the session itself is broken.
pub(crate) fn map_sqlx_error(
    error: sqlx::Error,
    backend: DatabaseBackend,
    is_connection_code: fn(&str) -> bool,
) -> DriverError {
    match error {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::Protocol(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => DriverError::connection(error.to_string()),
        sqlx::Error::Database(db_error) => {
            let code = db_error.code().map(|c| c.into_owned());
            let message = db_error.message().to_string();

            if code.as_deref().is_some_and(is_connection_code) {
                return DriverError::connection(message).with_code(code);
            }

            let kind = match db_error.kind() {
                sqlx::error::ErrorKind::UniqueViolation
                | sqlx::error::ErrorKind::ForeignKeyViolation
                | sqlx::error::ErrorKind::NotNullViolation
                | sqlx::error::ErrorKind::CheckViolation => QueryErrorKind::Constraint,
                _ => classify_error_kind(backend, code.as_deref(), &message),
            };

            DriverError::statement(kind, message).with_code(code)
        }
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) | sqlx::Error::Encode(_) => {
            DriverError::statement(QueryErrorKind::TypeMismatch, error.to_string())
        }
        other => DriverError::statement(QueryErrorKind::Other, other.to_string()),
    }
}

/// Classifies a statement error from its driver code and message.
///
/// PostgreSQL reports five-character SQLSTATE codes, many of them all digits;
/// SQLite reports numeric (possibly extended) result codes and puts most
/// detail in the message. The backend decides how the code is read.
pub fn classify_error_kind(
    backend: DatabaseBackend,
    code: Option<&str>,
    message: &str,
) -> QueryErrorKind {
    let by_code = code.and_then(|code| match backend {
        DatabaseBackend::Postgres => classify_sqlstate(code),
        DatabaseBackend::Sqlite => classify_sqlite_code(code),
    });
    if let Some(kind) = by_code {
        return kind;
    }

    let message = message.to_lowercase();
    if message.contains("syntax error") {
        QueryErrorKind::Syntax
    } else if message.contains("no such table")
        || message.contains("no such column")
        || message.contains("no such function")
        || message.contains("does not exist")
    {
        QueryErrorKind::UndefinedObject
    } else if message.contains("constraint") {
        QueryErrorKind::Constraint
    } else if message.contains("mismatch") {
        QueryErrorKind::TypeMismatch
    } else {
        QueryErrorKind::Other
    }
}

fn classify_sqlstate(code: &str) -> Option<QueryErrorKind> {
    match code {
        "42601" => Some(QueryErrorKind::Syntax),
        "42P01" | "42703" | "42704" | "42883" | "3F000" => Some(QueryErrorKind::UndefinedObject),
        "42804" => Some(QueryErrorKind::TypeMismatch),
        _ if code.starts_with("23") => Some(QueryErrorKind::Constraint),
        _ if code.starts_with("22") => Some(QueryErrorKind::TypeMismatch),
        _ => None,
    }
}

fn classify_sqlite_code(code: &str) -> Option<QueryErrorKind> {
    // Extended result codes carry the primary code in the low byte.
    match code.parse::<u32>().ok()? & 0xff {
        19 => Some(QueryErrorKind::Constraint),
        20 => Some(QueryErrorKind::TypeMismatch),
        _ => None,
    }
}

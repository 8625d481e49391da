//! Scripted in-memory connection for tests and dry runs.
//!
//! Records every driver call so tests can assert what the executor did (or
//! did not) send to the data source.

use super::{Connection, DriverError, DriverResult, RowSet};
use crate::batch::{Query, QueryErrorKind};
use crate::db::{ColumnInfo, Value};
use crate::error::Result;
use async_trait::async_trait;
use std::time::Duration;

/// A driver call observed by [`MockConnection`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    /// A statement passed to `run`, with its parameter count.
    Run { sql: String, params: usize },
    /// A transaction control statement.
    Control(String),
}

#[derive(Debug, Clone)]
enum Script {
    Fail(DriverError),
    Respond(RowSet),
}

/// A connection that answers from a script instead of a database.
///
/// Statements, including transaction control, are matched by substring
/// against the scripted rules in the order they were added. Unmatched `SELECT`s return one mock row; anything
/// else reports one affected row.
#[derive(Debug, Default)]
pub struct MockConnection {
    rules: Vec<(String, Script)>,
    calls: Vec<MockCall>,
    delay: Option<Duration>,
    closed: bool,
}

impl MockConnection {
    /// Creates a new mock connection with no scripted rules.
    pub fn new() -> Self {
        Self::default()
    }

    /// Statements containing `pattern` fail with a statement-level error.
    pub fn fail_on(
        mut self,
        pattern: impl Into<String>,
        kind: QueryErrorKind,
        message: impl Into<String>,
    ) -> Self {
        self.rules.push((
            pattern.into(),
            Script::Fail(DriverError::statement(kind, message)),
        ));
        self
    }

    /// Statements containing `pattern` drop the session.
    pub fn disconnect_on(mut self, pattern: impl Into<String>) -> Self {
        self.rules.push((
            pattern.into(),
            Script::Fail(DriverError::connection("server closed the connection unexpectedly")),
        ));
        self
    }

    /// Statements containing `pattern` return `rows`.
    pub fn respond_with(mut self, pattern: impl Into<String>, rows: RowSet) -> Self {
        self.rules.push((pattern.into(), Script::Respond(rows)));
        self
    }

    /// Every `run` sleeps for `delay` before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Starts out closed, as if the session had already been dropped.
    pub fn closed(mut self) -> Self {
        self.closed = true;
        self
    }

    /// All driver calls received so far.
    pub fn calls(&self) -> &[MockCall] {
        &self.calls
    }

    /// Statements passed to `run`, in order.
    pub fn executed(&self) -> Vec<&str> {
        self.calls
            .iter()
            .filter_map(|call| match call {
                MockCall::Run { sql, .. } => Some(sql.as_str()),
                MockCall::Control(_) => None,
            })
            .collect()
    }

    fn lookup(&self, sql: &str) -> Option<&Script> {
        self.rules
            .iter()
            .find(|(pattern, _)| sql.contains(pattern.as_str()))
            .map(|(_, script)| script)
    }
}

#[async_trait]
impl Connection for MockConnection {
    fn is_closed(&self) -> bool {
        self.closed
    }

    async fn run(&mut self, query: &Query) -> DriverResult<RowSet> {
        self.calls.push(MockCall::Run {
            sql: query.text().to_string(),
            params: query.params().len(),
        });

        if self.closed {
            return Err(DriverError::connection("connection is closed"));
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        match self.lookup(query.text()).cloned() {
            Some(Script::Fail(error)) => {
                if error.is_connection_level() {
                    self.closed = true;
                }
                Err(error)
            }
            Some(Script::Respond(rows)) => Ok(rows),
            None if query.text().trim_start().to_uppercase().starts_with("SELECT") => {
                Ok(RowSet::with_data(
                    vec![ColumnInfo::new("result", "text")],
                    vec![vec![Value::String(format!("Mock result for: {}", query.text()))]],
                ))
            }
            None => Ok(RowSet::new().with_rows_affected(1)),
        }
    }

    async fn control(&mut self, sql: &str) -> DriverResult<()> {
        self.calls.push(MockCall::Control(sql.to_string()));
        if self.closed {
            return Err(DriverError::connection("connection is closed"));
        }

        match self.lookup(sql).cloned() {
            Some(Script::Fail(error)) => {
                if error.is_connection_level() {
                    self.closed = true;
                }
                Err(error)
            }
            _ => Ok(()),
        }
    }

    async fn close(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_select() {
        let mut conn = MockConnection::new();
        let result = conn.run(&Query::new("SELECT 1")).await.unwrap();
        assert_eq!(result.row_count(), 1);
        assert_eq!(result.columns.len(), 1);
    }

    #[tokio::test]
    async fn test_mock_insert() {
        let mut conn = MockConnection::new();
        let result = conn
            .run(&Query::new("INSERT INTO test VALUES (?)").bind(1))
            .await
            .unwrap();
        assert_eq!(result.rows_affected, 1);
        assert_eq!(
            conn.calls(),
            &[MockCall::Run {
                sql: "INSERT INTO test VALUES (?)".to_string(),
                params: 1
            }]
        );
    }

    #[tokio::test]
    async fn test_mock_scripted_failure() {
        let mut conn = MockConnection::new().fail_on(
            "missing_table",
            QueryErrorKind::UndefinedObject,
            "no such table: missing_table",
        );
        let err = conn
            .run(&Query::new("SELECT * FROM missing_table"))
            .await
            .unwrap_err();
        assert_eq!(err.kind, QueryErrorKind::UndefinedObject);
        assert!(!conn.is_closed());
    }

    #[tokio::test]
    async fn test_mock_disconnect_closes() {
        let mut conn = MockConnection::new().disconnect_on("boom");
        let err = conn.run(&Query::new("SELECT boom")).await.unwrap_err();
        assert!(err.is_connection_level());
        assert!(conn.is_closed());
    }

    #[tokio::test]
    async fn test_mock_scripted_response() {
        let rows = RowSet::with_data(
            vec![ColumnInfo::new("n", "int")],
            vec![vec![Value::Int(3)]],
        );
        let mut conn = MockConnection::new().respond_with("COUNT(*)", rows.clone());

        let result = conn.run(&Query::new("SELECT COUNT(*) FROM t")).await.unwrap();
        assert_eq!(result, rows);
    }

    #[tokio::test]
    async fn test_mock_scripted_control_failure() {
        let mut conn = MockConnection::new().fail_on(
            "RELEASE SAVEPOINT",
            QueryErrorKind::Other,
            "no such savepoint: querybatch_0",
        );

        conn.savepoint("querybatch_0").await.unwrap();
        let err = conn.release_savepoint("querybatch_0").await.unwrap_err();
        assert_eq!(err.message, "no such savepoint: querybatch_0");
        assert!(!err.is_connection_level());
        assert_eq!(conn.calls().len(), 2);
    }
}

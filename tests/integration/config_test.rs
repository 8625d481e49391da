//! Config file loading.

use pretty_assertions::assert_eq;
use querybatch::config::{Config, ConnectionConfig};
use querybatch::db::{Connection, DatabaseBackend, SqliteConnection};
use querybatch::{BatchError, BatchPolicy, TransactionMode};
use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;

#[test]
fn test_load_config_from_file() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
[executor]
policy = "best-effort"
transaction = "batch"
deadline_ms = 2000

[connections.default]
backend = "sqlite"
database = ":memory:"

[connections.reporting]
host = "db.internal"
database = "reports"
user = "reader"
"#
    )
    .unwrap();

    let config = Config::load_from_file(file.path()).unwrap();
    assert_eq!(config.executor.policy, BatchPolicy::BestEffort);

    let options = config.executor.to_options();
    assert_eq!(options.transaction, TransactionMode::Batch);
    assert_eq!(options.deadline, Some(Duration::from_millis(2000)));
    assert_eq!(options.statement_timeout, None);

    let default = config.get_connection(None).unwrap();
    assert_eq!(default.backend, DatabaseBackend::Sqlite);
    assert_eq!(default.to_connection_string().unwrap(), "sqlite::memory:");

    let reporting = config.get_connection(Some("reporting")).unwrap();
    assert_eq!(reporting.backend, DatabaseBackend::Postgres);
    assert_eq!(reporting.port, 5432);
}

#[test]
fn test_missing_file_yields_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config::load_from_file(&dir.path().join("absent.toml")).unwrap();

    assert_eq!(config.executor.policy, BatchPolicy::FailFast);
    assert!(config.connections.is_empty());
}

#[test]
fn test_invalid_policy_is_config_error() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "[executor]\npolicy = \"sometimes\"").unwrap();

    let err = Config::load_from_file(file.path()).unwrap_err();
    assert!(matches!(err, BatchError::Config(_)));
    assert_eq!(err.exit_code(), 1);
}

#[tokio::test]
async fn test_sqlite_mode_from_connection_string_is_honoured() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("absent.db");

    let read_only =
        ConnectionConfig::from_connection_string(&format!("sqlite:{}?mode=ro", path.display()))
            .unwrap();
    let err = SqliteConnection::connect(&read_only).await.unwrap_err();
    assert!(matches!(err, BatchError::Connection(_)));
    assert!(!path.exists());

    let default_mode =
        ConnectionConfig::from_connection_string(&format!("sqlite:{}", path.display())).unwrap();
    let conn = SqliteConnection::connect(&default_mode).await.unwrap();
    Box::new(conn).close().await.unwrap();
    assert!(path.exists());
}

//! Splitting a script into statements and running them as one batch.

use pretty_assertions::assert_eq;
use querybatch::batch::split_statements;
use querybatch::db::{DatabaseBackend, SqliteConnection, Value};
use querybatch::{BatchPolicy, BatchQueryExecutor, BatchRequest};

const SCRIPT: &str = "
-- schema
CREATE TABLE notes (id INTEGER, body TEXT);

INSERT INTO notes VALUES (1, 'first; with a semicolon');
INSERT INTO notes VALUES (2, 'second');
/* trailing comment */ ;
SELECT body FROM notes ORDER BY id;
";

#[tokio::test]
async fn test_split_script_and_execute() {
    let statements = split_statements(SCRIPT, DatabaseBackend::Sqlite).unwrap();
    assert_eq!(statements.len(), 4);

    let request = BatchRequest::from_statements(statements);
    let mut conn = SqliteConnection::connect_url("sqlite::memory:").await.unwrap();
    let result = BatchQueryExecutor::default()
        .execute(&mut conn, &request, BatchPolicy::FailFast)
        .await
        .unwrap();

    assert!(result.all_succeeded());
    let rows = result.outcomes[3].rows().unwrap();
    assert_eq!(
        rows.rows,
        vec![
            vec![Value::String("first; with a semicolon".into())],
            vec![Value::String("second".into())],
        ]
    );
}

#[tokio::test]
async fn test_result_into_result_reports_first_failure() {
    let request = BatchRequest::from_statements(["SELECT 1", "SELECT * FROM nowhere", "SELECT 2"]);
    let mut conn = SqliteConnection::connect_url("sqlite::memory:").await.unwrap();
    let result = BatchQueryExecutor::default()
        .execute(&mut conn, &request, BatchPolicy::BestEffort)
        .await
        .unwrap();

    let err = result.into_result().unwrap_err();
    assert_eq!(err.exit_code(), 2);
    assert!(err.to_string().contains("1 failed, 0 skipped of 3 queries"));
}

//! Batch execution against in-memory SQLite databases.

use pretty_assertions::assert_eq;
use querybatch::db::{Connection, SqliteConnection, Value};
use querybatch::{
    BatchError, BatchPolicy, BatchQueryExecutor, BatchRequest, ExecutorOptions, Outcome, Query,
    QueryErrorKind, SkipReason, TransactionMode,
};

/// Opens a fresh in-memory database with an empty table `t`.
async fn setup() -> SqliteConnection {
    let mut conn = SqliteConnection::connect_url("sqlite::memory:")
        .await
        .expect("in-memory SQLite should open");
    conn.run(&Query::new("CREATE TABLE t (id INTEGER PRIMARY KEY, label TEXT)"))
        .await
        .unwrap();
    conn
}

async fn count_rows(conn: &mut SqliteConnection) -> i64 {
    let rows = conn.run(&Query::new("SELECT COUNT(*) FROM t")).await.unwrap();
    match rows.rows[0][0] {
        Value::Int(n) => n,
        ref other => panic!("Expected Int count, got {:?}", other),
    }
}

fn missing_table_example() -> BatchRequest {
    BatchRequest::from_statements([
        "INSERT INTO t VALUES (1, 'one')",
        "SELECT * FROM missing_table",
        "INSERT INTO t VALUES (2, 'two')",
    ])
}

#[tokio::test]
async fn test_fail_fast_example() {
    let mut conn = setup().await;
    let result = BatchQueryExecutor::default()
        .execute(&mut conn, &missing_table_example(), BatchPolicy::FailFast)
        .await
        .unwrap();

    assert_eq!(result.len(), 3);
    assert_eq!(result.outcomes[0].rows().unwrap().rows_affected, 1);

    let error = result.outcomes[1].error().unwrap();
    assert_eq!(error.index, 1);
    assert_eq!(error.kind, QueryErrorKind::UndefinedObject);
    assert!(error.message.contains("missing_table"));

    assert_eq!(result.outcomes[2], Outcome::skipped(SkipReason::PriorFailure));
    assert_eq!(count_rows(&mut conn).await, 1);
}

#[tokio::test]
async fn test_best_effort_example() {
    let mut conn = setup().await;
    let result = BatchQueryExecutor::default()
        .execute(&mut conn, &missing_table_example(), BatchPolicy::BestEffort)
        .await
        .unwrap();

    assert_eq!(result.success_flags(), vec![true, false, true]);
    assert_eq!(result.total_rows_affected(), 2);
    assert_eq!(count_rows(&mut conn).await, 2);
}

#[tokio::test]
async fn test_select_results_keep_order_and_types() {
    let mut conn = setup().await;
    let request = BatchRequest::new(vec![
        Query::new("INSERT INTO t VALUES (?, ?)").bind(1).bind("one"),
        Query::new("INSERT INTO t VALUES (?, ?)").bind(2).bind(None::<String>),
        Query::new("SELECT id, label FROM t ORDER BY id"),
    ]);

    let result = BatchQueryExecutor::default()
        .execute(&mut conn, &request, BatchPolicy::FailFast)
        .await
        .unwrap();

    assert!(result.all_succeeded());
    let rows = result.outcomes[2].rows().unwrap();
    assert_eq!(rows.columns[0].name, "id");
    assert_eq!(
        rows.rows,
        vec![
            vec![Value::Int(1), Value::String("one".into())],
            vec![Value::Int(2), Value::Null],
        ]
    );
}

#[tokio::test]
async fn test_constraint_violation_is_captured() {
    let mut conn = setup().await;
    let request = BatchRequest::from_statements([
        "INSERT INTO t VALUES (1, 'one')",
        "INSERT INTO t VALUES (1, 'again')",
        "INSERT INTO t VALUES (2, 'two')",
    ]);

    let result = BatchQueryExecutor::default()
        .execute(&mut conn, &request, BatchPolicy::BestEffort)
        .await
        .unwrap();

    let error = result.outcomes[1].error().unwrap();
    assert_eq!(error.kind, QueryErrorKind::Constraint);
    assert!(error.code.is_some());
    assert_eq!(count_rows(&mut conn).await, 2);
}

#[tokio::test]
async fn test_syntax_error_is_captured() {
    let mut conn = setup().await;
    let request = BatchRequest::from_statements(["SELEC 1", "SELECT 2"]);

    let result = BatchQueryExecutor::default()
        .execute(&mut conn, &request, BatchPolicy::BestEffort)
        .await
        .unwrap();

    assert_eq!(result.outcomes[0].error().unwrap().kind, QueryErrorKind::Syntax);
    assert!(result.outcomes[1].is_success());
}

#[tokio::test]
async fn test_transactional_fail_fast_rolls_back_everything() {
    let mut conn = setup().await;
    let executor = BatchQueryExecutor::new(
        ExecutorOptions::new().with_transaction(TransactionMode::Batch),
    );

    let result = executor
        .execute(&mut conn, &missing_table_example(), BatchPolicy::FailFast)
        .await
        .unwrap();

    assert!(result.rolled_back);
    // The first insert's outcome is unaffected, but its effect is undone.
    assert!(result.outcomes[0].is_success());
    assert_eq!(count_rows(&mut conn).await, 0);
}

#[tokio::test]
async fn test_transactional_best_effort_keeps_successes() {
    let mut conn = setup().await;
    let executor = BatchQueryExecutor::new(
        ExecutorOptions::new().with_transaction(TransactionMode::Batch),
    );

    let result = executor
        .execute(&mut conn, &missing_table_example(), BatchPolicy::BestEffort)
        .await
        .unwrap();

    assert!(result.transactional);
    assert!(!result.rolled_back);
    assert_eq!(result.success_flags(), vec![true, false, true]);
    assert_eq!(count_rows(&mut conn).await, 2);
}

#[tokio::test]
async fn test_empty_batch_rejected() {
    let mut conn = setup().await;
    let err = BatchQueryExecutor::default()
        .execute(&mut conn, &BatchRequest::default(), BatchPolicy::FailFast)
        .await
        .unwrap_err();

    assert!(matches!(err, BatchError::Config(_)));
    assert_eq!(count_rows(&mut conn).await, 0);
}

#[tokio::test]
async fn test_close_connection() {
    let conn = setup().await;
    let conn: Box<dyn Connection> = Box::new(conn);
    conn.close().await.unwrap();
}

#[tokio::test]
async fn test_statement_rolling_back_transaction_returns_full_result() {
    let mut conn = setup().await;
    let executor = BatchQueryExecutor::new(
        ExecutorOptions::new().with_transaction(TransactionMode::Batch),
    );
    let request = BatchRequest::from_statements([
        "INSERT INTO t VALUES (1, 'one')",
        "INSERT OR ROLLBACK INTO t VALUES (1, 'duplicate')",
        "INSERT INTO t VALUES (2, 'two')",
    ]);

    let result = executor
        .execute(&mut conn, &request, BatchPolicy::BestEffort)
        .await
        .unwrap();

    assert_eq!(result.len(), 3);
    assert!(result.outcomes[0].is_success());
    assert_eq!(result.outcomes[1].error().unwrap().kind, QueryErrorKind::Constraint);
    assert_eq!(
        result.outcomes[2],
        Outcome::skipped(SkipReason::TransactionAborted)
    );
    assert!(result.rolled_back);
    assert_eq!(count_rows(&mut conn).await, 0);
}

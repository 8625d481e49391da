//! Sequential batch execution on a single connection.
//!
//! The executor borrows the connection for the duration of one batch and
//! never opens, closes, reorders or parallelizes anything on it. Statement
//! failures are captured per outcome; only session-level failures and
//! invalid requests are returned as errors.

use std::str::FromStr;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{BatchPolicy, BatchRequest, BatchResult, Outcome, Query, QueryError, SkipReason};
use crate::db::{Connection, DriverError};
use crate::error::{BatchError, Result};

/// Whether the batch runs inside one transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionMode {
    /// Each statement commits on its own (driver auto-commit).
    #[default]
    None,
    /// BEGIN before the first statement, COMMIT after the last.
    Batch,
}

impl FromStr for TransactionMode {
    type Err = BatchError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "none" | "off" | "autocommit" => Ok(Self::None),
            "batch" | "on" => Ok(Self::Batch),
            _ => Err(BatchError::config(format!(
                "Invalid transaction mode '{s}'. Expected 'none' or 'batch'"
            ))),
        }
    }
}

/// Knobs for [`BatchQueryExecutor`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutorOptions {
    pub transaction: TransactionMode,
    /// Limit for a single statement. Exceeding it aborts the batch.
    pub statement_timeout: Option<Duration>,
    /// Budget for the whole batch, checked between statements.
    pub deadline: Option<Duration>,
}

impl ExecutorOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_transaction(mut self, transaction: TransactionMode) -> Self {
        self.transaction = transaction;
        self
    }

    pub fn with_statement_timeout(mut self, timeout: Duration) -> Self {
        self.statement_timeout = Some(timeout);
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// One independent unit of work for [`BatchQueryExecutor::execute_all`].
pub struct BatchJob<'a> {
    pub connection: &'a mut dyn Connection,
    pub request: &'a BatchRequest,
    pub policy: BatchPolicy,
}

/// What one statement left behind.
struct Step {
    outcome: Outcome,
    /// The batch transaction no longer exists.
    transaction_lost: bool,
}

impl Step {
    fn done(outcome: Outcome) -> Self {
        Self {
            outcome,
            transaction_lost: false,
        }
    }

    fn lost(outcome: Outcome) -> Self {
        Self {
            outcome,
            transaction_lost: true,
        }
    }
}

/// Reason a batch stopped early with an error.
enum Abort {
    Failed(BatchError),
    /// The statement future was dropped mid-flight; the session state is unknown.
    TimedOut(BatchError),
}

/// Runs batches of queries. Holds only configuration, so one executor can
/// serve any number of concurrent batches on different connections.
#[derive(Debug, Clone, Default)]
pub struct BatchQueryExecutor {
    options: ExecutorOptions,
}

impl BatchQueryExecutor {
    pub fn new(options: ExecutorOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &ExecutorOptions {
        &self.options
    }

    /// Runs `request` on `conn` under `policy`.
    ///
    /// The returned result has one outcome per query, in request order.
    /// Empty requests, blank queries and closed connections are rejected with
    /// `BatchError::Config` before the connection is touched. A session-level
    /// failure aborts the batch with `BatchError::Connection`.
    pub async fn execute(
        &self,
        conn: &mut dyn Connection,
        request: &BatchRequest,
        policy: BatchPolicy,
    ) -> Result<BatchResult> {
        self.execute_cancellable(conn, request, policy, &CancellationToken::new())
            .await
    }

    /// Like [`execute`](Self::execute), but stops starting new statements once
    /// `cancel` fires. Queries not started are reported as cancelled.
    pub async fn execute_cancellable(
        &self,
        conn: &mut dyn Connection,
        request: &BatchRequest,
        policy: BatchPolicy,
        cancel: &CancellationToken,
    ) -> Result<BatchResult> {
        request.validate()?;
        if conn.is_closed() {
            return Err(BatchError::config("connection is closed"));
        }

        let start = Instant::now();
        let deadline = self.options.deadline.map(|budget| start + budget);
        let transactional = self.options.transaction == TransactionMode::Batch;

        info!(
            queries = request.len(),
            policy = %policy,
            transactional,
            "Executing batch"
        );

        if transactional {
            conn.begin()
                .await
                .map_err(|e| control_error("BEGIN", e))?;
        }

        let mut outcomes = Vec::with_capacity(request.len());
        let mut stop: Option<SkipReason> = None;
        let mut rolled_back = false;

        for (index, query) in request.queries().iter().enumerate() {
            if stop.is_none() {
                if cancel.is_cancelled() {
                    warn!("Batch cancelled before query #{}", index);
                    stop = Some(SkipReason::Cancelled);
                } else if deadline.is_some_and(|d| Instant::now() >= d) {
                    warn!("Batch deadline exceeded before query #{}", index);
                    stop = Some(SkipReason::DeadlineExceeded);
                }
            }

            if let Some(reason) = stop {
                outcomes.push(Outcome::skipped(reason));
                continue;
            }

            let savepoint = (transactional && policy == BatchPolicy::BestEffort)
                .then(|| format!("querybatch_{index}"));

            let step = match self
                .run_statement(conn, index, query, savepoint.as_deref())
                .await
            {
                Ok(step) => step,
                Err(abort) => return Err(self.abort(conn, transactional, abort).await),
            };

            if step.transaction_lost {
                warn!("Batch transaction ended by query #{}", index);
                stop = Some(SkipReason::TransactionAborted);
            } else if step.outcome.is_failed() && policy == BatchPolicy::FailFast {
                stop = Some(SkipReason::PriorFailure);
                if transactional {
                    warn!("Rolling back batch after failure of query #{}", index);
                    rolled_back = end_transaction(conn, false).await?;
                }
            }

            outcomes.push(step.outcome);
        }

        if transactional && !rolled_back {
            let commit = stop.is_none();
            if !commit {
                warn!("Rolling back unfinished batch");
            }
            rolled_back = end_transaction(conn, commit).await?;
        }

        let result = BatchResult {
            outcomes,
            policy,
            transactional,
            rolled_back,
            total_time: start.elapsed(),
        };

        info!(
            succeeded = result.success_count(),
            failed = result.failure_count(),
            skipped = result.skipped_count(),
            elapsed_ms = result.total_time.as_millis() as u64,
            "Batch finished"
        );

        Ok(result)
    }

    /// Runs several independent batches concurrently, each on its own
    /// connection. Results are returned in job order.
    pub async fn execute_all(&self, jobs: Vec<BatchJob<'_>>) -> Vec<Result<BatchResult>> {
        futures::future::join_all(
            jobs.into_iter()
                .map(|job| self.execute(job.connection, job.request, job.policy)),
        )
        .await
    }

    /// Runs one statement, optionally fenced by a savepoint so that its
    /// failure does not poison the surrounding transaction.
    async fn run_statement(
        &self,
        conn: &mut dyn Connection,
        index: usize,
        query: &Query,
        savepoint: Option<&str>,
    ) -> std::result::Result<Step, Abort> {
        if let Some(name) = savepoint {
            if let Err(e) = conn.savepoint(name).await {
                savepoint_failure("SAVEPOINT", e)?;
                return Ok(Step::lost(Outcome::skipped(SkipReason::TransactionAborted)));
            }
        }

        debug!("Query #{}: {}", index, query.text());

        let run = conn.run(query);
        let result = match self.options.statement_timeout {
            Some(limit) => match tokio::time::timeout(limit, run).await {
                Ok(result) => result,
                Err(_) => {
                    return Err(Abort::TimedOut(BatchError::connection(format!(
                        "query #{index} timed out after {limit:?}"
                    ))))
                }
            },
            None => run.await,
        };

        let outcome = match result {
            Ok(rows) => Outcome::Success(rows),
            Err(e) if e.is_connection_level() => {
                return Err(Abort::Failed(BatchError::connection(format!(
                    "query #{index} lost the connection: {e}"
                ))))
            }
            Err(e) => {
                warn!("Query #{} failed: {}", index, e);
                Outcome::Failed(QueryError {
                    index,
                    kind: e.kind,
                    message: e.message,
                    code: e.code,
                })
            }
        };

        let Some(name) = savepoint else {
            return Ok(Step::done(outcome));
        };

        // A statement may end the transaction itself (COMMIT, ROLLBACK,
        // SQLite's ON CONFLICT ROLLBACK), which takes the savepoint with it.
        let released = if outcome.is_failed() {
            conn.rollback_to_savepoint(name)
                .await
                .map_err(|e| ("ROLLBACK TO SAVEPOINT", e))
        } else {
            conn.release_savepoint(name)
                .await
                .map_err(|e| ("RELEASE SAVEPOINT", e))
        };

        match released {
            Ok(()) => Ok(Step::done(outcome)),
            Err((statement, e)) => {
                savepoint_failure(statement, e)?;
                Ok(Step::lost(outcome))
            }
        }
    }

    /// Tears down an open transaction after a batch-level failure.
    async fn abort(&self, conn: &mut dyn Connection, transactional: bool, abort: Abort) -> BatchError {
        let error = match abort {
            Abort::TimedOut(error) => {
                warn!("{}; the connection should be discarded", error);
                return error;
            }
            Abort::Failed(error) => error,
        };

        warn!("Aborting batch: {}", error);
        if transactional && !conn.is_closed() {
            if let Err(e) = conn.rollback().await {
                warn!("Rollback after abort failed: {}", e);
            }
        }
        error
    }
}

/// Commits or rolls back the batch transaction and returns whether it ended
/// rolled back.
///
/// A statement-level failure here means the transaction was already gone or
/// could not commit; either way nothing of it is kept. Only a lost session
/// is an error.
async fn end_transaction(conn: &mut dyn Connection, commit: bool) -> Result<bool> {
    if commit {
        match conn.commit().await {
            Ok(()) => return Ok(false),
            Err(e) if e.is_connection_level() => return Err(control_error("COMMIT", e)),
            Err(e) => warn!("COMMIT failed, rolling back: {}", e),
        }
    }

    match conn.rollback().await {
        Ok(()) => {}
        Err(e) if e.is_connection_level() => return Err(control_error("ROLLBACK", e)),
        Err(e) => warn!("ROLLBACK failed, no transaction left: {}", e),
    }
    Ok(true)
}

/// Only a lost session makes a savepoint failure fatal; otherwise the batch
/// transaction has ended and the batch carries on without it.
fn savepoint_failure(statement: &str, error: DriverError) -> std::result::Result<(), Abort> {
    if error.is_connection_level() {
        return Err(Abort::Failed(control_error(statement, error)));
    }
    warn!("{} failed: {}", statement, error);
    Ok(())
}

/// Transaction control failures have no slot in the outcome list. A
/// statement-level failure of BEGIN means the handle was not in a state to
/// start a batch transaction.
fn control_error(statement: &str, error: DriverError) -> BatchError {
    if error.is_connection_level() {
        BatchError::connection(format!("{statement} failed: {error}"))
    } else {
        BatchError::config(format!("{statement} failed: {error}"))
    }
}

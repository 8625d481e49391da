//! Batch data model and execution.
//!
//! A [`BatchRequest`] is an ordered list of [`Query`] values. Running it
//! produces a [`BatchResult`] with exactly one [`Outcome`] per query, in the
//! same order.

pub mod executor;
pub mod split;

pub use executor::{BatchJob, BatchQueryExecutor, ExecutorOptions, TransactionMode};
pub use split::split_statements;

use crate::db::{RowSet, Value};
use crate::error::{BatchError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// A parameter bound to a query.
///
/// Parameters are bound positionally in declaration order. The name, when
/// present, is only used in diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Param {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub value: Value,
}

impl Param {
    pub fn positional(value: impl Into<Value>) -> Self {
        Self {
            name: None,
            value: value.into(),
        }
    }

    pub fn named(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            name: Some(name.into()),
            value: value.into(),
        }
    }
}

/// A single statement with its parameters. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    text: String,
    #[serde(default)]
    params: Vec<Param>,
}

impl Query {
    /// Creates a query with no parameters.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            params: Vec::new(),
        }
    }

    /// Appends a positional parameter.
    pub fn bind(mut self, value: impl Into<Value>) -> Self {
        self.params.push(Param::positional(value));
        self
    }

    /// Appends a named parameter.
    pub fn bind_named(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.push(Param::named(name, value));
        self
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn params(&self) -> &[Param] {
        &self.params
    }
}

impl From<&str> for Query {
    fn from(text: &str) -> Self {
        Self::new(text)
    }
}

impl From<String> for Query {
    fn from(text: String) -> Self {
        Self::new(text)
    }
}

/// An ordered sequence of queries submitted together.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchRequest {
    queries: Vec<Query>,
}

impl BatchRequest {
    pub fn new(queries: Vec<Query>) -> Self {
        Self { queries }
    }

    /// Builds a request from plain statement texts.
    pub fn from_statements<I, S>(statements: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            queries: statements.into_iter().map(Query::new).collect(),
        }
    }

    pub fn queries(&self) -> &[Query] {
        &self.queries
    }

    pub fn len(&self) -> usize {
        self.queries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }

    /// Checks the request before any driver call is made.
    pub fn validate(&self) -> Result<()> {
        if self.queries.is_empty() {
            return Err(BatchError::config("batch request contains no queries"));
        }
        if let Some(index) = self.queries.iter().position(|q| q.text().trim().is_empty()) {
            return Err(BatchError::config(format!("query #{index} is empty")));
        }
        Ok(())
    }
}

impl FromIterator<Query> for BatchRequest {
    fn from_iter<T: IntoIterator<Item = Query>>(iter: T) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

/// What to do with the rest of the batch after a query fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BatchPolicy {
    /// Stop at the first failure and skip the remaining queries.
    #[default]
    FailFast,
    /// Run every query regardless of earlier failures.
    BestEffort,
}

impl BatchPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FailFast => "fail-fast",
            Self::BestEffort => "best-effort",
        }
    }
}

impl FromStr for BatchPolicy {
    type Err = BatchError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "fail-fast" | "failfast" | "fail_fast" => Ok(Self::FailFast),
            "best-effort" | "besteffort" | "best_effort" => Ok(Self::BestEffort),
            _ => Err(BatchError::config(format!(
                "Invalid batch policy '{s}'. Expected 'fail-fast' or 'best-effort'"
            ))),
        }
    }
}

impl fmt::Display for BatchPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Category of a failed statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryErrorKind {
    Syntax,
    /// Missing table, column, function, etc.
    UndefinedObject,
    Constraint,
    TypeMismatch,
    Other,
}

impl QueryErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Syntax => "syntax",
            Self::UndefinedObject => "undefined object",
            Self::Constraint => "constraint violation",
            Self::TypeMismatch => "type mismatch",
            Self::Other => "error",
        }
    }
}

/// A failure of one statement, captured in the batch result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryError {
    /// Position of the offending query in the batch.
    pub index: usize,
    pub kind: QueryErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "query #{} ({}): ", self.index, self.kind.as_str())?;
        if let Some(code) = &self.code {
            write!(f, "[{code}] ")?;
        }
        f.write_str(&self.message)
    }
}

/// Why a query was not run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// An earlier query failed under the fail-fast policy.
    PriorFailure,
    /// The batch deadline passed before this query started.
    DeadlineExceeded,
    /// The caller cancelled the batch.
    Cancelled,
    /// An earlier statement ended the batch transaction on its own.
    TransactionAborted,
}

/// The outcome of one query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Success(RowSet),
    Failed(QueryError),
    Skipped { reason: SkipReason },
}

impl Outcome {
    pub fn skipped(reason: SkipReason) -> Self {
        Self::Skipped { reason }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped { .. })
    }

    pub fn rows(&self) -> Option<&RowSet> {
        match self {
            Self::Success(rows) => Some(rows),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&QueryError> {
        match self {
            Self::Failed(error) => Some(error),
            _ => None,
        }
    }
}

/// Per-query outcomes of a batch, in request order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchResult {
    pub outcomes: Vec<Outcome>,
    pub policy: BatchPolicy,
    /// Whether the batch ran inside a single transaction.
    pub transactional: bool,
    /// Whether that transaction was rolled back.
    pub rolled_back: bool,
    #[serde(with = "millis")]
    pub total_time: Duration,
}

impl BatchResult {
    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn success_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }

    pub fn failure_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_failed()).count()
    }

    pub fn skipped_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_skipped()).count()
    }

    pub fn all_succeeded(&self) -> bool {
        self.outcomes.iter().all(Outcome::is_success)
    }

    /// Per-query success flags, the shape the host node exposes as an output pin.
    pub fn success_flags(&self) -> Vec<bool> {
        self.outcomes.iter().map(Outcome::is_success).collect()
    }

    pub fn errors(&self) -> impl Iterator<Item = &QueryError> {
        self.outcomes.iter().filter_map(Outcome::error)
    }

    pub fn total_rows_affected(&self) -> u64 {
        self.outcomes
            .iter()
            .filter_map(Outcome::rows)
            .map(|r| r.rows_affected)
            .sum()
    }

    /// Converts a partially failed batch into a `BatchError::Query`.
    pub fn into_result(self) -> Result<Self> {
        if self.all_succeeded() {
            return Ok(self);
        }
        let first = self
            .errors()
            .next()
            .map(|e| format!(": first failure at {e}"))
            .unwrap_or_default();
        Err(BatchError::query(format!(
            "{} failed, {} skipped of {} queries{}",
            self.failure_count(),
            self.skipped_count(),
            self.len(),
            first
        )))
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        (d.as_millis() as u64).serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

//! querybatch - executes a batch of SQL queries on a single connection.
//!
//! The core is [`batch::BatchQueryExecutor`]; [`db`] provides the connection
//! drivers it runs against and [`node`] wraps it for a visual-programming
//! host.

pub mod batch;
pub mod config;
pub mod db;
pub mod error;
pub mod node;
pub mod output;
pub mod plugin;

pub use batch::{
    BatchPolicy, BatchQueryExecutor, BatchRequest, BatchResult, ExecutorOptions, Outcome, Query,
    QueryError, QueryErrorKind, SkipReason, TransactionMode,
};
pub use error::{BatchError, Result};

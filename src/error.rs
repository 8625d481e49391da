//! Error types for querybatch.
//!
//! Batch-level errors are raised to the caller. Failures of individual
//! statements are not errors at this level; they are recorded in the
//! [`BatchResult`](crate::batch::BatchResult) instead.

use thiserror::Error;

/// Main error type for querybatch operations.
#[derive(Error, Debug)]
pub enum BatchError {
    /// The connection is unusable (closed, network or driver failure, timeout).
    #[error("Connection error: {0}")]
    Connection(String),

    /// A single query failed outside of a batch context.
    #[error("Query error: {0}")]
    Query(String),

    /// The request was rejected before execution (empty batch, bad policy, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal errors (I/O on output, serialization, unexpected states).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl BatchError {
    /// Creates a connection error with the given message.
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Creates a query error with the given message.
    pub fn query(msg: impl Into<String>) -> Self {
        Self::Query(msg.into())
    }

    /// Creates a configuration error with the given message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Creates an internal error with the given message.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Returns the error category as a string for display purposes.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Connection(_) => "Connection Error",
            Self::Query(_) => "Query Error",
            Self::Config(_) => "Configuration Error",
            Self::Internal(_) => "Internal Error",
        }
    }

    /// Process exit code used by the command-line tool.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Query(_) => 2,
            _ => 1,
        }
    }
}

/// Result type alias using BatchError.
pub type Result<T> = std::result::Result<T, BatchError>;

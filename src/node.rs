//! Host-facing node wrapper around the batch executor.
//!
//! The host evaluates the node once per graph tick, passing the current
//! values of its input pins. The batch only runs on ticks where the trigger
//! pin is set; other ticks return the outputs of the last run.

use tracing::debug;

use crate::batch::{BatchPolicy, BatchQueryExecutor, BatchRequest, Outcome, Query};
use crate::db::Connection;
use crate::error::BatchError;
use crate::plugin::{PluginInfo, QUERY_BATCH};

/// Input pins.
#[derive(Debug, Clone, Default)]
pub struct NodeInputs {
    pub queries: Vec<Query>,
    pub policy: BatchPolicy,
    pub trigger: bool,
}

/// Output pins.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeOutputs {
    pub outcomes: Vec<Outcome>,
    /// One flag per query.
    pub success: Vec<bool>,
    /// Batch-level error of the last run, if any.
    pub error: Option<String>,
}

/// The "QueryBatch" node.
#[derive(Debug, Default)]
pub struct QueryBatchNode {
    executor: BatchQueryExecutor,
    outputs: NodeOutputs,
}

impl QueryBatchNode {
    pub fn new(executor: BatchQueryExecutor) -> Self {
        Self {
            executor,
            outputs: NodeOutputs::default(),
        }
    }

    pub fn info() -> &'static PluginInfo {
        &QUERY_BATCH
    }

    pub fn outputs(&self) -> &NodeOutputs {
        &self.outputs
    }

    /// Evaluates one tick. `connection` is the value of the connection pin,
    /// `None` when nothing is plugged in.
    pub async fn evaluate(
        &mut self,
        connection: Option<&mut dyn Connection>,
        inputs: &NodeInputs,
    ) -> &NodeOutputs {
        if !inputs.trigger {
            return &self.outputs;
        }

        let request: BatchRequest = inputs.queries.iter().cloned().collect();
        debug!("{} triggered with {} queries", QUERY_BATCH.system_name(), request.len());

        let result = match connection {
            Some(conn) => self.executor.execute(conn, &request, inputs.policy).await,
            None => Err(BatchError::config("no connection")),
        };

        self.outputs = match result {
            Ok(result) => NodeOutputs {
                success: result.success_flags(),
                outcomes: result.outcomes,
                error: None,
            },
            Err(e) => NodeOutputs {
                outcomes: Vec::new(),
                success: vec![false; request.len()],
                error: Some(e.to_string()),
            },
        };

        &self.outputs
    }
}

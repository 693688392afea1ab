//! Per-run provenance recorded into `job_queue.execution_metadata`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The provenance document a worker writes when it finalizes a job.
///
/// Only the keys the fleet itself reads are typed. Everything else stays in
/// `extra` as opaque JSON; `execution_metadata` is never primary state.
/// The `node` and `assigned_at` keys are merged by the claim statement in
/// the database, not by this type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionMetadata {
    pub gpu: String,
    pub node_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ExecutionMetadata {
    pub fn new(gpu: &str, node_id: &str) -> Self {
        Self {
            gpu: gpu.to_owned(),
            node_id: node_id.to_owned(),
            runtime: None,
            error: None,
            extra: Map::new(),
        }
    }

    /// Total runtime in milliseconds.
    pub fn with_runtime(mut self, runtime_ms: i64) -> Self {
        self.runtime = Some(runtime_ms);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

use thiserror::Error;

use render_common::broker::BrokerError;
use render_common::harness::Transient;
use render_common::job::JobError;
use render_common::jobqueue::JobQueueError;

use crate::generator::GeneratorError;
use crate::moderate::ModerationError;
use crate::plugins::PluginCacheError;
use crate::storage::StorageError;

/// Enumeration of errors that end a worker role's main loop. Connection
/// losses are retried by the harness; everything else exits the process.
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("broker error: {0}")]
    Broker(#[from] BrokerError),
    #[error("database error: {0}")]
    Database(#[from] JobQueueError),
    #[error("plugin cache error: {0}")]
    PluginCache(#[from] PluginCacheError),
    #[error("broker delivery stream ended")]
    DeliveryStreamEnded,
}

impl Transient for WorkerError {
    fn is_connection_loss(&self) -> bool {
        match self {
            WorkerError::Broker(error) => error.is_connection_loss(),
            WorkerError::Database(error) => error.is_connection_loss(),
            WorkerError::PluginCache(PluginCacheError::Database(error)) => {
                error.is_connection_loss()
            }
            WorkerError::PluginCache(_) => false,
            WorkerError::DeliveryStreamEnded => true,
        }
    }
}

/// Enumeration of per-message failures. These fail one job and are
/// recorded in its `execution_metadata`; they never crash the worker.
#[derive(Error, Debug)]
pub enum ConsumeError {
    #[error(transparent)]
    Invalid(#[from] JobError),
    #[error(transparent)]
    Moderation(#[from] ModerationError),
    #[error("image generation failed: {0}")]
    Generation(#[from] GeneratorError),
    #[error("plugin weights not cached: {0}")]
    MissingPlugin(String),
    #[error("expected {expected} generated images, got {actual}")]
    ExecutionCountMismatch { expected: usize, actual: usize },
    #[error("image upload failed: {0}")]
    Storage(#[from] StorageError),
    #[error("database update failed: {0}")]
    Database(#[from] JobQueueError),
}

//! # Consumer
//!
//! Drains the broker queue: decodes each message, dispatches it to the
//! generator, persists the artifacts, and settles the delivery with
//! exactly one ack or one nack.

use std::sync::Arc;
use std::time::Instant;

use futures::StreamExt;

use render_common::broker::{Acknowledger, Broker, BrokerError};
use render_common::job::{Job, JobStatus};
use render_common::jobqueue::{ImageRecord, JobRepository};
use render_common::metadata::ExecutionMetadata;
use render_common::metrics as fleet_metrics;

use crate::error::{ConsumeError, WorkerError};
use crate::generate;
use crate::generator::Generator;
use crate::moderate::Moderator;
use crate::plugins::PluginCache;
use crate::storage::{BlobStore, IMAGES_BUCKET};

/// Everything a consumer needs besides the broker subscription itself.
pub struct ConsumerContext {
    pub repo: Arc<dyn JobRepository>,
    pub store: Arc<dyn BlobStore>,
    pub moderator: Arc<dyn Moderator>,
    pub generator: Arc<dyn Generator>,
    pub plugins: Arc<PluginCache>,
    pub node_id: String,
    pub node_gpu: String,
}

pub struct JobConsumer {
    broker: Broker,
    context: ConsumerContext,
}

impl JobConsumer {
    pub fn new(broker: Broker, context: ConsumerContext) -> Self {
        Self { broker, context }
    }

    /// Consume until the subscription drops. The drop is surfaced as a
    /// transient error so the harness rebuilds the connection; messages
    /// in flight at that point are returned to the queue by the broker.
    pub async fn run(&self) -> Result<(), WorkerError> {
        let mut deliveries = self.broker.consume(&self.context.node_id).await?;

        while let Some(delivery) = deliveries.next().await {
            let delivery = delivery.map_err(|error| BrokerError::ProtocolError {
                command: "basic.consume".to_owned(),
                error,
            })?;
            handle_message(&self.context, &delivery.data, &delivery.acker).await?;
        }

        Err(WorkerError::DeliveryStreamEnded)
    }
}

/// Process one message body and settle it.
///
/// Failures are attributed to the job row and never crash the worker; the
/// only errors returned from here are broken acknowledgements on the
/// success path, which mean the channel itself is gone.
pub(crate) async fn handle_message(
    context: &ConsumerContext,
    body: &[u8],
    acker: &dyn Acknowledger,
) -> Result<(), WorkerError> {
    let started = Instant::now();

    match process_message(context, body).await {
        Ok(job_id) => {
            acker.ack().await?;
            metrics::counter!(fleet_metrics::JOBS_PROCESSED, "outcome" => "succeeded").increment(1);
            tracing::info!(%job_id, "message acknowledged");
            Ok(())
        }
        Err(error) => {
            tracing::error!(%error, "failed to process message");
            if let Err(nack_error) = acker.nack_discard().await {
                tracing::error!(%nack_error, "failed to nack message");
            }
            record_failure(context, body, started, &error).await;
            metrics::counter!(fleet_metrics::JOBS_PROCESSED, "outcome" => "failed").increment(1);
            Ok(())
        }
    }
}

/// Stages 1-3 of the message lifecycle. Returns the job id on success.
async fn process_message(
    context: &ConsumerContext,
    body: &[u8],
) -> Result<String, ConsumeError> {
    let job = Job::from_wire(body)?;
    tracing::info!(job_id = %job.id, job_type = %job.job_type, "processing job");

    // [1/3] Generate.
    let executions = generate::dispatch(context, &job).await?;
    let expected = job.request_data.num_options as usize;
    if executions.len() != expected {
        return Err(ConsumeError::ExecutionCountMismatch {
            expected,
            actual: executions.len(),
        });
    }

    // [2/3] Persist artifacts. Blobs uploaded before a later failure are
    // orphaned; the job row is what matters.
    let mut records = Vec::with_capacity(executions.len());
    for execution in &executions {
        let filename = context
            .store
            .upload(IMAGES_BUCKET, execution.image.clone())
            .await?;
        records.push(ImageRecord {
            filename,
            seed: execution.seed,
            runtime: execution.runtime,
        });
    }
    context.repo.insert_images(&job.id, &records).await?;

    // [3/3] Finalize.
    let total_runtime: i64 = executions.iter().map(|execution| execution.runtime).sum();
    let metadata = ExecutionMetadata::new(&context.node_gpu, &context.node_id)
        .with_runtime(total_runtime);
    context
        .repo
        .mark_terminal(&job.id, JobStatus::Succeeded, &metadata)
        .await?;

    tracing::info!(job_id = %job.id, total_runtime, "job succeeded");
    Ok(job.id)
}

/// Attribute a processing failure to its job row. Best effort: the body
/// may not even be valid JSON, and the database may be the thing that is
/// broken.
async fn record_failure(
    context: &ConsumerContext,
    body: &[u8],
    started: Instant,
    error: &ConsumeError,
) {
    let job_id = serde_json::from_slice::<serde_json::Value>(body)
        .ok()
        .and_then(|value| value.get("id").and_then(|id| id.as_str().map(str::to_owned)));
    let Some(job_id) = job_id else {
        tracing::error!("cannot attribute failure to a job: message body has no id");
        return;
    };

    // Wall-clock including upload time; rough, but useful for debugging.
    let runtime = started.elapsed().as_millis() as i64;
    let metadata = ExecutionMetadata::new(&context.node_gpu, &context.node_id)
        .with_runtime(runtime)
        .with_error(error.to_string());

    if let Err(db_error) = context
        .repo
        .mark_terminal(&job_id, JobStatus::Failed, &metadata)
        .await
    {
        tracing::error!(%job_id, %db_error, "failed to record job failure");
    }
}

//! # Filler
//!
//! Bridges the relational job queue into the broker: claims the oldest
//! queued jobs, reaps expired ones, and publishes the rest while the
//! broker queue stays below the configured ceiling.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use render_common::broker::JobTransport;
use render_common::job::{Job, JobStatus};
use render_common::jobqueue::JobRepository;
use render_common::metadata::ExecutionMetadata;
use render_common::metrics as fleet_metrics;

use crate::error::WorkerError;

/// Tuning knobs for the fill loop.
#[derive(Clone)]
pub struct FillerSettings {
    pub node_id: String,
    pub node_gpu: String,
    /// Broker depth the filler tops the queue up to. Strict, except for
    /// the one message published before depth is re-read.
    pub depth_ceiling: u32,
    /// Queued jobs older than this are reaped instead of published.
    pub discard_threshold_minutes: i64,
    pub poll_interval: Duration,
    /// Pause after each publish so a broker catching up is not hammered.
    pub publish_pause: Duration,
}

pub struct Filler {
    repo: Arc<dyn JobRepository>,
    transport: Arc<dyn JobTransport>,
    settings: FillerSettings,
}

impl Filler {
    pub fn new(
        repo: Arc<dyn JobRepository>,
        transport: Arc<dyn JobTransport>,
        settings: FillerSettings,
    ) -> Self {
        Self {
            repo,
            transport,
            settings,
        }
    }

    /// Run fill cycles until an error surfaces to the harness.
    pub async fn run(&self) -> Result<(), WorkerError> {
        tracing::info!(
            threshold_minutes = self.settings.discard_threshold_minutes,
            "stopping queued jobs older than threshold"
        );

        let mut interval = tokio::time::interval(self.settings.poll_interval);
        loop {
            interval.tick().await;
            self.fill_cycle().await?;
        }
    }

    /// One pass: top the broker queue up to the ceiling.
    pub async fn fill_cycle(&self) -> Result<(), WorkerError> {
        let mut depth = self.transport.depth().await?;
        metrics::gauge!(fleet_metrics::BROKER_DEPTH).set(f64::from(depth));

        while depth < self.settings.depth_ceiling {
            let Some(job) = self.repo.claim_next_queued(&self.settings.node_id).await? else {
                break;
            };
            metrics::counter!(fleet_metrics::JOBS_CLAIMED).increment(1);

            if self.is_expired(&job) {
                self.reap(&job).await?;
            } else if let Err(error) = self.transport.publish(&job).await {
                // Without a broker message, an `assigned` row would never
                // reach a consumer; put it back before surfacing the error.
                tracing::error!(job_id = %job.id, %error, "publish failed after claim, requeueing job");
                self.repo
                    .requeue(&job.id, &format!("publish failed: {error}"))
                    .await?;
                return Err(error.into());
            } else {
                metrics::counter!(fleet_metrics::JOBS_PUBLISHED).increment(1);
            }

            depth = self.transport.depth().await?;
            metrics::gauge!(fleet_metrics::BROKER_DEPTH).set(f64::from(depth));
            tokio::time::sleep(self.settings.publish_pause).await;
        }

        Ok(())
    }

    fn is_expired(&self, job: &Job) -> bool {
        job.age(Utc::now()) > chrono::Duration::minutes(self.settings.discard_threshold_minutes)
    }

    async fn reap(&self, job: &Job) -> Result<(), WorkerError> {
        tracing::info!(job_id = %job.id, "job expired in queue, stopping it");
        let metadata = ExecutionMetadata::new(&self.settings.node_gpu, &self.settings.node_id)
            .with_error("expired");
        self.repo
            .mark_terminal(&job.id, JobStatus::Stopped, &metadata)
            .await?;
        metrics::counter!(fleet_metrics::JOBS_REAPED).increment(1);
        Ok(())
    }
}

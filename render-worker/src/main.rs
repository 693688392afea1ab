//! Worker entry point. One process runs either the filler role (database
//! to broker bridge) or the consumer role (broker to generator to
//! database/storage), selected by `MODE`.

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use envconfig::Envconfig;
use tracing_subscriber::EnvFilter;

use render_common::broker::Broker;
use render_common::harness::Harness;
use render_common::jobqueue::{JobRepository, PgJobQueue};
use render_common::metrics::{serve, setup_metrics_recorder, setup_metrics_router};

use config::{Config, WorkerRole};
use consumer::{ConsumerContext, JobConsumer};
use error::WorkerError;
use filler::{Filler, FillerSettings};
use generator::HttpGenerator;
use moderate::OpenAiModerator;
use plugins::{PluginCache, PLUGIN_CACHE_DIR};
use storage::{BlobStore, SupabaseStorage};

mod config;
mod consumer;
mod error;
mod filler;
mod generate;
mod generator;
mod moderate;
mod plugins;
mod storage;
#[cfg(test)]
mod test_utils;

#[tokio::main]
async fn main() {
    let config = Config::init_from_env().expect("failed to load configuration from env");

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&config.logging_level))
        .init();

    let role = WorkerRole::from_str(&config.mode)
        .unwrap_or_else(|error| panic!("invalid worker mode: {error}"));

    let recorder_handle = setup_metrics_recorder();
    let bind = config.bind();
    tokio::task::spawn(async move {
        serve(setup_metrics_router(recorder_handle), &bind)
            .await
            .expect("failed to start serving metrics");
    });

    let harness = Harness::default();
    let result = match role {
        WorkerRole::Filler => run_filler(&harness, &config).await,
        WorkerRole::Consumer => run_consumer(&harness, &config).await,
    };

    if let Err(error) = result {
        tracing::error!(%error, "worker exited with error");
        std::process::exit(1);
    }
}

async fn run_filler(harness: &Harness, config: &Config) -> Result<(), WorkerError> {
    let settings = FillerSettings {
        node_id: config.node_id.clone(),
        node_gpu: config.node_gpu.clone(),
        depth_ceiling: config.rabbitmq_queue_size,
        discard_threshold_minutes: config.job_discard_threshold,
        poll_interval: Duration::from_secs(config.filler_poll_interval_secs),
        publish_pause: Duration::from_secs(config.filler_publish_pause_secs),
    };

    harness
        .supervise("filler", || {
            let config = config.clone();
            let settings = settings.clone();
            async move {
                let repo = PgJobQueue::connect(&config.database_url()).await?;
                let broker = Broker::connect(&config.amqp_url(), &config.rabbitmq_queue).await?;
                Filler::new(Arc::new(repo), Arc::new(broker), settings)
                    .run()
                    .await
            }
        })
        .await
}

async fn run_consumer(harness: &Harness, config: &Config) -> Result<(), WorkerError> {
    harness
        .supervise("consumer", || {
            let config = config.clone();
            async move {
                let repo: Arc<dyn JobRepository> =
                    Arc::new(PgJobQueue::connect(&config.database_url()).await?);
                let store: Arc<dyn BlobStore> = Arc::new(SupabaseStorage::new(
                    &config.supabase_url,
                    &config.supabase_key,
                ));

                let plugin_cache =
                    PluginCache::warm(Path::new(PLUGIN_CACHE_DIR), repo.as_ref(), store.as_ref())
                        .await?;
                if plugin_cache.is_empty() {
                    tracing::warn!("no plugin weights cached; jobs using plugins will fail");
                } else {
                    tracing::info!(plugins = plugin_cache.len(), "plugin weight cache ready");
                }

                let broker = Broker::connect(&config.amqp_url(), &config.rabbitmq_queue).await?;
                let context = ConsumerContext {
                    repo,
                    store,
                    moderator: Arc::new(OpenAiModerator::new(&config.openai_key)),
                    generator: Arc::new(HttpGenerator::new(&config.generator_url)),
                    plugins: Arc::new(plugin_cache),
                    node_id: config.node_id.clone(),
                    node_gpu: config.node_gpu.clone(),
                };
                JobConsumer::new(broker, context).run().await
            }
        })
        .await
}

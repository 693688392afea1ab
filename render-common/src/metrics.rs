use axum::{routing::get, Router};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

// Metric names shared by both worker roles.
pub const JOBS_CLAIMED: &str = "render_jobs_claimed_total";
pub const JOBS_REAPED: &str = "render_jobs_reaped_total";
pub const JOBS_PUBLISHED: &str = "render_jobs_published_total";
pub const JOBS_PROCESSED: &str = "render_jobs_processed_total";
pub const BROKER_DEPTH: &str = "render_broker_queue_depth";

/// Bind a `TcpListener` on the provided bind address to serve a `Router` on it.
pub async fn serve(router: Router, bind: &str) -> Result<(), std::io::Error> {
    let listener = tokio::net::TcpListener::bind(bind).await?;

    axum::serve(listener, router).await?;

    Ok(())
}

/// Build a Router exposing the Prometheus scrape endpoint, plus a trivial
/// index used as a liveness probe.
pub fn setup_metrics_router(recorder_handle: PrometheusHandle) -> Router {
    Router::new().route("/", get(index)).route(
        "/metrics",
        get(move || std::future::ready(recorder_handle.render())),
    )
}

pub fn setup_metrics_recorder() -> PrometheusHandle {
    const EXPONENTIAL_SECONDS: &[f64] = &[
        0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
    ];

    PrometheusBuilder::new()
        .set_buckets(EXPONENTIAL_SECONDS)
        .unwrap()
        .install_recorder()
        .unwrap()
}

async fn index() -> &'static str {
    "render worker"
}

//! Prometheus metrics helpers for the atlas build jobs.
//!
//! # Usage
//!
//! ```rust,ignore
//! use atlas_core::metrics::{init_metrics, start_metrics_server};
//!
//! #[tokio::main]
//! async fn main() {
//!     let handle = init_metrics();
//!     start_metrics_server(9091, handle).await.unwrap();
//!
//!     metrics::counter!("build_records_scanned_total", "artifact" => "transfer_edges_chord")
//!         .increment(1);
//! }
//! ```
//!
//! # Metric Naming Conventions
//!
//! - Prefix: component name (`build_`, `load_`)
//! - Suffix: unit or type (`_total`, `_seconds`)
//! - Labels: `artifact` or `collection` only, to keep cardinality small

use axum::{Router, routing::get};
use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;

/// Initialize the Prometheus metrics recorder.
///
/// Must be called once at startup before any metrics are recorded.
///
/// # Panics
///
/// Panics if a recorder is already installed.
pub fn init_metrics() -> PrometheusHandle {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus recorder");

    register_common_metrics();

    handle
}

/// Like [`init_metrics`] but returns `None` if a recorder is already installed.
pub fn try_init_metrics() -> Option<PrometheusHandle> {
    PrometheusBuilder::new().install_recorder().ok()
}

/// Start the Prometheus metrics HTTP server in the background.
///
/// Serves `/metrics` on the given port. The listener is bound before this
/// returns so a port conflict is reported to the caller.
pub async fn start_metrics_server(
    port: u16,
    handle: PrometheusHandle,
) -> Result<(), std::io::Error> {
    let app = Router::new().route(
        "/metrics",
        get(move || {
            let handle = handle.clone();
            async move { handle.render() }
        }),
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Metrics server listening on http://{}/metrics", addr);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("metrics server stopped: {}", e);
        }
    });

    Ok(())
}

/// Register descriptions for the metrics emitted by the build jobs.
fn register_common_metrics() {
    // =========================================================================
    // Build jobs
    // =========================================================================

    describe_counter!(
        "build_records_scanned_total",
        "Raw records read while building an artifact (label: artifact)"
    );
    describe_counter!(
        "build_records_skipped_total",
        "Raw records rejected by schema validation or filters (label: artifact)"
    );
    describe_counter!(
        "build_documents_written_total",
        "Documents written when replacing an artifact (label: artifact)"
    );
    describe_counter!(
        "build_runs_total",
        "Build runs by outcome (labels: artifact, outcome)"
    );
    describe_histogram!(
        "build_duration_seconds",
        "Wall time of a build run including the final replace (label: artifact)"
    );
    describe_gauge!(
        "build_running",
        "Whether a build job is currently running (1=yes, 0=no)"
    );

    // =========================================================================
    // Loader
    // =========================================================================

    describe_counter!(
        "load_records_total",
        "Records inserted into the record store (label: collection)"
    );
    describe_counter!(
        "load_records_invalid_total",
        "Input lines that could not be parsed (label: collection)"
    );
}

/// Increment a counter labelled with the artifact name.
#[inline]
pub fn increment_for(name: &'static str, artifact: &str, count: u64) {
    metrics::counter!(name, "artifact" => artifact.to_string()).increment(count);
}

/// Set a gauge value.
#[inline]
pub fn set_gauge(name: &'static str, value: f64) {
    metrics::gauge!(name).set(value);
}

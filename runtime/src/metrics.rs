//! Prometheus metrics for the consumption engine and HTTP server.
//!
//! Components record through the `metrics` facade using the names below.
//! Nothing is exported unless a recorder is installed; the service does that
//! with [`MetricsExporter::install`] and serves [`MetricsExporter::render`]
//! on `GET /metrics`.
//!
//! # Example
//!
//! ```rust,no_run
//! use user_service_runtime::metrics::MetricsExporter;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let exporter = MetricsExporter::install()?;
//! if let Some(body) = exporter.render() {
//!     println!("{body}");
//! }
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;
use thiserror::Error;

/// Messages read and broadcast by a consumption engine.
pub const CONSUMER_MESSAGES: &str = "consumer_messages_total";
/// Reads that returned an error (broadcast to subscribers as such).
pub const CONSUMER_READ_ERRORS: &str = "consumer_read_errors_total";
/// Subscriber invocations that returned an error or panicked.
pub const CONSUMER_SUBSCRIBER_FAILURES: &str = "consumer_subscriber_failures_total";
/// Time spent broadcasting one delivery to every subscriber.
pub const CONSUMER_BROADCAST_DURATION: &str = "consumer_broadcast_duration_seconds";
/// HTTP server listen attempts after the first one.
pub const SERVER_RESTARTS: &str = "server_restarts_total";
/// Bounded teardowns whose context ended before the operation.
///
/// Labelled with `reason`: `deadline_exceeded` or `cancelled`.
pub const TEARDOWN_ABANDONED: &str = "teardown_abandoned_total";

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Installed Prometheus recorder.
#[derive(Clone, Default)]
pub struct MetricsExporter {
    handle: Option<PrometheusHandle>,
}

impl MetricsExporter {
    /// Describe all metrics and install the global Prometheus recorder.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built or installed.
    ///
    /// # Note
    ///
    /// A recorder can only be installed once per process. If one already is
    /// (e.g., in tests), this logs a warning and returns an exporter whose
    /// [`render`](Self::render) yields `None`.
    pub fn install() -> Result<Self, MetricsError> {
        register_metrics();

        let builder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        match builder.install_recorder() {
            Ok(handle) => {
                tracing::info!("Metrics recorder installed");
                Ok(Self {
                    handle: Some(handle),
                })
            }
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already initialized") {
                    tracing::warn!(
                        "Metrics recorder already initialized, skipping re-initialization"
                    );
                    Ok(Self::default())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            }
        }
    }

    /// Render current metrics in Prometheus text format.
    ///
    /// Returns `None` if this exporter did not install the recorder.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

impl std::fmt::Debug for MetricsExporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsExporter")
            .field("installed", &self.handle.is_some())
            .finish()
    }
}

/// Record how long one broadcast took.
pub fn record_broadcast(duration: Duration) {
    metrics::histogram!(CONSUMER_BROADCAST_DURATION).record(duration.as_secs_f64());
}

fn register_metrics() {
    describe_counter!(CONSUMER_MESSAGES, "Total number of messages consumed");
    describe_counter!(
        CONSUMER_READ_ERRORS,
        "Total number of read errors delivered to subscribers"
    );
    describe_counter!(
        CONSUMER_SUBSCRIBER_FAILURES,
        "Total number of subscriber invocations that failed or panicked"
    );
    describe_histogram!(
        CONSUMER_BROADCAST_DURATION,
        "Time taken to deliver one message to every subscriber"
    );
    describe_counter!(
        SERVER_RESTARTS,
        "Total number of times the HTTP listener was restarted"
    );
    describe_counter!(
        TEARDOWN_ABANDONED,
        "Total number of teardowns abandoned because their context ended first"
    );
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn install_is_safe_to_repeat() {
        let first = MetricsExporter::install();
        let second = MetricsExporter::install();
        assert!(first.is_ok());
        assert!(second.unwrap().render().is_none());
    }

    #[test]
    fn render_includes_recorded_counters() {
        let exporter = MetricsExporter::install().unwrap();

        metrics::counter!(CONSUMER_MESSAGES).increment(3);
        record_broadcast(Duration::from_millis(2));

        // Another test in this binary may have installed the recorder first.
        if let Some(rendered) = exporter.render() {
            assert!(rendered.contains(CONSUMER_MESSAGES));
            assert!(rendered.contains(CONSUMER_BROADCAST_DURATION));
        }
    }
}

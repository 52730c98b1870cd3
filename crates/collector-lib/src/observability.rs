//! Observability infrastructure for the metrics collector
//!
//! Provides:
//! - Prometheus self metrics (scrape latency, targets, errors, cache and registry sizes)
//! - Structured JSON logging of lifecycle events with tracing

use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Histogram buckets for scrape and cycle latency (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<CollectorMetricsInner> = OnceLock::new();

struct CollectorMetricsInner {
    scrape_latency_seconds: Histogram,
    cycle_duration_seconds: Histogram,
    targets_discovered: IntGauge,
    scrape_errors: IntCounter,
    records_emitted: IntCounter,
    metadata_refreshes: IntCounterVec,
    cached_containers: IntGauge,
    registered_containers: IntGauge,
}

impl CollectorMetricsInner {
    fn new() -> Self {
        Self {
            scrape_latency_seconds: register_histogram!(
                "metrics_collector_scrape_latency_seconds",
                "Time spent fetching and parsing one scrape target",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register scrape_latency_seconds"),

            cycle_duration_seconds: register_histogram!(
                "metrics_collector_cycle_duration_seconds",
                "Time spent in one full collection cycle",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register cycle_duration_seconds"),

            targets_discovered: register_int_gauge!(
                "metrics_collector_targets_discovered",
                "Number of scrape targets resolved in the last cycle"
            )
            .expect("Failed to register targets_discovered"),

            scrape_errors: register_int_counter!(
                "metrics_collector_scrape_errors_total",
                "Total number of failed scrapes"
            )
            .expect("Failed to register scrape_errors"),

            records_emitted: register_int_counter!(
                "metrics_collector_records_emitted_total",
                "Total number of records handed to the accumulator"
            )
            .expect("Failed to register records_emitted"),

            metadata_refreshes: register_int_counter_vec!(
                "metrics_collector_metadata_refreshes_total",
                "Metadata cache refreshes by result",
                &["result"]
            )
            .expect("Failed to register metadata_refreshes"),

            cached_containers: register_int_gauge!(
                "metrics_collector_cached_containers",
                "Number of containers in the metadata cache"
            )
            .expect("Failed to register cached_containers"),

            registered_containers: register_int_gauge!(
                "metrics_collector_registered_containers",
                "Number of containers registered through the control API"
            )
            .expect("Failed to register registered_containers"),
        }
    }
}

/// Collector metrics for Prometheus exposition
///
/// Lightweight handle to the global metrics instance; clones share the
/// same underlying metrics.
#[derive(Clone)]
pub struct CollectorMetrics {
    _private: (),
}

impl Default for CollectorMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl CollectorMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(CollectorMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &CollectorMetricsInner {
        GLOBAL_METRICS.get_or_init(CollectorMetricsInner::new)
    }

    pub fn observe_scrape_latency(&self, duration_secs: f64) {
        self.inner().scrape_latency_seconds.observe(duration_secs);
    }

    pub fn observe_cycle_duration(&self, duration_secs: f64) {
        self.inner().cycle_duration_seconds.observe(duration_secs);
    }

    pub fn set_targets_discovered(&self, count: i64) {
        self.inner().targets_discovered.set(count);
    }

    pub fn inc_scrape_errors(&self) {
        self.inner().scrape_errors.inc();
    }

    pub fn add_records_emitted(&self, count: u64) {
        self.inner().records_emitted.inc_by(count);
    }

    pub fn inc_metadata_refreshes(&self, success: bool) {
        let result = if success { "success" } else { "failure" };
        self.inner()
            .metadata_refreshes
            .with_label_values(&[result])
            .inc();
    }

    pub fn set_cached_containers(&self, count: i64) {
        self.inner().cached_containers.set(count);
    }

    pub fn set_registered_containers(&self, count: i64) {
        self.inner().registered_containers.set(count);
    }
}

/// Structured logger for collector lifecycle events
#[derive(Clone)]
pub struct StructuredLogger {
    node_name: String,
}

impl StructuredLogger {
    pub fn new(node_name: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
        }
    }

    pub fn log_startup(&self, version: &str, interval_secs: u64) {
        info!(
            event = "collector_started",
            node = %self.node_name,
            collector_version = %version,
            interval_secs = interval_secs,
            "Metrics collector started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "collector_shutdown",
            node = %self.node_name,
            reason = %reason,
            "Metrics collector shutting down"
        );
    }

    /// Summary of one collection cycle
    pub fn log_cycle_complete(&self, targets: usize, records: usize, errors: usize, duration_ms: u64) {
        if errors > 0 {
            warn!(
                event = "cycle_complete",
                node = %self.node_name,
                targets = targets,
                records = records,
                errors = errors,
                duration_ms = duration_ms,
                "Collection cycle completed with errors"
            );
        } else {
            info!(
                event = "cycle_complete",
                node = %self.node_name,
                targets = targets,
                records = records,
                errors = errors,
                duration_ms = duration_ms,
                "Collection cycle completed"
            );
        }
    }

    pub fn log_metadata_refreshed(&self, containers: usize, success: bool) {
        if success {
            info!(
                event = "metadata_refreshed",
                node = %self.node_name,
                containers = containers,
                "Metadata cache refreshed"
            );
        } else {
            warn!(
                event = "metadata_refreshed",
                node = %self.node_name,
                containers = containers,
                "Metadata refresh failed, keeping previous cache"
            );
        }
    }

    pub fn log_container_registered(&self, container_id: &str, statsd_host: &str, statsd_port: u16) {
        info!(
            event = "container_registered",
            node = %self.node_name,
            container_id = %container_id,
            statsd_host = %statsd_host,
            statsd_port = statsd_port,
            "Container registered"
        );
    }

    pub fn log_container_removed(&self, container_id: &str) {
        info!(
            event = "container_removed",
            node = %self.node_name,
            container_id = %container_id,
            "Container removed"
        );
    }
}

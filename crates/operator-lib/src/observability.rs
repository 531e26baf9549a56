//! Observability infrastructure for the operator
//!
//! Provides:
//! - Prometheus metrics (node and cluster restart duration, attempts, failures, pass outcomes)
//! - Structured JSON logging with tracing

use crate::events::{EventReason, EventRecorder, EventType};
use crate::vdb::VerticaDB;
use kube::ResourceExt;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, HistogramVec, IntCounterVec,
};
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{info, warn};

/// Restarts take seconds to many minutes
const RESTART_DURATION_BUCKETS: &[f64] = &[
    1.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1200.0, 1800.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<OperatorMetricsInner> = OnceLock::new();

struct OperatorMetricsInner {
    nodes_restart_duration_seconds: HistogramVec,
    nodes_restart_attempted: IntCounterVec,
    nodes_restart_failed: IntCounterVec,
    cluster_restart_duration_seconds: HistogramVec,
    cluster_restart_attempted: IntCounterVec,
    cluster_restart_failed: IntCounterVec,
    reconcile_passes: IntCounterVec,
}

impl OperatorMetricsInner {
    fn new() -> Self {
        Self {
            nodes_restart_duration_seconds: register_histogram_vec!(
                "vertica_nodes_restart_duration_seconds",
                "Time it took to restart a set of down nodes",
                &["namespace", "verticadb"],
                RESTART_DURATION_BUCKETS.to_vec()
            )
            .expect("Failed to register nodes_restart_duration_seconds"),

            nodes_restart_attempted: register_int_counter_vec!(
                "vertica_nodes_restart_attempted_total",
                "Number of times a restart of individual nodes was attempted",
                &["namespace", "verticadb"]
            )
            .expect("Failed to register nodes_restart_attempted"),

            nodes_restart_failed: register_int_counter_vec!(
                "vertica_nodes_restart_failed_total",
                "Number of times a restart of individual nodes failed",
                &["namespace", "verticadb"]
            )
            .expect("Failed to register nodes_restart_failed"),

            cluster_restart_duration_seconds: register_histogram_vec!(
                "vertica_cluster_restart_duration_seconds",
                "Time it took to restart the whole cluster",
                &["namespace", "verticadb"],
                RESTART_DURATION_BUCKETS.to_vec()
            )
            .expect("Failed to register cluster_restart_duration_seconds"),

            cluster_restart_attempted: register_int_counter_vec!(
                "vertica_cluster_restart_attempted_total",
                "Number of times a cluster restart was attempted",
                &["namespace", "verticadb"]
            )
            .expect("Failed to register cluster_restart_attempted"),

            cluster_restart_failed: register_int_counter_vec!(
                "vertica_cluster_restart_failed_total",
                "Number of times a cluster restart failed",
                &["namespace", "verticadb"]
            )
            .expect("Failed to register cluster_restart_failed"),

            reconcile_passes: register_int_counter_vec!(
                "vdb_operator_reconcile_passes_total",
                "Reconcile steps run, by reconciler and outcome",
                &["reconciler", "outcome"]
            )
            .expect("Failed to register reconcile_passes"),
        }
    }
}

/// Operator metrics for Prometheus exposition
///
/// This is a lightweight handle to the global metrics instance.
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct OperatorMetrics {
    _private: (),
}

impl Default for OperatorMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl OperatorMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(OperatorMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &OperatorMetricsInner {
        GLOBAL_METRICS.get().expect("Metrics not initialized")
    }

    fn labels(vdb: &VerticaDB) -> [String; 2] {
        [vdb.namespace().unwrap_or_default(), vdb.name_any()]
    }

    /// Record one restart node attempt and how long it took
    pub fn observe_nodes_restart(&self, vdb: &VerticaDB, elapsed: Duration, failed: bool) {
        let labels = Self::labels(vdb);
        let labels = [labels[0].as_str(), labels[1].as_str()];
        let inner = self.inner();
        inner
            .nodes_restart_duration_seconds
            .with_label_values(&labels)
            .observe(elapsed.as_secs_f64());
        inner.nodes_restart_attempted.with_label_values(&labels).inc();
        if failed {
            inner.nodes_restart_failed.with_label_values(&labels).inc();
        }
    }

    /// Record one cluster start attempt and how long it took
    pub fn observe_cluster_restart(&self, vdb: &VerticaDB, elapsed: Duration, failed: bool) {
        let labels = Self::labels(vdb);
        let labels = [labels[0].as_str(), labels[1].as_str()];
        let inner = self.inner();
        inner
            .cluster_restart_duration_seconds
            .with_label_values(&labels)
            .observe(elapsed.as_secs_f64());
        inner
            .cluster_restart_attempted
            .with_label_values(&labels)
            .inc();
        if failed {
            inner.cluster_restart_failed.with_label_values(&labels).inc();
        }
    }

    pub fn inc_reconcile_pass(&self, reconciler: &str, outcome: &str) {
        self.inner()
            .reconcile_passes
            .with_label_values(&[reconciler, outcome])
            .inc();
    }

    pub fn nodes_restart_attempts(&self, vdb: &VerticaDB) -> u64 {
        let labels = Self::labels(vdb);
        self.inner()
            .nodes_restart_attempted
            .with_label_values(&[labels[0].as_str(), labels[1].as_str()])
            .get()
    }

    pub fn cluster_restart_attempts(&self, vdb: &VerticaDB) -> u64 {
        let labels = Self::labels(vdb);
        self.inner()
            .cluster_restart_attempted
            .with_label_values(&[labels[0].as_str(), labels[1].as_str()])
            .get()
    }
}

/// Structured logger for operator events
///
/// Every Kubernetes event is mirrored as one structured log record, so the
/// history survives after the events expire from the API server.
#[derive(Clone)]
pub struct StructuredLogger {
    operator_name: String,
}

impl StructuredLogger {
    pub fn new(operator_name: impl Into<String>) -> Self {
        Self {
            operator_name: operator_name.into(),
        }
    }

    pub fn log_startup(&self, version: &str, namespace: &str, vdb_name: &str) {
        info!(
            event = "operator_started",
            operator = %self.operator_name,
            operator_version = %version,
            namespace = %namespace,
            vdb = %vdb_name,
            "VerticaDB operator started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "operator_shutdown",
            operator = %self.operator_name,
            reason = %reason,
            "VerticaDB operator shutting down"
        );
    }

    /// Log the outcome of one reconcile round
    pub fn log_round(&self, vdb: &str, outcome: &str, elapsed: Duration) {
        info!(
            event = "reconcile_round",
            operator = %self.operator_name,
            vdb = %vdb,
            outcome = %outcome,
            elapsed_ms = elapsed.as_millis() as u64,
            "Reconcile round finished"
        );
    }
}

impl EventRecorder for StructuredLogger {
    fn event(&self, vdb: &VerticaDB, event_type: EventType, reason: EventReason, message: &str) {
        let namespace = vdb.namespace().unwrap_or_default();
        let name = vdb.name_any();
        match event_type {
            EventType::Normal => info!(
                event = "vdb_event",
                operator = %self.operator_name,
                namespace = %namespace,
                vdb = %name,
                reason = %reason,
                message = %message,
                "Recorded event"
            ),
            EventType::Warning => warn!(
                event = "vdb_event",
                operator = %self.operator_name,
                namespace = %namespace,
                vdb = %name,
                reason = %reason,
                message = %message,
                "Recorded warning event"
            ),
        }
    }
}

//! Prometheus metrics for entity text indexes

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge_vec, register_histogram_vec, CounterVec, GaugeVec,
    HistogramVec,
};

/// Index and query metrics, labelled by index name
pub struct SearchMetrics {
    /// Entity documents written
    pub entities_indexed: CounterVec,

    /// Entity documents deleted by identifier
    pub entities_deleted: CounterVec,

    /// Catch-up scan batches committed
    pub scan_batches: CounterVec,

    /// Current progress mark
    pub progress_mark: GaugeVec,

    /// Nodes that failed to answer a broadcast
    pub fanout_failures: CounterVec,

    /// Cluster-wide query duration in seconds
    pub query_duration: HistogramVec,
}

impl SearchMetrics {
    pub fn new() -> Self {
        Self {
            entities_indexed: register_counter_vec!(
                "text_index_entities_indexed_total",
                "Total number of entity documents written",
                &["index"]
            )
            .unwrap(),

            entities_deleted: register_counter_vec!(
                "text_index_entities_deleted_total",
                "Total number of entity documents deleted by identifier",
                &["index"]
            )
            .unwrap(),

            scan_batches: register_counter_vec!(
                "text_index_scan_batches_total",
                "Total number of catch-up scan batches committed",
                &["index"]
            )
            .unwrap(),

            progress_mark: register_gauge_vec!(
                "text_index_progress_mark",
                "Highest entity identifier processed by the catch-up scan",
                &["index"]
            )
            .unwrap(),

            fanout_failures: register_counter_vec!(
                "text_index_fanout_failures_total",
                "Total number of nodes that failed to answer a broadcast",
                &["index", "operation"]
            )
            .unwrap(),

            query_duration: register_histogram_vec!(
                "text_index_query_duration_seconds",
                "Cluster-wide query duration in seconds",
                &["index", "operation"],
                vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
            )
            .unwrap(),
        }
    }

    pub fn record_indexed(&self, index: &str, count: usize) {
        if count > 0 {
            self.entities_indexed
                .with_label_values(&[index])
                .inc_by(count as f64);
        }
    }

    pub fn record_deleted(&self, index: &str, count: usize) {
        self.entities_deleted
            .with_label_values(&[index])
            .inc_by(count as f64);
    }

    pub fn record_scan_batch(&self, index: &str, progress_mark: u64) {
        self.scan_batches.with_label_values(&[index]).inc();
        self.progress_mark
            .with_label_values(&[index])
            .set(progress_mark as f64);
    }

    pub fn record_fanout_failures(&self, index: &str, operation: &str, failures: usize) {
        if failures > 0 {
            self.fanout_failures
                .with_label_values(&[index, operation])
                .inc_by(failures as f64);
        }
    }

    pub fn observe_query(&self, index: &str, operation: &str, duration_secs: f64) {
        self.query_duration
            .with_label_values(&[index, operation])
            .observe(duration_secs);
    }
}

impl Default for SearchMetrics {
    fn default() -> Self {
        Self::new()
    }
}

lazy_static! {
    /// Global search metrics instance
    pub static ref SEARCH_METRICS: SearchMetrics = SearchMetrics::new();
}

/// Initialize search metrics (idempotent)
pub fn init_search_metrics() {
    lazy_static::initialize(&SEARCH_METRICS);
}

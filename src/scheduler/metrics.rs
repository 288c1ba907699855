//! Prometheus metrics for the batch worker pool

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge_vec, register_histogram_vec, CounterVec, GaugeVec,
    HistogramVec,
};

/// Worker pool metrics collection
pub struct SchedulerMetrics {
    /// Batches executed, by worker and outcome (`success`, `failure`, `panic`)
    pub batches_total: CounterVec,

    /// Work items handed to batches
    pub works_total: CounterVec,

    /// Batch duration in seconds
    pub batch_duration: HistogramVec,

    /// Batches currently running
    pub running_batches: GaugeVec,
}

impl SchedulerMetrics {
    pub fn new() -> Self {
        Self {
            batches_total: register_counter_vec!(
                "text_index_batches_total",
                "Total number of executed index batches",
                &["worker", "outcome"]
            )
            .unwrap(),

            works_total: register_counter_vec!(
                "text_index_batch_works_total",
                "Total number of work items drained into batches",
                &["worker"]
            )
            .unwrap(),

            batch_duration: register_histogram_vec!(
                "text_index_batch_duration_seconds",
                "Index batch duration in seconds",
                &["worker"],
                vec![0.001, 0.01, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0]
            )
            .unwrap(),

            running_batches: register_gauge_vec!(
                "text_index_running_batches",
                "Number of currently running index batches",
                &["worker"]
            )
            .unwrap(),
        }
    }

    /// Record batch start
    pub fn record_batch_start(&self, worker: &str, works: usize) {
        self.running_batches.with_label_values(&[worker]).inc();
        self.works_total
            .with_label_values(&[worker])
            .inc_by(works as f64);
    }

    /// Record batch completion
    pub fn record_batch_complete(&self, worker: &str, outcome: &str, duration_secs: f64) {
        self.running_batches.with_label_values(&[worker]).dec();
        self.batches_total
            .with_label_values(&[worker, outcome])
            .inc();
        self.batch_duration
            .with_label_values(&[worker])
            .observe(duration_secs);
    }
}

impl Default for SchedulerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

lazy_static! {
    /// Global scheduler metrics instance
    pub static ref SCHEDULER_METRICS: SchedulerMetrics = SchedulerMetrics::new();
}

/// Initialize scheduler metrics (idempotent)
pub fn init_scheduler_metrics() {
    lazy_static::initialize(&SCHEDULER_METRICS);
}

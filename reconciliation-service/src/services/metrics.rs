//! Prometheus metrics for reconciliation-service.

use once_cell::sync::Lazy;
use prometheus::{
    CounterVec, Encoder, HistogramVec, TextEncoder, register_counter_vec, register_histogram_vec,
};

/// Histogram for database query duration by operation.
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "reconciliation_db_query_duration_seconds",
        "Database query duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]
    )
    .expect("Failed to register DB_QUERY_DURATION")
});

/// Counter for batch jobs by terminal status.
pub static BATCH_JOBS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "reconciliation_batch_jobs_total",
        "Total number of batch jobs by terminal status",
        &["status"]
    )
    .expect("Failed to register BATCH_JOBS")
});

/// Counter for transaction classifications produced by the matcher.
pub static TRANSACTION_OUTCOMES: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "reconciliation_transaction_outcomes_total",
        "Total number of transactions by classification",
        &["outcome"]
    )
    .expect("Failed to register TRANSACTION_OUTCOMES")
});

/// Counter for admin actions applied through the state machine.
pub static ADMIN_ACTIONS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "reconciliation_admin_actions_total",
        "Total number of admin actions",
        &["action", "status"]
    )
    .expect("Failed to register ADMIN_ACTIONS")
});

/// Counter for errors.
pub static ERRORS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "reconciliation_errors_total",
        "Total number of errors",
        &["error_type"]
    )
    .expect("Failed to register ERRORS")
});

/// Initialize all metrics (forces lazy initialization).
pub fn init_metrics() {
    Lazy::force(&DB_QUERY_DURATION);
    Lazy::force(&BATCH_JOBS);
    Lazy::force(&TRANSACTION_OUTCOMES);
    Lazy::force(&ADMIN_ACTIONS);
    Lazy::force(&ERRORS);
}

/// Get all metrics as Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

/// Record a batch job outcome.
pub fn record_batch_job(status: &str) {
    BATCH_JOBS.with_label_values(&[status]).inc();
}

/// Record a matcher classification.
pub fn record_transaction_outcome(outcome: &str) {
    TRANSACTION_OUTCOMES.with_label_values(&[outcome]).inc();
}

/// Record an admin action.
pub fn record_admin_action(action: &str, status: &str) {
    ADMIN_ACTIONS.with_label_values(&[action, status]).inc();
}

/// Record an error.
pub fn record_error(error_type: &str) {
    ERRORS.with_label_values(&[error_type]).inc();
}

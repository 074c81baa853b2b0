//! Metrics for fee-service.
//! Prometheus metrics covering payment ingestion, credit movement, and
//! billing generation runs.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::Lazy;
use prometheus::{
    Encoder, HistogramVec, IntCounterVec, TextEncoder, histogram_opts, opts,
    register_histogram_vec, register_int_counter_vec,
};
use std::sync::OnceLock;

/// Global handle to the recorder backing the HTTP middleware metrics.
pub static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Database query duration histogram
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        histogram_opts!("fee_db_query_duration_seconds", "Database query duration"),
        &["operation"]
    )
    .expect("Failed to register DB_QUERY_DURATION")
});

/// Payments ingested by source and outcome
pub static PAYMENTS_INGESTED_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Monetary amount ingested by source
pub static PAYMENT_AMOUNT_TOTAL: OnceLock<prometheus::CounterVec> = OnceLock::new();

/// Monetary amount moved by the carryover planner, by direction
pub static CREDIT_TRANSFERRED_TOTAL: OnceLock<prometheus::CounterVec> = OnceLock::new();

/// Deposits parked in the holding store, by reason
pub static UNMATCHED_PAYMENTS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Billing generation runs by outcome
pub static BILLING_RUNS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Ledger records touched by billing generation
pub static BILLING_RECORDS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Error counter for alerting
pub static ERRORS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Initialize all metrics. Call once at startup.
pub fn init_metrics() {
    // Tests build several applications in one process; the first recorder
    // install wins and later calls reuse it.
    if METRICS_HANDLE.get().is_none() {
        if let Ok(handle) = PrometheusBuilder::new().install_recorder() {
            let _ = METRICS_HANDLE.set(handle);
        }
    }

    PAYMENTS_INGESTED_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "fee_payments_ingested_total",
                "Total payments ingested by source and outcome"
            ),
            &["source", "outcome"]
        )
        .expect("Failed to register PAYMENTS_INGESTED_TOTAL")
    });

    PAYMENT_AMOUNT_TOTAL.get_or_init(|| {
        prometheus::register_counter_vec!(
            prometheus::opts!(
                "fee_payment_amount_total",
                "Total payment amount ingested by source"
            ),
            &["source"]
        )
        .expect("Failed to register PAYMENT_AMOUNT_TOTAL")
    });

    CREDIT_TRANSFERRED_TOTAL.get_or_init(|| {
        prometheus::register_counter_vec!(
            prometheus::opts!(
                "fee_credit_transferred_total",
                "Total credit amount moved between ledger records by direction"
            ),
            &["direction"]
        )
        .expect("Failed to register CREDIT_TRANSFERRED_TOTAL")
    });

    UNMATCHED_PAYMENTS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "fee_unmatched_payments_total",
                "Deposits held for manual resolution by reason"
            ),
            &["reason"]
        )
        .expect("Failed to register UNMATCHED_PAYMENTS_TOTAL")
    });

    BILLING_RUNS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "fee_billing_runs_total",
                "Total billing generation runs by outcome"
            ),
            &["outcome"]
        )
        .expect("Failed to register BILLING_RUNS_TOTAL")
    });

    BILLING_RECORDS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "fee_billing_records_total",
                "Ledger records created or updated by billing generation"
            ),
            &["action"]
        )
        .expect("Failed to register BILLING_RECORDS_TOTAL")
    });

    ERRORS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!("fee_errors_total", "Total errors by type for alerting"),
            &["error_type", "operation"]
        )
        .expect("Failed to register ERRORS_TOTAL")
    });

    // Force initialization of lazy statics
    let _ = &*DB_QUERY_DURATION;
}

/// Get metrics in Prometheus text format.
///
/// Merges the middleware recorder output with the custom registry.
pub fn get_metrics() -> String {
    let mut output = METRICS_HANDLE
        .get()
        .map(|handle| handle.render())
        .unwrap_or_default();

    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).ok();
    if let Ok(custom_metrics) = String::from_utf8(buffer) {
        output.push_str(&custom_metrics);
    }

    output
}

/// Record one ingested payment.
pub fn record_payment_ingested(source: &str, outcome: &str) {
    if let Some(counter) = PAYMENTS_INGESTED_TOTAL.get() {
        counter.with_label_values(&[source, outcome]).inc();
    }
}

/// Record a payment amount for financial tracking.
pub fn record_payment_amount(source: &str, amount: f64) {
    if let Some(counter) = PAYMENT_AMOUNT_TOTAL.get() {
        counter.with_label_values(&[source]).inc_by(amount.abs());
    }
}

/// Record credit moved by the carryover planner.
pub fn record_credit_transferred(direction: &str, amount: f64) {
    if let Some(counter) = CREDIT_TRANSFERRED_TOTAL.get() {
        counter.with_label_values(&[direction]).inc_by(amount.abs());
    }
}

/// Record a deposit parked in the holding store.
pub fn record_unmatched_payment(reason: &str) {
    if let Some(counter) = UNMATCHED_PAYMENTS_TOTAL.get() {
        counter.with_label_values(&[reason]).inc();
    }
}

/// Record a billing generation run.
pub fn record_billing_run(outcome: &str) {
    if let Some(counter) = BILLING_RUNS_TOTAL.get() {
        counter.with_label_values(&[outcome]).inc();
    }
}

/// Record ledger records touched by billing generation.
pub fn record_billing_records(created: u64, updated: u64) {
    if let Some(counter) = BILLING_RECORDS_TOTAL.get() {
        counter.with_label_values(&["created"]).inc_by(created);
        counter.with_label_values(&["updated"]).inc_by(updated);
    }
}

/// Record an error for alerting.
pub fn record_error(error_type: &str, operation: &str) {
    if let Some(counter) = ERRORS_TOTAL.get() {
        counter.with_label_values(&[error_type, operation]).inc();
    }
}

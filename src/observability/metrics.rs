//! # Metrics
//!
//! Prometheus metrics for monitoring the controllers.
//!
//! ## Metrics Exposed
//!
//! - `asset_store_reconciliations_total` - Reconciliation passes by resource kind
//! - `asset_store_reconciliation_errors_total` - Failed reconciliation passes by resource kind
//! - `asset_store_reconciliation_duration_seconds` - Duration of reconciliation passes
//! - `asset_store_requeues_total` - Requeues by trigger source
//! - `asset_store_status_updates_total` - Status writes by kind and outcome (`written`, `skipped`)
//! - `asset_store_conflict_retries_total` - Optimistic-concurrency conflicts retried
//! - `asset_store_webhook_calls_total` - Webhook calls by hook kind and outcome
//! - `asset_store_webhook_duration_seconds` - Duration of webhook calls
//! - `asset_store_store_operations_total` - Object store operations by operation
//! - `asset_store_store_operation_errors_total` - Failed object store operations

use anyhow::Result;
use prometheus::{HistogramVec, IntCounterVec, Registry};
use std::sync::LazyLock;

pub(crate) static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

static RECONCILIATIONS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "asset_store_reconciliations_total",
            "Total number of reconciliations",
        ),
        &["kind"],
    )
    .expect("Failed to create RECONCILIATIONS_TOTAL metric - this should never happen")
});

static RECONCILIATION_ERRORS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "asset_store_reconciliation_errors_total",
            "Total number of reconciliation errors",
        ),
        &["kind"],
    )
    .expect("Failed to create RECONCILIATION_ERRORS_TOTAL metric - this should never happen")
});

static RECONCILIATION_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    HistogramVec::new(
        prometheus::HistogramOpts::new(
            "asset_store_reconciliation_duration_seconds",
            "Duration of reconciliation in seconds",
        )
        .buckets(vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0]),
        &["kind"],
    )
    .expect("Failed to create RECONCILIATION_DURATION metric - this should never happen")
});

static REQUEUES_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "asset_store_requeues_total",
            "Total number of requeues by trigger source",
        ),
        &["trigger_source"],
    )
    .expect("Failed to create REQUEUES_TOTAL metric - this should never happen")
});

static STATUS_UPDATES_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "asset_store_status_updates_total",
            "Total number of status updates by outcome",
        ),
        &["kind", "outcome"],
    )
    .expect("Failed to create STATUS_UPDATES_TOTAL metric - this should never happen")
});

static CONFLICT_RETRIES_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "asset_store_conflict_retries_total",
            "Total number of optimistic-concurrency conflicts that were retried",
        ),
        &["kind"],
    )
    .expect("Failed to create CONFLICT_RETRIES_TOTAL metric - this should never happen")
});

static WEBHOOK_CALLS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "asset_store_webhook_calls_total",
            "Total number of webhook calls by hook kind and outcome",
        ),
        &["hook", "outcome"],
    )
    .expect("Failed to create WEBHOOK_CALLS_TOTAL metric - this should never happen")
});

static WEBHOOK_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    HistogramVec::new(
        prometheus::HistogramOpts::new(
            "asset_store_webhook_duration_seconds",
            "Duration of webhook calls in seconds",
        )
        .buckets(vec![0.05, 0.1, 0.5, 1.0, 5.0, 15.0, 60.0]),
        &["hook"],
    )
    .expect("Failed to create WEBHOOK_DURATION metric - this should never happen")
});

static STORE_OPERATIONS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "asset_store_store_operations_total",
            "Total number of object store operations",
        ),
        &["operation"],
    )
    .expect("Failed to create STORE_OPERATIONS_TOTAL metric - this should never happen")
});

static STORE_OPERATION_ERRORS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "asset_store_store_operation_errors_total",
            "Total number of failed object store operations",
        ),
        &["operation"],
    )
    .expect("Failed to create STORE_OPERATION_ERRORS_TOTAL metric - this should never happen")
});

pub fn register_metrics() -> Result<()> {
    REGISTRY.register(Box::new(RECONCILIATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_DURATION.clone()))?;
    REGISTRY.register(Box::new(REQUEUES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(STATUS_UPDATES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(CONFLICT_RETRIES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(WEBHOOK_CALLS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(WEBHOOK_DURATION.clone()))?;
    REGISTRY.register(Box::new(STORE_OPERATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(STORE_OPERATION_ERRORS_TOTAL.clone()))?;
    Ok(())
}

pub fn increment_reconciliations(kind: &str) {
    RECONCILIATIONS_TOTAL.with_label_values(&[kind]).inc();
}

pub fn increment_reconciliation_errors(kind: &str) {
    RECONCILIATION_ERRORS_TOTAL.with_label_values(&[kind]).inc();
}

pub fn observe_reconciliation_duration(kind: &str, duration: f64) {
    RECONCILIATION_DURATION
        .with_label_values(&[kind])
        .observe(duration);
}

pub fn increment_requeues_total(trigger_source: &str) {
    REQUEUES_TOTAL.with_label_values(&[trigger_source]).inc();
}

/// `written` or `skipped`
pub fn increment_status_updates(kind: &str, outcome: &str) {
    STATUS_UPDATES_TOTAL.with_label_values(&[kind, outcome]).inc();
}

pub fn increment_conflict_retries(kind: &str) {
    CONFLICT_RETRIES_TOTAL.with_label_values(&[kind]).inc();
}

/// Record one webhook call; outcome is `success`, `rejected` or `error`
pub fn record_webhook_call(hook: &str, outcome: &str, duration: f64) {
    WEBHOOK_CALLS_TOTAL.with_label_values(&[hook, outcome]).inc();
    WEBHOOK_DURATION.with_label_values(&[hook]).observe(duration);
}

pub fn record_store_operation(operation: &str, success: bool) {
    STORE_OPERATIONS_TOTAL.with_label_values(&[operation]).inc();
    if !success {
        STORE_OPERATION_ERRORS_TOTAL
            .with_label_values(&[operation])
            .inc();
    }
}

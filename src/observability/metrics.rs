//! # Metrics
//!
//! Prometheus metrics for monitoring the operator.
//!
//! ## Metrics Exposed
//!
//! - `cache_operator_reconciliations_total` - Reconciliations by resource kind
//! - `cache_operator_reconciliation_errors_total` - Reconciliation errors by resource kind
//! - `cache_operator_reconciliation_duration_seconds` - Duration of reconciliations
//! - `cache_operator_handler_panics_total` - Pipeline handlers that panicked
//! - `cache_operator_store_writes_total` - Writes issued to the API server by verb
//! - `cache_operator_conflicts_total` - Stale-version conflicts by object kind
//! - `cache_operator_requeues_total` - Requeue decisions by reason
//! - `cache_operator_phase_transitions_total` - Job phase transitions by kind and phase

use anyhow::Result;
use prometheus::{HistogramVec, IntCounterVec, Registry};
use std::sync::LazyLock;

pub(crate) static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

static RECONCILIATIONS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "cache_operator_reconciliations_total",
            "Total number of reconciliations",
        ),
        &["kind"],
    )
    .expect("Failed to create RECONCILIATIONS_TOTAL metric - this should never happen")
});

static RECONCILIATION_ERRORS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "cache_operator_reconciliation_errors_total",
            "Total number of reconciliation errors",
        ),
        &["kind"],
    )
    .expect("Failed to create RECONCILIATION_ERRORS_TOTAL metric - this should never happen")
});

static RECONCILIATION_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    HistogramVec::new(
        prometheus::HistogramOpts::new(
            "cache_operator_reconciliation_duration_seconds",
            "Duration of reconciliation in seconds",
        )
        .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0]),
        &["kind"],
    )
    .expect("Failed to create RECONCILIATION_DURATION metric - this should never happen")
});

static HANDLER_PANICS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "cache_operator_handler_panics_total",
            "Total number of pipeline handlers that panicked",
        ),
        &["handler"],
    )
    .expect("Failed to create HANDLER_PANICS_TOTAL metric - this should never happen")
});

static STORE_WRITES_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "cache_operator_store_writes_total",
            "Total number of writes issued to the API server",
        ),
        &["verb"],
    )
    .expect("Failed to create STORE_WRITES_TOTAL metric - this should never happen")
});

static CONFLICTS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "cache_operator_conflicts_total",
            "Total number of writes rejected because of a stale resource version",
        ),
        &["kind"],
    )
    .expect("Failed to create CONFLICTS_TOTAL metric - this should never happen")
});

static REQUEUES_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "cache_operator_requeues_total",
            "Total number of requeue decisions",
        ),
        &["kind", "reason"],
    )
    .expect("Failed to create REQUEUES_TOTAL metric - this should never happen")
});

static PHASE_TRANSITIONS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "cache_operator_phase_transitions_total",
            "Total number of job phase transitions",
        ),
        &["kind", "phase"],
    )
    .expect("Failed to create PHASE_TRANSITIONS_TOTAL metric - this should never happen")
});

#[allow(
    clippy::missing_errors_doc,
    reason = "Registration only fails on duplicate metric names"
)]
pub fn register_metrics() -> Result<()> {
    REGISTRY.register(Box::new(RECONCILIATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_DURATION.clone()))?;
    REGISTRY.register(Box::new(HANDLER_PANICS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(STORE_WRITES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(CONFLICTS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(REQUEUES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(PHASE_TRANSITIONS_TOTAL.clone()))?;

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

pub fn increment_handler_panics(handler: &str) {
    HANDLER_PANICS_TOTAL.with_label_values(&[handler]).inc();
}

pub fn increment_store_writes(verb: &str) {
    STORE_WRITES_TOTAL.with_label_values(&[verb]).inc();
}

pub fn increment_conflicts(kind: &str) {
    CONFLICTS_TOTAL.with_label_values(&[kind]).inc();
}

pub fn increment_requeues(kind: &str, reason: &str) {
    REQUEUES_TOTAL.with_label_values(&[kind, reason]).inc();
}

pub fn increment_phase_transitions(kind: &str, phase: &str) {
    PHASE_TRANSITIONS_TOTAL
        .with_label_values(&[kind, phase])
        .inc();
}

//! Metrics for system index reconciliation
//!
//! Instruments are registered on the global OpenTelemetry meter. Without an
//! installed meter provider they are no-ops; exporters are wired up by the
//! embedding process.

use once_cell::sync::Lazy;
use opentelemetry::global;
use opentelemetry::metrics::{Counter, Gauge, Histogram, Meter};

/// Global meter for system index metrics
static METER: Lazy<Meter> = Lazy::new(|| global::meter("system_index_manager"));

/// Counter of reconciliation passes
///
/// Labels:
/// - `result`: evaluated, skipped
pub static RECONCILE_PASSES: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("system_index_reconcile_passes_total")
        .with_description("Total number of reconciliation passes over managed indices")
        .with_unit("{passes}")
        .build()
});

/// Counter of dispatched index updates
///
/// Labels:
/// - `index`: concrete index name
/// - `mappings`: whether the plan carried a mapping upgrade
pub static UPDATES_DISPATCHED: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("system_index_updates_dispatched_total")
        .with_description("Total number of mapping or settings updates dispatched")
        .with_unit("{updates}")
        .build()
});

/// Counter of failed index updates
///
/// Labels:
/// - `index`: concrete index name
/// - `kind`: transient, permanent
pub static UPDATE_FAILURES: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("system_index_update_failures_total")
        .with_description("Total number of failed mapping or settings updates")
        .with_unit("{errors}")
        .build()
});

/// Gauge of indices blocked by a permanent failure
pub static STUCK_INDICES: Lazy<Gauge<u64>> = Lazy::new(|| {
    METER
        .u64_gauge("system_index_stuck_indices")
        .with_description("Number of managed indices whose last update failed permanently")
        .with_unit("{indices}")
        .build()
});

/// Histogram of update dispatch duration
///
/// Labels:
/// - `result`: success, transient, permanent
pub static UPDATE_DURATION: Lazy<Histogram<f64>> = Lazy::new(|| {
    METER
        .f64_histogram("system_index_update_duration_seconds")
        .with_description("Duration of index update dispatches in seconds")
        .with_unit("s")
        .build()
});

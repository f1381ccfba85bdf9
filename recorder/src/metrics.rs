//! Prometheus metrics for the trace recorder
//!
//! These are process-wide and aggregate over every recorder in the process;
//! per-recorder numbers live in [`RecorderStats`](crate::RecorderStats).

use once_cell::sync::Lazy;
use prometheus::{
    register_counter, register_counter_vec, register_gauge, Counter, CounterVec, Encoder, Gauge,
    TextEncoder,
};

// ── Records ─────────────────────────────────────────────────────────────────

pub static RECORDS_WRITTEN: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "gputrace_records_written_total",
        "Records serialized to a trace file"
    )
    .unwrap()
});

pub static RECORDS_DROPPED: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "gputrace_records_dropped_total",
        "Records discarded before reaching a trace file",
        &["reason"]
    )
    .unwrap()
});

pub static MALFORMED_ARGS: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "gputrace_malformed_args_total",
        "Records whose extra fields were not a valid JSON object body"
    )
    .unwrap()
});

// ── Files ───────────────────────────────────────────────────────────────────

pub static ROTATIONS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "gputrace_rotations_total",
        "Trace file rotations",
        &["reason"]
    )
    .unwrap()
});

pub static OPEN_FAILURES: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "gputrace_open_failures_total",
        "Failed attempts to open or rename a trace file"
    )
    .unwrap()
});

// ── Queue ───────────────────────────────────────────────────────────────────

pub static QUEUE_DEPTH: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!(
        "gputrace_queue_depth",
        "Records waiting for the writer thread"
    )
    .unwrap()
});

pub(crate) fn record_dropped(reason: &str, count: u64) {
    if count > 0 {
        RECORDS_DROPPED
            .with_label_values(&[reason])
            .inc_by(count as f64);
    }
}

/// Render all registered metrics to Prometheus text format.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&families, &mut buffer).unwrap();
    String::from_utf8(buffer).unwrap()
}

//! GPU workload producers for the trace recorder
//!
//! Everything here only talks to the recorder through its public API:
//!
//! - [`activity`]: decoded GPU activity records (kernels, copies, memsets,
//!   API calls, synchronization) become complete events in the active phase
//! - [`perf`]: host task-clock and context-switch counters
//! - [`phase`]: `start(label)` / `stop()` hooks marking workload phases, and
//!   `finish()` to publish the last trace file
//! - [`metrics`]: running totals over recorded activity

pub mod activity;
pub mod metrics;
pub mod perf;
pub mod phase;

pub use activity::{
    ActivityKind, ActivitySource, ActivityTracer, GpuActivity, KernelLaunch, MemcpyKind, SyncKind,
};
pub use metrics::{GpuMetricAggregator, GpuSummary};
pub use perf::{PerfCounters, PerfError, PerfSnapshot};
pub use phase::{finish, start, stop, CurrentPhase, PhaseSummary, PhaseTracker};

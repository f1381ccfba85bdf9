//! `start(phase)` / `stop()` lifecycle hooks
//!
//! A phase is a named stretch of the workload (`forward`, `backward`, ...).
//! While one is active, GPU activity is grouped under its name; when it stops
//! a complete event covering the phase is recorded with host counter deltas.

use crate::activity::ActivityTracer;
use crate::perf::{PerfCounters, PerfSnapshot};
use anyhow::Result;
use gputrace_recorder::{global, Recorder};
use gputrace_shared::utils::time::system_time_micros;
use once_cell::sync::Lazy;
use serde::Serialize;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Group used for activity recorded outside any phase
pub const DEFAULT_PHASE: &str = "default";

/// How long `stop()` waits for the phase's records to reach the file
const STOP_FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

/// Name of the active phase, shared with activity tracers
#[derive(Debug, Clone)]
pub struct CurrentPhase(Arc<RwLock<String>>);

impl CurrentPhase {
    pub fn get(&self) -> String {
        self.0
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set(&self, name: &str) {
        *self.0.write().unwrap_or_else(PoisonError::into_inner) = name.to_string();
    }
}

impl Default for CurrentPhase {
    fn default() -> Self {
        Self(Arc::new(RwLock::new(DEFAULT_PHASE.to_string())))
    }
}

/// What a finished phase measured
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PhaseSummary {
    pub label: String,
    pub start_micros: u64,
    pub duration_micros: u64,
    pub counters: Option<PerfSnapshot>,
}

#[derive(Debug)]
struct ActivePhase {
    label: String,
    start_micros: u64,
    counters: Option<PerfSnapshot>,
}

/// Tracks the active phase for one recorder
#[derive(Debug)]
pub struct PhaseTracker {
    recorder: Recorder,
    current: CurrentPhase,
    perf: Option<PerfCounters>,
    active: Option<ActivePhase>,
}

impl PhaseTracker {
    /// Track phases on `recorder`, with host counters when the kernel allows
    pub fn new(recorder: Recorder) -> Self {
        let perf = match PerfCounters::open() {
            Ok(counters) => Some(counters),
            Err(e) => {
                debug!("Host counters unavailable: {}", e);
                None
            }
        };
        Self::with_counters(recorder, perf)
    }

    pub fn with_counters(recorder: Recorder, perf: Option<PerfCounters>) -> Self {
        Self {
            recorder,
            current: CurrentPhase::default(),
            perf,
            active: None,
        }
    }

    /// Handle through which activity tracers learn the phase name
    pub fn current_phase(&self) -> CurrentPhase {
        self.current.clone()
    }

    /// An activity tracer grouping records under this tracker's phases
    pub fn activity_tracer(&self) -> ActivityTracer {
        ActivityTracer::new(self.recorder.clone(), self.current_phase())
    }

    pub fn active_phase(&self) -> Option<&str> {
        self.active.as_ref().map(|phase| phase.label.as_str())
    }

    fn snapshot(&self) -> Option<PerfSnapshot> {
        let counters = self.perf.as_ref()?;
        match counters.read() {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                warn!("Failed to read host counters: {}", e);
                None
            }
        }
    }

    /// Begin `label`. A phase that is still active is stopped first.
    pub fn start(&mut self, label: &str) {
        if self.active.is_some() {
            self.stop();
        }

        info!("Phase {}", label);
        self.current.set(label);
        self.active = Some(ActivePhase {
            label: label.to_string(),
            start_micros: system_time_micros(),
            counters: self.snapshot(),
        });
    }

    /// End the active phase, record it and wait briefly for it to be written
    pub fn stop(&mut self) -> Option<PhaseSummary> {
        let Some(phase) = self.active.take() else {
            warn!("stop() called with no active phase");
            return None;
        };

        let duration_micros = system_time_micros().saturating_sub(phase.start_micros);
        let counters = match (phase.counters, self.snapshot()) {
            (Some(before), Some(after)) => Some(after.since(&before)),
            _ => None,
        };
        let extra_fields = counters
            .map(|c| c.extra_fields())
            .unwrap_or_default();

        self.recorder.record_complete(
            &phase.label,
            &phase.label,
            phase.start_micros,
            duration_micros,
            &extra_fields,
        );
        self.current.set(DEFAULT_PHASE);

        if !self.recorder.flush(STOP_FLUSH_TIMEOUT) {
            debug!("Phase {} not yet written after {:?}", phase.label, STOP_FLUSH_TIMEOUT);
        }

        Some(PhaseSummary {
            label: phase.label,
            start_micros: phase.start_micros,
            duration_micros,
            counters,
        })
    }
}

static TRACKER: Lazy<Mutex<Option<PhaseTracker>>> = Lazy::new(|| Mutex::new(None));

fn with_tracker<T>(f: impl FnOnce(&mut PhaseTracker) -> T) -> Result<T> {
    let mut slot = TRACKER.lock().unwrap_or_else(PoisonError::into_inner);
    let tracker = match slot.take() {
        Some(tracker) => tracker,
        None => {
            let tracker = PhaseTracker::new(global::get_or_init()?);
            register_exit_hook();
            tracker
        }
    };
    Ok(f(slot.insert(tracker)))
}

/// Run [`finish`] when the process exits normally, for hosts that only use
/// the `start` / `stop` hooks.
#[cfg(target_os = "linux")]
fn register_exit_hook() {
    use std::sync::Once;

    extern "C" fn on_exit() {
        finish();
    }

    static REGISTERED: Once = Once::new();
    REGISTERED.call_once(|| {
        // SAFETY: on_exit is a plain extern "C" fn that never unwinds
        if unsafe { libc::atexit(on_exit) } != 0 {
            warn!("Failed to register exit hook; call finish() before exiting");
        }
    });
}

#[cfg(not(target_os = "linux"))]
fn register_exit_hook() {}

/// Begin a phase on the process-wide recorder, starting it if needed
pub fn start(label: &str) -> Result<()> {
    with_tracker(|tracker| tracker.start(label))
}

/// End the active phase on the process-wide recorder
pub fn stop() -> Result<Option<PhaseSummary>> {
    with_tracker(|tracker| tracker.stop())
}

/// Activity tracer bound to the process-wide phase tracker
pub fn activity_tracer() -> Result<ActivityTracer> {
    with_tracker(|tracker| tracker.activity_tracer())
}

/// Forget the process-wide tracker. Call before [`global::shutdown`] when
/// restarting tracing within one process.
pub fn reset() {
    TRACKER
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .take();
}

/// End any active phase, then stop the process-wide recorder so its last
/// trace file is closed and published. Safe to call more than once.
pub fn finish() {
    let tracker = TRACKER
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .take();
    if let Some(mut tracker) = tracker {
        if tracker.active_phase().is_some() {
            tracker.stop();
        }
    }
    global::shutdown();
}

#[cfg(test)]
mod tests {
    use super::*;
    use gputrace_recorder::RecorderConfig;

    fn recorder(dir: &std::path::Path) -> Recorder {
        let mut config = RecorderConfig::with_base_folder(dir);
        config.node_id = "node".to_string();
        config.poll_interval = Duration::from_millis(10);
        Recorder::start(config).unwrap()
    }

    #[test]
    fn test_current_phase_defaults() {
        let phase = CurrentPhase::default();
        assert_eq!(phase.get(), DEFAULT_PHASE);

        let shared = phase.clone();
        shared.set("forward");
        assert_eq!(phase.get(), "forward");
    }

    #[test]
    fn test_start_stop_records_phase() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = recorder(dir.path());
        let mut tracker = PhaseTracker::with_counters(recorder.clone(), None);
        let current = tracker.current_phase();

        tracker.start("forward");
        assert_eq!(current.get(), "forward");
        assert_eq!(tracker.active_phase(), Some("forward"));

        let summary = tracker.stop().unwrap();
        assert_eq!(summary.label, "forward");
        assert!(summary.counters.is_none());
        assert_eq!(current.get(), DEFAULT_PHASE);
        assert_eq!(recorder.stats().written, 1);
    }

    #[test]
    fn test_stop_without_start() {
        let dir = tempfile::tempdir().unwrap();
        let mut tracker = PhaseTracker::with_counters(recorder(dir.path()), None);
        assert!(tracker.stop().is_none());
    }

    #[test]
    fn test_start_closes_previous_phase() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = recorder(dir.path());
        let mut tracker = PhaseTracker::with_counters(recorder.clone(), None);

        tracker.start("forward");
        tracker.start("backward");
        assert_eq!(tracker.active_phase(), Some("backward"));
        tracker.stop();

        assert_eq!(recorder.stats().written, 2);
    }
}

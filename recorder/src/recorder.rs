//! The recorder handle producers call into

use crate::clock::{Clock, SystemClock};
use crate::config::RecorderConfig;
use crate::error::{RecorderError, Result};
use crate::flags::FlagWatcher;
use crate::health::{Health, HealthState};
use crate::layout::TraceLayout;
use crate::metrics;
use crate::queue::{EventQueue, PushOutcome};
use crate::writer::WriterLoop;
use gputrace_shared::utils::thread::current_thread_id;
use gputrace_shared::{Phase, Pid, Record, Tid};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{error, info};

/// Why records were discarded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DropReason {
    Overflow,
    Unhealthy,
    OpenFailure,
    Shutdown,
}

impl DropReason {
    fn as_str(self) -> &'static str {
        match self {
            DropReason::Overflow => "overflow",
            DropReason::Unhealthy => "unhealthy",
            DropReason::OpenFailure => "open_failure",
            DropReason::Shutdown => "shutdown",
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub enqueued: AtomicU64,
    pub written: AtomicU64,
    pub dropped_overflow: AtomicU64,
    pub dropped_unhealthy: AtomicU64,
    pub dropped_open_failure: AtomicU64,
    pub dropped_shutdown: AtomicU64,
    pub malformed_args: AtomicU64,
    pub rotations: AtomicU64,
    pub open_failures: AtomicU64,
}

/// State shared between producers, the handle and the writer thread
#[derive(Debug)]
pub(crate) struct Shared {
    pub queue: EventQueue,
    pub health: HealthState,
    pub shutdown_requested: AtomicBool,
    pub extended_metrics: AtomicBool,
    pub counters: Counters,
    pub session_start_micros: u64,
    /// Records that left the queue by being written or dropped
    settled: AtomicU64,
    /// Set once the writer thread has finished
    writer_done: Mutex<bool>,
    progress: Condvar,
}

impl Shared {
    fn new(queue: EventQueue, session_start_micros: u64) -> Self {
        Self {
            queue,
            health: HealthState::new(),
            shutdown_requested: AtomicBool::new(false),
            extended_metrics: AtomicBool::new(false),
            counters: Counters::default(),
            session_start_micros,
            settled: AtomicU64::new(0),
            writer_done: Mutex::new(false),
            progress: Condvar::new(),
        }
    }

    fn lock_done(&self) -> MutexGuard<'_, bool> {
        self.writer_done.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Count `n` queued records as settled and wake anyone in `flush`
    pub(crate) fn settle(&self, n: u64) {
        if n > 0 {
            self.settled.fetch_add(n, Ordering::SeqCst);
        }
        self.notify_progress();
    }

    pub(crate) fn notify_progress(&self) {
        let _done = self.lock_done();
        self.progress.notify_all();
    }

    fn writer_finished(&self) -> bool {
        *self.lock_done()
    }

    pub(crate) fn mark_writer_done(&self) {
        *self.lock_done() = true;
        self.progress.notify_all();
    }

    pub(crate) fn count_dropped(&self, reason: DropReason, n: u64) {
        if n == 0 {
            return;
        }
        let counter = match reason {
            DropReason::Overflow => &self.counters.dropped_overflow,
            DropReason::Unhealthy => &self.counters.dropped_unhealthy,
            DropReason::OpenFailure => &self.counters.dropped_open_failure,
            DropReason::Shutdown => &self.counters.dropped_shutdown,
        };
        counter.fetch_add(n, Ordering::Relaxed);
        metrics::record_dropped(reason.as_str(), n);
    }

    /// How records abandoned after the writer stopped are counted
    pub(crate) fn abandon_reason(&self) -> DropReason {
        match self.health.get() {
            Health::Healthy | Health::ShutDown => DropReason::Shutdown,
            Health::OpenFailures | Health::StreamFailure => DropReason::Unhealthy,
        }
    }

    /// Discard everything still queued
    pub(crate) fn discard_pending(&self, reason: DropReason) -> u64 {
        let n = self.queue.clear() as u64;
        self.count_dropped(reason, n);
        if n > 0 {
            self.settled.fetch_add(n, Ordering::SeqCst);
        }
        n
    }
}

/// Point-in-time counters for one recorder
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecorderStats {
    pub health: Health,
    pub extended_metrics: bool,
    pub enqueued: u64,
    pub written: u64,
    pub dropped_overflow: u64,
    pub dropped_unhealthy: u64,
    pub dropped_open_failure: u64,
    pub dropped_shutdown: u64,
    pub malformed_args: u64,
    pub rotations: u64,
    pub open_failures: u64,
    pub queue_depth: usize,
}

impl RecorderStats {
    /// Every record that was accepted and then discarded
    pub fn dropped_total(&self) -> u64 {
        self.dropped_overflow
            + self.dropped_unhealthy
            + self.dropped_open_failure
            + self.dropped_shutdown
    }
}

#[derive(Debug)]
struct Inner {
    shared: Arc<Shared>,
    layout: TraceLayout,
    writer: Mutex<Option<JoinHandle<()>>>,
}

impl Inner {
    fn shutdown(&self) {
        let handle = self
            .writer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(handle) = handle else {
            return;
        };

        self.shared.shutdown_requested.store(true, Ordering::SeqCst);
        self.shared.queue.close();

        if handle.join().is_err() {
            error!("Trace writer thread panicked");
            self.shared.health.mark(Health::StreamFailure);
            self.shared.discard_pending(DropReason::Unhealthy);
            self.shared.mark_writer_done();
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Handle to a running trace recorder.
///
/// Cloning is cheap; all clones share one queue and one writer thread. The
/// writer is stopped by [`Recorder::shutdown`] or when the last clone is
/// dropped, whichever comes first.
#[derive(Debug, Clone)]
pub struct Recorder {
    inner: Arc<Inner>,
}

impl Recorder {
    /// Start a recorder writing under `config.base_folder`.
    ///
    /// Directories and files are created lazily by the writer thread, so a
    /// broken output location shows up as an unhealthy recorder rather than
    /// as an error here.
    pub fn start(config: RecorderConfig) -> Result<Self> {
        Self::start_with_clock(config, Arc::new(SystemClock))
    }

    /// Start a recorder whose rotation decisions follow `clock`
    pub fn start_with_clock(config: RecorderConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;

        let layout = TraceLayout::new(
            config.base_folder.clone(),
            config.node_id.clone(),
            std::process::id(),
        );
        let flags = FlagWatcher::new(config.start_flag_path(), config.end_flag_path());
        let queue = EventQueue::new(config.max_queue_depth, config.overflow_policy);

        let shared = Arc::new(Shared::new(queue, clock.now_micros()));
        shared.extended_metrics.store(flags.poll(), Ordering::Relaxed);

        let writer = WriterLoop::new(shared.clone(), clock, layout.clone(), flags, &config);
        let handle = std::thread::Builder::new()
            .name("gputrace-writer".to_string())
            .spawn(move || writer.run())
            .map_err(RecorderError::ThreadSpawn)?;

        info!(
            "Trace recorder started (base={}, node={})",
            layout.base_folder().display(),
            layout.node_id()
        );

        Ok(Self {
            inner: Arc::new(Inner {
                shared,
                layout,
                writer: Mutex::new(Some(handle)),
            }),
        })
    }

    fn shared(&self) -> &Shared {
        &self.inner.shared
    }

    /// Queue one event for the writer thread.
    ///
    /// Never performs file I/O and never fails; records that cannot be kept
    /// are dropped and counted.
    #[allow(clippy::too_many_arguments)]
    pub fn record_event(
        &self,
        group: &str,
        phase: Phase,
        label: &str,
        extra_fields: &str,
        start_offset_micros: i64,
        duration_micros: u64,
        thread_id: Tid,
        process_id: Pid,
    ) {
        let shared = self.shared();
        if !shared.health.is_healthy() {
            shared.count_dropped(DropReason::Unhealthy, 1);
            return;
        }

        let record = Record::event(
            shared.session_start_micros,
            group,
            phase,
            label,
            extra_fields,
            start_offset_micros,
            duration_micros,
            thread_id,
            process_id,
        );

        match shared.queue.push(record) {
            PushOutcome::Queued => {
                shared.counters.enqueued.fetch_add(1, Ordering::Relaxed);
            }
            PushOutcome::QueuedDroppingOldest => {
                shared.counters.enqueued.fetch_add(1, Ordering::Relaxed);
                shared.count_dropped(DropReason::Overflow, 1);
                shared.settled.fetch_add(1, Ordering::SeqCst);
            }
            PushOutcome::Rejected => {
                shared.count_dropped(DropReason::Overflow, 1);
            }
        }

        // The writer may have exited between the health check and the push
        if !shared.health.is_healthy() && shared.writer_finished() {
            shared.discard_pending(DropReason::Unhealthy);
        }
    }

    /// Record a complete event for the calling thread from an absolute
    /// epoch-microsecond start time.
    pub fn record_complete(
        &self,
        group: &str,
        label: &str,
        start_micros: u64,
        duration_micros: u64,
        extra_fields: &str,
    ) {
        self.record_event(
            group,
            Phase::Complete,
            label,
            extra_fields,
            self.offset_from_start(start_micros),
            duration_micros,
            current_thread_id(),
            std::process::id(),
        );
    }

    /// Convert an epoch-microsecond timestamp into a session offset
    pub fn offset_from_start(&self, epoch_micros: u64) -> i64 {
        let offset = epoch_micros as i128 - self.shared().session_start_micros as i128;
        offset.clamp(i64::MIN as i128, i64::MAX as i128) as i64
    }

    pub fn is_healthy(&self) -> bool {
        self.shared().health.is_healthy()
    }

    pub fn health(&self) -> Health {
        self.shared().health.get()
    }

    /// Whether the extended-metrics flag files currently request collection
    pub fn should_collect_extended_metrics(&self) -> bool {
        self.shared().extended_metrics.load(Ordering::Relaxed)
    }

    /// Epoch micros all record offsets are relative to
    pub fn session_start_micros(&self) -> u64 {
        self.shared().session_start_micros
    }

    pub fn layout(&self) -> &TraceLayout {
        &self.inner.layout
    }

    pub fn stats(&self) -> RecorderStats {
        let shared = self.shared();
        let c = &shared.counters;
        RecorderStats {
            health: shared.health.get(),
            extended_metrics: shared.extended_metrics.load(Ordering::Relaxed),
            enqueued: c.enqueued.load(Ordering::Relaxed),
            written: c.written.load(Ordering::Relaxed),
            dropped_overflow: c.dropped_overflow.load(Ordering::Relaxed),
            dropped_unhealthy: c.dropped_unhealthy.load(Ordering::Relaxed),
            dropped_open_failure: c.dropped_open_failure.load(Ordering::Relaxed),
            dropped_shutdown: c.dropped_shutdown.load(Ordering::Relaxed),
            malformed_args: c.malformed_args.load(Ordering::Relaxed),
            rotations: c.rotations.load(Ordering::Relaxed),
            open_failures: c.open_failures.load(Ordering::Relaxed),
            queue_depth: shared.queue.len(),
        }
    }

    /// Wait until every record queued before this call has been written or
    /// dropped. Returns false on timeout.
    pub fn flush(&self, timeout: Duration) -> bool {
        let shared = self.shared();
        let target = shared.queue.pushed_total();
        let deadline = Instant::now() + timeout;

        let mut done = shared.lock_done();
        loop {
            if shared.settled.load(Ordering::SeqCst) >= target {
                return true;
            }
            if *done {
                drop(done);
                shared.discard_pending(shared.abandon_reason());
                return shared.settled.load(Ordering::SeqCst) >= target;
            }

            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            done = shared
                .progress
                .wait_timeout(done, deadline - now)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|e| e.into_inner().0);
        }
    }

    /// Stop the writer thread, closing and renaming the active file.
    /// Idempotent; later calls return immediately.
    pub fn shutdown(&self) {
        self.inner.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    // 2021-03-04T05:06:07Z
    const START: u64 = 1_614_834_367_000_000;

    fn start(dir: &std::path::Path) -> (Recorder, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(START));
        let mut config = RecorderConfig::from_lookup(|_| None);
        config.base_folder = dir.to_path_buf();
        config.node_id = "node".to_string();
        config.poll_interval = Duration::from_millis(10);
        let recorder = Recorder::start_with_clock(config, clock.clone()).unwrap();
        (recorder, clock)
    }

    #[test]
    fn test_offset_from_start() {
        let dir = tempfile::tempdir().unwrap();
        let (recorder, _clock) = start(dir.path());

        assert_eq!(recorder.session_start_micros(), START);
        assert_eq!(recorder.offset_from_start(START + 250), 250);
        assert_eq!(recorder.offset_from_start(START - 250), -250);
    }

    #[test]
    fn test_flush_then_stats() {
        let dir = tempfile::tempdir().unwrap();
        let (recorder, _clock) = start(dir.path());

        for i in 0..10 {
            recorder.record_event("g", Phase::Complete, "op", "", i, 1, 1, 1);
        }
        assert!(recorder.flush(Duration::from_secs(5)));

        let stats = recorder.stats();
        assert_eq!(stats.enqueued, 10);
        assert_eq!(stats.written, 10);
        assert_eq!(stats.queue_depth, 0);
        assert_eq!(stats.dropped_total(), 0);
        assert_eq!(stats.health, Health::Healthy);
    }

    #[test]
    fn test_records_after_shutdown_are_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let (recorder, _clock) = start(dir.path());

        recorder.shutdown();
        recorder.shutdown();
        assert_eq!(recorder.health(), Health::ShutDown);

        recorder.record_event("g", Phase::Complete, "late", "", 0, 1, 1, 1);
        let stats = recorder.stats();
        assert_eq!(stats.dropped_unhealthy, 1);
        assert_eq!(stats.queue_depth, 0);
        assert!(recorder.flush(Duration::from_millis(10)));
    }

    #[test]
    fn test_clones_share_one_writer() {
        let dir = tempfile::tempdir().unwrap();
        let (recorder, _clock) = start(dir.path());
        let other = recorder.clone();

        other.record_event("g", Phase::Instant, "mark", "", 0, 0, 1, 1);
        drop(other);

        assert!(recorder.is_healthy());
        assert!(recorder.flush(Duration::from_secs(5)));
        assert_eq!(recorder.stats().written, 1);
    }
}

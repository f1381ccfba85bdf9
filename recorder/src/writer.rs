//! The background writer thread
//!
//! One writer owns the active [`FileSession`]. Each iteration it refreshes
//! the extended-metrics flag, rotates the file when the policy says so, waits
//! briefly for records and appends whatever it drained.

use crate::clock::Clock;
use crate::config::RecorderConfig;
use crate::flags::FlagWatcher;
use crate::health::Health;
use crate::layout::TraceLayout;
use crate::metrics::{MALFORMED_ARGS, OPEN_FAILURES, QUEUE_DEPTH, RECORDS_WRITTEN, ROTATIONS};
use crate::recorder::{DropReason, Shared};
use crate::rotation::{rotation_reason, RotationPolicy, RotationReason};
use crate::session::FileSession;
use gputrace_shared::Record;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// A closed trace file whose final rename failed
struct Unpublished {
    path: PathBuf,
    watermark_micros: u64,
}

pub(crate) struct WriterLoop {
    shared: Arc<Shared>,
    clock: Arc<dyn Clock>,
    layout: TraceLayout,
    flags: FlagWatcher,
    policy: RotationPolicy,
    session: Option<FileSession>,
    unpublished: Vec<Unpublished>,
    /// Consecutive failed opens/renames
    open_failures: u32,
    open_failure_threshold: u32,
    /// Latest `end_absolute_micros` written; names the file on rotation
    watermark_micros: u64,
    poll_interval: Duration,
    batch_size: usize,
    drain_on_shutdown: bool,
}

impl WriterLoop {
    pub(crate) fn new(
        shared: Arc<Shared>,
        clock: Arc<dyn Clock>,
        layout: TraceLayout,
        flags: FlagWatcher,
        config: &RecorderConfig,
    ) -> Self {
        let watermark_micros = shared.session_start_micros;
        Self {
            shared,
            clock,
            layout,
            flags,
            policy: RotationPolicy::new(config.max_file_size, config.rotation_interval),
            session: None,
            unpublished: Vec::new(),
            open_failures: 0,
            open_failure_threshold: config.open_failure_threshold,
            watermark_micros,
            poll_interval: config.poll_interval,
            batch_size: config.batch_size,
            drain_on_shutdown: config.drain_on_shutdown,
        }
    }

    pub(crate) fn run(mut self) {
        debug!("Trace writer started");

        while self.shared.health.is_healthy()
            && !self.shared.shutdown_requested.load(Ordering::SeqCst)
        {
            self.refresh_flags();
            self.rotate_if_due();

            let batch = self
                .shared
                .queue
                .wait_and_drain(self.poll_interval, self.batch_size);
            QUEUE_DEPTH.set(self.shared.queue.len() as f64);

            if batch.is_empty() {
                self.shared.notify_progress();
            } else {
                let n = batch.len() as u64;
                self.write_batch(&batch);
                self.shared.settle(n);
            }
        }

        self.finish();
    }

    fn refresh_flags(&mut self) {
        let enabled = self.flags.poll();
        let previous = self.shared.extended_metrics.swap(enabled, Ordering::Relaxed);
        if previous != enabled {
            info!(
                "Extended metrics {}",
                if enabled { "enabled" } else { "disabled" }
            );
        }
    }

    fn rotate_if_due(&mut self) {
        let now = self.clock.now_micros();
        let reason = self
            .session
            .as_ref()
            .and_then(|session| rotation_reason(&session.stats(), now, &self.policy));
        if let Some(reason) = reason {
            self.rotate(Some(reason));
        }
    }

    /// Close the active file and move it to its final name.
    /// `reason` is None for the final close at shutdown.
    fn rotate(&mut self, reason: Option<RotationReason>) {
        self.publish_unpublished();

        let Some(session) = self.session.take() else {
            return;
        };

        let path = session.path().to_path_buf();
        let target = self.layout.unique_final_path(self.watermark_micros);
        match session.close_and_rename(&target) {
            Ok(()) => {
                self.open_failures = 0;
                match reason {
                    Some(reason) => {
                        info!("Rotated trace file to {} ({})", target.display(), reason);
                        self.shared.counters.rotations.fetch_add(1, Ordering::Relaxed);
                        ROTATIONS.with_label_values(&[reason.as_str()]).inc();
                    }
                    None => info!("Closed trace file {}", target.display()),
                }
            }
            Err(e) => {
                warn!(
                    "Failed to rename trace file to {}: {}",
                    target.display(),
                    e
                );
                self.set_aside(path);
                self.on_open_failure();
            }
        }
    }

    /// Move a closed file whose rename failed out of the way of the next
    /// open. It is published later under the watermark it was closed with.
    fn set_aside(&mut self, path: PathBuf) {
        let aside = self.layout.unique_aside_path();
        let path = match fs::rename(&path, &aside) {
            Ok(()) => {
                debug!("Moved unpublished trace file to {}", aside.display());
                aside
            }
            Err(e) => {
                warn!("Failed to move {} aside: {}", path.display(), e);
                path
            }
        };
        self.unpublished.push(Unpublished {
            path,
            watermark_micros: self.watermark_micros,
        });
    }

    /// Retry the final rename of files set aside earlier, oldest first
    fn publish_unpublished(&mut self) {
        if self.unpublished.is_empty() {
            return;
        }

        let layout = &self.layout;
        self.unpublished.retain(|file| {
            let target = layout.unique_final_path(file.watermark_micros);
            let renamed = match target.parent() {
                Some(parent) => fs::create_dir_all(parent),
                None => Ok(()),
            }
            .and_then(|()| fs::rename(&file.path, &target));

            match renamed {
                Ok(()) => {
                    info!("Published trace file {}", target.display());
                    false
                }
                Err(e) => {
                    debug!("Trace file {} still unpublished: {}", file.path.display(), e);
                    true
                }
            }
        });
    }

    fn open_session(&mut self) -> io::Result<()> {
        self.publish_unpublished();

        // Never truncate a file that still holds unpublished records
        let temp = self.layout.temp_path();
        if self.unpublished.iter().any(|file| file.path == temp) {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                "previous trace file is still unpublished",
            ));
        }

        let now = self.clock.now_micros();
        let session = FileSession::open(&temp, now, self.shared.session_start_micros)?;
        self.open_failures = 0;
        self.session = Some(session);
        Ok(())
    }

    fn on_open_failure(&mut self) {
        self.open_failures += 1;
        self.shared.counters.open_failures.fetch_add(1, Ordering::Relaxed);
        OPEN_FAILURES.inc();

        if self.open_failures > self.open_failure_threshold
            && self.shared.health.mark(Health::OpenFailures)
        {
            error!(
                "Giving up on trace output after {} consecutive file failures",
                self.open_failures
            );
            self.shared.discard_pending(DropReason::Unhealthy);
        }
    }

    /// Append one batch. Failures are absorbed into counters and health.
    fn write_batch(&mut self, batch: &[Record]) {
        self.rotate_if_due();

        if self.session.is_none() {
            if let Err(e) = self.open_session() {
                warn!(
                    "Failed to open trace file {}: {}",
                    self.layout.temp_path().display(),
                    e
                );
                self.shared
                    .count_dropped(DropReason::OpenFailure, batch.len() as u64);
                self.on_open_failure();
                return;
            }
        }

        let Some(session) = self.session.as_mut() else {
            return;
        };

        match session.append(batch) {
            Ok(summary) => {
                let written = summary.records as u64;
                self.shared.counters.written.fetch_add(written, Ordering::Relaxed);
                RECORDS_WRITTEN.inc_by(written as f64);

                if summary.malformed_args > 0 {
                    let malformed = summary.malformed_args as u64;
                    self.shared
                        .counters
                        .malformed_args
                        .fetch_add(malformed, Ordering::Relaxed);
                    MALFORMED_ARGS.inc_by(malformed as f64);
                }

                if let Some(latest) = batch.iter().map(|r| r.end_absolute_micros).max() {
                    self.watermark_micros = self.watermark_micros.max(latest);
                }
            }
            Err(e) => {
                error!(
                    "Failed to write trace file {}: {}",
                    session.path().display(),
                    e
                );
                // The file may now be truncated mid-object; leave it at the
                // temporary path rather than publishing it.
                self.session = None;
                self.shared.health.mark(Health::StreamFailure);
                self.shared
                    .count_dropped(DropReason::Unhealthy, batch.len() as u64);
                self.shared.discard_pending(DropReason::Unhealthy);
            }
        }
    }

    fn finish(mut self) {
        let was_healthy = self.shared.health.mark(Health::ShutDown);

        if was_healthy && self.drain_on_shutdown {
            loop {
                let batch = self.shared.queue.drain_batch(self.batch_size);
                if batch.is_empty() {
                    break;
                }
                let n = batch.len() as u64;
                self.write_batch(&batch);
                self.shared.settle(n);
            }
        }

        let abandoned = self.shared.discard_pending(self.shared.abandon_reason());
        if abandoned > 0 {
            warn!("Dropped {} queued records at shutdown", abandoned);
        }

        self.rotate(None);
        QUEUE_DEPTH.set(0.0);

        debug!("Trace writer stopped ({})", self.shared.health.get());
        self.shared.mark_writer_done();
    }
}

//! Process-wide recorder for call sites that cannot be handed a [`Recorder`].
//!
//! Statics are never dropped, so the host must call [`shutdown`] to close
//! and rename the last trace file. `gputrace_gpu::finish` does this for
//! hosts driving the recorder through the phase hooks.

use crate::config::RecorderConfig;
use crate::error::{RecorderError, Result};
use crate::recorder::Recorder;
use gputrace_shared::{Phase, Pid, Tid};
use once_cell::sync::Lazy;
use std::sync::{PoisonError, RwLock};

static GLOBAL: Lazy<RwLock<Option<Recorder>>> = Lazy::new(|| RwLock::new(None));

/// Start the process-wide recorder. Fails if one is already running.
pub fn init(config: RecorderConfig) -> Result<Recorder> {
    let mut slot = GLOBAL.write().unwrap_or_else(PoisonError::into_inner);
    if slot.is_some() {
        return Err(RecorderError::AlreadyInitialized);
    }
    let recorder = Recorder::start(config)?;
    *slot = Some(recorder.clone());
    Ok(recorder)
}

/// The process-wide recorder, if one is running
pub fn get() -> Option<Recorder> {
    GLOBAL
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
}

/// The process-wide recorder, starting one from the environment if needed
pub fn get_or_init() -> Result<Recorder> {
    if let Some(recorder) = get() {
        return Ok(recorder);
    }

    let mut slot = GLOBAL.write().unwrap_or_else(PoisonError::into_inner);
    if let Some(recorder) = slot.as_ref() {
        return Ok(recorder.clone());
    }
    let recorder = Recorder::start(RecorderConfig::from_env())?;
    *slot = Some(recorder.clone());
    Ok(recorder)
}

/// Record on the process-wide recorder; a no-op when none is running
#[allow(clippy::too_many_arguments)]
pub fn record_event(
    group: &str,
    phase: Phase,
    label: &str,
    extra_fields: &str,
    start_offset_micros: i64,
    duration_micros: u64,
    thread_id: Tid,
    process_id: Pid,
) {
    // Clone out of the lock so nested calls never contend on it
    if let Some(recorder) = get() {
        recorder.record_event(
            group,
            phase,
            label,
            extra_fields,
            start_offset_micros,
            duration_micros,
            thread_id,
            process_id,
        );
    }
}

/// Stop and forget the process-wide recorder. A later [`init`] starts a
/// fresh one.
pub fn shutdown() {
    let recorder = GLOBAL
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .take();
    if let Some(recorder) = recorder {
        recorder.shutdown();
    }
}

//! Trace recorder
//!
//! Producers on any thread hand timestamped records to a [`Recorder`]; a
//! single background thread serializes them into Chrome trace-event JSON
//! files and rotates those files by UTC hour, size and age. The file on disk
//! is a valid JSON array after every append.
//!
//! ```no_run
//! use gputrace_recorder::{Phase, Recorder, RecorderConfig};
//!
//! let recorder = Recorder::start(RecorderConfig::with_base_folder("/tmp/traces"))?;
//! recorder.record_event("kernelA", Phase::Complete, "matmul", "", 500, 200, 7, 42);
//! recorder.shutdown();
//! # Ok::<(), gputrace_recorder::RecorderError>(())
//! ```

pub mod clock;
pub mod config;
pub mod error;
pub mod flags;
pub mod format;
pub mod global;
pub mod health;
pub mod layout;
pub mod metrics;
pub mod queue;
pub mod recorder;
pub mod rotation;
pub mod session;
mod writer;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{OverflowPolicy, RecorderConfig};
pub use error::{RecorderError, Result};
pub use health::Health;
pub use layout::{list_trace_files, TraceLayout};
pub use recorder::{Recorder, RecorderStats};
pub use rotation::{RotationPolicy, RotationReason};

pub use gputrace_shared::{Phase, Record, RecordKind};

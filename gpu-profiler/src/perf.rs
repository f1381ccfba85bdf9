//! Host software counters (task clock, context switches) for this process
//!
//! Counters are opened once with `perf_event_open` and inherited by threads
//! spawned afterwards; phases take snapshots and report deltas.

use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PerfError {
    #[error("perf_event_open failed for {counter}: {source}")]
    Open {
        counter: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read {counter}: {source}")]
    Read {
        counter: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("perf counters are only available on Linux")]
    Unsupported,
}

/// Counter values at one instant
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PerfSnapshot {
    pub task_clock_ns: u64,
    pub context_switches: u64,
}

impl PerfSnapshot {
    /// Counts accumulated since `earlier`
    pub fn since(&self, earlier: &PerfSnapshot) -> PerfSnapshot {
        PerfSnapshot {
            task_clock_ns: self.task_clock_ns.saturating_sub(earlier.task_clock_ns),
            context_switches: self
                .context_switches
                .saturating_sub(earlier.context_switches),
        }
    }

    /// `"task_clock_ns":N,"context_switches":M`, ready for a record's args
    pub fn extra_fields(&self) -> String {
        format!(
            "\"task_clock_ns\":{},\"context_switches\":{}",
            self.task_clock_ns, self.context_switches
        )
    }
}

#[cfg(target_os = "linux")]
mod sys {
    use libc::{c_int, c_ulong, pid_t, syscall, SYS_perf_event_open};

    pub const PERF_TYPE_SOFTWARE: u32 = 1;
    pub const PERF_COUNT_SW_TASK_CLOCK: u64 = 1;
    pub const PERF_COUNT_SW_CONTEXT_SWITCHES: u64 = 3;

    pub const PERF_ATTR_FLAG_INHERIT: u64 = 1 << 1;
    pub const PERF_ATTR_FLAG_EXCLUDE_KERNEL: u64 = 1 << 5;
    pub const PERF_ATTR_FLAG_EXCLUDE_HV: u64 = 1 << 6;

    pub const PERF_FLAG_FD_CLOEXEC: c_ulong = 1 << 3;

    #[repr(C)]
    #[derive(Debug, Default)]
    pub struct PerfEventAttr {
        pub type_: u32,
        pub size: u32,
        pub config: u64,
        pub sample_period_or_freq: u64,
        pub sample_type: u64,
        pub read_format: u64,
        pub flags: u64,
        pub wakeup_events_or_watermark: u32,
        pub bp_type: u32,
        pub bp_addr_or_config1: u64,
        pub bp_len_or_config2: u64,
        pub branch_sample_type: u64,
        pub sample_regs_user: u64,
        pub sample_stack_user: u32,
        pub clock_id: i32,
        pub sample_regs_intr: u64,
        pub aux_watermark: u32,
        pub sample_max_stack: u16,
        pub reserved_2: u16,
        pub aux_sample_size: u32,
        pub reserved_3: u32,
    }

    pub fn perf_event_open(
        attr: &PerfEventAttr,
        pid: pid_t,
        cpu: c_int,
        group_fd: c_int,
        flags: c_ulong,
    ) -> c_int {
        // SAFETY: attr is a valid, fully initialized perf_event_attr
        unsafe {
            syscall(
                SYS_perf_event_open,
                attr as *const PerfEventAttr as *const libc::c_void,
                pid,
                cpu,
                group_fd,
                flags,
            ) as c_int
        }
    }
}

#[cfg(target_os = "linux")]
mod imp {
    use super::sys::*;
    use super::{PerfError, PerfSnapshot};
    use std::fs::File;
    use std::io::Read;
    use std::os::fd::FromRawFd;

    #[derive(Debug)]
    pub struct PerfCounters {
        task_clock: File,
        context_switches: File,
    }

    fn open_counter(counter: &'static str, config: u64) -> Result<File, PerfError> {
        let attr = PerfEventAttr {
            type_: PERF_TYPE_SOFTWARE,
            size: std::mem::size_of::<PerfEventAttr>() as u32,
            config,
            flags: PERF_ATTR_FLAG_INHERIT
                | PERF_ATTR_FLAG_EXCLUDE_KERNEL
                | PERF_ATTR_FLAG_EXCLUDE_HV,
            ..Default::default()
        };

        // This process, any CPU, no group
        let fd = perf_event_open(&attr, 0, -1, -1, PERF_FLAG_FD_CLOEXEC);
        if fd < 0 {
            return Err(PerfError::Open {
                counter,
                source: std::io::Error::last_os_error(),
            });
        }
        // SAFETY: fd was just returned by the kernel and is owned by nobody else
        Ok(unsafe { File::from_raw_fd(fd) })
    }

    fn read_counter(counter: &'static str, mut file: &File) -> Result<u64, PerfError> {
        let mut buf = [0u8; 8];
        file.read_exact(&mut buf)
            .map_err(|source| PerfError::Read { counter, source })?;
        Ok(u64::from_ne_bytes(buf))
    }

    impl PerfCounters {
        pub fn open() -> Result<Self, PerfError> {
            Ok(Self {
                task_clock: open_counter("task-clock", PERF_COUNT_SW_TASK_CLOCK)?,
                context_switches: open_counter(
                    "context-switches",
                    PERF_COUNT_SW_CONTEXT_SWITCHES,
                )?,
            })
        }

        pub fn read(&self) -> Result<PerfSnapshot, PerfError> {
            Ok(PerfSnapshot {
                task_clock_ns: read_counter("task-clock", &self.task_clock)?,
                context_switches: read_counter("context-switches", &self.context_switches)?,
            })
        }
    }
}

#[cfg(not(target_os = "linux"))]
mod imp {
    use super::{PerfError, PerfSnapshot};

    #[derive(Debug)]
    pub struct PerfCounters {
        _private: (),
    }

    impl PerfCounters {
        pub fn open() -> Result<Self, PerfError> {
            Err(PerfError::Unsupported)
        }

        pub fn read(&self) -> Result<PerfSnapshot, PerfError> {
            Err(PerfError::Unsupported)
        }
    }
}

/// Open task-clock and context-switch counters for the current process
pub use imp::PerfCounters;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_delta() {
        let before = PerfSnapshot {
            task_clock_ns: 1_000,
            context_switches: 4,
        };
        let after = PerfSnapshot {
            task_clock_ns: 5_000,
            context_switches: 3,
        };

        assert_eq!(
            after.since(&before),
            PerfSnapshot {
                task_clock_ns: 4_000,
                context_switches: 0
            }
        );
    }

    #[test]
    fn test_extra_fields_is_valid_json_body() {
        let snapshot = PerfSnapshot {
            task_clock_ns: 12,
            context_switches: 3,
        };
        let value: serde_json::Value =
            serde_json::from_str(&format!("{{{}}}", snapshot.extra_fields())).unwrap();
        assert_eq!(value["task_clock_ns"], 12);
        assert_eq!(value["context_switches"], 3);
    }

    #[test]
    fn test_counters_read_monotonic_when_available() {
        // perf_event_open is commonly blocked in containers
        let counters = match PerfCounters::open() {
            Ok(counters) => counters,
            Err(_) => return,
        };

        let first = counters.read().unwrap();
        let mut x = 0u64;
        for i in 0..1_000_000u64 {
            x = x.wrapping_add(i * i);
        }
        std::hint::black_box(x);
        let second = counters.read().unwrap();

        assert!(second.task_clock_ns >= first.task_clock_ns);
        assert!(second.context_switches >= first.context_switches);
    }
}

//! Decoded GPU activity records and their conversion into trace events

use crate::metrics::GpuMetricAggregator;
use crate::phase::CurrentPhase;
use gputrace_recorder::{Phase, Recorder};
use serde::Serialize;
use serde_json::{json, Value};
use std::fmt;
use std::sync::{Mutex, PoisonError};

/// Direction of a memory copy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum MemcpyKind {
    HostToDevice,
    DeviceToHost,
    HostToHost,
    DeviceToDevice,
    PeerToPeer,
    Unknown,
}

impl MemcpyKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MemcpyKind::HostToDevice => "HtoD",
            MemcpyKind::DeviceToHost => "DtoH",
            MemcpyKind::HostToHost => "HtoH",
            MemcpyKind::DeviceToDevice => "DtoD",
            MemcpyKind::PeerToPeer => "PtoP",
            MemcpyKind::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for MemcpyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a synchronization record waited on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SyncKind {
    EventSynchronize,
    StreamWaitEvent,
    StreamSynchronize,
    ContextSynchronize,
    Unknown,
}

impl SyncKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SyncKind::EventSynchronize => "EventSynchronize",
            SyncKind::StreamWaitEvent => "StreamWaitEvent",
            SyncKind::StreamSynchronize => "StreamSynchronize",
            SyncKind::ContextSynchronize => "ContextSynchronize",
            SyncKind::Unknown => "Synchronize",
        }
    }
}

/// A kernel execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelLaunch {
    pub name: String,
    pub device_id: u32,
    pub context_id: u32,
    pub correlation_id: u32,
    pub grid: [u32; 3],
    pub block: [u32; 3],
    pub static_shared_memory: u32,
    pub dynamic_shared_memory: u32,
    /// Reported through the concurrent-kernel activity stream
    pub concurrent: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActivityKind {
    Kernel(KernelLaunch),
    Memcpy {
        kind: MemcpyKind,
        bytes: u64,
        device_id: u32,
        context_id: u32,
        correlation_id: u32,
    },
    Memset {
        value: u32,
        bytes: u64,
        device_id: u32,
        context_id: u32,
        correlation_id: u32,
    },
    DriverApi {
        name: String,
        cbid: u32,
        correlation_id: u32,
    },
    RuntimeApi {
        name: String,
        cbid: u32,
        correlation_id: u32,
    },
    Synchronization {
        kind: SyncKind,
        context_id: u32,
        event_id: u32,
        correlation_id: u32,
    },
}

/// One decoded activity record with GPU timestamps in epoch nanoseconds
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GpuActivity {
    pub start_ns: u64,
    pub end_ns: u64,
    /// Stream the activity ran on; API records use the calling thread's stream
    pub stream_id: u32,
    pub kind: ActivityKind,
}

impl GpuActivity {
    pub fn duration_ns(&self) -> u64 {
        self.end_ns.saturating_sub(self.start_ns)
    }

    /// Driver and runtime API calls are only traced with extended metrics on
    pub fn is_api_call(&self) -> bool {
        matches!(
            self.kind,
            ActivityKind::DriverApi { .. } | ActivityKind::RuntimeApi { .. }
        )
    }

    /// Event name used in the trace
    pub fn label(&self) -> String {
        match &self.kind {
            ActivityKind::Kernel(kernel) => kernel.name.clone(),
            ActivityKind::Memcpy { kind, .. } => format!("Memcpy {}", kind),
            ActivityKind::Memset { .. } => "Memset".to_string(),
            ActivityKind::DriverApi { name, .. } | ActivityKind::RuntimeApi { name, .. } => {
                name.clone()
            }
            ActivityKind::Synchronization { kind, .. } => kind.as_str().to_string(),
        }
    }

    /// Activity-specific `args` as a `"key":value` fragment
    pub fn extra_fields(&self) -> String {
        let args = match &self.kind {
            ActivityKind::Kernel(kernel) => json!({
                "device": kernel.device_id,
                "context": kernel.context_id,
                "stream": self.stream_id,
                "correlation": kernel.correlation_id,
                "grid": kernel.grid,
                "block": kernel.block,
                "static_shared_memory": kernel.static_shared_memory,
                "dynamic_shared_memory": kernel.dynamic_shared_memory,
                "concurrent": kernel.concurrent,
            }),
            ActivityKind::Memcpy {
                kind,
                bytes,
                device_id,
                context_id,
                correlation_id,
            } => json!({
                "kind": kind.as_str(),
                "bytes": bytes,
                "device": device_id,
                "context": context_id,
                "stream": self.stream_id,
                "correlation": correlation_id,
            }),
            ActivityKind::Memset {
                value,
                bytes,
                device_id,
                context_id,
                correlation_id,
            } => json!({
                "value": value,
                "bytes": bytes,
                "device": device_id,
                "context": context_id,
                "stream": self.stream_id,
                "correlation": correlation_id,
            }),
            ActivityKind::DriverApi {
                cbid,
                correlation_id,
                ..
            } => json!({"api": "driver", "cbid": cbid, "correlation": correlation_id}),
            ActivityKind::RuntimeApi {
                cbid,
                correlation_id,
                ..
            } => json!({"api": "runtime", "cbid": cbid, "correlation": correlation_id}),
            ActivityKind::Synchronization {
                context_id,
                event_id,
                correlation_id,
                ..
            } => json!({
                "context": context_id,
                "stream": self.stream_id,
                "event": event_id,
                "correlation": correlation_id,
            }),
        };
        object_body(&args)
    }
}

/// `{"a":1,"b":2}` → `"a":1,"b":2`
fn object_body(value: &Value) -> String {
    let text = value.to_string();
    text.strip_prefix('{')
        .and_then(|t| t.strip_suffix('}'))
        .unwrap_or_default()
        .to_string()
}

/// Anything that hands out decoded activity records in completion order
pub trait ActivitySource {
    fn take_activities(&mut self) -> Vec<GpuActivity>;
}

impl ActivitySource for Vec<GpuActivity> {
    fn take_activities(&mut self) -> Vec<GpuActivity> {
        std::mem::take(self)
    }
}

/// Turns activity records into complete events in the current phase group
#[derive(Debug)]
pub struct ActivityTracer {
    recorder: Recorder,
    phase: CurrentPhase,
    totals: Mutex<GpuMetricAggregator>,
}

impl ActivityTracer {
    pub fn new(recorder: Recorder, phase: CurrentPhase) -> Self {
        Self {
            recorder,
            phase,
            totals: Mutex::new(GpuMetricAggregator::new()),
        }
    }

    /// Record one activity. Returns false when it was filtered out.
    pub fn record(&self, activity: &GpuActivity) -> bool {
        if activity.is_api_call() && !self.recorder.should_collect_extended_metrics() {
            return false;
        }

        let start_micros = activity.start_ns / 1_000;
        self.recorder.record_event(
            &self.phase.get(),
            Phase::Complete,
            &activity.label(),
            &activity.extra_fields(),
            self.recorder.offset_from_start(start_micros),
            activity.duration_ns() / 1_000,
            activity.stream_id as u64,
            std::process::id(),
        );

        self.totals
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .add(activity);
        true
    }

    /// Record every activity `source` currently has, returning how many
    /// were recorded
    pub fn pump<S: ActivitySource + ?Sized>(&self, source: &mut S) -> usize {
        source
            .take_activities()
            .iter()
            .filter(|activity| self.record(activity))
            .count()
    }

    /// Totals over everything recorded so far
    pub fn totals(&self) -> GpuMetricAggregator {
        self.totals
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

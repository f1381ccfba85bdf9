//! Running totals over recorded GPU activity

use crate::activity::{ActivityKind, GpuActivity, MemcpyKind};
use serde::Serialize;
use std::collections::HashMap;

/// Snapshot of [`GpuMetricAggregator`] totals
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GpuSummary {
    pub kernel_count: u64,
    pub kernel_time_ns: u64,
    pub memcpy_count: u64,
    pub memcpy_time_ns: u64,
    /// Bytes copied per direction, keyed by `HtoD`, `DtoH`, ...
    pub memcpy_bytes: HashMap<&'static str, u64>,
    pub memset_count: u64,
    pub memset_bytes: u64,
    pub sync_count: u64,
    pub sync_time_ns: u64,
    pub api_calls: u64,
    /// Time the device spent in kernels, copies and memsets
    pub total_gpu_time_ns: u64,
}

/// Aggregate GPU metrics
#[derive(Debug, Clone, Default)]
pub struct GpuMetricAggregator {
    summary: GpuSummary,
}

impl GpuMetricAggregator {
    /// Create a new aggregator
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one activity into the totals
    pub fn add(&mut self, activity: &GpuActivity) {
        let s = &mut self.summary;
        let duration = activity.duration_ns();

        match &activity.kind {
            ActivityKind::Kernel(_) => {
                s.kernel_count += 1;
                s.kernel_time_ns += duration;
                s.total_gpu_time_ns += duration;
            }
            ActivityKind::Memcpy { kind, bytes, .. } => {
                s.memcpy_count += 1;
                s.memcpy_time_ns += duration;
                *s.memcpy_bytes.entry(kind.as_str()).or_default() += bytes;
                s.total_gpu_time_ns += duration;
            }
            ActivityKind::Memset { bytes, .. } => {
                s.memset_count += 1;
                s.memset_bytes += bytes;
                s.total_gpu_time_ns += duration;
            }
            ActivityKind::Synchronization { .. } => {
                s.sync_count += 1;
                s.sync_time_ns += duration;
            }
            ActivityKind::DriverApi { .. } | ActivityKind::RuntimeApi { .. } => {
                s.api_calls += 1;
            }
        }
    }

    /// Get total GPU time
    pub fn total_gpu_time_ns(&self) -> u64 {
        self.summary.total_gpu_time_ns
    }

    /// Get kernel execution count
    pub fn kernel_count(&self) -> u64 {
        self.summary.kernel_count
    }

    /// Bytes copied in one direction
    pub fn bytes_transferred(&self, kind: MemcpyKind) -> u64 {
        self.summary
            .memcpy_bytes
            .get(kind.as_str())
            .copied()
            .unwrap_or(0)
    }

    pub fn summary(&self) -> &GpuSummary {
        &self.summary
    }

    pub fn reset(&mut self) {
        self.summary = GpuSummary::default();
    }
}

//! Synthetic GPU workload
//!
//! Runs a few training-style phases. Each phase launches host threads that
//! record CPU-side spans and feeds the activity tracer a fake stream of
//! copies, kernels and API calls, then prints what the recorder did.

use crate::output;
use anyhow::{Context, Result};
use clap::Args;
use gputrace_gpu::{
    ActivityKind, GpuActivity, KernelLaunch, MemcpyKind, PhaseTracker, SyncKind,
};
use gputrace_recorder::{
    list_trace_files, metrics::encode_metrics, Health, Recorder, RecorderConfig,
};
use gputrace_shared::utils::time::{system_time_micros, system_time_nanos};
use std::thread;
use std::time::Duration;
use tracing::info;

const PHASES: [&str; 3] = ["forward", "backward", "optimizer"];

#[derive(Args, Debug)]
pub struct SyntheticArgs {
    /// Training iterations (each runs every phase once)
    #[arg(short, long, default_value = "3")]
    pub iterations: usize,

    /// Host threads recording spans per phase
    #[arg(short, long, default_value = "4")]
    pub threads: usize,

    /// Spans each host thread records per phase
    #[arg(short, long, default_value = "100")]
    pub events: usize,

    /// Kernels launched per phase
    #[arg(short, long, default_value = "16")]
    pub kernels: usize,

    /// How long to wait for the writer before shutting down (e.g., "5s")
    #[arg(long, default_value = "5s")]
    pub flush_timeout: String,

    /// Print the recorder's Prometheus metrics
    #[arg(long)]
    pub metrics: bool,
}

pub fn run(config: RecorderConfig, args: SyntheticArgs) -> Result<()> {
    let flush_timeout = gputrace_shared::utils::parse_duration(&args.flush_timeout)
        .context("Failed to parse flush timeout")?;

    let recorder = Recorder::start(config).context("Failed to start recorder")?;
    let mut tracker = PhaseTracker::new(recorder.clone());
    let tracer = tracker.activity_tracer();

    for iteration in 0..args.iterations {
        for phase in PHASES {
            tracker.start(phase);
            host_spans(&recorder, phase, args.threads, args.events)?;

            let mut activities = gpu_activities(args.kernels, iteration);
            let recorded = tracer.pump(&mut activities);
            info!("{}: {} GPU activities recorded", phase, recorded);

            tracker.stop();
        }
    }

    if !recorder.flush(flush_timeout) {
        output::warning(&format!("Writer still busy after {:?}", flush_timeout));
    }
    recorder.shutdown();

    let stats = recorder.stats();
    output::heading("Recorder");
    println!("{}", serde_json::to_string_pretty(&stats)?);

    output::heading("GPU totals");
    println!("{}", serde_json::to_string_pretty(tracer.totals().summary())?);

    output::heading("Trace files");
    for file in list_trace_files(&recorder.layout().final_root())? {
        println!("{}", file.display());
    }

    if args.metrics {
        output::heading("Metrics");
        print!("{}", encode_metrics());
    }

    if matches!(stats.health, Health::OpenFailures | Health::StreamFailure) {
        output::warning(&format!("Recorder ended unhealthy: {}", stats.health));
    } else {
        output::success(&format!("{} records written", stats.written));
    }
    Ok(())
}

fn host_spans(recorder: &Recorder, phase: &str, threads: usize, events: usize) -> Result<()> {
    let handles = (0..threads)
        .map(|t| {
            let recorder = recorder.clone();
            let phase = phase.to_string();
            thread::Builder::new()
                .name(format!("synthetic-{}", t))
                .spawn(move || {
                    for i in 0..events {
                        let start = system_time_micros();
                        thread::sleep(Duration::from_micros(10));
                        let duration = system_time_micros().saturating_sub(start);
                        let extra = format!("\"step\":{},\"worker\":{}", i, t);
                        recorder.record_complete(&phase, "host_op", start, duration, &extra);
                    }
                })
                .context("Failed to spawn workload thread")
        })
        .collect::<Result<Vec<_>>>()?;

    for handle in handles {
        if handle.join().is_err() {
            anyhow::bail!("Workload thread panicked");
        }
    }
    Ok(())
}

/// One copy in, `kernels` kernels with their launch calls, a sync, one copy out
fn gpu_activities(kernels: usize, iteration: usize) -> Vec<GpuActivity> {
    let mut now = system_time_nanos();
    let mut correlation = (iteration * (kernels + 3)) as u32;
    let mut next = |duration_ns: u64| {
        let start = now;
        now += duration_ns + 500;
        correlation += 1;
        (start, start + duration_ns, correlation)
    };

    let mut activities = Vec::with_capacity(kernels * 2 + 3);

    let (start_ns, end_ns, correlation_id) = next(40_000);
    activities.push(GpuActivity {
        start_ns,
        end_ns,
        stream_id: 7,
        kind: ActivityKind::Memcpy {
            kind: MemcpyKind::HostToDevice,
            bytes: 64 << 20,
            device_id: 0,
            context_id: 1,
            correlation_id,
        },
    });

    for k in 0..kernels {
        let (start_ns, end_ns, correlation_id) = next(5_000);
        activities.push(GpuActivity {
            start_ns,
            end_ns,
            stream_id: 0,
            kind: ActivityKind::RuntimeApi {
                name: "cudaLaunchKernel".to_string(),
                cbid: 211,
                correlation_id,
            },
        });

        let (start_ns, end_ns, _) = next(20_000 + 1_000 * k as u64);
        activities.push(GpuActivity {
            start_ns,
            end_ns,
            stream_id: 7,
            kind: ActivityKind::Kernel(KernelLaunch {
                name: format!("synthetic_gemm_{}", k % 4),
                device_id: 0,
                context_id: 1,
                correlation_id,
                grid: [128, 4, 1],
                block: [256, 1, 1],
                static_shared_memory: 16 << 10,
                dynamic_shared_memory: 0,
                concurrent: true,
            }),
        });
    }

    let (start_ns, end_ns, correlation_id) = next(3_000);
    activities.push(GpuActivity {
        start_ns,
        end_ns,
        stream_id: 7,
        kind: ActivityKind::Synchronization {
            kind: SyncKind::StreamSynchronize,
            context_id: 1,
            event_id: 0,
            correlation_id,
        },
    });

    let (start_ns, end_ns, correlation_id) = next(10_000);
    activities.push(GpuActivity {
        start_ns,
        end_ns,
        stream_id: 7,
        kind: ActivityKind::Memcpy {
            kind: MemcpyKind::DeviceToHost,
            bytes: 4 << 20,
            device_id: 0,
            context_id: 1,
            correlation_id,
        },
    });

    activities
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gpu_activities_shape() {
        let activities = gpu_activities(4, 0);
        assert_eq!(activities.len(), 4 * 2 + 3);
        assert!(activities.iter().all(|a| a.end_ns >= a.start_ns));
        assert_eq!(activities.iter().filter(|a| a.is_api_call()).count(), 4);
    }

    #[test]
    fn test_run_writes_trace_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = RecorderConfig::with_base_folder(dir.path());
        config.node_id = "synthetic".to_string();
        config.poll_interval = Duration::from_millis(10);
        config.drain_on_shutdown = true;

        let args = SyntheticArgs {
            iterations: 1,
            threads: 2,
            events: 5,
            kernels: 2,
            flush_timeout: "5s".to_string(),
            metrics: false,
        };
        run(config, args).unwrap();

        let root = dir.path().join("framework/pevents");
        let files = list_trace_files(&root).unwrap();
        assert!(!files.is_empty());
        for file in files {
            let text = std::fs::read_to_string(file).unwrap();
            let _: Vec<serde_json::Value> = serde_json::from_str(&text).unwrap();
        }
    }
}

use anyhow::Result;
use gputrace_gpu::{
    ActivityKind, GpuActivity, KernelLaunch, MemcpyKind, PhaseTracker, SyncKind,
};
use gputrace_recorder::{list_trace_files, Recorder, RecorderConfig};
use serde_json::Value;
use std::path::Path;
use std::time::{Duration, Instant};

fn start_recorder(dir: &Path) -> Result<Recorder> {
    let mut config = RecorderConfig::with_base_folder(dir);
    config.node_id = "gpu-node".to_string();
    config.poll_interval = Duration::from_millis(10);
    config.start_flag_path = Some(dir.join("start.flag"));
    config.end_flag_path = Some(dir.join("end.flag"));
    Ok(Recorder::start(config)?)
}

fn workload(base_ns: u64) -> Vec<GpuActivity> {
    vec![
        GpuActivity {
            start_ns: base_ns,
            end_ns: base_ns + 2_000,
            stream_id: 1,
            kind: ActivityKind::Memcpy {
                kind: MemcpyKind::HostToDevice,
                bytes: 1 << 20,
                device_id: 0,
                context_id: 1,
                correlation_id: 10,
            },
        },
        GpuActivity {
            start_ns: base_ns + 3_000,
            end_ns: base_ns + 53_000,
            stream_id: 1,
            kind: ActivityKind::Kernel(KernelLaunch {
                name: "volta_sgemm_128x64_nn".to_string(),
                device_id: 0,
                context_id: 1,
                correlation_id: 11,
                grid: [64, 2, 1],
                block: [256, 1, 1],
                static_shared_memory: 8192,
                dynamic_shared_memory: 0,
                concurrent: true,
            }),
        },
        GpuActivity {
            start_ns: base_ns + 2_500,
            end_ns: base_ns + 2_900,
            stream_id: 0,
            kind: ActivityKind::RuntimeApi {
                name: "cudaLaunchKernel".to_string(),
                cbid: 211,
                correlation_id: 11,
            },
        },
        GpuActivity {
            start_ns: base_ns + 53_000,
            end_ns: base_ns + 54_000,
            stream_id: 1,
            kind: ActivityKind::Synchronization {
                kind: SyncKind::StreamSynchronize,
                context_id: 1,
                event_id: 0,
                correlation_id: 12,
            },
        },
    ]
}

fn read_events(recorder: &Recorder) -> Result<Vec<Value>> {
    let mut events = Vec::new();
    for file in list_trace_files(&recorder.layout().final_root())? {
        let objects: Vec<Value> = serde_json::from_str(&std::fs::read_to_string(file)?)?;
        events.extend(objects);
    }
    Ok(events)
}

fn group_id(events: &[Value], group: &str) -> Option<u64> {
    events
        .iter()
        .find(|o| o["name"] == "process_name" && o["args"]["name"] == group)
        .and_then(|o| o["pid"].as_u64())
}

#[test]
fn test_activity_grouped_under_phase() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let recorder = start_recorder(dir.path())?;
    let mut tracker = PhaseTracker::with_counters(recorder.clone(), None);
    let tracer = tracker.activity_tracer();

    tracker.start("forward");
    let mut source = workload(recorder.session_start_micros() * 1_000 + 1_000_000);
    // API records are filtered while extended metrics are off
    assert_eq!(tracer.pump(&mut source), 3);
    assert!(source.is_empty());
    let summary = tracker.stop().expect("phase was active");
    recorder.shutdown();

    let events = read_events(&recorder)?;
    let forward = group_id(&events, "forward").expect("forward group");

    let kernel = events
        .iter()
        .find(|o| o["name"] == "volta_sgemm_128x64_nn")
        .expect("kernel event");
    assert_eq!(kernel["ph"], "X");
    assert_eq!(kernel["pid"], forward);
    assert_eq!(kernel["tid"], 1);
    assert_eq!(kernel["ts"], 1_003);
    assert_eq!(kernel["dur"], 50);
    assert_eq!(kernel["args"]["grid"], serde_json::json!([64, 2, 1]));

    assert!(events.iter().any(|o| o["name"] == "Memcpy HtoD"));
    assert!(events.iter().any(|o| o["name"] == "StreamSynchronize"));
    assert!(!events.iter().any(|o| o["name"] == "cudaLaunchKernel"));

    let phase_event = events
        .iter()
        .find(|o| o["ph"] == "X" && o["name"] == "forward")
        .expect("phase event");
    assert_eq!(phase_event["pid"], forward);
    assert_eq!(phase_event["dur"], summary.duration_micros);

    let totals = tracer.totals();
    assert_eq!(totals.kernel_count(), 1);
    assert_eq!(totals.bytes_transferred(MemcpyKind::HostToDevice), 1 << 20);
    assert_eq!(totals.summary().api_calls, 0);
    Ok(())
}

#[test]
fn test_api_records_follow_extended_metrics_flag() -> Result<()> {
    let dir = tempfile::tempdir()?;
    std::fs::write(dir.path().join("start.flag"), "")?;
    let recorder = start_recorder(dir.path())?;

    let deadline = Instant::now() + Duration::from_secs(5);
    while !recorder.should_collect_extended_metrics() && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }
    assert!(recorder.should_collect_extended_metrics());

    let tracker = PhaseTracker::with_counters(recorder.clone(), None);
    let tracer = tracker.activity_tracer();
    let mut source = workload(recorder.session_start_micros() * 1_000);
    assert_eq!(tracer.pump(&mut source), 4);
    recorder.shutdown();

    let events = read_events(&recorder)?;
    let api = events
        .iter()
        .find(|o| o["name"] == "cudaLaunchKernel")
        .expect("api event");
    assert_eq!(api["args"]["api"], "runtime");
    assert_eq!(api["pid"], group_id(&events, "default").expect("default group"));
    Ok(())
}

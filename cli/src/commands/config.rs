//! Effective configuration display

use crate::output;
use anyhow::Result;
use gputrace_recorder::RecorderConfig;

pub fn run(config: &RecorderConfig) -> Result<()> {
    output::heading("Recorder configuration");
    output::field("base_folder", config.base_folder.display());
    output::field("node_id", &config.node_id);
    output::field("max_file_size", format_size(config.max_file_size));
    output::field("rotation_interval", format!("{:?}", config.rotation_interval));
    output::field("open_failure_threshold", config.open_failure_threshold);
    output::field(
        "max_queue_depth",
        config
            .max_queue_depth
            .map(|depth| depth.to_string())
            .unwrap_or_else(|| "unbounded".to_string()),
    );
    output::field("overflow_policy", format!("{:?}", config.overflow_policy));
    output::field("poll_interval", format!("{:?}", config.poll_interval));
    output::field("batch_size", config.batch_size);
    output::field("drain_on_shutdown", config.drain_on_shutdown);
    output::field("start_flag", config.start_flag_path().display());
    output::field("end_flag", config.end_flag_path().display());
    Ok(())
}

fn format_size(bytes: u64) -> String {
    if bytes == u64::MAX {
        "unbounded".to_string()
    } else {
        format!("{} bytes", bytes)
    }
}

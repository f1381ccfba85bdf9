//! Finished trace file listing

use crate::output;
use anyhow::{Context, Result};
use clap::Args;
use gputrace_recorder::{list_trace_files, RecorderConfig, TraceLayout};

#[derive(Args, Debug)]
pub struct FilesArgs {
    /// Also count the objects in each file
    #[arg(long)]
    pub count: bool,
}

pub fn run(config: &RecorderConfig, args: FilesArgs) -> Result<()> {
    let layout = TraceLayout::new(&config.base_folder, &config.node_id, std::process::id());
    let root = layout.final_root();
    let files = list_trace_files(&root)
        .with_context(|| format!("Failed to list {}", root.display()))?;

    if files.is_empty() {
        output::warning(&format!("No trace files under {}", root.display()));
        return Ok(());
    }

    for file in &files {
        if args.count {
            let contents = std::fs::read_to_string(file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            match serde_json::from_str::<Vec<serde_json::Value>>(&contents) {
                Ok(objects) => println!("{}\t{}", objects.len(), file.display()),
                Err(e) => output::warning(&format!("{}: {}", file.display(), e)),
            }
        } else {
            println!("{}", file.display());
        }
    }
    Ok(())
}

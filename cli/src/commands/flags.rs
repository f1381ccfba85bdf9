//! Flag file management

use crate::output;
use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use gputrace_recorder::RecorderConfig;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum FlagAction {
    /// Begin extended collection (creates the start flag, removes the end flag)
    Start,
    /// End extended collection (creates the end flag)
    End,
    /// Remove both flags
    Clear,
    /// Show which flags exist
    Status,
}

#[derive(Args, Debug)]
pub struct FlagsArgs {
    #[arg(value_enum)]
    pub action: FlagAction,
}

pub fn run(config: &RecorderConfig, args: FlagsArgs) -> Result<()> {
    let start = config.start_flag_path();
    let end = config.end_flag_path();

    match args.action {
        FlagAction::Start => {
            touch(&start)?;
            remove(&end)?;
            output::success("Extended metrics enabled");
        }
        FlagAction::End => {
            touch(&end)?;
            output::success("Extended metrics disabled");
        }
        FlagAction::Clear => {
            remove(&start)?;
            remove(&end)?;
            output::success("Flags cleared");
        }
        FlagAction::Status => {}
    }

    output::field("start flag", presence(&start));
    output::field("end flag", presence(&end));
    output::field("extended metrics", start.exists() && !end.exists());
    Ok(())
}

fn touch(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    Ok(())
}

fn remove(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("Failed to remove {}", path.display())),
    }
}

fn presence(path: &Path) -> String {
    let state = if path.exists() { "present" } else { "absent" };
    format!("{} ({})", path.display(), state)
}

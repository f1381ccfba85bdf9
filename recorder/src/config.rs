//! Configuration types for the trace recorder

use crate::error::{RecorderError, Result};
use gputrace_shared::utils::{parse_duration, parse_size};
use serde::{Deserialize, Deserializer};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

pub const ENV_BASE_FOLDER: &str = "GPUTRACE_BASE_FOLDER";
pub const ENV_NODE_ID: &str = "GPUTRACE_NODE_ID";
pub const ENV_MAX_FILE_SIZE: &str = "GPUTRACE_MAX_FILE_SIZE";
pub const ENV_ROTATION_INTERVAL: &str = "GPUTRACE_ROTATION_INTERVAL";
pub const ENV_OPEN_FAILURE_THRESHOLD: &str = "GPUTRACE_OPEN_FAILURE_THRESHOLD";
pub const ENV_MAX_QUEUE_DEPTH: &str = "GPUTRACE_MAX_QUEUE_DEPTH";
pub const ENV_OVERFLOW_POLICY: &str = "GPUTRACE_OVERFLOW_POLICY";
pub const ENV_DRAIN_ON_SHUTDOWN: &str = "GPUTRACE_DRAIN_ON_SHUTDOWN";

const DEFAULT_BASE_FOLDER: &str = "/tmp";
const DEFAULT_ROTATION_INTERVAL: Duration = Duration::from_secs(600);
const DEFAULT_OPEN_FAILURE_THRESHOLD: u32 = 50;
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);
const DEFAULT_BATCH_SIZE: usize = 256;

const START_FLAG_FILE: &str = "extended_metrics_start.flag";
const END_FLAG_FILE: &str = "extended_metrics_end.flag";

/// What to do with a record pushed onto a full queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OverflowPolicy {
    /// Evict the oldest queued record to make room
    #[default]
    DropOldest,
    /// Reject the incoming record
    DropNewest,
}

impl FromStr for OverflowPolicy {
    type Err = RecorderError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "drop-oldest" | "oldest" => Ok(OverflowPolicy::DropOldest),
            "drop-newest" | "newest" => Ok(OverflowPolicy::DropNewest),
            _ => Err(RecorderError::InvalidConfig(format!(
                "Invalid overflow policy: {}",
                s
            ))),
        }
    }
}

/// Recorder configuration.
///
/// `Default` reads `GPUTRACE_*` environment variables; values that fail to
/// parse fall back to the built-in defaults. A TOML file may override any
/// field, with missing fields taking the environment-aware defaults.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    /// Root of the output tree (`<base>/framework/...`)
    pub base_folder: PathBuf,

    /// Node identifier embedded in final file names
    pub node_id: String,

    /// Rotate once the active file grows past this many bytes
    #[serde(deserialize_with = "de_size")]
    pub max_file_size: u64,

    /// Rotate once a file has been open this long
    #[serde(deserialize_with = "de_duration")]
    pub rotation_interval: Duration,

    /// Consecutive open failures tolerated before the recorder turns unhealthy
    pub open_failure_threshold: u32,

    /// Queue high-water mark (None = unbounded)
    pub max_queue_depth: Option<usize>,

    pub overflow_policy: OverflowPolicy,

    /// Upper bound on how long the writer sleeps waiting for records
    #[serde(deserialize_with = "de_duration")]
    pub poll_interval: Duration,

    /// Max records serialized per append
    pub batch_size: usize,

    /// Write out queued records at shutdown instead of abandoning them
    pub drain_on_shutdown: bool,

    pub start_flag_path: Option<PathBuf>,

    pub end_flag_path: Option<PathBuf>,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }
}

impl RecorderConfig {
    /// Build a configuration from the process environment
    pub fn from_env() -> Self {
        Self::default()
    }

    /// Build a configuration from an arbitrary key lookup (environment-shaped)
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self {
            base_folder: lookup(ENV_BASE_FOLDER)
                .filter(|s| !s.is_empty())
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_BASE_FOLDER)),
            node_id: lookup(ENV_NODE_ID)
                .filter(|s| !s.is_empty())
                .unwrap_or_else(default_node_id),
            max_file_size: lookup(ENV_MAX_FILE_SIZE)
                .and_then(|s| parse_size(&s).ok())
                .unwrap_or(u64::MAX),
            rotation_interval: lookup(ENV_ROTATION_INTERVAL)
                .and_then(|s| parse_duration(&s).ok())
                .unwrap_or(DEFAULT_ROTATION_INTERVAL),
            open_failure_threshold: lookup(ENV_OPEN_FAILURE_THRESHOLD)
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_OPEN_FAILURE_THRESHOLD),
            max_queue_depth: lookup(ENV_MAX_QUEUE_DEPTH).and_then(|s| s.parse().ok()),
            overflow_policy: lookup(ENV_OVERFLOW_POLICY)
                .and_then(|s| s.parse().ok())
                .unwrap_or_default(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            batch_size: DEFAULT_BATCH_SIZE,
            drain_on_shutdown: lookup(ENV_DRAIN_ON_SHUTDOWN)
                .map(|s| matches!(s.as_str(), "1" | "true" | "yes"))
                .unwrap_or(false),
            start_flag_path: None,
            end_flag_path: None,
        }
    }

    /// Defaults rooted at a specific output folder
    pub fn with_base_folder(base_folder: impl Into<PathBuf>) -> Self {
        Self {
            base_folder: base_folder.into(),
            ..Self::default()
        }
    }

    /// Load a TOML configuration file
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&contents)
    }

    /// Parse a TOML configuration document
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Path whose existence turns extended metrics on
    pub fn start_flag_path(&self) -> PathBuf {
        self.start_flag_path
            .clone()
            .unwrap_or_else(|| self.base_folder.join(&self.node_id).join(START_FLAG_FILE))
    }

    /// Path whose existence turns extended metrics back off
    pub fn end_flag_path(&self) -> PathBuf {
        self.end_flag_path
            .clone()
            .unwrap_or_else(|| self.base_folder.join(&self.node_id).join(END_FLAG_FILE))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.node_id.is_empty() {
            return Err(RecorderError::InvalidConfig(
                "node_id must not be empty".to_string(),
            ));
        }

        if self.node_id.contains(['/', '\\']) {
            return Err(RecorderError::InvalidConfig(format!(
                "node_id must not contain path separators: {}",
                self.node_id
            )));
        }

        if self.rotation_interval.is_zero() {
            return Err(RecorderError::InvalidConfig(
                "rotation_interval must be greater than 0".to_string(),
            ));
        }

        if self.poll_interval.is_zero() {
            return Err(RecorderError::InvalidConfig(
                "poll_interval must be greater than 0".to_string(),
            ));
        }

        if self.batch_size == 0 {
            return Err(RecorderError::InvalidConfig(
                "batch_size must be greater than 0".to_string(),
            ));
        }

        if self.max_queue_depth == Some(0) {
            return Err(RecorderError::InvalidConfig(
                "max_queue_depth must be greater than 0 when set".to_string(),
            ));
        }

        Ok(())
    }
}

/// Node identifier from the hostname (or fallback to PID).
fn default_node_id() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .filter(|h| !h.is_empty() && !h.contains(['/', '\\']))
        .unwrap_or_else(|| format!("node-{}", std::process::id()))
}

#[derive(Deserialize)]
#[serde(untagged)]
enum HumanValue {
    Number(u64),
    Text(String),
}

fn de_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    match HumanValue::deserialize(deserializer)? {
        HumanValue::Number(secs) => Ok(Duration::from_secs(secs)),
        HumanValue::Text(s) => parse_duration(&s).map_err(serde::de::Error::custom),
    }
}

fn de_size<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    match HumanValue::deserialize(deserializer)? {
        HumanValue::Number(bytes) => Ok(bytes),
        HumanValue::Text(s) => parse_size(&s).map_err(serde::de::Error::custom),
    }
}

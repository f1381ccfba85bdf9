//! Error types for the recorder

use thiserror::Error;

/// Errors surfaced while configuring or starting a recorder.
///
/// Faults on the writer thread never show up here; they move the recorder
/// into an unhealthy [`Health`](crate::Health) state instead.
#[derive(Debug, Error)]
pub enum RecorderError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to parse config file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Failed to spawn writer thread: {0}")]
    ThreadSpawn(#[source] std::io::Error),

    #[error("Recorder already initialized")]
    AlreadyInitialized,
}

pub type Result<T, E = RecorderError> = std::result::Result<T, E>;

//! Recorder health state
//!
//! Health only ever moves away from [`Health::Healthy`], and the first
//! transition wins. Once unhealthy, producers drop records without touching
//! the queue until the process restarts.

use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Health {
    Healthy = 0,
    /// Shut down cleanly
    ShutDown = 1,
    /// Too many consecutive failures opening or renaming trace files
    OpenFailures = 2,
    /// A write, seek or flush on the open file failed
    StreamFailure = 3,
}

impl Health {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Health::Healthy,
            1 => Health::ShutDown,
            2 => Health::OpenFailures,
            _ => Health::StreamFailure,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Health::Healthy => "healthy",
            Health::ShutDown => "shut_down",
            Health::OpenFailures => "open_failures",
            Health::StreamFailure => "stream_failure",
        }
    }
}

impl fmt::Display for Health {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
pub(crate) struct HealthState(AtomicU8);

impl HealthState {
    pub(crate) fn new() -> Self {
        Self(AtomicU8::new(Health::Healthy as u8))
    }

    pub(crate) fn get(&self) -> Health {
        Health::from_u8(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn is_healthy(&self) -> bool {
        self.get() == Health::Healthy
    }

    /// Leave the healthy state. Returns false if it had already been left.
    pub(crate) fn mark(&self, state: Health) -> bool {
        self.0
            .compare_exchange(
                Health::Healthy as u8,
                state as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_transition_wins() {
        let health = HealthState::new();
        assert!(health.is_healthy());

        assert!(health.mark(Health::OpenFailures));
        assert!(!health.mark(Health::ShutDown));
        assert_eq!(health.get(), Health::OpenFailures);
        assert!(!health.is_healthy());
    }

    #[test]
    fn test_display() {
        assert_eq!(Health::StreamFailure.to_string(), "stream_failure");
    }
}

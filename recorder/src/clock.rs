//! Wall-clock source used by the writer for rotation decisions

use gputrace_shared::utils::time::system_time_micros;
use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};

/// Source of epoch microseconds
pub trait Clock: Send + Sync + Debug {
    fn now_micros(&self) -> u64;
}

/// The system wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_micros(&self) -> u64 {
        system_time_micros()
    }
}

/// A clock that only moves when told to. Used to drive rotation
/// deterministically in tests and replays.
#[derive(Debug, Default)]
pub struct ManualClock {
    micros: AtomicU64,
}

impl ManualClock {
    pub fn new(micros: u64) -> Self {
        Self {
            micros: AtomicU64::new(micros),
        }
    }

    pub fn set(&self, micros: u64) {
        self.micros.store(micros, Ordering::SeqCst);
    }

    pub fn advance(&self, delta_micros: u64) {
        self.micros.fetch_add(delta_micros, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_micros(&self) -> u64 {
        self.micros.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::new(10);
        assert_eq!(clock.now_micros(), 10);

        clock.advance(5);
        assert_eq!(clock.now_micros(), 15);

        clock.set(1);
        assert_eq!(clock.now_micros(), 1);
    }

    #[test]
    fn test_system_clock_moves_forward() {
        let clock = SystemClock;
        let a = clock.now_micros();
        let b = clock.now_micros();
        assert!(b >= a);
    }
}

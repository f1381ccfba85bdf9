//! Pending-record queue shared by producers and the writer thread

use crate::config::OverflowPolicy;
use gputrace_shared::Record;
use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Result of pushing a record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Queued,
    /// Queued after evicting the oldest pending record
    QueuedDroppingOldest,
    /// Queue was full and the record was discarded
    Rejected,
}

#[derive(Debug, Default)]
struct QueueState {
    records: VecDeque<Record>,
    /// Records ever accepted into the queue
    pushed: u64,
    closed: bool,
}

/// FIFO of pending records.
///
/// The lock is held only for the push or pop itself and no caller code runs
/// under it, so a producer may push again from inside instrumentation that is
/// nested in another push's call stack. A poisoned lock is recovered rather
/// than propagated: a panicking producer must not stop the writer.
#[derive(Debug)]
pub struct EventQueue {
    state: Mutex<QueueState>,
    ready: Condvar,
    max_depth: Option<usize>,
    policy: OverflowPolicy,
}

impl EventQueue {
    /// Create an unbounded queue
    pub fn unbounded() -> Self {
        Self::new(None, OverflowPolicy::default())
    }

    /// Create a queue capped at `max_depth` pending records
    pub fn new(max_depth: Option<usize>, policy: OverflowPolicy) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            ready: Condvar::new(),
            max_depth,
            policy,
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a record and wake the writer
    pub fn push(&self, record: Record) -> PushOutcome {
        let mut state = self.lock();

        let mut outcome = PushOutcome::Queued;
        if let Some(max) = self.max_depth {
            if state.records.len() >= max {
                match self.policy {
                    OverflowPolicy::DropNewest => return PushOutcome::Rejected,
                    OverflowPolicy::DropOldest => {
                        state.records.pop_front();
                        outcome = PushOutcome::QueuedDroppingOldest;
                    }
                }
            }
        }

        state.records.push_back(record);
        state.pushed += 1;
        drop(state);

        self.ready.notify_one();
        outcome
    }

    /// Remove the oldest record, if any
    pub fn try_pop(&self) -> Option<Record> {
        self.lock().records.pop_front()
    }

    /// Remove up to `max` records in FIFO order without waiting
    pub fn drain_batch(&self, max: usize) -> Vec<Record> {
        let mut state = self.lock();
        let n = state.records.len().min(max);
        state.records.drain(..n).collect()
    }

    /// Wait up to `timeout` for records to arrive, then remove up to `max`
    /// of them. Returns early (possibly empty) once the queue is closed.
    pub fn wait_and_drain(&self, timeout: Duration, max: usize) -> Vec<Record> {
        let mut state = self.lock();
        if state.records.is_empty() && !state.closed {
            state = self
                .ready
                .wait_timeout(state, timeout)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|e| e.into_inner().0);
        }
        let n = state.records.len().min(max);
        state.records.drain(..n).collect()
    }

    /// Stop waiting for records and wake the writer. Pushes are still accepted.
    pub fn close(&self) {
        self.lock().closed = true;
        self.ready.notify_all();
    }

    /// Discard everything pending, returning how many records were dropped
    pub fn clear(&self) -> usize {
        let mut state = self.lock();
        let n = state.records.len();
        state.records.clear();
        n
    }

    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().records.is_empty()
    }

    /// Total records accepted since creation
    pub fn pushed_total(&self) -> u64 {
        self.lock().pushed
    }
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::unbounded()
    }
}

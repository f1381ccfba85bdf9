//! Record type definitions for trace data
//!
//! A [`Record`] is one captured occurrence produced by an instrumentation call
//! site and consumed by the trace writer.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Microseconds, either since the UNIX epoch or relative to session start
pub type Micros = u64;

/// Process ID
pub type Pid = u32;

/// Thread ID (pthread handle or OS tid, whatever the producer reports)
pub type Tid = u64;

/// Kind of record carried through the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordKind {
    Event,
    /// Reserved; written exactly like an event
    Marker,
}

/// Trace-event phase, serialized as its single-character code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    /// Complete interval (`ts` + `dur`)
    #[serde(rename = "X")]
    Complete,
    #[serde(rename = "M")]
    Metadata,
    #[serde(rename = "B")]
    Begin,
    #[serde(rename = "E")]
    End,
    #[serde(rename = "i")]
    Instant,
}

impl Phase {
    /// The single-character code used by the trace format
    pub fn as_char(self) -> char {
        match self {
            Phase::Complete => 'X',
            Phase::Metadata => 'M',
            Phase::Begin => 'B',
            Phase::End => 'E',
            Phase::Instant => 'i',
        }
    }

    /// Whether objects of this phase carry a `name` key
    pub fn has_name(self) -> bool {
        self != Phase::End
    }

    /// Whether objects of this phase carry a `dur` key
    pub fn has_duration(self) -> bool {
        self == Phase::Complete
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

/// Error returned when a character is not part of the phase alphabet
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown trace phase '{0}'")]
pub struct ParsePhaseError(pub char);

impl TryFrom<char> for Phase {
    type Error = ParsePhaseError;

    fn try_from(c: char) -> Result<Self, Self::Error> {
        match c {
            'X' => Ok(Phase::Complete),
            'M' => Ok(Phase::Metadata),
            'B' => Ok(Phase::Begin),
            'E' => Ok(Phase::End),
            'i' | 'I' => Ok(Phase::Instant),
            other => Err(ParsePhaseError(other)),
        }
    }
}

/// One traced occurrence destined for the trace file.
///
/// Records are moved into the queue by producers and owned by the writer
/// once dequeued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub kind: RecordKind,

    /// Logical grouping key, modeled as a synthetic process in the trace
    pub group: String,

    pub phase: Phase,

    /// Human-readable name of the traced operation
    pub label: String,

    /// Pre-formatted `"key":value` pairs spliced into the `args` object
    pub extra_fields: String,

    /// Start of the event relative to session start
    pub start_offset_micros: i64,

    /// Epoch microseconds at which the event's effect is complete
    pub end_absolute_micros: Micros,

    pub duration_micros: Micros,

    pub thread_id: Tid,

    pub process_id: Pid,
}

impl Record {
    /// Build an event record, deriving `end_absolute_micros` from the session
    /// start so that `end == session_start + start_offset + duration` holds.
    #[allow(clippy::too_many_arguments)]
    pub fn event(
        session_start_micros: Micros,
        group: &str,
        phase: Phase,
        label: &str,
        extra_fields: &str,
        start_offset_micros: i64,
        duration_micros: Micros,
        thread_id: Tid,
        process_id: Pid,
    ) -> Self {
        let end_absolute_micros = (session_start_micros as i128
            + start_offset_micros as i128
            + duration_micros as i128)
            .clamp(0, u64::MAX as i128) as u64;

        Self {
            kind: RecordKind::Event,
            group: group.to_owned(),
            phase,
            label: label.to_owned(),
            extra_fields: extra_fields.to_owned(),
            start_offset_micros,
            end_absolute_micros,
            duration_micros,
            thread_id,
            process_id,
        }
    }
}

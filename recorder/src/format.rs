//! Chrome trace-event objects as written to the trace file
//!
//! Objects are serialized compactly with `serde_json`, so names and labels
//! are always escaped. Caller-supplied `extra_fields` are spliced verbatim
//! when they form a valid JSON object body and escaped as a string otherwise.

use gputrace_shared::{Phase, Record, Tid};
use serde::Serialize;
use serde_json::value::RawValue;

/// Group id reserved for process-level metadata
pub const PROCESS_METADATA_PID: u32 = 0;

#[derive(Serialize)]
#[serde(untagged)]
enum EventArgs<'a> {
    Fields(Box<RawValue>),
    Raw { raw: &'a str },
}

#[derive(Serialize)]
struct TraceEvent<'a> {
    ph: Phase,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
    ts: i64,
    pid: u32,
    tid: Tid,
    #[serde(skip_serializing_if = "Option::is_none")]
    dur: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    args: Option<EventArgs<'a>>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum MetadataArgs<'a> {
    Name { name: &'a str },
    SortIndex { sort_index: u64 },
    StartTime { start_time_since_epoch_in_micros: u64 },
}

#[derive(Serialize)]
struct MetadataEvent<'a> {
    name: &'static str,
    ph: Phase,
    pid: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    tid: Option<Tid>,
    args: MetadataArgs<'a>,
}

/// Accumulates trace objects separated by `",\n"`
#[derive(Debug, Default)]
pub struct ObjectBuffer {
    bytes: Vec<u8>,
    objects: usize,
    malformed_args: usize,
}

impl ObjectBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.objects == 0
    }

    /// Number of objects written so far
    pub fn len(&self) -> usize {
        self.objects
    }

    /// Records whose `extra_fields` had to be escaped
    pub fn malformed_args(&self) -> usize {
        self.malformed_args
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    fn push<T: Serialize>(&mut self, object: &T) -> serde_json::Result<()> {
        if self.objects > 0 {
            self.bytes.extend_from_slice(b",\n");
        }
        serde_json::to_writer(&mut self.bytes, object)?;
        self.objects += 1;
        Ok(())
    }

    fn push_metadata(
        &mut self,
        name: &'static str,
        pid: u32,
        tid: Option<Tid>,
        args: MetadataArgs<'_>,
    ) -> serde_json::Result<()> {
        self.push(&MetadataEvent {
            name,
            ph: Phase::Metadata,
            pid,
            tid,
            args,
        })
    }

    /// Process-level metadata written once at the top of every file
    pub fn push_file_header(&mut self, session_start_micros: u64) -> serde_json::Result<()> {
        self.push_metadata(
            "process_name",
            PROCESS_METADATA_PID,
            None,
            MetadataArgs::StartTime {
                start_time_since_epoch_in_micros: session_start_micros,
            },
        )?;
        self.push_metadata(
            "process_sort_index",
            PROCESS_METADATA_PID,
            None,
            MetadataArgs::SortIndex { sort_index: 0 },
        )
    }

    /// Announce a group as a synthetic trace process
    pub fn push_group_metadata(&mut self, group: &str, group_id: u32) -> serde_json::Result<()> {
        self.push_metadata(
            "process_name",
            group_id,
            None,
            MetadataArgs::Name { name: group },
        )?;
        self.push_metadata(
            "process_sort_index",
            group_id,
            None,
            MetadataArgs::SortIndex {
                sort_index: group_id as u64,
            },
        )
    }

    /// Announce a producing thread within a group
    pub fn push_thread_metadata(
        &mut self,
        group_id: u32,
        thread_id: Tid,
        process_id: u32,
    ) -> serde_json::Result<()> {
        let thread_name = format!("tid-{}_pid-{}", thread_id, process_id);
        self.push_metadata(
            "thread_name",
            group_id,
            Some(thread_id),
            MetadataArgs::Name { name: &thread_name },
        )?;
        self.push_metadata(
            "thread_sort_index",
            group_id,
            Some(thread_id),
            MetadataArgs::SortIndex {
                sort_index: thread_id,
            },
        )
    }

    /// The event object for `record`, attributed to `group_id`
    pub fn push_event(&mut self, record: &Record, group_id: u32) -> serde_json::Result<()> {
        let args = if record.extra_fields.is_empty() {
            None
        } else {
            match RawValue::from_string(format!("{{{}}}", record.extra_fields)) {
                Ok(raw) => Some(EventArgs::Fields(raw)),
                Err(_) => {
                    self.malformed_args += 1;
                    Some(EventArgs::Raw {
                        raw: &record.extra_fields,
                    })
                }
            }
        };

        self.push(&TraceEvent {
            ph: record.phase,
            name: record.phase.has_name().then_some(record.label.as_str()),
            ts: record.start_offset_micros,
            pid: group_id,
            tid: record.thread_id,
            dur: record.phase.has_duration().then_some(record.duration_micros),
            args,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn record(phase: Phase, extra: &str) -> Record {
        Record::event(1_000_000, "kernelA", phase, "matmul", extra, 500, 200, 7, 42)
    }

    fn parse(buffer: &ObjectBuffer) -> Vec<Value> {
        let text = format!("[{}]", String::from_utf8(buffer.as_bytes().to_vec()).unwrap());
        serde_json::from_str(&text).unwrap()
    }

    #[test]
    fn test_complete_event_layout() {
        let mut buffer = ObjectBuffer::new();
        buffer.push_event(&record(Phase::Complete, ""), 1).unwrap();

        assert_eq!(
            std::str::from_utf8(buffer.as_bytes()).unwrap(),
            r#"{"ph":"X","name":"matmul","ts":500,"pid":1,"tid":7,"dur":200}"#
        );
    }

    #[test]
    fn test_end_event_omits_name_and_duration() {
        let mut buffer = ObjectBuffer::new();
        buffer.push_event(&record(Phase::End, ""), 3).unwrap();

        assert_eq!(parse(&buffer)[0], json!({"ph": "E", "ts": 500, "pid": 3, "tid": 7}));
    }

    #[test]
    fn test_extra_fields_spliced_into_args() {
        let mut buffer = ObjectBuffer::new();
        buffer
            .push_event(&record(Phase::Complete, r#""pid":42, "thread_id":7"#), 1)
            .unwrap();

        let objects = parse(&buffer);
        assert_eq!(objects[0]["args"], json!({"pid": 42, "thread_id": 7}));
        assert_eq!(buffer.malformed_args(), 0);
    }

    #[test]
    fn test_malformed_extra_fields_are_escaped() {
        let mut buffer = ObjectBuffer::new();
        buffer
            .push_event(&record(Phase::Complete, r#""broken": "quote}"#), 1)
            .unwrap();

        let objects = parse(&buffer);
        assert_eq!(objects[0]["args"]["raw"], json!(r#""broken": "quote}"#));
        assert_eq!(buffer.malformed_args(), 1);
    }

    #[test]
    fn test_labels_are_escaped() {
        let mut buffer = ObjectBuffer::new();
        let mut r = record(Phase::Complete, "");
        r.label = "void kernel<\"float\">(int)\n".to_string();
        buffer.push_event(&r, 1).unwrap();

        assert_eq!(parse(&buffer)[0]["name"], json!("void kernel<\"float\">(int)\n"));
    }

    #[test]
    fn test_metadata_objects() {
        let mut buffer = ObjectBuffer::new();
        buffer.push_file_header(1_000_000).unwrap();
        buffer.push_group_metadata("kernelA", 1).unwrap();
        buffer.push_thread_metadata(1, 7, 42).unwrap();

        let objects = parse(&buffer);
        assert_eq!(buffer.len(), 6);
        assert_eq!(
            objects,
            vec![
                json!({"name": "process_name", "ph": "M", "pid": 0,
                       "args": {"start_time_since_epoch_in_micros": 1_000_000}}),
                json!({"name": "process_sort_index", "ph": "M", "pid": 0,
                       "args": {"sort_index": 0}}),
                json!({"name": "process_name", "ph": "M", "pid": 1,
                       "args": {"name": "kernelA"}}),
                json!({"name": "process_sort_index", "ph": "M", "pid": 1,
                       "args": {"sort_index": 1}}),
                json!({"name": "thread_name", "ph": "M", "pid": 1, "tid": 7,
                       "args": {"name": "tid-7_pid-42"}}),
                json!({"name": "thread_sort_index", "ph": "M", "pid": 1, "tid": 7,
                       "args": {"sort_index": 7}}),
            ]
        );
    }
}

//! The currently open trace file
//!
//! The file is a JSON array that is valid after every append: it always ends
//! with `"\n]"`, and each append seeks back over those two bytes, writes the
//! new objects, and re-terminates the array.

use crate::format::ObjectBuffer;
use crate::rotation::SessionStats;
use gputrace_shared::utils::time::utc_hour;
use gputrace_shared::{Record, Tid};
use std::collections::{HashMap, HashSet};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

const EMPTY_ARRAY: &[u8] = b"[\n]";
const TRAILER_LEN: i64 = 2;

/// Group name → synthetic pid, assigned in first-seen order starting at 1
#[derive(Debug, Default)]
pub struct GroupRegistry {
    ids: HashMap<String, u32>,
}

impl GroupRegistry {
    /// Look up `group`, assigning the next id if unseen. The flag is true
    /// when the id was just assigned.
    pub fn get_or_assign(&mut self, group: &str) -> (u32, bool) {
        if let Some(&id) = self.ids.get(group) {
            return (id, false);
        }
        let id = self.ids.len() as u32 + 1;
        self.ids.insert(group.to_owned(), id);
        (id, true)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Summary of one append
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AppendSummary {
    pub records: usize,
    pub objects: usize,
    pub malformed_args: usize,
}

/// An open trace file plus the per-file bookkeeping.
#[derive(Debug)]
pub struct FileSession {
    path: PathBuf,
    file: File,
    session_start_micros: u64,
    has_records: bool,
    opened_at_hour: u32,
    last_rotation_micros: u64,
    bytes_written: u64,
    groups: GroupRegistry,
    seen_threads: HashSet<(u32, Tid)>,
}

impl FileSession {
    /// Create (or truncate) the file at `path` and initialize it as an empty
    /// JSON array. Parent directories are created as needed.
    pub fn open(path: &Path, now_micros: u64, session_start_micros: u64) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.write_all(EMPTY_ARRAY)?;
        file.flush()?;

        debug!("Opened trace file {}", path.display());

        Ok(Self {
            path: path.to_path_buf(),
            file,
            session_start_micros,
            has_records: false,
            opened_at_hour: utc_hour(now_micros),
            last_rotation_micros: now_micros,
            bytes_written: EMPTY_ARRAY.len() as u64,
            groups: GroupRegistry::default(),
            seen_threads: HashSet::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn has_records(&self) -> bool {
        self.has_records
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            opened_at_hour: self.opened_at_hour,
            bytes_written: self.bytes_written,
            last_rotation_micros: self.last_rotation_micros,
        }
    }

    /// Serialize `records` and append them as one write.
    ///
    /// Metadata objects for groups and (group, thread) pairs not yet seen in
    /// this file are emitted ahead of the first event that needs them.
    pub fn append(&mut self, records: &[Record]) -> io::Result<AppendSummary> {
        let mut objects = ObjectBuffer::new();

        if !self.has_records && !records.is_empty() {
            objects.push_file_header(self.session_start_micros)?;
        }

        for record in records {
            let (group_id, new_group) = self.groups.get_or_assign(&record.group);
            if new_group {
                objects.push_group_metadata(&record.group, group_id)?;
            }
            if self.seen_threads.insert((group_id, record.thread_id)) {
                objects.push_thread_metadata(group_id, record.thread_id, record.process_id)?;
            }
            objects.push_event(record, group_id)?;
        }

        if objects.is_empty() {
            return Ok(AppendSummary::default());
        }

        let body = objects.as_bytes();
        let mut chunk = Vec::with_capacity(body.len() + 4);
        chunk.extend_from_slice(if self.has_records { b",\n" } else { b"\n" });
        chunk.extend_from_slice(body);
        chunk.extend_from_slice(b"\n]");

        self.file.seek(SeekFrom::End(-TRAILER_LEN))?;
        self.file.write_all(&chunk)?;
        self.file.flush()?;

        self.bytes_written = self.bytes_written - TRAILER_LEN as u64 + chunk.len() as u64;
        self.has_records = true;

        Ok(AppendSummary {
            records: records.len(),
            objects: objects.len(),
            malformed_args: objects.malformed_args(),
        })
    }

    /// Flush, close and move the file to `target`, creating its directory.
    pub fn close_and_rename(mut self, target: &Path) -> io::Result<()> {
        self.file.flush()?;
        drop(self.file);

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::rename(&self.path, target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gputrace_shared::Phase;
    use serde_json::Value;

    const START: u64 = 1_614_834_367_000_000;

    fn record(group: &str, label: &str, tid: Tid) -> Record {
        Record::event(START, group, Phase::Complete, label, "", 10, 5, tid, 42)
    }

    fn read_array(path: &Path) -> Vec<Value> {
        let text = fs::read_to_string(path).unwrap();
        serde_json::from_str(&text).unwrap()
    }

    fn names(objects: &[Value]) -> Vec<String> {
        objects
            .iter()
            .map(|o| o["name"].as_str().unwrap_or_default().to_string())
            .collect()
    }

    #[test]
    fn test_registry_assigns_ids_in_order() {
        let mut registry = GroupRegistry::default();
        assert!(registry.is_empty());

        assert_eq!(registry.get_or_assign("forward"), (1, true));
        assert_eq!(registry.get_or_assign("backward"), (2, true));
        assert_eq!(registry.get_or_assign("forward"), (1, false));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_new_file_is_empty_array() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("framework").join("1.tmp");
        let session = FileSession::open(&path, START, START).unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "[\n]");
        assert!(read_array(&path).is_empty());
        assert!(!session.has_records());
        assert_eq!(session.bytes_written(), 3);
        assert_eq!(session.stats().opened_at_hour, 5);
        assert_eq!(session.stats().last_rotation_micros, START);
    }

    #[test]
    fn test_file_valid_after_every_append() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("1.tmp");
        let mut session = FileSession::open(&path, START, START).unwrap();

        let mut events = 0;
        for i in 0..5 {
            session
                .append(&[record("g", &format!("op{}", i), 1)])
                .unwrap();
            events += 1;

            let objects = read_array(&path);
            let written: Vec<_> = objects.iter().filter(|o| o["ph"] == "X").collect();
            assert_eq!(written.len(), events);
        }

        let len = fs::metadata(&path).unwrap().len();
        assert_eq!(session.bytes_written(), len);
        assert!(fs::read_to_string(&path).unwrap().ends_with("\n]"));
    }

    #[test]
    fn test_metadata_emitted_once_per_group_and_thread() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("1.tmp");
        let mut session = FileSession::open(&path, START, START).unwrap();

        session
            .append(&[record("a", "x", 1), record("a", "y", 1), record("b", "z", 1)])
            .unwrap();
        session.append(&[record("a", "w", 2), record("a", "v", 1)]).unwrap();

        let objects = read_array(&path);
        let count = |name: &str, pid: u64| {
            objects
                .iter()
                .filter(|o| o["name"] == name && o["pid"] == pid)
                .count()
        };

        assert_eq!(count("process_name", 0), 1);
        assert_eq!(count("process_name", 1), 1);
        assert_eq!(count("process_name", 2), 1);
        assert_eq!(count("process_sort_index", 1), 1);
        // Group a sees threads 1 and 2, group b sees thread 1
        assert_eq!(count("thread_name", 1), 2);
        assert_eq!(count("thread_name", 2), 1);
        assert_eq!(count("thread_sort_index", 1), 2);
    }

    #[test]
    fn test_append_layout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("1.tmp");
        let mut session = FileSession::open(&path, START, START).unwrap();

        let summary = session.append(&[record("kernelA", "matmul", 7)]).unwrap();
        assert_eq!(summary.records, 1);
        assert_eq!(summary.objects, 7);

        let objects = read_array(&path);
        assert_eq!(
            names(&objects),
            vec![
                "process_name",
                "process_sort_index",
                "process_name",
                "process_sort_index",
                "thread_name",
                "thread_sort_index",
                "matmul",
            ]
        );

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("[\n{"));
        assert!(text.ends_with("}\n]"));
    }

    #[test]
    fn test_empty_append_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("1.tmp");
        let mut session = FileSession::open(&path, START, START).unwrap();

        assert_eq!(session.append(&[]).unwrap(), AppendSummary::default());
        assert_eq!(fs::read_to_string(&path).unwrap(), "[\n]");
    }

    #[test]
    fn test_close_and_rename() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("1.tmp");
        let target = dir.path().join("pevents").join("2021030405").join("final.json");

        let mut session = FileSession::open(&path, START, START).unwrap();
        session.append(&[record("g", "op", 1)]).unwrap();
        session.close_and_rename(&target).unwrap();

        assert!(!path.exists());
        assert_eq!(read_array(&target).len(), 7);
    }

    #[test]
    fn test_reopen_truncates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("1.tmp");

        let mut session = FileSession::open(&path, START, START).unwrap();
        session.append(&[record("g", "op", 1)]).unwrap();
        drop(session);

        let session = FileSession::open(&path, START, START).unwrap();
        assert!(!session.has_records());
        assert!(read_array(&path).is_empty());
    }

    #[test]
    fn test_open_fails_when_parent_is_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("framework");
        fs::write(&blocker, "not a directory").unwrap();

        assert!(FileSession::open(&blocker.join("1.tmp"), START, START).is_err());
    }
}

//! On-disk layout of trace files

use gputrace_shared::utils::time::hour_bucket;
use std::path::{Path, PathBuf};

const FRAMEWORK_DIR: &str = "framework";
const FINAL_DIR: &str = "pevents";
const TEMP_SUFFIX: &str = ".tmp";
const FINAL_SUFFIX: &str = "_trace.json";

/// Paths used by one recorder.
///
/// The active file always lives at `<base>/framework/<pid>.tmp`; rotation
/// renames it to
/// `<base>/framework/pevents/<YYYYMMDDHH>/<epochMicros>_<nodeId>_trace.json`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceLayout {
    base_folder: PathBuf,
    node_id: String,
    pid: u32,
}

impl TraceLayout {
    pub fn new(base_folder: impl Into<PathBuf>, node_id: impl Into<String>, pid: u32) -> Self {
        Self {
            base_folder: base_folder.into(),
            node_id: node_id.into(),
            pid,
        }
    }

    pub fn base_folder(&self) -> &Path {
        &self.base_folder
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Path of the file currently being appended to
    pub fn temp_path(&self) -> PathBuf {
        self.base_folder
            .join(FRAMEWORK_DIR)
            .join(format!("{}{}", self.pid, TEMP_SUFFIX))
    }

    /// Unused path next to the active file for a closed file that could not
    /// be moved to its final name: `<base>/framework/<pid>.<n>.tmp`
    pub fn unique_aside_path(&self) -> PathBuf {
        let dir = self.base_folder.join(FRAMEWORK_DIR);
        (1u32..)
            .map(|n| dir.join(format!("{}.{}{}", self.pid, n, TEMP_SUFFIX)))
            .find(|candidate| !candidate.exists())
            .unwrap_or_else(|| self.temp_path())
    }

    /// Root directory of finished trace files
    pub fn final_root(&self) -> PathBuf {
        self.base_folder.join(FRAMEWORK_DIR).join(FINAL_DIR)
    }

    /// Hour-bucketed directory a file stamped `timestamp_micros` lands in
    pub fn final_dir(&self, timestamp_micros: u64) -> PathBuf {
        self.final_root().join(hour_bucket(timestamp_micros))
    }

    /// Final name for a file stamped `timestamp_micros`, ignoring collisions
    pub fn final_path(&self, timestamp_micros: u64) -> PathBuf {
        self.final_dir(timestamp_micros).join(format!(
            "{}_{}{}",
            timestamp_micros, self.node_id, FINAL_SUFFIX
        ))
    }

    /// Final name for a file stamped `timestamp_micros` that does not exist
    /// yet, appending `_<n>` before the suffix when needed.
    pub fn unique_final_path(&self, timestamp_micros: u64) -> PathBuf {
        let first = self.final_path(timestamp_micros);
        if !first.exists() {
            return first;
        }

        let dir = self.final_dir(timestamp_micros);
        (1u32..)
            .map(|n| {
                dir.join(format!(
                    "{}_{}_{}{}",
                    timestamp_micros, self.node_id, n, FINAL_SUFFIX
                ))
            })
            .find(|candidate| !candidate.exists())
            .unwrap_or(first)
    }
}

/// Recursively collect finished trace files under `root`, sorted by path
pub fn list_trace_files(root: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    if !root.exists() {
        return Ok(out);
    }

    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        for entry in std::fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.is_dir() {
                pending.push(path);
            } else if path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(FINAL_SUFFIX))
            {
                out.push(path);
            }
        }
    }
    out.sort();
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    // 2021-03-04T05:06:07Z
    const SAMPLE: u64 = 1_614_834_367_000_000;

    #[test]
    fn test_paths() {
        let layout = TraceLayout::new("/tmp/run", "algo-1", 4242);

        assert_eq!(layout.temp_path(), PathBuf::from("/tmp/run/framework/4242.tmp"));
        assert_eq!(
            layout.final_path(SAMPLE),
            PathBuf::from(
                "/tmp/run/framework/pevents/2021030405/1614834367000000_algo-1_trace.json"
            )
        );
    }

    #[test]
    fn test_unique_aside_path_skips_existing() {
        let dir = tempfile::tempdir().unwrap();
        let layout = TraceLayout::new(dir.path(), "node", 7);

        let first = layout.unique_aside_path();
        assert_eq!(first, dir.path().join("framework/7.1.tmp"));

        std::fs::create_dir_all(first.parent().unwrap()).unwrap();
        std::fs::write(&first, "[\n]").unwrap();
        assert_eq!(layout.unique_aside_path(), dir.path().join("framework/7.2.tmp"));
    }

    #[test]
    fn test_unique_final_path_avoids_collisions() {
        let dir = tempfile::tempdir().unwrap();
        let layout = TraceLayout::new(dir.path(), "node", 1);

        let first = layout.unique_final_path(SAMPLE);
        assert_eq!(first, layout.final_path(SAMPLE));

        std::fs::create_dir_all(first.parent().unwrap()).unwrap();
        std::fs::write(&first, "[\n]").unwrap();

        let second = layout.unique_final_path(SAMPLE);
        assert_ne!(second, first);
        assert!(second
            .to_str()
            .unwrap()
            .ends_with("1614834367000000_node_1_trace.json"));
    }

    #[test]
    fn test_list_trace_files() {
        let dir = tempfile::tempdir().unwrap();
        let layout = TraceLayout::new(dir.path(), "node", 1);

        assert!(list_trace_files(&layout.final_root()).unwrap().is_empty());

        for ts in [SAMPLE, SAMPLE + 3_600_000_000] {
            let path = layout.final_path(ts);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(&path, "[\n]").unwrap();
        }
        std::fs::write(layout.final_root().join("notes.txt"), "x").unwrap();

        let files = list_trace_files(&layout.final_root()).unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(files[0], layout.final_path(SAMPLE));
    }
}

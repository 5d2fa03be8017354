//! Durable extraction progress.
//!
//! The scheduler's coordinating thread is the only writer. Completion is
//! tracked per task (by output file name); `completed_count` is derived from
//! it and counts cues whose every offset has a record.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::{PipelineError, Result};
use crate::record::{write_atomic, FrameRecord};

pub const CHECKPOINT_FILE_NAME: &str = "screenshot_progress.json";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Cues with all offsets captured. Never a frame count.
    pub completed_count: usize,
    pub records: Vec<FrameRecord>,
    /// File names of tasks that produced a record.
    #[serde(default)]
    pub completed_tasks: BTreeSet<String>,
}

impl Checkpoint {
    /// Build a snapshot from the records gathered so far.
    pub fn from_records(records: &[FrameRecord], offsets_per_cue: usize) -> Self {
        let mut per_cue: HashMap<usize, usize> = HashMap::new();
        for r in records {
            *per_cue.entry(r.cue_index).or_default() += 1;
        }
        let completed_count = per_cue
            .values()
            .filter(|&&n| offsets_per_cue > 0 && n >= offsets_per_cue)
            .count();

        Self {
            completed_count,
            records: records.to_vec(),
            completed_tasks: records.iter().map(|r| r.filename.clone()).collect(),
        }
    }

    pub fn is_task_done(&self, filename: &str) -> bool {
        self.completed_tasks.contains(filename)
    }
}

/// Where the scheduler keeps its checkpoint between runs.
pub trait ProgressStore: Send {
    /// `Ok(None)` means "start from scratch".
    fn load(&self) -> Result<Option<Checkpoint>>;
    fn save(&self, snapshot: &Checkpoint) -> Result<()>;
    /// Called once the run has finished.
    fn clear(&self) -> Result<()>;
}

/// Checkpoint stored as pretty JSON, replaced atomically on every save.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at `<dir>/screenshot_progress.json`.
    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join(CHECKPOINT_FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ProgressStore for JsonFileStore {
    fn load(&self) -> Result<Option<Checkpoint>> {
        let bytes = match fs::read(&self.path) {
            Ok(b) => b,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(PipelineError::io(&self.path, e)),
        };
        let checkpoint: Checkpoint =
            serde_json::from_slice(&bytes).map_err(|e| PipelineError::json(&self.path, e))?;
        Ok(Some(checkpoint))
    }

    fn save(&self, snapshot: &Checkpoint) -> Result<()> {
        let json = serde_json::to_vec_pretty(snapshot).map_err(|e| PipelineError::json(&self.path, e))?;
        write_atomic(&self.path, &json)
    }

    fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(PipelineError::io(&self.path, e)),
        }
    }
}

/// In-process store, mostly for tests and library callers that do not want
/// files on disk.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    current: Option<Checkpoint>,
    saves: usize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_checkpoint(checkpoint: Checkpoint) -> Self {
        Self {
            inner: Mutex::new(MemoryState {
                current: Some(checkpoint),
                saves: 0,
            }),
        }
    }

    pub fn snapshot(&self) -> Option<Checkpoint> {
        self.inner.lock().ok().and_then(|s| s.current.clone())
    }

    /// Number of `save` calls so far.
    pub fn save_count(&self) -> usize {
        self.inner.lock().map(|s| s.saves).unwrap_or(0)
    }
}

impl ProgressStore for MemoryStore {
    fn load(&self) -> Result<Option<Checkpoint>> {
        Ok(self.snapshot())
    }

    fn save(&self, snapshot: &Checkpoint) -> Result<()> {
        if let Ok(mut state) = self.inner.lock() {
            state.current = Some(snapshot.clone());
            state.saves += 1;
        }
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        if let Ok(mut state) = self.inner.lock() {
            state.current = None;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::tests::record;

    #[test]
    fn completed_count_counts_whole_cues_only() {
        // cue 1 has both offsets, cue 2 only one of two
        let records = vec![record(1, 0), record(1, 1), record(2, 0)];
        let cp = Checkpoint::from_records(&records, 2);
        assert_eq!(cp.completed_count, 1);
        assert_eq!(cp.completed_tasks.len(), 3);
        assert!(cp.is_task_done("002_0.png"));
        assert!(!cp.is_task_done("002_1.png"));
    }

    #[test]
    fn json_store_round_trip_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::in_dir(dir.path());
        assert_eq!(store.load().unwrap(), None);

        let cp = Checkpoint::from_records(&[record(1, 0)], 1);
        store.save(&cp).unwrap();
        assert!(store.path().exists());
        assert_eq!(store.load().unwrap(), Some(cp));

        store.clear().unwrap();
        assert!(!store.path().exists());
        // clearing twice is fine
        store.clear().unwrap();
    }

    #[test]
    fn json_store_reports_corrupt_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::in_dir(dir.path());
        fs::write(store.path(), b"{not json").unwrap();
        assert!(matches!(store.load(), Err(PipelineError::Json { .. })));
    }

    #[test]
    fn memory_store_tracks_saves() {
        let store = MemoryStore::new();
        store.save(&Checkpoint::default()).unwrap();
        store.save(&Checkpoint::default()).unwrap();
        assert_eq!(store.save_count(), 2);
        assert!(store.snapshot().is_some());
        store.clear().unwrap();
        assert!(store.snapshot().is_none());
    }
}

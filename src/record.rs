//! The per-frame record and the JSON index built from it.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{PipelineError, Result};
use crate::planner::Task;

/// One successfully captured frame.
///
/// Born without a hash, gains `phash` in the hashing phase and is assigned
/// root/duplicate once by the clusterer. The ordered list of records is the
/// index consumed by document generators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameRecord {
    pub cue_index: usize,
    pub start_time: f64,
    pub timestamp: f64,
    pub text: String,
    pub offset: f64,
    #[serde(default)]
    pub offset_slot: usize,
    pub filename: String,
    pub path: PathBuf,
    #[serde(default)]
    pub phash: Option<String>,
    #[serde(default)]
    pub is_duplicate: bool,
    /// Position of the cluster root in the ordered index.
    #[serde(default)]
    pub duplicate_of_index: Option<usize>,
    /// `cue_index` of the cluster root.
    #[serde(default)]
    pub duplicate_of_cue: Option<usize>,
    /// File name of the cluster root, the image to embed instead of this one.
    #[serde(default)]
    pub reference_filename: Option<String>,
    /// Distance to the nearest hashed predecessor.
    #[serde(default)]
    pub hamming_distance: Option<u32>,
    #[serde(default)]
    pub hamming_distance_to_root: Option<u32>,
}

impl FrameRecord {
    pub fn from_task(task: &Task) -> Self {
        Self {
            cue_index: task.cue_index,
            start_time: task.start_time,
            timestamp: task.timestamp,
            text: task.text.clone(),
            offset: task.offset,
            offset_slot: task.offset_slot,
            filename: task.filename.clone(),
            path: task.target_path.clone(),
            phash: None,
            is_duplicate: false,
            duplicate_of_index: None,
            duplicate_of_cue: None,
            reference_filename: None,
            hamming_distance: None,
            hamming_distance_to_root: None,
        }
    }

    pub fn is_root(&self) -> bool {
        !self.is_duplicate
    }

    /// Reset cluster assignment, keeping the hash.
    pub(crate) fn mark_root(&mut self) {
        self.is_duplicate = false;
        self.duplicate_of_index = None;
        self.duplicate_of_cue = None;
        self.reference_filename = None;
        self.hamming_distance = None;
        self.hamming_distance_to_root = None;
    }

    /// The image a document should show for this record.
    pub fn embed_filename(&self) -> &str {
        match &self.reference_filename {
            Some(reference) if self.is_duplicate => reference,
            _ => &self.filename,
        }
    }
}

/// Restore cue+offset order. Everything downstream of extraction relies on it.
pub fn sort_records(records: &mut [FrameRecord]) {
    records.sort_by(|a, b| {
        a.cue_index
            .cmp(&b.cue_index)
            .then(a.offset_slot.cmp(&b.offset_slot))
            .then_with(|| a.filename.cmp(&b.filename))
    });
}

/// File to embed for `cue_index`: the first-offset record of the cue,
/// redirected to its cluster root when it is a duplicate.
pub fn embed_file_for(records: &[FrameRecord], cue_index: usize) -> Option<&str> {
    records
        .iter()
        .filter(|r| r.cue_index == cue_index)
        .min_by_key(|r| r.offset_slot)
        .map(FrameRecord::embed_filename)
}

/// Write `contents` next to `path` and rename it into place.
pub(crate) fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir).map_err(|e| PipelineError::io(dir, e))?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| PipelineError::io(dir, e))?;
    tmp.write_all(contents).map_err(|e| PipelineError::io(tmp.path(), e))?;
    tmp.as_file().sync_all().map_err(|e| PipelineError::io(tmp.path(), e))?;
    tmp.persist(path).map_err(|e| PipelineError::io(path, e.error))?;
    Ok(())
}

/// An index row as written to disk. Markdown generators from the earlier
/// pipeline key rows on `subtitle_index` and embed `reference_screenshot`,
/// so both are written next to the record's own fields.
#[derive(Serialize)]
struct IndexEntry<'a> {
    #[serde(flatten)]
    record: &'a FrameRecord,
    subtitle_index: usize,
    reference_screenshot: Option<&'a str>,
}

impl<'a> From<&'a FrameRecord> for IndexEntry<'a> {
    fn from(record: &'a FrameRecord) -> Self {
        Self {
            record,
            subtitle_index: record.cue_index,
            reference_screenshot: record
                .reference_filename
                .as_deref()
                .filter(|_| record.is_duplicate),
        }
    }
}

pub fn write_index(path: &Path, records: &[FrameRecord]) -> Result<()> {
    let entries: Vec<IndexEntry<'_>> = records.iter().map(IndexEntry::from).collect();
    let json = serde_json::to_vec_pretty(&entries).map_err(|e| PipelineError::json(path, e))?;
    write_atomic(path, &json)
}

pub fn read_index(path: &Path) -> Result<Vec<FrameRecord>> {
    let bytes = fs::read(path).map_err(|e| PipelineError::io(path, e))?;
    serde_json::from_slice(&bytes).map_err(|e| PipelineError::json(path, e))
}

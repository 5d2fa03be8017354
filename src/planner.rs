//! Turns cues into capture tasks.

use std::path::{Path, PathBuf};

use crate::config::ImageFormat;
use crate::cue::Cue;

/// One frame to capture: a (cue, offset) pair resolved to a timestamp and a
/// deterministic output file.
#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    pub cue_index: usize,
    pub start_time: f64,
    pub offset: f64,
    /// Position of `offset` in the configured offset list.
    pub offset_slot: usize,
    /// `max(0, start_time + offset)`
    pub timestamp: f64,
    pub text: String,
    pub filename: String,
    pub target_path: PathBuf,
}

/// `+1.5` -> `plus1.5s`, `-0.5` -> `minus0.5s`, `0` -> `plus0.0s`.
pub fn encode_offset(offset: f64) -> String {
    format!("{:+.1}s", offset)
        .replace('+', "plus")
        .replace('-', "minus")
}

pub fn frame_filename(cue_index: usize, offset: f64, format: ImageFormat) -> String {
    format!("{:03}_{}.{}", cue_index, encode_offset(offset), format.extension())
}

/// Expand `cues × offsets` into tasks, cue-major, offsets in configured order.
pub fn plan_tasks(cues: &[Cue], offsets: &[f64], frames_dir: &Path, format: ImageFormat) -> Vec<Task> {
    let mut tasks = Vec::with_capacity(cues.len() * offsets.len());
    for cue in cues {
        for (slot, &offset) in offsets.iter().enumerate() {
            let filename = frame_filename(cue.index, offset, format);
            tasks.push(Task {
                cue_index: cue.index,
                start_time: cue.start_time,
                offset,
                offset_slot: slot,
                timestamp: (cue.start_time + offset).max(0.0),
                text: cue.text.trim().to_string(),
                target_path: frames_dir.join(&filename),
                filename,
            });
        }
    }
    tasks
}

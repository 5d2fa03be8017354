//! Runs capture tasks on a worker pool with resumable progress.
//!
//! Workers only capture and report. The calling thread is the coordinator:
//! it owns the record list and is the only one talking to the
//! [`ProgressStore`].

use std::collections::HashSet;
use std::path::Path;
use std::time::{Duration, Instant};

use crossbeam_channel::unbounded;

use crate::capture::{FrameCapturer, FrameExtractor};
use crate::checkpoint::{Checkpoint, ProgressStore};
use crate::error::Result;
use crate::planner::Task;
use crate::record::{sort_records, FrameRecord};

/// What a worker sends back for one task.
#[derive(Debug)]
pub enum TaskOutcome {
    Extracted(FrameRecord),
    Failed { cue_index: usize, filename: String },
}

/// Summary of one extraction run.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionStats {
    pub total_cues: usize,
    /// One per task, `cues * offsets`.
    pub expected: usize,
    /// Frames on hand at the end, resumed ones included.
    pub extracted: usize,
    pub failed: usize,
    /// Records taken over from the checkpoint.
    pub resumed: usize,
    pub success_rate: f64,
    pub elapsed: Duration,
    pub offsets: usize,
    pub workers: usize,
    pub batch_size: usize,
}

#[derive(Debug, Clone)]
pub struct ExtractionOutcome {
    /// Sorted by cue, then offset position.
    pub records: Vec<FrameRecord>,
    pub stats: ExtractionStats,
}

pub struct ExtractionScheduler<'a> {
    capturer: &'a dyn FrameCapturer,
    store: &'a dyn ProgressStore,
    max_workers: usize,
    batch_size: usize,
}

impl<'a> ExtractionScheduler<'a> {
    pub fn new(capturer: &'a dyn FrameCapturer, store: &'a dyn ProgressStore) -> Self {
        Self {
            capturer,
            store,
            max_workers: crate::config::default_worker_count(),
            batch_size: 50,
        }
    }

    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers.max(1);
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn run(&self, video: &Path, tasks: &[Task]) -> Result<ExtractionOutcome> {
        self.run_with_progress(video, tasks, |_, _| {})
    }

    /// Extract every task not already covered by the checkpoint.
    ///
    /// `on_progress(settled, total)` is called from the calling thread, once
    /// up front and then after every settled task.
    pub fn run_with_progress<F>(&self, video: &Path, tasks: &[Task], mut on_progress: F) -> Result<ExtractionOutcome>
    where
        F: FnMut(usize, usize),
    {
        let started = Instant::now();
        let total = tasks.len();
        let offsets = tasks.iter().map(|t| t.offset_slot + 1).max().unwrap_or(0);
        let total_cues = tasks.iter().filter(|t| t.offset_slot == 0).count();

        let mut records = self.resume_records(tasks);
        let resumed = records.len();
        let done: HashSet<String> = records.iter().map(|r| r.filename.clone()).collect();
        let pending: Vec<&Task> = tasks.iter().filter(|t| !done.contains(&t.filename)).collect();

        tracing::info!(
            tasks = total,
            resumed,
            pending = pending.len(),
            workers = self.max_workers,
            "starting frame extraction"
        );
        on_progress(resumed, total);

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.max_workers)
            .thread_name(|i| format!("cuegrab-capture-{}", i))
            .build()?;
        let extractor = FrameExtractor::new(self.capturer);
        let mut failed = 0usize;

        pool.in_place_scope(|scope| {
            let (tx, rx) = unbounded::<TaskOutcome>();
            for task in &pending {
                let tx = tx.clone();
                let extractor = &extractor;
                let task: &Task = task;
                scope.spawn(move |_| {
                    let outcome = if extractor.extract(video, task.timestamp, &task.target_path) {
                        tracing::debug!(file = %task.filename, timestamp = task.timestamp, "frame extracted");
                        TaskOutcome::Extracted(FrameRecord::from_task(task))
                    } else {
                        TaskOutcome::Failed {
                            cue_index: task.cue_index,
                            filename: task.filename.clone(),
                        }
                    };
                    // the coordinator outlives every worker
                    let _ = tx.send(outcome);
                });
            }
            drop(tx);

            let mut since_save = 0usize;
            for outcome in rx {
                match outcome {
                    TaskOutcome::Extracted(record) => records.push(record),
                    TaskOutcome::Failed { cue_index, filename } => {
                        tracing::debug!(cue_index, file = %filename, "task failed");
                        failed += 1;
                    }
                }
                since_save += 1;
                on_progress(records.len() + failed, total);
                if since_save >= self.batch_size {
                    self.save_checkpoint(&records, offsets);
                    since_save = 0;
                }
            }
            if since_save > 0 {
                self.save_checkpoint(&records, offsets);
            }
        });

        sort_records(&mut records);
        if let Err(e) = self.store.clear() {
            tracing::warn!(error = %e, "could not clear extraction checkpoint");
        }

        let extracted = records.len();
        let stats = ExtractionStats {
            total_cues,
            expected: total,
            extracted,
            failed,
            resumed,
            success_rate: if total == 0 { 0.0 } else { extracted as f64 / total as f64 },
            elapsed: started.elapsed(),
            offsets,
            workers: self.max_workers,
            batch_size: self.batch_size,
        };
        tracing::info!(
            extracted,
            failed,
            expected = total,
            success_rate = %format!("{:.1}%", stats.success_rate * 100.0),
            elapsed = ?stats.elapsed,
            "frame extraction finished"
        );

        Ok(ExtractionOutcome { records, stats })
    }

    /// Records from a previous run that still match a planned task.
    fn resume_records(&self, tasks: &[Task]) -> Vec<FrameRecord> {
        let checkpoint = match self.store.load() {
            Ok(Some(cp)) => cp,
            Ok(None) => return Vec::new(),
            Err(e) => {
                tracing::warn!(error = %e, "ignoring unreadable checkpoint, starting fresh");
                return Vec::new();
            }
        };

        let planned: HashSet<&str> = tasks.iter().map(|t| t.filename.as_str()).collect();
        let mut seen: HashSet<String> = HashSet::new();
        let mut records: Vec<FrameRecord> = checkpoint
            .records
            .iter()
            .filter(|r| checkpoint.is_task_done(&r.filename) && planned.contains(r.filename.as_str()))
            .filter(|r| seen.insert(r.filename.clone()))
            .cloned()
            .collect();
        let dropped = checkpoint.records.len() - records.len();
        if dropped > 0 {
            tracing::debug!(dropped, "checkpoint records not matching the current plan were dropped");
        }
        sort_records(&mut records);
        tracing::info!(
            records = records.len(),
            completed_cues = checkpoint.completed_count,
            "resuming from checkpoint"
        );
        records
    }

    fn save_checkpoint(&self, records: &[FrameRecord], offsets_per_cue: usize) {
        let snapshot = Checkpoint::from_records(records, offsets_per_cue);
        if let Err(e) = self.store.save(&snapshot) {
            tracing::warn!(error = %e, "failed to save checkpoint, continuing");
        }
    }
}

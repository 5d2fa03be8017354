//! # cuegrab - transcript-aligned frame extraction
//!
//! `cuegrab` grabs one still frame per subtitle cue from a video and folds
//! visually identical frames together, so a document built from the
//! transcript does not embed the same slide fifty times.
//!
//! ## Features
//!
//! - SRT or JSON cue lists, any number of signed time offsets per cue
//! - Parallel ffmpeg captures with a per-frame timeout
//! - Resumable runs through a periodically saved checkpoint
//! - 64-bit DCT perceptual hashes and drift-safe duplicate clustering
//! - Optional HTML report of every duplicate cluster
//! - Progress reporting for integration with UI applications
//!
//! ## Example
//!
//! ```no_run
//! use cuegrab::{load_cues, FramePipeline, PipelineConfig};
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let cues = load_cues(Path::new("talk.srt"))?;
//! let pipeline = FramePipeline::new(PipelineConfig::default())?;
//! let outcome = pipeline.run(Path::new("talk.mp4"), &cues, Path::new("out"))?;
//! println!(
//!     "{}/{} frames, index at {}",
//!     outcome.stats.extracted,
//!     outcome.stats.expected,
//!     outcome.index_path.display()
//! );
//! # Ok(())
//! # }
//! ```
//!
//! ## Progress Reporting
//!
//! ```no_run
//! use cuegrab::{FramePipeline, PipelineConfig, ProgressPhase};
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let pipeline = FramePipeline::new(PipelineConfig::default())?;
//! let cues = cuegrab::load_cues(Path::new("talk.srt"))?;
//! pipeline.run_with_progress(Path::new("talk.mp4"), &cues, Path::new("out"), |progress| {
//!     match progress.phase {
//!         ProgressPhase::ExtractingFrames | ProgressPhase::HashingFrames => {
//!             println!("{}: {}/{}", progress.message, progress.completed, progress.total);
//!         }
//!         ProgressPhase::Clustering => println!("Clustering..."),
//!         ProgressPhase::WritingReport => println!("Writing report..."),
//!         ProgressPhase::Complete => println!("Done!"),
//!     }
//! })?;
//! # Ok(())
//! # }
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

pub mod capture;
pub mod checkpoint;
pub mod cluster;
pub mod config;
pub mod cue;
pub mod error;
pub mod phash;
pub mod planner;
pub mod record;
pub mod report;
pub mod scheduler;

pub use capture::{validate_video, FfmpegCapturer, FrameCapturer, FrameExtractor};
pub use checkpoint::{Checkpoint, JsonFileStore, MemoryStore, ProgressStore};
pub use cluster::{cluster, resolve_root, ClusterGroup, ClusterStats};
pub use config::{FfmpegConfig, ImageFormat, PipelineConfig};
pub use cue::{load_cues, parse_srt, validate_cues, Cue};
pub use error::{CaptureError, PipelineError, Result};
pub use phash::{hash_all, DctHasher, FrameHasher, PerceptualHash};
pub use planner::{plan_tasks, Task};
pub use record::{embed_file_for, read_index, sort_records, write_index, FrameRecord};
pub use report::{write_report, ReportSummary};
pub use scheduler::{ExtractionOutcome, ExtractionScheduler, ExtractionStats, TaskOutcome};

pub const FRAMES_DIR_NAME: &str = "screenshots";
pub const INDEX_FILE_NAME: &str = "screenshot_index.json";

/// Represents the current phase of a pipeline run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProgressPhase {
    /// Capturing frames with ffmpeg
    ExtractingFrames,
    /// Computing perceptual hashes
    HashingFrames,
    /// Assigning duplicates to cluster roots
    Clustering,
    /// Writing the HTML report
    WritingReport,
    /// Run finished
    Complete,
}

/// Progress information for pipeline runs
///
/// This struct provides detailed progress information that can be used
/// to display progress in UI applications.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Progress {
    /// Current phase of the run
    pub phase: ProgressPhase,
    /// Number of items completed in the current phase
    pub completed: usize,
    /// Total number of items in the current phase (0 if unknown/indeterminate)
    pub total: usize,
    /// Percentage complete (0.0 to 100.0)
    pub percentage: f64,
    /// Human-readable message describing current status
    pub message: String,
}

fn percentage(completed: usize, total: usize) -> f64 {
    if total > 0 {
        (completed as f64 / total as f64) * 100.0
    } else {
        0.0
    }
}

impl Progress {
    pub fn extracting_frames(completed: usize, total: usize) -> Self {
        Self {
            phase: ProgressPhase::ExtractingFrames,
            completed,
            total,
            percentage: percentage(completed, total),
            message: format!("Extracting frame {} of {}", completed, total),
        }
    }

    pub fn hashing_frames(completed: usize, total: usize) -> Self {
        Self {
            phase: ProgressPhase::HashingFrames,
            completed,
            total,
            percentage: percentage(completed, total),
            message: format!("Hashing frame {} of {}", completed, total),
        }
    }

    pub fn clustering(total: usize) -> Self {
        Self {
            phase: ProgressPhase::Clustering,
            completed: 0,
            total,
            percentage: 0.0,
            message: format!("Clustering {} frames...", total),
        }
    }

    pub fn writing_report() -> Self {
        Self {
            phase: ProgressPhase::WritingReport,
            completed: 0,
            total: 0,
            percentage: 0.0,
            message: "Writing duplicate report...".to_string(),
        }
    }

    /// Create a completion progress update
    pub fn complete(total_frames: usize) -> Self {
        Self {
            phase: ProgressPhase::Complete,
            completed: total_frames,
            total: total_frames,
            percentage: 100.0,
            message: format!("Run complete: {} frames", total_frames),
        }
    }
}

/// Everything a finished run produced.
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub index_path: PathBuf,
    pub frames_dir: PathBuf,
    pub records: Vec<FrameRecord>,
    pub stats: ExtractionStats,
    /// `None` when deduplication is disabled.
    pub dedup: Option<ClusterStats>,
    /// `None` unless a report was requested.
    pub report: Option<ReportSummary>,
}

/// Extraction, hashing, clustering and index writing in one place.
///
/// The external tools sit behind [`FrameCapturer`] and [`FrameHasher`] and
/// the checkpoint behind [`ProgressStore`]; all three can be swapped before
/// the first run.
pub struct FramePipeline {
    config: PipelineConfig,
    capturer: Box<dyn FrameCapturer>,
    hasher: Box<dyn FrameHasher>,
    store: Option<Box<dyn ProgressStore>>,
}

impl FramePipeline {
    /// Pipeline with ffmpeg capture, DCT hashing and a JSON checkpoint next
    /// to the output.
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate().map_err(|e| PipelineError::Config(format!("{:#}", e)))?;
        Ok(Self {
            capturer: Box::new(FfmpegCapturer::from_config(&config)),
            hasher: Box::new(DctHasher::new()),
            store: None,
            config,
        })
    }

    pub fn with_capturer(mut self, capturer: impl FrameCapturer + 'static) -> Self {
        self.capturer = Box::new(capturer);
        self
    }

    pub fn with_hasher(mut self, hasher: impl FrameHasher + 'static) -> Self {
        self.hasher = Box::new(hasher);
        self
    }

    pub fn with_store(mut self, store: impl ProgressStore + 'static) -> Self {
        self.store = Some(Box::new(store));
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn run(&self, video: &Path, cues: &[Cue], out_dir: &Path) -> Result<PipelineOutcome> {
        self.run_with_progress(video, cues, out_dir, |_| {})
    }

    /// Run every stage, reporting [`Progress`] along the way.
    ///
    /// Input and environment problems abort before anything is captured.
    /// Individual frame failures only show up in the returned statistics.
    pub fn run_with_progress<F>(&self, video: &Path, cues: &[Cue], out_dir: &Path, progress_callback: F) -> Result<PipelineOutcome>
    where
        F: Fn(Progress) + Send + Sync,
    {
        let cue_stats = validate_cues(cues).map_err(|e| PipelineError::InvalidCues(format!("{:#}", e)))?;
        tracing::info!(
            cues = cue_stats.count,
            duration_secs = cue_stats.total_duration,
            "cue list accepted"
        );
        if cue_stats.empty_text > 0 || cue_stats.overlapping > 0 {
            tracing::warn!(
                empty_text = cue_stats.empty_text,
                overlapping = cue_stats.overlapping,
                "cue list has questionable entries"
            );
        }
        let info = validate_video(video, &self.config.ffmpeg, self.config.probe_video)?;
        tracing::info!(video = %video.display(), size = info.size_bytes, duration = ?info.duration_secs, "video accepted");
        self.capturer.check_available()?;

        let frames_dir = out_dir.join(FRAMES_DIR_NAME);
        fs::create_dir_all(&frames_dir).map_err(|e| PipelineError::io(&frames_dir, e))?;

        let tasks = plan_tasks(cues, &self.config.time_offsets, &frames_dir, self.config.image_format);

        let default_store;
        let store: &dyn ProgressStore = match &self.store {
            Some(s) => s.as_ref(),
            None => {
                default_store = JsonFileStore::in_dir(out_dir);
                &default_store
            }
        };

        let workers = self.config.worker_count();
        let extraction = ExtractionScheduler::new(self.capturer.as_ref(), store)
            .with_max_workers(workers)
            .with_batch_size(self.config.batch_size)
            .run_with_progress(video, &tasks, |done, total| {
                progress_callback(Progress::extracting_frames(done, total))
            })?;
        let ExtractionOutcome { mut records, stats } = extraction;

        let on_disk = verify_frames_dir(&frames_dir, self.config.image_format);
        if on_disk != stats.extracted {
            tracing::warn!(on_disk, extracted = stats.extracted, "frame directory does not match extraction results");
        }

        let dedup = if self.config.enable_deduplication {
            Some(self.dedup_records(&mut records, &progress_callback)?)
        } else {
            tracing::info!("deduplication disabled, every frame stays a root");
            None
        };

        let index_path = out_dir.join(INDEX_FILE_NAME);
        write_index(&index_path, &records)?;
        tracing::info!(path = %index_path.display(), records = records.len(), "index written");

        let report = match (&dedup, self.config.generate_dedup_report) {
            (Some(clusters), true) => {
                progress_callback(Progress::writing_report());
                Some(write_report(&records, clusters, &frames_dir, &out_dir.join(report::REPORT_DIR_NAME)))
            }
            (None, true) => {
                tracing::warn!("report requested but deduplication is disabled, skipping it");
                None
            }
            _ => None,
        };

        progress_callback(Progress::complete(records.len()));
        Ok(PipelineOutcome {
            index_path,
            frames_dir,
            records,
            stats,
            dedup,
            report,
        })
    }

    /// Re-hash and re-cluster an existing index in place, e.g. with a new
    /// threshold.
    pub fn dedup_index(&self, index_path: &Path) -> Result<ClusterStats> {
        let mut records = load_index_for_rework(index_path)?;
        let stats = self.dedup_records(&mut records, &|_| {})?;
        write_index(index_path, &records)?;
        Ok(stats)
    }

    /// Rebuild the HTML report for an index that was already clustered.
    pub fn report_index(&self, index_path: &Path) -> Result<ReportSummary> {
        let records = load_index_for_rework(index_path)?;
        let base = index_dir(index_path);
        let stats = cluster::stats_for(&records);
        Ok(write_report(
            &records,
            &stats,
            &base.join(FRAMES_DIR_NAME),
            &base.join(report::REPORT_DIR_NAME),
        ))
    }

    fn dedup_records<F>(&self, records: &mut [FrameRecord], progress_callback: &F) -> Result<ClusterStats>
    where
        F: Fn(Progress) + Send + Sync,
    {
        phash::hash_all_with_progress(records, self.hasher.as_ref(), self.config.worker_count(), |done, total| {
            progress_callback(Progress::hashing_frames(done, total))
        })?;
        progress_callback(Progress::clustering(records.len()));
        Ok(cluster(records, self.config.phash_threshold))
    }
}

fn index_dir(index_path: &Path) -> &Path {
    match index_path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    }
}

/// Read an index and point records at the frames directory beside it when
/// their stored path no longer exists (the output was moved).
fn load_index_for_rework(index_path: &Path) -> Result<Vec<FrameRecord>> {
    let mut records = read_index(index_path)?;
    let frames_dir = index_dir(index_path).join(FRAMES_DIR_NAME);
    for r in records.iter_mut().filter(|r| !r.path.exists()) {
        r.path = frames_dir.join(&r.filename);
    }
    sort_records(&mut records);
    Ok(records)
}

/// Count finished frame files in `frames_dir`, ignoring in-flight partials.
pub fn verify_frames_dir(frames_dir: &Path, format: ImageFormat) -> usize {
    WalkDir::new(frames_dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| !e.file_name().to_string_lossy().starts_with('.'))
        .filter(|e| e.path().extension().map(|x| x == format.extension()).unwrap_or(false))
        .count()
}

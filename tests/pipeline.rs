use cuegrab::checkpoint::CHECKPOINT_FILE_NAME;
use cuegrab::{
    embed_file_for, plan_tasks, read_index, CaptureError, Checkpoint, Cue, FrameCapturer, FramePipeline, FrameRecord,
    ImageFormat, JsonFileStore, PipelineConfig, PipelineError, ProgressPhase, ProgressStore,
};
use image::{GrayImage, Luma};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// Renders a blocky "slide": the first 30 seconds show one, the rest another.
#[derive(Clone, Default)]
struct SlideCapturer {
    calls: Arc<AtomicUsize>,
}

fn slide(seed: u32) -> GrayImage {
    let mut state = seed.wrapping_mul(2_654_435_761).wrapping_add(7);
    let cells: Vec<u8> = (0..64)
        .map(|_| {
            state = state.wrapping_mul(1_103_515_245).wrapping_add(12_345);
            30 + ((state >> 16) % 170) as u8
        })
        .collect();
    GrayImage::from_fn(160, 90, |x, y| Luma([cells[((y * 8 / 90) * 8 + x * 8 / 160) as usize]]))
}

impl FrameCapturer for SlideCapturer {
    fn check_available(&self) -> Result<(), PipelineError> {
        Ok(())
    }

    fn capture(&self, _video: &Path, timestamp: f64, output: &Path) -> Result<(), CaptureError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let seed = if timestamp < 30.0 { 1 } else { 2 };
        slide(seed)
            .save(output)
            .map_err(|e| CaptureError::Io(std::io::Error::other(e.to_string())))
    }
}

struct MissingTool;

impl FrameCapturer for MissingTool {
    fn check_available(&self) -> Result<(), PipelineError> {
        Err(PipelineError::ToolUnavailable {
            tool: "ffmpeg".into(),
            reason: "not on PATH".into(),
        })
    }

    fn capture(&self, _: &Path, _: f64, _: &Path) -> Result<(), CaptureError> {
        unreachable!("capture must not run without the tool")
    }
}

struct Workspace {
    _dir: TempDir,
    video: PathBuf,
    out: PathBuf,
}

fn workspace() -> Workspace {
    let dir = tempfile::tempdir().unwrap();
    let video = dir.path().join("lecture.mp4");
    fs::write(&video, vec![0u8; 4096]).unwrap();
    let out = dir.path().join("out");
    Workspace { video, out, _dir: dir }
}

fn cues() -> Vec<Cue> {
    (0..6).map(|i| Cue::new(i + 1, i as f64 * 10.0, format!("sentence {}", i + 1))).collect()
}

fn config() -> PipelineConfig {
    PipelineConfig {
        probe_video: false,
        max_workers: Some(3),
        batch_size: 2,
        ..Default::default()
    }
}

#[test]
fn full_run_extracts_clusters_and_writes_artifacts() {
    let ws = workspace();
    let capturer = SlideCapturer::default();
    let pipeline = FramePipeline::new(PipelineConfig {
        generate_dedup_report: true,
        ..config()
    })
    .unwrap()
    .with_capturer(capturer.clone());

    let phases = Mutex::new(Vec::new());
    let outcome = pipeline
        .run_with_progress(&ws.video, &cues(), &ws.out, |p| {
            let mut seen = phases.lock().unwrap();
            if seen.last() != Some(&p.phase) {
                seen.push(p.phase);
            }
        })
        .unwrap();

    assert_eq!(capturer.calls.load(Ordering::SeqCst), 6);
    assert_eq!(outcome.stats.extracted, 6);
    assert_eq!(outcome.stats.success_rate, 1.0);

    let dedup = outcome.dedup.as_ref().unwrap();
    assert_eq!(dedup.roots, 2);
    assert_eq!(dedup.duplicates, 4);
    assert_eq!(dedup.clusters.len(), 2);

    let records = read_index(&outcome.index_path).unwrap();
    assert_eq!(records, outcome.records);
    assert_eq!(records[2].duplicate_of_index, Some(0));
    assert_eq!(records[5].duplicate_of_index, Some(3));
    assert_eq!(embed_file_for(&records, 3), Some("001_plus0.0s.png"));
    assert_eq!(embed_file_for(&records, 6), Some("004_plus0.0s.png"));

    assert!(!ws.out.join(CHECKPOINT_FILE_NAME).exists());
    let report = outcome.report.unwrap();
    assert_eq!(report.errors, 0);
    assert!(report.index_page.exists());

    assert_eq!(
        phases.into_inner().unwrap(),
        vec![
            ProgressPhase::ExtractingFrames,
            ProgressPhase::HashingFrames,
            ProgressPhase::Clustering,
            ProgressPhase::WritingReport,
            ProgressPhase::Complete,
        ]
    );
}

#[test]
fn second_run_captures_nothing() {
    let ws = workspace();
    let capturer = SlideCapturer::default();
    let pipeline = FramePipeline::new(config()).unwrap().with_capturer(capturer.clone());

    let first = pipeline.run(&ws.video, &cues(), &ws.out).unwrap();
    let second = pipeline.run(&ws.video, &cues(), &ws.out).unwrap();

    assert_eq!(capturer.calls.load(Ordering::SeqCst), 6);
    assert_eq!(first.records, second.records);
}

#[test]
fn resumes_from_a_checkpoint_left_by_an_interrupted_run() {
    let ws = workspace();
    let frames = ws.out.join("screenshots");
    fs::create_dir_all(&frames).unwrap();

    let tasks = plan_tasks(&cues(), &[0.0], &frames, ImageFormat::Png);
    let done: Vec<FrameRecord> = tasks[..4].iter().map(FrameRecord::from_task).collect();
    for t in &tasks[..4] {
        slide(if t.timestamp < 30.0 { 1 } else { 2 }).save(&t.target_path).unwrap();
    }
    JsonFileStore::in_dir(&ws.out)
        .save(&Checkpoint::from_records(&done, 1))
        .unwrap();

    let capturer = SlideCapturer::default();
    let outcome = FramePipeline::new(config())
        .unwrap()
        .with_capturer(capturer.clone())
        .run(&ws.video, &cues(), &ws.out)
        .unwrap();

    assert_eq!(capturer.calls.load(Ordering::SeqCst), 2);
    assert_eq!(outcome.stats.resumed, 4);
    assert_eq!(outcome.stats.extracted, 6);
    assert_eq!(outcome.dedup.unwrap().duplicates, 4);
    assert!(!ws.out.join(CHECKPOINT_FILE_NAME).exists());
}

fn relative(records: &[FrameRecord]) -> Vec<FrameRecord> {
    records
        .iter()
        .cloned()
        .map(|mut r| {
            r.path = PathBuf::from(&r.filename);
            r
        })
        .collect()
}

#[test]
fn resumed_run_produces_the_same_index_as_an_uninterrupted_one() {
    let uninterrupted = workspace();
    let fresh = FramePipeline::new(config())
        .unwrap()
        .with_capturer(SlideCapturer::default())
        .run(&uninterrupted.video, &cues(), &uninterrupted.out)
        .unwrap();

    let ws = workspace();
    let frames = ws.out.join("screenshots");
    fs::create_dir_all(&frames).unwrap();
    let tasks = plan_tasks(&cues(), &[0.0], &frames, ImageFormat::Png);
    let done: Vec<FrameRecord> = tasks[..3].iter().map(FrameRecord::from_task).collect();
    for t in &tasks[..3] {
        slide(1).save(&t.target_path).unwrap();
    }
    JsonFileStore::in_dir(&ws.out)
        .save(&Checkpoint::from_records(&done, 1))
        .unwrap();

    let resumed = FramePipeline::new(config())
        .unwrap()
        .with_capturer(SlideCapturer::default())
        .run(&ws.video, &cues(), &ws.out)
        .unwrap();

    assert_eq!(resumed.stats.resumed, 3);
    assert_eq!(relative(&resumed.records), relative(&fresh.records));
    assert_eq!(
        relative(&read_index(&resumed.index_path).unwrap()),
        relative(&read_index(&fresh.index_path).unwrap())
    );
}

#[test]
fn disabled_dedup_leaves_every_frame_a_root() {
    let ws = workspace();
    let pipeline = FramePipeline::new(PipelineConfig {
        enable_deduplication: false,
        time_offsets: vec![-1.0, 0.0],
        ..config()
    })
    .unwrap()
    .with_capturer(SlideCapturer::default());

    let outcome = pipeline.run(&ws.video, &cues(), &ws.out).unwrap();
    assert_eq!(outcome.stats.expected, 12);
    assert!(outcome.dedup.is_none());
    assert!(outcome.records.iter().all(|r| r.is_root() && r.phash.is_none()));
    assert_eq!(outcome.records[0].filename, "001_minus1.0s.png");
    assert_eq!(outcome.records[0].timestamp, 0.0);
}

#[test]
fn missing_capture_tool_is_fatal_before_any_work() {
    let ws = workspace();
    let err = FramePipeline::new(config())
        .unwrap()
        .with_capturer(MissingTool)
        .run(&ws.video, &cues(), &ws.out)
        .unwrap_err();

    assert!(matches!(err, PipelineError::ToolUnavailable { .. }));
    assert!(!ws.out.join("screenshots").exists());
}

#[test]
fn invalid_video_is_fatal() {
    let ws = workspace();
    let err = FramePipeline::new(config())
        .unwrap()
        .with_capturer(SlideCapturer::default())
        .run(&ws.out.join("nope.mp4"), &cues(), &ws.out)
        .unwrap_err();
    assert!(matches!(err, PipelineError::InvalidVideo { .. }));
}

#[test]
fn dedup_and_report_can_be_rerun_from_the_index() {
    let ws = workspace();
    let outcome = FramePipeline::new(PipelineConfig {
        enable_deduplication: false,
        ..config()
    })
    .unwrap()
    .with_capturer(SlideCapturer::default())
    .run(&ws.video, &cues(), &ws.out)
    .unwrap();

    let pipeline = FramePipeline::new(config()).unwrap();
    let stats = pipeline.dedup_index(&outcome.index_path).unwrap();
    assert_eq!(stats.duplicates, 4);
    assert!(read_index(&outcome.index_path).unwrap()[1].is_duplicate);

    let summary = pipeline.report_index(&outcome.index_path).unwrap();
    assert_eq!(summary.errors, 0);
    assert_eq!(summary.images_copied, 6);
    assert!(ws.out.join("dedup_report").join("frames").join("002_plus0.0s.html").exists());
}

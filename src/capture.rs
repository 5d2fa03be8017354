//! Single-frame capture through an external tool.

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command as ProcCommand, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use serde::Deserialize;

use crate::config::{FfmpegConfig, PipelineConfig};
use crate::error::{CaptureError, PipelineError};

const POLL_INTERVAL: Duration = Duration::from_millis(20);
const TOOL_CHECK_TIMEOUT: Duration = Duration::from_secs(10);
const PROBE_TIMEOUT: Duration = Duration::from_secs(30);

pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "avi", "mov", "mkv", "webm"];

/// Something that can write one still image of `video` at `timestamp`.
///
/// Implementations must not treat an existing `output` specially; skipping
/// finished work is [`FrameExtractor`]'s job.
pub trait FrameCapturer: Send + Sync {
    /// Fails when the tool cannot run at all. Checked once per batch.
    fn check_available(&self) -> Result<(), PipelineError>;

    fn capture(&self, video: &Path, timestamp: f64, output: &Path) -> Result<(), CaptureError>;
}

/// Captures with `ffmpeg -ss T -i VIDEO -frames:v 1`.
#[derive(Debug, Clone)]
pub struct FfmpegCapturer {
    pub ffmpeg: FfmpegConfig,
    /// ffmpeg `-q:v` value, 1 (best) to 31.
    pub qscale: u8,
    pub resolution: String,
    pub timeout: Duration,
}

impl FfmpegCapturer {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            ffmpeg: config.ffmpeg.clone(),
            qscale: quality_to_qscale(config.image_quality),
            resolution: config.resolution.clone(),
            timeout: config.capture_timeout(),
        }
    }

    fn command(&self, video: &Path, timestamp: f64, output: &Path) -> ProcCommand {
        let mut cmd = ProcCommand::new(self.ffmpeg.ffmpeg_cmd());
        cmd.arg("-loglevel")
            .arg("error")
            .arg("-ss")
            .arg(format!("{:.3}", timestamp))
            .arg("-i")
            .arg(video)
            .arg("-frames:v")
            .arg("1")
            .arg("-q:v")
            .arg(self.qscale.to_string())
            .arg("-s")
            .arg(&self.resolution)
            .arg("-y")
            .arg(output)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        cmd
    }
}

impl FrameCapturer for FfmpegCapturer {
    fn check_available(&self) -> Result<(), PipelineError> {
        check_tool(&self.ffmpeg.ffmpeg_cmd().to_string_lossy(), "-version")
    }

    fn capture(&self, video: &Path, timestamp: f64, output: &Path) -> Result<(), CaptureError> {
        let mut cmd = self.command(video, timestamp, output);
        let mut child = cmd.spawn().map_err(|source| CaptureError::Spawn {
            program: self.ffmpeg.ffmpeg_cmd().to_string_lossy().into_owned(),
            source,
        })?;

        let status = wait_or_kill(&mut child, self.timeout)?;
        if !status.success() {
            return Err(CaptureError::ExitStatus(status.to_string()));
        }
        if !output.exists() {
            return Err(CaptureError::MissingOutput(output.to_path_buf()));
        }
        Ok(())
    }
}

/// Map a 1..=100 quality onto ffmpeg's `-q:v` (`100 - quality`, clamped to 1..=31).
pub fn quality_to_qscale(quality: u8) -> u8 {
    100u8.saturating_sub(quality).clamp(1, 31)
}

/// Wait for `child`, killing it once `timeout` has passed.
fn wait_or_kill(child: &mut Child, timeout: Duration) -> Result<ExitStatus, CaptureError> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(status);
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            return Err(CaptureError::Timeout(timeout));
        }
        thread::sleep(POLL_INTERVAL);
    }
}

fn check_tool(program: &str, version_flag: &str) -> Result<(), PipelineError> {
    let unavailable = |reason: String| PipelineError::ToolUnavailable {
        tool: program.to_string(),
        reason,
    };
    let mut child = ProcCommand::new(program)
        .arg(version_flag)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| unavailable(e.to_string()))?;
    let status = wait_or_kill(&mut child, TOOL_CHECK_TIMEOUT).map_err(|e| unavailable(e.to_string()))?;
    if !status.success() {
        return Err(unavailable(format!("`{} {}` exited with {}", program, version_flag, status)));
    }
    Ok(())
}

/// Removes the wrapped file on drop unless it was disarmed.
pub struct TempFileGuard {
    path: PathBuf,
    armed: bool,
}

impl TempFileGuard {
    pub fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Move the file to `dest` and stop tracking it.
    pub fn persist(mut self, dest: &Path) -> std::io::Result<()> {
        fs::rename(&self.path, dest)?;
        self.armed = false;
        Ok(())
    }
}

impl Drop for TempFileGuard {
    fn drop(&mut self) {
        if self.armed {
            let _ = fs::remove_file(&self.path);
        }
    }
}

/// Sibling path a capture writes to before being renamed into place.
/// Keeps the extension so ffmpeg still picks the right encoder.
pub fn partial_path(target: &Path) -> PathBuf {
    let stem = target.file_stem().and_then(|s| s.to_str()).unwrap_or("frame");
    let name = match target.extension().and_then(|e| e.to_str()) {
        Some(ext) => format!(".{}.partial.{}", stem, ext),
        None => format!(".{}.partial", stem),
    };
    target.with_file_name(name)
}

/// Idempotent wrapper around a [`FrameCapturer`].
pub struct FrameExtractor<'a> {
    capturer: &'a dyn FrameCapturer,
}

impl<'a> FrameExtractor<'a> {
    pub fn new(capturer: &'a dyn FrameCapturer) -> Self {
        Self { capturer }
    }

    /// Make sure `target` holds a frame of `video` at `timestamp`.
    ///
    /// An existing `target` counts as done and the capturer is not called.
    /// Every failure is logged and reported as `false`.
    pub fn extract(&self, video: &Path, timestamp: f64, target: &Path) -> bool {
        if target.exists() {
            tracing::debug!(target = %target.display(), "frame already present");
            return true;
        }

        let guard = TempFileGuard::new(partial_path(target));
        // A stale partial from a killed run would make ffmpeg's -y harmless,
        // but a fake capturer may not overwrite.
        let _ = fs::remove_file(guard.path());

        match self.capturer.capture(video, timestamp, guard.path()) {
            Ok(()) if guard.path().exists() => match guard.persist(target) {
                Ok(()) => true,
                Err(e) => {
                    tracing::warn!(target = %target.display(), error = %e, "could not move captured frame into place");
                    false
                }
            },
            Ok(()) => {
                tracing::warn!(target = %target.display(), "capture reported success but wrote nothing");
                false
            }
            Err(e) => {
                tracing::warn!(timestamp, target = %target.display(), error = %e, "frame capture failed");
                false
            }
        }
    }
}

/// What ffprobe told us about the input.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoInfo {
    pub size_bytes: u64,
    /// `None` when probing was skipped.
    pub duration_secs: Option<f64>,
}

#[derive(Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    #[serde(default)]
    format: Option<ProbeFormat>,
}

#[derive(Deserialize)]
struct ProbeStream {
    #[serde(default)]
    codec_type: Option<String>,
}

#[derive(Deserialize)]
struct ProbeFormat {
    #[serde(default)]
    duration: Option<String>,
}

/// Reject inputs that cannot possibly yield frames.
pub fn validate_video(path: &Path, ffmpeg: &FfmpegConfig, probe: bool) -> Result<VideoInfo, PipelineError> {
    let invalid = |reason: String| PipelineError::InvalidVideo {
        path: path.to_path_buf(),
        reason,
    };

    let meta = fs::metadata(path).map_err(|e| invalid(e.to_string()))?;
    if !meta.is_file() {
        return Err(invalid("not a regular file".into()));
    }
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    if !VIDEO_EXTENSIONS.contains(&ext.as_str()) {
        return Err(invalid(format!("unsupported container '{}'", ext)));
    }
    if meta.len() < 1024 {
        return Err(invalid(format!("file too small ({} bytes)", meta.len())));
    }
    if !probe {
        return Ok(VideoInfo {
            size_bytes: meta.len(),
            duration_secs: None,
        });
    }

    let program = ffmpeg.ffprobe_cmd();
    let mut child = ProcCommand::new(&program)
        .args(["-v", "quiet", "-print_format", "json", "-show_format", "-show_streams"])
        .arg(path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| PipelineError::ToolUnavailable {
            tool: program.to_string_lossy().into_owned(),
            reason: e.to_string(),
        })?;

    let mut stdout = child
        .stdout
        .take()
        .ok_or_else(|| invalid("ffprobe stdout unavailable".into()))?;
    let reader = thread::spawn(move || {
        let mut buf = Vec::new();
        stdout.read_to_end(&mut buf).map(|_| buf)
    });
    let status = wait_or_kill(&mut child, PROBE_TIMEOUT).map_err(|e| invalid(format!("ffprobe: {}", e)))?;
    let output = reader
        .join()
        .map_err(|_| invalid("ffprobe reader panicked".into()))?
        .map_err(|e| invalid(format!("reading ffprobe output: {}", e)))?;
    if !status.success() {
        return Err(invalid(format!("ffprobe exited with {}", status)));
    }

    let parsed: ProbeOutput =
        serde_json::from_slice(&output).map_err(|e| invalid(format!("unparseable ffprobe output: {}", e)))?;
    if !parsed.streams.iter().any(|s| s.codec_type.as_deref() == Some("video")) {
        return Err(invalid("no video stream".into()));
    }
    let duration = parsed
        .format
        .and_then(|f| f.duration)
        .and_then(|d| d.parse::<f64>().ok())
        .unwrap_or(0.0);
    if duration <= 0.0 {
        return Err(invalid("non-positive duration".into()));
    }

    Ok(VideoInfo {
        size_bytes: meta.len(),
        duration_secs: Some(duration),
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Writes a few bytes per capture, or fails for listed timestamps.
    #[derive(Default)]
    pub(crate) struct FakeCapturer {
        pub calls: AtomicUsize,
        pub fail_at: Vec<f64>,
        pub write_nothing: bool,
    }

    impl FrameCapturer for FakeCapturer {
        fn check_available(&self) -> Result<(), PipelineError> {
            Ok(())
        }

        fn capture(&self, _video: &Path, timestamp: f64, output: &Path) -> Result<(), CaptureError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_at.iter().any(|t| (t - timestamp).abs() < 1e-9) {
                // leave a truncated file behind like a killed ffmpeg would
                fs::write(output, b"trunc")?;
                return Err(CaptureError::Timeout(Duration::from_secs(30)));
            }
            if !self.write_nothing {
                fs::write(output, format!("frame@{}", timestamp))?;
            }
            Ok(())
        }
    }

    #[test]
    fn qscale_mapping() {
        assert_eq!(quality_to_qscale(95), 5);
        assert_eq!(quality_to_qscale(100), 1);
        assert_eq!(quality_to_qscale(1), 31);
    }

    #[test]
    fn partial_path_keeps_extension() {
        let p = partial_path(Path::new("/x/shots/001_plus0.0s.png"));
        assert_eq!(p, Path::new("/x/shots/.001_plus0.0s.partial.png"));
    }

    #[test]
    fn existing_target_skips_capture() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("001_plus0.0s.png");
        let fake = FakeCapturer::default();
        let extractor = FrameExtractor::new(&fake);

        assert!(extractor.extract(Path::new("v.mp4"), 1.0, &target));
        assert!(extractor.extract(Path::new("v.mp4"), 1.0, &target));
        assert_eq!(fake.calls.load(Ordering::SeqCst), 1);
        assert_eq!(fs::read_to_string(&target).unwrap(), "frame@1");
    }

    #[test]
    fn failed_capture_leaves_no_file_behind() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("002_plus0.0s.png");
        let fake = FakeCapturer {
            fail_at: vec![2.0],
            ..Default::default()
        };
        let extractor = FrameExtractor::new(&fake);

        assert!(!extractor.extract(Path::new("v.mp4"), 2.0, &target));
        assert!(!target.exists());
        assert!(!partial_path(&target).exists());
    }

    #[test]
    fn success_without_output_is_a_failure() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("003_plus0.0s.png");
        let fake = FakeCapturer {
            write_nothing: true,
            ..Default::default()
        };
        assert!(!FrameExtractor::new(&fake).extract(Path::new("v.mp4"), 3.0, &target));
        assert!(!target.exists());
    }

    #[test]
    fn missing_tool_is_reported_unavailable() {
        let capturer = FfmpegCapturer {
            ffmpeg: FfmpegConfig {
                ffmpeg_path: Some(PathBuf::from("/nonexistent/cuegrab-ffmpeg")),
                ffprobe_path: None,
            },
            qscale: 5,
            resolution: "1280x720".into(),
            timeout: Duration::from_secs(1),
        };
        assert!(matches!(
            capturer.check_available(),
            Err(PipelineError::ToolUnavailable { .. })
        ));
    }

    #[test]
    fn validate_video_rejects_bad_inputs_before_probing() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = FfmpegConfig::default();

        let missing = dir.path().join("missing.mp4");
        assert!(matches!(
            validate_video(&missing, &cfg, false),
            Err(PipelineError::InvalidVideo { .. })
        ));

        let wrong_ext = dir.path().join("talk.txt");
        fs::write(&wrong_ext, vec![0u8; 4096]).unwrap();
        assert!(validate_video(&wrong_ext, &cfg, false).is_err());

        let tiny = dir.path().join("tiny.mp4");
        fs::write(&tiny, b"abc").unwrap();
        assert!(validate_video(&tiny, &cfg, false).is_err());

        let ok = dir.path().join("talk.MP4");
        fs::write(&ok, vec![0u8; 4096]).unwrap();
        let info = validate_video(&ok, &cfg, false).unwrap();
        assert_eq!(info.size_bytes, 4096);
        assert_eq!(info.duration_secs, None);
    }
}

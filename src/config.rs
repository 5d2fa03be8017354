use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::planner::encode_offset;

pub const CONFIG_FILE_NAME: &str = "cuegrab.toml";

/// Locations of the external ffmpeg tools.
///
/// Both default to whatever is found on `PATH`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FfmpegConfig {
    pub ffmpeg_path: Option<PathBuf>,
    pub ffprobe_path: Option<PathBuf>,
}

impl FfmpegConfig {
    pub fn ffmpeg_cmd(&self) -> OsString {
        self.ffmpeg_path
            .as_ref()
            .map(|p| p.as_os_str().to_owned())
            .unwrap_or_else(|| OsString::from("ffmpeg"))
    }

    pub fn ffprobe_cmd(&self) -> OsString {
        self.ffprobe_path
            .as_ref()
            .map(|p| p.as_os_str().to_owned())
            .unwrap_or_else(|| OsString::from("ffprobe"))
    }
}

/// Image container written for every captured frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    #[default]
    Png,
    #[serde(alias = "jpeg")]
    Jpg,
}

impl ImageFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ImageFormat::Png => "png",
            ImageFormat::Jpg => "jpg",
        }
    }
}

fn default_batch_size() -> usize {
    50
}
fn default_time_offsets() -> Vec<f64> {
    vec![0.0]
}
fn default_image_quality() -> u8 {
    95
}
fn default_resolution() -> String {
    "1280x720".to_string()
}
fn default_capture_timeout_secs() -> u64 {
    30
}
fn default_true() -> bool {
    true
}
fn default_phash_threshold() -> u32 {
    crate::cluster::DEFAULT_THRESHOLD
}

/// Everything a pipeline run can be tuned with.
///
/// Every field has a default, so an empty TOML file is a valid config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Worker threads for capture and hashing. `None` picks
    /// `max(4, ceil(cpus * 1.5))`.
    #[serde(default)]
    pub max_workers: Option<usize>,
    /// Settled tasks between two checkpoint writes.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Signed offsets (seconds) applied to every cue start.
    #[serde(default = "default_time_offsets")]
    pub time_offsets: Vec<f64>,
    /// 1..=100, mapped onto ffmpeg's `-q:v` scale.
    #[serde(default = "default_image_quality")]
    pub image_quality: u8,
    /// `WIDTHxHEIGHT` passed to ffmpeg's `-s`.
    #[serde(default = "default_resolution")]
    pub resolution: String,
    #[serde(default = "default_capture_timeout_secs")]
    pub capture_timeout_secs: u64,
    #[serde(default)]
    pub image_format: ImageFormat,
    #[serde(default = "default_true")]
    pub enable_deduplication: bool,
    /// Maximum Hamming distance for two frames to count as the same picture.
    #[serde(default = "default_phash_threshold")]
    pub phash_threshold: u32,
    #[serde(default)]
    pub generate_dedup_report: bool,
    /// Run ffprobe on the input before extracting.
    #[serde(default = "default_true")]
    pub probe_video: bool,
    #[serde(default)]
    pub ffmpeg: FfmpegConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_workers: None,
            batch_size: default_batch_size(),
            time_offsets: default_time_offsets(),
            image_quality: default_image_quality(),
            resolution: default_resolution(),
            capture_timeout_secs: default_capture_timeout_secs(),
            image_format: ImageFormat::default(),
            enable_deduplication: true,
            phash_threshold: default_phash_threshold(),
            generate_dedup_report: false,
            probe_video: true,
            ffmpeg: FfmpegConfig::default(),
        }
    }
}

/// Default pool size: `max(4, ceil(cpu_count * 1.5))`.
pub fn default_worker_count() -> usize {
    let cpus = num_cpus::get();
    (cpus * 3).div_ceil(2).max(4)
}

impl PipelineConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: PipelineConfig = toml::from_str(&text)
            .with_context(|| format!("parsing config toml {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("validating config {}", path.display()))?;
        Ok(config)
    }

    /// Look for an explicit path, then the user config dir, then the current
    /// directory, and fall back to built-in defaults.
    pub fn discover(explicit: Option<&Path>) -> Result<Self> {
        if let Some(p) = explicit {
            return Self::from_file(p);
        }

        let mut tried: Vec<PathBuf> = Vec::new();
        if let Some(mut d) = dirs::config_dir() {
            d.push("cuegrab");
            d.push(CONFIG_FILE_NAME);
            tried.push(d);
        }
        tried.push(PathBuf::from(CONFIG_FILE_NAME));

        for p in &tried {
            if p.exists() {
                tracing::debug!(path = %p.display(), "loading config");
                return Self::from_file(p);
            }
        }

        Ok(Self::default())
    }

    pub fn worker_count(&self) -> usize {
        self.max_workers.unwrap_or_else(default_worker_count)
    }

    pub fn capture_timeout(&self) -> Duration {
        Duration::from_secs(self.capture_timeout_secs)
    }

    /// Parsed `(width, height)` of [`resolution`](Self::resolution).
    pub fn resolution_dims(&self) -> Result<(u32, u32)> {
        parse_resolution(&self.resolution)
    }

    pub fn validate(&self) -> Result<()> {
        if self.time_offsets.is_empty() {
            return Err(anyhow!("time_offsets must contain at least one offset"));
        }
        if let Some(bad) = self.time_offsets.iter().find(|o| !o.is_finite()) {
            return Err(anyhow!("time offset {} is not a finite number", bad));
        }
        let mut encoded: Vec<String> = self.time_offsets.iter().map(|o| encode_offset(*o)).collect();
        encoded.sort();
        encoded.dedup();
        if encoded.len() != self.time_offsets.len() {
            return Err(anyhow!(
                "time_offsets {:?} collide once rounded to a tenth of a second",
                self.time_offsets
            ));
        }
        if self.batch_size == 0 {
            return Err(anyhow!("batch_size must be at least 1"));
        }
        if self.max_workers == Some(0) {
            return Err(anyhow!("max_workers must be at least 1"));
        }
        if !(1..=100).contains(&self.image_quality) {
            return Err(anyhow!(
                "image_quality must be between 1 and 100, got {}",
                self.image_quality
            ));
        }
        if self.capture_timeout_secs == 0 {
            return Err(anyhow!("capture_timeout_secs must be at least 1"));
        }
        self.resolution_dims()?;
        Ok(())
    }
}

/// Parse `"1280x720"` into `(1280, 720)`.
pub fn parse_resolution(s: &str) -> Result<(u32, u32)> {
    let (w, h) = s
        .trim()
        .split_once(['x', 'X'])
        .ok_or_else(|| anyhow!("resolution '{}' is not WIDTHxHEIGHT", s))?;
    let w: u32 = w.trim().parse().with_context(|| format!("resolution width in '{}'", s))?;
    let h: u32 = h.trim().parse().with_context(|| format!("resolution height in '{}'", s))?;
    if w == 0 || h == 0 {
        return Err(anyhow!("resolution '{}' has a zero dimension", s));
    }
    Ok((w, h))
}

/// Parse a comma separated offset list such as `"-1.5, 0, 2"`.
pub fn parse_offsets(s: &str) -> Result<Vec<f64>> {
    s.split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(|p| {
            p.parse::<f64>()
                .with_context(|| format!("invalid time offset '{}'", p))
        })
        .collect()
}

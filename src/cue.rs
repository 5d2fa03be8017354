//! Transcript cues and the loaders that produce them.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// One transcript entry. `index` starts at 1 and follows file order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cue {
    pub index: usize,
    /// Seconds from the start of the video.
    pub start_time: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<f64>,
    pub text: String,
}

impl Cue {
    pub fn new(index: usize, start_time: f64, text: impl Into<String>) -> Self {
        Self {
            index,
            start_time,
            end_time: None,
            text: text.into(),
        }
    }
}

/// Non-fatal observations about a cue list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CueStats {
    pub count: usize,
    pub empty_text: usize,
    pub overlapping: usize,
    pub total_duration: f64,
}

/// Load cues from `.srt` or `.json`.
pub fn load_cues(path: &Path) -> Result<Vec<Cue>> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    let text = fs::read_to_string(path).with_context(|| format!("reading cues {}", path.display()))?;
    match ext.as_deref() {
        Some("srt") => parse_srt(&text).with_context(|| format!("parsing {}", path.display())),
        Some("json") => {
            let cues: Vec<Cue> = serde_json::from_str(&text)
                .with_context(|| format!("parsing cue json {}", path.display()))?;
            Ok(cues)
        }
        _ => Err(anyhow!(
            "unsupported cue file {} (expected .srt or .json)",
            path.display()
        )),
    }
}

/// Parse SubRip text. Cues are numbered 1..N in file order; the numbers
/// written in the file are ignored.
pub fn parse_srt(text: &str) -> Result<Vec<Cue>> {
    let text = text.trim_start_matches('\u{feff}').replace("\r\n", "\n");
    let mut cues = Vec::new();

    for (block_no, block) in text
        .split("\n\n")
        .map(str::trim)
        .filter(|b| !b.is_empty())
        .enumerate()
    {
        let mut lines = block.lines();
        let mut first = lines.next().unwrap_or_default().trim();
        // The numeric counter line is optional in the wild.
        if !first.contains("-->") {
            first = lines.next().unwrap_or_default().trim();
        }
        let (start, end) = parse_timing_line(first)
            .with_context(|| format!("subtitle block {} has a malformed timing line", block_no + 1))?;
        let body = lines.map(str::trim).collect::<Vec<_>>().join("\n");

        cues.push(Cue {
            index: cues.len() + 1,
            start_time: start,
            end_time: Some(end),
            text: body.trim().to_string(),
        });
    }

    Ok(cues)
}

fn parse_timing_line(line: &str) -> Result<(f64, f64)> {
    let (start, rest) = line
        .split_once("-->")
        .ok_or_else(|| anyhow!("missing '-->' in '{}'", line))?;
    // Position hints may trail the end stamp.
    let end = rest.split_whitespace().next().unwrap_or_default();
    Ok((parse_srt_timestamp(start.trim())?, parse_srt_timestamp(end)?))
}

/// `HH:MM:SS,mmm` (or `.mmm`) to seconds.
pub fn parse_srt_timestamp(s: &str) -> Result<f64> {
    let normalized = s.replace(',', ".");
    let parts: Vec<&str> = normalized.split(':').collect();
    if parts.len() != 3 {
        return Err(anyhow!("timestamp '{}' is not HH:MM:SS,mmm", s));
    }
    let hours: u64 = parts[0].parse().with_context(|| format!("hours in '{}'", s))?;
    let minutes: u64 = parts[1].parse().with_context(|| format!("minutes in '{}'", s))?;
    let seconds: f64 = parts[2].parse().with_context(|| format!("seconds in '{}'", s))?;
    Ok((hours * 3600 + minutes * 60) as f64 + seconds)
}

/// Reject cue lists that cannot drive extraction. An empty list is fine.
pub fn validate_cues(cues: &[Cue]) -> Result<CueStats> {
    let mut stats = CueStats {
        count: cues.len(),
        ..Default::default()
    };
    let mut prev_end: Option<f64> = None;

    for cue in cues {
        if cue.index == 0 {
            return Err(anyhow!("cue indices start at 1"));
        }
        if !cue.start_time.is_finite() || cue.start_time < 0.0 {
            return Err(anyhow!(
                "cue {} has invalid start time {}",
                cue.index,
                cue.start_time
            ));
        }
        if cue.text.trim().is_empty() {
            stats.empty_text += 1;
        }
        if let Some(end) = prev_end {
            if cue.start_time < end {
                stats.overlapping += 1;
            }
        }
        if let Some(end) = cue.end_time {
            stats.total_duration += (end - cue.start_time).max(0.0);
        }
        prev_end = cue.end_time;
    }

    let mut indices: Vec<usize> = cues.iter().map(|c| c.index).collect();
    indices.sort_unstable();
    indices.dedup();
    if indices.len() != cues.len() {
        return Err(anyhow!("cue indices are not unique"));
    }

    Ok(stats)
}

//! Example: Grab one frame per subtitle cue and fold duplicates
//!
//! Run with: cargo run --example extract_and_dedup -- <video> <subtitles.srt> [output_dir]

use cuegrab::{load_cues, FramePipeline, PipelineConfig};
use std::env;
use std::path::PathBuf;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut args = env::args().skip(1);
    let (Some(video), Some(cues_path)) = (args.next().map(PathBuf::from), args.next().map(PathBuf::from)) else {
        println!("Usage: extract_and_dedup <video> <subtitles.srt|cues.json> [output_dir]");
        return Ok(());
    };
    let output_dir = args
        .next()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("example_frames_output"));

    // Two frames per cue: half a second early and right on the cue
    let config = PipelineConfig {
        time_offsets: vec![-0.5, 0.0],
        max_workers: Some(4),
        generate_dedup_report: true,
        ..Default::default()
    };
    let pipeline = FramePipeline::new(config)?;

    let cues = load_cues(&cues_path)?;
    println!("Extracting frames for {} cues...", cues.len());
    println!("Input: {}", video.display());
    println!("Output: {}", output_dir.display());

    let outcome = pipeline.run(&video, &cues, &output_dir)?;

    println!(
        "✓ {}/{} frames extracted ({} failed)",
        outcome.stats.extracted, outcome.stats.expected, outcome.stats.failed
    );
    if let Some(dedup) = &outcome.dedup {
        println!("✓ {} unique frames, {} duplicates", dedup.roots, dedup.duplicates);
    }
    println!("Index saved to {}", outcome.index_path.display());

    Ok(())
}

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use cuegrab::config::parse_offsets;
use cuegrab::{load_cues, FramePipeline, PipelineConfig, Progress, ProgressPhase};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;

#[derive(Subcommand, Debug)]
enum Command {
    /// Capture one frame per cue (and offset), then fold duplicates
    Extract {
        /// Input video file
        video: PathBuf,

        /// Cue list (.srt or .json)
        cues: PathBuf,

        /// Output directory (defaults to `<video stem>_frames`)
        out: Option<PathBuf>,

        /// Concurrent capture workers
        #[arg(long)]
        workers: Option<usize>,

        /// Settled frames between checkpoint saves
        #[arg(long)]
        batch_size: Option<usize>,

        /// Comma separated offsets in seconds, e.g. "-1,0,1.5"
        #[arg(long, allow_hyphen_values = true)]
        offsets: Option<String>,

        /// Maximum Hamming distance between duplicate frames
        #[arg(long)]
        threshold: Option<u32>,

        /// Keep every frame, skip hashing and clustering
        #[arg(long, default_value_t = false)]
        no_dedup: bool,

        /// Also write an HTML duplicate report
        #[arg(long, default_value_t = false)]
        report: bool,

        /// Image quality 1-100
        #[arg(long)]
        quality: Option<u8>,

        /// Frame size, e.g. 1280x720
        #[arg(long)]
        resolution: Option<String>,
    },
    /// Re-hash and re-cluster an existing index in place
    Dedup {
        /// Path to screenshot_index.json
        index: PathBuf,

        /// Maximum Hamming distance between duplicate frames
        #[arg(long)]
        threshold: Option<u32>,
    },
    /// Regenerate the HTML duplicate report for an index
    Report {
        /// Path to screenshot_index.json
        index: PathBuf,
    },
}

#[derive(Parser, Debug)]
#[command(version, about = "Transcript-aligned frame grabber with perceptual deduplication.")]
struct Args {
    #[command(subcommand)]
    cmd: Command,

    /// Config file (TOML). Defaults to the user config dir, then ./cuegrab.toml
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true, default_value_t = false)]
    verbose: bool,
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let mut config = PipelineConfig::discover(args.config.as_deref())?;

    match args.cmd {
        Command::Extract {
            video,
            cues,
            out,
            workers,
            batch_size,
            offsets,
            threshold,
            no_dedup,
            report,
            quality,
            resolution,
        } => {
            if let Some(w) = workers {
                config.max_workers = Some(w);
            }
            if let Some(b) = batch_size {
                config.batch_size = b;
            }
            if let Some(o) = offsets {
                config.time_offsets = parse_offsets(&o)?;
            }
            if let Some(t) = threshold {
                config.phash_threshold = t;
            }
            if no_dedup {
                config.enable_deduplication = false;
            }
            if report {
                config.generate_dedup_report = true;
            }
            if let Some(q) = quality {
                config.image_quality = q;
            }
            if let Some(r) = resolution {
                config.resolution = r;
            }
            config.validate()?;

            let out_dir = match out {
                Some(o) => o,
                None => default_out_dir(&video)?,
            };
            run_extract(config, &video, &cues, &out_dir)
        }
        Command::Dedup { index, threshold } => {
            if let Some(t) = threshold {
                config.phash_threshold = t;
            }
            let pipeline = FramePipeline::new(config)?;
            let stats = pipeline.dedup_index(&index)?;
            println!(
                "{} frames: {} unique, {} duplicates, {} unhashed, {} clusters",
                stats.total,
                stats.roots,
                stats.duplicates,
                stats.unhashed,
                stats.clusters.len()
            );
            Ok(())
        }
        Command::Report { index } => {
            let pipeline = FramePipeline::new(config)?;
            let summary = pipeline.report_index(&index)?;
            println!(
                "Report written to {} ({} pages, {} errors)",
                summary.index_page.display(),
                summary.pages_written,
                summary.errors
            );
            Ok(())
        }
    }
}

fn default_out_dir(video: &Path) -> Result<PathBuf> {
    let stem = video
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| anyhow!("cannot derive an output name from {}", video.display()))?;
    Ok(PathBuf::from(format!("{}_frames", stem)))
}

fn run_extract(config: PipelineConfig, video: &Path, cues_path: &Path, out_dir: &Path) -> Result<()> {
    let cues = load_cues(cues_path)?;
    let pipeline = FramePipeline::new(config)?;

    let style = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) {msg}")
        .context("building progress bar template")?
        .progress_chars("#>-");

    // One bar per phase, created on the phase's first update
    let progress_bar: Mutex<Option<(ProgressPhase, ProgressBar)>> = Mutex::new(None);

    let outcome = pipeline.run_with_progress(video, &cues, out_dir, |p: Progress| {
        let Ok(mut guard) = progress_bar.lock() else {
            return;
        };
        let same_phase = matches!(&*guard, Some((phase, _)) if *phase == p.phase);
        if !same_phase {
            if let Some((_, old)) = guard.take() {
                old.finish_with_message("done");
            }
            if matches!(p.phase, ProgressPhase::ExtractingFrames | ProgressPhase::HashingFrames) {
                let pb = ProgressBar::new(p.total as u64);
                pb.set_style(style.clone());
                pb.set_message(match p.phase {
                    ProgressPhase::ExtractingFrames => "Extracting frames",
                    _ => "Hashing frames",
                });
                *guard = Some((p.phase.clone(), pb));
            }
        }
        if let Some((_, pb)) = guard.as_ref() {
            pb.set_position(p.completed as u64);
        }
    })?;

    if let Ok(mut guard) = progress_bar.lock() {
        if let Some((_, pb)) = guard.take() {
            pb.finish_with_message("done");
        }
    }

    let stats = &outcome.stats;
    println!(
        "Extracted {}/{} frames ({:.1}%), {} failed, {} resumed, in {:.1?}",
        stats.extracted,
        stats.expected,
        stats.success_rate * 100.0,
        stats.failed,
        stats.resumed,
        stats.elapsed
    );
    if let Some(dedup) = &outcome.dedup {
        println!(
            "Deduplicated: {} unique, {} duplicates in {} clusters",
            dedup.roots,
            dedup.duplicates,
            dedup.clusters.len()
        );
    }
    if let Some(report) = &outcome.report {
        println!("Report: {}", report.index_page.display());
    }
    println!("Index: {}", outcome.index_path.display());
    Ok(())
}

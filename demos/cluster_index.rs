//! Example: Cluster a hand-made hash sequence and resolve embed files
//!
//! Run with: cargo run --example cluster_index

use cuegrab::{cluster, embed_file_for, FrameRecord, PerceptualHash};
use std::path::PathBuf;

fn record(cue_index: usize, hash: u64) -> FrameRecord {
    let filename = format!("{:03}_plus0.0s.png", cue_index);
    FrameRecord {
        cue_index,
        start_time: cue_index as f64 * 4.0,
        timestamp: cue_index as f64 * 4.0,
        text: format!("cue {}", cue_index),
        offset: 0.0,
        offset_slot: 0,
        path: PathBuf::from("screenshots").join(&filename),
        filename,
        phash: Some(PerceptualHash(hash).to_string()),
        is_duplicate: false,
        duplicate_of_index: None,
        duplicate_of_cue: None,
        reference_filename: None,
        hamming_distance: None,
        hamming_distance_to_root: None,
    }
}

fn main() {
    // A slide shown for three cues, a new slide for two, then slow drift
    let hashes = [0x0, 0x1, 0x0, 0xff00, 0xff01, 0xff03, 0xff07, 0xff0f];
    let mut records: Vec<FrameRecord> = hashes
        .iter()
        .enumerate()
        .map(|(i, &h)| record(i + 1, h))
        .collect();

    let stats = cluster(&mut records, 2);
    println!(
        "{} frames: {} unique, {} duplicates",
        stats.total, stats.roots, stats.duplicates
    );

    for r in &records {
        let embed = embed_file_for(&records, r.cue_index).unwrap_or("-");
        match r.duplicate_of_cue {
            Some(root) => println!("cue {:>2}: duplicate of cue {} -> {}", r.cue_index, root, embed),
            None => println!("cue {:>2}: unique -> {}", r.cue_index, embed),
        }
    }
}

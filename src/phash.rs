//! 64-bit DCT perceptual hashes for captured frames.

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use image::imageops::FilterType;
use image::{DynamicImage, ImageError};
use rayon::prelude::*;
use rustdct::{DctPlanner, TransformType2And3};
use thiserror::Error;

use crate::error::Result;
use crate::record::FrameRecord;

const DCT_SIZE: usize = 32;
const LOW_FREQ: usize = 8;

/// A 64-bit perceptual fingerprint, rendered as 16 lowercase hex digits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PerceptualHash(pub u64);

impl PerceptualHash {
    /// Number of differing bits.
    pub fn distance(self, other: PerceptualHash) -> u32 {
        (self.0 ^ other.0).count_ones()
    }
}

impl fmt::Display for PerceptualHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

#[derive(Debug, Error)]
#[error("invalid perceptual hash '{0}'")]
pub struct ParseHashError(String);

impl FromStr for PerceptualHash {
    type Err = ParseHashError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let s = s.trim();
        if s.len() != 16 {
            return Err(ParseHashError(s.to_string()));
        }
        u64::from_str_radix(s, 16)
            .map(PerceptualHash)
            .map_err(|_| ParseHashError(s.to_string()))
    }
}

/// Hamming distance between two hex-encoded hashes, `None` if either is unparseable.
pub fn hamming(a: &str, b: &str) -> Option<u32> {
    let a: PerceptualHash = a.parse().ok()?;
    let b: PerceptualHash = b.parse().ok()?;
    Some(a.distance(b))
}

/// Computes a fingerprint for an image file.
pub trait FrameHasher: Send + Sync {
    fn hash_file(&self, path: &Path) -> std::result::Result<PerceptualHash, ImageError>;
}

/// Classic pHash: 32x32 grayscale, 2-D DCT-II, median of the 8x8
/// low-frequency block (DC excluded) as the bit threshold.
pub struct DctHasher {
    dct: Arc<dyn TransformType2And3<f32>>,
}

impl DctHasher {
    pub fn new() -> Self {
        let mut planner = DctPlanner::new();
        Self {
            dct: planner.plan_dct2(DCT_SIZE),
        }
    }

    pub fn hash_image(&self, img: &DynamicImage) -> PerceptualHash {
        let gray = img
            .resize_exact(DCT_SIZE as u32, DCT_SIZE as u32, FilterType::Triangle)
            .to_luma8();
        let mut pixels: Vec<f32> = gray.pixels().map(|p| p.0[0] as f32).collect();

        for row in pixels.chunks_exact_mut(DCT_SIZE) {
            self.dct.process_dct2(row);
        }
        let mut columns = transpose(&pixels);
        for col in columns.chunks_exact_mut(DCT_SIZE) {
            self.dct.process_dct2(col);
        }

        let mut block = [0f32; LOW_FREQ * LOW_FREQ];
        for v in 0..LOW_FREQ {
            for u in 0..LOW_FREQ {
                block[v * LOW_FREQ + u] = columns[u * DCT_SIZE + v];
            }
        }

        let mut ac: Vec<f32> = block[1..].to_vec();
        ac.sort_by(f32::total_cmp);
        let median = ac[ac.len() / 2];

        let bits = block
            .iter()
            .enumerate()
            .filter(|(_, c)| **c > median)
            .fold(0u64, |acc, (i, _)| acc | (1u64 << i));
        PerceptualHash(bits)
    }
}

impl Default for DctHasher {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameHasher for DctHasher {
    fn hash_file(&self, path: &Path) -> std::result::Result<PerceptualHash, ImageError> {
        let img = image::open(path)?;
        Ok(self.hash_image(&img))
    }
}

fn transpose(m: &[f32]) -> Vec<f32> {
    let mut out = vec![0f32; m.len()];
    for r in 0..DCT_SIZE {
        for c in 0..DCT_SIZE {
            out[c * DCT_SIZE + r] = m[r * DCT_SIZE + c];
        }
    }
    out
}

/// Hash every record's image on a pool of `workers` threads.
///
/// Unreadable images end up with `phash = None`; the batch never aborts.
/// Returns how many records got a hash.
pub fn hash_all(records: &mut [FrameRecord], hasher: &dyn FrameHasher, workers: usize) -> Result<usize> {
    hash_all_with_progress(records, hasher, workers, |_, _| {})
}

pub fn hash_all_with_progress<F>(
    records: &mut [FrameRecord],
    hasher: &dyn FrameHasher,
    workers: usize,
    progress_callback: F,
) -> Result<usize>
where
    F: Fn(usize, usize) + Send + Sync,
{
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers.max(1))
        .thread_name(|i| format!("cuegrab-hash-{}", i))
        .build()?;

    let total = records.len();
    let completed = AtomicUsize::new(0);
    let hashed = AtomicUsize::new(0);

    pool.install(|| {
        records.par_iter_mut().for_each(|record| {
            record.phash = match hasher.hash_file(&record.path) {
                Ok(h) => {
                    hashed.fetch_add(1, Ordering::Relaxed);
                    Some(h.to_string())
                }
                Err(e) => {
                    tracing::warn!(file = %record.path.display(), error = %e, "could not hash frame");
                    None
                }
            };
            let current = completed.fetch_add(1, Ordering::SeqCst) + 1;
            progress_callback(current, total);
        });
    });

    let hashed = hashed.into_inner();
    tracing::info!(hashed, total, "perceptual hashing finished");
    Ok(hashed)
}

//! Groups near-identical frames under the first frame that showed them.
//!
//! One sequential pass over the records in cue+offset order. A frame joins
//! a cluster only when it is close both to its nearest hashed predecessor
//! and to that predecessor's root, so slow drift cannot chain an entire
//! talk into a single cluster.

use std::collections::HashSet;

use serde::Serialize;

use crate::phash::PerceptualHash;
use crate::record::FrameRecord;

pub const DEFAULT_THRESHOLD: u32 = 10;

/// A root together with every record that points at it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClusterGroup {
    /// Position of the root in the ordered index.
    pub root: usize,
    /// Root first, then its duplicates in index order.
    pub members: Vec<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ClusterStats {
    pub total: usize,
    pub roots: usize,
    pub duplicates: usize,
    /// Records without a usable hash. Always roots.
    pub unhashed: usize,
    /// Only clusters with more than one member.
    pub clusters: Vec<ClusterGroup>,
}

/// Assign every record root or duplicate-of-root.
///
/// Any previous assignment is discarded, so re-clustering an index with a
/// different threshold is safe. Records must already be in cue+offset order.
pub fn cluster(records: &mut [FrameRecord], threshold: u32) -> ClusterStats {
    let hashes: Vec<Option<PerceptualHash>> = records
        .iter()
        .map(|r| match r.phash.as_deref() {
            Some(text) => match text.parse() {
                Ok(h) => Some(h),
                Err(e) => {
                    tracing::warn!(file = %r.filename, error = %e, "ignoring unparseable hash");
                    None
                }
            },
            None => None,
        })
        .collect();

    for r in records.iter_mut() {
        r.mark_root();
    }

    let mut last_hashed: Option<usize> = None;
    for i in 0..records.len() {
        let Some(hash) = hashes[i] else {
            continue;
        };
        let Some(j) = last_hashed.replace(i) else {
            continue;
        };
        let Some(prev) = hashes[j] else {
            continue;
        };

        let d1 = hash.distance(prev);
        if d1 > threshold {
            continue;
        }

        let root = resolve_root(records, j);
        let Some(root_hash) = hashes[root] else {
            tracing::warn!(index = root, "cluster root has no hash, starting a new cluster");
            continue;
        };
        let d2 = hash.distance(root_hash);
        if d2 > threshold {
            tracing::debug!(index = i, d1, d2, "drifted too far from cluster root");
            continue;
        }

        let (root_cue, root_file) = (records[root].cue_index, records[root].filename.clone());
        let r = &mut records[i];
        r.is_duplicate = true;
        r.duplicate_of_index = Some(root);
        r.duplicate_of_cue = Some(root_cue);
        r.reference_filename = Some(root_file);
        r.hamming_distance = Some(d1);
        r.hamming_distance_to_root = Some(d2);
    }

    let stats = collect_stats(records, &hashes);
    tracing::info!(
        total = stats.total,
        roots = stats.roots,
        duplicates = stats.duplicates,
        unhashed = stats.unhashed,
        threshold,
        "clustering finished"
    );
    stats
}

/// Follow `duplicate_of_index` from `start` to a root.
///
/// Pointers are depth 1 when produced by [`cluster`], but an index read from
/// disk may be damaged: a revisit or an out-of-range pointer stops the walk
/// at the last good node. A `start` outside the index is returned as is.
pub fn resolve_root(records: &[FrameRecord], start: usize) -> usize {
    let mut current = start;
    let mut visited = HashSet::new();
    visited.insert(current);

    while let Some(record) = records.get(current) {
        if !record.is_duplicate {
            break;
        }
        let Some(next) = record.duplicate_of_index else {
            break;
        };
        if next >= records.len() {
            tracing::warn!(index = current, next, "duplicate points outside the index");
            break;
        }
        if !visited.insert(next) {
            tracing::warn!(index = current, next, "cycle in duplicate references, truncating walk");
            break;
        }
        current = next;
    }
    current
}

/// Statistics for records that were clustered earlier, e.g. read back from an index.
pub fn stats_for(records: &[FrameRecord]) -> ClusterStats {
    let hashes: Vec<Option<PerceptualHash>> = records
        .iter()
        .map(|r| r.phash.as_deref().and_then(|h| h.parse().ok()))
        .collect();
    collect_stats(records, &hashes)
}

fn collect_stats(records: &[FrameRecord], hashes: &[Option<PerceptualHash>]) -> ClusterStats {
    let mut members: Vec<Vec<usize>> = vec![Vec::new(); records.len()];
    let mut stats = ClusterStats {
        total: records.len(),
        unhashed: hashes.iter().filter(|h| h.is_none()).count(),
        ..Default::default()
    };

    for (i, r) in records.iter().enumerate() {
        match r.duplicate_of_index {
            Some(root) if r.is_duplicate => {
                stats.duplicates += 1;
                if let Some(m) = members.get_mut(root) {
                    m.push(i);
                }
            }
            _ => stats.roots += 1,
        }
    }

    stats.clusters = members
        .into_iter()
        .enumerate()
        .filter(|(_, dups)| !dups.is_empty())
        .map(|(root, dups)| {
            let mut all = Vec::with_capacity(dups.len() + 1);
            all.push(root);
            all.extend(dups);
            ClusterGroup { root, members: all }
        })
        .collect();
    stats
}

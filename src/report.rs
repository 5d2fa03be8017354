//! Static HTML report for eyeballing duplicate clusters.
//!
//! Nothing in here can fail a run: every problem is logged and counted.

use std::fs;
use std::path::{Path, PathBuf};

use askama::Template;
use serde::Serialize;

use crate::cluster::ClusterStats;
use crate::record::FrameRecord;

pub const REPORT_DIR_NAME: &str = "dedup_report";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReportSummary {
    pub index_page: PathBuf,
    pub pages_written: usize,
    pub images_copied: usize,
    pub errors: usize,
}

/// Write `index.html`, one page per frame under `frames/` and image copies
/// under `images/`, all inside `out_dir`.
pub fn write_report(records: &[FrameRecord], stats: &ClusterStats, frames_dir: &Path, out_dir: &Path) -> ReportSummary {
    let mut summary = ReportSummary {
        index_page: out_dir.join("index.html"),
        ..Default::default()
    };

    let images_dir = out_dir.join("images");
    let pages_dir = out_dir.join("frames");
    for dir in [&images_dir, &pages_dir] {
        if let Err(e) = fs::create_dir_all(dir) {
            tracing::warn!(dir = %dir.display(), error = %e, "cannot create report directory");
            summary.errors += 1;
            return summary;
        }
    }

    for (position, record) in records.iter().enumerate() {
        let src = frames_dir.join(&record.filename);
        match fs::copy(&src, images_dir.join(&record.filename)) {
            Ok(_) => summary.images_copied += 1,
            Err(e) => {
                tracing::warn!(file = %src.display(), error = %e, "report image copy failed");
                summary.errors += 1;
            }
        }

        let page = pages_dir.join(format!("{}.html", stem(&record.filename)));
        write_page(&page, &FramePage::new(records, position), &mut summary);
    }

    let index_page = summary.index_page.clone();
    write_page(&index_page, &IndexPage::new(records, stats), &mut summary);

    tracing::info!(
        pages = summary.pages_written,
        images = summary.images_copied,
        errors = summary.errors,
        dir = %out_dir.display(),
        "dedup report written"
    );
    summary
}

fn write_page(path: &Path, page: &impl Template, summary: &mut ReportSummary) {
    let written = page
        .render()
        .map_err(|e| e.to_string())
        .and_then(|html| fs::write(path, html).map_err(|e| e.to_string()));
    match written {
        Ok(()) => summary.pages_written += 1,
        Err(error) => {
            tracing::warn!(page = %path.display(), %error, "report page write failed");
            summary.errors += 1;
        }
    }
}

fn stem(filename: &str) -> &str {
    Path::new(filename)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(filename)
}

#[derive(Template)]
#[template(path = "frame.html")]
struct FramePage<'a> {
    name: &'a str,
    file: &'a str,
    cue_index: usize,
    timestamp: String,
    offset: String,
    phash: &'a str,
    text: &'a str,
    duplicate: Option<DuplicateOf<'a>>,
}

struct DuplicateOf<'a> {
    root_page: &'a str,
    distance: u32,
    distance_to_root: u32,
}

impl<'a> FramePage<'a> {
    fn new(records: &'a [FrameRecord], position: usize) -> Self {
        let r = &records[position];
        let duplicate = match r.duplicate_of_index.and_then(|i| records.get(i)) {
            Some(root) if r.is_duplicate => Some(DuplicateOf {
                root_page: stem(&root.filename),
                distance: r.hamming_distance.unwrap_or_default(),
                distance_to_root: r.hamming_distance_to_root.unwrap_or_default(),
            }),
            _ => None,
        };
        Self {
            name: stem(&r.filename),
            file: &r.filename,
            cue_index: r.cue_index,
            timestamp: format!("{:.3}", r.timestamp),
            offset: format!("{:+.1}", r.offset),
            phash: r.phash.as_deref().unwrap_or("none"),
            text: &r.text,
            duplicate,
        }
    }
}

#[derive(Template)]
#[template(path = "report_index.html")]
struct IndexPage<'a> {
    total: usize,
    roots: usize,
    duplicates: usize,
    unhashed: usize,
    clusters: Vec<ClusterView<'a>>,
}

struct ClusterView<'a> {
    cue_index: usize,
    members: Vec<MemberView<'a>>,
}

struct MemberView<'a> {
    page: &'a str,
    file: &'a str,
    text: &'a str,
    is_duplicate: bool,
}

impl<'a> IndexPage<'a> {
    fn new(records: &'a [FrameRecord], stats: &ClusterStats) -> Self {
        let clusters = stats
            .clusters
            .iter()
            .filter_map(|group| {
                let root = records.get(group.root)?;
                let members = group
                    .members
                    .iter()
                    .filter_map(|&m| records.get(m))
                    .map(|member| MemberView {
                        page: stem(&member.filename),
                        file: &member.filename,
                        text: &member.text,
                        is_duplicate: member.is_duplicate,
                    })
                    .collect();
                Some(ClusterView {
                    cue_index: root.cue_index,
                    members,
                })
            })
            .collect();
        Self {
            total: stats.total,
            roots: stats.roots,
            duplicates: stats.duplicates,
            unhashed: stats.unhashed,
            clusters,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::cluster;
    use crate::phash::PerceptualHash;
    use crate::record::tests::record;

    #[test]
    fn writes_one_page_per_frame_and_an_index() {
        let frames = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let mut records = vec![record(1, 0), record(2, 0), record(3, 0)];
        for r in &mut records {
            r.phash = Some(PerceptualHash(0).to_string());
            fs::write(frames.path().join(&r.filename), b"png").unwrap();
        }
        records[2].text = "<b>quoted & tagged</b>".into();
        let stats = cluster(&mut records, 10);

        let summary = write_report(&records, &stats, frames.path(), out.path());
        assert_eq!(summary.errors, 0);
        assert_eq!(summary.images_copied, 3);
        assert_eq!(summary.pages_written, 4);

        let index = fs::read_to_string(out.path().join("index.html")).unwrap();
        assert!(index.contains("frames/003_0.html"));
        let page = fs::read_to_string(out.path().join("frames").join("003_0.html")).unwrap();
        assert!(page.contains("&lt;b&gt;quoted &amp; tagged&lt;/b&gt;"));
        assert!(page.contains("href=\"001_0.html\""));
    }

    #[test]
    fn quotes_in_cue_text_stay_inside_attributes() {
        let frames = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let mut records = vec![record(1, 0), record(2, 0)];
        for r in &mut records {
            r.phash = Some(PerceptualHash(0).to_string());
        }
        records[1].text = r#"say "hi" <now>"#.into();
        let stats = cluster(&mut records, 10);

        write_report(&records, &stats, frames.path(), out.path());
        let index = fs::read_to_string(out.path().join("index.html")).unwrap();
        assert!(!index.contains(r#""hi""#));
        assert!(!index.contains("<now>"));
        let root = fs::read_to_string(out.path().join("frames").join("001_0.html")).unwrap();
        assert!(root.contains("<td>root</td>"));
        assert!(root.contains("+0.0s"));
    }

    #[test]
    fn missing_source_image_is_counted_not_fatal() {
        let frames = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let records = vec![record(1, 0)];

        let summary = write_report(&records, &ClusterStats::default(), frames.path(), out.path());
        assert_eq!(summary.errors, 1);
        assert_eq!(summary.images_copied, 0);
        assert_eq!(summary.pages_written, 2);
        assert!(out.path().join("frames").join("001_0.html").exists());
    }
}

//! Concat demuxer manifests.
//!
//! ffmpeg's concat demuxer reads a text file with one `file '<path>'` line per
//! input. Paths are absolute with forward slashes so the same manifest works
//! on Windows, and single quotes are escaped the way the demuxer expects.

use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::Result;
use crate::utils::fs::io_error;

/// Name of the manifest written into each session directory.
pub const MANIFEST_FILE: &str = "files.txt";

/// Segments selected for a merge.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    entries: Vec<String>,
    skipped: Vec<PathBuf>,
}

impl Manifest {
    /// Normalized absolute paths of the segments to merge, in merge order.
    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    /// Zero-size segments left out of the merge.
    pub fn skipped(&self) -> &[PathBuf] {
        &self.skipped
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Manifest file contents.
    pub fn render(&self) -> String {
        self.entries
            .iter()
            .map(|path| format!("file '{}'\n", path.replace('\'', r"'\''")))
            .collect()
    }

    pub async fn write_to(&self, path: &Path) -> Result<()> {
        tokio::fs::write(path, self.render())
            .await
            .map_err(|e| io_error("writing merge manifest", path, e))
    }
}

/// List the segments in `dir` with extension `segment_ext`.
///
/// Zero-size files are truncated segments from a killed capture; they are
/// skipped with a warning. Entries are in capture order: by segment number,
/// then by name for files that are not numbered.
pub async fn collect_segments(dir: &Path, segment_ext: &str) -> Result<Manifest> {
    let op = "listing session directory";
    let abs_dir = std::path::absolute(dir).map_err(|e| io_error(op, dir, e))?;
    let mut read_dir = tokio::fs::read_dir(&abs_dir)
        .await
        .map_err(|e| io_error(op, dir, e))?;

    let mut segments = Vec::new();
    let mut skipped = Vec::new();
    while let Some(entry) = read_dir
        .next_entry()
        .await
        .map_err(|e| io_error(op, dir, e))?
    {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some(segment_ext) {
            continue;
        }
        let metadata = entry
            .metadata()
            .await
            .map_err(|e| io_error("reading segment metadata", &path, e))?;
        if !metadata.is_file() {
            continue;
        }
        if metadata.len() == 0 {
            warn!(segment = %path.display(), "Found 0-size (corrupted) segment, ignoring");
            skipped.push(path);
            continue;
        }
        segments.push(path);
    }

    segments.sort_by_cached_key(|p| segment_order(p));
    skipped.sort();

    Ok(Manifest {
        entries: segments
            .iter()
            .map(|p| p.to_string_lossy().replace('\\', "/"))
            .collect(),
        skipped,
    })
}

/// Segment number parsed from the file stem, then the file name.
///
/// The counter is only zero-padded to five digits, so `100000.ts` must sort
/// after `99999.ts`.
fn segment_order(path: &Path) -> (u64, OsString) {
    let index = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .and_then(|stem| stem.parse::<u64>().ok())
        .unwrap_or(u64::MAX);
    (index, path.file_name().map(OsStr::to_os_string).unwrap_or_default())
}

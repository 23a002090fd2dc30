//! Filesystem helpers shared across modules.
//!
//! These helpers attach the operation and path to IO errors so log lines say
//! what was being done to which file.

use std::path::Path;

use crate::{Error, Result};

/// Convert an IO error into an application error with operation + path context.
pub fn io_error(op: &'static str, path: &Path, source: std::io::Error) -> Error {
    Error::io_path(op, path, source)
}

/// Ensure a directory exists, creating it (recursively) if needed.
pub async fn ensure_dir_all_with_op(op: &'static str, path: &Path) -> Result<()> {
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|e| io_error(op, path, e))
}

/// Ensure a directory exists (synchronous variant).
pub fn ensure_dir_all_sync_with_op(op: &'static str, path: &Path) -> Result<()> {
    std::fs::create_dir_all(path).map_err(|e| io_error(op, path, e))
}

/// Remove a directory tree. A directory that is already gone is not an error.
pub async fn remove_dir_all_with_op(op: &'static str, path: &Path) -> Result<()> {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(io_error(op, path, e)),
    }
}

/// Remove a file. A file that is already gone is not an error.
pub async fn remove_file_with_op(op: &'static str, path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(io_error(op, path, e)),
    }
}

/// Check that `dir` is an existing directory we can create files in.
///
/// Writes and removes a temporary probe file.
pub fn ensure_writable_dir(dir: &Path) -> Result<()> {
    if !dir.is_dir() {
        return Err(Error::validation(format!(
            "Output path {} does not exist",
            dir.display()
        )));
    }

    let probe = tempfile::Builder::new()
        .prefix(".owncast-recorder-probe")
        .tempfile_in(dir)
        .map_err(|e| io_error("probing output directory", dir, e))?;
    probe
        .close()
        .map_err(|e| io_error("removing output directory probe", dir, e))
}

//! Shared helpers.

pub mod filename;
pub mod fs;

use std::path::Path;

/// Returns true when running inside a Docker container.
///
/// Checks for `/.dockerenv`, then for a `docker` entry in `/proc/self/cgroup`.
pub fn is_docker() -> bool {
    if !cfg!(target_os = "linux") {
        return false;
    }
    if Path::new("/.dockerenv").exists() {
        return true;
    }
    std::fs::read_to_string("/proc/self/cgroup")
        .map(|cgroup| cgroup.lines().any(|line| line.contains("docker")))
        .unwrap_or(false)
}

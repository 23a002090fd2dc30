//! Post-processing of finished sessions: manifest, merge jobs and the queue
//! that supervises them.

mod manifest;
mod merge;
mod queue;

pub use manifest::{MANIFEST_FILE, Manifest, collect_segments};
pub use merge::{MergeJob, MergeOutcome};
pub use queue::{MergeQueue, MergeSettings, find_unmerged_sessions};

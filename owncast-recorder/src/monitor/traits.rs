//! Seams between the polling loop and the parts it drives.

use async_trait::async_trait;

use crate::Result;
use crate::owncast::StreamStatus;

/// Where the broadcast status comes from.
#[async_trait]
pub trait StatusSource: Send + Sync {
    /// Poll once. An error means the server could not be reached.
    async fn status(&self) -> Result<StreamStatus>;
}

/// A capture that records one session at a time.
#[async_trait]
pub trait CaptureControl: Send {
    /// Begin recording into the session directory `session_name`.
    async fn start(&mut self, session_name: &str) -> Result<()>;

    /// Stop recording and wait until nothing writes to the session anymore.
    async fn stop(&mut self);

    /// Whether the capture process is still alive.
    fn is_running(&self) -> bool;

    /// Whether `session_name` already has a directory or an archive on disk.
    fn session_exists(&self, session_name: &str) -> bool;
}

/// Accepts finished sessions for merging.
#[async_trait]
pub trait MergeSubmitter: Send + Sync {
    async fn submit(&self, session_name: &str) -> Result<()>;

    /// Stop accepting work and finish or kill what is in flight.
    async fn shutdown(&self);
}

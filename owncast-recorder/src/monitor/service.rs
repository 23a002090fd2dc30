//! The polling loop that turns status changes into captures and merges.

use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::traits::{CaptureControl, MergeSubmitter, StatusSource};
use crate::Result;
use crate::owncast::StreamStatus;
use crate::utils::filename::format_session_name;

/// Whether a broadcast is being recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LiveState {
    Offline,
    Live { session: String },
}

/// Polls the server and starts or stops the capture accordingly.
///
/// Finished sessions are handed to the merge submitter; the loop never waits
/// for a merge.
pub struct LiveMonitor<S, C, M: ?Sized> {
    source: S,
    capture: C,
    merges: Arc<M>,
    name_format: String,
    interval: Duration,
    state: LiveState,
    /// Last session handed to the merge queue.
    last_session: Option<String>,
}

impl<S, C, M> LiveMonitor<S, C, M>
where
    S: StatusSource,
    C: CaptureControl,
    M: MergeSubmitter + ?Sized,
{
    pub fn new(
        source: S,
        capture: C,
        merges: Arc<M>,
        name_format: impl Into<String>,
        interval: Duration,
    ) -> Self {
        Self {
            source,
            capture,
            merges,
            name_format: name_format.into(),
            interval,
            state: LiveState::Offline,
            last_session: None,
        }
    }

    pub fn state(&self) -> &LiveState {
        &self.state
    }

    pub fn capture(&self) -> &C {
        &self.capture
    }

    /// Poll once and apply the result.
    pub async fn tick(&mut self) {
        let polled = self.source.status().await;
        self.handle_poll(polled).await;
    }

    /// Apply one poll result. A failed poll counts as offline.
    pub async fn handle_poll(&mut self, polled: Result<StreamStatus>) {
        let status = match polled {
            Ok(status) => status,
            Err(e) if e.is_connection() => {
                error!("Lost connection to the server, treating stream as offline: {}", e);
                StreamStatus::offline()
            }
            Err(e) => {
                error!("Failed to poll stream status: {}", e);
                StreamStatus::offline()
            }
        };

        match (&self.state, status.online) {
            (LiveState::Offline, false) => {}
            (LiveState::Offline, true) => {
                info!(title = %status.title, "Stream is live");
                self.begin(&status.title).await;
            }
            (LiveState::Live { .. }, false) => {
                info!("Stream went offline");
                self.finish().await;
            }
            (LiveState::Live { session }, true) if !self.capture.is_running() => {
                warn!(session = %session, "Capture exited while the stream is still live, starting a new session");
                self.finish().await;
                self.begin(&status.title).await;
            }
            (LiveState::Live { .. }, true) => {}
        }
    }

    async fn begin(&mut self, title: &str) {
        let session = match format_session_name(&self.name_format, &Local::now(), title) {
            Ok(name) => self.unused_session_name(name),
            Err(e) => {
                error!("Could not build session name: {}", e);
                return;
            }
        };

        match self.capture.start(&session).await {
            Ok(()) => self.state = LiveState::Live { session },
            Err(e) => error!(session = %session, "Failed to start recording: {}", e),
        }
    }

    /// `base`, or `base_1`, `base_2`, ... when a previous session still owns
    /// that name. A capture must never write into a directory being merged.
    fn unused_session_name(&self, base: String) -> String {
        let taken = |name: &str| {
            self.last_session.as_deref() == Some(name) || self.capture.session_exists(name)
        };
        let mut name = base.clone();
        let mut suffix = 1u32;
        while taken(&name) {
            name = format!("{base}_{suffix}");
            suffix += 1;
        }
        if name != base {
            debug!(session = %name, "Session name {} is taken", base);
        }
        name
    }

    /// Stop the capture and queue the session it wrote.
    async fn finish(&mut self) {
        let LiveState::Live { session } = std::mem::replace(&mut self.state, LiveState::Offline) else {
            return;
        };

        self.capture.stop().await;
        info!(session = %session, "Stopped recording");
        if let Err(e) = self.merges.submit(&session).await {
            error!(session = %session, "Failed to queue merge: {}", e);
        }
        self.last_session = Some(session);
    }

    /// Poll every interval until `shutdown` fires, then stop the capture and
    /// drain the merge queue.
    ///
    /// A session interrupted this way is left unmerged on disk.
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!(interval = ?self.interval, "Waiting for stream");
        loop {
            let polled = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                polled = self.source.status() => polled,
            };
            self.handle_poll(polled).await;

            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }

        debug!("Monitor loop stopped");
        if let LiveState::Live { session } = std::mem::replace(&mut self.state, LiveState::Offline) {
            self.capture.stop().await;
            warn!(session = %session, "Recording interrupted, it will be merged on the next start");
        }
        self.merges.shutdown().await;
    }
}

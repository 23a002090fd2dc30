//! Background queue of merge jobs.
//!
//! Submitting a job starts its merge right away and returns; a single reaper
//! task rotates through the tracked jobs, re-queueing the ones still running
//! and finalizing the ones that finished. Cleanup latency therefore grows with
//! the number of concurrent merges, which is fine at one merge per broadcast.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::manifest::MANIFEST_FILE;
use super::merge::{MergeJob, MergeOutcome};
use crate::config::FfmpegConfig;
use crate::monitor::MergeSubmitter;
use crate::process::OutputSink;
use crate::utils::fs::{self, io_error};
use crate::{Error, Result};

/// Wait between two visits of a still-running job.
const DEFAULT_REAP_TICK: Duration = Duration::from_millis(500);

/// Longest the reaper sleeps with nothing to do.
const IDLE_WAIT: Duration = Duration::from_secs(1);

/// Queue settings.
#[derive(Debug, Clone)]
pub struct MergeSettings {
    pub output_root: PathBuf,
    pub ffmpeg: FfmpegConfig,
    /// Remove the session directory once its archive is written.
    pub delete_segments: bool,
    pub reap_tick: Duration,
}

impl MergeSettings {
    pub fn new(output_root: impl Into<PathBuf>, ffmpeg: FfmpegConfig, delete_segments: bool) -> Self {
        Self {
            output_root: output_root.into(),
            ffmpeg,
            delete_segments,
            reap_tick: DEFAULT_REAP_TICK,
        }
    }

    pub fn with_reap_tick(mut self, tick: Duration) -> Self {
        self.reap_tick = tick;
        self
    }
}

struct Inner {
    settings: MergeSettings,
    sink: Arc<dyn OutputSink>,
    jobs: Mutex<VecDeque<MergeJob>>,
    /// Jobs submitted and not yet finalized, including one the reaper holds.
    tracked: AtomicUsize,
    notify: Notify,
    cancel: CancellationToken,
}

/// Concurrent merge queue with its own reaper task.
pub struct MergeQueue {
    inner: Arc<Inner>,
    reaper: Mutex<Option<JoinHandle<()>>>,
}

impl MergeQueue {
    /// Create the queue and spawn its reaper. Requires a Tokio runtime.
    pub fn new(settings: MergeSettings, sink: Arc<dyn OutputSink>) -> Self {
        let inner = Arc::new(Inner {
            settings,
            sink,
            jobs: Mutex::new(VecDeque::new()),
            tracked: AtomicUsize::new(0),
            notify: Notify::new(),
            cancel: CancellationToken::new(),
        });
        let reaper = tokio::spawn(reap(inner.clone()));
        Self {
            inner,
            reaper: Mutex::new(Some(reaper)),
        }
    }

    /// Number of jobs not yet finalized.
    pub fn len(&self) -> usize {
        self.inner.tracked.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// False once [`drain_and_stop_all`](Self::drain_and_stop_all) was called.
    pub fn is_active(&self) -> bool {
        !self.inner.cancel.is_cancelled()
    }

    /// Start merging `session_name` in the background.
    pub async fn add_job(&self, session_name: &str) -> Result<()> {
        if !self.is_active() {
            return Err(shut_down(session_name));
        }

        info!(session = %session_name, "Processing \"{}\"", session_name);
        let mut job = MergeJob::new(
            session_name,
            &self.inner.settings.output_root,
            self.inner.settings.ffmpeg.clone(),
            self.inner.sink.clone(),
        );
        job.start().await?;
        self.admit(job).await
    }

    /// Hand a started job to the reaper.
    ///
    /// A job pushed after `drain_and_stop_all` took the queue contents would
    /// never be stopped, so it is finalized here instead.
    async fn admit(&self, job: MergeJob) -> Result<()> {
        let name = job.session_name().to_string();
        self.inner.tracked.fetch_add(1, Ordering::SeqCst);
        self.inner.jobs.lock().push_back(job);
        self.inner.notify.notify_one();

        if self.is_active() {
            return Ok(());
        }
        let stranded = {
            let mut jobs = self.inner.jobs.lock();
            jobs.iter()
                .position(|job| job.session_name() == name)
                .and_then(|index| jobs.remove(index))
        };
        if let Some(mut job) = stranded {
            self.inner.finalize(&mut job).await;
        }
        Err(shut_down(&name))
    }

    /// Queue every session directory left without an archive by a previous run.
    ///
    /// Returns the names that were queued.
    pub async fn process_existing(&self) -> Result<Vec<String>> {
        let settings = &self.inner.settings;
        let pending = find_unmerged_sessions(&settings.output_root, &settings.ffmpeg.archive_ext).await?;
        if pending.is_empty() {
            return Ok(pending);
        }

        info!("Processing {} existing recording(s)", pending.len());
        let mut queued = Vec::with_capacity(pending.len());
        for name in pending {
            match self.add_job(&name).await {
                Ok(()) => queued.push(name),
                Err(e) => error!(session = %name, "Failed to queue existing recording: {}", e),
            }
        }
        Ok(queued)
    }

    /// Halt the reaper, then stop and finalize every remaining job.
    ///
    /// Running merges are killed; their session directories are kept so the
    /// next start picks them up again.
    pub async fn drain_and_stop_all(&self) {
        self.inner.cancel.cancel();
        let reaper = self.reaper.lock().take();
        if let Some(reaper) = reaper {
            if let Err(e) = reaper.await {
                error!("Merge reaper task failed: {}", e);
            }
        }

        let jobs: Vec<MergeJob> = self.inner.jobs.lock().drain(..).collect();
        for mut job in jobs {
            if job.is_running() {
                info!(session = %job.session_name(), "Stopping merge");
            }
            self.inner.finalize(&mut job).await;
        }
    }
}

impl Drop for MergeQueue {
    fn drop(&mut self) {
        self.inner.cancel.cancel();
    }
}

#[async_trait]
impl MergeSubmitter for MergeQueue {
    async fn submit(&self, session_name: &str) -> Result<()> {
        self.add_job(session_name).await
    }

    async fn shutdown(&self) {
        self.drain_and_stop_all().await;
    }
}

impl Inner {
    /// Reap a finished (or force-stop a running) job and clean up after it.
    async fn finalize(&self, job: &mut MergeJob) {
        let name = job.session_name().to_string();
        let outcome = job.stop().await;

        match outcome {
            Some(MergeOutcome::Merged) => {
                info!(session = %name, "Finished processing \"{}\"", name);
                if self.settings.delete_segments {
                    self.remove_session_dir(job.session_dir().as_path(), &name).await;
                }
            }
            Some(MergeOutcome::Empty) => {
                let dir = job.session_dir();
                if self.settings.delete_segments
                    && holds_only_segments(&dir, &self.settings.ffmpeg.segment_ext).await
                {
                    warn!(session = %name, "Nothing to merge, removing empty session");
                    self.remove_session_dir(&dir, &name).await;
                } else {
                    warn!(session = %name, "Nothing to merge, leaving directory in place");
                }
            }
            Some(MergeOutcome::Failed(code)) => {
                error!(session = %name, ?code, "Merge failed, keeping segments for a later retry");
                self.remove_partial_archive(job.archive_path().as_path(), &name).await;
            }
            Some(MergeOutcome::Cancelled) => {
                warn!(session = %name, "Merge cancelled, keeping segments for a later retry");
                self.remove_partial_archive(job.archive_path().as_path(), &name).await;
            }
            None => {}
        }

        self.tracked.fetch_sub(1, Ordering::SeqCst);
    }

    async fn remove_session_dir(&self, dir: &Path, name: &str) {
        match fs::remove_dir_all_with_op("removing session directory", dir).await {
            Ok(()) => debug!(session = %name, "Removed {}", dir.display()),
            Err(e) => error!(session = %name, "{}", e),
        }
    }

    async fn remove_partial_archive(&self, archive: &Path, name: &str) {
        if let Err(e) = fs::remove_file_with_op("removing partial archive", archive).await {
            error!(session = %name, "{}", e);
        }
    }
}

fn shut_down(session_name: &str) -> Error {
    Error::Other(format!(
        "merge queue is shut down, cannot process \"{session_name}\""
    ))
}

/// True when `dir` contains nothing but segment files and an old manifest.
///
/// Used for sessions without usable segments, so every segment found here is
/// empty. Any other file means the directory is not ours to delete.
async fn holds_only_segments(dir: &Path, segment_ext: &str) -> bool {
    let Ok(mut read_dir) = tokio::fs::read_dir(dir).await else {
        return false;
    };
    loop {
        match read_dir.next_entry().await {
            Ok(None) => return true,
            Ok(Some(entry)) => {
                let path = entry.path();
                let is_file = entry.file_type().await.is_ok_and(|t| t.is_file());
                let is_segment = path.extension().and_then(|e| e.to_str()) == Some(segment_ext);
                let is_manifest = entry.file_name() == MANIFEST_FILE;
                if !is_file || !(is_segment || is_manifest) {
                    return false;
                }
            }
            Err(_) => return false,
        }
    }
}

async fn reap(inner: Arc<Inner>) {
    debug!("Merge reaper started");
    while !inner.cancel.is_cancelled() {
        let next = inner.jobs.lock().pop_front();
        match next {
            None => {
                tokio::select! {
                    _ = inner.cancel.cancelled() => break,
                    _ = inner.notify.notified() => {}
                    _ = tokio::time::sleep(IDLE_WAIT) => {}
                }
            }
            Some(job) if job.is_running() => {
                inner.jobs.lock().push_back(job);
                tokio::select! {
                    _ = inner.cancel.cancelled() => break,
                    _ = tokio::time::sleep(inner.settings.reap_tick) => {}
                }
            }
            Some(mut job) => inner.finalize(&mut job).await,
        }
    }
    debug!("Merge reaper stopped");
}

/// Directories in `root` that have no `<name>.<archive_ext>` next to them.
///
/// Hidden directories are ignored. Names are returned sorted.
pub async fn find_unmerged_sessions(root: &Path, archive_ext: &str) -> Result<Vec<String>> {
    let op = "scanning output directory";
    let mut read_dir = tokio::fs::read_dir(root)
        .await
        .map_err(|e| io_error(op, root, e))?;

    let mut pending = Vec::new();
    while let Some(entry) = read_dir
        .next_entry()
        .await
        .map_err(|e| io_error(op, root, e))?
    {
        let Ok(name) = entry.file_name().into_string() else {
            continue;
        };
        if name.starts_with('.') {
            continue;
        }
        let is_dir = entry
            .file_type()
            .await
            .map_err(|e| io_error(op, &entry.path(), e))?
            .is_dir();
        if !is_dir {
            continue;
        }
        let archive = root.join(format!("{name}.{archive_ext}"));
        if !tokio::fs::metadata(&archive)
            .await
            .is_ok_and(|meta| meta.is_file())
        {
            pending.push(name);
        }
    }

    pending.sort();
    Ok(pending)
}

//! Live capture into segment files.
//!
//! A [`Recorder`] runs at most one ffmpeg capture at a time. Each capture
//! writes fixed-length, zero-padded segments (`00000.ts`, `00001.ts`, ...) into
//! `output_root/<session>/` using stream copy.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::Result;
use crate::config::FfmpegConfig;
use crate::monitor::CaptureControl;
use crate::process::{LineFilter, OutputSink, ProcessExit, ProcessSpec, SupervisedProcess};
use crate::utils::fs;

/// Zero-padded segment counter understood by ffmpeg's segment muxer.
const SEGMENT_PATTERN: &str = "%05d";

/// Captures one broadcast at a time.
pub struct Recorder {
    stream_url: String,
    output_root: PathBuf,
    segment_secs: u32,
    ffmpeg: FfmpegConfig,
    sink: Arc<dyn OutputSink>,
    session: Option<String>,
    process: Option<SupervisedProcess>,
}

impl Recorder {
    pub fn new(
        stream_url: impl Into<String>,
        output_root: impl Into<PathBuf>,
        segment_secs: u32,
        ffmpeg: FfmpegConfig,
        sink: Arc<dyn OutputSink>,
    ) -> Self {
        Self {
            stream_url: stream_url.into(),
            output_root: output_root.into(),
            segment_secs,
            ffmpeg,
            sink,
            session: None,
            process: None,
        }
    }

    /// Directory the segments of `session_name` are written to.
    pub fn session_dir(&self, session_name: &str) -> PathBuf {
        self.output_root.join(session_name)
    }

    /// Name of the current session, or the last one after a stop.
    pub fn session_name(&self) -> Option<&str> {
        self.session.as_deref()
    }

    pub fn is_running(&self) -> bool {
        self.process.as_ref().is_some_and(|p| p.is_running())
    }

    fn build_args(&self, session_dir: &Path) -> Vec<String> {
        let output = session_dir.join(format!("{}.{}", SEGMENT_PATTERN, self.ffmpeg.segment_ext));
        vec![
            "-i".to_string(),
            self.stream_url.clone(),
            "-hide_banner".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
            "-c".to_string(),
            "copy".to_string(),
            "-segment_time".to_string(),
            self.segment_secs.to_string(),
            "-f".to_string(),
            "segment".to_string(),
            output.to_string_lossy().into_owned(),
        ]
    }

    /// Start capturing into `output_root/session_name`.
    ///
    /// Does nothing while a capture is already running.
    pub async fn start(&mut self, session_name: &str) -> Result<()> {
        if self.is_running() {
            debug!(session = %session_name, "Capture already running, ignoring start");
            return Ok(());
        }

        // A previous capture that died on its own still has a task to reap.
        if let Some(mut previous) = self.process.take() {
            previous.stop().await;
        }

        let dir = self.session_dir(session_name);
        fs::ensure_dir_all_with_op("creating session directory", &dir).await?;

        let spec = ProcessSpec::new(format!("capture:{session_name}"), &self.ffmpeg.binary_path)
            .args(self.build_args(&dir));
        let process = SupervisedProcess::spawn(spec, LineFilter::ffmpeg(), self.sink.clone())?;

        info!(session = %session_name, dir = %dir.display(), "Started recording");
        self.session = Some(session_name.to_string());
        self.process = Some(process);
        Ok(())
    }

    /// Kill the capture and wait until ffmpeg has exited.
    ///
    /// Returns `None` when nothing was started. Once this returns, the session
    /// directory is no longer written to.
    pub async fn stop(&mut self) -> Option<ProcessExit> {
        let mut process = self.process.take()?;
        let exit = process.stop().await;
        debug!(session = ?self.session, ?exit, "Capture stopped");
        exit
    }
}

#[async_trait]
impl CaptureControl for Recorder {
    async fn start(&mut self, session_name: &str) -> Result<()> {
        Recorder::start(self, session_name).await
    }

    async fn stop(&mut self) {
        Recorder::stop(self).await;
    }

    fn is_running(&self) -> bool {
        Recorder::is_running(self)
    }

    fn session_exists(&self, session_name: &str) -> bool {
        let archive = format!("{session_name}.{}", self.ffmpeg.archive_ext);
        self.session_dir(session_name).exists() || self.output_root.join(archive).exists()
    }
}

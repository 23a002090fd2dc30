//! Merging a finished session into one archive.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::manifest::{MANIFEST_FILE, collect_segments};
use crate::Result;
use crate::config::FfmpegConfig;
use crate::process::{LineFilter, OutputSink, ProcessExit, ProcessSpec, SupervisedProcess};

/// How a merge ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// ffmpeg exited cleanly and the archive exists.
    Merged,
    /// The session had no usable segments; nothing was run.
    Empty,
    /// ffmpeg failed (exit code if it had one) or produced no archive.
    Failed(Option<i32>),
    /// The merge was killed by a stop request.
    Cancelled,
}

/// Concatenates one session's segments into `output_root/<session>.<archive_ext>`.
pub struct MergeJob {
    session_name: String,
    output_root: PathBuf,
    ffmpeg: FfmpegConfig,
    sink: Arc<dyn OutputSink>,
    started: bool,
    process: Option<SupervisedProcess>,
    outcome: Option<MergeOutcome>,
}

impl MergeJob {
    pub fn new(
        session_name: impl Into<String>,
        output_root: impl Into<PathBuf>,
        ffmpeg: FfmpegConfig,
        sink: Arc<dyn OutputSink>,
    ) -> Self {
        Self {
            session_name: session_name.into(),
            output_root: output_root.into(),
            ffmpeg,
            sink,
            started: false,
            process: None,
            outcome: None,
        }
    }

    pub fn session_name(&self) -> &str {
        &self.session_name
    }

    pub fn session_dir(&self) -> PathBuf {
        self.output_root.join(&self.session_name)
    }

    pub fn archive_path(&self) -> PathBuf {
        self.output_root
            .join(format!("{}.{}", self.session_name, self.ffmpeg.archive_ext))
    }

    pub fn is_running(&self) -> bool {
        self.process.as_ref().is_some_and(|p| p.is_running())
    }

    /// Build the manifest and launch ffmpeg. Calling it again does nothing.
    pub async fn start(&mut self) -> Result<()> {
        if self.started {
            debug!(session = %self.session_name, "Merge already started, ignoring start");
            return Ok(());
        }

        let dir = self.session_dir();
        let manifest = collect_segments(&dir, &self.ffmpeg.segment_ext).await?;
        self.started = true;

        if manifest.is_empty() {
            warn!(session = %self.session_name, "No segments to merge");
            self.outcome = Some(MergeOutcome::Empty);
            return Ok(());
        }

        let manifest_path = dir.join(MANIFEST_FILE);
        manifest.write_to(&manifest_path).await?;

        let archive = self.archive_path();
        let args = vec![
            "-y".to_string(),
            "-f".to_string(),
            "concat".to_string(),
            "-safe".to_string(),
            "0".to_string(),
            "-i".to_string(),
            manifest_path.to_string_lossy().into_owned(),
            "-hide_banner".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
            "-c".to_string(),
            "copy".to_string(),
            archive.to_string_lossy().into_owned(),
        ];
        let spec = ProcessSpec::new(format!("merge:{}", self.session_name), &self.ffmpeg.binary_path)
            .args(args);
        self.process = Some(SupervisedProcess::spawn(
            spec,
            LineFilter::ffmpeg(),
            self.sink.clone(),
        )?);

        info!(
            session = %self.session_name,
            segments = manifest.entries().len(),
            skipped = manifest.skipped().len(),
            "Merging into {}",
            archive.display()
        );
        Ok(())
    }

    /// Kill the merge if it is still running and wait for it.
    ///
    /// Returns the outcome, or `None` if the job was never started.
    pub async fn stop(&mut self) -> Option<MergeOutcome> {
        if let Some(mut process) = self.process.take() {
            let outcome = match process.stop().await {
                Some(ProcessExit::Killed) => MergeOutcome::Cancelled,
                Some(exit) if exit.success() => self.verify_archive().await,
                Some(ProcessExit::Exited(code)) => MergeOutcome::Failed(code),
                None => MergeOutcome::Failed(None),
            };
            self.outcome = Some(outcome);
        }
        self.outcome
    }

    async fn verify_archive(&self) -> MergeOutcome {
        match tokio::fs::metadata(self.archive_path()).await {
            Ok(meta) if meta.is_file() && meta.len() > 0 => MergeOutcome::Merged,
            _ => {
                warn!(session = %self.session_name, "ffmpeg succeeded but produced no archive");
                MergeOutcome::Failed(Some(0))
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::process::MemorySink;
    use crate::test_support::{fake_tool, wait_until};
    use std::path::Path;
    use tempfile::TempDir;

    /// Writes its manifest argument into the output file (the last argument).
    const COPY_MANIFEST: &str = r#"
while [ $# -gt 1 ]; do
  if [ "$1" = "-i" ]; then list="$2"; fi
  shift
done
cat "$list" > "$1"
"#;

    fn job(root: &Path, tool: &Path, name: &str) -> MergeJob {
        MergeJob::new(
            name,
            root,
            FfmpegConfig {
                binary_path: tool.to_path_buf(),
                ..FfmpegConfig::default()
            },
            Arc::new(MemorySink::new()),
        )
    }

    #[tokio::test]
    async fn merges_non_empty_segments_into_archive() {
        let temp = TempDir::new().unwrap();
        let tool = fake_tool(temp.path(), "ffmpeg", COPY_MANIFEST);
        let root = temp.path().join("out");
        let session = root.join("show");
        std::fs::create_dir_all(&session).unwrap();
        std::fs::write(session.join("00000.ts"), b"a").unwrap();
        std::fs::write(session.join("00001.ts"), b"").unwrap();

        let mut job = job(&root, &tool, "show");
        job.start().await.unwrap();
        wait_until(|| !job.is_running()).await;

        assert_eq!(job.stop().await, Some(MergeOutcome::Merged));
        let archive = std::fs::read_to_string(root.join("show.mkv")).unwrap();
        assert!(archive.contains("00000.ts"));
        assert!(!archive.contains("00001.ts"));
        assert!(session.join(MANIFEST_FILE).is_file());
    }

    #[tokio::test]
    async fn session_without_segments_is_empty() {
        let temp = TempDir::new().unwrap();
        let tool = fake_tool(temp.path(), "ffmpeg", "exit 1");
        std::fs::create_dir_all(temp.path().join("show")).unwrap();

        let mut job = job(temp.path(), &tool, "show");
        job.start().await.unwrap();
        assert!(!job.is_running());
        assert_eq!(job.stop().await, Some(MergeOutcome::Empty));
        assert!(!temp.path().join("show").join(MANIFEST_FILE).exists());
    }

    #[tokio::test]
    async fn failing_tool_reports_exit_code() {
        let temp = TempDir::new().unwrap();
        let tool = fake_tool(temp.path(), "ffmpeg", "echo 'concat failed' >&2; exit 4");
        let session = temp.path().join("show");
        std::fs::create_dir_all(&session).unwrap();
        std::fs::write(session.join("00000.ts"), b"a").unwrap();

        let mut job = job(temp.path(), &tool, "show");
        job.start().await.unwrap();
        wait_until(|| !job.is_running()).await;
        assert_eq!(job.stop().await, Some(MergeOutcome::Failed(Some(4))));
    }

    #[tokio::test]
    async fn second_start_and_stop_are_idempotent() {
        let temp = TempDir::new().unwrap();
        let tool = fake_tool(temp.path(), "ffmpeg", "exec sleep 30");
        let session = temp.path().join("show");
        std::fs::create_dir_all(&session).unwrap();
        std::fs::write(session.join("00000.ts"), b"a").unwrap();

        let mut job = job(temp.path(), &tool, "show");
        job.start().await.unwrap();
        job.start().await.unwrap();
        assert!(job.is_running());

        assert_eq!(job.stop().await, Some(MergeOutcome::Cancelled));
        assert_eq!(job.stop().await, Some(MergeOutcome::Cancelled));
        assert!(!job.is_running());
    }

    #[tokio::test]
    async fn stop_before_start_returns_none() {
        let temp = TempDir::new().unwrap();
        let mut job = job(temp.path(), Path::new("ffmpeg"), "show");
        assert_eq!(job.stop().await, None);
    }
}

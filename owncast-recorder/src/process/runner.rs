//! Supervised child processes.
//!
//! A [`SupervisedProcess`] owns one external tool run: a supervising task
//! holds the child, drains its combined output through a
//! [`LineReader`](process_utils::LineReader), forwards non-noise lines to an
//! [`OutputSink`], and reacts to a stop request by killing the child.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use process_utils::{LineReader, ReadLine, piped_command};
use tokio::process::Child;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use super::filter::LineFilter;
use super::sink::OutputSink;
use crate::{Error, Result};

/// What to run.
#[derive(Debug, Clone)]
pub struct ProcessSpec {
    /// Name used in log lines (e.g. `capture:<session>`).
    pub label: String,
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl ProcessSpec {
    pub fn new(label: impl Into<String>, program: impl Into<PathBuf>) -> Self {
        Self {
            label: label.into(),
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }
}

/// How a supervised process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessExit {
    /// The process exited by itself. `None` when it was terminated by a signal.
    Exited(Option<i32>),
    /// The process was killed after a stop request.
    Killed,
}

impl ProcessExit {
    pub fn success(&self) -> bool {
        matches!(self, ProcessExit::Exited(Some(0)))
    }
}

/// Handle to a running (or finished) external tool.
pub struct SupervisedProcess {
    label: String,
    running: Arc<AtomicBool>,
    cancel: CancellationToken,
    task: Option<JoinHandle<ProcessExit>>,
    exit: Option<ProcessExit>,
}

impl SupervisedProcess {
    /// Spawn the process and its supervising task.
    pub fn spawn(spec: ProcessSpec, filter: LineFilter, sink: Arc<dyn OutputSink>) -> Result<Self> {
        debug!(process = %spec.label, "Running {} {:?}", spec.program.display(), spec.args);

        let mut cmd = piped_command(&spec.program);
        cmd.args(&spec.args);
        let mut child = cmd.spawn().map_err(|e| {
            Error::process(format!(
                "failed to spawn {} for {}: {}",
                spec.program.display(),
                spec.label,
                e
            ))
        })?;

        let reader = LineReader::from_child(&mut child);
        let running = Arc::new(AtomicBool::new(true));
        let cancel = CancellationToken::new();

        let task = tokio::spawn(supervise(
            child,
            reader,
            Supervision {
                label: spec.label.clone(),
                running: running.clone(),
                cancel: cancel.clone(),
                filter,
                sink,
            },
        ));

        Ok(Self {
            label: spec.label,
            running,
            cancel,
            task: Some(task),
            exit: None,
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// True until the process exits on its own or a stop completes.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Kill the process (if still alive) and wait for the supervising task.
    ///
    /// When this returns the child has been reaped. Calling it again returns
    /// the same exit without doing anything.
    pub async fn stop(&mut self) -> Option<ProcessExit> {
        if let Some(task) = self.task.take() {
            self.cancel.cancel();
            let exit = match task.await {
                Ok(exit) => exit,
                Err(e) => {
                    error!(process = %self.label, "Supervising task failed: {}", e);
                    ProcessExit::Exited(None)
                }
            };
            self.running.store(false, Ordering::SeqCst);
            self.exit = Some(exit);
        }
        self.exit
    }
}

struct Supervision {
    label: String,
    running: Arc<AtomicBool>,
    cancel: CancellationToken,
    filter: LineFilter,
    sink: Arc<dyn OutputSink>,
}

impl Supervision {
    fn forward(&self, line: &str) {
        if !self.filter.is_noise(line) {
            self.sink.line(&self.label, line);
        }
    }
}

async fn supervise(mut child: Child, mut reader: LineReader, s: Supervision) -> ProcessExit {
    let exit = loop {
        tokio::select! {
            biased;
            _ = s.cancel.cancelled() => break kill(&mut child, &mut reader, &s).await,
            line = reader.next_line() => match line {
                Some(line) => s.forward(&line),
                // Output closed, but the process may keep running without it.
                None => tokio::select! {
                    biased;
                    _ = s.cancel.cancelled() => break kill(&mut child, &mut reader, &s).await,
                    exit = wait_exit(&mut child, &s.label) => break exit,
                },
            },
        }
    };

    s.running.store(false, Ordering::SeqCst);
    exit
}

async fn kill(child: &mut Child, reader: &mut LineReader, s: &Supervision) -> ProcessExit {
    if let Err(e) = child.kill().await {
        warn!(process = %s.label, "Failed to kill process: {}", e);
    }
    // Whatever the drain tasks already buffered still gets logged.
    while let ReadLine::Line(line) = reader.try_next() {
        s.forward(&line);
    }
    debug!(process = %s.label, "Process killed on request");
    ProcessExit::Killed
}

async fn wait_exit(child: &mut Child, label: &str) -> ProcessExit {
    match child.wait().await {
        Ok(status) => {
            if !status.success() {
                warn!(process = %label, "Process exited with status: {}", status);
            } else {
                debug!(process = %label, "Process exited");
            }
            ProcessExit::Exited(status.code())
        }
        Err(e) => {
            error!(process = %label, "Error waiting for process: {}", e);
            ProcessExit::Exited(None)
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::process::MemorySink;
    use std::time::Duration;

    fn sh(label: &str, script: &str) -> ProcessSpec {
        ProcessSpec::new(label, "sh").args(["-c", script])
    }

    async fn wait_until_stopped(process: &SupervisedProcess) {
        for _ in 0..500 {
            if !process.is_running() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("process {} never finished", process.label());
    }

    #[tokio::test]
    async fn forwards_filtered_output_and_reports_exit() {
        let sink = Arc::new(MemorySink::new());
        let mut process = SupervisedProcess::spawn(
            sh(
                "job",
                "echo keep; echo '   '; echo 'Last message repeated 2 times' >&2; echo err >&2; exit 3",
            ),
            LineFilter::ffmpeg(),
            sink.clone(),
        )
        .unwrap();

        wait_until_stopped(&process).await;
        assert_eq!(process.stop().await, Some(ProcessExit::Exited(Some(3))));

        let mut lines = sink.lines_for("job");
        lines.sort();
        assert_eq!(lines, vec!["err".to_string(), "keep".to_string()]);
    }

    #[tokio::test]
    async fn stop_kills_a_long_running_process() {
        let sink = Arc::new(MemorySink::new());
        let mut process =
            SupervisedProcess::spawn(sh("sleeper", "sleep 30"), LineFilter::new(), sink).unwrap();
        assert!(process.is_running());

        let exit = tokio::time::timeout(Duration::from_secs(5), process.stop())
            .await
            .expect("stop must not hang");
        assert_eq!(exit, Some(ProcessExit::Killed));
        assert!(!process.is_running());

        // Second stop is a no-op returning the same result.
        assert_eq!(process.stop().await, Some(ProcessExit::Killed));
    }

    #[tokio::test]
    async fn stop_kills_a_process_that_closed_its_output() {
        let sink = Arc::new(MemorySink::new());
        let mut process = SupervisedProcess::spawn(
            sh("detached", "echo bye; exec >/dev/null 2>&1; exec sleep 30"),
            LineFilter::new(),
            sink.clone(),
        )
        .unwrap();

        for _ in 0..500 {
            if !sink.lines_for("detached").is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(process.is_running());

        let exit = tokio::time::timeout(Duration::from_secs(5), process.stop())
            .await
            .expect("stop must kill a process whose output is closed");
        assert_eq!(exit, Some(ProcessExit::Killed));
        assert!(!process.is_running());
    }

    #[tokio::test]
    async fn spawn_failure_is_a_process_error() {
        let result = SupervisedProcess::spawn(
            ProcessSpec::new("missing", "/nonexistent/definitely-not-ffmpeg"),
            LineFilter::new(),
            Arc::new(MemorySink::new()),
        );
        assert!(matches!(result, Err(Error::Process(_))));
    }

    #[test]
    fn only_clean_exit_is_success() {
        assert!(ProcessExit::Exited(Some(0)).success());
        assert!(!ProcessExit::Exited(Some(1)).success());
        assert!(!ProcessExit::Exited(None).success());
        assert!(!ProcessExit::Killed.success());
    }
}

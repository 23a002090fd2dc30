//! Destinations for child process output.

use parking_lot::Mutex;
use tracing::debug;

/// Receives every non-noise output line of a supervised process.
///
/// Handed to each component at construction so callers decide where tool
/// output ends up.
pub trait OutputSink: Send + Sync {
    fn line(&self, label: &str, line: &str);
}

/// Forwards lines to `tracing` at debug level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl OutputSink for TracingSink {
    fn line(&self, label: &str, line: &str) {
        debug!(process = %label, "{}", line.trim_end());
    }
}

/// Keeps every line in memory as `(label, line)`.
#[derive(Debug, Default)]
pub struct MemorySink {
    lines: Mutex<Vec<(String, String)>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lines recorded for one label, in arrival order.
    pub fn lines_for(&self, label: &str) -> Vec<String> {
        self.lines
            .lock()
            .iter()
            .filter(|(l, _)| l == label)
            .map(|(_, line)| line.clone())
            .collect()
    }
}

impl OutputSink for MemorySink {
    fn line(&self, label: &str, line: &str) {
        self.lines.lock().push((label.to_string(), line.to_string()));
    }
}

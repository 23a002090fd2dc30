//! Noise filtering for tool output.

/// FFmpeg messages that show up on every HLS capture and carry no information.
const FFMPEG_NOISE: &[&str] = &[
    "non-existing SPS 0 referenced in buffering period",
    "Last message repeated",
];

/// Decides which output lines are worth surfacing.
///
/// Blank lines are always noise; otherwise a line is noise when it contains
/// any of the configured patterns.
#[derive(Debug, Clone, Default)]
pub struct LineFilter {
    patterns: Vec<String>,
}

impl LineFilter {
    /// A filter that only drops blank lines.
    pub fn new() -> Self {
        Self::default()
    }

    /// The filter used for every ffmpeg invocation.
    pub fn ffmpeg() -> Self {
        FFMPEG_NOISE
            .iter()
            .fold(Self::new(), |filter, pattern| filter.with_pattern(*pattern))
    }

    pub fn with_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.patterns.push(pattern.into());
        self
    }

    pub fn is_noise(&self, line: &str) -> bool {
        line.trim().is_empty() || self.patterns.iter().any(|p| line.contains(p.as_str()))
    }
}

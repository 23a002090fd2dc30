//! Recorder configuration.
//!
//! [`RecorderConfig`] is what the core consumes; the CLI layer in
//! [`crate::cli`] fills it from arguments and environment variables.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::utils::filename::validate_pattern;
use crate::{Error, Result};

/// Default output file/folder name format.
pub const DEFAULT_NAME_FORMAT: &str = "%m-%d-%y_%H;%M;%S_{stream_title}";

/// Default seconds between status polls.
pub const DEFAULT_INTERVAL_SECS: u64 = 1;

/// Default connection retry attempts.
pub const DEFAULT_RETRIES: i32 = 2;

/// Default segment length in seconds.
pub const DEFAULT_SEGMENT_SECS: u32 = 10;

/// Default logging verbosity (info).
pub const DEFAULT_VERBOSITY: u8 = 2;

/// How ffmpeg is invoked and which file types it produces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FfmpegConfig {
    /// Path to the ffmpeg binary.
    pub binary_path: PathBuf,
    /// Extension of capture segments.
    pub segment_ext: String,
    /// Extension of merged archives.
    pub archive_ext: String,
}

impl Default for FfmpegConfig {
    fn default() -> Self {
        Self {
            binary_path: PathBuf::from("ffmpeg"),
            segment_ext: "ts".to_string(),
            archive_ext: "mkv".to_string(),
        }
    }
}

/// Everything the recorder needs to run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecorderConfig {
    /// Owncast server base URL (e.g. `https://oc.example.com`).
    pub server: String,
    /// Directory sessions and archives are written to.
    pub output_dir: PathBuf,
    /// Time between status polls.
    pub poll_interval: Duration,
    /// Connection retry attempts; `-1` retries forever.
    pub retries: i32,
    /// strftime pattern for session names, may contain `{stream_title}`.
    pub name_format: String,
    /// Length of each capture segment in seconds.
    pub segment_secs: u32,
    /// Remove the session directory after a successful merge.
    pub delete_segments: bool,
    pub ffmpeg: FfmpegConfig,
    /// 0 = error, 1 = warn, 2 = info, 3+ = debug.
    pub verbosity: u8,
    /// Directory for rotated log files; console only when unset.
    pub log_dir: Option<PathBuf>,
}

impl RecorderConfig {
    pub fn new(server: impl Into<String>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            server: server.into(),
            output_dir: output_dir.into(),
            poll_interval: Duration::from_secs(DEFAULT_INTERVAL_SECS),
            retries: DEFAULT_RETRIES,
            name_format: DEFAULT_NAME_FORMAT.to_string(),
            segment_secs: DEFAULT_SEGMENT_SECS,
            delete_segments: true,
            ffmpeg: FfmpegConfig::default(),
            verbosity: DEFAULT_VERBOSITY,
            log_dir: None,
        }
    }

    /// Check values that would otherwise only fail deep inside the loop.
    pub fn validate(&self) -> Result<()> {
        let url = reqwest::Url::parse(&self.server)
            .map_err(|e| Error::config(format!("invalid server URL \"{}\": {}", self.server, e)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(Error::config(format!(
                "server URL must use http or https, got \"{}\"",
                self.server
            )));
        }
        if self.retries < -1 {
            return Err(Error::config("retries must be -1 (unlimited) or >= 0"));
        }
        if self.segment_secs == 0 {
            return Err(Error::config("segment time must be at least 1 second"));
        }
        if self.poll_interval.is_zero() {
            return Err(Error::config("poll interval must be at least 1 second"));
        }
        validate_pattern(&self.name_format)?;
        Ok(())
    }

    /// Server URL without trailing slashes.
    pub fn server_base(&self) -> &str {
        self.server.trim_end_matches('/')
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = RecorderConfig::new("http://localhost:8080", "/data");
        assert_eq!(config.poll_interval, Duration::from_secs(1));
        assert_eq!(config.retries, 2);
        assert_eq!(config.segment_secs, 10);
        assert!(config.delete_segments);
        assert_eq!(config.ffmpeg.segment_ext, "ts");
        assert_eq!(config.ffmpeg.archive_ext, "mkv");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_bad_values() {
        let mut config = RecorderConfig::new("oc.example.com", "/data");
        assert!(config.validate().is_err());

        config.server = "ftp://oc.example.com".into();
        assert!(config.validate().is_err());

        config.server = "https://oc.example.com".into();
        config.retries = -2;
        assert!(config.validate().is_err());

        config.retries = -1;
        config.segment_secs = 0;
        assert!(config.validate().is_err());

        config.segment_secs = 5;
        config.name_format = "%Q".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn server_base_strips_trailing_slash() {
        let config = RecorderConfig::new("https://oc.example.com/", "/data");
        assert_eq!(config.server_base(), "https://oc.example.com");
    }
}

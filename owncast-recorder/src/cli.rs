//! Command line arguments.
//!
//! Every option can also come from an environment variable (or a `.env` file
//! loaded at startup), which is how the Docker image is configured.

use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgAction, Parser};

use crate::config::{
    DEFAULT_INTERVAL_SECS, DEFAULT_NAME_FORMAT, DEFAULT_RETRIES, DEFAULT_SEGMENT_SECS,
    DEFAULT_VERBOSITY, FfmpegConfig, RecorderConfig,
};
use crate::{Error, Result};

#[derive(Debug, Parser)]
#[command(
    name = "owncast-recorder",
    version,
    about = "Automatic recorder for Owncast streams"
)]
pub struct Args {
    /// Owncast server to record from (eg: "https://oc.mysite.com" or "http://192.168.50.12:8080")
    #[arg(env = "SERVER")]
    pub server: Option<String>,

    /// Directory to output recorded files to [default: /data in Docker, else the current directory]
    #[arg(short, long, env = "OUTPUT")]
    pub output: Option<PathBuf>,

    /// Time in seconds between checks to see if the stream is live
    #[arg(short = 'n', long, env = "INTERVAL", default_value_t = DEFAULT_INTERVAL_SECS)]
    pub interval: u64,

    /// Number of retry attempts when connecting to the server. -1 = unlimited
    #[arg(
        short,
        long,
        env = "RETRIES",
        default_value_t = DEFAULT_RETRIES,
        allow_negative_numbers = true
    )]
    pub retries: i32,

    /// Output file/folder name format. Supports strftime variables and {stream_title}
    #[arg(short = 'f', long, env = "OUTFORMAT", default_value = DEFAULT_NAME_FORMAT)]
    pub outformat: String,

    /// FFmpeg segment time; length of each recording chunk in seconds
    #[arg(short, long, env = "SEGTIME", default_value_t = DEFAULT_SEGMENT_SECS)]
    pub segtime: u32,

    /// Delete segment files once a recording has been merged
    #[arg(
        short = 'd',
        long = "delete-segments",
        alias = "deletetsfiles",
        env = "DELETETSFILES",
        default_value_t = true,
        action = ArgAction::Set
    )]
    pub delete_segments: bool,

    /// Base logging verbosity: 0 = error, 1 = warn, 2 = info, 3 = debug
    #[arg(long, env = "VERBOSITY", default_value_t = DEFAULT_VERBOSITY)]
    pub verbosity: u8,

    /// Increase logging verbosity (repeatable)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    /// Path to the ffmpeg binary
    #[arg(long, env = "FFMPEG", default_value = "ffmpeg")]
    pub ffmpeg: PathBuf,

    /// Also write daily-rotated log files to this directory
    #[arg(long, env = "LOG_DIR")]
    pub log_dir: Option<PathBuf>,
}

impl Args {
    /// Effective verbosity: the base level plus one per `-v`.
    pub fn effective_verbosity(&self) -> u8 {
        self.verbosity.saturating_add(self.verbose)
    }

    /// Build the recorder configuration.
    ///
    /// `default_output` is used when no output directory was given.
    pub fn into_config(self, default_output: PathBuf) -> Result<RecorderConfig> {
        let verbosity = self.effective_verbosity();
        let server = self
            .server
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| Error::config("a server to record from is required"))?;

        let config = RecorderConfig {
            server,
            output_dir: self.output.unwrap_or(default_output),
            poll_interval: Duration::from_secs(self.interval),
            retries: self.retries,
            name_format: self.outformat,
            segment_secs: self.segtime,
            delete_segments: self.delete_segments,
            ffmpeg: FfmpegConfig {
                binary_path: self.ffmpeg,
                ..FfmpegConfig::default()
            },
            verbosity,
            log_dir: self.log_dir,
        };
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("owncast-recorder").chain(args.iter().copied()))
            .unwrap()
    }

    #[test]
    fn parses_short_flags() {
        let args = parse(&[
            "https://oc.example.com",
            "-o",
            "/tmp/rec",
            "-n",
            "5",
            "-r",
            "-1",
            "-s",
            "6",
            "-d",
            "false",
            "-vv",
        ]);
        assert_eq!(args.retries, -1);
        assert_eq!(args.effective_verbosity(), args.verbosity + 2);

        let config = args.into_config(PathBuf::from("/unused")).unwrap();
        assert_eq!(config.server, "https://oc.example.com");
        assert_eq!(config.output_dir, PathBuf::from("/tmp/rec"));
        assert_eq!(config.poll_interval, Duration::from_secs(5));
        assert_eq!(config.segment_secs, 6);
        assert!(!config.delete_segments);
    }

    #[test]
    fn default_output_is_used_when_missing() {
        let args = parse(&["http://localhost:8080"]);
        let config = args.into_config(PathBuf::from("/data")).unwrap();
        assert_eq!(config.output_dir, PathBuf::from("/data"));
    }

    #[test]
    fn legacy_delete_flag_name_is_accepted() {
        let args = parse(&["http://localhost:8080", "--deletetsfiles", "false"]);
        assert!(!args.delete_segments);
    }

    #[test]
    fn invalid_format_is_rejected() {
        let args = parse(&["http://localhost:8080", "-f", "%Q"]);
        assert!(args.into_config(PathBuf::from("/data")).is_err());
    }
}

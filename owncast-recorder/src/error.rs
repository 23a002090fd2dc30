//! Application-wide error types.

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Application-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error while {op} {}: {source}", path.display())]
    IoPath {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The server could not be reached after all retry attempts.
    #[error("Could not connect to \"{url}\" after {attempts} attempt(s): {message}")]
    Connection {
        url: String,
        attempts: u32,
        message: String,
    },

    #[error("Process error: {0}")]
    Process(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn io_path(op: &'static str, path: &Path, source: std::io::Error) -> Self {
        Self::IoPath {
            op,
            path: path.to_path_buf(),
            source,
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn process(msg: impl Into<String>) -> Self {
        Self::Process(msg.into())
    }

    /// Whether this error means the server is unreachable.
    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Connection { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_path_display_includes_operation_and_path() {
        let err = Error::io_path(
            "creating session directory",
            Path::new("/data/show"),
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        let msg = err.to_string();
        assert!(msg.contains("creating session directory"));
        assert!(msg.contains("/data/show"));
        assert!(msg.contains("denied"));
    }

    #[test]
    fn connection_errors_are_distinguishable() {
        let err = Error::Connection {
            url: "http://localhost:8080".into(),
            attempts: 3,
            message: "refused".into(),
        };
        assert!(err.is_connection());
        assert!(!Error::config("bad").is_connection());
    }
}

//! Process helpers shared across the workspace.
//!
//! - [`tokio_command`] / [`piped_command`] build child commands that never pop a
//!   console window on Windows.
//! - [`LineReader`] drains a child's output on background tasks and hands lines
//!   out without ever blocking the caller.

use std::ffi::OsStr;
use std::process::Stdio;

mod reader;

pub use reader::{LineReader, ReadLine};

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Apply the Windows `CREATE_NO_WINDOW` flag to child processes.
///
/// On non-Windows targets this is a no-op.
pub trait NoWindowExt {
    fn no_window(&mut self);
}

impl NoWindowExt for tokio::process::Command {
    fn no_window(&mut self) {
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            self.as_std_mut().creation_flags(CREATE_NO_WINDOW);
        }
    }
}

/// Create a `tokio::process::Command` with `CREATE_NO_WINDOW` applied on Windows.
pub fn tokio_command(program: impl AsRef<OsStr>) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new(program);
    cmd.no_window();
    cmd
}

/// Create a command whose stdout and stderr are piped for a [`LineReader`].
///
/// Stdin is closed, the locale is forced to `C` so tool output stays parseable,
/// and the child is killed if its handle is dropped without being waited on.
pub fn piped_command(program: impl AsRef<OsStr>) -> tokio::process::Command {
    let mut cmd = tokio_command(program);
    cmd.env("LC_ALL", "C")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    cmd
}

//! Records an Owncast live stream whenever it is online.
//!
//! A [`monitor::LiveMonitor`] polls the server and drives a
//! [`recorder::Recorder`], which captures the HLS stream into fixed-length
//! segments. When a broadcast ends its session is handed to the
//! [`pipeline::MergeQueue`], which concatenates the segments into one archive
//! in the background.

pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod monitor;
pub mod owncast;
pub mod pipeline;
pub mod process;
pub mod recorder;
pub mod utils;

#[cfg(all(test, unix))]
mod test_support;

pub use error::{Error, Result};

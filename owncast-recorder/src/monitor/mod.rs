//! Live/offline tracking of the Owncast stream.

mod service;
mod traits;

pub use service::{LiveMonitor, LiveState};
pub use traits::{CaptureControl, MergeSubmitter, StatusSource};

//! External tool supervision shared by capture and merge.

mod filter;
mod runner;
mod sink;

pub use filter::LineFilter;
pub use runner::{ProcessExit, ProcessSpec, SupervisedProcess};
pub use sink::{MemorySink, OutputSink, TracingSink};

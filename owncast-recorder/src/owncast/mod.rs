//! Owncast server access.

mod client;
mod retry;

pub use client::{OwncastClient, StreamStatus};
pub use retry::RetryPolicy;

//! Daemon lifecycle: graceful shutdown on SIGTERM/SIGINT

mod shutdown;

pub use shutdown::{ShutdownReason, ShutdownSignal};

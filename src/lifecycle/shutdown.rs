//! Signal handling for graceful shutdown

use std::fmt;
use std::io;

use tokio::signal::unix::{signal, Signal, SignalKind};
use tracing::debug;

/// Signal that ended the daemon
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    Terminate,
    Interrupt,
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownReason::Terminate => write!(f, "SIGTERM"),
            ShutdownReason::Interrupt => write!(f, "SIGINT"),
        }
    }
}

/// Handles shutdown signals (SIGTERM, SIGINT)
///
/// Handlers are registered on construction so a signal arriving before
/// [`wait`](Self::wait) is polled is not lost.
pub struct ShutdownSignal {
    sigterm: Signal,
    sigint: Signal,
}

impl ShutdownSignal {
    /// Register the signal handlers; must be called inside a tokio runtime
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            sigterm: signal(SignalKind::terminate())?,
            sigint: signal(SignalKind::interrupt())?,
        })
    }

    /// Wait for a shutdown signal
    pub async fn wait(&mut self) -> ShutdownReason {
        let reason = tokio::select! {
            _ = self.sigterm.recv() => ShutdownReason::Terminate,
            _ = self.sigint.recv() => ShutdownReason::Interrupt,
        };
        debug!(%reason, "received shutdown signal");
        reason
    }
}

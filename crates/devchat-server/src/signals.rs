//! Termination signals.
//!
//! Interrupt (Ctrl-C) and, on unix, `SIGTERM` both request a shutdown.

use std::io;

/// Registered termination signal handlers.
pub struct Signals {
    #[cfg(unix)]
    terminate: tokio::signal::unix::Signal,
}

impl Signals {
    /// Register handlers. Must be called inside a tokio runtime.
    pub fn install() -> io::Result<Self> {
        Ok(Self {
            #[cfg(unix)]
            terminate: tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?,
        })
    }

    /// Wait for the next termination signal.
    #[cfg(unix)]
    pub async fn recv(&mut self) -> io::Result<()> {
        tokio::select! {
            interrupted = tokio::signal::ctrl_c() => interrupted,
            _ = self.terminate.recv() => Ok(()),
        }
    }

    /// Wait for the next termination signal.
    #[cfg(not(unix))]
    pub async fn recv(&mut self) -> io::Result<()> {
        tokio::signal::ctrl_c().await
    }
}

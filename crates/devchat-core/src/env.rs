//! Environment abstraction for time.
//!
//! Decouples the dispatcher from the system clock so tests can run under
//! tokio's paused clock and production uses real wall-clock time.

use std::time::Duration;

use chrono::{DateTime, Utc};

/// Abstract environment providing wall-clock time and async delays.
///
/// # Invariants
///
/// Implementations are not required to be monotonic; the dispatcher clamps
/// timestamps it hands out so accepted events never go backwards.
pub trait Environment: Clone + Send + Sync + 'static {
    /// Current wall-clock time.
    fn now(&self) -> DateTime<Utc>;

    /// Sleeps for the specified duration.
    ///
    /// Only used by driver code (shutdown grace period), never by routing
    /// logic.
    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send;
}

/// Production environment using the system clock and tokio timers.
#[derive(Clone, Debug, Default)]
pub struct SystemEnv;

impl SystemEnv {
    /// Create a new system environment.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Environment for SystemEnv {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }
}

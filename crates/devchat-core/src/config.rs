//! Engine configuration.

use std::time::Duration;

use crate::error::ConfigError;

/// Maximum accepted length of one input line, in bytes.
///
/// Longer lines are truncated before any other processing.
pub const MAX_MESSAGE_LEN: usize = 5120;

/// Configuration for the session and event engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatConfig {
    /// Maximum number of events kept in the shared and per-session backlogs
    pub scrollback: usize,
    /// Input lines are truncated to this many bytes
    pub max_message_len: usize,
    /// Bound of each session's inbound event queue
    pub queue_capacity: usize,
    /// How long sessions get to drain after a shutdown notice
    pub shutdown_grace: Duration,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            scrollback: 16,
            max_message_len: MAX_MESSAGE_LEN,
            queue_capacity: 512,
            shutdown_grace: Duration::from_millis(500),
        }
    }
}

impl ChatConfig {
    /// Check the settings are usable together.
    ///
    /// A joining session receives the whole shared backlog plus its own join
    /// before its renderer runs, so the queue must hold more than
    /// `scrollback` events.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scrollback == 0 {
            return Err(ConfigError::Invalid("scrollback must be positive".to_string()));
        }
        if self.max_message_len == 0 {
            return Err(ConfigError::Invalid("max_message_len must be positive".to_string()));
        }
        if self.queue_capacity <= self.scrollback {
            return Err(ConfigError::Invalid(format!(
                "queue_capacity ({}) must exceed scrollback ({})",
                self.queue_capacity, self.scrollback
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert_eq!(ChatConfig::default().validate(), Ok(()));
    }

    #[test]
    fn zero_scrollback_is_rejected() {
        let config = ChatConfig { scrollback: 0, ..Default::default() };
        assert!(config.validate().is_err());
    }

    #[test]
    fn queue_must_hold_a_full_backlog() {
        let config = ChatConfig { scrollback: 64, queue_capacity: 64, ..Default::default() };
        assert!(config.validate().is_err());

        let config = ChatConfig { scrollback: 64, queue_capacity: 65, ..Default::default() };
        assert_eq!(config.validate(), Ok(()));
    }
}

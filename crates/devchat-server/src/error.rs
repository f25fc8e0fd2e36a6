//! Server error types.

use std::fmt;

use devchat_core::{BanStoreError, ConfigError};

/// Errors that can occur while starting or running the server.
#[derive(Debug)]
pub enum ServerError {
    /// Configuration error (unreadable or malformed file, invalid values).
    ///
    /// Fatal at startup. Fix the configuration and restart.
    Config(String),

    /// Host key could not be loaded.
    HostKey(String),

    /// Listening socket could not be bound.
    Bind(String),

    /// Ban list could not be loaded or saved.
    BanStore(BanStoreError),

    /// SSH protocol failure on one connection.
    ///
    /// Ends that connection only.
    Ssh(russh::Error),

    /// Other I/O failure.
    Io(std::io::Error),
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "configuration error: {msg}"),
            Self::HostKey(msg) => write!(f, "host key error: {msg}"),
            Self::Bind(msg) => write!(f, "bind error: {msg}"),
            Self::BanStore(err) => write!(f, "ban list error: {err}"),
            Self::Ssh(err) => write!(f, "ssh error: {err}"),
            Self::Io(err) => write!(f, "I/O error: {err}"),
        }
    }
}

impl std::error::Error for ServerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::BanStore(err) => Some(err),
            Self::Ssh(err) => Some(err),
            Self::Io(err) => Some(err),
            Self::Config(_) | Self::HostKey(_) | Self::Bind(_) => None,
        }
    }
}

impl From<BanStoreError> for ServerError {
    fn from(err: BanStoreError) -> Self {
        Self::BanStore(err)
    }
}

impl From<ConfigError> for ServerError {
    fn from(err: ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

impl From<russh::Error> for ServerError {
    fn from(err: russh::Error) -> Self {
        Self::Ssh(err)
    }
}

impl From<std::io::Error> for ServerError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

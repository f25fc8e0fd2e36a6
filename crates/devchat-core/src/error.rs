//! Error types for the chat engine.
//!
//! Per-connection failures never cross into the dispatcher: they end as a
//! [`Rejection`] written to the client before it is closed, or as an ordinary
//! `Part` event. Only ban-list persistence and configuration produce errors a
//! caller has to handle.

use std::io;

use thiserror::Error;

/// Reasons a connection is turned away before a session exists.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// Identity is on the ban list
    #[error("you are banned")]
    Banned,

    /// Client presented no public credential to derive an identity from
    #[error("missing client credential")]
    MissingCredential,

    /// Requested display name is held by a live session
    #[error("name is already taken")]
    NameTaken(String),

    /// Requested display name cannot be used
    #[error("invalid name: {0}")]
    InvalidName(String),

    /// Server is shutting down and no longer admits sessions
    #[error("server is shutting down")]
    Closed,
}

impl Rejection {
    /// Message written to the client before the connection is closed.
    pub fn client_message(&self) -> String {
        match self {
            Self::Banned => "You are banned".to_string(),
            Self::NameTaken(_) | Self::InvalidName(_) => format!("Error setting name: {self}"),
            Self::MissingCredential | Self::Closed => format!("Connection refused: {self}"),
        }
    }
}

/// Errors from loading or persisting the ban list.
#[derive(Error, Debug)]
pub enum BanStoreError {
    /// Reading or writing the backing file failed
    #[error("ban list I/O error: {0}")]
    Io(#[from] io::Error),

    /// Backing file is not a JSON list of identities
    #[error("ban list format error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Invalid engine configuration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A setting is outside its allowed range
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

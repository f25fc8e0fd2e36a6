//! Server configuration file.
//!
//! An optional TOML file supplies every setting; anything it leaves out takes
//! the default. Command-line flags are applied on top by the binary.
//!
//! ```toml
//! port = 2222
//! bind = "0.0.0.0"
//! scrollback = 16
//! ban_filename = "bans.json"
//! key_filename = "id_ed25519"
//! ```

use std::{fs, path::Path, path::PathBuf, time::Duration};

use devchat_core::{ChatConfig, MAX_MESSAGE_LEN};
use serde::Deserialize;

use crate::error::ServerError;

/// Settings for the production server.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// TCP port to listen on
    pub port: u16,
    /// Host or address to bind
    pub bind: String,
    /// Number of events kept in the shared backlog
    pub scrollback: usize,
    /// JSON file holding banned identities
    pub ban_filename: PathBuf,
    /// OpenSSH private host key
    pub key_filename: PathBuf,
    /// Bound of each session's inbound event queue
    pub queue_capacity: usize,
    /// Milliseconds sessions get to drain after the shutdown notice
    pub shutdown_grace_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let chat = ChatConfig::default();
        Self {
            port: 2222,
            bind: "0.0.0.0".to_string(),
            scrollback: chat.scrollback,
            ban_filename: PathBuf::from("bans.json"),
            key_filename: PathBuf::from("id_ed25519"),
            queue_capacity: chat.queue_capacity,
            shutdown_grace_ms: chat.shutdown_grace.as_millis() as u64,
        }
    }
}

impl ServerConfig {
    /// Read settings from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ServerError> {
        let text = fs::read_to_string(path)
            .map_err(|e| ServerError::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::parse(&text).map_err(|e| match e {
            ServerError::Config(msg) => ServerError::Config(format!("{}: {msg}", path.display())),
            other => other,
        })
    }

    /// Parse settings from TOML text.
    pub fn parse(text: &str) -> Result<Self, ServerError> {
        toml::from_str(text).map_err(|e| ServerError::Config(e.message().to_string()))
    }

    /// Address for the listening socket.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    /// Engine settings derived from this file, validated.
    pub fn chat(&self) -> Result<ChatConfig, ServerError> {
        let chat = ChatConfig {
            scrollback: self.scrollback,
            max_message_len: MAX_MESSAGE_LEN,
            queue_capacity: self.queue_capacity,
            shutdown_grace: Duration::from_millis(self.shutdown_grace_ms),
        };
        chat.validate()?;
        Ok(chat)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config = ServerConfig::parse("").unwrap();
        assert_eq!(config, ServerConfig::default());
        assert_eq!(config.bind_address(), "0.0.0.0:2222");
        assert_eq!(config.ban_filename, PathBuf::from("bans.json"));
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let config = ServerConfig::parse("port = 4000\nscrollback = 50\n").unwrap();
        assert_eq!(config.port, 4000);
        assert_eq!(config.scrollback, 50);
        assert_eq!(config.key_filename, PathBuf::from("id_ed25519"));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = ServerConfig::parse("colour = \"blue\"\n").unwrap_err();
        assert!(matches!(err, ServerError::Config(_)));
    }

    #[test]
    fn chat_settings_are_validated() {
        let config = ServerConfig { scrollback: 0, ..Default::default() };
        assert!(matches!(config.chat(), Err(ServerError::Config(_))));

        let config = ServerConfig { shutdown_grace_ms: 25, ..Default::default() };
        let chat = config.chat().unwrap();
        assert_eq!(chat.shutdown_grace, Duration::from_millis(25));
        assert_eq!(chat.max_message_len, MAX_MESSAGE_LEN);
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("devchat.toml");
        fs::write(&path, "ban_filename = \"/var/lib/devchat/bans.json\"\n").unwrap();

        let config = ServerConfig::load(&path).unwrap();
        assert_eq!(config.ban_filename, PathBuf::from("/var/lib/devchat/bans.json"));
    }

    #[test]
    fn load_names_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.toml");

        let err = ServerConfig::load(&path).unwrap_err();
        assert!(err.to_string().contains("missing.toml"));
    }
}

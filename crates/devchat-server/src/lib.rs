//! Devchat production server.
//!
//! Wraps [`devchat_core`]'s engine with real I/O: an SSH listener built on
//! russh, a JSON ban list on disk, the system clock, and a TOML configuration
//! file.
//!
//! # Components
//!
//! - [`ServerConfig`]: settings loaded from file and command line
//! - [`SshListener`]: SSH transport implementing the engine's listener
//! - [`Signals`]: termination signal handling for the binary
//! - [`start`]: assemble and start a server from a configuration

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
mod error;
pub mod signals;
pub mod ssh;

use std::net::SocketAddr;

pub use config::ServerConfig;
use devchat_core::{ChatServer, JsonBanStore, ServerHandle, SystemEnv};
pub use error::ServerError;
pub use signals::Signals;
pub use ssh::SshListener;

/// A started production server.
pub struct Running {
    /// Engine handle, used to shut down
    pub handle: ServerHandle,
    /// Address the SSH listener is bound to
    pub local_addr: SocketAddr,
}

/// Load the ban list and host key, bind, and start serving.
///
/// Must be called inside a tokio runtime.
pub async fn start(config: &ServerConfig) -> Result<Running, ServerError> {
    let chat = config.chat()?;
    let bans = JsonBanStore::load(&config.ban_filename)?;
    let listener =
        SshListener::bind(&config.bind_address(), &config.key_filename, chat.max_message_len)
            .await?;
    let local_addr = listener.local_addr()?;

    let handle = ChatServer::new(listener, bans, SystemEnv::new(), chat)?.start();
    Ok(Running { handle, local_addr })
}

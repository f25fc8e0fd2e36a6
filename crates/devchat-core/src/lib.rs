//! Devchat session and event engine.
//!
//! Many clients share one conversation over a remote terminal. This crate is
//! the part of the server where ordering and partial failure matter: the
//! single serialized event loop, the per-client session tasks, and the event
//! taxonomy that flows between them. Transport, ban-list storage and time are
//! reached through traits so the engine runs the same over SSH in production
//! and over in-memory channels in tests.
//!
//! # Architecture
//!
//! ```text
//! client input -> SessionLoop (reader) -> Dispatcher -> session inboxes
//!                                            |               |
//!                                      shared backlog   SessionLoop (renderer)
//!                                       + audit log     -> client output
//! ```
//!
//! # Components
//!
//! - [`Event`]: closed set of everything that can happen in the room
//! - [`Session`]: one connected client (identity, name, inbox, local view)
//! - [`Roster`]: live sessions and claimed display names
//! - [`Dispatcher`]: sole mutator of shared state, routes events to inboxes
//! - [`ChatServer`]: accepts connections, supervises sessions, shuts down
//! - [`BanStore`]: membership and persistence of banned identities
//! - [`Environment`]: wall-clock time and delays

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod backlog;
pub mod bans;
pub mod command;
pub mod config;
mod dispatcher;
pub mod env;
mod error;
pub mod event;
pub mod fault;
pub mod render;
mod roster;
mod server;
mod session;
mod session_loop;
pub mod transport;

pub use backlog::Backlog;
pub use bans::{BanStore, JsonBanStore, MemoryBanStore};
pub use config::{ChatConfig, MAX_MESSAGE_LEN};
pub use command::Command;
pub use dispatcher::{
    CHAT_LOG_TARGET, Dispatcher, OVERFLOW_REASON, SELF_WHISPER, UNKNOWN_RECIPIENT,
};
pub use env::{Environment, SystemEnv};
pub use error::{BanStoreError, ConfigError, Rejection};
pub use event::{Event, EventKind, StampedEvent, SYSTEM_USERNAME};
pub use fault::Fault;
pub use render::{Frame, strip_ansi};
pub use roster::{MAX_NAME_LEN, Roster};
pub use server::{ACCEPT_RETRY_DELAY, ChatServer, EVENT_QUEUE_CAPACITY, ServerHandle};
pub use session::{Identity, Inbox, Session, SessionId, View};
pub use session_loop::QUIT_REASON;
pub use transport::{Closer, Connection, LineReader, Listener, Terminal, WindowSize};

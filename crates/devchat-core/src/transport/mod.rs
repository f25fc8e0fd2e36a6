//! Transport abstraction consumed by the engine.
//!
//! The engine never speaks a wire protocol. A [`Listener`] hands it accepted
//! [`Connection`]s, each made of a line-oriented [`LineReader`], a
//! [`Terminal`] to draw on, a stream of window-size changes and a
//! fire-and-forget [`Closer`]. Production implements these over SSH; tests use
//! [`memory`].

pub mod memory;

use std::{fmt, future::Future, io, sync::Arc};

use tokio::sync::mpsc;

/// Terminal geometry in character cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSize {
    /// Columns
    pub width: u16,
    /// Rows
    pub height: u16,
}

impl WindowSize {
    /// Geometry with the given columns and rows.
    pub fn new(width: u16, height: u16) -> Self {
        Self { width, height }
    }
}

impl Default for WindowSize {
    fn default() -> Self {
        Self { width: 80, height: 24 }
    }
}

/// Line-oriented input from one client.
pub trait LineReader: Send + 'static {
    /// Next complete input line without its terminator.
    ///
    /// `Ok(None)` is end of stream (client quit); `Err` is a transport
    /// failure. Both end the session.
    fn read_line(&mut self) -> impl Future<Output = io::Result<Option<String>>> + Send;
}

/// Output side of one client's terminal.
pub trait Terminal: Send + 'static {
    /// Write raw bytes (escape sequences included) to the client.
    fn write(&mut self, bytes: &[u8]) -> impl Future<Output = io::Result<()>> + Send;

    /// Set the prompt shown in front of the client's pending input.
    ///
    /// Takes effect on the next write.
    fn set_prompt(&mut self, prompt: &str);
}

/// Closes a client's transport.
///
/// Must be idempotent and must not block: the dispatcher calls it while
/// routing events.
pub trait Closer: Send + Sync + 'static {
    /// Begin closing the transport.
    fn close(&self);
}

/// An accepted client connection.
pub struct Connection<R, T> {
    /// Raw public credential presented at authentication, if any
    pub credential: Option<Vec<u8>>,
    /// Remote host, port stripped
    pub remote_addr: String,
    /// Display name the client asked for
    pub requested_name: String,
    /// Input lines
    pub reader: R,
    /// Output terminal
    pub terminal: T,
    /// Geometry at connect time
    pub window: WindowSize,
    /// Geometry changes after connect
    pub resizes: mpsc::UnboundedReceiver<WindowSize>,
    /// Closes the transport
    pub closer: Arc<dyn Closer>,
}

impl<R, T> fmt::Debug for Connection<R, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("remote_addr", &self.remote_addr)
            .field("requested_name", &self.requested_name)
            .field("window", &self.window)
            .finish_non_exhaustive()
    }
}

/// Source of accepted connections.
///
/// Dropping the listener stops accepting.
pub trait Listener: Send + 'static {
    /// Line reader of accepted connections.
    type Reader: LineReader;
    /// Terminal of accepted connections.
    type Terminal: Terminal;

    /// Wait for the next connection. `Ok(None)` means the listener is closed.
    fn accept(
        &mut self,
    ) -> impl Future<Output = io::Result<Option<Connection<Self::Reader, Self::Terminal>>>> + Send;
}

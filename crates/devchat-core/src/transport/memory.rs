//! In-memory transport for tests and simulation.
//!
//! Connections flow from a [`MemoryConnector`] to a [`MemoryListener`] over a
//! channel. Each connection gives the test a [`MemoryClient`] to type lines,
//! resize the window, hang up, and inspect what the server drew.
#![allow(clippy::disallowed_types, reason = "Synchronous in-memory operations only")]

use std::{
    io,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use tokio::sync::{mpsc, watch};

use super::{Closer, Connection, LineReader, Listener, Terminal, WindowSize};
use crate::render::strip_ansi;

/// Create a connected listener/connector pair.
pub fn listener() -> (MemoryListener, MemoryConnector) {
    let (tx, rx) = mpsc::unbounded_channel();
    (MemoryListener { incoming: rx }, MemoryConnector { incoming: tx })
}

type MemoryConnection = Connection<MemoryReader, MemoryTerminal>;

/// Accepting side of the in-memory transport.
#[derive(Debug)]
pub struct MemoryListener {
    incoming: mpsc::UnboundedReceiver<MemoryConnection>,
}

impl Listener for MemoryListener {
    type Reader = MemoryReader;
    type Terminal = MemoryTerminal;

    async fn accept(&mut self) -> io::Result<Option<MemoryConnection>> {
        Ok(self.incoming.recv().await)
    }
}

/// Connecting side of the in-memory transport.
///
/// The listener reports closed once every connector is dropped.
#[derive(Debug, Clone)]
pub struct MemoryConnector {
    incoming: mpsc::UnboundedSender<MemoryConnection>,
}

impl MemoryConnector {
    /// Connect with a display name and a public credential.
    pub fn connect(&self, name: &str, credential: &[u8]) -> io::Result<MemoryClient> {
        self.connect_with(name, Some(credential.to_vec()), WindowSize::default())
    }

    /// Connect with full control over credential and window size.
    pub fn connect_with(
        &self,
        name: &str,
        credential: Option<Vec<u8>>,
        window: WindowSize,
    ) -> io::Result<MemoryClient> {
        let (line_tx, line_rx) = mpsc::unbounded_channel();
        let (resize_tx, resize_rx) = mpsc::unbounded_channel();
        let (closed_tx, closed_rx) = watch::channel(false);
        let (version, _) = watch::channel(0);
        let output = Arc::new(Output { state: Mutex::default(), version });

        let connection = Connection {
            credential,
            remote_addr: "127.0.0.1".to_string(),
            requested_name: name.to_string(),
            reader: MemoryReader { lines: line_rx, closed: closed_rx.clone() },
            terminal: MemoryTerminal { output: Arc::clone(&output) },
            window,
            resizes: resize_rx,
            closer: Arc::new(MemoryCloser { closed: closed_tx }),
        };

        self.incoming
            .send(connection)
            .map_err(|_| io::Error::new(io::ErrorKind::ConnectionRefused, "listener closed"))?;

        Ok(MemoryClient { lines: Some(line_tx), resizes: resize_tx, output, closed: closed_rx })
    }
}

#[derive(Debug, Default)]
struct OutputState {
    writes: Vec<Vec<u8>>,
    prompt: String,
    fail_writes: bool,
}

#[derive(Debug)]
struct Output {
    state: Mutex<OutputState>,
    /// Bumped after every write so clients can wait for new output
    version: watch::Sender<u64>,
}

impl Output {
    fn lock(&self) -> MutexGuard<'_, OutputState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Server-side reader fed by [`MemoryClient::send_line`].
#[derive(Debug)]
pub struct MemoryReader {
    lines: mpsc::UnboundedReceiver<io::Result<String>>,
    closed: watch::Receiver<bool>,
}

impl LineReader for MemoryReader {
    async fn read_line(&mut self) -> io::Result<Option<String>> {
        tokio::select! {
            line = self.lines.recv() => line.transpose(),
            () = wait_closed(&mut self.closed) => Ok(None),
        }
    }
}

/// Server-side terminal recording everything written to it.
#[derive(Debug)]
pub struct MemoryTerminal {
    output: Arc<Output>,
}

impl Terminal for MemoryTerminal {
    async fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        {
            let mut state = self.output.lock();
            if state.fail_writes {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "terminal write failed"));
            }
            state.writes.push(bytes.to_vec());
        }
        self.output.version.send_modify(|v| *v += 1);
        Ok(())
    }

    fn set_prompt(&mut self, prompt: &str) {
        self.output.lock().prompt = prompt.to_string();
    }
}

#[derive(Debug)]
struct MemoryCloser {
    closed: watch::Sender<bool>,
}

impl Closer for MemoryCloser {
    fn close(&self) {
        self.closed.send_replace(true);
    }
}

async fn wait_closed(closed: &mut watch::Receiver<bool>) {
    loop {
        let is_closed = *closed.borrow_and_update();
        if is_closed || closed.changed().await.is_err() {
            return;
        }
    }
}

/// Test-side handle of one in-memory connection.
#[derive(Debug)]
pub struct MemoryClient {
    lines: Option<mpsc::UnboundedSender<io::Result<String>>>,
    resizes: mpsc::UnboundedSender<WindowSize>,
    output: Arc<Output>,
    closed: watch::Receiver<bool>,
}

impl MemoryClient {
    /// Type a line and press enter.
    pub fn send_line(&self, line: impl Into<String>) {
        if let Some(lines) = &self.lines {
            let _ = lines.send(Ok(line.into()));
        }
    }

    /// Make the server's next read fail with `message`.
    pub fn send_error(&self, message: &str) {
        if let Some(lines) = &self.lines {
            let _ = lines.send(Err(io::Error::other(message.to_string())));
        }
    }

    /// End the input stream, as a client quitting does.
    pub fn hang_up(&mut self) {
        self.lines = None;
    }

    /// Report a new window size.
    pub fn resize(&self, width: u16, height: u16) {
        let _ = self.resizes.send(WindowSize::new(width, height));
    }

    /// Make every further server write fail.
    pub fn fail_writes(&self) {
        self.output.lock().fail_writes = true;
    }

    /// Most recent write with escape sequences removed.
    pub fn screen(&self) -> String {
        strip_ansi(&String::from_utf8_lossy(&self.raw_screen()))
    }

    /// Most recent write as raw bytes.
    pub fn raw_screen(&self) -> Vec<u8> {
        self.output.lock().writes.last().cloned().unwrap_or_default()
    }

    /// Number of writes the server has made.
    pub fn write_count(&self) -> usize {
        self.output.lock().writes.len()
    }

    /// Current prompt.
    pub fn prompt(&self) -> String {
        self.output.lock().prompt.clone()
    }

    /// Whether the server closed this connection.
    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Wait until the server closes this connection.
    pub async fn wait_closed(&mut self) {
        wait_closed(&mut self.closed).await;
    }

    /// Wait until the most recent screen satisfies `pred` and return it.
    pub async fn wait_for_screen(&self, pred: impl Fn(&str) -> bool) -> String {
        let mut version = self.output.version.subscribe();
        loop {
            let screen = self.screen();
            if pred(&screen) {
                return screen;
            }
            if version.changed().await.is_err() {
                return screen;
            }
        }
    }
}

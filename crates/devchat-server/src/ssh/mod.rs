//! SSH transport using russh.
//!
//! [`SshListener`] owns the TCP socket and drives one russh server session
//! per client. A client becomes a [`Connection`] once it has opened a session
//! channel and asked for a shell. Keystrokes go through a [`LineEditor`]
//! shared between the input side, which echoes and completes lines, and the
//! [`SshTerminal`], which redraws the prompt and pending input after every
//! frame.
//!
//! Any public key is accepted and becomes the client's credential. A client
//! with no key may still log in with a password; it is admitted without a
//! credential and the engine turns it away with a message.

#![allow(clippy::disallowed_types, reason = "Editor and input slot are locked synchronously only")]

mod line_editor;

use std::{
    fmt, io,
    net::SocketAddr,
    path::Path,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use devchat_core::{Closer, Connection, LineReader, Listener, Terminal, WindowSize};
pub use line_editor::{Feed, LineEditor};
use russh::{
    Channel, ChannelId, CryptoVec, Pty,
    keys::PublicKey,
    server::{self, Auth, Handle, Msg, Session},
};
use tokio::{net::TcpListener, sync::mpsc};
use tracing::{debug, info, warn};

use crate::error::ServerError;

type SshConnection = Connection<SshReader, SshTerminal>;

/// Input side of a running shell, shared with the task driving the session
/// so a transport failure can be delivered as a read error.
type InputSlot = Arc<Mutex<Option<mpsc::Sender<io::Result<String>>>>>;

/// Clients idle this long are disconnected by the SSH layer.
const INACTIVITY_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// Completed lines buffered per client before the SSH layer stops reading.
const LINE_QUEUE_CAPACITY: usize = 32;

/// Accepts SSH clients and hands them to the engine.
pub struct SshListener {
    tcp: TcpListener,
    config: Arc<server::Config>,
    ready_tx: mpsc::UnboundedSender<SshConnection>,
    ready_rx: mpsc::UnboundedReceiver<SshConnection>,
    max_line_len: usize,
}

impl SshListener {
    /// Bind the listening socket with the host key at `key_path`.
    pub async fn bind(
        address: &str,
        key_path: &Path,
        max_line_len: usize,
    ) -> Result<Self, ServerError> {
        let host_key = russh::keys::load_secret_key(key_path, None)
            .map_err(|e| ServerError::HostKey(format!("{}: {e}", key_path.display())))?;

        let config = server::Config {
            inactivity_timeout: Some(INACTIVITY_TIMEOUT),
            auth_rejection_time: Duration::from_secs(1),
            auth_rejection_time_initial: Some(Duration::ZERO),
            keys: vec![host_key],
            ..Default::default()
        };

        let tcp = TcpListener::bind(address)
            .await
            .map_err(|e| ServerError::Bind(format!("{address}: {e}")))?;
        let (ready_tx, ready_rx) = mpsc::unbounded_channel();

        info!(addr = %tcp.local_addr()?, "listening");
        Ok(Self { tcp, config: Arc::new(config), ready_tx, ready_rx, max_line_len })
    }

    /// Local address the listener is bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.tcp.local_addr()
    }

    fn spawn_session(&self, socket: tokio::net::TcpStream, peer: SocketAddr) {
        let handler = SshHandler::new(peer, self.ready_tx.clone(), self.max_line_len);
        let input = Arc::clone(&handler.input);
        let config = Arc::clone(&self.config);
        tokio::spawn(async move {
            let session = match server::run_stream(config, socket, handler).await {
                Ok(session) => session,
                Err(e) => {
                    debug!(addr = %peer, error = %e, "ssh handshake failed");
                    fail_input(&input, e).await;
                    return;
                },
            };
            if let Err(e) = session.await {
                debug!(addr = %peer, error = %e, "ssh session ended with error");
                fail_input(&input, e).await;
            }
        });
    }
}

impl Listener for SshListener {
    type Reader = SshReader;
    type Terminal = SshTerminal;

    async fn accept(&mut self) -> io::Result<Option<SshConnection>> {
        loop {
            tokio::select! {
                ready = self.ready_rx.recv() => return Ok(ready),
                accepted = self.tcp.accept() => {
                    let (socket, peer) = accepted?;
                    debug!(addr = %peer, "tcp connection");
                    self.spawn_session(socket, peer);
                },
            }
        }
    }
}

/// Hand a transport failure to the client's reader, if its shell is still
/// running, and end its input.
async fn fail_input(input: &InputSlot, error: impl fmt::Display) {
    let lines = input.lock().unwrap_or_else(PoisonError::into_inner).take();
    if let Some(lines) = lines {
        // Reader is gone once the session has ended.
        let _ = lines.send(Err(io::Error::other(error.to_string()))).await;
    }
}

/// Completed input lines from one client.
#[derive(Debug)]
pub struct SshReader {
    lines: mpsc::Receiver<io::Result<String>>,
}

impl LineReader for SshReader {
    async fn read_line(&mut self) -> io::Result<Option<String>> {
        self.lines.recv().await.transpose()
    }
}

/// Output channel of one client.
pub struct SshTerminal {
    handle: Handle,
    channel: ChannelId,
    editor: Arc<Mutex<LineEditor>>,
}

impl Terminal for SshTerminal {
    async fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        let mut out = bytes.to_vec();
        out.extend_from_slice(&self.editor.lock().unwrap_or_else(PoisonError::into_inner).line());

        self.handle
            .data(self.channel, CryptoVec::from(out))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "ssh channel closed"))
    }

    fn set_prompt(&mut self, prompt: &str) {
        self.editor.lock().unwrap_or_else(PoisonError::into_inner).set_prompt(prompt);
    }
}

/// Closes one client's channel.
struct SshCloser {
    handle: Handle,
    channel: ChannelId,
    closed: AtomicBool,
}

impl Closer for SshCloser {
    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let handle = self.handle.clone();
        let channel = self.channel;
        tokio::spawn(async move {
            if handle.close(channel).await.is_err() {
                debug!(?channel, "channel already gone");
            }
        });
    }
}

/// Per-connection russh callbacks.
struct SshHandler {
    peer: SocketAddr,
    user: String,
    credential: Option<Vec<u8>>,
    window: WindowSize,
    editor: Arc<Mutex<LineEditor>>,
    ready: mpsc::UnboundedSender<SshConnection>,
    /// Set once the shell is running, cleared when input ends
    input: InputSlot,
    resizes: Option<mpsc::UnboundedSender<WindowSize>>,
    channel: Option<ChannelId>,
    shell_started: bool,
}

impl SshHandler {
    fn new(
        peer: SocketAddr,
        ready: mpsc::UnboundedSender<SshConnection>,
        max_line_len: usize,
    ) -> Self {
        Self {
            peer,
            user: String::new(),
            credential: None,
            window: WindowSize::default(),
            editor: Arc::new(Mutex::new(LineEditor::new(max_line_len))),
            ready,
            input: Arc::new(Mutex::new(None)),
            resizes: None,
            channel: None,
            shell_started: false,
        }
    }

    fn lines(&self) -> Option<mpsc::Sender<io::Result<String>>> {
        self.input.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// End the client's input stream.
    fn hang_up(&mut self) {
        self.input.lock().unwrap_or_else(PoisonError::into_inner).take();
        self.resizes = None;
    }
}

fn window(col_width: u32, row_height: u32) -> WindowSize {
    let clamp = |n: u32| u16::try_from(n).unwrap_or(u16::MAX);
    WindowSize::new(clamp(col_width), clamp(row_height))
}

impl server::Handler for SshHandler {
    type Error = ServerError;

    async fn auth_publickey(&mut self, user: &str, key: &PublicKey) -> Result<Auth, Self::Error> {
        match key.to_bytes() {
            Ok(bytes) => {
                user.clone_into(&mut self.user);
                self.credential = Some(bytes);
                Ok(Auth::Accept)
            },
            Err(e) => {
                warn!(addr = %self.peer, error = %e, "unreadable public key");
                Ok(Auth::Reject { proceed_with_methods: None, partial_success: false })
            },
        }
    }

    async fn auth_password(&mut self, user: &str, _password: &str) -> Result<Auth, Self::Error> {
        user.clone_into(&mut self.user);
        self.credential = None;
        Ok(Auth::Accept)
    }

    async fn channel_open_session(
        &mut self,
        channel: Channel<Msg>,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        // One shell per connection.
        if self.channel.is_some() {
            return Ok(false);
        }
        self.channel = Some(channel.id());
        Ok(true)
    }

    async fn pty_request(
        &mut self,
        _channel: ChannelId,
        _term: &str,
        col_width: u32,
        row_height: u32,
        _pix_width: u32,
        _pix_height: u32,
        _modes: &[(Pty, u32)],
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.window = window(col_width, row_height);
        Ok(())
    }

    async fn shell_request(
        &mut self,
        channel: ChannelId,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        if self.channel != Some(channel) || self.shell_started {
            return Ok(());
        }
        self.shell_started = true;

        let handle = session.handle();
        let (lines_tx, lines_rx) = mpsc::channel(LINE_QUEUE_CAPACITY);
        let (resize_tx, resize_rx) = mpsc::unbounded_channel();

        let connection = Connection {
            credential: self.credential.clone(),
            remote_addr: self.peer.ip().to_string(),
            requested_name: self.user.clone(),
            reader: SshReader { lines: lines_rx },
            terminal: SshTerminal {
                handle: handle.clone(),
                channel,
                editor: Arc::clone(&self.editor),
            },
            window: self.window,
            resizes: resize_rx,
            closer: Arc::new(SshCloser { handle, channel, closed: AtomicBool::new(false) }),
        };

        if self.ready.send(connection).is_err() {
            debug!(addr = %self.peer, "listener gone, dropping shell");
            return Ok(());
        }
        *self.input.lock().unwrap_or_else(PoisonError::into_inner) = Some(lines_tx);
        self.resizes = Some(resize_tx);
        Ok(())
    }

    async fn data(
        &mut self,
        channel: ChannelId,
        data: &[u8],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        let Some(lines) = self.lines() else {
            return Ok(());
        };

        let Feed { echo, lines: completed, eof } =
            self.editor.lock().unwrap_or_else(PoisonError::into_inner).feed(data);

        if !echo.is_empty() {
            session.data(channel, CryptoVec::from(echo))?;
        }
        // Waiting for room here stops reading from the socket until the
        // session catches up.
        for line in completed {
            if lines.send(Ok(line)).await.is_err() {
                break;
            }
        }
        if eof {
            self.hang_up();
        }
        Ok(())
    }

    async fn window_change_request(
        &mut self,
        _channel: ChannelId,
        col_width: u32,
        row_height: u32,
        _pix_width: u32,
        _pix_height: u32,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.window = window(col_width, row_height);
        if let Some(resizes) = &self.resizes {
            // Receiver is gone once the session has ended.
            let _ = resizes.send(self.window);
        }
        Ok(())
    }

    async fn channel_eof(
        &mut self,
        _channel: ChannelId,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.hang_up();
        Ok(())
    }

    async fn channel_close(
        &mut self,
        _channel: ChannelId,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.hang_up();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_clamps_oversized_geometry() {
        assert_eq!(window(120, 40), WindowSize::new(120, 40));
        assert_eq!(window(u32::MAX, 70_000), WindowSize::new(u16::MAX, u16::MAX));
    }

    #[tokio::test]
    async fn transport_failure_reaches_reader_as_error() {
        let (lines_tx, lines_rx) = mpsc::channel(LINE_QUEUE_CAPACITY);
        let input: InputSlot = Arc::new(Mutex::new(Some(lines_tx)));
        let mut reader = SshReader { lines: lines_rx };

        let sender = input.lock().unwrap().clone().unwrap();
        sender.send(Ok("hello".to_string())).await.unwrap();
        drop(sender);
        fail_input(&input, "connection reset by peer").await;

        assert_eq!(reader.read_line().await.unwrap(), Some("hello".to_string()));
        let err = reader.read_line().await.unwrap_err();
        assert!(err.to_string().contains("connection reset"), "unexpected error: {err}");
        assert!(input.lock().unwrap().is_none());
        assert_eq!(reader.read_line().await.unwrap(), None);
    }

    #[tokio::test]
    async fn ended_input_reads_as_quit() {
        let (lines_tx, lines_rx) = mpsc::channel(LINE_QUEUE_CAPACITY);
        let input: InputSlot = Arc::new(Mutex::new(Some(lines_tx)));
        let mut reader = SshReader { lines: lines_rx };

        input.lock().unwrap().take();
        fail_input(&input, "too late").await;

        assert_eq!(reader.read_line().await.unwrap(), None);
    }

    #[tokio::test]
    async fn full_line_queue_applies_backpressure() {
        let (lines_tx, _lines_rx) = mpsc::channel::<io::Result<String>>(LINE_QUEUE_CAPACITY);
        for n in 0..LINE_QUEUE_CAPACITY {
            lines_tx.send(Ok(n.to_string())).await.unwrap();
        }
        assert!(matches!(
            lines_tx.try_send(Ok("one more".to_string())),
            Err(mpsc::error::TrySendError::Full(_))
        ));
    }
}

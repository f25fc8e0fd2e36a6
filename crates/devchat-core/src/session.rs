//! Per-client session state.
//!
//! A [`Session`] is shared between three owners: its own session loop (reader,
//! renderer, resize watcher), the [`crate::Roster`], and any event that refers
//! to it. Only the session's own tasks touch its [`View`]; everybody else
//! interacts through the inbox sender and the close signal.

#![allow(clippy::disallowed_types, reason = "View is locked for synchronous updates only")]

use std::{
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use sha2::{Digest, Sha256};
use tokio::sync::{mpsc, watch};

use crate::{
    backlog::Backlog,
    event::StampedEvent,
    transport::{Closer, WindowSize},
};

/// Receiving end of a session's private event queue.
pub type Inbox = mpsc::Receiver<StampedEvent>;

/// Stable client identity: hex SHA-256 of the client's public credential.
///
/// Used for ban checks. Immutable for the lifetime of a session.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identity(String);

impl Identity {
    /// Derive an identity from the raw bytes of a public credential.
    pub fn from_credential(credential: &[u8]) -> Self {
        Self(hex::encode(Sha256::digest(credential)))
    }

    /// Full hex identity.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First eight hex characters, for log lines.
    pub fn short(&self) -> &str {
        self.0.get(..8).unwrap_or(&self.0)
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Server-assigned handle distinguishing sessions in the roster.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Session-local state mutated only by the session's own tasks.
#[derive(Debug)]
pub struct View {
    backlog: Backlog,
    bell: bool,
    window: WindowSize,
}

impl View {
    fn new(scrollback: usize) -> Self {
        Self { backlog: Backlog::new(scrollback), bell: true, window: WindowSize::default() }
    }

    /// Events this session has been shown, oldest first.
    pub fn backlog(&self) -> &Backlog {
        &self.backlog
    }

    /// Whether audible bells in messages reach the terminal.
    pub fn bell(&self) -> bool {
        self.bell
    }

    /// Current terminal geometry.
    pub fn window(&self) -> WindowSize {
        self.window
    }

    pub(crate) fn push(&mut self, event: StampedEvent) {
        self.backlog.push(event);
    }

    pub(crate) fn clear(&mut self) {
        self.backlog.clear();
    }

    pub(crate) fn toggle_bell(&mut self) -> bool {
        self.bell = !self.bell;
        self.bell
    }

    pub(crate) fn resize(&mut self, window: WindowSize) {
        self.window = window;
    }
}

/// Outcome of handing an event to a session's inbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Delivery {
    /// Event is queued for the renderer
    Queued,
    /// Inbox is at capacity; the client is not keeping up
    Full,
    /// Renderer is gone; the session is tearing down
    Closed,
}

/// One connected client.
pub struct Session {
    id: SessionId,
    identity: Identity,
    name: String,
    addr: String,
    outbox: mpsc::Sender<StampedEvent>,
    closer: Arc<dyn Closer>,
    closed: watch::Sender<bool>,
    view: Mutex<View>,
}

impl Session {
    /// Create a session and the receiving end of its private queue.
    ///
    /// `name` must already be claimed in the roster. `scrollback` bounds the
    /// private backlog and `capacity` bounds the inbox.
    pub fn new(
        id: SessionId,
        identity: Identity,
        name: impl Into<String>,
        addr: impl Into<String>,
        closer: Arc<dyn Closer>,
        scrollback: usize,
        capacity: usize,
    ) -> (Arc<Self>, Inbox) {
        let (outbox, inbox) = mpsc::channel(capacity.max(1));
        let (closed, _) = watch::channel(false);
        let session = Arc::new(Self {
            id,
            identity,
            name: name.into(),
            addr: addr.into(),
            outbox,
            closer,
            closed,
            view: Mutex::new(View::new(scrollback)),
        });
        (session, inbox)
    }

    /// Roster handle.
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Identity derived from the client's credential.
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Display name, unique among live sessions.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Remote host the client connected from.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Whether the session has been closed.
    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Close the transport and signal the session's tasks to stop.
    ///
    /// Fire-and-forget and idempotent: never waits for the client.
    pub fn close(&self) {
        let was_closed = self.closed.send_replace(true);
        if !was_closed {
            self.closer.close();
        }
    }

    /// Resolves once [`Session::close`] has been called.
    pub async fn closed(&self) {
        let mut rx = self.closed.subscribe();
        loop {
            let closed = *rx.borrow_and_update();
            // Sender lives in `self`, so `changed` cannot fail while we wait.
            if closed || rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Copy of the events this session has been shown, oldest first.
    pub fn backlog_snapshot(&self) -> Vec<StampedEvent> {
        self.view().backlog().iter().cloned().collect()
    }

    /// Lock the session-local view.
    ///
    /// Critical sections are single field updates, so a poisoned lock still
    /// holds consistent data.
    pub fn view(&self) -> MutexGuard<'_, View> {
        self.view.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn deliver(&self, event: StampedEvent) -> Delivery {
        match self.outbox.try_send(event) {
            Ok(()) => Delivery::Queued,
            Err(mpsc::error::TrySendError::Full(_)) => Delivery::Full,
            Err(mpsc::error::TrySendError::Closed(_)) => Delivery::Closed,
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("identity", &self.identity.short())
            .field("addr", &self.addr)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

//! Event taxonomy.
//!
//! [`Event`] is the closed set of things that can happen in the room. Session
//! tasks produce unstamped events; the dispatcher is the only place that
//! turns them into [`StampedEvent`]s, so a received-at time is assigned
//! exactly once, at the single acceptance point.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::session::Session;

/// Sender label for events generated by the server itself.
pub const SYSTEM_USERNAME: &str = "SYSTEM";

/// Everything that can happen in the room.
#[derive(Debug, Clone)]
pub enum Event {
    /// A session entered the room
    Join {
        /// Session that joined
        user: Arc<Session>,
    },

    /// A session left the room
    Part {
        /// Session that left
        user: Arc<Session>,
        /// Why it left (`quit`, `error: ...`)
        reason: String,
    },

    /// Public chat line
    Chat {
        /// Display name of the author
        sender: String,
        /// Message body
        text: String,
    },

    /// Private message between two sessions
    Whisper {
        /// Session that sent the whisper
        sender: Arc<Session>,
        /// Display name of the intended recipient
        receiver: String,
        /// Message body
        text: String,
    },

    /// Private notice from the server to one session
    SystemWhisper {
        /// Session the notice is for
        receiver: Arc<Session>,
        /// Notice body
        text: String,
    },

    /// Public notice from the server
    System {
        /// Notice body
        text: String,
    },

    /// Server is shutting down
    Shutdown,

    /// Re-render one session without changing any state
    NoOp {
        /// Session to re-render
        user: Arc<Session>,
    },
}

/// Discriminant of [`Event`], used where only the variant matters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// [`Event::Join`]
    Join,
    /// [`Event::Part`]
    Part,
    /// [`Event::Chat`]
    Chat,
    /// [`Event::Whisper`]
    Whisper,
    /// [`Event::SystemWhisper`]
    SystemWhisper,
    /// [`Event::System`]
    System,
    /// [`Event::Shutdown`]
    Shutdown,
    /// [`Event::NoOp`]
    NoOp,
}

impl EventKind {
    /// Every variant, in declaration order.
    pub const ALL: [Self; 8] = [
        Self::Join,
        Self::Part,
        Self::Chat,
        Self::Whisper,
        Self::SystemWhisper,
        Self::System,
        Self::Shutdown,
        Self::NoOp,
    ];

    /// Whether events of this kind go to the shared backlog and audit log.
    ///
    /// Whispers are private and no-ops carry nothing worth recording.
    pub fn is_loggable(self) -> bool {
        match self {
            Self::Join | Self::Part | Self::Chat | Self::System | Self::Shutdown => true,
            Self::Whisper | Self::SystemWhisper | Self::NoOp => false,
        }
    }
}

impl Event {
    /// Variant of this event.
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Join { .. } => EventKind::Join,
            Self::Part { .. } => EventKind::Part,
            Self::Chat { .. } => EventKind::Chat,
            Self::Whisper { .. } => EventKind::Whisper,
            Self::SystemWhisper { .. } => EventKind::SystemWhisper,
            Self::System { .. } => EventKind::System,
            Self::Shutdown => EventKind::Shutdown,
            Self::NoOp { .. } => EventKind::NoOp,
        }
    }

    /// Logical sender label.
    pub fn sender(&self) -> &str {
        match self {
            Self::Chat { sender, .. } => sender,
            Self::Whisper { sender, .. } => sender.name(),
            Self::Join { .. }
            | Self::Part { .. }
            | Self::SystemWhisper { .. }
            | Self::System { .. }
            | Self::Shutdown => SYSTEM_USERNAME,
            Self::NoOp { .. } => "",
        }
    }

    /// Renderable message text.
    pub fn message(&self) -> String {
        match self {
            Self::Join { user } => format!("{} has joined", user.name()),
            Self::Part { user, reason } if reason.is_empty() => {
                format!("{} has left", user.name())
            },
            Self::Part { user, reason } => format!("{} has left ({reason})", user.name()),
            Self::Chat { text, .. }
            | Self::Whisper { text, .. }
            | Self::SystemWhisper { text, .. }
            | Self::System { text } => text.clone(),
            Self::Shutdown => "Server is shutting down".to_string(),
            Self::NoOp { .. } => String::new(),
        }
    }

    /// Whether this event goes to the shared backlog and audit log.
    pub fn should_log(&self) -> bool {
        self.kind().is_loggable()
    }

    /// Attach the time the dispatcher accepted this event.
    pub(crate) fn stamp(self, received_at: DateTime<Utc>) -> StampedEvent {
        StampedEvent { event: self, received_at }
    }
}

/// An event accepted by the dispatcher, with its received-at time.
#[derive(Debug, Clone)]
pub struct StampedEvent {
    event: Event,
    received_at: DateTime<Utc>,
}

impl StampedEvent {
    /// The accepted event.
    pub fn event(&self) -> &Event {
        &self.event
    }

    /// When the dispatcher accepted the event.
    pub fn received_at(&self) -> DateTime<Utc> {
        self.received_at
    }

    /// Logical sender label.
    pub fn sender(&self) -> &str {
        self.event.sender()
    }

    /// Renderable message text.
    pub fn message(&self) -> String {
        self.event.message()
    }

    /// Variant of the accepted event.
    pub fn kind(&self) -> EventKind {
        self.event.kind()
    }
}

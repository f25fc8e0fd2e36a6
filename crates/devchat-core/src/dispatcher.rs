//! The serialized event loop.
//!
//! The dispatcher consumes one global queue and is the only writer of the
//! roster membership and the shared backlog. Because it handles one event at
//! a time, every session observes loggable events in the same order, and
//! that order matches the received-at timestamps it assigns.
//!
//! Delivery into session inboxes never blocks. A session whose inbox is full
//! is evicted with an error-equivalent Part, handled in the same call before
//! the next queued event.

use std::{collections::VecDeque, ops::ControlFlow, sync::Arc};

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::{
    backlog::Backlog,
    bans::BanStore,
    config::ChatConfig,
    env::Environment,
    event::{Event, StampedEvent},
    render::strip_ansi,
    roster::Roster,
    session::{Delivery, Session, SessionId},
};

/// Tracing target of the chat audit log.
pub const CHAT_LOG_TARGET: &str = "devchat::chat";

/// Part reason for a session evicted because its inbox filled up.
pub const OVERFLOW_REASON: &str = "error: event queue overflow";

/// Reply to a whisper addressed to its own sender.
pub const SELF_WHISPER: &str = "you cannot message yourself";

/// Reply to a whisper addressed to nobody in the room.
pub const UNKNOWN_RECIPIENT: &str = "user does not exist";

/// Sole mutator of shared chat state.
pub struct Dispatcher<E, B>
where
    E: Environment,
    B: BanStore,
{
    env: E,
    config: ChatConfig,
    roster: Arc<Roster>,
    bans: B,
    /// Accepted loggable events, capped at `scrollback`
    backlog: Backlog,
    /// Last handed-out timestamp, for clamping
    last_stamp: Option<DateTime<Utc>>,
    accepting: watch::Sender<bool>,
}

impl<E, B> Dispatcher<E, B>
where
    E: Environment,
    B: BanStore,
{
    /// Create a dispatcher over a shared roster.
    pub fn new(env: E, config: ChatConfig, roster: Arc<Roster>, bans: B) -> Self {
        let backlog = Backlog::new(config.scrollback);
        let (accepting, _) = watch::channel(true);
        Self { env, config, roster, bans, backlog, last_stamp: None, accepting }
    }

    /// Shared backlog of accepted loggable events.
    pub fn backlog(&self) -> &Backlog {
        &self.backlog
    }

    /// Roster this dispatcher routes to.
    pub fn roster(&self) -> &Arc<Roster> {
        &self.roster
    }

    /// Watch that flips to `false` once shutdown has begun.
    pub fn accepting(&self) -> watch::Receiver<bool> {
        self.accepting.subscribe()
    }

    /// Consume events until a `Shutdown` completes or every sender is gone.
    pub async fn run(mut self, mut events: mpsc::Receiver<Event>) {
        while let Some(event) = events.recv().await {
            if self.handle(event).await.is_break() {
                info!("event loop finished");
                return;
            }
        }
        debug!("event queue closed");
    }

    /// Handle one event and any evictions it causes.
    ///
    /// Returns `Break` once a `Shutdown` has been fully processed.
    pub async fn handle(&mut self, event: Event) -> ControlFlow<()> {
        let mut pending = VecDeque::from([event]);
        let mut evicting: Vec<SessionId> = Vec::new();

        while let Some(event) = pending.pop_front() {
            let overflowed = match event {
                Event::Shutdown => {
                    self.handle_shutdown().await;
                    return ControlFlow::Break(());
                },
                event => self.route(event),
            };

            for session in overflowed {
                if evicting.contains(&session.id()) {
                    continue;
                }
                warn!(session = %session.id(), name = %session.name(), "event queue overflow");
                evicting.push(session.id());
                pending.push_back(Event::Part { user: session, reason: OVERFLOW_REASON.to_string() });
            }
        }
        ControlFlow::Continue(())
    }

    /// Route a non-shutdown event. Returns sessions whose inbox was full.
    fn route(&mut self, event: Event) -> Vec<Arc<Session>> {
        match event {
            Event::Join { user } => self.handle_join(user),
            Event::Part { user, reason } => self.handle_part(user, reason),
            Event::Whisper { sender, receiver, text } => {
                self.handle_whisper(sender, receiver, text)
            },
            Event::SystemWhisper { receiver, text } => {
                let stamped = self.stamp(Event::SystemWhisper { receiver: receiver.clone(), text });
                deliver_to(&receiver, stamped).into_iter().collect()
            },
            Event::NoOp { user } => {
                let stamped = self.stamp(Event::NoOp { user: user.clone() });
                deliver_to(&user, stamped).into_iter().collect()
            },
            event @ (Event::Chat { .. } | Event::System { .. }) => {
                let stamped = self.stamp(event);
                self.record(&stamped);
                self.broadcast(&stamped)
            },
            // Intercepted by `handle`.
            Event::Shutdown => Vec::new(),
        }
    }

    fn handle_join(&mut self, user: Arc<Session>) -> Vec<Arc<Session>> {
        if !self.roster.insert(Arc::clone(&user)) {
            debug!(session = %user.id(), name = %user.name(), "dropping join for closed session");
            self.roster.release(user.name());
            return Vec::new();
        }
        info!(session = %user.id(), name = %user.name(), "joined");

        let mut overflowed = Vec::new();
        for past in self.backlog.iter() {
            if let Some(session) = deliver_to(&user, past.clone()) {
                overflowed.push(session);
                break;
            }
        }

        let stamped = self.stamp(Event::Join { user });
        self.record(&stamped);
        overflowed.extend(self.broadcast(&stamped));
        overflowed
    }

    fn handle_part(&mut self, user: Arc<Session>, reason: String) -> Vec<Arc<Session>> {
        if self.roster.remove_quietly(&user).is_none() {
            debug!(session = %user.id(), name = %user.name(), %reason, "dropping part for non-member");
            return Vec::new();
        }
        info!(session = %user.id(), name = %user.name(), %reason, "left");

        let stamped = self.stamp(Event::Part { user, reason });
        self.record(&stamped);
        self.broadcast(&stamped)
    }

    fn handle_whisper(
        &mut self,
        sender: Arc<Session>,
        receiver: String,
        text: String,
    ) -> Vec<Arc<Session>> {
        if receiver == sender.name() {
            return self.notify(sender, SELF_WHISPER);
        }

        let Some(target) = self.roster.find_by_name(&receiver) else {
            return self.notify(sender, UNKNOWN_RECIPIENT);
        };

        let stamped = self.stamp(Event::Whisper { sender: Arc::clone(&sender), receiver, text });
        [&target, &sender]
            .into_iter()
            .filter_map(|session| deliver_to(session, stamped.clone()))
            .collect()
    }

    async fn handle_shutdown(&mut self) {
        info!(members = self.roster.len(), "shutting down");

        let stamped = self.stamp(Event::Shutdown);
        self.record(&stamped);
        // Overflowing sessions are evicted below along with everyone else.
        let _ = self.broadcast(&stamped);

        self.accepting.send_replace(false);
        self.env.sleep(self.config.shutdown_grace).await;

        let evicted = self.roster.evict_all();
        debug!(count = evicted.len(), "evicted remaining sessions");

        if let Err(e) = self.bans.save() {
            error!(error = %e, "failed to save ban list");
        }
    }

    /// Private server notice to one session.
    fn notify(&mut self, receiver: Arc<Session>, text: &str) -> Vec<Arc<Session>> {
        let stamped =
            self.stamp(Event::SystemWhisper { receiver: Arc::clone(&receiver), text: text.to_string() });
        deliver_to(&receiver, stamped).into_iter().collect()
    }

    /// Assign the received-at time, never earlier than the previous one.
    fn stamp(&mut self, event: Event) -> StampedEvent {
        let now = self.env.now();
        let at = match self.last_stamp {
            Some(last) if now < last => last,
            _ => now,
        };
        self.last_stamp = Some(at);
        event.stamp(at)
    }

    /// Append to the shared backlog and the audit log.
    fn record(&mut self, event: &StampedEvent) {
        debug_assert!(event.event().should_log());
        info!(target: CHAT_LOG_TARGET, "{}: {}", event.sender(), strip_ansi(&event.message()));
        self.backlog.push(event.clone());
    }

    fn broadcast(&self, event: &StampedEvent) -> Vec<Arc<Session>> {
        self.roster
            .snapshot()
            .iter()
            .filter_map(|session| deliver_to(session, event.clone()))
            .collect()
    }
}

/// Queue an event for one session. Returns the session if its inbox is full.
fn deliver_to(session: &Arc<Session>, event: StampedEvent) -> Option<Arc<Session>> {
    match session.deliver(event) {
        Delivery::Queued => None,
        Delivery::Full => Some(Arc::clone(session)),
        Delivery::Closed => {
            debug!(session = %session.id(), "inbox closed, dropping event");
            None
        },
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::TimeZone;

    use super::*;
    use crate::{
        bans::MemoryBanStore,
        event::EventKind,
        session::{Identity, Inbox},
        transport::Closer,
    };

    /// Clock that can be set backwards.
    #[derive(Clone)]
    struct ManualEnv(Arc<std::sync::Mutex<DateTime<Utc>>>);

    impl ManualEnv {
        fn at(secs: i64) -> Self {
            Self(Arc::new(std::sync::Mutex::new(Utc.timestamp_opt(secs, 0).unwrap())))
        }

        fn set(&self, secs: i64) {
            *self.0.lock().unwrap() = Utc.timestamp_opt(secs, 0).unwrap();
        }
    }

    impl Environment for ManualEnv {
        fn now(&self) -> DateTime<Utc> {
            *self.0.lock().unwrap()
        }

        async fn sleep(&self, _duration: Duration) {}
    }

    struct NullCloser;

    impl Closer for NullCloser {
        fn close(&self) {}
    }

    fn session(roster: &Roster, id: u64, name: &str, capacity: usize) -> (Arc<Session>, Inbox) {
        roster.claim(name).unwrap();
        Session::new(
            SessionId(id),
            Identity::from_credential(name.as_bytes()),
            name,
            "127.0.0.1",
            Arc::new(NullCloser),
            8,
            capacity,
        )
    }

    fn dispatcher(env: ManualEnv) -> Dispatcher<ManualEnv, MemoryBanStore> {
        let config = ChatConfig { scrollback: 4, queue_capacity: 8, ..Default::default() };
        Dispatcher::new(env, config, Arc::new(Roster::new()), MemoryBanStore::new())
    }

    fn drain(inbox: &mut Inbox) -> Vec<StampedEvent> {
        std::iter::from_fn(|| inbox.try_recv().ok()).collect()
    }

    #[tokio::test]
    async fn timestamps_never_go_backwards() {
        let env = ManualEnv::at(100);
        let mut d = dispatcher(env.clone());
        let (alice, mut inbox) = session(d.roster(), 1, "alice", 8);
        let _ = d.handle(Event::Join { user: alice }).await;

        env.set(50);
        let _ = d.handle(Event::System { text: "late".to_string() }).await;

        let events = drain(&mut inbox);
        assert_eq!(events.len(), 2);
        assert!(events[1].received_at() >= events[0].received_at());
    }

    #[tokio::test]
    async fn closed_session_join_releases_name() {
        let mut d = dispatcher(ManualEnv::at(0));
        let (alice, _inbox) = session(d.roster(), 1, "alice", 8);
        alice.close();

        let _ = d.handle(Event::Join { user: alice }).await;

        assert!(d.roster().is_empty());
        assert!(!d.roster().is_claimed("alice"));
        assert!(d.backlog().is_empty());
    }

    #[tokio::test]
    async fn overflow_evicts_with_part() {
        let mut d = dispatcher(ManualEnv::at(0));
        let (alice, mut alice_inbox) = session(d.roster(), 1, "alice", 8);
        let (bob, _bob_inbox) = session(d.roster(), 2, "bob", 2);
        let _ = d.handle(Event::Join { user: alice }).await;
        let _ = d.handle(Event::Join { user: Arc::clone(&bob) }).await;

        // Bob's inbox holds two and never drains.
        let _ = d.handle(Event::Chat { sender: "alice".to_string(), text: "one".to_string() }).await;

        assert!(bob.is_closed());
        assert!(!d.roster().contains(bob.id()));
        let last = drain(&mut alice_inbox).pop().unwrap();
        assert_eq!(last.kind(), EventKind::Part);
        assert_eq!(last.message(), format!("bob has left ({OVERFLOW_REASON})"));
    }

    #[tokio::test]
    async fn noop_reaches_only_its_target() {
        let mut d = dispatcher(ManualEnv::at(0));
        let (alice, mut alice_inbox) = session(d.roster(), 1, "alice", 8);
        let (bob, mut bob_inbox) = session(d.roster(), 2, "bob", 8);
        let _ = d.handle(Event::Join { user: Arc::clone(&alice) }).await;
        let _ = d.handle(Event::Join { user: bob }).await;
        drain(&mut alice_inbox);
        drain(&mut bob_inbox);

        let _ = d.handle(Event::NoOp { user: alice }).await;

        assert_eq!(drain(&mut alice_inbox).len(), 1);
        assert!(drain(&mut bob_inbox).is_empty());
        assert_eq!(d.backlog().len(), 2);
    }

    #[tokio::test]
    async fn shutdown_breaks_and_saves() {
        let bans = MemoryBanStore::new();
        let roster = Arc::new(Roster::new());
        let mut d = Dispatcher::new(ManualEnv::at(0), ChatConfig::default(), Arc::clone(&roster), bans.clone());
        let accepting = d.accepting();
        let (alice, mut inbox) = session(&roster, 1, "alice", 32);
        let _ = d.handle(Event::Join { user: Arc::clone(&alice) }).await;

        assert!(d.handle(Event::Shutdown).await.is_break());

        assert!(!*accepting.borrow());
        assert!(alice.is_closed());
        assert!(roster.is_empty());
        assert_eq!(bans.save_count(), 1);
        assert_eq!(drain(&mut inbox).last().map(StampedEvent::kind), Some(EventKind::Shutdown));
    }

    #[tokio::test]
    async fn failed_ban_save_does_not_stop_shutdown() {
        let bans = MemoryBanStore::new();
        bans.fail_saves();
        let mut d = Dispatcher::new(ManualEnv::at(0), ChatConfig::default(), Arc::new(Roster::new()), bans);

        assert!(d.handle(Event::Shutdown).await.is_break());
    }
}

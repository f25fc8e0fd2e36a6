//! Roster of live sessions and claimed display names.
//!
//! Membership changes normally happen only inside the dispatcher loop. The
//! mutex exists for the two operations that cannot wait for the loop:
//! claiming a name at accept time (which must be atomic across concurrent
//! connections) and quiet removal of a session that is being evicted. Every
//! critical section is one collection operation; nothing awaits while holding
//! the lock.

#![allow(clippy::disallowed_types, reason = "Synchronous in-memory operations only")]

use std::{
    collections::HashSet,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use crate::{
    error::Rejection,
    session::{Session, SessionId},
};

/// Longest accepted display name, in characters.
pub const MAX_NAME_LEN: usize = 32;

#[derive(Debug, Default)]
struct RosterInner {
    /// Sessions that have joined, in join order
    members: Vec<Arc<Session>>,
    /// Names held by members or reserved by sessions still joining
    claimed: HashSet<String>,
}

/// Live sessions and the display names they hold.
#[derive(Debug, Default)]
pub struct Roster {
    inner: Mutex<RosterInner>,
}

impl Roster {
    /// Create an empty roster.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RosterInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reserve a display name for a session about to join.
    ///
    /// Check-and-set is atomic: of several concurrent claims for one name,
    /// exactly one succeeds. The claim lasts until the name is released or
    /// its session is removed.
    pub fn claim(&self, name: &str) -> Result<(), Rejection> {
        validate_name(name)?;

        let mut inner = self.lock();
        if !inner.claimed.insert(name.to_string()) {
            return Err(Rejection::NameTaken(name.to_string()));
        }
        Ok(())
    }

    /// Give up a claim for a session that never joined.
    pub fn release(&self, name: &str) {
        let mut inner = self.lock();
        if !inner.members.iter().any(|s| s.name() == name) {
            inner.claimed.remove(name);
        }
    }

    /// Whether a name is held or reserved.
    pub fn is_claimed(&self, name: &str) -> bool {
        self.lock().claimed.contains(name)
    }

    /// Add a joining session.
    ///
    /// Returns `false` without adding it if the session was closed while its
    /// join was queued.
    pub(crate) fn insert(&self, session: Arc<Session>) -> bool {
        let mut inner = self.lock();
        if session.is_closed() {
            return false;
        }
        if inner.members.iter().any(|s| s.id() == session.id()) {
            return true;
        }
        inner.claimed.insert(session.name().to_string());
        inner.members.push(session);
        true
    }

    /// Close a session and drop it without any Part broadcast.
    ///
    /// Used for eviction (faults, overflow, shutdown) and by the dispatcher
    /// when processing a Part. The transport close is fire-and-forget.
    /// Returns the removed member, or `None` if it was not in the roster. A
    /// non-member's name claim is left alone: the name may already belong to
    /// a newer session, and a pending join of a closed session releases its
    /// own claim.
    pub fn remove_quietly(&self, session: &Session) -> Option<Arc<Session>> {
        let mut inner = self.lock();
        session.close();

        let index = inner.members.iter().position(|s| s.id() == session.id())?;
        let removed = inner.members.remove(index);
        inner.claimed.remove(removed.name());
        Some(removed)
    }

    /// Remove and close every member.
    pub(crate) fn evict_all(&self) -> Vec<Arc<Session>> {
        let mut inner = self.lock();
        let members = std::mem::take(&mut inner.members);
        for session in &members {
            session.close();
            inner.claimed.remove(session.name());
        }
        members
    }

    /// Whether a session is a current member.
    pub fn contains(&self, id: SessionId) -> bool {
        self.lock().members.iter().any(|s| s.id() == id)
    }

    /// Member holding a display name.
    pub fn find_by_name(&self, name: &str) -> Option<Arc<Session>> {
        self.lock().members.iter().find(|s| s.name() == name).cloned()
    }

    /// Current members in join order.
    pub fn snapshot(&self) -> Vec<Arc<Session>> {
        self.lock().members.clone()
    }

    /// Display names of current members in join order.
    pub fn names(&self) -> Vec<String> {
        self.lock().members.iter().map(|s| s.name().to_string()).collect()
    }

    /// Number of members.
    pub fn len(&self) -> usize {
        self.lock().members.len()
    }

    /// Whether there are no members.
    pub fn is_empty(&self) -> bool {
        self.lock().members.is_empty()
    }
}

/// Names must be one non-empty printable token so they can be addressed by
/// `/whisper <name>`.
fn validate_name(name: &str) -> Result<(), Rejection> {
    if name.is_empty() {
        return Err(Rejection::InvalidName("name is empty".to_string()));
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(Rejection::InvalidName(format!("longer than {MAX_NAME_LEN} characters")));
    }
    if name.chars().any(char::is_whitespace) {
        return Err(Rejection::InvalidName("contains whitespace".to_string()));
    }
    if name.chars().any(char::is_control) {
        return Err(Rejection::InvalidName("contains control characters".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use proptest::prelude::*;

    use super::*;
    use crate::{session::Identity, transport::Closer};

    struct NullCloser;

    impl Closer for NullCloser {
        fn close(&self) {}
    }

    fn session(id: u64, name: &str) -> Arc<Session> {
        let (session, _inbox) = Session::new(
            SessionId(id),
            Identity::from_credential(name.as_bytes()),
            name,
            "127.0.0.1",
            Arc::new(NullCloser),
            8,
            16,
        );
        session
    }

    #[test]
    fn second_claim_for_a_name_fails() {
        let roster = Roster::new();

        assert_eq!(roster.claim("alice"), Ok(()));
        assert_eq!(roster.claim("alice"), Err(Rejection::NameTaken("alice".to_string())));
        assert_eq!(roster.claim("bob"), Ok(()));
    }

    #[test]
    fn release_frees_an_unjoined_claim() {
        let roster = Roster::new();
        roster.claim("alice").unwrap();
        roster.release("alice");

        assert!(!roster.is_claimed("alice"));
        assert_eq!(roster.claim("alice"), Ok(()));
    }

    #[test]
    fn release_keeps_a_member_name() {
        let roster = Roster::new();
        roster.claim("alice").unwrap();
        roster.insert(session(1, "alice"));
        roster.release("alice");

        assert!(roster.is_claimed("alice"));
    }

    #[test]
    fn invalid_names_are_rejected() {
        let roster = Roster::new();

        assert!(matches!(roster.claim(""), Err(Rejection::InvalidName(_))));
        assert!(matches!(roster.claim("two words"), Err(Rejection::InvalidName(_))));
        assert!(matches!(roster.claim("bell\x07"), Err(Rejection::InvalidName(_))));
        assert!(matches!(roster.claim(&"x".repeat(MAX_NAME_LEN + 1)), Err(Rejection::InvalidName(_))));
        assert_eq!(roster.claim(&"x".repeat(MAX_NAME_LEN)), Ok(()));
    }

    #[test]
    fn remove_quietly_closes_and_frees_name() {
        let roster = Roster::new();
        roster.claim("alice").unwrap();
        let alice = session(1, "alice");
        roster.insert(alice.clone());

        let removed = roster.remove_quietly(&alice);

        assert!(removed.is_some());
        assert!(alice.is_closed());
        assert!(!roster.contains(alice.id()));
        assert!(!roster.is_claimed("alice"));
        assert!(roster.remove_quietly(&alice).is_none());
    }

    #[test]
    fn stale_removal_keeps_newer_claim() {
        let roster = Roster::new();
        roster.claim("alice").unwrap();
        let old = session(1, "alice");
        roster.insert(old.clone());
        roster.remove_quietly(&old);

        roster.claim("alice").unwrap();
        assert!(roster.remove_quietly(&old).is_none());

        assert!(roster.is_claimed("alice"));
    }

    #[test]
    fn closed_session_is_not_inserted() {
        let roster = Roster::new();
        let alice = session(1, "alice");
        alice.close();

        assert!(!roster.insert(alice));
        assert!(roster.is_empty());
    }

    #[test]
    fn find_by_name_and_names_follow_join_order() {
        let roster = Roster::new();
        roster.insert(session(1, "alice"));
        roster.insert(session(2, "bob"));

        assert_eq!(roster.names(), vec!["alice", "bob"]);
        assert_eq!(roster.find_by_name("bob").map(|s| s.id()), Some(SessionId(2)));
        assert!(roster.find_by_name("carol").is_none());
    }

    #[test]
    fn concurrent_claims_admit_exactly_one() {
        let roster = Arc::new(Roster::new());
        let winners = Arc::new(AtomicUsize::new(0));

        let threads: Vec<_> = (0..16)
            .map(|_| {
                let roster = Arc::clone(&roster);
                let winners = Arc::clone(&winners);
                std::thread::spawn(move || {
                    if roster.claim("alice").is_ok() {
                        winners.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for thread in threads {
            thread.join().unwrap();
        }

        assert_eq!(winners.load(Ordering::SeqCst), 1);
    }

    proptest! {
        /// Property: after any sequence of claims and releases, a name is
        /// claimed iff the last successful operation on it was a claim
        #[test]
        fn prop_claims_are_exclusive(ops in prop::collection::vec((0u8..4, any::<bool>()), 0..64)) {
            let roster = Roster::new();
            let mut held = HashSet::new();

            for (n, claim) in ops {
                let name = format!("user{n}");
                if claim {
                    let result = roster.claim(&name);
                    prop_assert_eq!(result.is_ok(), held.insert(name.clone()));
                } else {
                    roster.release(&name);
                    held.remove(&name);
                }
                prop_assert_eq!(roster.is_claimed(&name), held.contains(&name));
            }
        }
    }
}

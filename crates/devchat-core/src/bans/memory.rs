#![allow(clippy::disallowed_types, reason = "Synchronous in-memory operations only")]

use std::{
    collections::HashSet,
    io,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

use super::BanStore;
use crate::error::BanStoreError;

/// In-memory ban list for testing and simulation.
///
/// Counts saves so tests can assert shutdown persisted the list, and can be
/// told to fail saving to exercise the error path.
#[derive(Debug, Clone, Default)]
pub struct MemoryBanStore {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    bans: Mutex<HashSet<String>>,
    saves: AtomicUsize,
    fail_saves: AtomicBool,
}

impl MemoryBanStore {
    /// Create an empty ban list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a ban list holding `ids`.
    pub fn with_bans<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let store = Self::new();
        store.lock().extend(ids.into_iter().map(Into::into));
        store
    }

    /// Ban an identity.
    pub fn ban(&self, identity: impl Into<String>) {
        self.lock().insert(identity.into());
    }

    /// Number of successful saves.
    pub fn save_count(&self) -> usize {
        self.inner.saves.load(Ordering::SeqCst)
    }

    /// Make every further save fail.
    pub fn fail_saves(&self) {
        self.inner.fail_saves.store(true, Ordering::SeqCst);
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<String>> {
        self.inner.bans.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl BanStore for MemoryBanStore {
    fn contains(&self, identity: &str) -> bool {
        self.lock().contains(identity)
    }

    fn save(&self) -> Result<(), BanStoreError> {
        if self.inner.fail_saves.load(Ordering::SeqCst) {
            return Err(io::Error::other("injected save failure").into());
        }
        self.inner.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

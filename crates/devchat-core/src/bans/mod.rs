//! Ban list abstraction.
//!
//! The engine only asks two things of a ban list: whether an identity is
//! banned, and to persist itself at shutdown. The trait is synchronous; the
//! list is small and the only write happens once, on the way out.

mod json;
mod memory;

pub use json::JsonBanStore;
pub use memory::MemoryBanStore;

use crate::error::BanStoreError;

/// Membership and persistence of banned identities.
///
/// Must be Clone (the accept path and the dispatcher both hold it) and
/// Send + Sync. Implementations share state internally, so clones see the
/// same list.
pub trait BanStore: Clone + Send + Sync + 'static {
    /// Whether `identity` is banned.
    fn contains(&self, identity: &str) -> bool;

    /// Persist the current list.
    ///
    /// Called once during shutdown. A failure is logged by the caller and
    /// never aborts the shutdown.
    fn save(&self) -> Result<(), BanStoreError>;
}

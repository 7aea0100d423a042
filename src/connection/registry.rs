//! Process-wide lookup of live connections.
//!
//! The registry stores non-owning weak references, so a registered
//! connection is still freed once its last [`Connection`] handle drops. Dead
//! entries are pruned lazily at lookup time or explicitly via
//! [`ConnectionRegistry::prune`].

use std::{
    fmt,
    sync::{
        LazyLock, Weak,
        atomic::{AtomicU64, Ordering},
    },
};

use dashmap::DashMap;

use super::{Connection, ConnectionInner};

/// Identifier assigned to a connection, unique within the process.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl From<u64> for ConnectionId {
    fn from(value: u64) -> Self { Self(value) }
}

impl ConnectionId {
    /// Allocate a fresh identifier.
    #[must_use]
    pub fn generate() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    /// Create a new [`ConnectionId`] with the provided value.
    #[must_use]
    pub fn new(id: u64) -> Self { Self(id) }

    /// Return the inner `u64` representation.
    #[must_use]
    pub fn as_u64(&self) -> u64 { self.0 }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConnectionId({})", self.0)
    }
}

static GLOBAL: LazyLock<ConnectionRegistry> = LazyLock::new(ConnectionRegistry::default);

/// The registry every [`Connection`] joins on construction.
pub(crate) fn global() -> &'static ConnectionRegistry { &GLOBAL }

/// Concurrent map of weak connection handles keyed by [`ConnectionId`].
#[derive(Default)]
pub struct ConnectionRegistry(DashMap<ConnectionId, Weak<ConnectionInner>>);

impl ConnectionRegistry {
    /// Retrieve the connection for `id` if it is still alive.
    pub fn get(&self, id: &ConnectionId) -> Option<Connection> {
        let guard = self.0.get(id);
        let inner = guard.as_ref().and_then(|weak| weak.upgrade());
        drop(guard);
        if inner.is_none() {
            self.0.remove_if(id, |_, weak| weak.strong_count() == 0);
        }
        inner.map(Connection)
    }

    pub(super) fn insert(&self, id: ConnectionId, inner: Weak<ConnectionInner>) {
        self.0.insert(id, inner);
    }

    /// Remove the entry for `id`, typically when the connection is dropped.
    ///
    /// Only dead entries are removed so that a racing re-registration under
    /// the same id is preserved.
    pub fn remove(&self, id: &ConnectionId) {
        self.0.remove_if(id, |_, weak| weak.strong_count() == 0);
    }

    /// Remove all stale weak references.
    pub fn prune(&self) { self.0.retain(|_, weak| weak.strong_count() > 0); }

    /// Prune stale weak references, then return the IDs of the live connections.
    #[must_use]
    pub fn active_ids(&self) -> Vec<ConnectionId> {
        let mut ids = Vec::with_capacity(self.0.len());
        self.0.retain(|id, weak| {
            if weak.strong_count() > 0 {
                ids.push(*id);
                true
            } else {
                false
            }
        });
        ids.sort_unstable();
        ids
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    fn generated_ids_are_distinct() {
        let a = ConnectionId::generate();
        let b = ConnectionId::generate();
        assert_ne!(a, b);
        assert_eq!(ConnectionId::from(a.as_u64()), a);
    }

    #[rstest]
    fn display_includes_value() {
        assert_eq!(ConnectionId::new(7).to_string(), "ConnectionId(7)");
    }

    #[rstest]
    fn dead_entries_are_pruned() {
        let registry = ConnectionRegistry::default();
        let id = ConnectionId::generate();
        registry.insert(id, Weak::new());
        assert!(registry.get(&id).is_none());
        assert!(registry.active_ids().is_empty());
    }
}

//! Directory of connected peers.
//!
//! The registry is the only shared mutable state in the hub. Every operation
//! takes the lock for a single map operation or a snapshot copy and releases
//! it before returning, so no caller ever holds it across a delivery.

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::config::DuplicatePolicy;
use crate::error::HubError;
use crate::recipient::{ClientHandle, same_handle};

/// Result of a successful [`Registry::register`].
pub enum Registration {
    /// The identity was free.
    Inserted,
    /// The identity was taken; this is the handle that got replaced.
    Replaced(ClientHandle),
}

impl Registration {
    pub fn is_replacement(&self) -> bool {
        matches!(self, Self::Replaced(_))
    }
}

impl std::fmt::Debug for Registration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Inserted => write!(f, "Inserted"),
            Self::Replaced(old) => write!(f, "Replaced({})", old.identity()),
        }
    }
}

/// Concurrency-safe map from identity to handle.
///
/// Ordered by identity so snapshots and rosters come out stable.
#[derive(Default)]
pub struct Registry {
    clients: RwLock<BTreeMap<String, ClientHandle>>,
    policy: DuplicatePolicy,
}

impl Registry {
    pub fn new() -> Self {
        Self::with_policy(DuplicatePolicy::default())
    }

    pub fn with_policy(policy: DuplicatePolicy) -> Self {
        Self {
            clients: RwLock::new(BTreeMap::new()),
            policy,
        }
    }

    /// Insert `handle` under its identity, resolving duplicates by policy.
    pub fn register(&self, handle: ClientHandle) -> Result<Registration, HubError> {
        let identity = handle.identity().to_string();
        let mut clients = self.write();

        match self.policy {
            DuplicatePolicy::Reject if clients.contains_key(&identity) => {
                Err(HubError::DuplicateIdentity(identity))
            }
            _ => Ok(match clients.insert(identity, handle) {
                Some(old) => Registration::Replaced(old),
                None => Registration::Inserted,
            }),
        }
    }

    /// Remove whatever is registered under `identity`. Absent is a no-op.
    pub fn unregister(&self, identity: &str) -> Option<ClientHandle> {
        self.write().remove(identity)
    }

    /// Remove `handle` only if it is still the entry for its identity.
    ///
    /// A handle that has been replaced must not take its successor down
    /// with it when it fails or disconnects.
    pub fn remove_if_current(&self, handle: &ClientHandle) -> bool {
        let mut clients = self.write();
        let current = clients
            .get(handle.identity())
            .is_some_and(|registered| same_handle(registered, handle));

        if current {
            clients.remove(handle.identity());
        }
        current
    }

    /// Point-in-time copy of every registered handle, ordered by identity.
    pub fn snapshot(&self) -> Vec<ClientHandle> {
        self.read().values().cloned().collect()
    }

    pub fn contains(&self, identity: &str) -> bool {
        self.read().contains_key(identity)
    }

    pub fn size(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    // Each critical section is a single map call, so a panic elsewhere
    // cannot leave the map half-updated.
    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<String, ClientHandle>> {
        self.clients.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<String, ClientHandle>> {
        self.clients.write().unwrap_or_else(PoisonError::into_inner)
    }
}

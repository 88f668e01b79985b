//! Registration and fan-out.
//!
//! [`BroadcastHub`] is what a transport talks to. A broadcast works on a
//! snapshot of the registry: the recipient set is fixed when the call starts,
//! deliveries run concurrently outside any lock, and every recipient whose
//! delivery fails or times out is evicted once all attempts have settled.

use std::time::Duration;

use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::config::HubConfig;
use crate::error::{DeliveryError, HubError};
use crate::recipient::ClientHandle;
use crate::registry::{Registration, Registry};

/// Directory of connected peers plus the broadcast operation.
pub struct BroadcastHub {
    registry: Registry,
    config: HubConfig,
}

impl BroadcastHub {
    /// Create a hub with an empty directory and default configuration
    pub fn new() -> Self {
        Self::with_config(HubConfig::default())
    }

    /// Create a hub with an empty directory and custom configuration
    pub fn with_config(config: HubConfig) -> Self {
        Self {
            registry: Registry::with_policy(config.duplicate_policy),
            config,
        }
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Add a peer to the directory.
    ///
    /// With the replace policy this never fails; the handle that previously
    /// held the identity is detached. With the reject policy a taken identity
    /// yields [`HubError::DuplicateIdentity`] and the directory is unchanged.
    pub fn register_client(&self, handle: ClientHandle) -> Result<Registration, HubError> {
        let identity = handle.identity().to_string();

        match self.registry.register(handle) {
            Ok(Registration::Inserted) => {
                info!(
                    identity = %identity,
                    clients = self.registry.size(),
                    "client registered"
                );
                Ok(Registration::Inserted)
            }
            Ok(Registration::Replaced(previous)) => {
                previous.detached();
                info!(
                    identity = %identity,
                    clients = self.registry.size(),
                    "client re-registered, previous session detached"
                );
                Ok(Registration::Replaced(previous))
            }
            Err(err) => {
                warn!(identity = %identity, error = %err, "client registration rejected");
                Err(err)
            }
        }
    }

    /// Remove a peer by identity. Returns whether anything was removed.
    pub fn unregister_client(&self, identity: &str) -> bool {
        match self.registry.unregister(identity) {
            Some(handle) => {
                handle.detached();
                info!(
                    identity = %identity,
                    clients = self.registry.size(),
                    "client unregistered"
                );
                true
            }
            None => {
                debug!(identity = %identity, "unregister for unknown client ignored");
                false
            }
        }
    }

    /// Transport teardown for `handle`.
    ///
    /// Unlike [`unregister_client`](Self::unregister_client) this leaves a
    /// newer registration under the same identity alone.
    pub fn release(&self, handle: &ClientHandle) -> bool {
        let removed = self.registry.remove_if_current(handle);
        if removed {
            info!(
                identity = %handle.identity(),
                clients = self.registry.size(),
                "client disconnected"
            );
        }
        removed
    }

    /// Deliver `text` from `sender` to every other registered peer.
    ///
    /// Never fails as a whole; per-recipient failures are returned in the
    /// report and the failing recipients are evicted.
    pub async fn broadcast(&self, text: &str, sender: &str) -> BroadcastReport {
        let recipients: Vec<ClientHandle> = self
            .registry
            .snapshot()
            .into_iter()
            .filter(|recipient| recipient.identity() != sender)
            .collect();

        let limit = self.config.delivery_timeout;
        let outcomes = join_all(
            recipients
                .iter()
                .map(|recipient| deliver_within(recipient, text, sender, limit)),
        )
        .await;

        let mut report = BroadcastReport::default();
        for (recipient, outcome) in recipients.iter().zip(outcomes) {
            match outcome {
                Ok(()) => report.delivered.push(recipient.identity().to_string()),
                Err(err) => {
                    warn!(sender = %sender, error = %err, "delivery failed, evicting client");
                    self.evict(recipient);
                    report.failures.push(err);
                }
            }
        }

        debug!(
            sender = %sender,
            delivered = report.delivered.len(),
            failed = report.failures.len(),
            "broadcast complete"
        );
        report
    }

    /// Identities of every connected peer, ordered by name.
    pub fn connected_clients(&self) -> Vec<String> {
        self.registry
            .snapshot()
            .iter()
            .map(|handle| handle.identity().to_string())
            .collect()
    }

    pub fn client_count(&self) -> usize {
        self.registry.size()
    }

    fn evict(&self, handle: &ClientHandle) {
        if self.registry.remove_if_current(handle) {
            handle.detached();
            info!(
                identity = %handle.identity(),
                clients = self.registry.size(),
                "client evicted"
            );
        }
    }
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new()
    }
}

async fn deliver_within(
    recipient: &ClientHandle,
    text: &str,
    sender: &str,
    limit: Duration,
) -> Result<(), DeliveryError> {
    match tokio::time::timeout(limit, recipient.deliver(text, sender)).await {
        Ok(result) => result,
        Err(_) => Err(DeliveryError::Timeout {
            identity: recipient.identity().to_string(),
            after: limit,
        }),
    }
}

/// What happened to each recipient of one broadcast.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Recipients that accepted the message, ordered by identity.
    pub delivered: Vec<String>,
    /// Recipients that failed or timed out. Each was evicted unless a newer
    /// registration had already taken over its identity.
    pub failures: Vec<DeliveryError>,
}

impl BroadcastReport {
    pub fn delivered_count(&self) -> usize {
        self.delivered.len()
    }

    /// Identities whose delivery failed in this broadcast.
    pub fn failed(&self) -> Vec<&str> {
        self.failures.iter().map(DeliveryError::identity).collect()
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

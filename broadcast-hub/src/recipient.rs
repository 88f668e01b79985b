//! The capability the hub uses to reach a connected peer.
//!
//! The hub never knows how a peer is connected. Each transport implements
//! [`Recipient`] for its own connection type and hands the hub a
//! [`ClientHandle`]. [`ChannelRecipient`] is the in-process implementation:
//! deliveries land in a bounded Tokio channel that the owning session drains.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::{
    select,
    sync::{mpsc, watch},
};

use crate::error::DeliveryError;

/// A connected peer, as seen by the hub.
#[async_trait]
pub trait Recipient: Send + Sync {
    /// Display name the peer registered under. Must not change.
    fn identity(&self) -> &str;

    /// Hand one message to the peer.
    ///
    /// Calls for the same recipient are issued in order; implementations
    /// must preserve that order.
    async fn deliver(&self, text: &str, sender: &str) -> Result<(), DeliveryError>;

    /// The hub dropped this handle from its directory (explicit unregister,
    /// replacement by a newer registration, or eviction).
    fn detached(&self) {}
}

/// Shared handle to a connected peer.
pub type ClientHandle = Arc<dyn Recipient>;

/// Whether two handles are the same registration, not merely the same name.
pub fn same_handle(a: &ClientHandle, b: &ClientHandle) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

/// One chat line in flight: who sent it and what it says.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub sender: String,
    pub text: String,
}

impl Message {
    pub fn new(sender: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
            text: text.into(),
        }
    }
}

/// [`Recipient`] backed by a bounded mpsc channel.
///
/// Delivery fails once the [`Inbox`] is dropped. A full channel makes
/// `deliver` wait, which the hub's delivery timeout bounds.
pub struct ChannelRecipient {
    identity: String,
    outbox: mpsc::Sender<Message>,
    detached: watch::Sender<bool>,
}

impl ChannelRecipient {
    pub fn new(identity: impl Into<String>, capacity: usize) -> (Arc<Self>, Inbox) {
        let (outbox, deliveries) = mpsc::channel(capacity.max(1));
        let (detached, detached_rx) = watch::channel(false);
        let recipient = Arc::new(Self {
            identity: identity.into(),
            outbox,
            detached,
        });
        let inbox = Inbox {
            deliveries,
            detached: detached_rx,
        };
        (recipient, inbox)
    }

    pub fn is_detached(&self) -> bool {
        *self.detached.borrow()
    }
}

#[async_trait]
impl Recipient for ChannelRecipient {
    fn identity(&self) -> &str {
        &self.identity
    }

    async fn deliver(&self, text: &str, sender: &str) -> Result<(), DeliveryError> {
        self.outbox
            .send(Message::new(sender, text))
            .await
            .map_err(|_| DeliveryError::failed(&self.identity, "recipient inbox closed"))
    }

    fn detached(&self) {
        self.detached.send_replace(true);
    }
}

/// What a session pulls out of its [`Inbox`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboxEvent {
    Message(Message),
    Detached,
}

/// Receiving side of a [`ChannelRecipient`].
pub struct Inbox {
    deliveries: mpsc::Receiver<Message>,
    detached: watch::Receiver<bool>,
}

impl Inbox {
    /// Next queued message, or `Detached` once the hub has dropped the handle
    /// and the queue is drained. `None` when the recipient itself is gone.
    pub async fn recv(&mut self) -> Option<InboxEvent> {
        let detached = select! {
            biased;
            message = self.deliveries.recv() => return message.map(InboxEvent::Message),
            detached = self.detached.wait_for(|detached| *detached) => detached.is_ok(),
        };

        if detached {
            Some(InboxEvent::Detached)
        } else {
            self.deliveries.recv().await.map(InboxEvent::Message)
        }
    }
}

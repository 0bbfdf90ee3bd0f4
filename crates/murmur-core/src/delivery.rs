//! Delivery engine: push now or leave for the backlog.
//!
//! Read state follows delivery. An entry is marked read only after a live
//! push to its receiver succeeded; a failed push evicts the receiver and
//! leaves the entry unread for the next backlog load.

use async_trait::async_trait;
use chrono::Utc;
use murmur_protocol::{Identity, ServerEvent};
use murmur_store::{ConversationItem, EventStore, Timestamp};
use std::sync::Arc;
use tracing::{debug, error, trace};

use crate::registry::Registry;

/// Hook for reaching identities that are offline, such as mobile push.
#[async_trait]
pub trait OfflineNotifier: Send + Sync {
    /// `event` was stored for `target`, who is not connected.
    async fn notify_offline(&self, target: Identity, event: &ServerEvent);
}

/// Notifier that only records the miss in the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl OfflineNotifier for LogNotifier {
    async fn notify_offline(&self, target: Identity, event: &ServerEvent) {
        debug!(identity = target, event = event.type_name(), "Target offline, left in backlog");
    }
}

/// What happened to a live delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Pushed and marked read at the given instant.
    Delivered(Timestamp),
    /// Pushed, but the read mark could not be written; the entry stays unread
    /// in the store and will be sent again with the next backlog.
    Unrecorded,
    /// Receiver not connected.
    Offline,
    /// Push failed; the receiver was evicted.
    Failed,
}

/// Pushes persisted entries and notices to connected identities.
#[derive(Clone)]
pub struct DeliveryEngine {
    registry: Arc<Registry>,
    store: Arc<dyn EventStore>,
    notifier: Arc<dyn OfflineNotifier>,
}

impl DeliveryEngine {
    #[must_use]
    pub fn new(
        registry: Arc<Registry>,
        store: Arc<dyn EventStore>,
        notifier: Arc<dyn OfflineNotifier>,
    ) -> Self {
        Self {
            registry,
            store,
            notifier,
        }
    }

    /// Deliver a persisted message or share to its receiver and, on success,
    /// mark it read in the store and in `item`.
    ///
    /// A store failure while marking read is logged and reported as
    /// [`Delivery::Unrecorded`]; `item` then keeps its unread state.
    pub async fn deliver(&self, item: &mut ConversationItem) -> Delivery {
        let target = item.receiver_id();
        let event = item.to_event();

        if !self.registry.is_online(target) {
            self.notifier.notify_offline(target, &event).await;
            return Delivery::Offline;
        }
        if !self.registry.send_direct(target, &event).await {
            return Delivery::Failed;
        }

        let read_at = Utc::now();
        match self.store.mark_read(item.entity(), read_at).await {
            Ok(_) => {
                item.mark_read(read_at);
                trace!(identity = target, entity = ?item.entity(), "Delivered");
                Delivery::Delivered(read_at)
            }
            Err(e) => {
                error!(
                    identity = target,
                    entity = ?item.entity(),
                    "Failed to mark delivered entry read: {}", e
                );
                Delivery::Unrecorded
            }
        }
    }

    /// Echo a result back to the identity that caused it.
    pub async fn echo(&self, initiator: Identity, event: &ServerEvent) -> bool {
        self.registry.send_direct(initiator, event).await
    }

    /// Push an ephemeral notice. Offline targets just miss it.
    pub async fn notify(&self, target: Identity, event: &ServerEvent) -> bool {
        self.registry.send_direct(target, event).await
    }

    /// Push a notice to the other party, then echo it to the initiator.
    pub async fn notify_both(&self, initiator: Identity, peer: Identity, event: &ServerEvent) {
        if peer != initiator {
            self.notify(peer, event).await;
        }
        self.echo(initiator, event).await;
    }
}

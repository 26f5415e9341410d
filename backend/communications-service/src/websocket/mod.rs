use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{
    mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender},
    RwLock,
};
use uuid::Uuid;

pub mod broadcast;
pub mod message_types;
pub mod pubsub;

pub use broadcast::Broadcaster;

/// Broadcast group key of a conversation
pub fn group_name(conversation_id: i64) -> String {
    format!("conversation_{conversation_id}")
}

/// Unique identifier for a WebSocket subscriber
///
/// Each WebSocket connection gets a unique subscriber ID when it registers.
/// This allows for precise cleanup when connections close.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(Uuid);

impl SubscriberId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

struct Subscriber {
    id: SubscriberId,
    sender: UnboundedSender<String>,
}

/// Process-wide registry of live connections, grouped per conversation
#[derive(Default, Clone)]
pub struct ConnectionRegistry {
    // group name -> subscribers
    inner: Arc<RwLock<HashMap<String, Vec<Subscriber>>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join the conversation's group. The receiver yields every payload
    /// broadcast to the group until the subscriber is removed.
    pub async fn add_subscriber(
        &self,
        conversation_id: i64,
    ) -> (SubscriberId, UnboundedReceiver<String>) {
        let (tx, rx) = unbounded_channel();
        let subscriber_id = SubscriberId::new();
        let group = group_name(conversation_id);

        let mut guard = self.inner.write().await;
        let subscribers = guard.entry(group.clone()).or_default();
        subscribers.push(Subscriber {
            id: subscriber_id,
            sender: tx,
        });

        tracing::debug!(
            ?subscriber_id,
            %group,
            total = subscribers.len(),
            "subscriber added"
        );

        (subscriber_id, rx)
    }

    /// Leave the group. Removing an unknown subscriber is a no-op.
    pub async fn remove_subscriber(&self, conversation_id: i64, subscriber_id: SubscriberId) {
        let group = group_name(conversation_id);
        let mut guard = self.inner.write().await;

        if let Some(subscribers) = guard.get_mut(&group) {
            let before = subscribers.len();
            subscribers.retain(|s| s.id != subscriber_id);
            let after = subscribers.len();

            if before != after {
                tracing::debug!(?subscriber_id, %group, remaining = after, "subscriber removed");
            }

            if subscribers.is_empty() {
                guard.remove(&group);
            }
        }
    }

    /// Send to every subscriber of the group, pruning dead senders.
    /// Returns how many subscribers received the payload.
    pub async fn broadcast(&self, conversation_id: i64, msg: String) -> usize {
        let group = group_name(conversation_id);
        let mut guard = self.inner.write().await;
        let Some(subscribers) = guard.get_mut(&group) else {
            return 0;
        };

        let before = subscribers.len();
        subscribers.retain(|subscriber| subscriber.sender.send(msg.clone()).is_ok());
        let after = subscribers.len();
        if before != after {
            tracing::debug!(%group, pruned = before - after, active = after, "dead senders pruned");
        }
        if subscribers.is_empty() {
            guard.remove(&group);
        }
        after
    }

    pub async fn subscriber_count(&self, conversation_id: i64) -> usize {
        let guard = self.inner.read().await;
        guard
            .get(&group_name(conversation_id))
            .map(|v| v.len())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_name_is_derived_from_id() {
        assert_eq!(group_name(5), "conversation_5");
    }

    #[tokio::test]
    async fn broadcast_reaches_only_the_group() {
        let registry = ConnectionRegistry::new();
        let (_, mut five) = registry.add_subscriber(5).await;
        let (_, mut six) = registry.add_subscriber(6).await;

        assert_eq!(registry.broadcast(5, "hello".into()).await, 1);
        assert_eq!(five.recv().await.as_deref(), Some("hello"));
        assert!(six.try_recv().is_err());
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let registry = ConnectionRegistry::new();
        let (id, _rx) = registry.add_subscriber(5).await;
        registry.remove_subscriber(5, id).await;
        registry.remove_subscriber(5, id).await;
        assert_eq!(registry.subscriber_count(5).await, 0);
    }

    #[tokio::test]
    async fn dead_subscribers_are_pruned_on_broadcast() {
        let registry = ConnectionRegistry::new();
        let (_, rx) = registry.add_subscriber(5).await;
        let (_, mut alive) = registry.add_subscriber(5).await;
        drop(rx);

        assert_eq!(registry.broadcast(5, "ping".into()).await, 1);
        assert_eq!(registry.subscriber_count(5).await, 1);
        assert_eq!(alive.recv().await.as_deref(), Some("ping"));
    }
}

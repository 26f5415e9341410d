use super::message_types::WsOutboundEvent;
use super::pubsub::RedisFanout;
use super::ConnectionRegistry;

/// Publishes events to local connections and, when configured, to peers.
#[derive(Clone)]
pub struct Broadcaster {
    registry: ConnectionRegistry,
    fanout: Option<RedisFanout>,
}

impl Broadcaster {
    pub fn new(registry: ConnectionRegistry, fanout: Option<RedisFanout>) -> Self {
        Self { registry, fanout }
    }

    /// Fire-and-forget: a failed peer publish is logged, never returned.
    pub async fn publish(&self, conversation_id: i64, event: &WsOutboundEvent) -> usize {
        let payload = event.to_json();
        let reached = self
            .registry
            .broadcast(conversation_id, payload.clone())
            .await;

        if let Some(fanout) = &self.fanout {
            if let Err(e) = fanout.publish(conversation_id, &payload).await {
                tracing::warn!(error = %e, conversation_id, "redis fan-out publish failed");
            }
        }
        reached
    }
}

//! Cross-instance fan-out over Redis pub/sub.
//!
//! Each instance publishes the events it produces to `conversation:{id}`
//! wrapped in an [`Envelope`] carrying its origin id, and re-broadcasts
//! envelopes published by other instances to its own connections.

use std::time::Duration;

use futures_util::StreamExt;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client, RedisResult};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ConnectionRegistry;

const CHANNEL_PREFIX: &str = "conversation:";
const INITIAL_RETRY_DELAY: Duration = Duration::from_secs(1);
const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

fn next_retry_delay(current: Duration) -> Duration {
    (current * 2).min(MAX_RETRY_DELAY)
}

fn channel_for_conversation(id: i64) -> String {
    format!("{CHANNEL_PREFIX}{id}")
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Envelope {
    pub origin: Uuid,
    pub payload: String,
}

#[derive(Clone)]
pub struct RedisFanout {
    client: Client,
    conn: MultiplexedConnection,
    origin: Uuid,
}

impl RedisFanout {
    pub async fn connect(url: &str) -> RedisResult<Self> {
        let client = Client::open(url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        Ok(Self {
            client,
            conn,
            origin: Uuid::new_v4(),
        })
    }

    pub fn origin(&self) -> Uuid {
        self.origin
    }

    pub async fn publish(&self, conversation_id: i64, payload: &str) -> RedisResult<()> {
        let envelope = Envelope {
            origin: self.origin,
            payload: payload.to_string(),
        };
        let body = serde_json::to_string(&envelope).unwrap_or_default();
        let mut conn = self.conn.clone();
        conn.publish::<_, _, ()>(channel_for_conversation(conversation_id), body)
            .await
    }

    /// Forward envelopes from other instances to local subscribers. Never
    /// returns: a dropped subscription is re-established after a delay.
    pub async fn run_listener(self, registry: ConnectionRegistry) {
        let mut delay = INITIAL_RETRY_DELAY;
        loop {
            match self.listen(&registry, &mut delay).await {
                Ok(()) => tracing::warn!(
                    origin = %self.origin,
                    retry_in_ms = delay.as_millis() as u64,
                    "redis fan-out subscription ended, reconnecting"
                ),
                Err(e) => tracing::error!(
                    error = %e,
                    origin = %self.origin,
                    retry_in_ms = delay.as_millis() as u64,
                    "redis fan-out listener failed, reconnecting"
                ),
            }
            tokio::time::sleep(delay).await;
            delay = next_retry_delay(delay);
        }
    }

    /// One subscription, until the stream ends. Resets `delay` once subscribed.
    async fn listen(&self, registry: &ConnectionRegistry, delay: &mut Duration) -> RedisResult<()> {
        // PubSub requires a dedicated connection, not multiplexed
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.psubscribe(format!("{CHANNEL_PREFIX}*")).await?;
        tracing::info!(origin = %self.origin, "redis fan-out listener subscribed");
        *delay = INITIAL_RETRY_DELAY;

        let mut stream = pubsub.on_message();
        while let Some(msg) = stream.next().await {
            let channel = msg.get_channel_name().to_string();
            let payload: String = match msg.get_payload() {
                Ok(payload) => payload,
                Err(e) => {
                    tracing::warn!(error = %e, %channel, "unreadable pub/sub payload");
                    continue;
                }
            };
            if let Some((conversation_id, inner)) = accept(&channel, &payload, self.origin) {
                registry.broadcast(conversation_id, inner).await;
            }
        }
        Ok(())
    }
}

/// Conversation id and event payload of an envelope published elsewhere
fn accept(channel: &str, payload: &str, own_origin: Uuid) -> Option<(i64, String)> {
    let conversation_id = channel.strip_prefix(CHANNEL_PREFIX)?.parse::<i64>().ok()?;
    let envelope: Envelope = serde_json::from_str(payload).ok()?;
    if envelope.origin == own_origin {
        return None;
    }
    Some((conversation_id, envelope.payload))
}

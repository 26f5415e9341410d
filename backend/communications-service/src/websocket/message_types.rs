use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::MessageView;

/// Inbound WebSocket events from client to server
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WsInboundEvent {
    #[serde(rename = "message.send")]
    MessageSend {
        #[serde(default)]
        text: String,
        #[serde(default)]
        files: Vec<InlineFile>,
    },
    #[serde(rename = "typing")]
    Typing,
}

/// A file sent inline over the socket
#[derive(Debug, Serialize, Deserialize)]
pub struct InlineFile {
    pub name: String,
    /// Base64 (standard alphabet) file content
    pub data: String,
}

/// Outbound WebSocket events from server to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WsOutboundEvent {
    #[serde(rename = "message.broadcast")]
    MessageBroadcast { message: BroadcastMessage },
    #[serde(rename = "typing")]
    Typing { user_id: i64, conversation_id: i64 },
    #[serde(rename = "error")]
    Error { reason: String },
}

impl WsOutboundEvent {
    pub fn to_json(&self) -> String {
        // Every variant is plain data; serialization cannot fail
        serde_json::to_string(self).unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BroadcastMessage {
    pub id: i64,
    pub sender_id: Option<i64>,
    /// Sender's display name
    pub sender_username: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub attachments: Vec<AttachmentDescriptor>,
    pub is_system: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttachmentDescriptor {
    pub id: i64,
    pub url: String,
    pub name: String,
}

impl From<&MessageView> for BroadcastMessage {
    fn from(view: &MessageView) -> Self {
        Self {
            id: view.message.id,
            sender_id: view.message.sender_id,
            sender_username: view.sender_label(),
            content: view.message.content.clone(),
            created_at: view.message.created_at,
            attachments: view
                .attachments
                .iter()
                .map(|a| AttachmentDescriptor {
                    id: a.id,
                    url: a.url(),
                    name: a.original_name.clone(),
                })
                .collect(),
            is_system: view.message.is_system,
        }
    }
}

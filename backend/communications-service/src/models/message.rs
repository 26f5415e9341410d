use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Message {
    pub id: i64,
    pub conversation_id: i64,
    /// None for system messages and removed accounts
    pub sender_id: Option<i64>,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub edited: bool,
    pub is_system: bool,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Attachment {
    pub id: i64,
    pub message_id: i64,
    /// Relative to the media root
    pub file_path: String,
    pub original_name: String,
    pub uploaded_at: DateTime<Utc>,
}

impl Attachment {
    pub fn url(&self) -> String {
        format!("/api/v1/attachments/{}", self.id)
    }
}

/// A message with what readers need to render it
#[derive(Debug, Clone)]
pub struct MessageView {
    pub message: Message,
    pub sender_name: Option<String>,
    pub attachments: Vec<Attachment>,
}

impl MessageView {
    pub fn sender_label(&self) -> String {
        match (&self.sender_name, self.message.is_system) {
            (Some(name), _) => name.clone(),
            (None, true) => "System".to_string(),
            (None, false) => "Deleted user".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewAttachment {
    pub file_path: String,
    pub original_name: String,
}

#[derive(Debug, Clone)]
pub struct NewMessage {
    pub conversation_id: i64,
    pub sender_id: Option<i64>,
    pub content: String,
    pub is_system: bool,
    pub attachments: Vec<NewAttachment>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct SearchHit {
    pub id: i64,
    pub conversation_id: i64,
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(skip)]
    pub rank: f32,
}

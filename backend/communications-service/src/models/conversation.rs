use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Conversation {
    pub id: i64,
    /// Empty means unnamed
    pub name: String,
    pub is_group: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    pub fn title(&self) -> String {
        if self.name.trim().is_empty() {
            format!("Conversation {}", self.id)
        } else {
            self.name.clone()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct Participant {
    pub id: i64,
    pub username: String,
    pub display_name: String,
}

/// A conversation with its participants in join order
#[derive(Debug, Clone, Serialize)]
pub struct ConversationView {
    #[serde(flatten)]
    pub conversation: Conversation,
    pub title: String,
    pub participants: Vec<Participant>,
}

impl ConversationView {
    pub fn new(conversation: Conversation, participants: Vec<Participant>) -> Self {
        Self {
            title: conversation.title(),
            conversation,
            participants,
        }
    }
}

/// Validated input for creating a conversation
#[derive(Debug, Clone)]
pub struct NewConversation {
    pub name: String,
    pub is_group: bool,
    /// Creator first, no duplicates
    pub participant_ids: Vec<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unnamed_conversation_title() {
        let now = Utc::now();
        let mut conv = Conversation {
            id: 5,
            name: String::new(),
            is_group: false,
            created_at: now,
            updated_at: now,
        };
        assert_eq!(conv.title(), "Conversation 5");
        conv.name = "Year 7 parents".into();
        assert_eq!(conv.title(), "Year 7 parents");
    }
}

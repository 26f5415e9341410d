//! Persistence behind a trait so services and handlers can run against
//! PostgreSQL in production and an in-process store in tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::error::AppResult;
use crate::models::{
    Attachment, Conversation, Message, MessageFlag, MessageView, NewConversation, NewMessage,
    Participant, SearchHit, UserAccount,
};

pub mod memory;
pub mod postgres;

pub use memory::MemoryChatStore;
pub use postgres::PgChatStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationFilter {
    /// Most recently active first (the default ordering)
    Recent,
    /// Only conversations with at least one message
    Active,
}

#[derive(Debug, Clone, Default)]
pub struct ConversationQuery {
    /// Case-insensitive match on the name or any participant's username
    pub q: Option<String>,
    pub filter: Option<ConversationFilter>,
}

impl ConversationQuery {
    pub fn search_term(&self) -> Option<&str> {
        self.q.as_deref().map(str::trim).filter(|q| !q.is_empty())
    }

    pub fn only_active(&self) -> bool {
        self.filter == Some(ConversationFilter::Active)
    }
}

#[async_trait]
pub trait ChatStore: Send + Sync {
    async fn find_user(&self, id: i64) -> AppResult<Option<UserAccount>>;

    /// Accounts for the given ids; unknown ids are absent from the result
    async fn find_users(&self, ids: &[i64]) -> AppResult<Vec<UserAccount>>;

    async fn create_conversation(&self, new: NewConversation) -> AppResult<Conversation>;

    async fn get_conversation(&self, id: i64) -> AppResult<Option<Conversation>>;

    /// Participants in join order
    async fn participants(&self, conversation_id: i64) -> AppResult<Vec<Participant>>;

    async fn participant_accounts(&self, conversation_id: i64) -> AppResult<Vec<UserAccount>>;

    async fn is_participant(&self, conversation_id: i64, user_id: i64) -> AppResult<bool>;

    /// Conversations of `user_id`, most recently active first
    async fn list_conversations(
        &self,
        user_id: i64,
        query: &ConversationQuery,
    ) -> AppResult<Vec<Conversation>>;

    /// Insert the message and its attachments and bump the conversation's
    /// `updated_at` to the message's `created_at`, all in one transaction.
    async fn insert_message(&self, new: NewMessage) -> AppResult<MessageView>;

    /// Messages with id strictly greater than `after`, ascending
    async fn messages_after(
        &self,
        conversation_id: i64,
        after: Option<i64>,
    ) -> AppResult<Vec<MessageView>>;

    /// The latest `limit` messages, oldest first
    async fn recent_messages(&self, conversation_id: i64, limit: i64)
        -> AppResult<Vec<MessageView>>;

    async fn get_message(&self, id: i64) -> AppResult<Option<Message>>;

    async fn get_attachment(&self, id: i64) -> AppResult<Option<Attachment>>;

    /// Full-text search over the conversations `user_id` participates in
    async fn search_messages(
        &self,
        user_id: i64,
        query: &str,
        conversation_id: Option<i64>,
        limit: i64,
    ) -> AppResult<Vec<SearchHit>>;

    async fn create_flag(
        &self,
        message_id: i64,
        flagged_by: i64,
        reason: &str,
    ) -> AppResult<MessageFlag>;

    async fn list_flags(&self, unresolved_only: bool) -> AppResult<Vec<MessageFlag>>;

    /// Resolve every flag in `ids` or none of them. Flags that are already
    /// resolved keep their resolver and timestamp.
    async fn resolve_flags(
        &self,
        ids: &[i64],
        resolver: i64,
        at: DateTime<Utc>,
    ) -> AppResult<Vec<MessageFlag>>;
}

/// Sorted, de-duplicated copy of a batch of ids
pub(crate) fn unique_ids(ids: &[i64]) -> Vec<i64> {
    let mut ids = ids.to_vec();
    ids.sort_unstable();
    ids.dedup();
    ids
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_search_term_is_none() {
        let query = ConversationQuery {
            q: Some("   ".into()),
            filter: None,
        };
        assert_eq!(query.search_term(), None);
        assert!(!query.only_active());
    }

    #[test]
    fn unique_ids_dedups() {
        assert_eq!(unique_ids(&[3, 1, 3, 2]), vec![1, 2, 3]);
    }
}

//! In-process store with the same observable semantics as `PgChatStore`.
//! Backs the test suites; full-text search is approximated by word matching.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;

use super::{unique_ids, ChatStore, ConversationQuery};
use crate::error::{AppError, AppResult};
use crate::models::{
    Attachment, Conversation, Message, MessageFlag, MessageView, NewConversation, NewMessage,
    Participant, SearchHit, UserAccount,
};

#[derive(Default)]
struct Inner {
    users: BTreeMap<i64, UserAccount>,
    conversations: BTreeMap<i64, Conversation>,
    participants: HashMap<i64, Vec<i64>>,
    messages: BTreeMap<i64, Message>,
    attachments: BTreeMap<i64, Attachment>,
    flags: BTreeMap<i64, MessageFlag>,
    next_conversation_id: i64,
    next_message_id: i64,
    next_attachment_id: i64,
    next_flag_id: i64,
}

impl Inner {
    fn view(&self, message: &Message) -> MessageView {
        MessageView {
            message: message.clone(),
            sender_name: message
                .sender_id
                .and_then(|id| self.users.get(&id))
                .map(UserAccount::display_name),
            attachments: self
                .attachments
                .values()
                .filter(|a| a.message_id == message.id)
                .cloned()
                .collect(),
        }
    }

    fn is_participant(&self, conversation_id: i64, user_id: i64) -> bool {
        self.participants
            .get(&conversation_id)
            .is_some_and(|ids| ids.contains(&user_id))
    }

    fn matches_term(&self, conversation: &Conversation, term: &str) -> bool {
        let term = term.to_lowercase();
        if conversation.name.to_lowercase().contains(&term) {
            return true;
        }
        self.participants
            .get(&conversation.id)
            .into_iter()
            .flatten()
            .filter_map(|id| self.users.get(id))
            .any(|u| u.username.to_lowercase().contains(&term))
    }
}

fn next(counter: &mut i64) -> i64 {
    *counter += 1;
    *counter
}

fn words(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

#[derive(Default)]
pub struct MemoryChatStore {
    inner: Mutex<Inner>,
    fail_message_inserts: AtomicBool,
}

impl MemoryChatStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an account into the directory
    pub async fn insert_user(&self, user: UserAccount) {
        self.inner.lock().await.users.insert(user.id, user);
    }

    /// Make subsequent `insert_message` calls fail, as a lost database would
    pub fn fail_message_inserts(&self, fail: bool) {
        self.fail_message_inserts.store(fail, Ordering::SeqCst);
    }

    pub async fn message_count(&self) -> usize {
        self.inner.lock().await.messages.len()
    }
}

#[async_trait]
impl ChatStore for MemoryChatStore {
    async fn find_user(&self, id: i64) -> AppResult<Option<UserAccount>> {
        Ok(self.inner.lock().await.users.get(&id).cloned())
    }

    async fn find_users(&self, ids: &[i64]) -> AppResult<Vec<UserAccount>> {
        let inner = self.inner.lock().await;
        Ok(unique_ids(ids)
            .iter()
            .filter_map(|id| inner.users.get(id).cloned())
            .collect())
    }

    async fn create_conversation(&self, new: NewConversation) -> AppResult<Conversation> {
        let mut inner = self.inner.lock().await;
        let now = Utc::now();
        let conversation = Conversation {
            id: next(&mut inner.next_conversation_id),
            name: new.name,
            is_group: new.is_group,
            created_at: now,
            updated_at: now,
        };

        let mut members: Vec<i64> = Vec::with_capacity(new.participant_ids.len());
        for id in new.participant_ids {
            if !members.contains(&id) {
                members.push(id);
            }
        }
        inner.participants.insert(conversation.id, members);
        inner
            .conversations
            .insert(conversation.id, conversation.clone());
        Ok(conversation)
    }

    async fn get_conversation(&self, id: i64) -> AppResult<Option<Conversation>> {
        Ok(self.inner.lock().await.conversations.get(&id).cloned())
    }

    async fn participants(&self, conversation_id: i64) -> AppResult<Vec<Participant>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .participants
            .get(&conversation_id)
            .into_iter()
            .flatten()
            .filter_map(|id| inner.users.get(id))
            .map(|u| Participant {
                id: u.id,
                username: u.username.clone(),
                display_name: u.display_name(),
            })
            .collect())
    }

    async fn participant_accounts(&self, conversation_id: i64) -> AppResult<Vec<UserAccount>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .participants
            .get(&conversation_id)
            .into_iter()
            .flatten()
            .filter_map(|id| inner.users.get(id).cloned())
            .collect())
    }

    async fn is_participant(&self, conversation_id: i64, user_id: i64) -> AppResult<bool> {
        Ok(self
            .inner
            .lock()
            .await
            .is_participant(conversation_id, user_id))
    }

    async fn list_conversations(
        &self,
        user_id: i64,
        query: &ConversationQuery,
    ) -> AppResult<Vec<Conversation>> {
        let inner = self.inner.lock().await;
        let mut conversations: Vec<Conversation> = inner
            .conversations
            .values()
            .filter(|c| inner.is_participant(c.id, user_id))
            .filter(|c| {
                query
                    .search_term()
                    .map_or(true, |term| inner.matches_term(c, term))
            })
            .filter(|c| {
                !query.only_active()
                    || inner.messages.values().any(|m| m.conversation_id == c.id)
            })
            .cloned()
            .collect();
        conversations.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(b.id.cmp(&a.id)));
        Ok(conversations)
    }

    async fn insert_message(&self, new: NewMessage) -> AppResult<MessageView> {
        if self.fail_message_inserts.load(Ordering::SeqCst) {
            return Err(AppError::Database(sqlx::Error::PoolTimedOut));
        }

        let mut inner = self.inner.lock().await;
        if !inner.conversations.contains_key(&new.conversation_id) {
            return Err(AppError::ConversationNotFound(new.conversation_id));
        }

        let created_at = Utc::now();
        let message = Message {
            id: next(&mut inner.next_message_id),
            conversation_id: new.conversation_id,
            sender_id: new.sender_id,
            content: new.content,
            created_at,
            edited: false,
            is_system: new.is_system,
        };

        for file in new.attachments {
            let id = next(&mut inner.next_attachment_id);
            inner.attachments.insert(
                id,
                Attachment {
                    id,
                    message_id: message.id,
                    file_path: file.file_path,
                    original_name: file.original_name,
                    uploaded_at: created_at,
                },
            );
        }

        if let Some(conversation) = inner.conversations.get_mut(&new.conversation_id) {
            conversation.updated_at = created_at;
        }
        inner.messages.insert(message.id, message.clone());
        Ok(inner.view(&message))
    }

    async fn messages_after(
        &self,
        conversation_id: i64,
        after: Option<i64>,
    ) -> AppResult<Vec<MessageView>> {
        let inner = self.inner.lock().await;
        let after = after.unwrap_or(0);
        Ok(inner
            .messages
            .range(after.saturating_add(1)..)
            .map(|(_, m)| m)
            .filter(|m| m.conversation_id == conversation_id)
            .map(|m| inner.view(m))
            .collect())
    }

    async fn recent_messages(
        &self,
        conversation_id: i64,
        limit: i64,
    ) -> AppResult<Vec<MessageView>> {
        let inner = self.inner.lock().await;
        let mut latest: Vec<MessageView> = inner
            .messages
            .values()
            .rev()
            .filter(|m| m.conversation_id == conversation_id)
            .take(limit.max(0) as usize)
            .map(|m| inner.view(m))
            .collect();
        latest.reverse();
        Ok(latest)
    }

    async fn get_message(&self, id: i64) -> AppResult<Option<Message>> {
        Ok(self.inner.lock().await.messages.get(&id).cloned())
    }

    async fn get_attachment(&self, id: i64) -> AppResult<Option<Attachment>> {
        Ok(self.inner.lock().await.attachments.get(&id).cloned())
    }

    async fn search_messages(
        &self,
        user_id: i64,
        query: &str,
        conversation_id: Option<i64>,
        limit: i64,
    ) -> AppResult<Vec<SearchHit>> {
        let terms = words(query);
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let inner = self.inner.lock().await;
        let mut hits: Vec<SearchHit> = inner
            .messages
            .values()
            .filter(|m| conversation_id.map_or(true, |c| m.conversation_id == c))
            .filter(|m| inner.is_participant(m.conversation_id, user_id))
            .filter_map(|m| {
                let content = words(&m.content);
                if !terms.iter().all(|t| content.contains(t)) {
                    return None;
                }
                let occurrences = content.iter().filter(|w| terms.contains(w)).count();
                Some(SearchHit {
                    id: m.id,
                    conversation_id: m.conversation_id,
                    content: m.content.clone(),
                    created_at: m.created_at,
                    rank: occurrences as f32 / content.len().max(1) as f32,
                })
            })
            .collect();

        hits.sort_by(|a, b| {
            b.rank
                .total_cmp(&a.rank)
                .then(b.created_at.cmp(&a.created_at))
                .then(b.id.cmp(&a.id))
        });
        hits.truncate(limit.max(0) as usize);
        Ok(hits)
    }

    async fn create_flag(
        &self,
        message_id: i64,
        flagged_by: i64,
        reason: &str,
    ) -> AppResult<MessageFlag> {
        let mut inner = self.inner.lock().await;
        if !inner.messages.contains_key(&message_id) {
            return Err(AppError::MessageNotFound(message_id));
        }
        let flag = MessageFlag {
            id: next(&mut inner.next_flag_id),
            message_id,
            flagged_by: Some(flagged_by),
            reason: reason.to_string(),
            created_at: Utc::now(),
            resolved: false,
            resolved_by: None,
            resolved_at: None,
        };
        inner.flags.insert(flag.id, flag.clone());
        Ok(flag)
    }

    async fn list_flags(&self, unresolved_only: bool) -> AppResult<Vec<MessageFlag>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .flags
            .values()
            .rev()
            .filter(|f| !unresolved_only || !f.resolved)
            .cloned()
            .collect())
    }

    async fn resolve_flags(
        &self,
        ids: &[i64],
        resolver: i64,
        at: DateTime<Utc>,
    ) -> AppResult<Vec<MessageFlag>> {
        let ids = unique_ids(ids);
        let mut inner = self.inner.lock().await;

        // Validate the whole batch before touching anything
        if let Some(missing) = ids.iter().find(|id| !inner.flags.contains_key(id)) {
            return Err(AppError::FlagNotFound(*missing));
        }

        let mut resolved = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(flag) = inner.flags.get_mut(&id) {
                if !flag.resolved {
                    flag.resolved = true;
                    flag.resolved_by = Some(resolver);
                    flag.resolved_at = Some(at);
                }
                resolved.push(flag.clone());
            }
        }
        Ok(resolved)
    }
}

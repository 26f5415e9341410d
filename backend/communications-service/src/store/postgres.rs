use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use std::collections::{HashMap, HashSet};

use super::{unique_ids, ChatStore, ConversationQuery};
use crate::error::{AppError, AppResult};
use crate::models::{
    Attachment, Conversation, Message, MessageFlag, MessageView, NewConversation, NewMessage,
    Participant, SearchHit, UserAccount,
};

/// Mirrors `account::display_name` for rows joined as `u`
const DISPLAY_NAME: &str =
    "COALESCE(NULLIF(BTRIM(BTRIM(u.first_name) || ' ' || BTRIM(u.last_name)), ''), u.username)";

const USER_COLUMNS: &str =
    "id, username, first_name, last_name, email, role, email_notify, is_active";

const MESSAGE_COLUMNS: &str =
    "id, conversation_id, sender_id, content, created_at, edited, is_system";

const FLAG_COLUMNS: &str =
    "id, message_id, flagged_by, reason, created_at, resolved, resolved_by, resolved_at";

const MIN_SEARCH_RANK: f32 = 0.01;

#[derive(sqlx::FromRow)]
struct MessageRow {
    #[sqlx(flatten)]
    message: Message,
    sender_name: Option<String>,
}

fn message_select() -> String {
    format!(
        "SELECT m.id, m.conversation_id, m.sender_id, m.content, m.created_at, m.edited, \
         m.is_system, {DISPLAY_NAME} AS sender_name \
         FROM messages m LEFT JOIN users u ON u.id = m.sender_id"
    )
}

/// Escape LIKE metacharacters so user input matches literally
fn like_pattern(term: &str) -> String {
    let escaped = term
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{escaped}%")
}

#[derive(Clone)]
pub struct PgChatStore {
    pool: PgPool,
}

impl PgChatStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn with_attachments(&self, rows: Vec<MessageRow>) -> AppResult<Vec<MessageView>> {
        let ids: Vec<i64> = rows.iter().map(|r| r.message.id).collect();
        let mut by_message: HashMap<i64, Vec<Attachment>> = HashMap::new();
        if !ids.is_empty() {
            let attachments = sqlx::query_as::<_, Attachment>(
                "SELECT id, message_id, file_path, original_name, uploaded_at \
                 FROM message_attachments WHERE message_id = ANY($1) ORDER BY id",
            )
            .bind(&ids)
            .fetch_all(&self.pool)
            .await?;
            for attachment in attachments {
                by_message
                    .entry(attachment.message_id)
                    .or_default()
                    .push(attachment);
            }
        }

        Ok(rows
            .into_iter()
            .map(|row| MessageView {
                attachments: by_message.remove(&row.message.id).unwrap_or_default(),
                message: row.message,
                sender_name: row.sender_name,
            })
            .collect())
    }

    async fn insert_attachments(
        tx: &mut Transaction<'_, Postgres>,
        message_id: i64,
        new: &NewMessage,
    ) -> AppResult<Vec<Attachment>> {
        let mut attachments = Vec::with_capacity(new.attachments.len());
        for file in &new.attachments {
            let attachment = sqlx::query_as::<_, Attachment>(
                "INSERT INTO message_attachments (message_id, file_path, original_name) \
                 VALUES ($1, $2, $3) \
                 RETURNING id, message_id, file_path, original_name, uploaded_at",
            )
            .bind(message_id)
            .bind(&file.file_path)
            .bind(&file.original_name)
            .fetch_one(&mut **tx)
            .await?;
            attachments.push(attachment);
        }
        Ok(attachments)
    }
}

#[async_trait]
impl ChatStore for PgChatStore {
    async fn find_user(&self, id: i64) -> AppResult<Option<UserAccount>> {
        let user = sqlx::query_as::<_, UserAccount>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn find_users(&self, ids: &[i64]) -> AppResult<Vec<UserAccount>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let users = sqlx::query_as::<_, UserAccount>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = ANY($1) ORDER BY id"
        ))
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;
        Ok(users)
    }

    async fn create_conversation(&self, new: NewConversation) -> AppResult<Conversation> {
        let mut tx = self.pool.begin().await?;

        let conversation = sqlx::query_as::<_, Conversation>(
            "INSERT INTO conversations (name, is_group) VALUES ($1, $2) \
             RETURNING id, name, is_group, created_at, updated_at",
        )
        .bind(&new.name)
        .bind(new.is_group)
        .fetch_one(&mut *tx)
        .await?;

        for (position, user_id) in new.participant_ids.iter().enumerate() {
            sqlx::query(
                "INSERT INTO conversation_participants (conversation_id, user_id, position) \
                 VALUES ($1, $2, $3) ON CONFLICT DO NOTHING",
            )
            .bind(conversation.id)
            .bind(user_id)
            .bind(position as i32)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(conversation)
    }

    async fn get_conversation(&self, id: i64) -> AppResult<Option<Conversation>> {
        let conversation = sqlx::query_as::<_, Conversation>(
            "SELECT id, name, is_group, created_at, updated_at FROM conversations WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(conversation)
    }

    async fn participants(&self, conversation_id: i64) -> AppResult<Vec<Participant>> {
        let participants = sqlx::query_as::<_, Participant>(&format!(
            "SELECT u.id, u.username, {DISPLAY_NAME} AS display_name \
             FROM conversation_participants cp JOIN users u ON u.id = cp.user_id \
             WHERE cp.conversation_id = $1 ORDER BY cp.position, cp.joined_at"
        ))
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(participants)
    }

    async fn participant_accounts(&self, conversation_id: i64) -> AppResult<Vec<UserAccount>> {
        let users = sqlx::query_as::<_, UserAccount>(
            "SELECT u.id, u.username, u.first_name, u.last_name, u.email, u.role, \
             u.email_notify, u.is_active \
             FROM conversation_participants cp JOIN users u ON u.id = cp.user_id \
             WHERE cp.conversation_id = $1 ORDER BY cp.position",
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(users)
    }

    async fn is_participant(&self, conversation_id: i64, user_id: i64) -> AppResult<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM conversation_participants \
             WHERE conversation_id = $1 AND user_id = $2)",
        )
        .bind(conversation_id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn list_conversations(
        &self,
        user_id: i64,
        query: &ConversationQuery,
    ) -> AppResult<Vec<Conversation>> {
        let pattern = query.search_term().map(like_pattern);
        let conversations = sqlx::query_as::<_, Conversation>(
            r#"
            SELECT c.id, c.name, c.is_group, c.created_at, c.updated_at
            FROM conversations c
            JOIN conversation_participants me
              ON me.conversation_id = c.id AND me.user_id = $1
            WHERE ($2::TEXT IS NULL
                   OR c.name ILIKE $2
                   OR EXISTS (
                       SELECT 1 FROM conversation_participants cp
                       JOIN users u ON u.id = cp.user_id
                       WHERE cp.conversation_id = c.id AND u.username ILIKE $2))
              AND (NOT $3 OR EXISTS (SELECT 1 FROM messages m WHERE m.conversation_id = c.id))
            ORDER BY c.updated_at DESC, c.id DESC
            "#,
        )
        .bind(user_id)
        .bind(pattern)
        .bind(query.only_active())
        .fetch_all(&self.pool)
        .await?;
        Ok(conversations)
    }

    async fn insert_message(&self, new: NewMessage) -> AppResult<MessageView> {
        let mut tx = self.pool.begin().await?;

        let message = sqlx::query_as::<_, Message>(&format!(
            "INSERT INTO messages (conversation_id, sender_id, content, is_system) \
             VALUES ($1, $2, $3, $4) RETURNING {MESSAGE_COLUMNS}"
        ))
        .bind(new.conversation_id)
        .bind(new.sender_id)
        .bind(&new.content)
        .bind(new.is_system)
        .fetch_one(&mut *tx)
        .await?;

        let attachments = Self::insert_attachments(&mut tx, message.id, &new).await?;

        sqlx::query("UPDATE conversations SET updated_at = $2 WHERE id = $1")
            .bind(message.conversation_id)
            .bind(message.created_at)
            .execute(&mut *tx)
            .await?;

        let sender_name: Option<String> = match message.sender_id {
            Some(sender_id) => {
                sqlx::query_scalar(&format!("SELECT {DISPLAY_NAME} FROM users u WHERE u.id = $1"))
                    .bind(sender_id)
                    .fetch_optional(&mut *tx)
                    .await?
            }
            None => None,
        };

        tx.commit().await?;

        Ok(MessageView {
            message,
            sender_name,
            attachments,
        })
    }

    async fn messages_after(
        &self,
        conversation_id: i64,
        after: Option<i64>,
    ) -> AppResult<Vec<MessageView>> {
        let rows = sqlx::query_as::<_, MessageRow>(&format!(
            "{} WHERE m.conversation_id = $1 AND m.id > $2 ORDER BY m.id ASC",
            message_select()
        ))
        .bind(conversation_id)
        .bind(after.unwrap_or(0))
        .fetch_all(&self.pool)
        .await?;
        self.with_attachments(rows).await
    }

    async fn recent_messages(
        &self,
        conversation_id: i64,
        limit: i64,
    ) -> AppResult<Vec<MessageView>> {
        let rows = sqlx::query_as::<_, MessageRow>(&format!(
            "SELECT * FROM ({} WHERE m.conversation_id = $1 ORDER BY m.id DESC LIMIT $2) latest \
             ORDER BY id ASC",
            message_select()
        ))
        .bind(conversation_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        self.with_attachments(rows).await
    }

    async fn get_message(&self, id: i64) -> AppResult<Option<Message>> {
        let message = sqlx::query_as::<_, Message>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(message)
    }

    async fn get_attachment(&self, id: i64) -> AppResult<Option<Attachment>> {
        let attachment = sqlx::query_as::<_, Attachment>(
            "SELECT id, message_id, file_path, original_name, uploaded_at \
             FROM message_attachments WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(attachment)
    }

    async fn search_messages(
        &self,
        user_id: i64,
        query: &str,
        conversation_id: Option<i64>,
        limit: i64,
    ) -> AppResult<Vec<SearchHit>> {
        let hits = sqlx::query_as::<_, SearchHit>(
            r#"
            SELECT m.id, m.conversation_id, m.content, m.created_at,
                   ts_rank(m.search_vector, plainto_tsquery('english', $1)) AS rank
            FROM messages m
            JOIN conversation_participants cp
              ON cp.conversation_id = m.conversation_id AND cp.user_id = $2
            WHERE m.search_vector @@ plainto_tsquery('english', $1)
              AND ($3::BIGINT IS NULL OR m.conversation_id = $3)
              AND ts_rank(m.search_vector, plainto_tsquery('english', $1)) >= $4
            ORDER BY rank DESC, m.created_at DESC
            LIMIT $5
            "#,
        )
        .bind(query)
        .bind(user_id)
        .bind(conversation_id)
        .bind(MIN_SEARCH_RANK)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(hits)
    }

    async fn create_flag(
        &self,
        message_id: i64,
        flagged_by: i64,
        reason: &str,
    ) -> AppResult<MessageFlag> {
        let flag = sqlx::query_as::<_, MessageFlag>(&format!(
            "INSERT INTO message_flags (message_id, flagged_by, reason) VALUES ($1, $2, $3) \
             RETURNING {FLAG_COLUMNS}"
        ))
        .bind(message_id)
        .bind(flagged_by)
        .bind(reason)
        .fetch_one(&self.pool)
        .await?;
        Ok(flag)
    }

    async fn list_flags(&self, unresolved_only: bool) -> AppResult<Vec<MessageFlag>> {
        let flags = sqlx::query_as::<_, MessageFlag>(&format!(
            "SELECT {FLAG_COLUMNS} FROM message_flags \
             WHERE (NOT $1 OR NOT resolved) ORDER BY created_at DESC, id DESC"
        ))
        .bind(unresolved_only)
        .fetch_all(&self.pool)
        .await?;
        Ok(flags)
    }

    async fn resolve_flags(
        &self,
        ids: &[i64],
        resolver: i64,
        at: DateTime<Utc>,
    ) -> AppResult<Vec<MessageFlag>> {
        let ids = unique_ids(ids);
        let mut tx = self.pool.begin().await?;

        let found: HashSet<i64> = sqlx::query_scalar::<_, i64>(
            "SELECT id FROM message_flags WHERE id = ANY($1) FOR UPDATE",
        )
        .bind(&ids)
        .fetch_all(&mut *tx)
        .await?
        .into_iter()
        .collect();

        // Dropping the transaction rolls it back
        if let Some(missing) = ids.iter().find(|id| !found.contains(id)) {
            return Err(AppError::FlagNotFound(*missing));
        }

        sqlx::query(
            "UPDATE message_flags SET resolved = TRUE, resolved_by = $2, resolved_at = $3 \
             WHERE id = ANY($1) AND NOT resolved",
        )
        .bind(&ids)
        .bind(resolver)
        .bind(at)
        .execute(&mut *tx)
        .await?;

        let flags = sqlx::query_as::<_, MessageFlag>(&format!(
            "SELECT {FLAG_COLUMNS} FROM message_flags WHERE id = ANY($1) ORDER BY id"
        ))
        .bind(&ids)
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(flags)
    }
}

use std::sync::Arc;

use actix_middleware::AuthenticatedActor;
use chrono::Utc;

use crate::error::{AppError, AppResult};
use crate::middleware::guards::Moderator;
use crate::models::flag::MAX_REASON_LEN;
use crate::models::MessageFlag;
use crate::store::ChatStore;

#[derive(Clone)]
pub struct ModerationService {
    store: Arc<dyn ChatStore>,
}

impl ModerationService {
    pub fn new(store: Arc<dyn ChatStore>) -> Self {
        Self { store }
    }

    /// Anyone who can see the message may report it.
    pub async fn flag(
        &self,
        actor: &AuthenticatedActor,
        message_id: i64,
        reason: &str,
    ) -> AppResult<MessageFlag> {
        let message = self
            .store
            .get_message(message_id)
            .await?
            .ok_or(AppError::MessageNotFound(message_id))?;

        let can_see = actor.role.can_moderate()
            || self
                .store
                .is_participant(message.conversation_id, actor.user_id)
                .await?;
        if !can_see {
            return Err(AppError::NotParticipant);
        }

        let reason: String = reason.trim().chars().take(MAX_REASON_LEN).collect();
        let flag = self
            .store
            .create_flag(message_id, actor.user_id, &reason)
            .await?;
        tracing::info!(flag_id = flag.id, message_id, flagged_by = actor.user_id, "message flagged");
        Ok(flag)
    }

    pub async fn list(
        &self,
        actor: &AuthenticatedActor,
        unresolved_only: bool,
    ) -> AppResult<Vec<MessageFlag>> {
        Moderator::verify(actor)?;
        self.store.list_flags(unresolved_only).await
    }

    /// All-or-nothing: an unknown id fails the batch and changes nothing.
    pub async fn resolve(
        &self,
        actor: &AuthenticatedActor,
        flag_ids: &[i64],
    ) -> AppResult<Vec<MessageFlag>> {
        let moderator = Moderator::verify(actor)?;
        if flag_ids.is_empty() {
            return Err(AppError::BadRequest("flag_ids must not be empty".into()));
        }

        let flags = self
            .store
            .resolve_flags(flag_ids, moderator.user_id, Utc::now())
            .await?;
        tracing::info!(
            count = flags.len(),
            resolved_by = moderator.user_id,
            "flags resolved"
        );
        Ok(flags)
    }
}

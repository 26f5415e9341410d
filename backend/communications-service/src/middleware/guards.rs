//! Participation checks shared by the socket gate and the REST handlers

use actix_middleware::AuthenticatedActor;

use crate::error::{AppError, AppResult};
use crate::models::Conversation;
use crate::store::ChatStore;

/// A caller verified to be a current participant of a conversation
#[derive(Debug, Clone)]
pub struct ConversationMember {
    pub user_id: i64,
    pub conversation: Conversation,
}

impl ConversationMember {
    /// Missing conversation is 404, non-participant is 403.
    pub async fn verify(
        store: &dyn ChatStore,
        user_id: i64,
        conversation_id: i64,
    ) -> AppResult<Self> {
        let conversation = store
            .get_conversation(conversation_id)
            .await?
            .ok_or(AppError::ConversationNotFound(conversation_id))?;

        if !store.is_participant(conversation_id, user_id).await? {
            return Err(AppError::NotParticipant);
        }

        Ok(Self {
            user_id,
            conversation,
        })
    }
}

/// A caller allowed to review and resolve moderation flags
#[derive(Debug, Clone)]
pub struct Moderator {
    pub user_id: i64,
}

impl Moderator {
    pub fn verify(actor: &AuthenticatedActor) -> AppResult<Self> {
        if !actor.role.can_moderate() {
            return Err(AppError::ModeratorRequired);
        }
        Ok(Self {
            user_id: actor.user_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_middleware::Role;

    fn actor(role: Role) -> AuthenticatedActor {
        AuthenticatedActor {
            user_id: 1,
            role,
            username: "someone".into(),
        }
    }

    #[test]
    fn only_admins_moderate() {
        assert!(Moderator::verify(&actor(Role::Admin)).is_ok());
        for role in [Role::Teacher, Role::Accountant, Role::Parent, Role::Student] {
            assert!(matches!(
                Moderator::verify(&actor(role)),
                Err(AppError::ModeratorRequired)
            ));
        }
    }
}

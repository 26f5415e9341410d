use std::sync::Arc;

use actix_middleware::AuthenticatedActor;
use serde::Deserialize;

use crate::error::{AppError, AppResult};
use crate::middleware::guards::ConversationMember;
use crate::models::{ConversationView, MessageView, NewConversation};
use crate::services::delivery::DeliveryService;
use crate::store::{ChatStore, ConversationQuery};

/// Messages shown on the conversation detail view
pub const DETAIL_MESSAGE_LIMIT: i64 = 100;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateConversation {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub participant_ids: Vec<i64>,
    /// Defaults to "more than two participants"
    pub is_group: Option<bool>,
}

#[derive(Clone)]
pub struct ConversationService {
    store: Arc<dyn ChatStore>,
    delivery: DeliveryService,
}

impl ConversationService {
    pub fn new(store: Arc<dyn ChatStore>, delivery: DeliveryService) -> Self {
        Self { store, delivery }
    }

    /// The creator joins first; unknown and repeated ids are skipped.
    pub async fn create(
        &self,
        actor: &AuthenticatedActor,
        request: CreateConversation,
    ) -> AppResult<ConversationView> {
        let creator = self
            .store
            .find_user(actor.user_id)
            .await?
            .ok_or(AppError::Unauthorized)?;

        let known: Vec<i64> = self
            .store
            .find_users(&request.participant_ids)
            .await?
            .into_iter()
            .map(|u| u.id)
            .collect();

        let mut participant_ids = vec![creator.id];
        for id in request.participant_ids {
            if known.contains(&id) && !participant_ids.contains(&id) {
                participant_ids.push(id);
            }
        }

        let name = request.name.trim().to_string();
        if name.chars().count() > 255 {
            return Err(AppError::BadRequest(
                "name must be at most 255 characters".into(),
            ));
        }

        let is_group = request.is_group.unwrap_or(participant_ids.len() > 2);
        let conversation = self
            .store
            .create_conversation(NewConversation {
                name,
                is_group,
                participant_ids,
            })
            .await?;

        tracing::info!(
            conversation_id = conversation.id,
            creator = creator.id,
            is_group,
            "conversation created"
        );

        self.delivery
            .post_system_message(
                conversation.id,
                &format!("{} started the conversation", creator.display_name()),
            )
            .await?;

        // Re-read so updated_at reflects the system message
        let conversation = self
            .store
            .get_conversation(conversation.id)
            .await?
            .unwrap_or(conversation);
        let participants = self.store.participants(conversation.id).await?;
        Ok(ConversationView::new(conversation, participants))
    }

    pub async fn list(
        &self,
        actor: &AuthenticatedActor,
        query: &ConversationQuery,
    ) -> AppResult<Vec<ConversationView>> {
        let conversations = self
            .store
            .list_conversations(actor.user_id, query)
            .await?;

        let mut views = Vec::with_capacity(conversations.len());
        for conversation in conversations {
            let participants = self.store.participants(conversation.id).await?;
            views.push(ConversationView::new(conversation, participants));
        }
        Ok(views)
    }

    /// Conversation, participants, and its latest messages oldest first
    pub async fn detail(
        &self,
        actor: &AuthenticatedActor,
        conversation_id: i64,
    ) -> AppResult<(ConversationView, Vec<MessageView>)> {
        let member =
            ConversationMember::verify(self.store.as_ref(), actor.user_id, conversation_id)
                .await?;
        let participants = self.store.participants(conversation_id).await?;
        let messages = self
            .store
            .recent_messages(conversation_id, DETAIL_MESSAGE_LIMIT)
            .await?;
        Ok((
            ConversationView::new(member.conversation, participants),
            messages,
        ))
    }

    /// Messages after the cursor, ascending. Repeating a pull with the same
    /// cursor returns the same list until something new is sent.
    pub async fn history(
        &self,
        actor: &AuthenticatedActor,
        conversation_id: i64,
        after: Option<i64>,
    ) -> AppResult<Vec<MessageView>> {
        ConversationMember::verify(self.store.as_ref(), actor.user_id, conversation_id).await?;
        self.store.messages_after(conversation_id, after).await
    }
}

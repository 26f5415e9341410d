//! Accepting a send: validate, store files, persist, broadcast, notify.

use std::sync::Arc;

use crate::config::EmptyMessagePolicy;
use crate::error::{AppError, AppResult};
use crate::metrics::{EMPTY_SUBMISSIONS_DROPPED_TOTAL, MESSAGES_DELIVERED_TOTAL};
use crate::middleware::guards::ConversationMember;
use crate::models::{MessageView, NewAttachment, NewMessage};
use crate::services::attachment_storage::{AttachmentStorage, UploadedFile};
use crate::services::notification::NotificationService;
use crate::store::ChatStore;
use crate::websocket::message_types::{BroadcastMessage, WsOutboundEvent};
use crate::websocket::Broadcaster;

#[derive(Debug, Clone)]
pub struct SendRequest {
    pub conversation_id: i64,
    pub sender_id: i64,
    pub text: String,
    pub files: Vec<UploadedFile>,
}

#[derive(Debug)]
pub enum DeliveryOutcome {
    Delivered(MessageView),
    /// Empty submission dropped under the `ignore` policy
    Dropped,
}

#[derive(Clone)]
pub struct DeliveryService {
    store: Arc<dyn ChatStore>,
    storage: Arc<dyn AttachmentStorage>,
    broadcaster: Broadcaster,
    notifications: NotificationService,
    policy: EmptyMessagePolicy,
    max_upload_bytes: usize,
}

impl DeliveryService {
    pub fn new(
        store: Arc<dyn ChatStore>,
        storage: Arc<dyn AttachmentStorage>,
        broadcaster: Broadcaster,
        notifications: NotificationService,
        policy: EmptyMessagePolicy,
        max_upload_bytes: usize,
    ) -> Self {
        Self {
            store,
            storage,
            broadcaster,
            notifications,
            policy,
            max_upload_bytes,
        }
    }

    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_bytes
    }

    pub async fn send(&self, request: SendRequest) -> AppResult<DeliveryOutcome> {
        ConversationMember::verify(
            self.store.as_ref(),
            request.sender_id,
            request.conversation_id,
        )
        .await?;

        let text = request.text.trim();
        if text.is_empty() && request.files.is_empty() {
            return match self.policy {
                EmptyMessagePolicy::Ignore => {
                    EMPTY_SUBMISSIONS_DROPPED_TOTAL.inc();
                    tracing::debug!(
                        conversation_id = request.conversation_id,
                        sender_id = request.sender_id,
                        "empty submission dropped"
                    );
                    Ok(DeliveryOutcome::Dropped)
                }
                EmptyMessagePolicy::Reject => Err(AppError::EmptyMessage),
            };
        }

        let total: usize = request.files.iter().map(|f| f.bytes.len()).sum();
        if total > self.max_upload_bytes {
            return Err(AppError::PayloadTooLarge {
                limit: self.max_upload_bytes,
            });
        }

        let attachments = self.store_files(&request.files).await?;
        let new = NewMessage {
            conversation_id: request.conversation_id,
            sender_id: Some(request.sender_id),
            content: text.to_string(),
            is_system: false,
            attachments: attachments.clone(),
        };

        let view = match self.store.insert_message(new).await {
            Ok(view) => view,
            Err(e) => {
                self.discard_files(&attachments).await;
                return Err(e);
            }
        };

        self.publish(&view, "user").await;
        self.notifications.dispatch(&view);

        Ok(DeliveryOutcome::Delivered(view))
    }

    /// Post a message with no sender. Broadcast like any other, never notified.
    pub async fn post_system_message(
        &self,
        conversation_id: i64,
        text: &str,
    ) -> AppResult<MessageView> {
        let view = self
            .store
            .insert_message(NewMessage {
                conversation_id,
                sender_id: None,
                content: text.trim().to_string(),
                is_system: true,
                attachments: Vec::new(),
            })
            .await?;
        self.publish(&view, "system").await;
        Ok(view)
    }

    /// Ephemeral: not persisted, not replayed.
    pub async fn typing(&self, conversation_id: i64, user_id: i64) {
        let event = WsOutboundEvent::Typing {
            user_id,
            conversation_id,
        };
        self.broadcaster.publish(conversation_id, &event).await;
    }

    async fn publish(&self, view: &MessageView, origin: &str) {
        let event = WsOutboundEvent::MessageBroadcast {
            message: BroadcastMessage::from(view),
        };
        let reached = self
            .broadcaster
            .publish(view.message.conversation_id, &event)
            .await;
        MESSAGES_DELIVERED_TOTAL.with_label_values(&[origin]).inc();
        tracing::debug!(
            message_id = view.message.id,
            conversation_id = view.message.conversation_id,
            reached,
            "message broadcast"
        );
    }

    async fn store_files(&self, files: &[UploadedFile]) -> AppResult<Vec<NewAttachment>> {
        let mut stored = Vec::with_capacity(files.len());
        for file in files {
            match self.storage.save(file).await {
                Ok(attachment) => stored.push(attachment),
                Err(e) => {
                    self.discard_files(&stored).await;
                    return Err(e);
                }
            }
        }
        Ok(stored)
    }

    async fn discard_files(&self, attachments: &[NewAttachment]) {
        for attachment in attachments {
            if let Err(e) = self.storage.remove(&attachment.file_path).await {
                tracing::warn!(
                    error = %e,
                    file_path = %attachment.file_path,
                    "could not remove orphaned attachment"
                );
            }
        }
    }
}

pub mod attachment_storage;
pub mod conversation_service;
pub mod delivery;
pub mod moderation;
pub mod notification;
pub mod search;

pub use attachment_storage::{AttachmentStorage, LocalAttachmentStorage, UploadedFile};
pub use conversation_service::{ConversationService, CreateConversation};
pub use delivery::{DeliveryOutcome, DeliveryService, SendRequest};
pub use moderation::ModerationService;
pub use notification::{EmailNotifier, NotificationService, Notifier};
pub use search::SearchService;

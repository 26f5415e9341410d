pub mod account;
pub mod conversation;
pub mod flag;
pub mod message;

pub use account::UserAccount;
pub use conversation::{Conversation, ConversationView, NewConversation, Participant};
pub use flag::MessageFlag;
pub use message::{Attachment, Message, MessageView, NewAttachment, NewMessage, SearchHit};

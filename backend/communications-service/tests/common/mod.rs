#![allow(dead_code)]

use actix_middleware::Role;
use async_trait::async_trait;
use chrono::Duration;
use communications_service::config::{Config, EmptyMessagePolicy};
use communications_service::error::AppResult;
use communications_service::models::{NewConversation, UserAccount};
use communications_service::services::{LocalAttachmentStorage, Notifier};
use communications_service::state::AppState;
use communications_service::store::{ChatStore, MemoryChatStore};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::{mpsc, Mutex};

pub const ADMIN: i64 = 1;
pub const TEACHER: i64 = 2;
pub const PARENT: i64 = 3;
pub const OUTSIDER: i64 = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentEmail {
    pub recipient: String,
    pub subject: String,
    pub body: String,
}

/// Captures notification emails instead of sending them
pub struct RecordingNotifier {
    tx: mpsc::UnboundedSender<SentEmail>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, recipient: &str, subject: &str, body: &str) -> AppResult<()> {
        let _ = self.tx.send(SentEmail {
            recipient: recipient.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
        });
        Ok(())
    }
}

pub struct TestContext {
    pub store: Arc<MemoryChatStore>,
    pub state: AppState,
    pub emails: Mutex<mpsc::UnboundedReceiver<SentEmail>>,
    pub media: TempDir,
}

pub fn account(id: i64, username: &str, first: &str, last: &str, role: Role) -> UserAccount {
    UserAccount {
        id,
        username: username.to_string(),
        first_name: first.to_string(),
        last_name: last.to_string(),
        email: Some(format!("{username}@school.test")),
        role: role.as_str().to_string(),
        email_notify: true,
        is_active: true,
    }
}

impl TestContext {
    pub async fn new() -> Self {
        Self::with_policy(EmptyMessagePolicy::Ignore).await
    }

    pub async fn with_policy(policy: EmptyMessagePolicy) -> Self {
        let media = TempDir::new().expect("tempdir");
        let mut config = Config::test_defaults(media.path().to_path_buf());
        config.empty_message_policy = policy;
        config.max_upload_bytes = 1024;

        let store = Arc::new(MemoryChatStore::new());
        store
            .insert_user(account(ADMIN, "admin", "Ada", "Okoro", Role::Admin))
            .await;
        store
            .insert_user(account(TEACHER, "mrs.bello", "Funmi", "Bello", Role::Teacher))
            .await;
        store
            .insert_user(account(PARENT, "tunde", "", "", Role::Parent))
            .await;
        store
            .insert_user(account(OUTSIDER, "stranger", "Sam", "Stone", Role::Student))
            .await;

        let (tx, rx) = mpsc::unbounded_channel();
        let state = AppState::build(
            Arc::new(config),
            store.clone() as Arc<dyn ChatStore>,
            Arc::new(LocalAttachmentStorage::new(media.path())),
            Arc::new(RecordingNotifier { tx }),
            None,
        )
        .expect("state");

        Self {
            store,
            state,
            emails: Mutex::new(rx),
            media,
        }
    }

    /// Conversation between the teacher and the parent, no system message
    pub async fn teacher_parent_conversation(&self) -> i64 {
        self.store
            .create_conversation(NewConversation {
                name: String::new(),
                is_group: false,
                participant_ids: vec![TEACHER, PARENT],
            })
            .await
            .expect("conversation")
            .id
    }

    pub fn token(&self, user_id: i64, role: Role, username: &str) -> String {
        self.state
            .jwt
            .issue(user_id, role, username, Duration::hours(1))
            .expect("token")
    }

    pub fn actor(&self, user_id: i64, role: Role) -> actix_middleware::AuthenticatedActor {
        actix_middleware::AuthenticatedActor {
            user_id,
            role,
            username: format!("user{user_id}"),
        }
    }

    /// Next captured email, waiting briefly for the background task
    pub async fn next_email(&self) -> Option<SentEmail> {
        let mut rx = self.emails.lock().await;
        tokio::time::timeout(std::time::Duration::from_millis(500), rx.recv())
            .await
            .ok()
            .flatten()
    }
}

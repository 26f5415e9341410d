//! PostgreSQL store checks. Need a scratch database:
//!
//! TEST_DATABASE_URL=postgres://localhost/communications_test cargo test -- --ignored

use chrono::Utc;
use communications_service::db::init_pool;
use communications_service::error::AppError;
use communications_service::models::{NewAttachment, NewConversation, NewMessage};
use communications_service::store::{ChatStore, PgChatStore};
use uuid::Uuid;

async fn store() -> PgChatStore {
    let url = std::env::var("TEST_DATABASE_URL").expect("TEST_DATABASE_URL not set");
    PgChatStore::new(init_pool(&url, 2).await.expect("database"))
}

async fn seed_user(store: &PgChatStore, role: &str) -> i64 {
    let username = format!("user_{}", Uuid::new_v4().simple());
    sqlx::query_scalar(
        "INSERT INTO users (username, first_name, last_name, email, role) \
         VALUES ($1, 'Test', 'User', $1 || '@school.test', $2) RETURNING id",
    )
    .bind(&username)
    .bind(role)
    .fetch_one(store.pool())
    .await
    .expect("seed user")
}

async fn conversation(store: &PgChatStore, members: Vec<i64>) -> i64 {
    store
        .create_conversation(NewConversation {
            name: String::new(),
            is_group: members.len() > 2,
            participant_ids: members,
        })
        .await
        .expect("conversation")
        .id
}

fn text(conversation_id: i64, sender_id: i64, content: &str) -> NewMessage {
    NewMessage {
        conversation_id,
        sender_id: Some(sender_id),
        content: content.to_string(),
        is_system: false,
        attachments: Vec::new(),
    }
}

#[tokio::test]
#[ignore]
async fn insert_message_bumps_conversation_and_keeps_attachments() {
    let store = store().await;
    let teacher = seed_user(&store, "teacher").await;
    let parent = seed_user(&store, "parent").await;
    let conversation_id = conversation(&store, vec![teacher, parent]).await;

    let mut new = text(conversation_id, teacher, "Report attached");
    new.attachments.push(NewAttachment {
        file_path: "message_uploads/2024/01/02/abc_report.pdf".into(),
        original_name: "report.pdf".into(),
    });
    let view = store.insert_message(new).await.unwrap();
    assert_eq!(view.attachments.len(), 1);
    assert_eq!(view.sender_name.as_deref(), Some("Test User"));

    let conversation = store
        .get_conversation(conversation_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(conversation.updated_at, view.message.created_at);

    let participants = store.participants(conversation_id).await.unwrap();
    assert_eq!(
        participants.iter().map(|p| p.id).collect::<Vec<_>>(),
        vec![teacher, parent]
    );
}

#[tokio::test]
#[ignore]
async fn messages_after_cursor_are_ascending() {
    let store = store().await;
    let teacher = seed_user(&store, "teacher").await;
    let parent = seed_user(&store, "parent").await;
    let conversation_id = conversation(&store, vec![teacher, parent]).await;

    let first = store
        .insert_message(text(conversation_id, teacher, "one"))
        .await
        .unwrap();
    let second = store
        .insert_message(text(conversation_id, parent, "two"))
        .await
        .unwrap();

    let after = store
        .messages_after(conversation_id, Some(first.message.id))
        .await
        .unwrap();
    assert_eq!(after.len(), 1);
    assert_eq!(after[0].message.id, second.message.id);
}

#[tokio::test]
#[ignore]
async fn full_text_search_only_sees_own_conversations() {
    let store = store().await;
    let teacher = seed_user(&store, "teacher").await;
    let parent = seed_user(&store, "parent").await;
    let outsider = seed_user(&store, "student").await;
    let conversation_id = conversation(&store, vec![teacher, parent]).await;
    let marker = format!("xylophone{}", Uuid::new_v4().simple());

    store
        .insert_message(text(conversation_id, teacher, &format!("Bring the {marker} tomorrow")))
        .await
        .unwrap();

    let hits = store
        .search_messages(parent, &marker, None, 50)
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);

    let hits = store
        .search_messages(outsider, &marker, None, 50)
        .await
        .unwrap();
    assert!(hits.is_empty());
}

#[tokio::test]
#[ignore]
async fn resolve_flags_rolls_back_on_unknown_id() {
    let store = store().await;
    let teacher = seed_user(&store, "teacher").await;
    let parent = seed_user(&store, "parent").await;
    let admin = seed_user(&store, "admin").await;
    let conversation_id = conversation(&store, vec![teacher, parent]).await;
    let message = store
        .insert_message(text(conversation_id, teacher, "hello"))
        .await
        .unwrap();
    let flag = store
        .create_flag(message.message.id, parent, "spam")
        .await
        .unwrap();

    let err = store
        .resolve_flags(&[flag.id, i64::MAX], admin, Utc::now())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::FlagNotFound(id) if id == i64::MAX));

    let open = store.list_flags(true).await.unwrap();
    assert!(open.iter().any(|f| f.id == flag.id));

    let resolved = store
        .resolve_flags(&[flag.id], admin, Utc::now())
        .await
        .unwrap();
    assert_eq!(resolved[0].resolved_by, Some(admin));
}

mod common;

use actix_middleware::Role;
use common::{TestContext, ADMIN, OUTSIDER, PARENT, TEACHER};
use communications_service::error::AppError;
use communications_service::services::{DeliveryOutcome, SendRequest};

async fn post(ctx: &TestContext, conversation_id: i64, sender_id: i64, text: &str) -> i64 {
    match ctx
        .state
        .delivery
        .send(SendRequest {
            conversation_id,
            sender_id,
            text: text.to_string(),
            files: Vec::new(),
        })
        .await
        .unwrap()
    {
        DeliveryOutcome::Delivered(view) => view.message.id,
        DeliveryOutcome::Dropped => panic!("message dropped"),
    }
}

#[tokio::test]
async fn participant_can_flag_and_admin_sees_it() {
    let ctx = TestContext::new().await;
    let conversation_id = ctx.teacher_parent_conversation().await;
    let message_id = post(&ctx, conversation_id, TEACHER, "rude words").await;

    let flag = ctx
        .state
        .moderation
        .flag(&ctx.actor(PARENT, Role::Parent), message_id, "  offensive  ")
        .await
        .unwrap();
    assert_eq!(flag.message_id, message_id);
    assert_eq!(flag.flagged_by, PARENT);
    assert_eq!(flag.reason, "offensive");
    assert!(!flag.resolved);

    let open = ctx
        .state
        .moderation
        .list(&ctx.actor(ADMIN, Role::Admin), true)
        .await
        .unwrap();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].id, flag.id);
}

#[tokio::test]
async fn outsider_cannot_flag_unseen_message() {
    let ctx = TestContext::new().await;
    let conversation_id = ctx.teacher_parent_conversation().await;
    let message_id = post(&ctx, conversation_id, TEACHER, "hello").await;

    let err = ctx
        .state
        .moderation
        .flag(&ctx.actor(OUTSIDER, Role::Student), message_id, "spam")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotParticipant));

    let err = ctx
        .state
        .moderation
        .flag(&ctx.actor(PARENT, Role::Parent), 9999, "spam")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::MessageNotFound(9999)));
}

#[tokio::test]
async fn long_reasons_are_truncated() {
    let ctx = TestContext::new().await;
    let conversation_id = ctx.teacher_parent_conversation().await;
    let message_id = post(&ctx, conversation_id, TEACHER, "hello").await;

    let flag = ctx
        .state
        .moderation
        .flag(&ctx.actor(PARENT, Role::Parent), message_id, &"x".repeat(400))
        .await
        .unwrap();
    assert_eq!(flag.reason.chars().count(), 255);
}

#[tokio::test]
async fn only_admins_review_flags() {
    let ctx = TestContext::new().await;
    let teacher = ctx.actor(TEACHER, Role::Teacher);

    let err = ctx.state.moderation.list(&teacher, false).await.unwrap_err();
    assert!(matches!(err, AppError::ModeratorRequired));

    let err = ctx
        .state
        .moderation
        .resolve(&teacher, &[1])
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::ModeratorRequired));
}

#[tokio::test]
async fn resolving_is_all_or_nothing() {
    let ctx = TestContext::new().await;
    let admin = ctx.actor(ADMIN, Role::Admin);
    let parent = ctx.actor(PARENT, Role::Parent);
    let conversation_id = ctx.teacher_parent_conversation().await;
    let message_id = post(&ctx, conversation_id, TEACHER, "hello").await;

    let first = ctx
        .state
        .moderation
        .flag(&parent, message_id, "one")
        .await
        .unwrap();
    let second = ctx
        .state
        .moderation
        .flag(&parent, message_id, "two")
        .await
        .unwrap();

    let err = ctx
        .state
        .moderation
        .resolve(&admin, &[first.id, 777])
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::FlagNotFound(777)));
    let open = ctx.state.moderation.list(&admin, true).await.unwrap();
    assert_eq!(open.len(), 2);

    let resolved = ctx
        .state
        .moderation
        .resolve(&admin, &[first.id, second.id])
        .await
        .unwrap();
    assert_eq!(resolved.len(), 2);
    assert!(resolved.iter().all(|f| f.resolved));
    assert!(resolved.iter().all(|f| f.resolved_by == Some(ADMIN)));
    assert!(resolved.iter().all(|f| f.resolved_at.is_some()));
    assert!(ctx.state.moderation.list(&admin, true).await.unwrap().is_empty());
}

#[tokio::test]
async fn re_resolving_keeps_original_resolver() {
    let ctx = TestContext::new().await;
    let admin = ctx.actor(ADMIN, Role::Admin);
    let conversation_id = ctx.teacher_parent_conversation().await;
    let message_id = post(&ctx, conversation_id, TEACHER, "hello").await;
    let flag = ctx
        .state
        .moderation
        .flag(&ctx.actor(PARENT, Role::Parent), message_id, "spam")
        .await
        .unwrap();

    let first = ctx
        .state
        .moderation
        .resolve(&admin, &[flag.id])
        .await
        .unwrap();

    let mut other_admin = admin.clone();
    other_admin.user_id = 99;
    let second = ctx
        .state
        .moderation
        .resolve(&other_admin, &[flag.id])
        .await
        .unwrap();
    assert_eq!(second[0].resolved_by, Some(ADMIN));
    assert_eq!(second[0].resolved_at, first[0].resolved_at);
}

#[tokio::test]
async fn empty_resolve_batch_is_rejected() {
    let ctx = TestContext::new().await;
    let err = ctx
        .state
        .moderation
        .resolve(&ctx.actor(ADMIN, Role::Admin), &[])
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::BadRequest(_)));
}

#[tokio::test]
async fn search_is_scoped_to_own_conversations() {
    let ctx = TestContext::new().await;
    let conversation_id = ctx.teacher_parent_conversation().await;
    let hit = post(&ctx, conversation_id, TEACHER, "The science fair is on Friday").await;
    post(&ctx, conversation_id, PARENT, "Thanks for letting me know").await;

    let results = ctx
        .state
        .search
        .search(&ctx.actor(PARENT, Role::Parent), "science", None)
        .await
        .unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].id, hit);
    assert_eq!(results[0].conversation_id, conversation_id);

    let outsider = ctx
        .state
        .search
        .search(&ctx.actor(OUTSIDER, Role::Student), "science", None)
        .await
        .unwrap();
    assert!(outsider.is_empty());

    let blank = ctx
        .state
        .search
        .search(&ctx.actor(PARENT, Role::Parent), "   ", None)
        .await
        .unwrap();
    assert!(blank.is_empty());
}

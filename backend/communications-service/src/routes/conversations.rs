use actix_middleware::AuthenticatedActor;
use actix_web::{get, post, web, HttpResponse};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::routes::messages::MessageResponse;
use crate::services::CreateConversation;
use crate::state::AppState;
use crate::store::{ConversationFilter, ConversationQuery};

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub q: Option<String>,
    pub filter: Option<ConversationFilter>,
}

#[derive(Serialize)]
struct ConversationDetail<'a> {
    conversation: &'a crate::models::ConversationView,
    messages: Vec<MessageResponse>,
}

/// GET /api/v1/conversations
#[get("/conversations")]
pub async fn list_conversations(
    state: web::Data<AppState>,
    actor: AuthenticatedActor,
    query: web::Query<ListQuery>,
) -> Result<HttpResponse, AppError> {
    let query = query.into_inner();
    let query = ConversationQuery {
        q: query.q,
        filter: query.filter,
    };
    let conversations = state.conversations.list(&actor, &query).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "conversations": conversations })))
}

/// POST /api/v1/conversations
#[post("/conversations")]
pub async fn create_conversation(
    state: web::Data<AppState>,
    actor: AuthenticatedActor,
    body: web::Json<CreateConversation>,
) -> Result<HttpResponse, AppError> {
    let view = state.conversations.create(&actor, body.into_inner()).await?;
    Ok(HttpResponse::Created().json(view))
}

/// GET /api/v1/conversations/{id}
#[get("/conversations/{id}")]
pub async fn get_conversation(
    state: web::Data<AppState>,
    actor: AuthenticatedActor,
    path: web::Path<i64>,
) -> Result<HttpResponse, AppError> {
    let (conversation, messages) = state
        .conversations
        .detail(&actor, path.into_inner())
        .await?;
    let messages = messages
        .iter()
        .map(|m| MessageResponse::for_reader(m, actor.user_id))
        .collect();
    Ok(HttpResponse::Ok().json(ConversationDetail {
        conversation: &conversation,
        messages,
    }))
}

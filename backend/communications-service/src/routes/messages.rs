use actix_middleware::AuthenticatedActor;
use actix_multipart::{Field, Multipart};
use actix_web::http::header::{ContentDisposition, CONTENT_DISPOSITION};
use actix_web::{get, post, web, HttpResponse};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::AppError;
use crate::middleware::guards::ConversationMember;
use crate::models::MessageView;
use crate::routes::TIMESTAMP_FORMAT;
use crate::services::{DeliveryOutcome, SendRequest, UploadedFile};
use crate::state::AppState;
use crate::websocket::message_types::{AttachmentDescriptor, BroadcastMessage};

/// A message as its reader sees it in history and detail views
#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub id: i64,
    pub sender: String,
    pub content: String,
    pub timestamp: String,
    pub is_self: bool,
}

impl MessageResponse {
    pub fn for_reader(view: &MessageView, reader_id: i64) -> Self {
        Self {
            id: view.message.id,
            sender: view.sender_label(),
            content: view.message.content.clone(),
            timestamp: view.message.created_at.format(TIMESTAMP_FORMAT).to_string(),
            is_self: view.message.sender_id == Some(reader_id),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub after: Option<i64>,
}

/// GET /api/v1/conversations/{id}/messages?after=
#[get("/conversations/{id}/messages")]
pub async fn get_messages(
    state: web::Data<AppState>,
    actor: AuthenticatedActor,
    path: web::Path<i64>,
    query: web::Query<HistoryQuery>,
) -> Result<HttpResponse, AppError> {
    let messages: Vec<MessageResponse> = state
        .conversations
        .history(&actor, path.into_inner(), query.after)
        .await?
        .iter()
        .map(|m| MessageResponse::for_reader(m, actor.user_id))
        .collect();
    Ok(HttpResponse::Ok().json(json!({ "messages": messages })))
}

/// Cap on non-file fields. The upload limit covers file bytes only, same as
/// the delivery check.
const MAX_TEXT_BYTES: usize = 64 * 1024;

async fn read_field(field: &mut Field, budget: &mut usize, limit: usize) -> Result<Vec<u8>, AppError> {
    let mut bytes = Vec::new();
    while let Some(chunk) = field.next().await {
        let chunk = chunk.map_err(|e| AppError::BadRequest(format!("Multipart error: {e}")))?;
        if chunk.len() > *budget {
            return Err(AppError::PayloadTooLarge { limit });
        }
        *budget -= chunk.len();
        bytes.extend_from_slice(&chunk);
    }
    Ok(bytes)
}

/// POST /api/v1/conversations/{id}/messages
///
/// Multipart form with an optional `text` field and any number of `files`.
/// Parts without a file name are skipped.
#[post("/conversations/{id}/messages")]
pub async fn upload_message(
    state: web::Data<AppState>,
    actor: AuthenticatedActor,
    path: web::Path<i64>,
    mut payload: Multipart,
) -> Result<HttpResponse, AppError> {
    let conversation_id = path.into_inner();
    ConversationMember::verify(state.store.as_ref(), actor.user_id, conversation_id).await?;

    let limit = state.delivery.max_upload_bytes();
    let mut file_budget = limit;
    let mut text_budget = MAX_TEXT_BYTES;
    let mut text = String::new();
    let mut files = Vec::new();

    while let Some(item) = payload.next().await {
        let mut field = item.map_err(|e| AppError::BadRequest(format!("Multipart error: {e}")))?;
        let disposition = field
            .headers()
            .get(CONTENT_DISPOSITION)
            .and_then(|v| ContentDisposition::from_raw(v).ok());
        let name = disposition
            .as_ref()
            .and_then(|cd| cd.get_name())
            .unwrap_or_default()
            .to_string();
        let filename = disposition
            .as_ref()
            .and_then(|cd| cd.get_filename())
            .map(str::to_string);

        match (name.as_str(), filename) {
            ("files", Some(filename)) => {
                let bytes = read_field(&mut field, &mut file_budget, limit).await?;
                if filename.trim().is_empty() {
                    tracing::debug!(size = bytes.len(), "skipping file part without a name");
                    continue;
                }
                files.push(UploadedFile {
                    name: filename,
                    bytes,
                });
            }
            ("text", None) => {
                let bytes = read_field(&mut field, &mut text_budget, MAX_TEXT_BYTES).await?;
                text = String::from_utf8(bytes)
                    .map_err(|_| AppError::BadRequest("text must be UTF-8".into()))?;
            }
            (other, _) => {
                read_field(&mut field, &mut text_budget, MAX_TEXT_BYTES).await?;
                tracing::debug!(field = other, "ignoring unknown multipart field");
            }
        }
    }

    let outcome = state
        .delivery
        .send(SendRequest {
            conversation_id,
            sender_id: actor.user_id,
            text,
            files,
        })
        .await?;

    match outcome {
        DeliveryOutcome::Dropped => Ok(HttpResponse::NoContent().finish()),
        DeliveryOutcome::Delivered(view) => {
            let message = BroadcastMessage::from(&view);
            let attachments: Vec<AttachmentDescriptor> = message.attachments.clone();
            Ok(HttpResponse::Ok().json(json!({
                "success": true,
                "message": message,
                "attachments": attachments,
            })))
        }
    }
}

#[derive(Debug, Deserialize)]
struct FallbackSend {
    #[serde(default)]
    text: String,
}

fn failure(status: actix_web::http::StatusCode, reason: &str) -> HttpResponse {
    HttpResponse::build(status).json(json!({ "success": false, "error": reason }))
}

/// POST /api/v1/chat/{id}/send
///
/// JSON fallback for clients without a socket. Always answers with
/// `{"success": ..}` so those clients have a single shape to check.
#[post("/chat/{id}/send")]
pub async fn send_message(
    state: web::Data<AppState>,
    actor: AuthenticatedActor,
    path: web::Path<i64>,
    body: web::Bytes,
) -> Result<HttpResponse, AppError> {
    use actix_web::http::StatusCode;

    let Ok(request) = serde_json::from_slice::<FallbackSend>(&body) else {
        return Ok(failure(StatusCode::BAD_REQUEST, "Invalid JSON"));
    };

    let conversation_id = path.into_inner();
    let result = state
        .delivery
        .send(SendRequest {
            conversation_id,
            sender_id: actor.user_id,
            text: request.text,
            files: Vec::new(),
        })
        .await;

    match result {
        Ok(DeliveryOutcome::Delivered(view)) => Ok(HttpResponse::Ok().json(json!({
            "success": true,
            "message": {
                "id": view.message.id,
                "sender": view.sender_label(),
                "content": view.message.content,
                "timestamp": view.message.created_at.format(TIMESTAMP_FORMAT).to_string(),
            },
        }))),
        Ok(DeliveryOutcome::Dropped) | Err(AppError::EmptyMessage) => {
            Ok(failure(StatusCode::OK, "Empty message"))
        }
        Err(AppError::NotParticipant) => Ok(failure(StatusCode::FORBIDDEN, "Forbidden")),
        Err(e @ AppError::ConversationNotFound(_)) => {
            Ok(failure(StatusCode::NOT_FOUND, &e.to_string()))
        }
        Err(e) => Err(e),
    }
}

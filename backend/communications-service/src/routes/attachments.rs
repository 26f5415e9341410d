use actix_middleware::AuthenticatedActor;
use actix_web::http::header::{
    Charset, ContentDisposition, DispositionParam, DispositionType, ExtendedValue,
};
use actix_web::{get, web, HttpResponse};

use crate::error::AppError;
use crate::middleware::guards::ConversationMember;
use crate::services::attachment_storage::sanitize_file_name;
use crate::state::AppState;

/// GET /api/v1/attachments/{id}
///
/// Participants of the owning conversation only.
#[get("/attachments/{id}")]
pub async fn download_attachment(
    state: web::Data<AppState>,
    actor: AuthenticatedActor,
    path: web::Path<i64>,
) -> Result<HttpResponse, AppError> {
    let attachment_id = path.into_inner();
    let attachment = state
        .store
        .get_attachment(attachment_id)
        .await?
        .ok_or(AppError::AttachmentNotFound(attachment_id))?;
    let message = state
        .store
        .get_message(attachment.message_id)
        .await?
        .ok_or(AppError::AttachmentNotFound(attachment_id))?;

    ConversationMember::verify(state.store.as_ref(), actor.user_id, message.conversation_id)
        .await?;

    let bytes = match state.storage.open(&attachment.file_path).await {
        Ok(bytes) => bytes,
        Err(AppError::Storage(e)) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::warn!(attachment_id, file_path = %attachment.file_path, "attachment file missing");
            return Err(AppError::AttachmentNotFound(attachment_id));
        }
        Err(e) => return Err(e),
    };

    Ok(HttpResponse::Ok()
        .content_type(mime::APPLICATION_OCTET_STREAM)
        .insert_header(download_disposition(&attachment.original_name))
        .body(bytes))
}

/// `filename` carries an ASCII fallback, `filename*` the UTF-8 original.
fn download_disposition(name: &str) -> ContentDisposition {
    let mut parameters = Vec::with_capacity(2);
    if name.is_ascii() {
        parameters.push(DispositionParam::Filename(name.to_string()));
    } else {
        parameters.push(DispositionParam::Filename(sanitize_file_name(name)));
        parameters.push(DispositionParam::FilenameExt(ExtendedValue {
            charset: Charset::Ext("UTF-8".to_string()),
            language_tag: None,
            value: name.as_bytes().to_vec(),
        }));
    }
    ContentDisposition {
        disposition: DispositionType::Attachment,
        parameters,
    }
}

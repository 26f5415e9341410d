use crate::error::AppError;
use actix_web::{http::StatusCode, HttpResponse};
use error_types::{error_codes, error_types as kinds, reason_phrase, ErrorResponse};

/// Map domain errors to the shared error body
pub fn map_error(err: &AppError) -> (StatusCode, ErrorResponse) {
    let status =
        StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let (error_type, code) = match err {
        AppError::BadRequest(_) => (kinds::VALIDATION_ERROR, error_codes::INVALID_REQUEST),
        AppError::EmptyMessage => (kinds::VALIDATION_ERROR, error_codes::EMPTY_MESSAGE),
        AppError::PayloadTooLarge { .. } => {
            (kinds::VALIDATION_ERROR, error_codes::UPLOAD_TOO_LARGE)
        }
        AppError::Unauthorized => (kinds::AUTHENTICATION_ERROR, error_codes::TOKEN_INVALID),
        AppError::NotParticipant => (
            kinds::AUTHORIZATION_ERROR,
            error_codes::NOT_CONVERSATION_PARTICIPANT,
        ),
        AppError::ModeratorRequired => {
            (kinds::AUTHORIZATION_ERROR, error_codes::MODERATOR_REQUIRED)
        }
        AppError::ConversationNotFound(_) => {
            (kinds::NOT_FOUND_ERROR, error_codes::CONVERSATION_NOT_FOUND)
        }
        AppError::MessageNotFound(_) => (kinds::NOT_FOUND_ERROR, error_codes::MESSAGE_NOT_FOUND),
        AppError::AttachmentNotFound(_) => {
            (kinds::NOT_FOUND_ERROR, error_codes::ATTACHMENT_NOT_FOUND)
        }
        AppError::FlagNotFound(_) => (kinds::NOT_FOUND_ERROR, error_codes::FLAG_NOT_FOUND),
        AppError::Database(_) => (kinds::SERVER_ERROR, error_codes::DATABASE_ERROR),
        AppError::Storage(_) => (kinds::SERVER_ERROR, error_codes::STORAGE_ERROR),
        AppError::ServiceUnavailable(_) => (
            kinds::SERVICE_UNAVAILABLE_ERROR,
            error_codes::SERVICE_UNAVAILABLE,
        ),
        AppError::Config(_) | AppError::StartServer(_) | AppError::Internal(_) => {
            (kinds::SERVER_ERROR, error_codes::INTERNAL_SERVER_ERROR)
        }
    };

    // Storage and database details stay in the logs
    let message = if status.is_server_error() {
        tracing::error!(error = %err, "request failed");
        reason_phrase(status.as_u16()).to_string()
    } else {
        err.to_string()
    };

    let response = ErrorResponse::new(
        reason_phrase(status.as_u16()),
        &message,
        status.as_u16(),
        error_type,
        code,
    );

    (status, response)
}

pub fn into_response(err: &AppError) -> HttpResponse {
    let (status, response) = map_error(err);
    HttpResponse::build(status).json(response)
}

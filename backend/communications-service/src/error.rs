use crate::middleware::error_handling;
use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("server start failure: {0}")]
    StartServer(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("Empty message")]
    EmptyMessage,

    #[error("upload exceeds {limit} bytes")]
    PayloadTooLarge { limit: usize },

    #[error("unauthorized")]
    Unauthorized,

    #[error("not a participant of this conversation")]
    NotParticipant,

    #[error("moderator role required")]
    ModeratorRequired,

    #[error("conversation {0} not found")]
    ConversationNotFound(i64),

    #[error("message {0} not found")]
    MessageNotFound(i64),

    #[error("attachment {0} not found")]
    AttachmentNotFound(i64),

    #[error("flag {0} not found")]
    FlagNotFound(i64),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("storage error: {0}")]
    Storage(#[from] std::io::Error),

    #[error("internal server error: {0}")]
    Internal(String),

    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
}

impl AppError {
    /// Returns HTTP status code
    pub fn status_code(&self) -> u16 {
        match self {
            AppError::BadRequest(_) | AppError::EmptyMessage => 400,
            AppError::Unauthorized => 401,
            AppError::NotParticipant | AppError::ModeratorRequired => 403,
            AppError::ConversationNotFound(_)
            | AppError::MessageNotFound(_)
            | AppError::AttachmentNotFound(_)
            | AppError::FlagNotFound(_) => 404,
            AppError::PayloadTooLarge { .. } => 413,
            AppError::ServiceUnavailable(_) => 503,
            AppError::Config(_)
            | AppError::StartServer(_)
            | AppError::Database(_)
            | AppError::Storage(_)
            | AppError::Internal(_) => 500,
        }
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        StatusCode::from_u16(AppError::status_code(self)).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    fn error_response(&self) -> HttpResponse {
        error_handling::into_response(self)
    }
}

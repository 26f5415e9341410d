//! Shared error response body used by every school portal HTTP service.
//!
//! Services keep their own error enums; this crate only fixes the wire shape
//! and the code/type vocabulary so clients can branch on them.

use serde::{Deserialize, Serialize};

/// Unified API error response body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Short reason phrase, e.g. "Not Found"
    pub error: String,

    /// Human readable message
    pub message: String,

    /// HTTP status code
    pub status: u16,

    /// Coarse error category, one of the constants in [`error_types`]
    pub error_type: String,

    /// Stable machine code, one of the constants in [`error_codes`]
    pub code: String,

    /// Request id for log correlation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,

    /// RFC 3339 timestamp
    pub timestamp: String,
}

impl ErrorResponse {
    pub fn new(error: &str, message: &str, status: u16, error_type: &str, code: &str) -> Self {
        Self {
            error: error.to_string(),
            message: message.to_string(),
            status,
            error_type: error_type.to_string(),
            code: code.to_string(),
            trace_id: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn with_trace_id(mut self, trace_id: String) -> Self {
        self.trace_id = Some(trace_id);
        self
    }
}

/// Reason phrase for the status codes our services emit.
pub fn reason_phrase(status: u16) -> &'static str {
    match status {
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        409 => "Conflict",
        413 => "Payload Too Large",
        503 => "Service Unavailable",
        500 => "Internal Server Error",
        _ => "Error",
    }
}

/// Standard error codes
pub mod error_codes {
    // Authentication
    pub const TOKEN_INVALID: &str = "TOKEN_INVALID";
    pub const TOKEN_MISSING: &str = "TOKEN_MISSING";

    // Communications
    pub const CONVERSATION_NOT_FOUND: &str = "CONVERSATION_NOT_FOUND";
    pub const MESSAGE_NOT_FOUND: &str = "MESSAGE_NOT_FOUND";
    pub const ATTACHMENT_NOT_FOUND: &str = "ATTACHMENT_NOT_FOUND";
    pub const FLAG_NOT_FOUND: &str = "FLAG_NOT_FOUND";
    pub const NOT_CONVERSATION_PARTICIPANT: &str = "NOT_CONVERSATION_PARTICIPANT";
    pub const MODERATOR_REQUIRED: &str = "MODERATOR_REQUIRED";
    pub const EMPTY_MESSAGE: &str = "EMPTY_MESSAGE";
    pub const UPLOAD_TOO_LARGE: &str = "UPLOAD_TOO_LARGE";

    // Generic
    pub const INVALID_REQUEST: &str = "INVALID_REQUEST";
    pub const RESOURCE_NOT_FOUND: &str = "RESOURCE_NOT_FOUND";
    pub const FORBIDDEN: &str = "FORBIDDEN";

    // Database/System
    pub const DATABASE_ERROR: &str = "DATABASE_ERROR";
    pub const STORAGE_ERROR: &str = "STORAGE_ERROR";
    pub const INTERNAL_SERVER_ERROR: &str = "INTERNAL_SERVER_ERROR";
    pub const SERVICE_UNAVAILABLE: &str = "SERVICE_UNAVAILABLE";
}

/// Standard error categories
pub mod error_types {
    pub const VALIDATION_ERROR: &str = "validation_error";
    pub const AUTHENTICATION_ERROR: &str = "authentication_error";
    pub const AUTHORIZATION_ERROR: &str = "authorization_error";
    pub const NOT_FOUND_ERROR: &str = "not_found_error";
    pub const SERVER_ERROR: &str = "server_error";
    pub const SERVICE_UNAVAILABLE_ERROR: &str = "service_unavailable_error";
}

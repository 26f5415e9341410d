//! # Actix Middleware Library
//!
//! Middleware shared by the school portal Actix services
//!
//! ## Modules
//! - `jwt_auth`: bearer token validation and the authenticated actor extractor
//! - `request_id`: X-Request-ID propagation

pub mod jwt_auth;
pub mod request_id;

pub use jwt_auth::{
    bearer_token, AuthError, AuthenticatedActor, Claims, JwtAuthMiddleware, JwtValidator, Role,
};
pub use request_id::{RequestId, RequestIdMiddleware};

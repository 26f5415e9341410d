//! Bearer token authentication.
//!
//! Tokens are issued by the account system and signed with a shared HS256
//! secret. The account's portal role is resolved once here and travels with
//! the request as [`AuthenticatedActor`], so handlers never look up profile
//! tables to find out who they are talking to.

use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    error::InternalError,
    Error, HttpMessage, HttpResponse,
};
use chrono::{Duration, Utc};
use error_types::{error_codes, error_types as kinds, ErrorResponse};
use futures::future::{ready, LocalBoxFuture, Ready};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::rc::Rc;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

use crate::request_id::RequestId;

const MIN_SECRET_LEN: usize = 32;

/// Portal role of an account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Teacher,
    Accountant,
    Parent,
    Student,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Teacher => "teacher",
            Role::Accountant => "accountant",
            Role::Parent => "parent",
            Role::Student => "student",
        }
    }

    /// Only administrators review and resolve moderation flags.
    pub fn can_moderate(&self) -> bool {
        matches!(self, Role::Admin)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = AuthError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "teacher" => Ok(Role::Teacher),
            "accountant" => Ok(Role::Accountant),
            "parent" => Ok(Role::Parent),
            "student" => Ok(Role::Student),
            other => Err(AuthError::UnknownRole(other.to_string())),
        }
    }
}

/// JWT claims issued by the account system
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    /// Account id as a decimal string
    pub sub: String,
    pub role: Role,
    pub username: String,
    pub iat: i64,
    pub exp: i64,
}

/// The caller of a request, resolved from its bearer token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedActor {
    pub user_id: i64,
    pub role: Role,
    pub username: String,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing bearer token")]
    MissingToken,

    #[error("invalid token: {0}")]
    InvalidToken(String),

    #[error("token subject is not an account id")]
    MalformedSubject,

    #[error("unknown role: {0}")]
    UnknownRole(String),

    #[error("jwt secret must be at least {MIN_SECRET_LEN} bytes")]
    WeakSecret,
}

/// Validates (and, for tooling and tests, issues) HS256 tokens.
pub struct JwtValidator {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl JwtValidator {
    pub fn from_secret(secret: &str) -> Result<Self, AuthError> {
        if secret.len() < MIN_SECRET_LEN {
            return Err(AuthError::WeakSecret);
        }
        Ok(Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        })
    }

    pub fn validate(&self, token: &str) -> Result<AuthenticatedActor, AuthError> {
        let data = decode::<Claims>(token, &self.decoding, &self.validation)
            .map_err(|e| AuthError::InvalidToken(e.to_string()))?;
        let user_id = data
            .claims
            .sub
            .parse::<i64>()
            .map_err(|_| AuthError::MalformedSubject)?;

        Ok(AuthenticatedActor {
            user_id,
            role: data.claims.role,
            username: data.claims.username,
        })
    }

    pub fn issue(
        &self,
        user_id: i64,
        role: Role,
        username: &str,
        ttl: Duration,
    ) -> Result<String, AuthError> {
        let now = Utc::now();
        let claims = Claims {
            sub: user_id.to_string(),
            role,
            username: username.to_string(),
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| AuthError::InvalidToken(e.to_string()))
    }
}

/// Extract the token from an `Authorization: Bearer <token>` header value.
pub fn bearer_token(header_value: &str) -> Option<&str> {
    header_value
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

fn unauthorized(err: &AuthError, trace_id: Option<String>) -> Error {
    let code = match err {
        AuthError::MissingToken => error_codes::TOKEN_MISSING,
        _ => error_codes::TOKEN_INVALID,
    };
    let body = ErrorResponse::new(
        "Unauthorized",
        &err.to_string(),
        401,
        kinds::AUTHENTICATION_ERROR,
        code,
    );
    let body = match trace_id {
        Some(trace_id) => body.with_trace_id(trace_id),
        None => body,
    };
    InternalError::from_response(err.to_string(), HttpResponse::Unauthorized().json(body)).into()
}

/// JWT Authentication Middleware
#[derive(Clone)]
pub struct JwtAuthMiddleware {
    validator: Arc<JwtValidator>,
}

impl JwtAuthMiddleware {
    pub fn new(validator: Arc<JwtValidator>) -> Self {
        Self { validator }
    }
}

impl<S, B> Transform<S, ServiceRequest> for JwtAuthMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Transform = JwtAuthMiddlewareService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(JwtAuthMiddlewareService {
            service: Rc::new(service),
            validator: self.validator.clone(),
        }))
    }
}

pub struct JwtAuthMiddlewareService<S> {
    service: Rc<S>,
    validator: Arc<JwtValidator>,
}

impl<S, B> Service<ServiceRequest> for JwtAuthMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = self.service.clone();
        let validator = self.validator.clone();

        Box::pin(async move {
            let trace_id = req
                .extensions()
                .get::<RequestId>()
                .map(|id| id.as_str().to_string());
            let token = req
                .headers()
                .get(actix_web::http::header::AUTHORIZATION)
                .and_then(|h| h.to_str().ok())
                .and_then(bearer_token)
                .ok_or_else(|| unauthorized(&AuthError::MissingToken, trace_id.clone()))?;

            let actor = validator.validate(token).map_err(|e| {
                tracing::warn!(error = %e, "JWT validation failed");
                unauthorized(&e, trace_id)
            })?;

            req.extensions_mut().insert(actor);

            service.call(req).await
        })
    }
}

impl actix_web::FromRequest for AuthenticatedActor {
    type Error = Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(
        req: &actix_web::HttpRequest,
        _payload: &mut actix_web::dev::Payload,
    ) -> Self::Future {
        match req.extensions().get::<AuthenticatedActor>() {
            Some(actor) => ready(Ok(actor.clone())),
            None => ready(Err(unauthorized(
                &AuthError::MissingToken,
                req.extensions().get::<RequestId>().map(|id| id.as_str().to_string()),
            ))),
        }
    }
}

use actix_middleware::AuthenticatedActor;
use actix_web::{get, post, web, HttpResponse};
use serde::Deserialize;
use serde_json::json;

use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct FlagRequest {
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct FlagListQuery {
    #[serde(default)]
    pub unresolved: bool,
}

#[derive(Debug, Deserialize)]
pub struct ResolveRequest {
    pub flag_ids: Vec<i64>,
}

/// POST /api/v1/messages/{id}/flags
#[post("/messages/{id}/flags")]
pub async fn flag_message(
    state: web::Data<AppState>,
    actor: AuthenticatedActor,
    path: web::Path<i64>,
    body: web::Json<FlagRequest>,
) -> Result<HttpResponse, AppError> {
    let flag = state
        .moderation
        .flag(&actor, path.into_inner(), &body.reason)
        .await?;
    Ok(HttpResponse::Created().json(flag))
}

/// GET /api/v1/flags?unresolved=true
#[get("/flags")]
pub async fn list_flags(
    state: web::Data<AppState>,
    actor: AuthenticatedActor,
    query: web::Query<FlagListQuery>,
) -> Result<HttpResponse, AppError> {
    let flags = state.moderation.list(&actor, query.unresolved).await?;
    Ok(HttpResponse::Ok().json(json!({ "flags": flags })))
}

/// POST /api/v1/flags/resolve
#[post("/flags/resolve")]
pub async fn resolve_flags(
    state: web::Data<AppState>,
    actor: AuthenticatedActor,
    body: web::Json<ResolveRequest>,
) -> Result<HttpResponse, AppError> {
    let flags = state.moderation.resolve(&actor, &body.flag_ids).await?;
    Ok(HttpResponse::Ok().json(json!({ "resolved": flags.len(), "flags": flags })))
}

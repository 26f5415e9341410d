use actix_middleware::AuthenticatedActor;
use actix_web::{get, web, HttpResponse};
use serde::Deserialize;
use serde_json::json;

use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub q: String,
    pub conversation: Option<i64>,
}

/// GET /api/v1/messages/search?q=&conversation=
#[get("/messages/search")]
pub async fn search_messages(
    state: web::Data<AppState>,
    actor: AuthenticatedActor,
    query: web::Query<SearchQuery>,
) -> Result<HttpResponse, AppError> {
    let results = state
        .search
        .search(&actor, &query.q, query.conversation)
        .await?;
    Ok(HttpResponse::Ok().json(json!({ "query": query.q.trim(), "results": results })))
}

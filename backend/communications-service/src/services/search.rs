use std::sync::Arc;

use actix_middleware::AuthenticatedActor;

use crate::error::AppResult;
use crate::models::SearchHit;
use crate::store::ChatStore;

pub const MAX_RESULTS: i64 = 50;

#[derive(Clone)]
pub struct SearchService {
    store: Arc<dyn ChatStore>,
}

impl SearchService {
    pub fn new(store: Arc<dyn ChatStore>) -> Self {
        Self { store }
    }

    /// Ranked matches from the actor's own conversations. Blank queries match nothing.
    pub async fn search(
        &self,
        actor: &AuthenticatedActor,
        query: &str,
        conversation_id: Option<i64>,
    ) -> AppResult<Vec<SearchHit>> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(Vec::new());
        }
        self.store
            .search_messages(actor.user_id, query, conversation_id, MAX_RESULTS)
            .await
    }
}

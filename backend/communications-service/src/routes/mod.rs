use actix_middleware::JwtAuthMiddleware;
use actix_web::web;

use crate::metrics;
use crate::state::AppState;

pub mod attachments;
pub mod conversations;
pub mod messages;
pub mod moderation;
pub mod search;
pub mod wsroute;

pub const TIMESTAMP_FORMAT: &str = "%b %d, %Y %H:%M";

/// Register every route. REST lives under `/api/v1` behind bearer auth;
/// the socket authenticates itself so it can read `?token=`.
pub fn configure(cfg: &mut web::ServiceConfig, state: &AppState) {
    cfg.route("/health", web::get().to(|| async { "OK" }))
        .route("/metrics", web::get().to(metrics::metrics_handler))
        .service(wsroute::ws_handler)
        .service(
            web::scope("/api/v1")
                .wrap(JwtAuthMiddleware::new(state.jwt.clone()))
                .service(conversations::list_conversations)
                .service(conversations::create_conversation)
                .service(conversations::get_conversation)
                .service(messages::get_messages)
                .service(messages::upload_message)
                .service(messages::send_message)
                .service(attachments::download_attachment)
                .service(search::search_messages)
                .service(moderation::flag_message)
                .service(moderation::list_flags)
                .service(moderation::resolve_flags),
        );
}

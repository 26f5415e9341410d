use actix_middleware::RequestIdMiddleware;
use actix_web::{web, App, HttpServer};
use communications_service::{
    config, db, error, logging, routes,
    services::{EmailNotifier, LocalAttachmentStorage},
    state::AppState,
    store::PgChatStore,
    websocket::pubsub::RedisFanout,
};
use std::sync::Arc;
use tracing_actix_web::TracingLogger;

#[actix_web::main]
async fn main() -> Result<(), error::AppError> {
    let cfg = Arc::new(config::Config::from_env()?);
    logging::init_tracing(cfg.log_json);

    let pool = db::init_pool(&cfg.database_url, cfg.db_max_connections)
        .await
        .map_err(|e| error::AppError::StartServer(format!("db: {e}")))?;

    tokio::fs::create_dir_all(&cfg.media_root)
        .await
        .map_err(|e| error::AppError::StartServer(format!("media root: {e}")))?;

    let fanout = match &cfg.redis_url {
        Some(url) => {
            let fanout = RedisFanout::connect(url)
                .await
                .map_err(|e| error::AppError::StartServer(format!("redis: {e}")))?;
            tracing::info!(origin = %fanout.origin(), "redis fan-out enabled");
            Some(fanout)
        }
        None => {
            tracing::info!("REDIS_URL not set; broadcasting to local connections only");
            None
        }
    };

    let notifier = EmailNotifier::new(&cfg.email)?;
    if notifier.is_enabled() {
        tracing::info!(smtp_host = %cfg.email.smtp_host, "email notifications enabled");
    }
    let state = AppState::build(
        cfg.clone(),
        Arc::new(PgChatStore::new(pool)),
        Arc::new(LocalAttachmentStorage::new(cfg.media_root.clone())),
        Arc::new(notifier),
        fanout.clone(),
    )?;

    if let Some(fanout) = fanout {
        let registry = state.registry.clone();
        tokio::spawn(fanout.run_listener(registry));
    }

    let bind_addr = format!("0.0.0.0:{}", cfg.port);
    tracing::info!(%bind_addr, "starting communications-service");

    HttpServer::new(move || {
        App::new()
            .wrap(TracingLogger::default())
            .wrap(RequestIdMiddleware::new())
            .app_data(web::Data::new(state.clone()))
            .configure(|c| routes::configure(c, &state))
    })
    .bind(&bind_addr)
    .map_err(|e| error::AppError::StartServer(format!("bind: {e}")))?
    .run()
    .await
    .map_err(|e| error::AppError::StartServer(format!("server: {e}")))
}

use actix_middleware::JwtValidator;
use std::sync::Arc;

use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::services::{
    AttachmentStorage, ConversationService, DeliveryService, ModerationService,
    NotificationService, Notifier, SearchService,
};
use crate::store::ChatStore;
use crate::websocket::pubsub::RedisFanout;
use crate::websocket::{Broadcaster, ConnectionRegistry};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn ChatStore>,
    pub storage: Arc<dyn AttachmentStorage>,
    pub registry: ConnectionRegistry,
    pub jwt: Arc<JwtValidator>,
    pub delivery: DeliveryService,
    pub conversations: ConversationService,
    pub moderation: ModerationService,
    pub search: SearchService,
}

impl AppState {
    /// Wire services over the given collaborators. `fanout` is the optional
    /// Redis link to other instances.
    pub fn build(
        config: Arc<Config>,
        store: Arc<dyn ChatStore>,
        storage: Arc<dyn AttachmentStorage>,
        notifier: Arc<dyn Notifier>,
        fanout: Option<RedisFanout>,
    ) -> AppResult<Self> {
        let jwt = JwtValidator::from_secret(&config.jwt_secret)
            .map_err(|e| AppError::Config(e.to_string()))?;
        let registry = ConnectionRegistry::new();
        let broadcaster = Broadcaster::new(registry.clone(), fanout);
        let notifications =
            NotificationService::new(store.clone(), notifier, config.site_url.clone());

        let delivery = DeliveryService::new(
            store.clone(),
            storage.clone(),
            broadcaster,
            notifications,
            config.empty_message_policy,
            config.max_upload_bytes,
        );

        Ok(Self {
            conversations: ConversationService::new(store.clone(), delivery.clone()),
            moderation: ModerationService::new(store.clone()),
            search: SearchService::new(store.clone()),
            delivery,
            registry,
            jwt: Arc::new(jwt),
            storage,
            store,
            config,
        })
    }
}

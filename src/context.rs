/// Application context and dependency wiring
use crate::{
    channels::{BulkQueueChannel, EmailChannel, HttpQueueClient, PushChannel, QueueChannel},
    config::CoreConfig,
    db,
    directory::SqlUserDirectory,
    error::CoreResult,
    messages::{ConversationAggregator, MessageStore},
    notify::{FanoutEngine, NotificationStore},
    push::{DeviceEndpointRegistry, HttpPushGateway},
    social::SocialGraphStore,
};
use sqlx::SqlitePool;
use std::sync::Arc;

/// Application context holding all shared services
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<CoreConfig>,
    pub db: SqlitePool,
    pub social_graph: Arc<SocialGraphStore>,
    pub messages: Arc<MessageStore>,
    pub conversations: Arc<ConversationAggregator>,
    pub notifications: Arc<NotificationStore>,
    pub device_registry: Arc<DeviceEndpointRegistry>,
    pub fanout: Arc<FanoutEngine>,
}

impl AppContext {
    /// Create a new application context from configuration
    pub async fn new(config: CoreConfig) -> CoreResult<Self> {
        config.validate()?;

        let pool = db::create_pool(
            &config.database.path,
            db::DatabaseOptions {
                max_connections: config.database.max_connections,
                enable_wal: true,
            },
        )
        .await?;

        db::run_migrations(&pool).await?;
        db::test_connection(&pool).await?;

        // Provider gateways
        let push_gateway = Arc::new(HttpPushGateway::new(config.push.gateway_url.clone()));
        let queue_client = Arc::new(HttpQueueClient::new(config.queue.queue_url.clone()));

        // Delivery channels
        let email_channel = Arc::new(EmailChannel::new(config.email.clone())?);
        let push_channel = Arc::new(PushChannel::new(
            push_gateway.clone(),
            config.push.broadcast_topic.clone(),
        ));
        let queue_channel = Arc::new(QueueChannel::new(queue_client.clone()));
        let bulk_queue = Arc::new(BulkQueueChannel::new(queue_client));

        let directory = Arc::new(SqlUserDirectory::new(pool.clone()));

        let fanout = Arc::new(FanoutEngine::new(
            queue_channel,
            email_channel,
            push_channel,
            bulk_queue,
            directory,
        ));

        let device_registry = Arc::new(DeviceEndpointRegistry::new(
            push_gateway,
            config.push.clone(),
        ));

        Ok(Self {
            config: Arc::new(config),
            db: pool.clone(),
            social_graph: Arc::new(SocialGraphStore::new(pool.clone())),
            messages: Arc::new(MessageStore::new(pool.clone())),
            conversations: Arc::new(ConversationAggregator::new(pool.clone())),
            notifications: Arc::new(NotificationStore::new(pool)),
            device_registry,
            fanout,
        })
    }
}

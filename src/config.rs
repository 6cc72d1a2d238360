/// Configuration management for the Castline core
use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

/// Main core configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    pub database: DatabaseConfig,
    pub email: Option<EmailConfig>,
    pub push: PushConfig,
    pub queue: QueueConfig,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    pub max_connections: u32,
}

/// Email configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    pub smtp_url: String,
    pub from_address: String,
}

/// Push gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushConfig {
    /// Base URL of the push provider gateway
    pub gateway_url: String,
    /// Platform application identifier for iOS device registration
    pub ios_application: String,
    /// Platform application identifier for Android device registration
    pub android_application: String,
    /// Broadcast topic every registered device is subscribed to
    pub broadcast_topic: String,
}

/// Durable queue configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Queue endpoint URL messages are submitted to
    pub queue_url: String,
}

impl CoreConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> CoreResult<Self> {
        dotenv::dotenv().ok();

        let data_directory: PathBuf = env::var("CASTLINE_DATA_DIRECTORY")
            .unwrap_or_else(|_| "./data".to_string())
            .into();
        let db_path = env::var("CASTLINE_DB_LOCATION")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_directory.join("castline.sqlite"));
        let max_connections = env::var("CASTLINE_DB_MAX_CONNECTIONS")
            .unwrap_or_else(|_| "10".to_string())
            .parse()
            .unwrap_or(10);

        let email = if let Ok(smtp_url) = env::var("CASTLINE_EMAIL_SMTP_URL") {
            Some(EmailConfig {
                smtp_url,
                from_address: env::var("CASTLINE_EMAIL_FROM_ADDRESS")
                    .unwrap_or_else(|_| "noreply@castline.app".to_string()),
            })
        } else {
            None
        };

        let push_gateway_url = env::var("CASTLINE_PUSH_GATEWAY_URL")
            .map_err(|_| CoreError::Validation("Push gateway URL required".to_string()))?;
        let ios_application = env::var("CASTLINE_PUSH_IOS_APPLICATION")
            .map_err(|_| CoreError::Validation("iOS platform application required".to_string()))?;
        let android_application = env::var("CASTLINE_PUSH_ANDROID_APPLICATION").map_err(|_| {
            CoreError::Validation("Android platform application required".to_string())
        })?;
        let broadcast_topic = env::var("CASTLINE_PUSH_BROADCAST_TOPIC")
            .map_err(|_| CoreError::Validation("Broadcast topic required".to_string()))?;

        let queue_url = env::var("CASTLINE_QUEUE_URL")
            .map_err(|_| CoreError::Validation("Queue URL required".to_string()))?;

        Ok(CoreConfig {
            database: DatabaseConfig {
                path: db_path,
                max_connections,
            },
            email,
            push: PushConfig {
                gateway_url: push_gateway_url,
                ios_application,
                android_application,
                broadcast_topic,
            },
            queue: QueueConfig { queue_url },
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> CoreResult<()> {
        if self.push.broadcast_topic.is_empty() {
            return Err(CoreError::Validation(
                "Broadcast topic cannot be empty".to_string(),
            ));
        }

        if self.queue.queue_url.is_empty() {
            return Err(CoreError::Validation(
                "Queue URL cannot be empty".to_string(),
            ));
        }

        if let Some(ref email) = self.email {
            if !email.smtp_url.starts_with("smtp://") {
                return Err(CoreError::Validation(
                    "SMTP URL must start with smtp://".to_string(),
                ));
            }
        }

        Ok(())
    }
}

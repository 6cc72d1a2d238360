/// Push provider gateway and device endpoint registration
///
/// The gateway trait abstracts the external push provider: it maps
/// (platform application, device token) pairs to provider endpoint
/// addresses, manages topic subscriptions, and publishes payloads to a
/// topic or a single endpoint.
use crate::{
    config::PushConfig,
    db::models::Platform,
    error::{CoreError, CoreResult},
};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;

/// External push provider seam
#[async_trait]
pub trait PushGateway: Send + Sync {
    /// Create (or idempotently reuse) a provider endpoint for a device
    /// token, carrying the user id as opaque metadata. Returns the
    /// endpoint address.
    async fn create_platform_endpoint(
        &self,
        platform_application: &str,
        device_token: &str,
        user_data: &str,
    ) -> CoreResult<String>;

    /// Subscribe an endpoint to a broadcast topic. Returns the
    /// subscription identifier.
    async fn subscribe_endpoint(&self, topic: &str, endpoint: &str) -> CoreResult<String>;

    /// Publish a message envelope to a topic or endpoint address.
    /// Returns the provider message id.
    async fn publish(&self, target: &str, message: &str) -> CoreResult<String>;
}

/// HTTP-backed push gateway client
pub struct HttpPushGateway {
    http: reqwest::Client,
    base_url: String,
}

#[derive(Deserialize)]
struct EndpointResponse {
    endpoint: String,
}

#[derive(Deserialize)]
struct SubscriptionResponse {
    subscription: String,
}

#[derive(Deserialize)]
struct PublishResponse {
    message_id: String,
}

impl HttpPushGateway {
    pub fn new(base_url: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn post_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> CoreResult<T> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .http
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| CoreError::ChannelUnavailable(format!("Push gateway error: {}", e)))?;

        if !response.status().is_success() {
            return Err(CoreError::ChannelUnavailable(format!(
                "Push gateway returned {}",
                response.status()
            )));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| CoreError::ChannelUnavailable(format!("Push gateway response: {}", e)))
    }
}

#[async_trait]
impl PushGateway for HttpPushGateway {
    async fn create_platform_endpoint(
        &self,
        platform_application: &str,
        device_token: &str,
        user_data: &str,
    ) -> CoreResult<String> {
        let body = serde_json::json!({
            "platform_application": platform_application,
            "token": device_token,
            "custom_user_data": user_data,
        });
        let response: EndpointResponse = self.post_json("/endpoints", &body).await?;
        Ok(response.endpoint)
    }

    async fn subscribe_endpoint(&self, topic: &str, endpoint: &str) -> CoreResult<String> {
        let body = serde_json::json!({
            "topic": topic,
            "endpoint": endpoint,
        });
        let response: SubscriptionResponse = self.post_json("/subscriptions", &body).await?;
        Ok(response.subscription)
    }

    async fn publish(&self, target: &str, message: &str) -> CoreResult<String> {
        let body = serde_json::json!({
            "target": target,
            "message": message,
            "message_structure": "json",
        });
        let response: PublishResponse = self.post_json("/publish", &body).await?;
        Ok(response.message_id)
    }
}

/// Maps (user, platform, device token) to a provider endpoint and keeps
/// it subscribed to the broadcast topic
pub struct DeviceEndpointRegistry {
    gateway: Arc<dyn PushGateway>,
    config: PushConfig,
}

impl DeviceEndpointRegistry {
    pub fn new(gateway: Arc<dyn PushGateway>, config: PushConfig) -> Self {
        Self { gateway, config }
    }

    /// Register a device for push delivery and subscribe it to the
    /// broadcast topic. Re-registering the same token is idempotent at
    /// the provider and returns the existing endpoint. Provider failures
    /// surface as `ChannelUnavailable` and are not retried here.
    pub async fn register_device(
        &self,
        user_id: i64,
        platform: Platform,
        device_token: &str,
    ) -> CoreResult<String> {
        if device_token.trim().is_empty() {
            return Err(CoreError::Validation(
                "Device token is required".to_string(),
            ));
        }

        let application = match platform {
            Platform::Ios => &self.config.ios_application,
            Platform::Android => &self.config.android_application,
        };

        let endpoint = self
            .gateway
            .create_platform_endpoint(application, device_token, &user_id.to_string())
            .await?;

        let subscription = self
            .gateway
            .subscribe_endpoint(&self.config.broadcast_topic, &endpoint)
            .await?;

        tracing::info!(
            user_id,
            platform = %platform,
            %endpoint,
            %subscription,
            "device registered for push"
        );

        Ok(endpoint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct RecordingGateway {
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl PushGateway for RecordingGateway {
        async fn create_platform_endpoint(
            &self,
            platform_application: &str,
            device_token: &str,
            user_data: &str,
        ) -> CoreResult<String> {
            self.calls.lock().unwrap().push(format!(
                "endpoint:{}:{}:{}",
                platform_application, device_token, user_data
            ));
            Ok(format!("endpoint/{}", device_token))
        }

        async fn subscribe_endpoint(&self, topic: &str, endpoint: &str) -> CoreResult<String> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("subscribe:{}:{}", topic, endpoint));
            Ok("sub-1".to_string())
        }

        async fn publish(&self, _target: &str, _message: &str) -> CoreResult<String> {
            Ok("msg-1".to_string())
        }
    }

    fn test_config() -> PushConfig {
        PushConfig {
            gateway_url: "http://localhost:9999".to_string(),
            ios_application: "app/ios".to_string(),
            android_application: "app/android".to_string(),
            broadcast_topic: "topic/all".to_string(),
        }
    }

    #[tokio::test]
    async fn test_register_device_resolves_platform_application() {
        let gateway = Arc::new(RecordingGateway {
            calls: Mutex::new(Vec::new()),
        });
        let registry = DeviceEndpointRegistry::new(gateway.clone(), test_config());

        let endpoint = registry
            .register_device(7, Platform::Android, "tok-abc")
            .await
            .unwrap();
        assert_eq!(endpoint, "endpoint/tok-abc");

        let calls = gateway.calls.lock().unwrap();
        assert_eq!(calls[0], "endpoint:app/android:tok-abc:7");
        assert_eq!(calls[1], "subscribe:topic/all:endpoint/tok-abc");
    }

    #[tokio::test]
    async fn test_register_device_rejects_empty_token() {
        let gateway = Arc::new(RecordingGateway {
            calls: Mutex::new(Vec::new()),
        });
        let registry = DeviceEndpointRegistry::new(gateway.clone(), test_config());

        let err = registry
            .register_device(7, Platform::Ios, "   ")
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
        assert!(gateway.calls.lock().unwrap().is_empty());
    }
}

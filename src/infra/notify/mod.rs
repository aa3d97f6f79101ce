//! Notification dispatch.
//!
//! Every notification is recorded as an in-app row. If the user has a push
//! token and a push gateway is configured, a push message goes out as well.
//! Dispatch is best-effort end to end: the caller decides whether a failure
//! matters, and for this pipeline it never does.

use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use crate::domain::{AppError, ExternalServiceError, Notification, NotificationSink};
use crate::infra::database::PostgresClient;

/// Push gateway configuration, read from the environment by the binary.
#[derive(Debug, Clone)]
pub struct PushConfig {
    pub gateway_url: String,
    pub api_key: Option<SecretString>,
}

#[derive(Debug, Serialize)]
struct PushMessage<'a> {
    to: &'a str,
    title: &'a str,
    body: &'a str,
    data: &'a serde_json::Value,
}

/// HTTP client for the push gateway.
#[derive(Debug, Clone)]
pub struct PushClient {
    http_client: reqwest::Client,
    config: PushConfig,
}

impl PushClient {
    pub fn new(config: PushConfig) -> Result<Self, AppError> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| {
                AppError::ExternalService(ExternalServiceError::Configuration(e.to_string()))
            })?;
        Ok(Self {
            http_client,
            config,
        })
    }

    #[instrument(skip(self, notification), fields(user_id = %notification.user_id))]
    async fn send(&self, token: &str, notification: &Notification) -> Result<(), AppError> {
        let message = PushMessage {
            to: token,
            title: &notification.title,
            body: &notification.body,
            data: &notification.data,
        };

        let mut request = self
            .http_client
            .post(&self.config.gateway_url)
            .json(&message);
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key.expose_secret());
        }

        let response = request.send().await.map_err(|e| {
            AppError::ExternalService(ExternalServiceError::Network(e.to_string()))
        })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::ExternalService(ExternalServiceError::ApiError {
                status_code: status.as_u16(),
                message: body,
            }));
        }

        debug!("Push message accepted by gateway");
        Ok(())
    }
}

/// Persists in-app notifications and forwards them to the push gateway.
pub struct NotificationService {
    db: Arc<PostgresClient>,
    push: Option<PushClient>,
}

impl NotificationService {
    pub fn new(db: Arc<PostgresClient>, push: Option<PushClient>) -> Self {
        Self { db, push }
    }
}

#[async_trait::async_trait]
impl NotificationSink for NotificationService {
    #[instrument(skip(self, notification), fields(user_id = %notification.user_id))]
    async fn notify(&self, notification: &Notification) -> Result<(), AppError> {
        self.db
            .insert_notification(
                &notification.user_id,
                &notification.title,
                &notification.body,
                &notification.data,
            )
            .await?;

        let Some(push) = &self.push else {
            return Ok(());
        };
        let Some(token) = self.db.get_push_token(&notification.user_id).await? else {
            debug!("User has no push token, in-app notification only");
            return Ok(());
        };

        if let Err(e) = push.send(&token, notification).await {
            // The in-app row already landed; a push failure is not worth
            // surfacing to the webhook pipeline.
            warn!(error = %e, "Push delivery failed");
        }

        Ok(())
    }
}

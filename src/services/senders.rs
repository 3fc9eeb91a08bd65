use async_trait::async_trait;
use serde::Deserialize;

use crate::config::EmailConfig;
use crate::db::models::Notification;
use crate::error::{AppError, AppResult};

/// Transport for one delivery channel.
///
/// Implementations perform the actual provider call; the dispatch worker
/// feeds the outcome back into the lifecycle engine. `Ok` carries the
/// provider message id when the provider assigns one.
#[async_trait]
pub trait ChannelSender: Send + Sync + 'static {
    async fn send(&self, notification: &Notification) -> AppResult<Option<String>>;
}

/// Sender for the email channel, posting to the transactional email
/// provider's HTTP API.
pub struct EmailSender {
    client: reqwest::Client,
    provider_url: String,
    api_key: Option<String>,
    from_address: String,
}

impl EmailSender {
    pub fn new(config: &EmailConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            provider_url: config.provider_url.clone(),
            api_key: config.api_key.clone(),
            from_address: config.from_address.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ProviderSendResponse {
    message_id: Option<String>,
}

#[async_trait]
impl ChannelSender for EmailSender {
    async fn send(&self, notification: &Notification) -> AppResult<Option<String>> {
        let to = notification.email.as_deref().ok_or_else(|| {
            AppError::Validation(format!(
                "Notification {} has an email channel but no destination address",
                notification.id
            ))
        })?;

        let payload = serde_json::json!({
            "from": self.from_address,
            "to": to,
            "subject": notification.title,
            "text": notification.content,
            "html": notification.html_content,
            "headers": { "X-Notification-Id": notification.id },
        });

        let mut request = self.client.post(&self.provider_url).json(&payload);
        if let Some(ref key) = self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            let body: Option<ProviderSendResponse> = response.json().await.ok();
            Ok(body.and_then(|b| b.message_id))
        } else {
            let text = response.text().await.unwrap_or_default();
            Err(AppError::EmailProvider(format!(
                "Email provider error ({}): {}",
                status.as_u16(),
                text
            )))
        }
    }
}

/// Sender for the in-app channel. The persisted record *is* the in-app
/// notification, so there is no transport to call; the send always succeeds
/// and carries no provider message id.
pub struct InAppSender;

#[async_trait]
impl ChannelSender for InAppSender {
    async fn send(&self, _notification: &Notification) -> AppResult<Option<String>> {
        Ok(None)
    }
}

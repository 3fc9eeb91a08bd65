use std::sync::Arc;

use chrono::NaiveDateTime;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use sqlx::SqlitePool;

use crate::clock::Clock;
use crate::db::models::Notification;
use crate::db::repository::NotificationRepository;
use crate::error::{AppError, AppResult};
use crate::lifecycle::DeliveryEvent;

type HmacSha256 = Hmac<Sha256>;

/// Maximum age of a webhook message before it is rejected (minutes).
const MAX_MESSAGE_AGE_MINUTES: i64 = 10;

/// Engagement callback sent by the email provider. The `event` field selects
/// the variant.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProviderEvent {
    Delivery,
    Open {
        ip_address: Option<String>,
        user_agent: Option<String>,
    },
    Click {
        url: String,
        ip_address: Option<String>,
        user_agent: Option<String>,
    },
    Bounce {
        reason: Option<String>,
        bounce_type: Option<String>,
        bounce_sub_type: Option<String>,
        diagnostic_code: Option<String>,
    },
}

impl ProviderEvent {
    fn into_delivery_event(self) -> DeliveryEvent {
        match self {
            ProviderEvent::Delivery => DeliveryEvent::Delivered,
            ProviderEvent::Open {
                ip_address,
                user_agent,
            } => DeliveryEvent::EmailOpened {
                ip_address,
                user_agent,
            },
            ProviderEvent::Click {
                url,
                ip_address,
                user_agent,
            } => DeliveryEvent::EmailClicked {
                url,
                ip_address,
                user_agent,
            },
            ProviderEvent::Bounce {
                reason,
                bounce_type,
                bounce_sub_type,
                diagnostic_code,
            } => DeliveryEvent::EmailBounced {
                reason,
                bounce_type,
                bounce_sub_type,
                diagnostic_code,
            },
        }
    }
}

/// Full webhook payload: the target record plus the event detail.
#[derive(Debug, Clone, Deserialize)]
pub struct EmailWebhookPayload {
    pub notification_id: String,
    #[serde(flatten)]
    pub event: ProviderEvent,
}

/// Applies provider engagement callbacks to notification records.
pub struct TrackingService {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
}

impl TrackingService {
    pub fn new(pool: SqlitePool, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }

    /// Verify the provider webhook signature: HMAC-SHA256 over
    /// `timestamp || body`, hex-encoded with a `sha256=` prefix, plus a
    /// staleness window on the timestamp evaluated against `now`.
    pub fn verify_signature(
        secret: &str,
        timestamp: &str,
        body: &[u8],
        signature: &str,
        now: NaiveDateTime,
    ) -> AppResult<()> {
        let mut message = Vec::with_capacity(timestamp.len() + body.len());
        message.extend_from_slice(timestamp.as_bytes());
        message.extend_from_slice(body);

        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|_| AppError::Internal(anyhow::anyhow!("Failed to create HMAC")))?;
        mac.update(&message);

        let expected_sig = if let Some(hex_sig) = signature.strip_prefix("sha256=") {
            hex::decode(hex_sig)
                .map_err(|_| AppError::BadRequest("Invalid signature format".to_string()))?
        } else {
            return Err(AppError::BadRequest("Invalid signature format".to_string()));
        };

        mac.verify_slice(&expected_sig)
            .map_err(|_| AppError::Unauthorized)?;

        if let Ok(msg_time) = chrono::DateTime::parse_from_rfc3339(timestamp) {
            let diff = now.signed_duration_since(msg_time.naive_utc());
            if diff.num_minutes().abs() > MAX_MESSAGE_AGE_MINUTES {
                return Err(AppError::BadRequest("Message too old".to_string()));
            }
        }

        Ok(())
    }

    /// Load the target record, apply the engagement event, persist.
    ///
    /// Rejected for records whose channel does not include email: the email
    /// sub-status is only meaningful for email-capable records, and a
    /// misdirected callback must not move an in-app record into `bounced`.
    pub async fn apply_event(&self, payload: EmailWebhookPayload) -> AppResult<Notification> {
        let record = NotificationRepository::find_by_id(&self.pool, &payload.notification_id)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!("Notification {}", payload.notification_id))
            })?;

        if !record.channel.includes_email() {
            return Err(AppError::Validation(format!(
                "Notification {} has no email channel",
                record.id
            )));
        }

        let now = self.clock.now();
        let record = record.transition(payload.event.into_delivery_event(), now);
        let stored = NotificationRepository::update(&self.pool, &record, now).await?;

        tracing::info!(
            "Applied engagement event to notification {}: status={:?}, email_tracking_status={:?}",
            stored.id,
            stored.status,
            stored.email_tracking_status
        );

        Ok(stored)
    }
}

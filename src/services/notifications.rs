use std::sync::Arc;

use sqlx::SqlitePool;

use crate::clock::Clock;
use crate::db::models::{NewNotification, Notification};
use crate::db::repository::NotificationRepository;
use crate::error::{AppError, AppResult};
use crate::lifecycle::{DeliveryEvent, EmailTrackingMetrics};

/// User-facing notification operations: creation by event producers and the
/// read/archive toggles, all expressed as lifecycle transitions.
pub struct NotificationService {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
}

impl NotificationService {
    pub fn new(pool: SqlitePool, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }

    /// Create a new pending record. An email-capable channel requires a
    /// destination address.
    pub async fn create(&self, input: NewNotification) -> AppResult<Notification> {
        if input.channel.includes_email() && input.email.is_none() {
            return Err(AppError::Validation(
                "Email channel requires a destination address".to_string(),
            ));
        }
        let record = NotificationRepository::create(&self.pool, input, self.clock.now()).await?;
        tracing::info!(
            "Created {} notification {} for user {}",
            record.notification_type.as_str(),
            record.id,
            record.user_id
        );
        Ok(record)
    }

    pub async fn mark_read(&self, id: &str) -> AppResult<Notification> {
        self.apply(id, DeliveryEvent::Read).await
    }

    pub async fn mark_archived(&self, id: &str) -> AppResult<Notification> {
        self.apply(id, DeliveryEvent::Archived).await
    }

    pub async fn metrics(&self, id: &str) -> AppResult<EmailTrackingMetrics> {
        let record = self.load(id).await?;
        Ok(record.email_tracking_metrics())
    }

    async fn apply(&self, id: &str, event: DeliveryEvent) -> AppResult<Notification> {
        let record = self.load(id).await?;
        let now = self.clock.now();
        let record = record.transition(event, now);
        NotificationRepository::update(&self.pool, &record, now).await
    }

    async fn load(&self, id: &str) -> AppResult<Notification> {
        NotificationRepository::find_by_id(&self.pool, id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Notification {}", id)))
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDateTime;

    use super::*;
    use crate::clock::testing::FixedClock;
    use crate::db::models::{DeliveryStatus, NotificationChannel, NotificationType};

    fn instant(secs: i64) -> NaiveDateTime {
        chrono::DateTime::from_timestamp(secs, 0).unwrap().naive_utc()
    }

    async fn test_pool() -> SqlitePool {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("in-memory sqlite");
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .expect("migrations");
        pool
    }

    fn input(channel: NotificationChannel, email: Option<&str>) -> NewNotification {
        NewNotification {
            user_id: "user-1".to_string(),
            notification_type: NotificationType::CommentAdded,
            channel,
            title: "New comment".to_string(),
            content: "Someone commented on your task".to_string(),
            html_content: None,
            metadata: None,
            related_entity_id: None,
            related_entity_type: None,
            triggered_by_id: None,
            triggered_by_name: None,
            email: email.map(String::from),
            max_retries: None,
            expires_at: None,
        }
    }

    #[tokio::test]
    async fn create_rejects_email_channel_without_address() {
        let svc = NotificationService::new(
            test_pool().await,
            Arc::new(FixedClock(instant(1_700_000_000))),
        );
        let result = svc.create(input(NotificationChannel::Email, None)).await;
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn mark_read_and_archive_round_trip() {
        let now = instant(1_700_000_000);
        let svc = NotificationService::new(test_pool().await, Arc::new(FixedClock(now)));
        let n = svc
            .create(input(NotificationChannel::InApp, None))
            .await
            .unwrap();

        let n = svc.mark_read(&n.id).await.unwrap();
        assert!(n.is_read);
        assert_eq!(n.read_at, Some(now));
        assert_eq!(n.status, DeliveryStatus::Read);

        let n = svc.mark_archived(&n.id).await.unwrap();
        assert!(n.is_archived);
        assert_eq!(n.archived_at, Some(now));
        // Archival leaves the read status in place.
        assert_eq!(n.status, DeliveryStatus::Read);
    }

    #[tokio::test]
    async fn metrics_for_untouched_record() {
        let svc = NotificationService::new(
            test_pool().await,
            Arc::new(FixedClock(instant(1_700_000_000))),
        );
        let n = svc
            .create(input(NotificationChannel::Email, Some("user@example.com")))
            .await
            .unwrap();

        let metrics = svc.metrics(&n.id).await.unwrap();
        assert!(!metrics.opened);
        assert!(!metrics.clicked);
        assert_eq!(metrics.open_count, 0);
        assert_eq!(metrics.click_count, 0);
    }
}

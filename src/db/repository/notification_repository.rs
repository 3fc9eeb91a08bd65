use chrono::NaiveDateTime;
use sqlx::types::Json;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db::models::{
    DeliveryStatus, EmailTrackingStatus, NewNotification, Notification, TrackingData,
};
use crate::error::{AppError, AppResult};

/// Default maximum delivery attempts when the producer does not override it.
pub const DEFAULT_MAX_RETRIES: i32 = 3;

const COLUMNS: &str = "\
    id, user_id, notification_type, channel, status, \
    title, content, html_content, metadata, \
    related_entity_id, related_entity_type, triggered_by_id, triggered_by_name, \
    email_tracking_status, email, message_id, \
    email_sent_at, email_delivered_at, email_opened_at, email_clicked_at, email_bounced_at, \
    email_bounce_reason, email_open_count, email_click_count, tracking_data, \
    is_read, read_at, is_archived, archived_at, \
    retry_count, max_retries, error_message, next_retry_at, \
    created_at, updated_at, expires_at";

/// Repository for notification records.
///
/// All mutations go through whole-record `update` after a lifecycle
/// transition; there is no partial-field SQL so the record in memory and the
/// row never diverge. The caller (a single dispatch worker, plus the webhook
/// handlers applying load-transition-save against SQLite's writer lock)
/// provides serialization per record id.
pub struct NotificationRepository;

impl NotificationRepository {
    /// Insert a new record in `pending` status.
    ///
    /// The email sub-status starts at `queued` whenever the channel includes
    /// email; `max_retries` defaults to [`DEFAULT_MAX_RETRIES`].
    pub async fn create(
        pool: &SqlitePool,
        input: NewNotification,
        now: NaiveDateTime,
    ) -> AppResult<Notification> {
        let id = Uuid::new_v4().to_string();
        let email_tracking_status = input
            .channel
            .includes_email()
            .then_some(EmailTrackingStatus::Queued);
        let max_retries = input.max_retries.unwrap_or(DEFAULT_MAX_RETRIES);

        let sql = format!(
            "INSERT INTO notifications ({COLUMNS}) VALUES \
             (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, \
              ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             RETURNING {COLUMNS}"
        );

        let row = sqlx::query_as::<_, Notification>(&sql)
            .bind(id)
            .bind(input.user_id)
            .bind(input.notification_type)
            .bind(input.channel)
            .bind(DeliveryStatus::Pending)
            .bind(input.title)
            .bind(input.content)
            .bind(input.html_content)
            .bind(input.metadata.map(Json))
            .bind(input.related_entity_id)
            .bind(input.related_entity_type)
            .bind(input.triggered_by_id)
            .bind(input.triggered_by_name)
            .bind(email_tracking_status)
            .bind(input.email)
            .bind::<Option<String>>(None) // message_id
            .bind::<Option<NaiveDateTime>>(None) // email_sent_at
            .bind::<Option<NaiveDateTime>>(None) // email_delivered_at
            .bind::<Option<NaiveDateTime>>(None) // email_opened_at
            .bind::<Option<NaiveDateTime>>(None) // email_clicked_at
            .bind::<Option<NaiveDateTime>>(None) // email_bounced_at
            .bind::<Option<String>>(None) // email_bounce_reason
            .bind(0i32) // email_open_count
            .bind(0i32) // email_click_count
            .bind(Json(TrackingData::default()))
            .bind(false) // is_read
            .bind::<Option<NaiveDateTime>>(None) // read_at
            .bind(false) // is_archived
            .bind::<Option<NaiveDateTime>>(None) // archived_at
            .bind(0i32) // retry_count
            .bind(max_retries)
            .bind::<Option<String>>(None) // error_message
            .bind::<Option<NaiveDateTime>>(None) // next_retry_at
            .bind(now)
            .bind(now)
            .bind(input.expires_at)
            .fetch_one(pool)
            .await
            .map_err(AppError::Database)?;

        Ok(row)
    }

    /// Fetch a record by id.
    pub async fn find_by_id(pool: &SqlitePool, id: &str) -> AppResult<Option<Notification>> {
        let sql = format!("SELECT {COLUMNS} FROM notifications WHERE id = ?");
        let row = sqlx::query_as::<_, Notification>(&sql)
            .bind(id)
            .fetch_optional(pool)
            .await
            .map_err(AppError::Database)?;

        Ok(row)
    }

    /// Persist a transitioned record, bumping `updated_at`. Returns the
    /// stored row.
    pub async fn update(
        pool: &SqlitePool,
        n: &Notification,
        now: NaiveDateTime,
    ) -> AppResult<Notification> {
        let sql = format!(
            "UPDATE notifications SET \
                status = ?, email_tracking_status = ?, message_id = ?, \
                email_sent_at = ?, email_delivered_at = ?, email_opened_at = ?, \
                email_clicked_at = ?, email_bounced_at = ?, email_bounce_reason = ?, \
                email_open_count = ?, email_click_count = ?, tracking_data = ?, \
                is_read = ?, read_at = ?, is_archived = ?, archived_at = ?, \
                retry_count = ?, error_message = ?, next_retry_at = ?, \
                updated_at = ? \
             WHERE id = ? \
             RETURNING {COLUMNS}"
        );

        let row = sqlx::query_as::<_, Notification>(&sql)
            .bind(n.status)
            .bind(n.email_tracking_status)
            .bind(&n.message_id)
            .bind(n.email_sent_at)
            .bind(n.email_delivered_at)
            .bind(n.email_opened_at)
            .bind(n.email_clicked_at)
            .bind(n.email_bounced_at)
            .bind(&n.email_bounce_reason)
            .bind(n.email_open_count)
            .bind(n.email_click_count)
            .bind(&n.tracking_data)
            .bind(n.is_read)
            .bind(n.read_at)
            .bind(n.is_archived)
            .bind(n.archived_at)
            .bind(n.retry_count)
            .bind(&n.error_message)
            .bind(n.next_retry_at)
            .bind(now)
            .bind(&n.id)
            .fetch_one(pool)
            .await
            .map_err(AppError::Database)?;

        Ok(row)
    }

    /// Records due for (re)dispatch: pending, with no retry schedule yet
    /// (fresh) or a schedule that has come due, skipping expired rows.
    /// Restartable and order-insensitive for correctness; ordered by
    /// creation time so old records go out first.
    pub async fn find_due(
        pool: &SqlitePool,
        now: NaiveDateTime,
        limit: i64,
    ) -> AppResult<Vec<Notification>> {
        if limit <= 0 {
            return Ok(Vec::new());
        }

        let sql = format!(
            "SELECT {COLUMNS} FROM notifications \
             WHERE status = ? \
               AND (next_retry_at IS NULL OR next_retry_at <= ?) \
               AND (expires_at IS NULL OR expires_at > ?) \
             ORDER BY created_at ASC \
             LIMIT ?"
        );

        let rows = sqlx::query_as::<_, Notification>(&sql)
            .bind(DeliveryStatus::Pending)
            .bind(now)
            .bind(now)
            .bind(limit)
            .fetch_all(pool)
            .await
            .map_err(AppError::Database)?;

        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{NotificationChannel, NotificationType};
    use crate::lifecycle::DeliveryEvent;
    use chrono::Duration;

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

    fn instant(secs: i64) -> NaiveDateTime {
        chrono::DateTime::from_timestamp(secs, 0).unwrap().naive_utc()
    }

    fn new_email_notification() -> NewNotification {
        NewNotification {
            user_id: "user-1".to_string(),
            notification_type: NotificationType::TaskAssigned,
            channel: NotificationChannel::Email,
            title: "Task assigned".to_string(),
            content: "You were assigned a task".to_string(),
            html_content: Some("<p>You were assigned a task</p>".to_string()),
            metadata: Some(serde_json::json!({"task_id": "t-1"})),
            related_entity_id: Some("t-1".to_string()),
            related_entity_type: Some("task".to_string()),
            triggered_by_id: Some("user-2".to_string()),
            triggered_by_name: Some("Alice".to_string()),
            email: Some("user@example.com".to_string()),
            max_retries: None,
            expires_at: None,
        }
    }

    #[tokio::test]
    async fn create_applies_defaults() {
        let pool = test_pool().await;
        let now = instant(1_700_000_000);
        let n = NotificationRepository::create(&pool, new_email_notification(), now)
            .await
            .unwrap();

        assert_eq!(n.status, DeliveryStatus::Pending);
        assert_eq!(n.email_tracking_status, Some(EmailTrackingStatus::Queued));
        assert_eq!(n.retry_count, 0);
        assert_eq!(n.max_retries, DEFAULT_MAX_RETRIES);
        assert_eq!(n.next_retry_at, None);
        assert_eq!(n.tracking_data.0, TrackingData::default());
        assert_eq!(n.created_at, now);
    }

    #[tokio::test]
    async fn in_app_records_have_no_email_sub_status() {
        let pool = test_pool().await;
        let input = NewNotification {
            channel: NotificationChannel::InApp,
            email: None,
            ..new_email_notification()
        };
        let n = NotificationRepository::create(&pool, input, instant(1_700_000_000))
            .await
            .unwrap();
        assert_eq!(n.email_tracking_status, None);
    }

    #[tokio::test]
    async fn update_round_trips_a_transition() {
        let pool = test_pool().await;
        let now = instant(1_700_000_000);
        let n = NotificationRepository::create(&pool, new_email_notification(), now)
            .await
            .unwrap();

        let later = instant(1_700_000_100);
        let n = n.transition(
            DeliveryEvent::EmailClicked {
                url: "https://taskmaster.local/t-1".to_string(),
                ip_address: Some("1.2.3.4".to_string()),
                user_agent: Some("UA1".to_string()),
            },
            later,
        );
        let stored = NotificationRepository::update(&pool, &n, later).await.unwrap();

        assert_eq!(stored.email_click_count, 1);
        assert_eq!(stored.email_clicked_at, Some(later));
        assert_eq!(stored.tracking_data.0.link_clicks.len(), 1);
        assert_eq!(
            stored.tracking_data.0.link_clicks[0].url,
            "https://taskmaster.local/t-1"
        );
        assert_eq!(stored.updated_at, later);

        let reloaded = NotificationRepository::find_by_id(&pool, &stored.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reloaded.email_click_count, 1);
        assert_eq!(
            reloaded.email_tracking_status,
            Some(EmailTrackingStatus::Clicked)
        );
    }

    #[tokio::test]
    async fn find_due_selects_fresh_and_due_but_not_future_or_expired() {
        let pool = test_pool().await;
        let now = instant(1_700_000_000);

        // Fresh pending record, no schedule yet.
        let fresh = NotificationRepository::create(&pool, new_email_notification(), now)
            .await
            .unwrap();

        // Retry came due in the past.
        let due = NotificationRepository::create(&pool, new_email_notification(), now)
            .await
            .unwrap()
            .transition(
                DeliveryEvent::RetryScheduled {
                    delay: Duration::milliseconds(1000),
                },
                now - Duration::seconds(60),
            );
        let due = NotificationRepository::update(&pool, &due, now).await.unwrap();

        // Retry scheduled in the future.
        let future = NotificationRepository::create(&pool, new_email_notification(), now)
            .await
            .unwrap()
            .transition(
                DeliveryEvent::RetryScheduled {
                    delay: Duration::seconds(600),
                },
                now,
            );
        NotificationRepository::update(&pool, &future, now).await.unwrap();

        // Already sent.
        let sent = NotificationRepository::create(&pool, new_email_notification(), now)
            .await
            .unwrap()
            .transition(DeliveryEvent::Sent, now);
        NotificationRepository::update(&pool, &sent, now).await.unwrap();

        // Expired.
        let expired_input = NewNotification {
            expires_at: Some(now - Duration::seconds(1)),
            ..new_email_notification()
        };
        NotificationRepository::create(&pool, expired_input, now)
            .await
            .unwrap();

        let picked = NotificationRepository::find_due(&pool, now, 10).await.unwrap();
        let ids: Vec<&str> = picked.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(picked.len(), 2);
        assert!(ids.contains(&fresh.id.as_str()));
        assert!(ids.contains(&due.id.as_str()));
    }
}

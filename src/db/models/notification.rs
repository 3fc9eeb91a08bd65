use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;

/// What triggered the notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum NotificationType {
    TaskAssigned,
    TaskUpdated,
    TaskCompleted,
    TaskOverdue,
    CommentAdded,
    Mention,
    Reminder,
    TeamInvite,
    ProjectUpdate,
    System,
}

impl NotificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationType::TaskAssigned => "task_assigned",
            NotificationType::TaskUpdated => "task_updated",
            NotificationType::TaskCompleted => "task_completed",
            NotificationType::TaskOverdue => "task_overdue",
            NotificationType::CommentAdded => "comment_added",
            NotificationType::Mention => "mention",
            NotificationType::Reminder => "reminder",
            NotificationType::TeamInvite => "team_invite",
            NotificationType::ProjectUpdate => "project_update",
            NotificationType::System => "system",
        }
    }
}

/// Transport for a notification: in-app, email, or both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum NotificationChannel {
    InApp,
    Email,
    Both,
}

impl NotificationChannel {
    pub fn includes_email(&self) -> bool {
        matches!(self, NotificationChannel::Email | NotificationChannel::Both)
    }

    pub fn includes_in_app(&self) -> bool {
        matches!(self, NotificationChannel::InApp | NotificationChannel::Both)
    }
}

/// Overall delivery lifecycle of a record.
///
/// `Read` and `Bounced` are absorbing; `Failed` is absorbing once retries are
/// exhausted. Archival is a flag, not a status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    Sent,
    Delivered,
    Read,
    Failed,
    Bounced,
}

/// Provider-side email delivery state, nested under `DeliveryStatus` and only
/// populated when the channel includes email.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum EmailTrackingStatus {
    Queued,
    Sent,
    Delivered,
    Opened,
    Clicked,
    Bounced,
    Complained,
    Unsubscribed,
    Failed,
}

/// One recorded link click from an email open/click callback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkClick {
    pub url: String,
    pub clicked_at: NaiveDateTime,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

/// Structured bounce classification reported by the provider. A new bounce
/// overwrites the previous detail; there is no bounce history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BounceDetails {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bounce_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bounce_sub_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostic_code: Option<String>,
}

/// Engagement detail blob stored as a JSON column.
///
/// `ip_address`/`user_agent` hold only the most recent requester seen by an
/// open callback. `link_clicks` is append-only and unbounded; its length
/// always equals `email_click_count` on the owning record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackingData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub link_clicks: Vec<LinkClick>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bounce_details: Option<BounceDetails>,
}

/// One notification instance for one user.
///
/// Rows are created in `pending` status by event producers and mutated
/// exclusively through the lifecycle transition engine; records are never
/// physically deleted here (archival is a flag, expiry is an external sweep).
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Notification {
    /// Primary key (UUID)
    pub id: String,

    /// Owning user id (mandatory)
    pub user_id: String,

    pub notification_type: NotificationType,
    pub channel: NotificationChannel,
    pub status: DeliveryStatus,

    pub title: String,
    pub content: String,
    pub html_content: Option<String>,

    /// Free-form metadata attached by the producer.
    pub metadata: Option<Json<serde_json::Value>>,

    /// Provenance: the entity this notification is about.
    pub related_entity_id: Option<String>,
    pub related_entity_type: Option<String>,

    /// Provenance: who caused it.
    pub triggered_by_id: Option<String>,
    pub triggered_by_name: Option<String>,

    // Email tracking fields
    pub email_tracking_status: Option<EmailTrackingStatus>,
    /// Destination address (when the channel includes email).
    pub email: Option<String>,
    /// Provider message id, assigned after a successful send.
    pub message_id: Option<String>,
    pub email_sent_at: Option<NaiveDateTime>,
    pub email_delivered_at: Option<NaiveDateTime>,
    pub email_opened_at: Option<NaiveDateTime>,
    pub email_clicked_at: Option<NaiveDateTime>,
    pub email_bounced_at: Option<NaiveDateTime>,
    pub email_bounce_reason: Option<String>,
    pub email_open_count: i32,
    pub email_click_count: i32,
    pub tracking_data: Json<TrackingData>,

    // In-app fields
    pub is_read: bool,
    pub read_at: Option<NaiveDateTime>,
    pub is_archived: bool,
    pub archived_at: Option<NaiveDateTime>,

    // Retry and error handling
    pub retry_count: i32,
    pub max_retries: i32,
    pub error_message: Option<String>,
    /// When the record becomes eligible for the next dispatch attempt.
    pub next_retry_at: Option<NaiveDateTime>,

    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    /// Optional TTL, enforced by an external sweeper; due queries skip
    /// expired rows.
    pub expires_at: Option<NaiveDateTime>,
}

/// Data required to create a new notification record.
///
/// `max_retries` may be omitted and is defaulted by repository logic. The
/// email sub-status starts at `queued` whenever the channel includes email.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewNotification {
    pub user_id: String,
    pub notification_type: NotificationType,
    pub channel: NotificationChannel,
    pub title: String,
    pub content: String,
    pub html_content: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub related_entity_id: Option<String>,
    pub related_entity_type: Option<String>,
    pub triggered_by_id: Option<String>,
    pub triggered_by_name: Option<String>,
    /// Destination address; required when the channel includes email.
    pub email: Option<String>,
    /// Optional override for maximum delivery attempts.
    pub max_retries: Option<i32>,
    /// Optional expiration time; expired rows are skipped by the sweep.
    pub expires_at: Option<NaiveDateTime>,
}

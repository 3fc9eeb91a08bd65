//! Email engagement tracking: opens, clicks, bounces reported by the
//! provider, plus the derived metrics view.

use chrono::NaiveDateTime;
use serde::Serialize;

use crate::db::models::{
    BounceDetails, DeliveryStatus, EmailTrackingStatus, LinkClick, Notification,
};

/// Record an open callback. Only the most recent requester ip/user-agent is
/// retained in the tracking blob.
pub(crate) fn track_open(
    mut n: Notification,
    ip_address: Option<String>,
    user_agent: Option<String>,
    now: NaiveDateTime,
) -> Notification {
    n.email_opened_at = Some(now);
    n.email_open_count += 1;
    n.email_tracking_status = Some(EmailTrackingStatus::Opened);
    n.tracking_data.0.ip_address = ip_address;
    n.tracking_data.0.user_agent = user_agent;
    n
}

/// Record a click callback. The click list is append-only and unbounded; its
/// length stays equal to `email_click_count`.
pub(crate) fn track_click(
    mut n: Notification,
    url: String,
    ip_address: Option<String>,
    user_agent: Option<String>,
    now: NaiveDateTime,
) -> Notification {
    n.email_clicked_at = Some(now);
    n.email_click_count += 1;
    n.email_tracking_status = Some(EmailTrackingStatus::Clicked);
    n.tracking_data.0.link_clicks.push(LinkClick {
        url,
        clicked_at: now,
        ip_address,
        user_agent,
    });
    n
}

/// Record a bounce. Terminal for the email sub-channel: both the sub-status
/// and the overall status flip to `bounced` in one step, bypassing retry
/// accounting entirely. A new bounce overwrites the previous detail.
pub(crate) fn track_bounce(
    mut n: Notification,
    reason: Option<String>,
    bounce_type: Option<String>,
    bounce_sub_type: Option<String>,
    diagnostic_code: Option<String>,
    now: NaiveDateTime,
) -> Notification {
    n.email_bounced_at = Some(now);
    n.email_bounce_reason = reason;
    n.email_tracking_status = Some(EmailTrackingStatus::Bounced);
    n.status = DeliveryStatus::Bounced;
    n.tracking_data.0.bounce_details = Some(BounceDetails {
        bounce_type,
        bounce_sub_type,
        diagnostic_code,
    });
    n
}

/// Derived engagement summary, computable from record state alone.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmailTrackingMetrics {
    pub opened: bool,
    pub clicked: bool,
    pub open_count: i32,
    pub click_count: i32,
    pub opened_at: Option<NaiveDateTime>,
    pub clicked_at: Option<NaiveDateTime>,
}

impl Notification {
    pub fn email_tracking_metrics(&self) -> EmailTrackingMetrics {
        EmailTrackingMetrics {
            opened: self.email_open_count > 0,
            clicked: self.email_click_count > 0,
            open_count: self.email_open_count,
            click_count: self.email_click_count,
            opened_at: self.email_opened_at,
            clicked_at: self.email_clicked_at,
        }
    }
}

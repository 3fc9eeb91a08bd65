//! Pure state-transition engine for notification records.
//!
//! Every mutation of a `Notification` goes through [`Notification::transition`]
//! with an explicit [`DeliveryEvent`] and an explicit `now`, so the whole
//! lifecycle is unit-testable without a database or a live clock. The engine
//! is total: events that would be illegal for the current state are redefined
//! (e.g. scheduling a retry with exhausted attempts becomes a terminal
//! failure) or dropped (delivery progress on a terminal record) rather than
//! rejected.

pub mod engagement;
pub mod retry;

use chrono::{Duration, NaiveDateTime};

use crate::db::models::{DeliveryStatus, EmailTrackingStatus, Notification};

pub use engagement::EmailTrackingMetrics;
pub use retry::DEFAULT_RETRY_DELAY_MS;

/// A lifecycle event applied to a notification record.
///
/// Dispatch outcomes (`Sent`, `Delivered`, `Failed`, `RetryScheduled`) are
/// reported by the dispatch worker; engagement events come from provider
/// webhooks; `Read`/`Archived` come from user actions.
#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryEvent {
    Sent,
    Delivered,
    Read,
    Archived,
    Failed {
        reason: Option<String>,
    },
    RetryScheduled {
        delay: Duration,
    },
    EmailOpened {
        ip_address: Option<String>,
        user_agent: Option<String>,
    },
    EmailClicked {
        url: String,
        ip_address: Option<String>,
        user_agent: Option<String>,
    },
    EmailBounced {
        reason: Option<String>,
        bounce_type: Option<String>,
        bounce_sub_type: Option<String>,
        diagnostic_code: Option<String>,
    },
}

#[cfg(test)]
impl DeliveryEvent {
    /// Retry with the default 5 minute delay.
    pub(crate) fn retry_default() -> Self {
        DeliveryEvent::RetryScheduled {
            delay: Duration::milliseconds(DEFAULT_RETRY_DELAY_MS),
        }
    }
}

impl Notification {
    fn is_terminal_for_delivery(&self) -> bool {
        matches!(self.status, DeliveryStatus::Read | DeliveryStatus::Bounced)
    }

    /// Apply `event` at instant `now`, returning the updated record.
    ///
    /// Pure with respect to its inputs; callers persist the result. The
    /// invariants hold for sequential application per record — concurrent
    /// writers must be serialized by the persistence layer.
    pub fn transition(mut self, event: DeliveryEvent, now: NaiveDateTime) -> Notification {
        match event {
            // `read` and `bounced` are absorbing for delivery progress:
            // a duplicate or out-of-order provider callback must not pull a
            // terminal record back to `sent`/`delivered`.
            DeliveryEvent::Sent => {
                if self.is_terminal_for_delivery() {
                    return self;
                }
                self.status = DeliveryStatus::Sent;
                if self.channel.includes_email() {
                    self.email_sent_at = Some(now);
                    self.email_tracking_status = Some(EmailTrackingStatus::Sent);
                }
                self
            }
            DeliveryEvent::Delivered => {
                if self.is_terminal_for_delivery() {
                    return self;
                }
                self.status = DeliveryStatus::Delivered;
                if self.channel.includes_email() {
                    self.email_delivered_at = Some(now);
                    self.email_tracking_status = Some(EmailTrackingStatus::Delivered);
                }
                self
            }
            // Reading forces the status to `read` regardless of the prior
            // status, including the terminal `failed`/`bounced` states.
            DeliveryEvent::Read => {
                self.is_read = true;
                self.read_at = Some(now);
                self.status = DeliveryStatus::Read;
                self
            }
            // Archival is orthogonal to delivery status. Repeat events
            // overwrite `archived_at` with the newest instant.
            DeliveryEvent::Archived => {
                self.is_archived = true;
                self.archived_at = Some(now);
                self
            }
            DeliveryEvent::Failed { reason } => {
                self.status = DeliveryStatus::Failed;
                if let Some(reason) = reason {
                    self.error_message = Some(reason);
                }
                self
            }
            DeliveryEvent::RetryScheduled { delay } => retry::schedule(self, delay, now),
            DeliveryEvent::EmailOpened {
                ip_address,
                user_agent,
            } => engagement::track_open(self, ip_address, user_agent, now),
            DeliveryEvent::EmailClicked {
                url,
                ip_address,
                user_agent,
            } => engagement::track_click(self, url, ip_address, user_agent, now),
            DeliveryEvent::EmailBounced {
                reason,
                bounce_type,
                bounce_sub_type,
                diagnostic_code,
            } => engagement::track_bounce(
                self,
                reason,
                bounce_type,
                bounce_sub_type,
                diagnostic_code,
                now,
            ),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::{instant, record};
    use super::*;
    use crate::db::models::NotificationChannel;

    #[test]
    fn sent_and_delivered_stamp_email_fields() {
        let now = instant(1_700_000_100);
        let n = record(NotificationChannel::Email).transition(DeliveryEvent::Sent, now);
        assert_eq!(n.status, DeliveryStatus::Sent);
        assert_eq!(n.email_sent_at, Some(now));
        assert_eq!(n.email_tracking_status, Some(EmailTrackingStatus::Sent));

        let later = instant(1_700_000_200);
        let n = n.transition(DeliveryEvent::Delivered, later);
        assert_eq!(n.status, DeliveryStatus::Delivered);
        assert_eq!(n.email_delivered_at, Some(later));
        assert_eq!(n.email_tracking_status, Some(EmailTrackingStatus::Delivered));
    }

    #[test]
    fn sent_leaves_email_fields_untouched_for_in_app_channel() {
        let now = instant(1_700_000_100);
        let n = record(NotificationChannel::InApp).transition(DeliveryEvent::Sent, now);
        assert_eq!(n.status, DeliveryStatus::Sent);
        assert_eq!(n.email_sent_at, None);
        assert_eq!(n.email_tracking_status, None);
    }

    #[test]
    fn read_sets_flag_timestamp_and_status() {
        let now = instant(1_700_000_100);
        let n = record(NotificationChannel::InApp).transition(DeliveryEvent::Read, now);
        assert!(n.is_read);
        assert_eq!(n.read_at, Some(now));
        assert_eq!(n.status, DeliveryStatus::Read);
    }

    #[test]
    fn read_overrides_terminal_status() {
        // Reading "undoes" failed/bounced; any gating of terminal states
        // would have to change this test deliberately.
        for terminal in [
            DeliveryEvent::Failed {
                reason: Some("smtp timeout".to_string()),
            },
            DeliveryEvent::EmailBounced {
                reason: Some("mailbox full".to_string()),
                bounce_type: None,
                bounce_sub_type: None,
                diagnostic_code: None,
            },
        ] {
            let n = record(NotificationChannel::Email)
                .transition(terminal, instant(1_700_000_100))
                .transition(DeliveryEvent::Read, instant(1_700_000_200));
            assert_eq!(n.status, DeliveryStatus::Read);
            assert!(n.is_read);
        }
    }

    #[test]
    fn delivery_progress_cannot_exit_terminal_states() {
        // An out-of-order or duplicate provider callback must not pull a
        // bounced or read record back to `sent`/`delivered`.
        let n = record(NotificationChannel::Email)
            .transition(
                DeliveryEvent::EmailBounced {
                    reason: Some("mailbox full".to_string()),
                    bounce_type: None,
                    bounce_sub_type: None,
                    diagnostic_code: None,
                },
                instant(1_700_000_100),
            )
            .transition(DeliveryEvent::Delivered, instant(1_700_000_200));
        assert_eq!(n.status, DeliveryStatus::Bounced);
        assert_eq!(n.email_tracking_status, Some(EmailTrackingStatus::Bounced));
        assert_eq!(n.email_delivered_at, None);

        let n = record(NotificationChannel::Email)
            .transition(DeliveryEvent::Read, instant(1_700_000_100))
            .transition(DeliveryEvent::Sent, instant(1_700_000_200));
        assert_eq!(n.status, DeliveryStatus::Read);
        assert_eq!(n.email_sent_at, None);
    }

    #[test]
    fn archive_is_orthogonal_to_status() {
        let n = record(NotificationChannel::Email)
            .transition(
                DeliveryEvent::Failed {
                    reason: Some("boom".to_string()),
                },
                instant(1_700_000_100),
            )
            .transition(DeliveryEvent::Archived, instant(1_700_000_200));
        assert!(n.is_archived);
        assert_eq!(n.archived_at, Some(instant(1_700_000_200)));
        // Archival must not touch the delivery status.
        assert_eq!(n.status, DeliveryStatus::Failed);
    }

    #[test]
    fn archive_overwrites_timestamp_on_repeat() {
        let n = record(NotificationChannel::InApp)
            .transition(DeliveryEvent::Archived, instant(1_700_000_100))
            .transition(DeliveryEvent::Archived, instant(1_700_000_500));
        assert!(n.is_archived);
        assert_eq!(n.archived_at, Some(instant(1_700_000_500)));
    }

    #[test]
    fn failed_records_reason_and_leaves_counters() {
        let n = record(NotificationChannel::Email).transition(
            DeliveryEvent::Failed {
                reason: Some("provider 500".to_string()),
            },
            instant(1_700_000_100),
        );
        assert_eq!(n.status, DeliveryStatus::Failed);
        assert_eq!(n.error_message.as_deref(), Some("provider 500"));
        assert_eq!(n.retry_count, 0);
    }

    #[test]
    fn failed_without_reason_keeps_previous_error_message() {
        let n = record(NotificationChannel::Email)
            .transition(
                DeliveryEvent::Failed {
                    reason: Some("first error".to_string()),
                },
                instant(1_700_000_100),
            )
            .transition(DeliveryEvent::Failed { reason: None }, instant(1_700_000_200));
        assert_eq!(n.error_message.as_deref(), Some("first error"));
    }
}

//! Bounded retry scheduling.
//!
//! The scheduler only updates the record so the dispatch sweep will pick it
//! up again (`status = pending`, `next_retry_at <= now`); it performs no
//! sending itself and never grows delays — a caller wanting exponential
//! backoff computes the delay before raising the event.

use chrono::{Duration, NaiveDateTime};

use crate::db::models::{DeliveryStatus, Notification};

/// Default delay before a retry becomes due: 5 minutes.
pub const DEFAULT_RETRY_DELAY_MS: i64 = 300_000;

/// Re-arm the record for dispatch, or fail it terminally once attempts are
/// exhausted. `retry_count <= max_retries` holds by construction: the count
/// is only incremented while strictly below the maximum.
pub(crate) fn schedule(mut n: Notification, delay: Duration, now: NaiveDateTime) -> Notification {
    if n.retry_count < n.max_retries {
        n.retry_count += 1;
        n.next_retry_at = Some(now + delay);
        n.status = DeliveryStatus::Pending;
    } else {
        n.status = DeliveryStatus::Failed;
    }
    n
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::test_support::{instant, record};
    use crate::lifecycle::DeliveryEvent;
    use crate::db::models::NotificationChannel;

    fn retry(delay_ms: i64) -> DeliveryEvent {
        DeliveryEvent::RetryScheduled {
            delay: Duration::milliseconds(delay_ms),
        }
    }

    #[test]
    fn schedules_while_attempts_remain() {
        let now = instant(1_700_000_100);
        let n = record(NotificationChannel::Email).transition(retry(1000), now);
        assert_eq!(n.retry_count, 1);
        assert_eq!(n.status, DeliveryStatus::Pending);
        assert_eq!(n.next_retry_at, Some(now + Duration::milliseconds(1000)));
    }

    #[test]
    fn exhaustion_fails_terminally_without_touching_count() {
        let mut n = record(NotificationChannel::Email);
        n.retry_count = 3;
        n.max_retries = 3;
        let n = n.transition(retry(1000), instant(1_700_000_100));
        assert_eq!(n.status, DeliveryStatus::Failed);
        assert_eq!(n.retry_count, 3);
        assert_eq!(n.next_retry_at, None);
    }

    #[test]
    fn three_failures_then_exhaustion() {
        // max_retries = 3: three reschedules succeed, the fourth fails.
        let mut n = record(NotificationChannel::Email);
        for attempt in 1..=3 {
            n = n.transition(retry(1000), instant(1_700_000_000 + attempt));
            assert_eq!(n.retry_count, attempt as i32);
            assert_eq!(n.status, DeliveryStatus::Pending);
        }
        let n = n.transition(retry(1000), instant(1_700_000_010));
        assert_eq!(n.status, DeliveryStatus::Failed);
        assert_eq!(n.retry_count, 3);
    }

    #[test]
    fn default_retry_delay_is_five_minutes() {
        let now = instant(1_700_000_100);
        let n = record(NotificationChannel::Email).transition(DeliveryEvent::retry_default(), now);
        assert_eq!(
            n.next_retry_at,
            Some(now + Duration::milliseconds(DEFAULT_RETRY_DELAY_MS))
        );
    }
}

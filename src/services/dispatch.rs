use std::sync::Arc;

use chrono::Duration;
use sqlx::SqlitePool;

use crate::clock::Clock;
use crate::config::DispatchConfig;
use crate::db::models::{DeliveryStatus, Notification};
use crate::db::repository::NotificationRepository;
use crate::error::AppResult;
use crate::lifecycle::DeliveryEvent;
use crate::services::senders::{ChannelSender, InAppSender};

/// Heuristic for whether a send error is likely transient and worth a retry.
/// Inspects common HTTP/network error strings plus the provider-error shape
/// produced by `EmailSender` ("Email provider error (503): ...").
fn is_retryable_error(err: &str) -> bool {
    let e = err.to_lowercase();

    if e.contains("too many requests")
        || e.contains("429")
        || e.contains("timeout")
        || e.contains("timed out")
        || e.contains("temporarily unavailable")
        || e.contains("service unavailable")
        || e.contains("bad gateway")
        || e.contains("connection reset")
        || e.contains("error sending request")
    {
        return true;
    }

    if e.contains("email provider error (") {
        if let Some(open) = e.find('(') {
            if let Some(close_rel) = e[open + 1..].find(')') {
                let code_str = &e[open + 1..open + 1 + close_rel];
                if let Ok(code) = code_str.parse::<u16>() {
                    return code == 429 || code >= 500;
                }
            }
        }
    }

    false
}

/// Exponential backoff for the next attempt:
/// `min(max_backoff, initial_backoff * 2^attempts)`. Computed here because
/// the retry scheduler itself takes a caller-supplied delay and never grows
/// it.
fn backoff_delay(config: &DispatchConfig, attempts: i32) -> Duration {
    let mut delay: u128 = config.initial_backoff_ms as u128;
    for _ in 0..attempts.max(0) {
        delay = delay.saturating_mul(2);
        if delay as u64 >= config.max_backoff_ms {
            delay = config.max_backoff_ms as u128;
            break;
        }
    }
    if delay as u64 > config.max_backoff_ms {
        delay = config.max_backoff_ms as u128;
    }
    Duration::milliseconds(delay as i64)
}

/// The dispatch sweep: picks up due pending records, invokes the channel
/// sender, and feeds the outcome back through the lifecycle engine.
///
/// Records in one batch are processed sequentially, so this worker is the
/// single writer for pending records.
pub struct DispatchService {
    pool: SqlitePool,
    config: DispatchConfig,
    clock: Arc<dyn Clock>,
    email: Arc<dyn ChannelSender>,
    in_app: Arc<dyn ChannelSender>,
}

impl DispatchService {
    pub fn new(
        pool: SqlitePool,
        config: DispatchConfig,
        clock: Arc<dyn Clock>,
        email: Arc<dyn ChannelSender>,
    ) -> Self {
        Self {
            pool,
            config,
            clock,
            email,
            in_app: Arc::new(InAppSender),
        }
    }

    /// Process one batch of due records. Returns how many were picked up.
    pub async fn process_due_batch(&self) -> AppResult<usize> {
        let now = self.clock.now();
        let due =
            NotificationRepository::find_due(&self.pool, now, self.config.batch_size as i64)
                .await?;
        let count = due.len();

        for record in due {
            let id = record.id.clone();
            if let Err(e) = self.process_record(record).await {
                tracing::warn!("Failed to process notification {}: {:?}", id, e);
            }
        }

        Ok(count)
    }

    /// Attempt delivery of a single record and persist the resulting state.
    ///
    /// Success: `Sent` (email stays sent until the provider delivery
    /// callback; in-app-only delivery is complete once the row is visible,
    /// so it advances straight to `Delivered`). Failure: `Failed` with the
    /// reason, then re-armed via `RetryScheduled` when the error looks
    /// transient — which itself degrades to terminal `failed` once attempts
    /// are exhausted.
    pub async fn process_record(&self, record: Notification) -> AppResult<Notification> {
        let now = self.clock.now();
        let sender = if record.channel.includes_email() {
            &self.email
        } else {
            &self.in_app
        };

        match sender.send(&record).await {
            Ok(message_id) => {
                let mut record = record;
                if message_id.is_some() {
                    record.message_id = message_id;
                }
                let record = record.transition(DeliveryEvent::Sent, now);
                // A pure in-app record is delivered the moment the row is
                // visible; email delivery waits for the provider callback.
                let record = if record.channel.includes_in_app() && !record.channel.includes_email()
                {
                    record.transition(DeliveryEvent::Delivered, now)
                } else {
                    record
                };
                let stored = NotificationRepository::update(&self.pool, &record, now).await?;
                tracing::info!(
                    "Notification {} dispatched via {:?} channel",
                    stored.id,
                    stored.channel
                );
                Ok(stored)
            }
            Err(e) => {
                let reason = e.to_string();
                let record = record.transition(
                    DeliveryEvent::Failed {
                        reason: Some(reason.clone()),
                    },
                    now,
                );
                let record = if is_retryable_error(&reason) {
                    let delay = backoff_delay(&self.config, record.retry_count);
                    record.transition(DeliveryEvent::RetryScheduled { delay }, now)
                } else {
                    record
                };
                let stored = NotificationRepository::update(&self.pool, &record, now).await?;
                if stored.status == DeliveryStatus::Pending {
                    tracing::info!(
                        "Notification {} rescheduled (attempt {}/{}): {}",
                        stored.id,
                        stored.retry_count,
                        stored.max_retries,
                        reason
                    );
                } else {
                    tracing::warn!("Notification {} failed terminally: {}", stored.id, reason);
                }
                Ok(stored)
            }
        }
    }
}

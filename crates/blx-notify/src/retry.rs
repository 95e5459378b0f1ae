//! Durable retry scheduler.
//!
//! Sweeps the ledger for failed entries that have retries left, claims
//! each with an atomic conditional update so overlapping cycles never
//! double-attempt, and re-sends only the channels that have not yet
//! succeeded. Entries that exhaust their cap stay failed and drop out of
//! the scan; operators find them through `failed_permanently`.

use std::sync::Arc;
use std::time::Duration;

use blx_core::config::SchedulerConfig;
use blx_core::error::Result;
use blx_core::traits::{EmailSender, MessageSender, NotificationStore};
use blx_core::types::{DeliveryStatus, Notification};

const SEND_ATTEMPTS: u32 = 3;
const BACKOFF_BASE: Duration = Duration::from_secs(1);

pub struct RetryScheduler {
    ledger: Arc<dyn NotificationStore>,
    email: Arc<dyn EmailSender>,
    messages: Arc<dyn MessageSender>,
}

impl RetryScheduler {
    pub fn new(
        ledger: Arc<dyn NotificationStore>,
        email: Arc<dyn EmailSender>,
        messages: Arc<dyn MessageSender>,
    ) -> Self {
        Self { ledger, email, messages }
    }

    /// One sweep. Returns how many entries were delivered this cycle.
    pub async fn retry_pending(&self) -> Result<usize> {
        let candidates = self.ledger.pending_retry().await?;
        if candidates.is_empty() {
            return Ok(0);
        }
        tracing::info!("retrying {} failed notification(s)", candidates.len());

        let mut delivered = 0;
        for entry in candidates {
            if !self.ledger.claim_for_retry(&entry.id).await? {
                tracing::debug!("entry {} claimed by another cycle, skipping", entry.id);
                continue;
            }
            if self.attempt(&entry).await? {
                delivered += 1;
            }
        }
        Ok(delivered)
    }

    /// Re-attempt the channels `entry` still needs. Each channel send
    /// gets a short exponential backoff; the long-haul pacing between
    /// cycles stays with the interval loop.
    async fn attempt(&self, entry: &Notification) -> Result<bool> {
        let mut email_sent = entry.email_sent;
        let mut sms_sent = entry.sms_sent;
        let mut error = None;

        if entry.needs_email() {
            if let Some(to) = &entry.recipient_email {
                match self
                    .with_backoff(|| self.email.send(to, &entry.title, &entry.message))
                    .await
                {
                    Ok(()) => email_sent = true,
                    Err(e) => error = Some(e),
                }
            }
        }
        if entry.needs_sms() {
            if let Some(phone) = entry.phone() {
                match self.with_backoff(|| self.messages.send(phone, &entry.message)).await {
                    Ok(()) => sms_sent = true,
                    Err(e) => {
                        error.get_or_insert(e);
                    }
                }
            }
        }

        let delivered =
            (!entry.needs_email() || email_sent) && (!entry.needs_sms() || sms_sent);
        let status = if delivered { DeliveryStatus::Sent } else { DeliveryStatus::Failed };
        if let Some(e) = &error {
            tracing::warn!(
                "retry {}/{} for entry {} failed: {e}",
                entry.retry_count + 1,
                entry.max_retries,
                entry.id
            );
        } else {
            tracing::info!("entry {} delivered on retry", entry.id);
        }
        self.ledger
            .apply_attempt(
                &entry.id,
                email_sent,
                sms_sent,
                status,
                error.map(|e| e.to_string()).as_deref(),
            )
            .await?;
        Ok(delivered)
    }

    async fn with_backoff<F, Fut>(&self, send: F) -> Result<()>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<()>>,
    {
        let mut delay = BACKOFF_BASE;
        let mut last_err = None;
        for attempt in 0..SEND_ATTEMPTS {
            if attempt > 0 {
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
            match send().await {
                Ok(()) => return Ok(()),
                Err(e) => last_err = Some(e),
            }
        }
        // SEND_ATTEMPTS >= 1, so last_err is always populated here.
        Err(last_err.unwrap_or_else(|| {
            blx_core::error::BlxError::Channel("send attempts exhausted".into())
        }))
    }
}

/// Run the scheduler forever: sweep every `retry_interval_secs`, and on a
/// sweep error log it and sit out `recovery_interval_secs` before the
/// next tick so a sick store is not hammered.
pub fn spawn_retry_loop(
    scheduler: Arc<RetryScheduler>,
    config: SchedulerConfig,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(config.retry_interval_secs));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tracing::info!(
            "notification retry loop started (every {}s)",
            config.retry_interval_secs
        );
        loop {
            interval.tick().await;
            match scheduler.retry_pending().await {
                Ok(0) => {}
                Ok(n) => tracing::info!("retry cycle delivered {n} notification(s)"),
                Err(e) => {
                    tracing::error!("retry cycle failed: {e}");
                    tokio::time::sleep(Duration::from_secs(config.recovery_interval_secs)).await;
                }
            }
        }
    })
}

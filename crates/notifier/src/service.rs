//! The scan loop: walk expiring credentials, match a tier, advance, alert.

use std::{sync::Arc, time::Duration};

use {
    anyhow::Result,
    async_trait::async_trait,
    tracing::{debug, info, warn},
};

use {
    courant_common::now_ms,
    courant_store::{ExpiringCredential, Store},
};

use crate::tiers::{TIERS, Tier, match_tier};

/// External alert delivery (transactional email in production). One call
/// per tier crossing.
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn notify(
        &self,
        credential: &ExpiringCredential,
        tier: &Tier,
        remaining_ms: i64,
    ) -> Result<()>;
}

/// Sink used by default wiring: the alert lands in the service log.
pub struct LogAlertSink;

#[async_trait]
impl AlertSink for LogAlertSink {
    async fn notify(
        &self,
        credential: &ExpiringCredential,
        tier: &Tier,
        remaining_ms: i64,
    ) -> Result<()> {
        info!(
            credential_id = %credential.id,
            label = %credential.label,
            tier = tier.name,
            remaining_ms,
            "credential expiry alert"
        );
        Ok(())
    }
}

pub struct Notifier {
    store: Store,
    sink: Arc<dyn AlertSink>,
    interval: Duration,
}

impl Notifier {
    pub fn new(store: Store, sink: Arc<dyn AlertSink>, interval: Duration) -> Self {
        Self {
            store,
            sink,
            interval,
        }
    }

    /// Fixed-interval scan loop. Safe to run alongside another instance:
    /// tier advancement is a conditional write, so only one scanner wins
    /// each crossing.
    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            ticker.tick().await;
            match self.scan_once(now_ms()).await {
                Ok(0) => {},
                Ok(fired) => debug!(fired, "expiry scan fired notifications"),
                Err(e) => warn!("expiry scan failed: {e:#}"),
            }
        }
    }

    /// One scan pass at time `now`. Returns how many notifications fired.
    ///
    /// The conditional tier write happens before the sink call, making
    /// delivery at-most-once per tier: a sink failure after a won write is
    /// logged and that tier's alert is not re-sent.
    pub async fn scan_once(&self, now: i64) -> Result<usize> {
        let mut fired = 0;
        for credential in self.store.expiring_credentials(now).await? {
            let remaining = credential.expires_at - now;
            let Some(tier_index) = match_tier(remaining) else {
                continue;
            };

            // Only strictly-more-urgent transitions fire. A credential with
            // no prior notification enters at the least urgent position.
            let more_urgent = credential
                .last_notified_tier
                .is_none_or(|last| (tier_index as i64) > last);
            if !more_urgent {
                continue;
            }

            if !self
                .store
                .advance_notified_tier(&credential.id, tier_index as i64)
                .await?
            {
                // A concurrent scanner advanced it first.
                continue;
            }

            let tier = &TIERS[tier_index];
            if let Err(e) = self.sink.notify(&credential, tier, remaining).await {
                warn!(
                    credential_id = %credential.id,
                    tier = tier.name,
                    "alert delivery failed: {e}"
                );
            }
            fired += 1;
        }
        Ok(fired)
    }
}

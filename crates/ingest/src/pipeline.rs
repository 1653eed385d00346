//! Two-stage ingestion: a staging gateway that acknowledges the provider
//! quickly, and a normalizer worker that folds staged payloads into the
//! store.
//!
//! The provider re-delivers the whole payload when it does not get a timely
//! acknowledgment, so the gateway only verifies, stages, and enqueues; all
//! real work happens on the worker. The hand-off is an unbounded mpsc
//! channel backed by the `webhook_logs` table: anything enqueued but not
//! processed before a crash is re-enqueued by [`Normalizer::recover`] at
//! startup (at-least-once).

use std::{sync::Arc, time::Duration};

use {
    anyhow::{Context, Result as AnyResult},
    tokio::sync::mpsc,
    tracing::{debug, error, info, warn},
};

use {
    courant_common::{display_phone, normalize_external_id},
    courant_provider::{ProviderAccount, ProviderClient},
    courant_store::{
        Account, InsertOutcome, MessageStatus, NewInboundMessage, StatusApplied, Store,
    },
};

use crate::{
    error::{IngestError, Result},
    media::MediaSink,
    payload::{ChangeValue, InboundMessage, StatusReceipt, WebhookPayload},
    signature::verify_signature,
};

/// Normalization attempts per staged log before it is closed out as failed.
pub const MAX_ATTEMPTS: i64 = 5;

const RETRY_BACKOFF: Duration = Duration::from_secs(2);

/// Create the staging → normalizer channel.
pub fn queue() -> (mpsc::UnboundedSender<String>, mpsc::UnboundedReceiver<String>) {
    mpsc::unbounded_channel()
}

// ── Staging gateway ──────────────────────────────────────────────────────────

/// Verifies, stages, and enqueues inbound webhook deliveries.
pub struct Ingestor {
    store: Store,
    app_secret: String,
    queue: mpsc::UnboundedSender<String>,
}

impl Ingestor {
    pub fn new(store: Store, app_secret: String, queue: mpsc::UnboundedSender<String>) -> Self {
        Self {
            store,
            app_secret,
            queue,
        }
    }

    /// Stage one signed delivery scoped to `phone_id`.
    ///
    /// Signature mismatch and unknown account both yield the same
    /// [`IngestError::Rejected`]. An account that exists but is not
    /// ingest-eligible is dropped silently (`Ok`): half-provisioned
    /// accounts must not look like webhook failures to the provider.
    pub async fn ingest(
        &self,
        phone_id: &str,
        raw_body: &[u8],
        signature: Option<&str>,
    ) -> Result<()> {
        let signature = signature.ok_or(IngestError::Rejected)?;
        if !verify_signature(raw_body, signature, &self.app_secret) {
            return Err(IngestError::Rejected);
        }

        let account = self
            .store
            .account_by_phone_id(phone_id)
            .await?
            .ok_or(IngestError::Rejected)?;

        if !account.status.is_eligible() {
            debug!(
                account_id = %account.id,
                status = account.status.as_str(),
                "dropping webhook for ineligible account"
            );
            return Ok(());
        }

        let log = self
            .store
            .stage_webhook_log(Some(&account.id), &String::from_utf8_lossy(raw_body))
            .await?;

        if self.queue.send(log.id.clone()).is_err() {
            // The log row survives; startup recovery will pick it up.
            warn!(log_id = %log.id, "normalizer queue closed; staged for recovery");
        }
        Ok(())
    }
}

// ── Normalizer worker ────────────────────────────────────────────────────────

/// Folds staged webhook logs into the store, one log at a time, messages in
/// payload order.
pub struct Normalizer {
    store: Store,
    provider: Arc<dyn ProviderClient>,
    media: Arc<dyn MediaSink>,
    retry: mpsc::UnboundedSender<String>,
}

impl Normalizer {
    pub fn new(
        store: Store,
        provider: Arc<dyn ProviderClient>,
        media: Arc<dyn MediaSink>,
        retry: mpsc::UnboundedSender<String>,
    ) -> Self {
        Self {
            store,
            provider,
            media,
            retry,
        }
    }

    /// Re-enqueue every unprocessed staged log. Run once at startup before
    /// the worker loop.
    pub async fn recover(&self) -> Result<usize> {
        let pending = self.store.unprocessed_webhook_logs().await?;
        let count = pending.len();
        for log in pending {
            let _ = self.retry.send(log.id);
        }
        if count > 0 {
            info!(count, "re-enqueued unprocessed webhook logs");
        }
        Ok(count)
    }

    /// Worker loop. Consumes log ids until the channel closes.
    pub async fn run(self, mut rx: mpsc::UnboundedReceiver<String>) {
        while let Some(log_id) = rx.recv().await {
            if let Err(e) = self.process_log(&log_id).await {
                self.handle_failure(&log_id, &e.to_string()).await;
            }
        }
    }

    /// Record the failure and either schedule a retry or close the log out.
    /// Returns whether a retry was scheduled.
    pub(crate) async fn handle_failure(&self, log_id: &str, message: &str) -> bool {
        if let Err(e) = self.store.record_webhook_error(log_id, message).await {
            error!(log_id, "failed to record webhook error: {e}");
        }

        let attempts = match self.store.webhook_log_by_id(log_id).await {
            Ok(Some(log)) => log.attempts,
            _ => MAX_ATTEMPTS,
        };

        if attempts < MAX_ATTEMPTS {
            warn!(log_id, attempts, "normalization failed, retrying: {message}");
            let tx = self.retry.clone();
            let id = log_id.to_string();
            let delay = RETRY_BACKOFF * attempts as u32;
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let _ = tx.send(id);
            });
            return true;
        }

        warn!(log_id, "normalization failed permanently: {message}");
        if let Err(e) = self.store.mark_webhook_processed(log_id).await {
            error!(log_id, "failed to close out webhook log: {e}");
        }
        false
    }

    /// Normalize one staged log. Already-processed logs are a no-op, so
    /// redundant enqueues (recovery racing the live queue) are harmless.
    pub async fn process_log(&self, log_id: &str) -> AnyResult<()> {
        let log = self
            .store
            .webhook_log_by_id(log_id)
            .await?
            .context("staged webhook log vanished")?;
        if log.processed {
            return Ok(());
        }

        let account_id = log.account_id.context("staged log has no account")?;
        let account = self
            .store
            .account_by_id(&account_id)
            .await?
            .context("staged log references unknown account")?;

        let payload: WebhookPayload =
            serde_json::from_str(&log.payload).context("malformed staged payload")?;

        for entry in &payload.entry {
            for change in &entry.changes {
                if change.field != "messages" {
                    debug!(field = %change.field, "ignoring non-message webhook change");
                    continue;
                }
                self.apply_change(&account, &change.value).await?;
            }
        }

        self.store.mark_webhook_processed(log_id).await?;
        Ok(())
    }

    async fn apply_change(&self, account: &Account, value: &ChangeValue) -> AnyResult<()> {
        // Sender display names, keyed by contact external id.
        let names: std::collections::HashMap<&str, &str> = value
            .contacts
            .iter()
            .filter_map(|c| c.profile.as_ref().map(|p| (c.wa_id.as_str(), p.name.as_str())))
            .collect();

        // Strictly sequential: arrival order within one payload is an
        // ordering guarantee.
        for message in &value.messages {
            self.apply_message(account, &names, message).await?;
        }

        for receipt in &value.statuses {
            self.apply_receipt(receipt).await?;
        }
        Ok(())
    }

    async fn apply_message(
        &self,
        account: &Account,
        names: &std::collections::HashMap<&str, &str>,
        message: &InboundMessage,
    ) -> AnyResult<()> {
        if self
            .store
            .message_by_external_id(&message.id)
            .await?
            .is_some()
        {
            debug!(external_id = %message.id, "skipping already-ingested message");
            return Ok(());
        }

        let external_id = normalize_external_id(&message.from);
        let display_name = names.get(external_id.as_str()).copied();
        let contact = self
            .store
            .upsert_contact(
                &account.id,
                &external_id,
                &display_phone(&external_id),
                display_name,
            )
            .await?;
        let conversation = self
            .store
            .find_or_create_conversation(&account.id, &contact.id)
            .await?;

        let outcome = self
            .store
            .record_inbound_message(
                &conversation.id,
                &account.id,
                NewInboundMessage {
                    external_id: message.id.clone(),
                    kind: message.kind(),
                    body: message.body_text(),
                    media_id: message.media_id().map(str::to_string),
                    reply_to: message.reply_to().map(str::to_string),
                    sent_at: message.timestamp_ms(),
                    preview: message.preview(),
                },
            )
            .await?;

        if let InsertOutcome::Inserted(message_id) = outcome
            && let Some(media_id) = message.media_id()
        {
            self.spawn_media_download(account, &message_id, media_id);
        }
        Ok(())
    }

    async fn apply_receipt(&self, receipt: &StatusReceipt) -> AnyResult<()> {
        let Some(status) = MessageStatus::parse(&receipt.status) else {
            warn!(status = %receipt.status, "ignoring receipt with unknown status");
            return Ok(());
        };

        let error = receipt.errors.first();
        let code = error.and_then(|e| e.code).map(|c| c.to_string());
        let title = error.and_then(|e| e.title.clone());

        let applied = self
            .store
            .apply_status_update(
                &receipt.id,
                status,
                receipt.timestamp_ms(),
                code.as_deref(),
                title.as_deref(),
            )
            .await?;

        match applied {
            StatusApplied::Applied => {},
            StatusApplied::Discarded => {
                debug!(external_id = %receipt.id, status = %receipt.status, "receipt behind current status");
            },
            StatusApplied::NotFound => {
                debug!(external_id = %receipt.id, "receipt for unknown message");
            },
        }
        Ok(())
    }

    /// Detached, best-effort media download. Never retried: a failure
    /// leaves the message without a media key permanently.
    fn spawn_media_download(&self, account: &Account, message_id: &str, media_id: &str) {
        let Some(phone_id) = account.phone_id.clone() else {
            debug!(account_id = %account.id, "account has no phone id; skipping media download");
            return;
        };
        let provider_account = ProviderAccount {
            phone_id,
            business_id: account.business_id.clone(),
            access_token: account.access_token.clone(),
        };
        let store = self.store.clone();
        let provider = Arc::clone(&self.provider);
        let media = Arc::clone(&self.media);
        let message_id = message_id.to_string();
        let media_id = media_id.to_string();

        tokio::spawn(async move {
            if let Err(e) =
                download_media(&store, provider.as_ref(), media.as_ref(), &provider_account, &message_id, &media_id)
                    .await
            {
                warn!(message_id, media_id, "media download failed (not retried): {e}");
            }
        });
    }
}

/// Resolve, download, and store one media object, then attach its storage
/// key to the message.
pub async fn download_media(
    store: &Store,
    provider: &dyn ProviderClient,
    media: &dyn MediaSink,
    account: &ProviderAccount,
    message_id: &str,
    media_id: &str,
) -> AnyResult<String> {
    let info = provider.fetch_media_info(account, media_id).await?;
    let bytes = provider.download_media(account, &info.url).await?;
    let key = media.put(media_id, &info.mime_type, bytes).await?;
    store.attach_media_key(message_id, &key).await?;
    Ok(key)
}

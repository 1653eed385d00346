//! Webhook staging log. Rows are never deleted; they are the audit and
//! replay trail for everything the provider ever pushed at us.

use courant_common::now_ms;

use crate::{
    error::{Result, StoreError},
    store::{Store, new_id, webhook_log_from_row},
    types::WebhookLog,
};

impl Store {
    /// Stage a raw payload before acknowledging the provider.
    pub async fn stage_webhook_log(
        &self,
        account_id: Option<&str>,
        payload: &str,
    ) -> Result<WebhookLog> {
        let id = new_id();
        sqlx::query(
            "INSERT INTO webhook_logs (id, account_id, payload, created_at)
             VALUES (?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(account_id)
        .bind(payload)
        .bind(now_ms())
        .execute(&self.pool)
        .await?;

        self.webhook_log_by_id(&id)
            .await?
            .ok_or(StoreError::NotFound { what: "webhook log" })
    }

    pub async fn webhook_log_by_id(&self, id: &str) -> Result<Option<WebhookLog>> {
        let row = sqlx::query("SELECT * FROM webhook_logs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(webhook_log_from_row))
    }

    pub async fn mark_webhook_processed(&self, id: &str) -> Result<()> {
        sqlx::query("UPDATE webhook_logs SET processed = 1 WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Record a normalization failure and bump the attempt counter. The log
    /// stays unprocessed so a retry actually re-runs it.
    pub async fn record_webhook_error(&self, id: &str, error: &str) -> Result<()> {
        sqlx::query("UPDATE webhook_logs SET error = ?, attempts = attempts + 1 WHERE id = ?")
            .bind(error)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Unprocessed logs in arrival order, for startup recovery.
    pub async fn unprocessed_webhook_logs(&self) -> Result<Vec<WebhookLog>> {
        let rows =
            sqlx::query("SELECT * FROM webhook_logs WHERE processed = 0 ORDER BY created_at")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.iter().map(webhook_log_from_row).collect())
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use crate::accounts::tests::make_store;

    #[tokio::test]
    async fn stage_then_process() {
        let store = make_store().await;
        let log = store
            .stage_webhook_log(Some("acct-1"), r#"{"entry":[]}"#)
            .await
            .unwrap();
        assert!(!log.processed);
        assert_eq!(log.attempts, 0);

        store.mark_webhook_processed(&log.id).await.unwrap();
        let log = store.webhook_log_by_id(&log.id).await.unwrap().unwrap();
        assert!(log.processed);
        assert!(store.unprocessed_webhook_logs().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn errors_keep_the_log_retryable() {
        let store = make_store().await;
        let log = store.stage_webhook_log(None, "{}").await.unwrap();

        store.record_webhook_error(&log.id, "boom").await.unwrap();
        let log = store.webhook_log_by_id(&log.id).await.unwrap().unwrap();
        assert!(!log.processed);
        assert_eq!(log.error.as_deref(), Some("boom"));
        assert_eq!(log.attempts, 1);

        let pending = store.unprocessed_webhook_logs().await.unwrap();
        assert_eq!(pending.len(), 1);
    }
}

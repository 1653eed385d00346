//! Expiring-credential records consumed by the escalating tier notifier.
//!
//! Tier advancement is a conditional UPDATE: two overlapping scans can both
//! decide to notify, but only the one whose tier is strictly more urgent
//! than the stored value wins the write, so a tier fires at most once.

use crate::{
    error::{Result, StoreError},
    store::{Store, credential_from_row, new_id},
    types::ExpiringCredential,
};

impl Store {
    pub async fn insert_credential(
        &self,
        account_id: &str,
        label: &str,
        expires_at: i64,
    ) -> Result<ExpiringCredential> {
        let id = new_id();
        sqlx::query(
            "INSERT INTO credentials (id, account_id, label, expires_at)
             VALUES (?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(account_id)
        .bind(label)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;

        self.credential_by_id(&id)
            .await?
            .ok_or(StoreError::NotFound { what: "credential" })
    }

    pub async fn credential_by_id(&self, id: &str) -> Result<Option<ExpiringCredential>> {
        let row = sqlx::query("SELECT * FROM credentials WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(credential_from_row))
    }

    /// Credentials that have not yet expired at `now`.
    pub async fn expiring_credentials(&self, now: i64) -> Result<Vec<ExpiringCredential>> {
        let rows = sqlx::query("SELECT * FROM credentials WHERE expires_at > ? ORDER BY expires_at")
            .bind(now)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(credential_from_row).collect())
    }

    /// Advance `last_notified_tier` to `tier` only if strictly more urgent
    /// than what is recorded. Returns whether this caller won the write.
    pub async fn advance_notified_tier(&self, id: &str, tier: i64) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE credentials SET last_notified_tier = ?
             WHERE id = ?
               AND (last_notified_tier IS NULL OR last_notified_tier < ?)",
        )
        .bind(tier)
        .bind(id)
        .bind(tier)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// A credential was renewed: move its expiry and restart the escalation
    /// ladder from scratch.
    pub async fn mark_credential_refreshed(&self, id: &str, new_expires_at: i64) -> Result<()> {
        let result = sqlx::query(
            "UPDATE credentials SET expires_at = ?, last_notified_tier = NULL WHERE id = ?",
        )
        .bind(new_expires_at)
        .bind(id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound { what: "credential" });
        }
        Ok(())
    }
}

//! Contact queries.
//!
//! `upsert_contact` is the only write path and must be safe under concurrent
//! webhook deliveries for the same contact: the UNIQUE(account_id,
//! external_id) constraint plus `ON CONFLICT DO UPDATE` makes overlapping
//! upserts converge without a lock.

use courant_common::now_ms;

use crate::{
    error::{Result, StoreError},
    store::{Store, contact_from_row, new_id},
    types::Contact,
};

impl Store {
    /// Create the contact if unseen, otherwise patch its display name when
    /// the provider supplied one. A known name is never overwritten with
    /// nothing.
    pub async fn upsert_contact(
        &self,
        account_id: &str,
        external_id: &str,
        phone: &str,
        display_name: Option<&str>,
    ) -> Result<Contact> {
        sqlx::query(
            "INSERT INTO contacts (id, account_id, external_id, phone, display_name, created_at)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(account_id, external_id) DO UPDATE SET
               display_name = COALESCE(excluded.display_name, contacts.display_name)",
        )
        .bind(new_id())
        .bind(account_id)
        .bind(external_id)
        .bind(phone)
        .bind(display_name)
        .bind(now_ms())
        .execute(&self.pool)
        .await?;

        self.contact_by_external_id(account_id, external_id)
            .await?
            .ok_or(StoreError::NotFound { what: "contact" })
    }

    pub async fn contact_by_external_id(
        &self,
        account_id: &str,
        external_id: &str,
    ) -> Result<Option<Contact>> {
        let row = sqlx::query("SELECT * FROM contacts WHERE account_id = ? AND external_id = ?")
            .bind(account_id)
            .bind(external_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(contact_from_row))
    }

    pub async fn contact_by_id(&self, id: &str) -> Result<Option<Contact>> {
        let row = sqlx::query("SELECT * FROM contacts WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(contact_from_row))
    }

    /// Contacts for one account, most recently active first. Feeds the
    /// gateway's disclosure options.
    pub async fn recent_contacts(&self, account_id: &str, limit: u32) -> Result<Vec<Contact>> {
        let rows = sqlx::query(
            "SELECT contacts.* FROM contacts
             LEFT JOIN conversations
               ON conversations.account_id = contacts.account_id
              AND conversations.contact_id = contacts.id
             WHERE contacts.account_id = ?
             ORDER BY COALESCE(conversations.last_message_at, contacts.created_at) DESC
             LIMIT ?",
        )
        .bind(account_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(contact_from_row).collect())
    }
}

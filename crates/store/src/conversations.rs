//! Conversation queries. Window advancement lives in `messages.rs` with the
//! inbound insert so the two can never disagree.

use crate::{
    error::{Result, StoreError},
    store::{Store, conversation_from_row, new_id},
    types::{Conversation, ConversationSummary},
};

use sqlx::Row;

impl Store {
    /// Fetch or lazily create the thread for (account, contact). Safe under
    /// concurrent execution: the UNIQUE constraint absorbs the race and the
    /// follow-up select returns whichever insert won.
    pub async fn find_or_create_conversation(
        &self,
        account_id: &str,
        contact_id: &str,
    ) -> Result<Conversation> {
        sqlx::query(
            "INSERT INTO conversations (id, account_id, contact_id)
             VALUES (?, ?, ?)
             ON CONFLICT(account_id, contact_id) DO NOTHING",
        )
        .bind(new_id())
        .bind(account_id)
        .bind(contact_id)
        .execute(&self.pool)
        .await?;

        let row =
            sqlx::query("SELECT * FROM conversations WHERE account_id = ? AND contact_id = ?")
                .bind(account_id)
                .bind(contact_id)
                .fetch_optional(&self.pool)
                .await?;
        row.as_ref()
            .map(conversation_from_row)
            .ok_or(StoreError::NotFound {
                what: "conversation",
            })
    }

    pub async fn conversation_by_id(&self, id: &str) -> Result<Option<Conversation>> {
        let row = sqlx::query("SELECT * FROM conversations WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(conversation_from_row))
    }

    pub async fn conversation_for_contact(
        &self,
        account_id: &str,
        contact_id: &str,
    ) -> Result<Option<Conversation>> {
        let row =
            sqlx::query("SELECT * FROM conversations WHERE account_id = ? AND contact_id = ?")
                .bind(account_id)
                .bind(contact_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.as_ref().map(conversation_from_row))
    }

    /// Conversations for one account, most recent activity first, joined
    /// with contact phone/name for display.
    pub async fn list_conversations(
        &self,
        account_id: &str,
        include_archived: bool,
        limit: u32,
    ) -> Result<Vec<ConversationSummary>> {
        let rows = sqlx::query(
            "SELECT conversations.*, contacts.phone AS contact_phone,
                    contacts.display_name AS contact_name
             FROM conversations
             JOIN contacts ON contacts.id = conversations.contact_id
             WHERE conversations.account_id = ?
               AND (? OR conversations.archived = 0)
             ORDER BY conversations.last_message_at IS NULL,
                      conversations.last_message_at DESC
             LIMIT ?",
        )
        .bind(account_id)
        .bind(include_archived)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| ConversationSummary {
                conversation: conversation_from_row(row),
                contact_phone: row.get("contact_phone"),
                contact_name: row.get("contact_name"),
            })
            .collect())
    }

    /// Non-archived conversations with unread inbound messages, oldest
    /// activity first so the longest-waiting contact surfaces on top.
    pub async fn list_unanswered(
        &self,
        account_id: &str,
        limit: u32,
    ) -> Result<Vec<ConversationSummary>> {
        let rows = sqlx::query(
            "SELECT conversations.*, contacts.phone AS contact_phone,
                    contacts.display_name AS contact_name
             FROM conversations
             JOIN contacts ON contacts.id = conversations.contact_id
             WHERE conversations.account_id = ?
               AND conversations.unread_count > 0
               AND conversations.archived = 0
             ORDER BY conversations.last_message_at ASC
             LIMIT ?",
        )
        .bind(account_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| ConversationSummary {
                conversation: conversation_from_row(row),
                contact_phone: row.get("contact_phone"),
                contact_name: row.get("contact_name"),
            })
            .collect())
    }

    /// Reset the unread counter (the dashboard opened the thread).
    pub async fn mark_read(&self, conversation_id: &str) -> Result<()> {
        let result = sqlx::query("UPDATE conversations SET unread_count = 0 WHERE id = ?")
            .bind(conversation_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                what: "conversation",
            });
        }
        Ok(())
    }

    pub async fn set_archived(&self, conversation_id: &str, archived: bool) -> Result<()> {
        let result = sqlx::query("UPDATE conversations SET archived = ? WHERE id = ?")
            .bind(archived)
            .bind(conversation_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                what: "conversation",
            });
        }
        Ok(())
    }
}

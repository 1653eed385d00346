//! Message persistence and the conversation advancement that rides along
//! with it.
//!
//! Inbound inserts are idempotent on the provider's external message id and
//! atomic with the conversation update (preview, unread, window), so a
//! redelivered webhook can never double-count. Status updates go through the
//! lattice in [`MessageStatus::accepts`] and are applied with a conditional
//! UPDATE, so out-of-order receipts and concurrent appliers both converge.

use courant_common::DAY_MS;

use crate::{
    error::{Result, StoreError},
    store::{Store, message_from_row, new_id},
    types::{Direction, Message, MessageKind, MessageStatus},
};

/// An inbound message as normalized from a webhook payload.
#[derive(Debug, Clone)]
pub struct NewInboundMessage {
    pub external_id: String,
    pub kind: MessageKind,
    pub body: Option<String>,
    pub media_id: Option<String>,
    pub reply_to: Option<String>,
    /// Provider timestamp (epoch millis); also the window anchor.
    pub sent_at: i64,
    pub preview: String,
}

/// An outbound message as accepted (or rejected) by the provider.
#[derive(Debug, Clone)]
pub struct NewOutboundMessage {
    pub external_id: String,
    pub kind: MessageKind,
    pub body: Option<String>,
    pub media_id: Option<String>,
    pub reply_to: Option<String>,
    pub sent_at: i64,
    pub preview: String,
    pub status: MessageStatus,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
}

/// Result of an idempotent insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted(String),
    /// A message with this external id already exists; nothing changed.
    Duplicate,
}

/// Result of pushing a status receipt through the lattice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusApplied {
    Applied,
    /// The update was at or behind the current status and was dropped.
    Discarded,
    NotFound,
}

impl Store {
    /// Insert an inbound message and advance its conversation in one
    /// transaction: `last_message_at`, preview, `unread_count += 1`, and
    /// `window_expires_at = sent_at + 24h`. Returns `Duplicate` (leaving
    /// everything untouched) when the external id was already recorded.
    pub async fn record_inbound_message(
        &self,
        conversation_id: &str,
        account_id: &str,
        new: NewInboundMessage,
    ) -> Result<InsertOutcome> {
        let id = new_id();
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            "INSERT INTO messages
             (id, conversation_id, account_id, external_id, direction, kind,
              status, status_at, body, media_id, reply_to, sent_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(external_id) DO NOTHING",
        )
        .bind(&id)
        .bind(conversation_id)
        .bind(account_id)
        .bind(&new.external_id)
        .bind(Direction::Inbound.as_str())
        .bind(new.kind.as_str())
        .bind(MessageStatus::Delivered.as_str())
        .bind(new.sent_at)
        .bind(&new.body)
        .bind(&new.media_id)
        .bind(&new.reply_to)
        .bind(new.sent_at)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if inserted == 0 {
            tx.rollback().await?;
            return Ok(InsertOutcome::Duplicate);
        }

        sqlx::query(
            "UPDATE conversations SET
               last_message_at = ?,
               last_message_preview = ?,
               unread_count = unread_count + 1,
               window_expires_at = ?
             WHERE id = ?",
        )
        .bind(new.sent_at)
        .bind(&new.preview)
        .bind(new.sent_at + DAY_MS)
        .bind(conversation_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(InsertOutcome::Inserted(id))
    }

    /// Insert an outbound message and advance the conversation's activity
    /// marker and preview. Outbound sends never touch `unread_count` or
    /// `window_expires_at`.
    pub async fn insert_outbound_message(
        &self,
        conversation_id: &str,
        account_id: &str,
        new: NewOutboundMessage,
    ) -> Result<InsertOutcome> {
        let id = new_id();
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            "INSERT INTO messages
             (id, conversation_id, account_id, external_id, direction, kind,
              status, status_at, error_code, error_message, body, media_id,
              reply_to, sent_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(external_id) DO NOTHING",
        )
        .bind(&id)
        .bind(conversation_id)
        .bind(account_id)
        .bind(&new.external_id)
        .bind(Direction::Outbound.as_str())
        .bind(new.kind.as_str())
        .bind(new.status.as_str())
        .bind(new.sent_at)
        .bind(&new.error_code)
        .bind(&new.error_message)
        .bind(&new.body)
        .bind(&new.media_id)
        .bind(&new.reply_to)
        .bind(new.sent_at)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if inserted == 0 {
            tx.rollback().await?;
            return Ok(InsertOutcome::Duplicate);
        }

        sqlx::query(
            "UPDATE conversations SET last_message_at = ?, last_message_preview = ?
             WHERE id = ?",
        )
        .bind(new.sent_at)
        .bind(&new.preview)
        .bind(conversation_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(InsertOutcome::Inserted(id))
    }

    /// Apply a delivery/read/failure receipt keyed by external message id.
    ///
    /// The conditional UPDATE re-checks the current status, so a racing
    /// applier that advanced the message first simply turns this call into
    /// `Discarded`.
    pub async fn apply_status_update(
        &self,
        external_id: &str,
        status: MessageStatus,
        status_at: i64,
        error_code: Option<&str>,
        error_message: Option<&str>,
    ) -> Result<StatusApplied> {
        let Some(current) = self.message_by_external_id(external_id).await? else {
            return Ok(StatusApplied::NotFound);
        };
        if !current.status.accepts(status) {
            return Ok(StatusApplied::Discarded);
        }

        let result = sqlx::query(
            "UPDATE messages SET status = ?, status_at = ?, error_code = ?, error_message = ?
             WHERE external_id = ? AND status = ?",
        )
        .bind(status.as_str())
        .bind(status_at)
        .bind(error_code)
        .bind(error_message)
        .bind(external_id)
        .bind(current.status.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(StatusApplied::Discarded);
        }
        Ok(StatusApplied::Applied)
    }

    /// Record where a downloaded media blob landed.
    pub async fn attach_media_key(&self, message_id: &str, media_key: &str) -> Result<()> {
        let result = sqlx::query("UPDATE messages SET media_key = ? WHERE id = ?")
            .bind(media_key)
            .bind(message_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound { what: "message" });
        }
        Ok(())
    }

    pub async fn message_by_external_id(&self, external_id: &str) -> Result<Option<Message>> {
        let row = sqlx::query("SELECT * FROM messages WHERE external_id = ?")
            .bind(external_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(message_from_row).transpose()
    }

    pub async fn message_by_id(&self, id: &str) -> Result<Option<Message>> {
        let row = sqlx::query("SELECT * FROM messages WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(message_from_row).transpose()
    }

    /// Messages in one conversation, newest first. `before` (an exclusive
    /// `sent_at` bound) pages further back.
    pub async fn list_messages(
        &self,
        conversation_id: &str,
        before: Option<i64>,
        limit: u32,
    ) -> Result<Vec<Message>> {
        let rows = sqlx::query(
            "SELECT * FROM messages
             WHERE conversation_id = ?
               AND (? IS NULL OR sent_at < ?)
             ORDER BY sent_at DESC
             LIMIT ?",
        )
        .bind(conversation_id)
        .bind(before)
        .bind(before)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(message_from_row).collect()
    }

    /// Case-insensitive substring search over message bodies, scoped to one
    /// account, newest first.
    pub async fn search_messages(
        &self,
        account_id: &str,
        query: &str,
        limit: u32,
    ) -> Result<Vec<Message>> {
        let escaped = query.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_");
        let rows = sqlx::query(
            "SELECT * FROM messages
             WHERE account_id = ?
               AND body IS NOT NULL
               AND LOWER(body) LIKE '%' || LOWER(?) || '%' ESCAPE '\\'
             ORDER BY sent_at DESC
             LIMIT ?",
        )
        .bind(account_id)
        .bind(&escaped)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(message_from_row).collect()
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounts::tests::{make_account, make_store};
    use crate::types::Conversation;

    async fn seed() -> (Store, String, Conversation) {
        let store = make_store().await;
        let account = store.insert_account(make_account("ph-1")).await.unwrap();
        let contact = store
            .upsert_contact(&account.id, "15550102345", "+15550102345", None)
            .await
            .unwrap();
        let conv = store
            .find_or_create_conversation(&account.id, &contact.id)
            .await
            .unwrap();
        (store, account.id, conv)
    }

    fn inbound(external_id: &str, sent_at: i64, body: &str) -> NewInboundMessage {
        NewInboundMessage {
            external_id: external_id.into(),
            kind: MessageKind::Text,
            body: Some(body.into()),
            media_id: None,
            reply_to: None,
            sent_at,
            preview: body.into(),
        }
    }

    #[tokio::test]
    async fn inbound_insert_is_idempotent() {
        let (store, account_id, conv) = seed().await;

        for _ in 0..3 {
            store
                .record_inbound_message(&conv.id, &account_id, inbound("wamid.1", 1_000, "hi"))
                .await
                .unwrap();
        }

        let messages = store.list_messages(&conv.id, None, 50).await.unwrap();
        assert_eq!(messages.len(), 1);

        let conv = store.conversation_by_id(&conv.id).await.unwrap().unwrap();
        assert_eq!(conv.unread_count, 1);
        assert_eq!(conv.last_message_preview, "hi");
        assert_eq!(conv.window_expires_at, Some(1_000 + DAY_MS));
    }

    #[tokio::test]
    async fn outbound_send_never_extends_window() {
        let (store, account_id, conv) = seed().await;

        store
            .record_inbound_message(&conv.id, &account_id, inbound("wamid.1", 1_000, "hi"))
            .await
            .unwrap();

        store
            .insert_outbound_message(
                &conv.id,
                &account_id,
                NewOutboundMessage {
                    external_id: "wamid.2".into(),
                    kind: MessageKind::Text,
                    body: Some("hello back".into()),
                    media_id: None,
                    reply_to: None,
                    sent_at: 2_000,
                    preview: "hello back".into(),
                    status: MessageStatus::Sent,
                    error_code: None,
                    error_message: None,
                },
            )
            .await
            .unwrap();

        let conv = store.conversation_by_id(&conv.id).await.unwrap().unwrap();
        assert_eq!(conv.window_expires_at, Some(1_000 + DAY_MS));
        assert_eq!(conv.last_message_at, Some(2_000));
        assert_eq!(conv.unread_count, 1);
    }

    #[tokio::test]
    async fn out_of_order_receipts_stay_at_read() {
        let (store, account_id, conv) = seed().await;
        store
            .insert_outbound_message(
                &conv.id,
                &account_id,
                NewOutboundMessage {
                    external_id: "wamid.out".into(),
                    kind: MessageKind::Text,
                    body: Some("x".into()),
                    media_id: None,
                    reply_to: None,
                    sent_at: 1_000,
                    preview: "x".into(),
                    status: MessageStatus::Pending,
                    error_code: None,
                    error_message: None,
                },
            )
            .await
            .unwrap();

        let apply = |status, at| {
            let store = store.clone();
            async move {
                store
                    .apply_status_update("wamid.out", status, at, None, None)
                    .await
                    .unwrap()
            }
        };

        assert_eq!(apply(MessageStatus::Read, 4_000).await, StatusApplied::Applied);
        assert_eq!(
            apply(MessageStatus::Sent, 2_000).await,
            StatusApplied::Discarded
        );
        assert_eq!(
            apply(MessageStatus::Delivered, 3_000).await,
            StatusApplied::Discarded
        );

        let msg = store
            .message_by_external_id("wamid.out")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(msg.status, MessageStatus::Read);

        // failed is reachable even from read, then absorbing.
        assert_eq!(
            apply(MessageStatus::Failed, 5_000).await,
            StatusApplied::Applied
        );
        assert_eq!(
            apply(MessageStatus::Failed, 6_000).await,
            StatusApplied::Discarded
        );
    }

    #[tokio::test]
    async fn receipt_for_unknown_message() {
        let (store, _, _) = seed().await;
        let applied = store
            .apply_status_update("wamid.none", MessageStatus::Read, 1, None, None)
            .await
            .unwrap();
        assert_eq!(applied, StatusApplied::NotFound);
    }

    #[tokio::test]
    async fn listing_pages_backwards() {
        let (store, account_id, conv) = seed().await;
        for i in 0..5 {
            store
                .record_inbound_message(
                    &conv.id,
                    &account_id,
                    inbound(&format!("wamid.{i}"), 1_000 + i, &format!("m{i}")),
                )
                .await
                .unwrap();
        }

        let page1 = store.list_messages(&conv.id, None, 2).await.unwrap();
        assert_eq!(page1.len(), 2);
        assert_eq!(page1[0].sent_at, 1_004);

        let page2 = store
            .list_messages(&conv.id, Some(page1[1].sent_at), 2)
            .await
            .unwrap();
        assert_eq!(page2[0].sent_at, 1_002);
    }

    #[tokio::test]
    async fn search_is_account_scoped_and_case_insensitive() {
        let (store, account_id, conv) = seed().await;
        store
            .record_inbound_message(&conv.id, &account_id, inbound("wamid.1", 1_000, "Order #42 shipped"))
            .await
            .unwrap();
        store
            .record_inbound_message(&conv.id, &account_id, inbound("wamid.2", 2_000, "unrelated"))
            .await
            .unwrap();

        let hits = store.search_messages(&account_id, "order", 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].external_id, "wamid.1");

        let none = store.search_messages("other-account", "order", 10).await.unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn search_escapes_like_wildcards() {
        let (store, account_id, conv) = seed().await;
        store
            .record_inbound_message(&conv.id, &account_id, inbound("wamid.1", 1_000, "100% done"))
            .await
            .unwrap();

        assert_eq!(
            store
                .search_messages(&account_id, "100%", 10)
                .await
                .unwrap()
                .len(),
            1
        );
        assert!(
            store
                .search_messages(&account_id, "%", 10)
                .await
                .unwrap()
                .len()
                == 1
        );
        assert!(
            store
                .search_messages(&account_id, "_", 10)
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn media_key_attaches_once_downloaded() {
        let (store, account_id, conv) = seed().await;
        let outcome = store
            .record_inbound_message(
                &conv.id,
                &account_id,
                NewInboundMessage {
                    external_id: "wamid.img".into(),
                    kind: MessageKind::Image,
                    body: None,
                    media_id: Some("media-1".into()),
                    reply_to: None,
                    sent_at: 1_000,
                    preview: "[Image]".into(),
                },
            )
            .await
            .unwrap();
        let InsertOutcome::Inserted(id) = outcome else {
            panic!("expected insert");
        };

        store.attach_media_key(&id, "blob/abc").await.unwrap();
        let msg = store.message_by_id(&id).await.unwrap().unwrap();
        assert_eq!(msg.media_key.as_deref(), Some("blob/abc"));
    }
}

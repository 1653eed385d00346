//! Connection management and schema setup.
//!
//! One [`Store`] wraps a [`SqlitePool`]; all query modules hang off it as
//! `impl Store` blocks. Invariants (status lattice, window advancement,
//! idempotent inserts) are enforced here, never left to callers.

use sqlx::{
    Row, SqlitePool,
    sqlite::{SqlitePoolOptions, SqliteRow},
};

use crate::{
    error::{Result, StoreError},
    types::*,
};

/// SQLite-backed system of record for accounts, contacts, conversations,
/// messages, webhook logs, and expiring credentials.
#[derive(Clone)]
pub struct Store {
    pub(crate) pool: SqlitePool,
}

impl Store {
    /// Open a database at `url`, create the schema, and return the store.
    ///
    /// For shared pools (one database file for the whole service), use
    /// [`Store::with_pool`] after calling [`Store::init`].
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(url)
            .await?;
        Self::init(&pool).await?;
        Ok(Self { pool })
    }

    /// Wrap an existing pool. [`Store::init`] must already have run.
    pub fn with_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Create all tables and indexes.
    pub async fn init(pool: &SqlitePool) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS accounts (
                id           TEXT PRIMARY KEY,
                user_id      TEXT NOT NULL,
                business_id  TEXT NOT NULL,
                phone_id     TEXT UNIQUE,
                phone        TEXT NOT NULL,
                display_name TEXT NOT NULL,
                access_token TEXT NOT NULL,
                verify_token TEXT NOT NULL,
                status       TEXT NOT NULL,
                created_at   INTEGER NOT NULL
            )",
        )
        .execute(pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS contacts (
                id           TEXT PRIMARY KEY,
                account_id   TEXT NOT NULL,
                external_id  TEXT NOT NULL,
                phone        TEXT NOT NULL,
                display_name TEXT,
                created_at   INTEGER NOT NULL,
                UNIQUE(account_id, external_id)
            )",
        )
        .execute(pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS conversations (
                id                   TEXT PRIMARY KEY,
                account_id           TEXT NOT NULL,
                contact_id           TEXT NOT NULL,
                last_message_at      INTEGER,
                last_message_preview TEXT NOT NULL DEFAULT '',
                unread_count         INTEGER NOT NULL DEFAULT 0,
                window_expires_at    INTEGER,
                archived             INTEGER NOT NULL DEFAULT 0,
                UNIQUE(account_id, contact_id)
            )",
        )
        .execute(pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS messages (
                id              TEXT PRIMARY KEY,
                conversation_id TEXT NOT NULL,
                account_id      TEXT NOT NULL,
                external_id     TEXT NOT NULL UNIQUE,
                direction       TEXT NOT NULL,
                kind            TEXT NOT NULL,
                status          TEXT NOT NULL,
                status_at       INTEGER NOT NULL,
                error_code      TEXT,
                error_message   TEXT,
                body            TEXT,
                media_id        TEXT,
                media_key       TEXT,
                reply_to        TEXT,
                sent_at         INTEGER NOT NULL
            )",
        )
        .execute(pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_messages_conversation
             ON messages (conversation_id, sent_at DESC)",
        )
        .execute(pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS webhook_logs (
                id         TEXT PRIMARY KEY,
                account_id TEXT,
                payload    TEXT NOT NULL,
                processed  INTEGER NOT NULL DEFAULT 0,
                error      TEXT,
                attempts   INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL
            )",
        )
        .execute(pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS credentials (
                id                 TEXT PRIMARY KEY,
                account_id         TEXT NOT NULL,
                label              TEXT NOT NULL,
                expires_at         INTEGER NOT NULL,
                last_notified_tier INTEGER
            )",
        )
        .execute(pool)
        .await?;

        Ok(())
    }
}

// ── Row mapping ──────────────────────────────────────────────────────────────

fn parse_col<T>(
    parsed: Option<T>,
    column: &'static str,
    value: &str,
) -> std::result::Result<T, StoreError> {
    parsed.ok_or_else(|| StoreError::Corrupt {
        column,
        value: value.to_string(),
    })
}

pub(crate) fn account_from_row(row: &SqliteRow) -> Result<Account> {
    let status: String = row.get("status");
    Ok(Account {
        id: row.get("id"),
        user_id: row.get("user_id"),
        business_id: row.get("business_id"),
        phone_id: row.get("phone_id"),
        phone: row.get("phone"),
        display_name: row.get("display_name"),
        access_token: row.get("access_token"),
        verify_token: row.get("verify_token"),
        status: parse_col(AccountStatus::parse(&status), "status", &status)?,
        created_at: row.get("created_at"),
    })
}

pub(crate) fn contact_from_row(row: &SqliteRow) -> Contact {
    Contact {
        id: row.get("id"),
        account_id: row.get("account_id"),
        external_id: row.get("external_id"),
        phone: row.get("phone"),
        display_name: row.get("display_name"),
        created_at: row.get("created_at"),
    }
}

pub(crate) fn conversation_from_row(row: &SqliteRow) -> Conversation {
    Conversation {
        id: row.get("id"),
        account_id: row.get("account_id"),
        contact_id: row.get("contact_id"),
        last_message_at: row.get("last_message_at"),
        last_message_preview: row.get("last_message_preview"),
        unread_count: row.get("unread_count"),
        window_expires_at: row.get("window_expires_at"),
        archived: row.get::<i64, _>("archived") != 0,
    }
}

pub(crate) fn message_from_row(row: &SqliteRow) -> Result<Message> {
    let direction: String = row.get("direction");
    let kind: String = row.get("kind");
    let status: String = row.get("status");
    Ok(Message {
        id: row.get("id"),
        conversation_id: row.get("conversation_id"),
        account_id: row.get("account_id"),
        external_id: row.get("external_id"),
        direction: parse_col(Direction::parse(&direction), "direction", &direction)?,
        kind: parse_col(MessageKind::parse(&kind), "kind", &kind)?,
        status: parse_col(MessageStatus::parse(&status), "status", &status)?,
        status_at: row.get("status_at"),
        error_code: row.get("error_code"),
        error_message: row.get("error_message"),
        body: row.get("body"),
        media_id: row.get("media_id"),
        media_key: row.get("media_key"),
        reply_to: row.get("reply_to"),
        sent_at: row.get("sent_at"),
    })
}

pub(crate) fn webhook_log_from_row(row: &SqliteRow) -> WebhookLog {
    WebhookLog {
        id: row.get("id"),
        account_id: row.get("account_id"),
        payload: row.get("payload"),
        processed: row.get::<i64, _>("processed") != 0,
        error: row.get("error"),
        attempts: row.get("attempts"),
        created_at: row.get("created_at"),
    }
}

pub(crate) fn credential_from_row(row: &SqliteRow) -> ExpiringCredential {
    ExpiringCredential {
        id: row.get("id"),
        account_id: row.get("account_id"),
        label: row.get("label"),
        expires_at: row.get("expires_at"),
        last_notified_tier: row.get("last_notified_tier"),
    }
}

pub(crate) fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

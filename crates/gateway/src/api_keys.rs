//! API keys for tool-gateway access.
//!
//! Keys are high-entropy random strings; only the SHA-256 hash is stored.
//! The plaintext is returned exactly once at creation and is never
//! recoverable afterward. Revocation is a hard delete.

use {
    anyhow::{Context, Result},
    rand::{Rng, distr::Alphanumeric},
    serde::Serialize,
    sha2::{Digest, Sha256},
    sqlx::{Row, SqlitePool},
};

use courant_common::now_ms;

/// A gateway capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    Read,
    Write,
    Send,
}

impl Scope {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Send => "send",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "read" => Some(Self::Read),
            "write" => Some(Self::Write),
            "send" => Some(Self::Send),
            _ => None,
        }
    }
}

/// Key metadata as listed to callers: prefix only, never hash or plaintext.
#[derive(Debug, Clone, Serialize)]
pub struct ApiKey {
    pub id: String,
    pub prefix: String,
    pub account_id: String,
    pub scopes: Vec<Scope>,
    pub expires_at: Option<i64>,
    pub created_at: i64,
    pub last_used_at: Option<i64>,
}

#[derive(Clone)]
pub struct ApiKeyStore {
    pool: SqlitePool,
}

impl ApiKeyStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn init(pool: &SqlitePool) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS api_keys (
                id           TEXT PRIMARY KEY,
                key_hash     TEXT NOT NULL UNIQUE,
                prefix       TEXT NOT NULL,
                account_id   TEXT NOT NULL,
                scopes       TEXT NOT NULL,
                expires_at   INTEGER,
                created_at   INTEGER NOT NULL,
                last_used_at INTEGER
            )",
        )
        .execute(pool)
        .await
        .context("failed to init api_keys table")?;
        Ok(())
    }

    /// Create a key. The returned plaintext is shown to the caller once and
    /// never stored.
    pub async fn create(
        &self,
        account_id: &str,
        scopes: &[Scope],
        expires_at: Option<i64>,
    ) -> Result<(ApiKey, String)> {
        let plaintext = generate_key();
        let id = uuid::Uuid::new_v4().to_string();
        let prefix = format!("{}…", &plaintext[..8]);
        let joined = scopes
            .iter()
            .map(|s| s.as_str())
            .collect::<Vec<_>>()
            .join(",");
        let created_at = now_ms();

        sqlx::query(
            "INSERT INTO api_keys
             (id, key_hash, prefix, account_id, scopes, expires_at, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(hash_key(&plaintext))
        .bind(&prefix)
        .bind(account_id)
        .bind(&joined)
        .bind(expires_at)
        .bind(created_at)
        .execute(&self.pool)
        .await?;

        Ok((
            ApiKey {
                id,
                prefix,
                account_id: account_id.to_string(),
                scopes: scopes.to_vec(),
                expires_at,
                created_at,
                last_used_at: None,
            },
            plaintext,
        ))
    }

    /// Resolve a presented plaintext to a live key. Not-found and expired
    /// are indistinguishable to the caller by design.
    pub async fn verify(&self, presented: &str, now: i64) -> Result<Option<ApiKey>> {
        let row = sqlx::query(
            "SELECT * FROM api_keys
             WHERE key_hash = ? AND (expires_at IS NULL OR expires_at > ?)",
        )
        .bind(hash_key(presented))
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|row| api_key_from_row(&row)).transpose()
    }

    /// Best-effort usage stamp; the caller runs this detached and ignores
    /// the outcome.
    pub async fn touch_last_used(&self, id: &str) -> Result<()> {
        sqlx::query("UPDATE api_keys SET last_used_at = ? WHERE id = ?")
            .bind(now_ms())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn list(&self, account_id: &str) -> Result<Vec<ApiKey>> {
        let rows = sqlx::query("SELECT * FROM api_keys WHERE account_id = ? ORDER BY created_at")
            .bind(account_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(api_key_from_row).collect()
    }

    /// Hard delete. Returns whether a key was actually removed.
    pub async fn revoke(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM api_keys WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

fn generate_key() -> String {
    let random: String = rand::rng()
        .sample_iter(Alphanumeric)
        .take(40)
        .map(char::from)
        .collect();
    format!("ck_{random}")
}

fn hash_key(plaintext: &str) -> String {
    hex::encode(Sha256::digest(plaintext.as_bytes()))
}

fn api_key_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<ApiKey> {
    let scopes_raw: String = row.get("scopes");
    let scopes = scopes_raw
        .split(',')
        .filter(|s| !s.is_empty())
        .map(|s| Scope::parse(s).with_context(|| format!("unknown scope in row: {s}")))
        .collect::<Result<Vec<_>>>()?;
    Ok(ApiKey {
        id: row.get("id"),
        prefix: row.get("prefix"),
        account_id: row.get("account_id"),
        scopes,
        expires_at: row.get("expires_at"),
        created_at: row.get("created_at"),
        last_used_at: row.get("last_used_at"),
    })
}

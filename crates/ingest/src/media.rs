//! Media blob storage seam.
//!
//! Object storage is an external collaborator; this trait is its interface.
//! Downloads are best-effort fire-and-forget: a failure leaves the message
//! without a media key permanently (see the pipeline).

use std::{collections::HashMap, sync::Mutex};

use {anyhow::Result, async_trait::async_trait};

use courant_common::now_ms;

#[async_trait]
pub trait MediaSink: Send + Sync {
    /// Store a blob and return its storage key.
    async fn put(&self, key_hint: &str, content_type: &str, bytes: Vec<u8>) -> Result<String>;

    /// A short-lived signed URL for a stored blob. The URL must expire; it
    /// is handed to dashboard sessions via a redirect and never persisted.
    async fn signed_url(&self, key: &str, ttl_secs: u64) -> Result<String>;
}

/// In-memory stand-in used by the binary's default wiring and by tests.
#[derive(Default)]
pub struct InMemoryMediaSink {
    blobs: Mutex<HashMap<String, (String, Vec<u8>)>>,
}

impl InMemoryMediaSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs.lock().map(|b| b.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl MediaSink for InMemoryMediaSink {
    async fn put(&self, key_hint: &str, content_type: &str, bytes: Vec<u8>) -> Result<String> {
        let key = format!("media/{key_hint}");
        let mut blobs = self
            .blobs
            .lock()
            .map_err(|_| anyhow::anyhow!("media sink poisoned"))?;
        blobs.insert(key.clone(), (content_type.to_string(), bytes));
        Ok(key)
    }

    async fn signed_url(&self, key: &str, ttl_secs: u64) -> Result<String> {
        let blobs = self
            .blobs
            .lock()
            .map_err(|_| anyhow::anyhow!("media sink poisoned"))?;
        if !blobs.contains_key(key) {
            anyhow::bail!("unknown media key: {key}");
        }
        let expires = now_ms() + (ttl_secs as i64) * 1_000;
        Ok(format!("memory://{key}?expires={expires}"))
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_sign() {
        let sink = InMemoryMediaSink::new();
        let key = sink.put("media-1", "image/png", vec![1, 2, 3]).await.unwrap();
        assert_eq!(key, "media/media-1");

        let url = sink.signed_url(&key, 60).await.unwrap();
        assert!(url.starts_with("memory://media/media-1?expires="));

        assert!(sink.signed_url("media/other", 60).await.is_err());
    }
}

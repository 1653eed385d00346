//! reqwest implementation of [`ProviderClient`] against the provider's
//! graph-style REST API.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::{
    client::ProviderClient,
    error::{ProviderError, Result},
    types::*,
};

pub const DEFAULT_BASE_URL: &str = "https://graph.provider.com/v19.0";

pub struct HttpProviderClient {
    http: reqwest::Client,
    base_url: String,
}

impl HttpProviderClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    async fn post_message(
        &self,
        account: &ProviderAccount,
        body: serde_json::Value,
    ) -> Result<SentMessage> {
        let url = format!("{}/{}/messages", self.base_url, account.phone_id);
        debug!(phone_id = %account.phone_id, "posting message to provider");

        let response = self
            .http
            .post(&url)
            .bearer_auth(&account.access_token)
            .json(&body)
            .send()
            .await?;

        let envelope: SendResponse = read_json(response).await?;
        let message_id = envelope
            .messages
            .into_iter()
            .next()
            .map(|m| m.id)
            .ok_or_else(|| ProviderError::Malformed("send response had no message id".into()))?;
        Ok(SentMessage { message_id })
    }
}

impl Default for HttpProviderClient {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_URL)
    }
}

#[async_trait]
impl ProviderClient for HttpProviderClient {
    async fn send_message(
        &self,
        account: &ProviderAccount,
        message: Outbound,
    ) -> Result<SentMessage> {
        let body = match &message {
            Outbound::Text { to, body } => json!({
                "messaging_product": "whatsapp",
                "to": to,
                "type": "text",
                "text": { "body": body },
            }),
            Outbound::Media {
                to,
                media_kind,
                link,
                caption,
            } => {
                let mut media = json!({ "link": link });
                if let Some(caption) = caption {
                    media["caption"] = json!(caption);
                }
                let mut body = json!({
                    "messaging_product": "whatsapp",
                    "to": to,
                    "type": media_kind.as_str(),
                });
                body[media_kind.as_str()] = media;
                body
            },
            Outbound::Reaction {
                to,
                message_id,
                emoji,
            } => json!({
                "messaging_product": "whatsapp",
                "to": to,
                "type": "reaction",
                "reaction": { "message_id": message_id, "emoji": emoji },
            }),
        };
        self.post_message(account, body).await
    }

    async fn send_template(
        &self,
        account: &ProviderAccount,
        template: TemplateSend,
    ) -> Result<SentMessage> {
        let parameters: Vec<serde_json::Value> = template
            .parameters
            .iter()
            .map(|p| {
                let mut v = json!({ "type": "text", "text": p.text });
                if let Some(ref name) = p.parameter_name {
                    v["parameter_name"] = json!(name);
                }
                v
            })
            .collect();

        let body = json!({
            "messaging_product": "whatsapp",
            "to": template.to,
            "type": "template",
            "template": {
                "name": template.name,
                "language": { "code": template.language },
                "components": [{ "type": "body", "parameters": parameters }],
            },
        });
        self.post_message(account, body).await
    }

    async fn fetch_templates(&self, account: &ProviderAccount) -> Result<Vec<Template>> {
        let url = format!("{}/{}/message_templates", self.base_url, account.business_id);
        let response = self
            .http
            .get(&url)
            .bearer_auth(&account.access_token)
            .send()
            .await?;
        let envelope: TemplatesResponse = read_json(response).await?;
        Ok(envelope.data)
    }

    async fn fetch_media_info(
        &self,
        account: &ProviderAccount,
        media_id: &str,
    ) -> Result<MediaInfo> {
        let url = format!("{}/{}", self.base_url, media_id);
        let response = self
            .http
            .get(&url)
            .bearer_auth(&account.access_token)
            .send()
            .await?;
        read_json(response).await
    }

    async fn download_media(&self, account: &ProviderAccount, url: &str) -> Result<Vec<u8>> {
        let response = self
            .http
            .get(url)
            .bearer_auth(&account.access_token)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(ProviderError::Api {
                code: Some(response.status().as_u16().to_string()),
                message: "media download rejected".into(),
            });
        }
        Ok(response.bytes().await?.to_vec())
    }
}

// ── Wire shapes ──────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct SendResponse {
    #[serde(default)]
    messages: Vec<SentId>,
}

#[derive(Deserialize)]
struct SentId {
    id: String,
}

#[derive(Deserialize)]
struct TemplatesResponse {
    #[serde(default)]
    data: Vec<Template>,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
    #[serde(default)]
    code: Option<serde_json::Value>,
}

/// Parse a 2xx body as `T`, or map the provider's error envelope into
/// [`ProviderError::Api`].
async fn read_json<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    let status = response.status();
    let bytes = response.bytes().await?;

    if !status.is_success() {
        if let Ok(envelope) = serde_json::from_slice::<ErrorEnvelope>(&bytes) {
            return Err(ProviderError::Api {
                code: envelope.error.code.map(|c| c.to_string().trim_matches('"').to_string()),
                message: envelope.error.message,
            });
        }
        return Err(ProviderError::Api {
            code: Some(status.as_u16().to_string()),
            message: String::from_utf8_lossy(&bytes).into_owned(),
        });
    }

    serde_json::from_slice(&bytes).map_err(|e| ProviderError::Malformed(e.to_string()))
}

//! Tool dispatch: authentication, scope enforcement, rate limiting,
//! disclosure, and delegation to the store and the Provider Client.
//!
//! The external contract never raises: every path out of [`Gateway::invoke`]
//! is a JSON value, either a tool result, a disclosure, or `{error: true}`.

use std::sync::Arc;

use {
    anyhow::{Context, Result as AnyResult},
    serde_json::{Value, json},
    tracing::{debug, warn},
};

use {
    courant_common::{now_ms, truncate_preview},
    courant_ingest::MediaSink,
    courant_provider::{
        Outbound, ProviderAccount, ProviderClient, ProviderError, SentMessage, Template,
        TemplateSend,
    },
    courant_store::{Account, Conversation, MessageKind, MessageStatus, NewOutboundMessage, Store},
};

use crate::{
    api_keys::ApiKeyStore,
    disclosure::{Disclosure, Resolved, resolve_recipient, resolve_sender},
    rate_limit::{RateLimitConfig, RateLimiter},
    templates::{TemplateParameterInput, validate_parameters},
    tools::{ToolCall, scope_for},
};

/// How long media redirect URLs stay valid.
const MEDIA_URL_TTL_SECS: u64 = 300;

pub struct Gateway {
    store: Store,
    keys: ApiKeyStore,
    provider: Arc<dyn ProviderClient>,
    media: Arc<dyn MediaSink>,
    limiter: RateLimiter,
}

fn fail(message: impl Into<String>) -> Value {
    json!({ "error": true, "message": message.into() })
}

fn disclose(disclosure: Disclosure) -> Value {
    json!({ "disclosure": disclosure })
}

impl Gateway {
    pub fn new(
        store: Store,
        keys: ApiKeyStore,
        provider: Arc<dyn ProviderClient>,
        media: Arc<dyn MediaSink>,
        rate_limit: RateLimitConfig,
    ) -> Self {
        Self {
            store,
            keys,
            provider,
            media,
            limiter: RateLimiter::new(rate_limit),
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn keys(&self) -> &ApiKeyStore {
        &self.keys
    }

    /// Invoke a tool. Always returns a value, never an error.
    pub async fn invoke(&self, presented_key: &str, request: Value) -> Value {
        match self.invoke_inner(presented_key, request).await {
            Ok(value) => value,
            Err(e) => {
                warn!("tool invocation failed internally: {e:#}");
                fail("internal error while handling the request")
            },
        }
    }

    async fn invoke_inner(&self, presented_key: &str, mut request: Value) -> AnyResult<Value> {
        // Authentication: not-found and expired are indistinguishable.
        let Some(key) = self.keys.verify(presented_key, now_ms()).await? else {
            return Ok(fail("invalid or expired API key"));
        };

        // Best-effort usage stamp; must never block or fail the request.
        {
            let keys = self.keys.clone();
            let key_id = key.id.clone();
            tokio::spawn(async move {
                if let Err(e) = keys.touch_last_used(&key_id).await {
                    debug!("last-used stamp failed: {e}");
                }
            });
        }

        // Unknown tools fail before any scope check: a tool missing from
        // the scope tables must fail closed, not open.
        let Some(tool) = request.get("tool").and_then(Value::as_str).map(str::to_string) else {
            return Ok(fail("missing tool name"));
        };
        let Some(required) = scope_for(&tool) else {
            return Ok(fail(format!("unknown tool: {tool}")));
        };

        if !key.scopes.contains(&required) {
            return Ok(fail(format!(
                "missing scope: {} (required by {tool})",
                required.as_str()
            )));
        }

        if let Err(window_secs) = self.limiter.check(&key.id) {
            return Ok(json!({
                "error": true,
                "code": "rate_limited",
                "message": format!("rate limit exceeded; retry within {window_secs}s"),
            }));
        }

        let Some(key_account) = self.store.account_by_id(&key.account_id).await? else {
            return Ok(fail("invalid or expired API key"));
        };

        if request.get("args").is_none() {
            request["args"] = json!({});
        }
        let call: ToolCall = match serde_json::from_value(request) {
            Ok(call) => call,
            Err(e) => return Ok(fail(format!("invalid arguments for {tool}: {e}"))),
        };

        self.dispatch(&key_account, call).await
    }

    async fn dispatch(&self, key_account: &Account, call: ToolCall) -> AnyResult<Value> {
        let user_id = key_account.user_id.as_str();
        match call {
            ToolCall::ListConversations {
                from,
                include_archived,
                limit,
            } => {
                let account = match resolve_sender(&self.store, user_id, from.as_deref()).await? {
                    Resolved::Found(a) => a,
                    Resolved::Disclose(d) => return Ok(disclose(d)),
                };
                let summaries = self
                    .store
                    .list_conversations(&account.id, include_archived, limit.unwrap_or(50))
                    .await?;
                Ok(json!({ "conversations": with_window_flags(&summaries)? }))
            },

            ToolCall::ListUnanswered { from, limit } => {
                let account = match resolve_sender(&self.store, user_id, from.as_deref()).await? {
                    Resolved::Found(a) => a,
                    Resolved::Disclose(d) => return Ok(disclose(d)),
                };
                let summaries = self
                    .store
                    .list_unanswered(&account.id, limit.unwrap_or(50))
                    .await?;
                Ok(json!({ "conversations": with_window_flags(&summaries)? }))
            },

            ToolCall::GetConversation {
                from,
                phone,
                limit,
                before,
            } => {
                let account = match resolve_sender(&self.store, user_id, from.as_deref()).await? {
                    Resolved::Found(a) => a,
                    Resolved::Disclose(d) => return Ok(disclose(d)),
                };
                let contact =
                    match resolve_recipient(&self.store, &account, phone.as_deref(), false).await? {
                        Resolved::Found(c) => c,
                        Resolved::Disclose(d) => return Ok(disclose(d)),
                    };
                let Some(conversation) = self
                    .store
                    .conversation_for_contact(&account.id, &contact.id)
                    .await?
                else {
                    return Ok(fail(format!("no conversation with {} yet", contact.phone)));
                };
                let messages = self
                    .store
                    .list_messages(&conversation.id, before, limit.unwrap_or(25))
                    .await?;
                Ok(json!({
                    "conversation": conversation,
                    "contact": contact,
                    "window_open": conversation.window_open(now_ms()),
                    "messages": messages,
                }))
            },

            ToolCall::SearchMessages { from, query, limit } => {
                let account = match resolve_sender(&self.store, user_id, from.as_deref()).await? {
                    Resolved::Found(a) => a,
                    Resolved::Disclose(d) => return Ok(disclose(d)),
                };
                let query = match require(query, "search_messages", "query") {
                    Ok(query) => query,
                    Err(v) => return Ok(v),
                };
                let hits = self
                    .store
                    .search_messages(&account.id, &query, limit.unwrap_or(25))
                    .await?;
                Ok(json!({ "messages": hits }))
            },

            ToolCall::ListTemplates { from } => {
                let account = match resolve_sender(&self.store, user_id, from.as_deref()).await? {
                    Resolved::Found(a) => a,
                    Resolved::Disclose(d) => return Ok(disclose(d)),
                };
                let provider_account = match provider_account(&account) {
                    Ok(pa) => pa,
                    Err(v) => return Ok(v),
                };
                match self.provider.fetch_templates(&provider_account).await {
                    Ok(templates) => Ok(json!({ "templates": templates })),
                    Err(e) => Ok(provider_failure(&e, None)),
                }
            },

            ToolCall::SendText { from, phone, body } => {
                self.free_form_send(user_id, from, phone, |to| {
                    let body = require(body, "send_text", "body")?;
                    Ok((MessageKind::Text, body.clone(), Outbound::Text { to, body }))
                })
                .await
            },

            ToolCall::SendMedia {
                from,
                phone,
                media_kind,
                link,
                caption,
            } => {
                self.free_form_send(user_id, from, phone, |to| {
                    let media_kind = require(media_kind, "send_media", "media_kind")?;
                    let link = require(link, "send_media", "link")?;
                    let preview = caption
                        .clone()
                        .unwrap_or_else(|| media_kind_label(media_kind).to_string());
                    Ok((
                        media_kind_to_message_kind(media_kind),
                        preview,
                        Outbound::Media {
                            to,
                            media_kind,
                            link,
                            caption,
                        },
                    ))
                })
                .await
            },

            ToolCall::SendReaction {
                from,
                phone,
                message_id,
                emoji,
            } => {
                self.free_form_send(user_id, from, phone, |to| {
                    let message_id = require(message_id, "send_reaction", "message_id")?;
                    let emoji = require(emoji, "send_reaction", "emoji")?;
                    Ok((
                        MessageKind::Reaction,
                        emoji.clone(),
                        Outbound::Reaction {
                            to,
                            message_id,
                            emoji,
                        },
                    ))
                })
                .await
            },

            ToolCall::SendTemplate {
                from,
                phone,
                template,
                language,
                parameters,
            } => {
                self.template_send(user_id, from, phone, template, language, parameters)
                    .await
            },

            ToolCall::UpdateConversation {
                from,
                phone,
                archived,
                mark_read,
            } => {
                let account = match resolve_sender(&self.store, user_id, from.as_deref()).await? {
                    Resolved::Found(a) => a,
                    Resolved::Disclose(d) => return Ok(disclose(d)),
                };
                let contact =
                    match resolve_recipient(&self.store, &account, phone.as_deref(), false).await? {
                        Resolved::Found(c) => c,
                        Resolved::Disclose(d) => return Ok(disclose(d)),
                    };
                let Some(conversation) = self
                    .store
                    .conversation_for_contact(&account.id, &contact.id)
                    .await?
                else {
                    return Ok(fail(format!("no conversation with {} yet", contact.phone)));
                };

                if let Some(archived) = archived {
                    self.store.set_archived(&conversation.id, archived).await?;
                }
                if mark_read == Some(true) {
                    self.store.mark_read(&conversation.id).await?;
                }
                let updated = self
                    .store
                    .conversation_by_id(&conversation.id)
                    .await?
                    .context("conversation vanished mid-update")?;
                Ok(json!({ "updated": true, "conversation": updated }))
            },
        }
    }

    /// Shared path for window-gated free-form sends (text, media, reaction).
    ///
    /// `build` validates the content fields and assembles the outbound, and
    /// runs only after the sender and recipient have resolved: an omitted
    /// `from` or `phone` discloses before a missing content field can fail.
    async fn free_form_send(
        &self,
        user_id: &str,
        from: Option<String>,
        phone: Option<String>,
        build: impl FnOnce(String) -> Result<(MessageKind, String, Outbound), Value>,
    ) -> AnyResult<Value> {
        let account = match resolve_sender(&self.store, user_id, from.as_deref()).await? {
            Resolved::Found(a) => a,
            Resolved::Disclose(d) => return Ok(disclose(d)),
        };
        if let Err(v) = check_send_eligible(&account) {
            return Ok(v);
        }
        let provider_account = match provider_account(&account) {
            Ok(pa) => pa,
            Err(v) => return Ok(v),
        };
        let contact = match resolve_recipient(&self.store, &account, phone.as_deref(), true).await?
        {
            Resolved::Found(c) => c,
            Resolved::Disclose(d) => return Ok(disclose(d)),
        };

        let (kind, preview_source, outbound) = match build(contact.external_id.clone()) {
            Ok(parts) => parts,
            Err(v) => return Ok(v),
        };

        let conversation = self
            .store
            .find_or_create_conversation(&account.id, &contact.id)
            .await?;

        // Free-form content is only deliverable inside the 24h window.
        if !conversation.window_open(now_ms()) {
            return Ok(json!({
                "error": true,
                "code": "window_closed",
                "message": format!(
                    "the 24h messaging window for {} is closed; use send_template \
                     with a pre-approved template instead",
                    contact.phone
                ),
            }));
        }

        let result = self.provider.send_message(&provider_account, outbound).await;
        self.record_send(&account, &conversation, kind, preview_source, result, None)
            .await
    }

    async fn template_send(
        &self,
        user_id: &str,
        from: Option<String>,
        phone: Option<String>,
        template: Option<String>,
        language: Option<String>,
        parameters: Vec<TemplateParameterInput>,
    ) -> AnyResult<Value> {
        let account = match resolve_sender(&self.store, user_id, from.as_deref()).await? {
            Resolved::Found(a) => a,
            Resolved::Disclose(d) => return Ok(disclose(d)),
        };
        if let Err(v) = check_send_eligible(&account) {
            return Ok(v);
        }
        let provider_account = match provider_account(&account) {
            Ok(pa) => pa,
            Err(v) => return Ok(v),
        };
        let contact = match resolve_recipient(&self.store, &account, phone.as_deref(), true).await?
        {
            Resolved::Found(c) => c,
            Resolved::Disclose(d) => return Ok(disclose(d)),
        };
        let template_name = match require(template, "send_template", "template") {
            Ok(name) => name,
            Err(v) => return Ok(v),
        };
        let conversation = self
            .store
            .find_or_create_conversation(&account.id, &contact.id)
            .await?;

        // Validate against the live catalog, not a cached copy.
        let catalog = match self.provider.fetch_templates(&provider_account).await {
            Ok(catalog) => catalog,
            Err(e) => return Ok(provider_failure(&e, None)),
        };
        let Some(template) = catalog.iter().find(|t| {
            t.name == template_name
                && language.as_deref().is_none_or(|lang| t.language == lang)
        }) else {
            let known: Vec<&str> = catalog.iter().map(|t| t.name.as_str()).collect();
            return Ok(json!({
                "error": true,
                "message": format!("no template named '{template_name}'"),
                "available_templates": known,
            }));
        };

        let (wire_parameters, preview) = match validate_parameters(template, &parameters) {
            Ok(validated) => validated,
            Err(corrective) => {
                let mut value = serde_json::to_value(&*corrective)?;
                value["error"] = json!(true);
                value["template"] = json!(template.name);
                return Ok(value);
            },
        };

        let send = TemplateSend {
            to: contact.external_id.clone(),
            name: template.name.clone(),
            language: template.language.clone(),
            parameters: wire_parameters,
        };
        let result = self.provider.send_template(&provider_account, send).await;

        // On provider failure, attach the current catalog so the caller can
        // self-correct without a second round trip.
        let catalog_on_error = if result.is_err() {
            match self.provider.fetch_templates(&provider_account).await {
                Ok(fresh) => Some(fresh),
                Err(_) => Some(catalog),
            }
        } else {
            None
        };

        self.record_send(
            &account,
            &conversation,
            MessageKind::Template,
            preview,
            result,
            catalog_on_error,
        )
        .await
    }

    /// Persist the send outcome and shape the caller's response.
    async fn record_send(
        &self,
        account: &Account,
        conversation: &Conversation,
        kind: MessageKind,
        preview_source: String,
        result: Result<SentMessage, ProviderError>,
        templates_on_error: Option<Vec<Template>>,
    ) -> AnyResult<Value> {
        let now = now_ms();
        let preview = if preview_source.is_empty() {
            kind.preview_label().to_string()
        } else {
            truncate_preview(&preview_source, 100)
        };

        match result {
            Ok(sent) => {
                self.store
                    .insert_outbound_message(
                        &conversation.id,
                        &account.id,
                        NewOutboundMessage {
                            external_id: sent.message_id.clone(),
                            kind,
                            body: Some(preview_source),
                            media_id: None,
                            reply_to: None,
                            sent_at: now,
                            preview: preview.clone(),
                            status: MessageStatus::Sent,
                            error_code: None,
                            error_message: None,
                        },
                    )
                    .await?;
                Ok(json!({
                    "sent": true,
                    "message_id": sent.message_id,
                    "preview": preview,
                }))
            },
            Err(e) => {
                let code = e.code().map(str::to_string);
                let message = e.to_string();
                self.store
                    .insert_outbound_message(
                        &conversation.id,
                        &account.id,
                        NewOutboundMessage {
                            external_id: format!("failed:{}", uuid::Uuid::new_v4()),
                            kind,
                            body: Some(preview_source),
                            media_id: None,
                            reply_to: None,
                            sent_at: now,
                            preview,
                            status: MessageStatus::Failed,
                            error_code: code.clone(),
                            error_message: Some(message.clone()),
                        },
                    )
                    .await?;
                Ok(provider_failure_parts(code, message, templates_on_error))
            },
        }
    }

    /// Resolve a message's media reference to a short-lived signed URL.
    pub async fn media_url(&self, presented_key: &str, message_id: &str) -> Value {
        match self.media_url_inner(presented_key, message_id).await {
            Ok(value) => value,
            Err(e) => {
                warn!("media resolution failed internally: {e:#}");
                fail("internal error while handling the request")
            },
        }
    }

    async fn media_url_inner(&self, presented_key: &str, message_id: &str) -> AnyResult<Value> {
        let Some(key) = self.keys.verify(presented_key, now_ms()).await? else {
            return Ok(fail("invalid or expired API key"));
        };
        if !key.scopes.contains(&crate::api_keys::Scope::Read) {
            return Ok(fail("missing scope: read (required by media retrieval)"));
        }

        let Some(message) = self.store.message_by_id(message_id).await? else {
            return Ok(fail("unknown message"));
        };
        let Some(media_key) = message.media_key else {
            return Ok(fail("message has no stored media"));
        };
        let url = self.media.signed_url(&media_key, MEDIA_URL_TTL_SECS).await?;
        Ok(json!({ "url": url }))
    }
}

fn with_window_flags(
    summaries: &[courant_store::ConversationSummary],
) -> AnyResult<Vec<Value>> {
    let now = now_ms();
    summaries
        .iter()
        .map(|s| {
            let mut value = serde_json::to_value(s)?;
            value["window_open"] = json!(s.conversation.window_open(now));
            Ok(value)
        })
        .collect()
}

/// A content field the tool cannot proceed without. Unlike `from` and
/// `phone` there is no choice list to disclose, so the miss is a plain
/// structured error. Checked only after sender and recipient resolution.
fn require<T>(value: Option<T>, tool: &str, field: &str) -> Result<T, Value> {
    value.ok_or_else(|| fail(format!("{tool} requires '{field}'")))
}

fn provider_account(account: &Account) -> Result<ProviderAccount, Value> {
    let Some(phone_id) = account.phone_id.clone() else {
        return Err(fail(format!(
            "account {} has not completed phone registration",
            account.phone
        )));
    };
    Ok(ProviderAccount {
        phone_id,
        business_id: account.business_id.clone(),
        access_token: account.access_token.clone(),
    })
}

/// Eligibility failures are reported explicitly for outbound sends (unlike
/// inbound webhooks, which drop silently).
fn check_send_eligible(account: &Account) -> Result<(), Value> {
    if account.status.is_eligible() {
        return Ok(());
    }
    Err(fail(format!(
        "account {} cannot send (status: {})",
        account.phone,
        account.status.as_str()
    )))
}

fn provider_failure(e: &ProviderError, templates: Option<Vec<Template>>) -> Value {
    provider_failure_parts(e.code().map(str::to_string), e.to_string(), templates)
}

fn provider_failure_parts(
    code: Option<String>,
    message: String,
    templates: Option<Vec<Template>>,
) -> Value {
    let mut value = json!({ "error": true, "message": message });
    if let Some(code) = code {
        value["provider_code"] = json!(code);
    }
    if let Some(templates) = templates {
        value["templates"] = json!(templates);
    }
    value
}

fn media_kind_label(kind: courant_provider::MediaKind) -> &'static str {
    media_kind_to_message_kind(kind).preview_label()
}

fn media_kind_to_message_kind(kind: courant_provider::MediaKind) -> MessageKind {
    match kind {
        courant_provider::MediaKind::Image => MessageKind::Image,
        courant_provider::MediaKind::Video => MessageKind::Video,
        courant_provider::MediaKind::Audio => MessageKind::Audio,
        courant_provider::MediaKind::Document => MessageKind::Document,
    }
}

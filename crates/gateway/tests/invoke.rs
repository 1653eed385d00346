//! End-to-end tests for the tool gateway and webhook intake over HTTP.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::{
    net::SocketAddr,
    sync::{Arc, Mutex},
    time::Duration,
};

use {
    async_trait::async_trait,
    serde_json::{Value, json},
    tokio::net::TcpListener,
};

use {
    courant_common::{DAY_MS, now_ms},
    courant_gateway::{
        ApiKeyStore, Gateway, RateLimitConfig, Scope,
        routes::{AppState, build_app},
    },
    courant_ingest::{InMemoryMediaSink, Ingestor, MediaSink, Normalizer, queue},
    courant_provider::{
        ComponentKind, MediaInfo, Outbound, ProviderAccount, ProviderClient, ProviderError,
        SentMessage, Template, TemplateComponent, TemplateSend,
    },
    courant_store::{
        AccountStatus, InsertOutcome, MessageKind, NewAccount, NewInboundMessage, Store,
    },
};

// ── Mock provider ────────────────────────────────────────────────────────────

struct MockProvider {
    catalog: Vec<Template>,
    fail_sends: bool,
    sent: Mutex<Vec<String>>,
}

impl MockProvider {
    fn new() -> Self {
        Self {
            catalog: vec![Template {
                name: "order_ready".into(),
                language: "en_US".into(),
                status: "APPROVED".into(),
                components: vec![TemplateComponent {
                    kind: ComponentKind::Body,
                    text: Some("Hi {{name}}, order {{1}} ready".into()),
                }],
            }],
            fail_sends: false,
            sent: Mutex::new(Vec::new()),
        }
    }

    fn failing() -> Self {
        Self {
            fail_sends: true,
            ..Self::new()
        }
    }

    fn next_id(&self) -> Result<SentMessage, ProviderError> {
        if self.fail_sends {
            return Err(ProviderError::Api {
                code: Some("131030".into()),
                message: "Recipient not opted in".into(),
            });
        }
        let mut sent = self.sent.lock().unwrap();
        sent.push("send".into());
        Ok(SentMessage {
            message_id: format!("wamid.SENT{}", sent.len()),
        })
    }
}

#[async_trait]
impl ProviderClient for MockProvider {
    async fn send_message(
        &self,
        _account: &ProviderAccount,
        _message: Outbound,
    ) -> courant_provider::Result<SentMessage> {
        self.next_id()
    }

    async fn send_template(
        &self,
        _account: &ProviderAccount,
        _template: TemplateSend,
    ) -> courant_provider::Result<SentMessage> {
        self.next_id()
    }

    async fn fetch_templates(
        &self,
        _account: &ProviderAccount,
    ) -> courant_provider::Result<Vec<Template>> {
        Ok(self.catalog.clone())
    }

    async fn fetch_media_info(
        &self,
        _account: &ProviderAccount,
        media_id: &str,
    ) -> courant_provider::Result<MediaInfo> {
        Ok(MediaInfo {
            url: format!("https://cdn.example/{media_id}"),
            mime_type: "image/jpeg".into(),
            file_size: None,
        })
    }

    async fn download_media(
        &self,
        _account: &ProviderAccount,
        _url: &str,
    ) -> courant_provider::Result<Vec<u8>> {
        Ok(vec![1, 2, 3])
    }
}

// ── Harness ──────────────────────────────────────────────────────────────────

struct Harness {
    addr: SocketAddr,
    store: Store,
    keys: ApiKeyStore,
    media: Arc<InMemoryMediaSink>,
    account_id: String,
    _dir: tempfile::TempDir,
}

impl Harness {
    fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    async fn make_key(&self, scopes: &[Scope]) -> String {
        let (_, plaintext) = self.keys.create(&self.account_id, scopes, None).await.unwrap();
        plaintext
    }

    async fn invoke(&self, key: &str, body: Value) -> Value {
        reqwest::Client::new()
            .post(self.url("/tools/invoke"))
            .bearer_auth(key)
            .json(&body)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap()
    }

    /// Seed a contact with an inbound message `age_ms` in the past so the
    /// messaging window state is deterministic.
    async fn seed_inbound(&self, external_contact: &str, age_ms: i64) {
        let contact = self
            .store
            .upsert_contact(
                &self.account_id,
                external_contact,
                &format!("+{external_contact}"),
                Some("Ada"),
            )
            .await
            .unwrap();
        let conv = self
            .store
            .find_or_create_conversation(&self.account_id, &contact.id)
            .await
            .unwrap();
        let outcome = self
            .store
            .record_inbound_message(
                &conv.id,
                &self.account_id,
                NewInboundMessage {
                    external_id: format!("wamid.seed-{external_contact}-{age_ms}"),
                    kind: MessageKind::Text,
                    body: Some("hello".into()),
                    media_id: None,
                    reply_to: None,
                    sent_at: now_ms() - age_ms,
                    preview: "hello".into(),
                },
            )
            .await
            .unwrap();
        assert!(matches!(outcome, InsertOutcome::Inserted(_)));
    }
}

async fn start_server(provider: Arc<dyn ProviderClient>) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let db_url = format!("sqlite:{}?mode=rwc", dir.path().join("test.db").display());
    let store = Store::connect(&db_url).await.unwrap();
    ApiKeyStore::init(store.pool()).await.unwrap();
    let keys = ApiKeyStore::new(store.pool().clone());

    let account = store
        .insert_account(NewAccount {
            user_id: "user-1".into(),
            business_id: "biz-1".into(),
            phone_id: Some("ph-1".into()),
            phone: "+15550100001".into(),
            display_name: "Support Line".into(),
            access_token: "token".into(),
            verify_token: "verify-secret".into(),
            status: AccountStatus::Active,
        })
        .await
        .unwrap();

    let media = Arc::new(InMemoryMediaSink::new());
    let media_sink: Arc<dyn MediaSink> = Arc::clone(&media);
    let (tx, rx) = queue();
    let ingestor = Arc::new(Ingestor::new(store.clone(), "app-secret".into(), tx.clone()));
    let normalizer = Normalizer::new(
        store.clone(),
        Arc::clone(&provider),
        Arc::clone(&media_sink),
        tx,
    );
    tokio::spawn(normalizer.run(rx));

    let gateway = Arc::new(Gateway::new(
        store.clone(),
        keys.clone(),
        provider,
        media_sink,
        RateLimitConfig::default(),
    ));

    let app = build_app(AppState {
        gateway,
        ingestor,
        store: store.clone(),
    });

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    Harness {
        addr,
        store,
        keys,
        media,
        account_id: account.id,
        _dir: dir,
    }
}

fn sign(body: &[u8], secret: &str) -> String {
    use hmac::Mac;
    let mut mac = hmac::Hmac::<sha2::Sha256>::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(body);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

async fn wait_for<F, Fut>(mut probe: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..50 {
        if probe().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

// ── Webhook intake ───────────────────────────────────────────────────────────

const WEBHOOK_BODY: &str = r#"{
  "entry": [{ "changes": [{ "field": "messages", "value": {
    "metadata": { "phone_number_id": "ph-1" },
    "contacts": [{ "wa_id": "15550102345", "profile": { "name": "Ada" } }],
    "messages": [
      { "id": "wamid.http1", "from": "15550102345", "timestamp": "1700000000",
        "type": "text", "text": { "body": "inbound over http" } }
    ]
  }}]}]
}"#;

#[tokio::test]
async fn webhook_roundtrip_normalizes_into_store() {
    let harness = start_server(Arc::new(MockProvider::new())).await;

    let response = reqwest::Client::new()
        .post(harness.url("/webhook"))
        .header("x-hub-signature-256", sign(WEBHOOK_BODY.as_bytes(), "app-secret"))
        .body(WEBHOOK_BODY)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let store = harness.store.clone();
    let arrived = wait_for(|| {
        let store = store.clone();
        async move {
            store
                .message_by_external_id("wamid.http1")
                .await
                .unwrap()
                .is_some()
        }
    })
    .await;
    assert!(arrived, "message never normalized");

    let contact = harness
        .store
        .contact_by_external_id(&harness.account_id, "15550102345")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(contact.display_name.as_deref(), Some("Ada"));
}

#[tokio::test]
async fn webhook_rejections_are_indistinguishable() {
    let harness = start_server(Arc::new(MockProvider::new())).await;
    let client = reqwest::Client::new();

    let bad_signature = client
        .post(harness.url("/webhook"))
        .header("x-hub-signature-256", "sha256=0000")
        .body(WEBHOOK_BODY)
        .send()
        .await
        .unwrap();

    let unknown_account_body = WEBHOOK_BODY.replace("ph-1", "ph-404");
    let unknown_account = client
        .post(harness.url("/webhook"))
        .header(
            "x-hub-signature-256",
            sign(unknown_account_body.as_bytes(), "app-secret"),
        )
        .body(unknown_account_body)
        .send()
        .await
        .unwrap();

    assert_eq!(bad_signature.status(), 403);
    assert_eq!(unknown_account.status(), 403);
    assert_eq!(
        bad_signature.text().await.unwrap(),
        unknown_account.text().await.unwrap()
    );
}

#[tokio::test]
async fn webhook_subscription_echoes_challenge() {
    let harness = start_server(Arc::new(MockProvider::new())).await;
    let client = reqwest::Client::new();

    let ok = client
        .get(harness.url(
            "/webhook?hub.mode=subscribe&hub.verify_token=verify-secret&hub.challenge=c123",
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(ok.status(), 200);
    assert_eq!(ok.text().await.unwrap(), "c123");

    let bad = client
        .get(harness.url("/webhook?hub.mode=subscribe&hub.verify_token=wrong&hub.challenge=c123"))
        .send()
        .await
        .unwrap();
    assert_eq!(bad.status(), 403);
}

// ── Auth, scopes, unknown tools ──────────────────────────────────────────────

#[tokio::test]
async fn bogus_and_expired_keys_fail_identically() {
    let harness = start_server(Arc::new(MockProvider::new())).await;
    let (_, expired) = harness
        .keys
        .create(&harness.account_id, &[Scope::Read], Some(now_ms() - 1_000))
        .await
        .unwrap();

    let call = json!({ "tool": "list_conversations", "args": {} });
    let a = harness.invoke("ck_bogus", call.clone()).await;
    let b = harness.invoke(&expired, call).await;

    assert_eq!(a["error"], true);
    assert_eq!(a["message"], b["message"]);
}

#[tokio::test]
async fn read_key_cannot_send_and_no_message_is_recorded() {
    let harness = start_server(Arc::new(MockProvider::new())).await;
    harness.seed_inbound("15550102345", 1_000).await;
    let key = harness.make_key(&[Scope::Read]).await;

    let result = harness
        .invoke(
            &key,
            json!({ "tool": "send_text", "args": {
                "from": "+15550100001", "phone": "+15550102345", "body": "hi"
            }}),
        )
        .await;

    assert_eq!(result["error"], true);
    assert!(
        result["message"].as_str().unwrap().contains("missing scope: send"),
        "unexpected message: {result}"
    );

    // No outbound row was written.
    let hits = harness
        .store
        .search_messages(&harness.account_id, "hi", 10)
        .await
        .unwrap();
    assert!(hits.is_empty());
}

#[tokio::test]
async fn unknown_tool_fails_even_with_every_scope() {
    let harness = start_server(Arc::new(MockProvider::new())).await;
    let key = harness
        .make_key(&[Scope::Read, Scope::Write, Scope::Send])
        .await;

    let result = harness
        .invoke(&key, json!({ "tool": "export_database", "args": {} }))
        .await;
    assert_eq!(result["error"], true);
    assert!(result["message"].as_str().unwrap().contains("unknown tool"));
}

// ── Disclosure ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn omitted_phone_discloses_then_second_call_succeeds() {
    let harness = start_server(Arc::new(MockProvider::new())).await;
    harness.seed_inbound("15550102345", 1_000).await;
    let key = harness.make_key(&[Scope::Read, Scope::Send]).await;

    // Only `from` supplied: the recipient disclosure comes back, not a
    // complaint about any other missing argument.
    let first = harness
        .invoke(
            &key,
            json!({ "tool": "send_text", "args": { "from": "+15550100001" } }),
        )
        .await;

    let disclosure = &first["disclosure"];
    assert_eq!(disclosure["parameter"], "phone");
    let options = disclosure["options"].as_array().unwrap();
    assert!(!options.is_empty());
    let phone = options[0]["value"].as_str().unwrap();

    let second = harness
        .invoke(
            &key,
            json!({ "tool": "send_text", "args": {
                "from": "+15550100001", "phone": phone, "body": "hi again"
            }}),
        )
        .await;
    assert_eq!(second["sent"], true, "unexpected response: {second}");
}

#[tokio::test]
async fn missing_content_field_fails_only_after_resolution() {
    let harness = start_server(Arc::new(MockProvider::new())).await;
    harness.seed_inbound("15550102345", 1_000).await;
    let key = harness.make_key(&[Scope::Send]).await;

    // Sender and recipient resolve, body omitted: a structured error
    // naming the field, not a deserialization failure.
    let no_body = harness
        .invoke(
            &key,
            json!({ "tool": "send_text", "args": {
                "from": "+15550100001", "phone": "+15550102345"
            }}),
        )
        .await;
    assert_eq!(no_body["error"], true);
    assert!(
        no_body["message"].as_str().unwrap().contains("body"),
        "unexpected message: {no_body}"
    );

    // With `phone` also omitted, the disclosure outranks the missing
    // content fields.
    let no_phone = harness
        .invoke(
            &key,
            json!({ "tool": "send_media", "args": { "from": "+15550100001" } }),
        )
        .await;
    assert_eq!(no_phone["disclosure"]["parameter"], "phone");
}

#[tokio::test]
async fn omitted_from_discloses_accounts_and_empty_contacts_list_is_empty() {
    let harness = start_server(Arc::new(MockProvider::new())).await;
    let key = harness.make_key(&[Scope::Read, Scope::Send]).await;

    let no_from = harness
        .invoke(&key, json!({ "tool": "list_conversations", "args": {} }))
        .await;
    assert_eq!(no_from["disclosure"]["parameter"], "from");
    assert_eq!(
        no_from["disclosure"]["options"][0]["value"],
        "+15550100001"
    );

    // No contacts seeded: the phone disclosure carries an empty list.
    let no_phone = harness
        .invoke(
            &key,
            json!({ "tool": "send_text", "args": { "from": "+15550100001", "body": "x" } }),
        )
        .await;
    assert_eq!(no_phone["disclosure"]["parameter"], "phone");
    assert_eq!(no_phone["disclosure"]["options"].as_array().unwrap().len(), 0);
}

// ── Messaging window ─────────────────────────────────────────────────────────

#[tokio::test]
async fn closed_window_blocks_free_form_but_not_templates() {
    let harness = start_server(Arc::new(MockProvider::new())).await;
    harness.seed_inbound("15550102345", 2 * DAY_MS).await;
    let key = harness.make_key(&[Scope::Send]).await;

    let blocked = harness
        .invoke(
            &key,
            json!({ "tool": "send_text", "args": {
                "from": "+15550100001", "phone": "+15550102345", "body": "too late"
            }}),
        )
        .await;
    assert_eq!(blocked["code"], "window_closed");

    let template = harness
        .invoke(
            &key,
            json!({ "tool": "send_template", "args": {
                "from": "+15550100001", "phone": "+15550102345",
                "template": "order_ready",
                "parameters": [
                    { "parameter_name": "name", "value": "Ada" },
                    { "value": "42" }
                ]
            }}),
        )
        .await;
    assert_eq!(template["sent"], true, "unexpected response: {template}");
    assert_eq!(template["preview"], "Hi Ada, order 42 ready");
}

// ── Template validation ──────────────────────────────────────────────────────

#[tokio::test]
async fn template_with_no_parameters_returns_required_list_and_example() {
    let harness = start_server(Arc::new(MockProvider::new())).await;
    harness.seed_inbound("15550102345", 1_000).await;
    let key = harness.make_key(&[Scope::Send]).await;

    let result = harness
        .invoke(
            &key,
            json!({ "tool": "send_template", "args": {
                "from": "+15550100001", "phone": "+15550102345", "template": "order_ready"
            }}),
        )
        .await;

    assert_eq!(result["error"], true);
    let required = result["required_variables"].as_array().unwrap();
    assert_eq!(required.len(), 2);
    assert_eq!(required[0]["key"], "name");
    assert_eq!(required[0]["named"], true);
    assert_eq!(required[1]["key"], "1");
    assert_eq!(required[1]["named"], false);
    assert!(result["example"]["parameters"].is_array());
}

#[tokio::test]
async fn named_parameter_without_name_gets_corrective_error() {
    let harness = start_server(Arc::new(MockProvider::new())).await;
    harness.seed_inbound("15550102345", 1_000).await;
    let key = harness.make_key(&[Scope::Send]).await;

    let result = harness
        .invoke(
            &key,
            json!({ "tool": "send_template", "args": {
                "from": "+15550100001", "phone": "+15550102345", "template": "order_ready",
                "parameters": [ { "value": "Ada" }, { "value": "42" } ]
            }}),
        )
        .await;

    assert_eq!(result["error"], true);
    assert!(
        result["message"].as_str().unwrap().contains("parameter_name"),
        "unexpected message: {result}"
    );
}

#[tokio::test]
async fn unknown_template_lists_available_names() {
    let harness = start_server(Arc::new(MockProvider::new())).await;
    harness.seed_inbound("15550102345", 1_000).await;
    let key = harness.make_key(&[Scope::Send]).await;

    let result = harness
        .invoke(
            &key,
            json!({ "tool": "send_template", "args": {
                "from": "+15550100001", "phone": "+15550102345", "template": "no_such"
            }}),
        )
        .await;
    assert_eq!(result["error"], true);
    assert_eq!(result["available_templates"][0], "order_ready");
}

#[tokio::test]
async fn provider_failure_records_failed_message_and_attaches_catalog() {
    let harness = start_server(Arc::new(MockProvider::failing())).await;
    harness.seed_inbound("15550102345", 1_000).await;
    let key = harness.make_key(&[Scope::Send]).await;

    let result = harness
        .invoke(
            &key,
            json!({ "tool": "send_template", "args": {
                "from": "+15550100001", "phone": "+15550102345", "template": "order_ready",
                "parameters": [
                    { "parameter_name": "name", "value": "Ada" },
                    { "value": "42" }
                ]
            }}),
        )
        .await;

    assert_eq!(result["error"], true);
    assert_eq!(result["provider_code"], "131030");
    assert_eq!(result["templates"][0]["name"], "order_ready");

    // The failure is on the message record, provider code included.
    let failed = harness
        .store
        .search_messages(&harness.account_id, "Hi Ada", 10)
        .await
        .unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].status, courant_store::MessageStatus::Failed);
    assert_eq!(failed[0].error_code.as_deref(), Some("131030"));
}

// ── Reads ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn conversation_listing_and_search_work_over_http() {
    let harness = start_server(Arc::new(MockProvider::new())).await;
    harness.seed_inbound("15550102345", 1_000).await;
    let key = harness.make_key(&[Scope::Read]).await;

    let listed = harness
        .invoke(
            &key,
            json!({ "tool": "list_conversations", "args": { "from": "+15550100001" } }),
        )
        .await;
    let conversations = listed["conversations"].as_array().unwrap();
    assert_eq!(conversations.len(), 1);
    assert_eq!(conversations[0]["window_open"], true);
    assert_eq!(conversations[0]["contact_name"], "Ada");

    let found = harness
        .invoke(
            &key,
            json!({ "tool": "search_messages", "args": {
                "from": "+15550100001", "query": "HELLO"
            }}),
        )
        .await;
    assert_eq!(found["messages"].as_array().unwrap().len(), 1);

    let unanswered = harness
        .invoke(
            &key,
            json!({ "tool": "list_unanswered", "args": { "from": "+15550100001" } }),
        )
        .await;
    assert_eq!(unanswered["conversations"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn get_conversation_returns_thread_and_window_state() {
    let harness = start_server(Arc::new(MockProvider::new())).await;
    harness.seed_inbound("15550102345", 1_000).await;
    let key = harness.make_key(&[Scope::Read]).await;

    let thread = harness
        .invoke(
            &key,
            json!({ "tool": "get_conversation", "args": {
                "from": "+15550100001", "phone": "+15550102345"
            }}),
        )
        .await;
    assert_eq!(thread["window_open"], true);
    assert_eq!(thread["contact"]["display_name"], "Ada");
    let messages = thread["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0]["body"], "hello");

    // An unknown recipient discloses instead of failing hard.
    let unknown = harness
        .invoke(
            &key,
            json!({ "tool": "get_conversation", "args": {
                "from": "+15550100001", "phone": "+15550109999"
            }}),
        )
        .await;
    assert_eq!(unknown["disclosure"]["parameter"], "phone");
}

#[tokio::test]
async fn list_templates_returns_live_catalog() {
    let harness = start_server(Arc::new(MockProvider::new())).await;
    let key = harness.make_key(&[Scope::Read]).await;

    let result = harness
        .invoke(
            &key,
            json!({ "tool": "list_templates", "args": { "from": "+15550100001" } }),
        )
        .await;
    assert_eq!(result["templates"][0]["name"], "order_ready");
}

#[tokio::test]
async fn media_and_reaction_sends_inside_the_window() {
    let harness = start_server(Arc::new(MockProvider::new())).await;
    harness.seed_inbound("15550102345", 1_000).await;
    let key = harness.make_key(&[Scope::Send]).await;

    let media = harness
        .invoke(
            &key,
            json!({ "tool": "send_media", "args": {
                "from": "+15550100001", "phone": "+15550102345",
                "media_kind": "image", "link": "https://cdn.example/cat.jpg",
                "caption": "a cat"
            }}),
        )
        .await;
    assert_eq!(media["sent"], true, "unexpected response: {media}");
    assert_eq!(media["preview"], "a cat");

    let reaction = harness
        .invoke(
            &key,
            json!({ "tool": "send_reaction", "args": {
                "from": "+15550100001", "phone": "+15550102345",
                "message_id": "wamid.seed-15550102345-1000", "emoji": "👍"
            }}),
        )
        .await;
    assert_eq!(reaction["sent"], true, "unexpected response: {reaction}");
}

#[tokio::test]
async fn update_conversation_requires_write_and_marks_read() {
    let harness = start_server(Arc::new(MockProvider::new())).await;
    harness.seed_inbound("15550102345", 1_000).await;

    let read_key = harness.make_key(&[Scope::Read]).await;
    let denied = harness
        .invoke(
            &read_key,
            json!({ "tool": "update_conversation", "args": {
                "from": "+15550100001", "phone": "+15550102345", "mark_read": true
            }}),
        )
        .await;
    assert!(denied["message"].as_str().unwrap().contains("missing scope: write"));

    let write_key = harness.make_key(&[Scope::Write]).await;
    let updated = harness
        .invoke(
            &write_key,
            json!({ "tool": "update_conversation", "args": {
                "from": "+15550100001", "phone": "+15550102345",
                "mark_read": true, "archived": true
            }}),
        )
        .await;
    assert_eq!(updated["updated"], true);
    assert_eq!(updated["conversation"]["unread_count"], 0);
    assert_eq!(updated["conversation"]["archived"], true);
}

// ── API key lifecycle over HTTP ──────────────────────────────────────────────

#[tokio::test]
async fn key_lifecycle_plaintext_appears_exactly_once() {
    let harness = start_server(Arc::new(MockProvider::new())).await;
    let client = reqwest::Client::new();

    let created: Value = client
        .post(harness.url("/api/keys"))
        .json(&json!({ "account_id": harness.account_id, "scopes": ["read"] }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let plaintext = created["key"].as_str().unwrap().to_string();
    let key_id = created["api_key"]["id"].as_str().unwrap().to_string();
    assert!(plaintext.starts_with("ck_"));

    let listed: Value = client
        .get(harness.url(&format!("/api/keys?account_id={}", harness.account_id)))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(!listed.to_string().contains(&plaintext));
    assert!(listed["api_keys"][0]["prefix"].as_str().unwrap().ends_with('…'));

    let revoked = client
        .delete(harness.url(&format!("/api/keys/{key_id}")))
        .send()
        .await
        .unwrap();
    assert_eq!(revoked.status(), 200);

    let after = harness
        .invoke(&plaintext, json!({ "tool": "list_conversations", "args": {} }))
        .await;
    assert_eq!(after["message"], "invalid or expired API key");
}

// ── Media redirect ───────────────────────────────────────────────────────────

#[tokio::test]
async fn media_redirects_to_short_lived_url() {
    let harness = start_server(Arc::new(MockProvider::new())).await;
    harness.seed_inbound("15550102345", 1_000).await;
    let key = harness.make_key(&[Scope::Read]).await;

    // Stage a blob and attach it to a fresh media message.
    let contact = harness
        .store
        .contact_by_external_id(&harness.account_id, "15550102345")
        .await
        .unwrap()
        .unwrap();
    let conv = harness
        .store
        .conversation_for_contact(&harness.account_id, &contact.id)
        .await
        .unwrap()
        .unwrap();
    let outcome = harness
        .store
        .record_inbound_message(
            &conv.id,
            &harness.account_id,
            NewInboundMessage {
                external_id: "wamid.media".into(),
                kind: MessageKind::Image,
                body: None,
                media_id: Some("media-1".into()),
                reply_to: None,
                sent_at: now_ms(),
                preview: "[Image]".into(),
            },
        )
        .await
        .unwrap();
    let InsertOutcome::Inserted(message_id) = outcome else {
        panic!("expected insert");
    };
    let media_key = harness
        .media
        .put("media-1", "image/jpeg", vec![1])
        .await
        .unwrap();
    harness
        .store
        .attach_media_key(&message_id, &media_key)
        .await
        .unwrap();

    let client = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap();
    let response = client
        .get(harness.url(&format!("/media/{message_id}")))
        .bearer_auth(&key)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 307);
    let location = response.headers()["location"].to_str().unwrap();
    assert!(location.starts_with("memory://media/media-1?expires="));

    // A message without media is a structured miss, not a redirect.
    let text_message = harness
        .store
        .message_by_external_id(&format!("wamid.seed-15550102345-{}", 1_000))
        .await
        .unwrap()
        .unwrap();
    let miss = client
        .get(harness.url(&format!("/media/{}", text_message.id)))
        .bearer_auth(&key)
        .send()
        .await
        .unwrap();
    assert_eq!(miss.status(), 404);
}

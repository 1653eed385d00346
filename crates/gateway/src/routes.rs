//! HTTP surface: webhook intake, tool invocation, API key lifecycle, and
//! media redirects.
//!
//! `build_app` is shared between production startup and tests.

use std::{collections::HashMap, sync::Arc};

use {
    axum::{
        Json, Router,
        body::Bytes,
        extract::{Path, Query, State},
        http::{HeaderMap, StatusCode, header},
        response::{IntoResponse, Redirect, Response},
        routing::{get, post},
    },
    serde::Deserialize,
    serde_json::{Value, json},
    tower_http::cors::{Any, CorsLayer},
    tracing::warn,
};

use {
    courant_ingest::{IngestError, Ingestor, WebhookPayload, verify_subscription},
    courant_store::Store,
};

use crate::{api_keys::Scope, dispatch::Gateway};

#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<Gateway>,
    pub ingestor: Arc<Ingestor>,
    pub store: Store,
}

pub fn build_app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/webhook", post(webhook_post).get(webhook_verify))
        .route("/tools/invoke", post(invoke))
        .route("/api/keys", post(create_key).get(list_keys))
        .route("/api/keys/{id}", axum::routing::delete(revoke_key))
        .route("/media/{message_id}", get(media_redirect))
        .layer(cors)
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

// ── Webhook intake ───────────────────────────────────────────────────────────

/// Signed provider deliveries. Acknowledged as soon as staging succeeds;
/// rejection is reserved for signature/account-resolution failure, and the
/// response never says which of the two it was.
async fn webhook_post(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let signature = headers
        .get("x-hub-signature-256")
        .and_then(|v| v.to_str().ok());

    let phone_id = serde_json::from_slice::<WebhookPayload>(&body)
        .ok()
        .and_then(|p| p.phone_id().map(str::to_string))
        .unwrap_or_default();

    match state.ingestor.ingest(&phone_id, &body, signature).await {
        Ok(()) => (StatusCode::OK, Json(json!({ "received": true }))).into_response(),
        Err(IngestError::Rejected) => (
            StatusCode::FORBIDDEN,
            Json(json!({ "error": "webhook rejected" })),
        )
            .into_response(),
        Err(IngestError::Store(e)) => {
            // Staging failed: let the provider re-deliver rather than lose
            // the payload.
            warn!("webhook staging failed: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "staging failed" })),
            )
                .into_response()
        },
    }
}

/// Subscription handshake: echo the challenge iff the verify token matches
/// a configured account.
async fn webhook_verify(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let challenge = verify_subscription(
        &state.store,
        params.get("hub.mode").map(String::as_str),
        params.get("hub.verify_token").map(String::as_str),
        params.get("hub.challenge").map(String::as_str),
    )
    .await;

    match challenge {
        Some(challenge) => (StatusCode::OK, challenge).into_response(),
        None => (StatusCode::FORBIDDEN, "verification failed").into_response(),
    }
}

// ── Tool gateway ─────────────────────────────────────────────────────────────

/// Tool invocation. Errors are values: this endpoint always answers 200
/// with either a result, a disclosure, or `{error: true, message}`.
async fn invoke(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<Value>,
) -> Json<Value> {
    let Some(key) = bearer_token(&headers) else {
        return Json(json!({ "error": true, "message": "invalid or expired API key" }));
    };
    Json(state.gateway.invoke(key, request).await)
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

// ── API key lifecycle ────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct CreateKeyRequest {
    account_id: String,
    scopes: Vec<String>,
    expires_at: Option<i64>,
}

/// Create a key. The plaintext appears in this response and nowhere else,
/// ever.
async fn create_key(
    State(state): State<AppState>,
    Json(request): Json<CreateKeyRequest>,
) -> Response {
    let mut scopes = Vec::with_capacity(request.scopes.len());
    for raw in &request.scopes {
        match Scope::parse(raw) {
            Some(scope) => scopes.push(scope),
            None => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(json!({ "error": format!("unknown scope: {raw}") })),
                )
                    .into_response();
            },
        }
    }

    match state.store.account_by_id(&request.account_id).await {
        Ok(Some(_)) => {},
        Ok(None) => {
            return (
                StatusCode::NOT_FOUND,
                Json(json!({ "error": "unknown account" })),
            )
                .into_response();
        },
        Err(e) => {
            warn!("account lookup failed: {e}");
            return internal_error();
        },
    }

    match state
        .gateway
        .keys()
        .create(&request.account_id, &scopes, request.expires_at)
        .await
    {
        Ok((meta, plaintext)) => (
            StatusCode::CREATED,
            Json(json!({ "key": plaintext, "api_key": meta })),
        )
            .into_response(),
        Err(e) => {
            warn!("key creation failed: {e}");
            internal_error()
        },
    }
}

#[derive(Deserialize)]
struct ListKeysQuery {
    account_id: String,
}

async fn list_keys(
    State(state): State<AppState>,
    Query(query): Query<ListKeysQuery>,
) -> Response {
    match state.gateway.keys().list(&query.account_id).await {
        Ok(keys) => Json(json!({ "api_keys": keys })).into_response(),
        Err(e) => {
            warn!("key listing failed: {e}");
            internal_error()
        },
    }
}

async fn revoke_key(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.gateway.keys().revoke(&id).await {
        Ok(true) => Json(json!({ "revoked": true })).into_response(),
        Ok(false) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "unknown key" })),
        )
            .into_response(),
        Err(e) => {
            warn!("key revocation failed: {e}");
            internal_error()
        },
    }
}

// ── Media ────────────────────────────────────────────────────────────────────

/// Resolve a message's stored media to a short-lived signed URL and
/// redirect. The signed URL is never persisted or listed anywhere.
async fn media_redirect(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(message_id): Path<String>,
) -> Response {
    let Some(key) = bearer_token(&headers) else {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "invalid or expired API key" })),
        )
            .into_response();
    };

    let value = state.gateway.media_url(key, &message_id).await;
    match value.get("url").and_then(Value::as_str) {
        Some(url) => Redirect::temporary(url).into_response(),
        None => (StatusCode::NOT_FOUND, Json(value)).into_response(),
    }
}

fn internal_error() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": "internal error" })),
    )
        .into_response()
}

// src/server/webhook.rs

//! Webhook HTTP handler: authenticate, parse, enqueue, acknowledge
//!
//! When a shared secret is configured, the request must carry a valid
//! HMAC-SHA256 of `<timestamp> || <raw-body>`; events older than five
//! minutes are rejected to bound the replay window. Valid events are
//! enqueued in the high-priority range and the worker is signalled; the
//! response returns immediately.

use crate::id;
use crate::queue::{EntryKind, Priority, Queue, QueueEntry, QueuedPage};
use crate::registry::Registry;
use crate::server::AppState;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use std::sync::Arc;
use tracing::{debug, info, warn};

type HmacSha256 = Hmac<Sha256>;

const SIGNATURE_HEADER: &str = "x-notion-signature";
const TIMESTAMP_HEADER: &str = "x-notion-timestamp";

/// Maximum accepted event age in seconds
const MAX_EVENT_AGE_SECS: i64 = 300;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct EntityRef {
    id: String,
    #[serde(rename = "type")]
    kind: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct EventData {
    parent: Option<EntityRef>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct WebhookEvent {
    #[serde(rename = "type")]
    event_type: String,
    entity: Option<EntityRef>,
    page_id: Option<String>,
    data: Option<EventData>,
    /// Sent once when the subscription is created
    verification_token: Option<String>,
}

pub async fn handle(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, &'static str) {
    if let Some(secret) = &state.config.webhook_secret {
        match verify_signature(secret, &headers, &body) {
            Ok(()) => {}
            Err(reason) => {
                warn!(reason, "rejected webhook");
                return (StatusCode::UNAUTHORIZED, "invalid signature");
            }
        }
    }

    let event: WebhookEvent = match serde_json::from_slice(&body) {
        Ok(event) => event,
        Err(e) => {
            warn!(error = %e, "unparseable webhook payload");
            return (StatusCode::BAD_REQUEST, "invalid payload");
        }
    };

    if event.verification_token.is_some() {
        info!("webhook subscription verification received");
        return (StatusCode::OK, "ok");
    }

    let Some(target) = target_id(&event) else {
        debug!(event_type = %event.event_type, "webhook without target id, ignoring");
        return (StatusCode::OK, "ignored");
    };
    let parent_id = event
        .data
        .as_ref()
        .and_then(|d| d.parent.as_ref())
        .map(|p| id::normalize(&p.id));

    let enqueue_state = state.clone();
    let result = tokio::task::spawn_blocking(move || {
        enqueue(&enqueue_state, &target, parent_id.as_deref())
    })
    .await;

    match result {
        Ok(Ok(name)) => {
            info!(entry = %name, event_type = %event.event_type, "webhook enqueued");
            state.notify.notify_one();
            (StatusCode::OK, "ok")
        }
        Ok(Err(e)) => {
            warn!(error = %e, "failed to enqueue webhook event");
            (StatusCode::INTERNAL_SERVER_ERROR, "enqueue failed")
        }
        Err(e) => {
            warn!(error = %e, "enqueue task panicked");
            (StatusCode::INTERNAL_SERVER_ERROR, "enqueue failed")
        }
    }
}

fn target_id(event: &WebhookEvent) -> Option<String> {
    if let Some(entity) = &event.entity
        && !entity.id.is_empty()
    {
        return Some(id::normalize(&entity.id));
    }
    event
        .page_id
        .as_ref()
        .filter(|id| !id.is_empty())
        .map(|id| id::normalize(id))
}

/// Write the high-priority queue entry. Folder falls back along
/// target record → parent record → `default`.
fn enqueue(
    state: &AppState,
    target: &str,
    parent_id: Option<&str>,
) -> crate::error::Result<String> {
    let _guard = state.store.lock();
    let registry = Registry::new(&state.store);
    let folder = registry
        .load(target)?
        .map(|r| r.folder)
        .filter(|f| !f.is_empty())
        .or_else(|| {
            parent_id
                .and_then(|p| registry.load(p).ok().flatten())
                .map(|r| r.folder)
                .filter(|f| !f.is_empty())
        })
        .unwrap_or_else(|| "default".to_string());

    let entry = QueueEntry {
        kind: EntryKind::Update,
        folder,
        parent_id: parent_id.map(str::to_string),
        pages: Some(vec![QueuedPage {
            id: target.to_string(),
            last_edited: Some(chrono::Utc::now()),
        }]),
        page_ids: None,
        created_at: chrono::Utc::now(),
    };

    let queue = Queue::new(&state.store);
    let mut tx = state.store.begin();
    queue.create(&mut tx, &entry, Priority::Webhook)
}

fn verify_signature(
    secret: &str,
    headers: &HeaderMap,
    body: &[u8],
) -> std::result::Result<(), &'static str> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or("missing signature header")?;
    let timestamp = headers
        .get(TIMESTAMP_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or("missing timestamp header")?;

    let event_time: i64 = timestamp.parse().map_err(|_| "malformed timestamp")?;
    let age = chrono::Utc::now().timestamp() - event_time;
    if age.abs() > MAX_EVENT_AGE_SECS {
        return Err("event outside replay window");
    }

    let signature = signature.strip_prefix("sha256=").unwrap_or(signature);
    let expected = hex::decode(signature).map_err(|_| "malformed signature")?;

    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| "bad secret length")?;
    mac.update(timestamp.as_bytes());
    mac.update(body);
    mac.verify_slice(&expected)
        .map_err(|_| "signature mismatch")
}

//! `/webhooks`, `/webhook/inbound/{name}`.

use std::time::Duration;

use axum::extract::{Extension, Path, Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use pocketpaw_core::bus::types::InboundMessage;

use crate::auth::{require_scope, AuthContext};
use crate::error::{ApiResult, PocketPawError};
use crate::state::AppState;

const DEFAULT_SYNC_TIMEOUT: Duration = Duration::from_secs(30);

/// `GET /api/v1/webhooks` — the set of registered inbound slot names.
/// Slots aren't pre-declared; any `name` is accepted at
/// `/webhook/inbound/{name}`, so this just echoes that back rather than
/// claiming a fixed registry exists.
pub async fn list(Extension(ctx): Extension<AuthContext>) -> ApiResult<Json<serde_json::Value>> {
    require_scope(&ctx, "admin")?;
    Ok(Json(json!({"note": "any slot name is accepted at /webhook/inbound/{name}"})))
}

#[derive(Deserialize)]
pub struct WebhookBody {
    pub content: String,
    #[serde(default = "default_sender")]
    pub sender: String,
}

fn default_sender() -> String {
    "webhook".to_string()
}

#[derive(Deserialize)]
pub struct WebhookQuery {
    #[serde(default)]
    pub sync: bool,
}

/// `POST /api/v1/webhook/inbound/{name}` — publish an inbound turn on the
/// `"webhook"` channel. In sync mode, waits for the agent's final reply and
/// returns it as the response body; times out with 504 after
/// `DEFAULT_SYNC_TIMEOUT`.
pub async fn inbound(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<WebhookQuery>,
    Json(body): Json<WebhookBody>,
) -> ApiResult<Json<serde_json::Value>> {
    let request_id = uuid::Uuid::new_v4().to_string();

    if !query.sync {
        let inbound = InboundMessage::new("webhook", body.sender, request_id.clone(), body.content);
        state.bus.publish_inbound(inbound).await.map_err(PocketPawError::from)?;
        return Ok(Json(json!({"slot": name, "accepted": true})));
    }

    let rx = state.webhook_channel.register(&request_id).await;
    let inbound = InboundMessage::new("webhook", body.sender, request_id.clone(), body.content);
    state.bus.publish_inbound(inbound).await.map_err(PocketPawError::from)?;

    match tokio::time::timeout(DEFAULT_SYNC_TIMEOUT, rx).await {
        Ok(Ok(content)) => Ok(Json(json!({"slot": name, "content": content}))),
        _ => {
            state.webhook_channel.unregister(&request_id).await;
            Err(PocketPawError::Timeout(format!("slot '{name}' timed out waiting for a reply")).into())
        }
    }
}

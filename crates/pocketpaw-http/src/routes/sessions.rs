//! `/sessions`, `/sessions/{id}`, `/sessions/search`.

use axum::extract::{Extension, Path, Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use pocketpaw_core::session::manager::SessionSummary;

use crate::auth::{require_scope, AuthContext};
use crate::error::ApiResult;
use crate::state::AppState;

/// `GET /api/v1/sessions` — every session on disk, newest first.
pub async fn list(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
) -> ApiResult<Json<Vec<SessionSummary>>> {
    require_scope(&ctx, "chat")?;
    Ok(Json(state.agent_loop.sessions().list_sessions()))
}

#[derive(Deserialize)]
pub struct SessionHistoryQuery {
    #[serde(default = "default_history_limit")]
    pub limit: usize,
}

fn default_history_limit() -> usize {
    50
}

/// `GET /api/v1/sessions/{id}` — a session's recent message history. `id`
/// is the raw session key (`channel:chat_id`) with `:` URL-encoded by
/// callers as needed.
pub async fn get(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<String>,
    Query(query): Query<SessionHistoryQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    require_scope(&ctx, "chat")?;
    let history = state.agent_loop.sessions().get_history(&id, query.limit);
    Ok(Json(json!({"session_id": id, "messages": history})))
}

/// `DELETE /api/v1/sessions/{id}` — delete a session's history from disk
/// and cache.
pub async fn delete(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    require_scope(&ctx, "chat")?;
    let deleted = state.agent_loop.sessions().delete(&id);
    state.memory.clear_session(&id);
    Ok(Json(json!({"deleted": deleted})))
}

#[derive(Deserialize)]
pub struct SessionSearchQuery {
    pub q: Option<String>,
}

/// `GET /api/v1/sessions/search` — search the memory index's session
/// summaries (title, channel, last activity) rather than message bodies;
/// full-text search over message history lives in `/memory` instead.
pub async fn search(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Query(query): Query<SessionSearchQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    require_scope(&ctx, "chat")?;
    let all = state.memory.list_sessions();
    let results = match &query.q {
        Some(needle) if !needle.is_empty() => {
            let needle = needle.to_lowercase();
            all.into_iter()
                .filter(|s| s.title.to_lowercase().contains(&needle) || s.session_key.to_lowercase().contains(&needle))
                .collect::<Vec<_>>()
        }
        _ => all,
    };
    Ok(Json(json!({"results": results})))
}

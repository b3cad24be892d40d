//! `/memory/long_term`, `/memory/settings`, `/memory/stats`.

use axum::extract::{Extension, Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use pocketpaw_core::types::{MemoryEntry, MemoryKind};

use crate::auth::{require_scope, AuthContext};
use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct LongTermQuery {
    pub q: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    50
}

/// `GET /api/v1/memory/long_term` — list/search long-term facts.
pub async fn list_long_term(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Query(query): Query<LongTermQuery>,
) -> ApiResult<Json<Vec<MemoryEntry>>> {
    require_scope(&ctx, "memory")?;
    let entries = state
        .memory
        .search(query.q.as_deref(), Some(MemoryKind::LongTerm), &query.tags, query.limit);
    Ok(Json(entries))
}

#[derive(Deserialize)]
pub struct CreateMemoryRequest {
    pub content: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// `POST /api/v1/memory/long_term` — save a new long-term fact.
pub async fn create_long_term(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Json(body): Json<CreateMemoryRequest>,
) -> ApiResult<Json<MemoryEntry>> {
    require_scope(&ctx, "memory")?;
    let mut entry = MemoryEntry::new(MemoryKind::LongTerm, body.content);
    entry.tags = body.tags;
    let saved = state
        .memory
        .save(entry)
        .map_err(|e| crate::error::PocketPawError::Runtime(e.into()))?;
    Ok(Json(saved))
}

/// `DELETE /api/v1/memory/long_term/{id}` — delete a long-term fact.
pub async fn delete_long_term(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    axum::extract::Path(id): axum::extract::Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    require_scope(&ctx, "memory")?;
    let deleted = state.memory.delete(&id);
    Ok(Json(json!({"deleted": deleted})))
}

/// `GET /api/v1/memory/settings` — the memory-relevant subset of live
/// config (currently just whether the agent has a workspace to read/write
/// long-term notes files from, since retention/size limits aren't
/// configurable yet).
pub async fn settings(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
) -> ApiResult<Json<serde_json::Value>> {
    require_scope(&ctx, "memory")?;
    let config = state.settings.get().await;
    Ok(Json(json!({
        "workspace": config.agents.defaults.workspace,
    })))
}

/// `GET /api/v1/memory/stats` — entry counts per kind plus session count.
pub async fn stats(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
) -> ApiResult<Json<serde_json::Value>> {
    require_scope(&ctx, "memory")?;
    let long_term = state.memory.get_by_type(MemoryKind::LongTerm, usize::MAX).len();
    let daily = state.memory.get_by_type(MemoryKind::Daily, usize::MAX).len();
    let sessions = state.memory.list_sessions().len();
    Ok(Json(json!({
        "long_term": long_term,
        "daily": daily,
        "sessions": sessions,
    })))
}

//! `/settings` (GET/PUT).

use axum::extract::{Extension, State};
use axum::Json;

use pocketpaw_core::config::schema::Config;

use crate::auth::{require_scope, AuthContext};
use crate::error::ApiResult;
use crate::state::AppState;

/// `GET /api/v1/settings` — the full live configuration.
pub async fn get(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
) -> ApiResult<Json<Config>> {
    require_scope(&ctx, "settings:read")?;
    Ok(Json(state.settings.get().await))
}

/// `PUT /api/v1/settings` — replace the live configuration wholesale and
/// persist it. Callers should `GET` first and submit the merged document;
/// there is no partial-patch semantics here.
pub async fn put(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Json(body): Json<Config>,
) -> ApiResult<Json<Config>> {
    require_scope(&ctx, "settings:write")?;
    state
        .settings
        .replace(body)
        .await
        .map_err(|e| crate::error::PocketPawError::Configuration(e.to_string()))?;
    Ok(Json(state.settings.get().await))
}

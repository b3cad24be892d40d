//! `/auth/session`, `/auth/login`, `/auth/logout`, `/auth/api-keys`.

use axum::extract::{Extension, Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;

use pocketpaw_core::security::session_tokens;

use crate::auth::{require_scope, AuthContext};
use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Serialize)]
pub struct SessionTokenResponse {
    pub token: String,
    pub expires_in_secs: i64,
}

/// `POST /api/v1/auth/session` — mint a session token for the caller's
/// current auth (loopback or master-token request only; a session token
/// minting itself would be a privilege-escalation loop for scoped callers).
pub async fn create_session(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
) -> ApiResult<Json<SessionTokenResponse>> {
    require_scope(&ctx, "admin")?;
    let ttl_hours = state.settings.get().await.security.session_ttl_hours;
    let ttl_secs = (ttl_hours as i64) * 3600;
    let token = session_tokens::issue(&state.session_secret, ttl_secs);
    Ok(Json(SessionTokenResponse {
        token,
        expires_in_secs: ttl_secs,
    }))
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub master_token: String,
}

/// `POST /api/v1/auth/login` — exchange the master token for a session
/// token without requiring the caller to already be loopback/admin. This is
/// the one endpoint a remote client authenticates against directly.
pub async fn login(
    State(state): State<AppState>,
    Json(body): Json<LoginRequest>,
) -> ApiResult<Json<SessionTokenResponse>> {
    let security = state.settings.get().await.security;
    if security.master_token.is_empty() || body.master_token != security.master_token {
        return Err(crate::error::unauthorized("invalid master token"));
    }
    let ttl_secs = (security.session_ttl_hours as i64) * 3600;
    let token = session_tokens::issue(&state.session_secret, ttl_secs);
    Ok(Json(SessionTokenResponse {
        token,
        expires_in_secs: ttl_secs,
    }))
}

/// `POST /api/v1/auth/logout` — session tokens are stateless (HMAC + expiry,
/// no server-side record), so there's nothing to revoke server-side; this
/// just acknowledges the client should discard its token.
pub async fn logout(Extension(ctx): Extension<AuthContext>) -> Json<serde_json::Value> {
    Json(json!({"logged_out": ctx.actor}))
}

#[derive(Deserialize)]
pub struct CreateApiKeyRequest {
    pub name: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    pub expires_at: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Serialize)]
pub struct CreateApiKeyResponse {
    pub key: String,
    pub record: pocketpaw_core::types::ApiKeyRecord,
}

/// `POST /api/v1/auth/api-keys` — mint a new API key. Admin-only: a scoped
/// caller minting its own replacement keys would make scopes unenforceable.
pub async fn create_api_key(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Json(body): Json<CreateApiKeyRequest>,
) -> ApiResult<Json<CreateApiKeyResponse>> {
    require_scope(&ctx, "admin")?;
    let (key, record) = state.api_keys.create(body.name, body.scopes, body.expires_at).await?;
    Ok(Json(CreateApiKeyResponse { key, record }))
}

/// `GET /api/v1/auth/api-keys` — list issued keys (hashes and metadata
/// only; plaintext is never stored so it can't leak here).
pub async fn list_api_keys(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
) -> ApiResult<Json<Vec<pocketpaw_core::types::ApiKeyRecord>>> {
    require_scope(&ctx, "admin")?;
    Ok(Json(state.api_keys.list().await))
}

/// `DELETE /api/v1/auth/api-keys/{id}` — revoke a key.
pub async fn revoke_api_key(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<uuid::Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    require_scope(&ctx, "admin")?;
    let revoked = state.api_keys.revoke(id).await?;
    Ok(Json(json!({"revoked": revoked})))
}

/// `POST /api/v1/auth/api-keys/{id}/rotate` — revoke the old key, mint a
/// replacement with the same name/scopes/expiry.
pub async fn rotate_api_key(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<uuid::Uuid>,
) -> ApiResult<Json<CreateApiKeyResponse>> {
    require_scope(&ctx, "admin")?;
    let existing = state
        .api_keys
        .list()
        .await
        .into_iter()
        .find(|r| r.id == id)
        .ok_or_else(|| crate::error::forbidden("no such API key"))?;

    state.api_keys.revoke(id).await?;
    let (key, record) = state
        .api_keys
        .create(existing.name, existing.scopes, existing.expires_at)
        .await?;
    Ok(Json(CreateApiKeyResponse { key, record }))
}

//! `/health`, `/audit`, `/security-audit`, `/self-audit/*`.

use axum::extract::{Extension, Path, Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use pocketpaw_core::types::{AuditEvent, AuditSeverity};

use crate::auth::{require_scope, AuthContext};
use crate::error::{ApiResult, PocketPawError};
use crate::state::AppState;

/// `GET /api/v1/health` — unauthenticated-shaped liveness probe (still
/// behind the auth layer like everything else under `/api/v1`, but reports
/// no secrets).
pub async fn health() -> Json<serde_json::Value> {
    Json(json!({"status": "ok"}))
}

#[derive(Deserialize)]
pub struct AuditQuery {
    #[serde(default = "default_audit_limit")]
    pub limit: usize,
}

fn default_audit_limit() -> usize {
    100
}

/// `GET /api/v1/audit` — recent audit events, newest first.
pub async fn audit(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Query(query): Query<AuditQuery>,
) -> ApiResult<Json<Vec<AuditEvent>>> {
    require_scope(&ctx, "admin")?;
    Ok(Json(state.audit.tail(query.limit).await))
}

/// `GET /api/v1/security-audit` — a point-in-time posture check: is a
/// master token configured, is plan mode on, what policy profile is
/// active. Doesn't re-derive file-permission checks already enforced at
/// startup by `ApiKeyStore::open`/`AuthorizationServer` construction —
/// those fail process startup outright rather than surfacing here.
pub async fn security_audit(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
) -> ApiResult<Json<serde_json::Value>> {
    require_scope(&ctx, "admin")?;
    let config = state.settings.get().await;
    let security = &config.security;

    let findings = json!({
        "master_token_configured": !security.master_token.is_empty(),
        "plan_mode_enabled": security.plan_mode,
        "policy_profile": security.policy_profile,
        "policy_deny": security.policy_deny,
        "active_api_keys": state.api_keys.list().await.iter().filter(|k| !k.revoked).count(),
    });

    state
        .audit
        .record(AuditSeverity::Info, ctx.actor.clone(), "security_audit", "http", "ok")
        .await;

    Ok(Json(findings))
}

/// `GET /api/v1/self-audit/summary` — event counts by severity over the
/// tail of the audit log, for a quick "is anything on fire" dashboard
/// widget. Other `/self-audit/*` sub-resources are left for a future
/// iteration once a concrete UI consumer asks for them.
pub async fn self_audit(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(kind): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    require_scope(&ctx, "admin")?;
    if kind != "summary" {
        return Err(PocketPawError::Protocol(format!("unknown self-audit resource '{kind}'")).into());
    }

    let events = state.audit.tail(1000).await;
    let mut info = 0;
    let mut warning = 0;
    let mut critical = 0;
    let mut alert = 0;
    for event in &events {
        match event.severity {
            AuditSeverity::Info => info += 1,
            AuditSeverity::Warning => warning += 1,
            AuditSeverity::Critical => critical += 1,
            AuditSeverity::Alert => alert += 1,
        }
    }

    Ok(Json(json!({
        "total": events.len(),
        "info": info,
        "warning": warning,
        "critical": critical,
        "alert": alert,
    })))
}

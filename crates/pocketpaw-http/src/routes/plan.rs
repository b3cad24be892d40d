//! `/plan/approve`, `/plan/reject`.

use axum::extract::{Extension, State};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::auth::{require_scope, AuthContext};
use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct PlanActionRequest {
    pub session_id: String,
}

/// `POST /api/v1/plan/approve` — release a turn waiting on Critical-trust
/// tool approval.
pub async fn approve(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Json(body): Json<PlanActionRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    require_scope(&ctx, "chat")?;
    let approved = state.plans.approve_plan(&body.session_id).await;
    Ok(Json(json!({"approved": approved})))
}

/// `POST /api/v1/plan/reject` — reject a turn's pending plan.
pub async fn reject(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Json(body): Json<PlanActionRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    require_scope(&ctx, "chat")?;
    let rejected = state.plans.reject_plan(&body.session_id).await;
    Ok(Json(json!({"rejected": rejected})))
}

/// `GET /api/v1/plan/{session_id}` — inspect the active plan, if any.
pub async fn get(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    axum::extract::Path(session_id): axum::extract::Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    require_scope(&ctx, "chat")?;
    let plan = state.plans.get_active_plan(&session_id).await;
    Ok(Json(json!({"plan": plan})))
}

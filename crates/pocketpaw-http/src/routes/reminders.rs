//! `/reminders` (GET/POST/DELETE) — thin REST face on `pocketpaw-cron`.

use axum::extract::{Extension, Path, State};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use pocketpaw_cron::{CronJob, CronPayload, CronSchedule};

use crate::auth::{require_scope, AuthContext};
use crate::error::{ApiResult, PocketPawError};
use crate::state::AppState;

/// `GET /api/v1/reminders` — list scheduled jobs.
pub async fn list(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
) -> ApiResult<Json<Vec<CronJob>>> {
    require_scope(&ctx, "reminders")?;
    Ok(Json(state.cron.list_jobs().await))
}

#[derive(Deserialize)]
pub struct CreateReminderRequest {
    pub name: String,
    pub schedule: CronSchedule,
    pub payload: CronPayload,
}

/// `POST /api/v1/reminders` — schedule a new job.
pub async fn create(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Json(body): Json<CreateReminderRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    require_scope(&ctx, "reminders")?;
    let job = CronJob::new(body.name, body.schedule, body.payload);
    let id = state
        .cron
        .add_job(job)
        .await
        .map_err(PocketPawError::Runtime)?;
    Ok(Json(json!({"id": id})))
}

/// `DELETE /api/v1/reminders/{id}` — cancel a scheduled job.
pub async fn delete(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    require_scope(&ctx, "reminders")?;
    let removed = state
        .cron
        .remove_job(&id)
        .await
        .map_err(PocketPawError::Runtime)?;
    Ok(Json(json!({"removed": removed})))
}

//! REST handlers for schedules, recording control and the engine.

use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use streamrec_scheduler::{BadgeReport, EngineSnapshot, SchedulerError, TickOutcome};
use streamrec_types::{RecorderStatus, ScheduleInput, ScheduleRule};

use crate::GatewayState;
use crate::error::ApiError;

type ApiResult<T> = Result<T, ApiError>;

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> ApiResult<T> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| ApiError::BadRequest(rejection.body_text()))
}

// ─── Schedules ──────────────────────────────────────────

/// GET /api/schedules
pub async fn list_schedules(
    State(state): State<Arc<GatewayState>>,
) -> ApiResult<Json<Vec<ScheduleRule>>> {
    Ok(Json(state.store.list().await?))
}

/// POST /api/schedules: returns 201 with the new ID.
pub async fn add_schedule(
    State(state): State<Arc<GatewayState>>,
    payload: Result<Json<ScheduleInput>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<serde_json::Value>)> {
    let input = body(payload)?;
    let id = state.store.add(input, state.clock.now()).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "id": id })),
    ))
}

/// GET /api/schedules/{id}
pub async fn get_schedule(
    State(state): State<Arc<GatewayState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<ScheduleRule>> {
    Ok(Json(state.store.get(&id).await?))
}

/// PUT /api/schedules/{id}: full replacement.
pub async fn update_schedule(
    State(state): State<Arc<GatewayState>>,
    Path(id): Path<String>,
    payload: Result<Json<ScheduleInput>, JsonRejection>,
) -> ApiResult<Json<ScheduleRule>> {
    let input = body(payload)?;
    Ok(Json(state.store.update(&id, input).await?))
}

/// DELETE /api/schedules/{id}
pub async fn delete_schedule(
    State(state): State<Arc<GatewayState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    state.store.delete(&id).await?;
    Ok(Json(json!({ "success": true })))
}

#[derive(Debug, Deserialize, Default)]
pub struct NextQuery {
    since: Option<u64>,
}

/// GET /api/schedules/next?since=<token>
pub async fn next_schedule(
    State(state): State<Arc<GatewayState>>,
    Query(query): Query<NextQuery>,
) -> ApiResult<Json<BadgeReport>> {
    Ok(Json(state.badge.query(query.since).await?))
}

// ─── Recording ──────────────────────────────────────────

/// GET /api/recording/status
pub async fn recording_status(
    State(state): State<Arc<GatewayState>>,
) -> ApiResult<Json<RecorderStatus>> {
    Ok(Json(state.engine.recording_status().await?))
}

fn controller_failure(err: SchedulerError) -> Response {
    match err {
        SchedulerError::Controller(e) => (
            StatusCode::BAD_GATEWAY,
            Json(json!({ "success": false, "reason": e.to_string() })),
        )
            .into_response(),
        other => ApiError::from(other).into_response(),
    }
}

/// POST /api/recording/start
pub async fn start_recording(State(state): State<Arc<GatewayState>>) -> Response {
    match state.engine.start_recording().await {
        Ok(since) => Json(json!({ "success": true, "start_time": since })).into_response(),
        Err(e) => controller_failure(e),
    }
}

/// POST /api/recording/stop
pub async fn stop_recording(State(state): State<Arc<GatewayState>>) -> Response {
    match state.engine.stop_recording().await {
        Ok(()) => Json(json!({ "success": true })).into_response(),
        Err(e) => controller_failure(e),
    }
}

// ─── Engine ─────────────────────────────────────────────

/// GET /api/scheduler/state
pub async fn scheduler_state(
    State(state): State<Arc<GatewayState>>,
) -> ApiResult<Json<EngineSnapshot>> {
    Ok(Json(state.engine.snapshot().await?))
}

/// POST /api/scheduler/tick: run one tick now.
pub async fn scheduler_tick(State(state): State<Arc<GatewayState>>) -> Json<TickOutcome> {
    info!("Tick requested over HTTP");
    Json(state.engine.tick().await)
}

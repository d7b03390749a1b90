//! API route definitions.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::{json, Value};

use super::error::ApiError;
use super::state::AppState;
use crate::model::{NewSchedule, NewTarget, RunId, RunQuery, ScheduleId, TargetId};

type ApiResult = Result<(StatusCode, Json<Value>), ApiError>;

pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/targets", get(list_targets).post(create_target))
        .route("/targets/{id}", get(get_target).delete(delete_target))
        .route("/schedules", get(list_schedules).post(create_schedule))
        .route("/schedules/{id}", get(get_schedule).delete(delete_schedule))
        .route("/schedules/{id}/pause", post(pause_schedule))
        .route("/schedules/{id}/resume", post(resume_schedule))
        .route("/runs", get(list_runs))
        .route("/runs/{id}", get(get_run))
        .route("/metrics", get(metrics))
}

fn meta() -> Value {
    json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION")
    })
}

fn one<T: Serialize>(status: StatusCode, data: T) -> ApiResult {
    Ok((status, Json(json!({ "data": data, "meta": meta() }))))
}

fn many<T: Serialize>(data: Vec<T>) -> ApiResult {
    let total = data.len();
    Ok((
        StatusCode::OK,
        Json(json!({ "data": data, "meta": { "total": total } })),
    ))
}

async fn health() -> Json<Value> {
    Json(json!({
        "data": {
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION")
        },
        "meta": meta()
    }))
}

// --- targets ----------------------------------------------------------------

async fn create_target(State(state): State<AppState>, Json(new): Json<NewTarget>) -> ApiResult {
    let target = state.scheduler.create_target(new)?;
    one(StatusCode::CREATED, target)
}

async fn list_targets(State(state): State<AppState>) -> ApiResult {
    many(state.scheduler.list_targets()?)
}

async fn get_target(State(state): State<AppState>, Path(id): Path<TargetId>) -> ApiResult {
    one(StatusCode::OK, state.scheduler.target(id)?)
}

async fn delete_target(
    State(state): State<AppState>,
    Path(id): Path<TargetId>,
) -> Result<StatusCode, ApiError> {
    state.scheduler.delete_target(id)?;
    Ok(StatusCode::NO_CONTENT)
}

// --- schedules --------------------------------------------------------------

async fn create_schedule(
    State(state): State<AppState>,
    Json(new): Json<NewSchedule>,
) -> ApiResult {
    let schedule = state.scheduler.create_schedule(new)?;
    one(StatusCode::CREATED, schedule)
}

async fn list_schedules(State(state): State<AppState>) -> ApiResult {
    many(state.scheduler.list_schedules()?)
}

async fn get_schedule(State(state): State<AppState>, Path(id): Path<ScheduleId>) -> ApiResult {
    one(StatusCode::OK, state.scheduler.schedule(id)?)
}

async fn pause_schedule(State(state): State<AppState>, Path(id): Path<ScheduleId>) -> ApiResult {
    one(StatusCode::OK, state.scheduler.pause(id)?)
}

async fn resume_schedule(State(state): State<AppState>, Path(id): Path<ScheduleId>) -> ApiResult {
    one(StatusCode::OK, state.scheduler.resume(id)?)
}

async fn delete_schedule(
    State(state): State<AppState>,
    Path(id): Path<ScheduleId>,
) -> Result<StatusCode, ApiError> {
    state.scheduler.delete_schedule(id)?;
    Ok(StatusCode::NO_CONTENT)
}

// --- runs -------------------------------------------------------------------

async fn list_runs(State(state): State<AppState>, Query(query): Query<RunQuery>) -> ApiResult {
    many(state.scheduler.runs(&query)?)
}

async fn get_run(State(state): State<AppState>, Path(id): Path<RunId>) -> ApiResult {
    one(StatusCode::OK, state.scheduler.run(id)?)
}

async fn metrics(State(state): State<AppState>) -> ApiResult {
    let stats = state.scheduler.run_stats()?;
    let live = state.metrics.snapshot();
    let live_avg = (live.avg_latency_ms() * 100.0).round() / 100.0;
    one(
        StatusCode::OK,
        json!({
            "total_runs": stats.total_runs,
            "success_runs": stats.success_runs,
            "failed_runs": stats.failed_runs,
            "avg_latency_ms": stats.avg_latency_ms,
            "failures_by_type": stats.failures_by_type,
            "live": {
                "executions": live.executions,
                "successes": live.successes,
                "failures": live.failures,
                "failures_by_type": live.failures_by_type,
                "avg_latency_ms": live_avg,
                "max_latency_ms": live.latency_ms_max,
            }
        }),
    )
}

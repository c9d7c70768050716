//! REST endpoints and the router that ties them to the WebSocket stream.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use tracing::warn;

use crate::optimize;
use crate::scheduler::run_tick;
use crate::state::AppState;
use crate::ws::ws_handler;

fn unavailable(e: impl std::fmt::Display) -> Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(json!({ "error": e.to_string() })),
    )
        .into_response()
}

/// Latest snapshot if it is younger than one sample interval. Otherwise (no
/// subscribers, so the scheduler is idle, or nothing sampled yet) sample on demand.
pub async fn stats(State(state): State<AppState>) -> Response {
    if let Some(snap) = state.hub.latest_within(state.sample_interval) {
        return Json(&*snap).into_response();
    }
    match run_tick(&state.sampler, &state.history, &state.hub).await {
        Ok(snap) => Json(&*snap).into_response(),
        Err(e) => {
            warn!("on-demand tick failed: {e}");
            unavailable(e)
        }
    }
}

pub async fn history(State(state): State<AppState>) -> Response {
    Json(state.history.snapshot()).into_response()
}

pub async fn processes(State(state): State<AppState>) -> Response {
    match state.processes.top().await {
        Ok(list) => Json(list).into_response(),
        Err(e) => {
            warn!("process list failed: {e}");
            unavailable(e)
        }
    }
}

pub async fn run_optimize(State(state): State<AppState>) -> Response {
    let report = optimize::run(state.optimize_dir.clone(), &state.hub).await;
    Json(report).into_response()
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/api/system/stats", get(stats))
        .route("/api/system/history", get(history))
        .route("/api/system/processes", get(processes))
        .route("/api/system/optimize", post(run_optimize))
        .with_state(state)
}

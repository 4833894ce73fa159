/// Run lifecycle REST API endpoints
///
/// A run is created from a registered graph id or an inline definition. By
/// default it starts immediately in the background; `wait` blocks the request
/// until the run finishes and returns the final snapshot with its event log.

use crate::api::{stream::stream_run_events, ApiError, AppState};
use crate::runtime::{
    events::Event,
    run::{RunId, RunSnapshot, RunStatus},
};
use crate::workflow::{CompiledGraph, GraphDefinition};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub struct CreateRunRequest {
    /// Registered graph to run
    pub graph_id: Option<String>,
    /// Inline graph definition, used when `graph_id` is absent
    pub graph: Option<GraphDefinition>,
    #[serde(default)]
    pub initial_state: Map<String, Value>,
    /// Caller-assigned run id; generated when absent
    pub run_id: Option<String>,
    #[serde(default = "default_start")]
    pub start: bool,
    #[serde(default)]
    pub wait: bool,
}

fn default_start() -> bool {
    true
}

#[derive(Debug, Default, Deserialize)]
pub struct WaitQuery {
    #[serde(default)]
    pub wait: bool,
}

#[derive(Debug, Serialize)]
pub struct RunResponse {
    pub run_id: RunId,
    pub status: RunStatus,
}

/// Final snapshot plus the full event log
#[derive(Debug, Serialize)]
pub struct CompletedRunResponse {
    #[serde(flatten)]
    pub snapshot: RunSnapshot,
    pub events: Vec<Event>,
}

pub fn create_run_routes() -> Router<AppState> {
    Router::new()
        .route("/api/runs", post(create_run))
        .route("/api/runs/{id}/start", post(start_run))
        .route("/api/runs/{id}/cancel", post(cancel_run))
        .route("/api/runs/{id}/state", get(get_run_state))
        .route("/api/runs/{id}/events", get(get_run_events))
        .route("/api/runs/{id}/ws", get(stream_run_events))
}

/// POST /api/runs
/// Body: `{ "graph_id": "graph_1", "initial_state": {...}, "wait": true }`
async fn create_run(
    State(state): State<AppState>,
    Json(request): Json<CreateRunRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let graph = match (request.graph_id, request.graph) {
        (Some(id), _) => state.graphs.get(&id)?,
        (None, Some(definition)) => Arc::new(CompiledGraph::compile(definition)?),
        (None, None) => return Err(ApiError::bad_request("Either 'graph_id' or 'graph' is required")),
    };

    let run_id = state
        .engine
        .submit(graph, request.initial_state, request.run_id.map(RunId::from))
        .await?;

    if !request.start {
        let status = state.engine.get_status(&run_id).await?;
        return Ok((StatusCode::CREATED, json_response(RunResponse { run_id, status })?));
    }

    state.engine.start(&run_id).await?;
    if request.wait {
        return Ok((StatusCode::OK, json_response(finished_run(&state, &run_id).await?)?));
    }

    let status = state.engine.get_status(&run_id).await?;
    Ok((StatusCode::ACCEPTED, json_response(RunResponse { run_id, status })?))
}

/// POST /api/runs/{id}/start[?wait=true]
async fn start_run(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<WaitQuery>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let run_id = RunId::from(id);
    state.engine.start(&run_id).await?;

    if query.wait {
        return Ok((StatusCode::OK, json_response(finished_run(&state, &run_id).await?)?));
    }
    let status = state.engine.get_status(&run_id).await?;
    Ok((StatusCode::ACCEPTED, json_response(RunResponse { run_id, status })?))
}

/// POST /api/runs/{id}/cancel
async fn cancel_run(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<RunResponse>, ApiError> {
    let run_id = RunId::from(id);
    let status = state.engine.cancel(&run_id).await?;
    Ok(Json(RunResponse { run_id, status }))
}

/// GET /api/runs/{id}/state
async fn get_run_state(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<RunSnapshot>, ApiError> {
    let snapshot = state.engine.snapshot(&RunId::from(id)).await?;
    Ok(Json(RunSnapshot::clone(&snapshot)))
}

/// GET /api/runs/{id}/events
async fn get_run_events(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Event>>, ApiError> {
    Ok(Json(state.engine.events(&RunId::from(id)).await?))
}

pub(crate) async fn finished_run(state: &AppState, run_id: &RunId) -> Result<CompletedRunResponse, ApiError> {
    let snapshot = state.engine.wait(run_id).await?;
    let events = state.engine.events(run_id).await?;
    Ok(CompletedRunResponse {
        snapshot: RunSnapshot::clone(&snapshot),
        events,
    })
}

fn json_response<T: Serialize>(body: T) -> Result<Json<Value>, ApiError> {
    serde_json::to_value(body)
        .map(Json)
        .map_err(|e| ApiError::internal(format!("Failed to serialize response: {}", e)))
}

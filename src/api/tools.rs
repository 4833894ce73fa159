/// Tool registry, demo workflow and stats endpoints

use crate::api::{
    runs::{finished_run, CompletedRunResponse},
    ApiError, AppState,
};
use crate::runtime::{executor::LuaExecutable, registry::ExecutableInfo};
use crate::tools::code_review::SAMPLE_CODE;
use axum::{
    extract::State,
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub struct RegisterToolRequest {
    pub name: String,
    /// Lua chunk returning a table of state updates
    pub script: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct CodeReviewRequest {
    /// Python source to review; the bundled sample when absent
    pub code: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub graphs: usize,
    pub functions: usize,
    pub runs: usize,
    pub active_runs: usize,
    pub completed_runs: usize,
    pub failed_runs: usize,
    pub total_events: usize,
}

pub fn create_tool_routes() -> Router<AppState> {
    Router::new()
        .route("/api/tools", get(list_tools).post(register_tool))
        .route("/api/demo/code-review", post(run_code_review))
        .route("/api/stats", get(get_stats))
}

/// GET /api/tools
async fn list_tools(State(state): State<AppState>) -> Json<Vec<ExecutableInfo>> {
    Json(state.nodes.list())
}

/// POST /api/tools
/// Body: `{ "name": "double", "script": "return { n = state.n * 2 }" }`
async fn register_tool(
    State(state): State<AppState>,
    Json(request): Json<RegisterToolRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    if request.name.trim().is_empty() {
        return Err(ApiError::bad_request("Tool name must not be empty"));
    }
    let executable = LuaExecutable::new(request.script).map_err(|e| ApiError::unprocessable(format!("{:#}", e)))?;
    state.nodes.register(&request.name, Arc::new(executable))?;

    tracing::info!("🌙 Registered Lua tool '{}'", request.name);
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "name": request.name,
            "message": format!("Tool '{}' registered successfully", request.name),
        })),
    ))
}

/// POST /api/demo/code-review
/// Body: `{ "code": "def f():\n    pass" }` (optional)
async fn run_code_review(
    State(state): State<AppState>,
    body: Option<Json<CodeReviewRequest>>,
) -> Result<Json<CompletedRunResponse>, ApiError> {
    let request = body.map(|Json(request)| request).unwrap_or_default();
    let code = request.code.unwrap_or_else(|| SAMPLE_CODE.to_string());

    let graph = state.graphs.get(&state.demo_graph_id)?;
    let mut initial_state = Map::new();
    initial_state.insert("code".to_string(), Value::String(code));

    let run_id = state.engine.submit(graph, initial_state, None).await?;
    state.engine.start(&run_id).await?;
    Ok(Json(finished_run(&state, &run_id).await?))
}

/// GET /api/stats
async fn get_stats(State(state): State<AppState>) -> Json<StatsResponse> {
    let engine = state.engine.stats().await;
    Json(StatsResponse {
        graphs: state.graphs.len(),
        functions: state.nodes.len(),
        runs: engine.runs,
        active_runs: engine.active_runs,
        completed_runs: engine.completed_runs,
        failed_runs: engine.failed_runs,
        total_events: engine.total_events,
    })
}

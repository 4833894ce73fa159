/// Graph management REST API endpoints
///
/// Graphs are validated and compiled on submission; an invalid definition is
/// rejected here and never reaches the engine.

use crate::api::{ApiError, AppState};
use crate::workflow::{registry::GraphSummary, GraphDefinition};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Serialize)]
pub struct GraphResponse {
    pub graph_id: String,
    pub message: String,
}

pub fn create_graph_routes() -> Router<AppState> {
    Router::new()
        .route("/api/graphs", post(create_graph).get(list_graphs))
        .route("/api/graphs/{id}", get(get_graph))
}

/// POST /api/graphs
/// Body: graph definition `{ "name", "nodes", "start", "edges", ... }`
async fn create_graph(
    State(state): State<AppState>,
    Json(definition): Json<GraphDefinition>,
) -> Result<(StatusCode, Json<GraphResponse>), ApiError> {
    let name = definition.name.clone();
    let graph_id = state.graphs.register(definition)?;

    Ok((
        StatusCode::CREATED,
        Json(GraphResponse {
            message: format!("Graph '{}' created successfully", name),
            graph_id,
        }),
    ))
}

/// GET /api/graphs
async fn list_graphs(State(state): State<AppState>) -> Json<Vec<GraphSummary>> {
    Json(state.graphs.list())
}

/// GET /api/graphs/{id} - returns the definition as submitted
async fn get_graph(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let graph = state.graphs.get(&id)?;
    let definition = serde_json::to_value(graph.definition())
        .map_err(|e| ApiError::internal(format!("Graph cannot be serialized: {}", e)))?;

    Ok(Json(serde_json::json!({
        "graph_id": id,
        "definition": definition,
        "unreachable": graph.unreachable(),
        "has_cycles": graph.has_cycles(),
    })))
}

/// HTTP API Layer
///
/// REST and WebSocket endpoints over the engine:
/// - Graph submission and listing
/// - Run creation, start, cancellation and state reads
/// - Live event streaming over WebSocket
/// - Tool registration and listing, demo workflow, memory stats

use crate::error::EngineError;
use crate::runtime::{engine::ExecutionEngine, registry::NodeRegistry};
use crate::workflow::registry::GraphRegistry;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde_json::json;
use std::sync::Arc;

// Graph submission and listing endpoints
pub mod graphs;

// Run lifecycle endpoints
pub mod runs;

// WebSocket event streaming
pub mod stream;

// Tool registry, demo workflow and stats endpoints
pub mod tools;

// Re-export router builders
pub use graphs::create_graph_routes;
pub use runs::create_run_routes;
pub use tools::create_tool_routes;

/// Application state shared by every handler
#[derive(Clone)]
pub struct AppState {
    /// Submitted graphs
    pub graphs: Arc<GraphRegistry>,
    /// Executable registry, shared with the engine
    pub nodes: Arc<NodeRegistry>,
    /// Run owner
    pub engine: Arc<ExecutionEngine>,
    /// Id of the pre-registered code review graph
    pub demo_graph_id: String,
}

/// Error response: status code plus `{"error": ...}` body
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    pub fn unprocessable(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::UNPROCESSABLE_ENTITY,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl From<EngineError> for ApiError {
    fn from(error: EngineError) -> Self {
        let status = match &error {
            EngineError::RunNotFound(_) | EngineError::GraphNotFound(_) => StatusCode::NOT_FOUND,
            EngineError::DuplicateRun(_) | EngineError::AlreadyStarted(_) => StatusCode::CONFLICT,
            EngineError::InvalidGraph(_) | EngineError::Registration(_) => StatusCode::UNPROCESSABLE_ENTITY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: error.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!("❌ {}", self.message);
        } else {
            tracing::debug!("⚠️ {} {}", self.status, self.message);
        }
        (self.status, Json(json!({"error": self.message}))).into_response()
    }
}

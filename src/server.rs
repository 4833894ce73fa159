/// Server setup and initialization
///
/// Wires together all components: executable registry, graph registry,
/// execution engine, and HTTP routes. Provides the main application factory
/// function for creating the Axum app.

use crate::{
    api::{create_graph_routes, create_run_routes, create_tool_routes, AppState},
    config::Config,
    runtime::{engine::ExecutionEngine, registry::NodeRegistry},
    tools::{code_review::code_review_graph, register_builtins},
    workflow::registry::GraphRegistry,
};
use anyhow::Result;
use axum::{routing::get, Router};
use std::sync::Arc;
use tokio::net::TcpListener;

/// Create the main Axum application with all routes
///
/// Registers the built-in tools and the demo code review graph before any
/// request is served.
pub fn create_app(config: Config) -> Result<Router> {
    tracing::info!("🧰 Initializing executable registry");
    let nodes = Arc::new(NodeRegistry::new());
    register_builtins(&nodes).map_err(|e| anyhow::anyhow!("Failed to register built-in tools: {}", e))?;

    tracing::info!("📊 Initializing graph registry");
    let graphs = Arc::new(GraphRegistry::new());
    let demo_graph_id = graphs
        .register(code_review_graph()?)
        .map_err(|e| anyhow::anyhow!("Failed to register demo graph: {}", e))?;
    tracing::info!("📋 Demo code review graph registered as {}", demo_graph_id);

    tracing::info!(
        "🚀 Initializing execution engine (step budget {}, event buffer {})",
        config.engine.step_budget,
        config.engine.event_buffer
    );
    let engine = Arc::new(ExecutionEngine::new(Arc::clone(&nodes), config.engine));

    let app_state = AppState {
        graphs,
        nodes,
        engine,
        demo_graph_id,
    };

    tracing::info!("📡 Creating HTTP router with all endpoints");
    let app = Router::new()
        // Health check endpoint
        .route("/healthz", get(health_check))
        .merge(create_graph_routes())
        .merge(create_run_routes())
        .merge(create_tool_routes())
        .with_state(app_state);

    tracing::info!("✅ Application initialized successfully");

    Ok(app)
}

/// Start the HTTP server with the given configuration
pub async fn start_server(config: Config) -> Result<()> {
    // Initialize tracing subscriber for logging
    tracing_subscriber::fmt()
        .with_target(false)
        .with_thread_ids(true)
        .with_level(true)
        .init();

    tracing::info!("Starting Graphway server...");

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let app = create_app(config)?;

    let listener = TcpListener::bind(&bind_addr).await?;
    tracing::info!("Server listening on http://{}", bind_addr);

    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}

async fn health_check() -> &'static str {
    "ok"
}

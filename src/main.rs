/// Graphway server entry point
///
/// Serves:
/// - Graph management at /api/graphs/*
/// - Run control, state and event streams at /api/runs/*
/// - Tool registry, demo workflow and stats at /api/tools, /api/demo/*, /api/stats
/// - Health check at /healthz

use graphway::{config::Config, server::start_server};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration (defaults to 0.0.0.0:8000, overridable via GRAPHWAY_* env vars)
    let config = Config::default();

    start_server(config).await?;

    Ok(())
}

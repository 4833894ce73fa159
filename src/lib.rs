/// Graphway: stateful workflow graph engine
///
/// Graphs of named nodes share one JSON state. Each node runs a registered
/// executable that returns a partial update; edges pick the next node directly,
/// by predicate, or in bounded loops. Every step is published on a per-run
/// event stream that clients can replay or follow live.

// Core configuration and setup
pub mod config;

// Error taxonomy shared by the engine and the API
pub mod error;

// Workflow data model - state, predicates, graph definitions and registry
pub mod workflow;

// Runtime execution engine - executables, routing, runs and events
pub mod runtime;

// Built-in tools and the demo code review graph
pub mod tools;

// HTTP API layer - REST and WebSocket endpoints
pub mod api;

// Server setup and initialization
pub mod server;

// Re-export commonly used types for external consumers
pub use error::{EngineError, EngineResult};
pub use runtime::{ExecutionEngine, RunId, RunStatus};
pub use server::{create_app, start_server};
pub use workflow::{CompiledGraph, GraphDefinition, WorkflowState};

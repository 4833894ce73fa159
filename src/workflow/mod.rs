/// Workflow Data Model
///
/// Everything a run is built from:
/// - Run state and key-path lookup
/// - Routing predicates
/// - Graph submission types and their compiled, validated form
/// - Lock-free graph registry using ArcSwap

// State container threaded through every node invocation
pub mod state;

// Boolean predicate language used by conditional and looping edges
pub mod predicate;

// Serde types for graph submission
pub mod types;

// Validation and petgraph analysis of submitted graphs
pub mod graph;

// In-memory registry of compiled graphs
pub mod registry;

// Re-export commonly used types
pub use graph::CompiledGraph;
pub use predicate::Predicate;
pub use registry::GraphRegistry;
pub use state::{StateDelta, WorkflowState};
pub use types::{Branch, EdgeSpec, GraphDefinition, NodeDefinition, NodeSpec, END};

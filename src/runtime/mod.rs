/// Runtime Execution Engine
///
/// This module drives submitted graphs:
/// - Executable trait with built-in and sandboxed Lua implementations
/// - Hot-swappable executable registry
/// - Edge routing with bounded loops
/// - Per-run event log with replayable streams
/// - The engine that owns runs and executes them on tokio

// Owns runs and drives them step by step
pub mod engine;

// Per-run event log and subscriber streams
pub mod events;

// Executable trait and implementations
pub mod executor;

// Name -> executable registry
pub mod registry;

// Next-node selection over compiled edges
pub mod router;

// Run identity, status and atomic snapshots
pub mod run;

// Re-export main types
pub use engine::{EngineStats, ExecutionEngine};
pub use events::{Event, EventKind, EventStream, SubscribeFrom};
pub use executor::{Executable, FnExecutable, Invocation, LuaExecutable};
pub use registry::NodeRegistry;
pub use run::{RunId, RunSnapshot, RunStatus};

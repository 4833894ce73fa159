/// Error taxonomy for graph submission and run execution
///
/// Fatal run conditions (`UnknownNode`, `NodeExecution`, `Routing`,
/// `StepBudgetExceeded`, `Cancelled`) move a run to Failed and are recorded as
/// its terminal event. The remaining variants are returned to callers of the
/// engine and registries directly.

use crate::runtime::run::RunId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Boxed cause carried by node failures
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("No executable registered as '{function}' (node '{node}')")]
    UnknownNode { node: String, function: String },

    #[error("Node '{node}' failed: {source}")]
    NodeExecution {
        node: String,
        #[source]
        source: BoxError,
    },

    #[error("Routing failed after node '{node}': {message}")]
    Routing { node: String, message: String },

    #[error("Step budget of {budget} exceeded")]
    StepBudgetExceeded { budget: usize },

    #[error("Run cancelled")]
    Cancelled,

    #[error("Run not found: {0}")]
    RunNotFound(RunId),

    #[error("Graph not found: {0}")]
    GraphNotFound(String),

    #[error("Invalid graph: {0}")]
    InvalidGraph(String),

    #[error("Run already exists: {0}")]
    DuplicateRun(RunId),

    #[error("Run already started: {0}")]
    AlreadyStarted(RunId),

    #[error("Registration rejected: {0}")]
    Registration(String),

    #[error("Run task aborted: {0}")]
    Internal(String),
}

pub type EngineResult<T> = Result<T, EngineError>;

/// Distinguished cause of a failed run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    UnknownNode,
    NodeExecution,
    Routing,
    StepBudgetExceeded,
    Cancelled,
    /// The task driving the run panicked or was aborted
    Internal,
}

impl EngineError {
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            EngineError::UnknownNode { .. } => FailureKind::UnknownNode,
            EngineError::NodeExecution { .. } => FailureKind::NodeExecution,
            EngineError::Routing { .. } => FailureKind::Routing,
            EngineError::StepBudgetExceeded { .. } => FailureKind::StepBudgetExceeded,
            EngineError::Cancelled => FailureKind::Cancelled,
            _ => FailureKind::Internal,
        }
    }

    /// Node the failure is attributed to, if any
    pub fn node(&self) -> Option<&str> {
        match self {
            EngineError::UnknownNode { node, .. }
            | EngineError::NodeExecution { node, .. }
            | EngineError::Routing { node, .. } => Some(node),
            _ => None,
        }
    }
}

/// Run identity, status and atomic snapshots
///
/// A run's observable state (status, current node, merged state, failure) is
/// held in one `RunSnapshot` behind an `ArcSwap`. The execution task builds the
/// next snapshot in full and publishes it with a single pointer swap, so
/// readers see either the pre-step or the post-step state, never a half-merged
/// one.

use crate::error::{EngineError, FailureKind};
use crate::runtime::events::EventLog;
use crate::workflow::{CompiledGraph, WorkflowState};
use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(String);

impl RunId {
    /// Fresh engine-assigned identifier
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for RunId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for RunId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed)
    }
}

/// Why a run failed, in a form that can be cloned into snapshots and events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunFailure {
    pub kind: FailureKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node: Option<String>,
}

impl From<&EngineError> for RunFailure {
    fn from(error: &EngineError) -> Self {
        Self {
            kind: error.failure_kind(),
            message: error.to_string(),
            node: error.node().map(str::to_string),
        }
    }
}

/// Point-in-time view of a run
#[derive(Debug, Clone, Serialize)]
pub struct RunSnapshot {
    pub run_id: RunId,
    pub graph: String,
    pub status: RunStatus,
    pub current_node: Option<String>,
    pub steps: usize,
    pub state: WorkflowState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<RunFailure>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

/// A single execution of a compiled graph
#[derive(Debug)]
pub struct Run {
    id: RunId,
    graph: Arc<CompiledGraph>,
    snapshot: ArcSwap<RunSnapshot>,
    events: Arc<EventLog>,
    started: AtomicBool,
    cancel: CancellationToken,
    status_tx: watch::Sender<RunStatus>,
}

impl Run {
    pub fn new(id: RunId, graph: Arc<CompiledGraph>, state: WorkflowState, event_buffer: usize) -> Self {
        let snapshot = RunSnapshot {
            run_id: id.clone(),
            graph: graph.name().to_string(),
            status: RunStatus::Pending,
            current_node: None,
            steps: 0,
            state,
            failure: None,
            created_at: Utc::now(),
            finished_at: None,
        };
        let (status_tx, _) = watch::channel(RunStatus::Pending);

        Self {
            events: Arc::new(EventLog::new(id.clone(), event_buffer)),
            id,
            graph,
            snapshot: ArcSwap::from_pointee(snapshot),
            started: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            status_tx,
        }
    }

    pub fn id(&self) -> &RunId {
        &self.id
    }

    pub fn graph(&self) -> &Arc<CompiledGraph> {
        &self.graph
    }

    pub fn events(&self) -> &Arc<EventLog> {
        &self.events
    }

    pub fn snapshot(&self) -> Arc<RunSnapshot> {
        self.snapshot.load_full()
    }

    pub fn status(&self) -> RunStatus {
        self.snapshot.load().status
    }

    /// Flip the started flag; only the first caller wins
    pub(crate) fn claim(&self) -> bool {
        !self.started.swap(true, Ordering::AcqRel)
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Build the next snapshot from the current one and publish it atomically.
    ///
    /// Only the task driving the run calls this, so load-then-store cannot race.
    pub(crate) fn update(&self, f: impl FnOnce(&mut RunSnapshot)) -> Arc<RunSnapshot> {
        let mut next = RunSnapshot::clone(&self.snapshot.load());
        f(&mut next);
        let next = Arc::new(next);
        self.snapshot.store(Arc::clone(&next));
        next
    }

    /// Wake status waiters with the current status
    pub(crate) fn notify(&self) {
        self.status_tx.send_replace(self.status());
    }

    pub(crate) fn subscribe_status(&self) -> watch::Receiver<RunStatus> {
        self.status_tx.subscribe()
    }
}

/// Graph execution engine
///
/// Owns every run in the process. A run is driven by a single task that
/// repeats: resolve node, invoke executable, merge delta, route. Distinct runs
/// execute concurrently on tokio; they share nothing but the read-only graph
/// and executable tables.
///
/// Termination is guaranteed by the step budget even for graphs whose cycles
/// are not guarded by a looping edge.

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::runtime::{
    events::{Event, EventKind, EventStream, SubscribeFrom},
    executor::Invocation,
    registry::{NodeRegistry, NodeTable},
    router::{EdgeRouter, LoopCounters, NextStep},
    run::{Run, RunFailure, RunId, RunSnapshot, RunStatus},
};
use crate::workflow::{
    state::{META_CURRENT_NODE, META_LOOP_ITERATIONS, META_STEP},
    CompiledGraph, GraphDefinition, WorkflowState,
};
use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::{collections::HashMap, sync::Arc, time::Instant};
use tokio::{sync::RwLock, task::JoinHandle};

pub struct ExecutionEngine {
    nodes: Arc<NodeRegistry>,
    runs: RwLock<HashMap<RunId, Arc<Run>>>,
    config: EngineConfig,
}

/// Process-wide counters
#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub runs: usize,
    pub active_runs: usize,
    pub completed_runs: usize,
    pub failed_runs: usize,
    pub total_events: usize,
}

impl ExecutionEngine {
    pub fn new(nodes: Arc<NodeRegistry>, config: EngineConfig) -> Self {
        Self {
            nodes,
            runs: RwLock::new(HashMap::new()),
            config,
        }
    }

    pub fn nodes(&self) -> &Arc<NodeRegistry> {
        &self.nodes
    }

    /// Create a Pending run of `graph` with its own copy of `initial_state`
    pub async fn submit(
        &self,
        graph: Arc<CompiledGraph>,
        initial_state: Map<String, Value>,
        run_id: Option<RunId>,
    ) -> EngineResult<RunId> {
        let run_id = run_id.unwrap_or_else(RunId::generate);
        let mut runs = self.runs.write().await;
        if runs.contains_key(&run_id) {
            return Err(EngineError::DuplicateRun(run_id));
        }

        tracing::info!("📝 Submitted run {} for graph '{}'", run_id, graph.name());
        let run = Run::new(
            run_id.clone(),
            graph,
            WorkflowState::new(initial_state),
            self.config.event_buffer,
        );
        runs.insert(run_id.clone(), Arc::new(run));
        Ok(run_id)
    }

    /// Compile a raw definition and submit it
    pub async fn submit_definition(
        &self,
        definition: GraphDefinition,
        initial_state: Map<String, Value>,
    ) -> EngineResult<RunId> {
        let graph = Arc::new(CompiledGraph::compile(definition)?);
        self.submit(graph, initial_state, None).await
    }

    async fn run(&self, run_id: &RunId) -> EngineResult<Arc<Run>> {
        self.runs
            .read()
            .await
            .get(run_id)
            .cloned()
            .ok_or_else(|| EngineError::RunNotFound(run_id.clone()))
    }

    async fn claim(&self, run_id: &RunId) -> EngineResult<Arc<Run>> {
        let run = self.run(run_id).await?;
        if !run.claim() {
            return Err(EngineError::AlreadyStarted(run_id.clone()));
        }
        Ok(run)
    }

    /// Start a Pending run in the background
    pub async fn start(self: &Arc<Self>, run_id: &RunId) -> EngineResult<()> {
        let run = self.claim(run_id).await?;
        self.spawn_drive(run);
        Ok(())
    }

    /// Drive a Pending run to completion and return its final snapshot.
    ///
    /// The run lives on its own task, so dropping this future only stops
    /// waiting; the run still finishes or honours `cancel`.
    pub async fn execute(self: &Arc<Self>, run_id: &RunId) -> EngineResult<Arc<RunSnapshot>> {
        let run = self.claim(run_id).await?;
        self.spawn_drive(run)
            .await
            .map_err(|e| EngineError::Internal(e.to_string()))
    }

    /// Spawn the run loop under a supervisor that fails the run if the loop
    /// task dies without reaching a terminal status
    fn spawn_drive(self: &Arc<Self>, run: Arc<Run>) -> JoinHandle<Arc<RunSnapshot>> {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            let driver = {
                let engine = Arc::clone(&engine);
                let run = Arc::clone(&run);
                tokio::spawn(async move { engine.drive(run).await })
            };
            match driver.await {
                Ok(snapshot) => snapshot,
                Err(error) => engine.fail(&run, EngineError::Internal(error.to_string())),
            }
        })
    }

    /// Wait until a run reaches Completed or Failed.
    ///
    /// Waits indefinitely on a run that is never started.
    pub async fn wait(&self, run_id: &RunId) -> EngineResult<Arc<RunSnapshot>> {
        let run = self.run(run_id).await?;
        let mut status = run.subscribe_status();
        // The sender lives in `run`, so this only returns once terminal
        let _ = status.wait_for(|status| status.is_terminal()).await;
        Ok(run.snapshot())
    }

    /// Request cancellation. Pending runs fail at once; running runs stop
    /// before their next step.
    pub async fn cancel(&self, run_id: &RunId) -> EngineResult<RunStatus> {
        let run = self.run(run_id).await?;
        if run.claim() {
            tracing::info!("🛑 Cancelling run {} before it started", run_id);
            self.fail(&run, EngineError::Cancelled);
        } else if !run.status().is_terminal() {
            tracing::info!("🛑 Cancellation requested for run {}", run_id);
            run.cancel_token().cancel();
        }
        Ok(run.status())
    }

    /// Latest merged state; never a partially applied delta
    pub async fn get_state(&self, run_id: &RunId) -> EngineResult<WorkflowState> {
        Ok(self.run(run_id).await?.snapshot().state.clone())
    }

    pub async fn get_status(&self, run_id: &RunId) -> EngineResult<RunStatus> {
        Ok(self.run(run_id).await?.status())
    }

    pub async fn snapshot(&self, run_id: &RunId) -> EngineResult<Arc<RunSnapshot>> {
        Ok(self.run(run_id).await?.snapshot())
    }

    /// Every event the run has emitted so far
    pub async fn events(&self, run_id: &RunId) -> EngineResult<Vec<Event>> {
        Ok(self.run(run_id).await?.events().history())
    }

    pub async fn subscribe(&self, run_id: &RunId, from: SubscribeFrom) -> EngineResult<EventStream> {
        Ok(self.run(run_id).await?.events().subscribe(from))
    }

    pub async fn stats(&self) -> EngineStats {
        let runs = self.runs.read().await;
        let mut stats = EngineStats {
            runs: runs.len(),
            active_runs: 0,
            completed_runs: 0,
            failed_runs: 0,
            total_events: 0,
        };
        for run in runs.values() {
            match run.status() {
                RunStatus::Running => stats.active_runs += 1,
                RunStatus::Completed => stats.completed_runs += 1,
                RunStatus::Failed => stats.failed_runs += 1,
                RunStatus::Pending => {}
            }
            stats.total_events += run.events().len();
        }
        stats
    }

    async fn drive(&self, run: Arc<Run>) -> Arc<RunSnapshot> {
        let table = self.nodes.snapshot();
        let graph = Arc::clone(run.graph());
        let router = EdgeRouter::new(&graph);
        let budget = graph.max_steps().unwrap_or(self.config.step_budget);
        let started_at = Instant::now();
        let mut counters = LoopCounters::default();
        let mut current = graph.start_node().to_string();

        tracing::info!("🚀 Starting run {} of graph '{}' at node '{}'", run.id(), graph.name(), current);
        run.update(|snapshot| snapshot.status = RunStatus::Running);
        run.events().publish(
            EventKind::RunStarted,
            None,
            json!({"graph": graph.name(), "start": current, "step_budget": budget}),
        );
        run.notify();

        let mut step = 0;
        loop {
            if run.cancel_token().is_cancelled() {
                return self.fail(&run, EngineError::Cancelled);
            }
            if step >= budget {
                return self.fail(&run, EngineError::StepBudgetExceeded { budget });
            }
            step += 1;

            match self.step(&run, &table, &router, &current, step, &mut counters).await {
                Ok(NextStep::Node(next)) => current = next,
                Ok(NextStep::Terminal) => return self.complete(&run, step, started_at),
                Err(error) => return self.fail(&run, error),
            }
        }
    }

    async fn step(
        &self,
        run: &Run,
        table: &NodeTable,
        router: &EdgeRouter<'_>,
        current: &str,
        step: usize,
        counters: &mut LoopCounters,
    ) -> EngineResult<NextStep> {
        let events = run.events();
        let node = run.graph().node(current).ok_or_else(|| EngineError::UnknownNode {
            node: current.to_string(),
            function: current.to_string(),
        })?;
        let function = node.function_name();
        let executable = table.resolve(current, function)?;

        let before = run.update(|snapshot| {
            snapshot.current_node = Some(current.to_string());
            snapshot.steps = step;
            snapshot.state.set_meta(META_CURRENT_NODE, json!(current));
            snapshot.state.set_meta(META_STEP, json!(step));
        });
        events.publish(
            EventKind::NodeStarted,
            Some(current),
            json!({"function": function, "step": step}),
        );
        tracing::info!("📍 Step {}: executing node '{}' ({})", step, current, function);

        let invocation = Invocation {
            run_id: run.id().clone(),
            node: current.to_string(),
            step,
            state: before.state.clone(),
            params: node.parameters.clone(),
        };

        let node_started = Instant::now();
        let delta = match executable.execute(invocation).await {
            Ok(delta) => delta,
            Err(error) => {
                let duration = node_started.elapsed();
                tracing::error!("❌ Node '{}' failed after {:?}: {:#}", current, duration, error);
                events.publish(
                    EventKind::NodeFailed,
                    Some(current),
                    json!({
                        "function": function,
                        "step": step,
                        "error": format!("{:#}", error),
                        "duration_ms": duration.as_millis() as u64,
                    }),
                );
                return Err(EngineError::NodeExecution {
                    node: current.to_string(),
                    source: error.into(),
                });
            }
        };
        let duration = node_started.elapsed();

        let updated_keys: Vec<&String> = delta.keys().collect();
        let merged = run.update(|snapshot| snapshot.state = snapshot.state.merge(&delta));
        events.publish(
            EventKind::NodeCompleted,
            Some(current),
            json!({
                "function": function,
                "step": step,
                "duration_ms": duration.as_millis() as u64,
                "updated_keys": updated_keys,
            }),
        );
        if !delta.is_empty() {
            events.publish(
                EventKind::StateChanged,
                Some(current),
                json!({"updated_keys": updated_keys, "state": merged.state.data()}),
            );
        }
        tracing::info!("✅ Node '{}' completed in {:?}", current, duration);

        let route = router.next(current, &merged.state, counters)?;
        if route.edge == "looping" {
            let iterations = counters.to_value();
            run.update(|snapshot| snapshot.state.set_meta(META_LOOP_ITERATIONS, iterations));
        }

        let to = match &route.next {
            NextStep::Node(name) => Some(name.as_str()),
            NextStep::Terminal => None,
        };
        if route.bound_reached {
            events.publish(
                EventKind::LoopBoundReached,
                Some(current),
                json!({"iterations": route.iteration, "exit_to": to}),
            );
        }
        events.publish(
            EventKind::Routed,
            Some(current),
            json!({
                "from": current,
                "to": to,
                "edge": route.edge,
                "branch": route.branch,
                "iteration": route.iteration,
            }),
        );
        tracing::debug!("➡️ Routed '{}' -> {:?} via {} edge", current, to, route.edge);

        Ok(route.next)
    }

    fn complete(&self, run: &Run, steps: usize, started_at: Instant) -> Arc<RunSnapshot> {
        let snapshot = run.update(|snapshot| {
            snapshot.status = RunStatus::Completed;
            snapshot.finished_at = Some(Utc::now());
        });
        let elapsed = started_at.elapsed();
        run.events().publish(
            EventKind::RunCompleted,
            None,
            json!({
                "steps": steps,
                "duration_ms": elapsed.as_millis() as u64,
                "state": snapshot.state.data(),
            }),
        );
        run.notify();

        tracing::info!("🎉 Run {} completed in {} steps ({:?})", run.id(), steps, elapsed);
        snapshot
    }

    fn fail(&self, run: &Run, error: EngineError) -> Arc<RunSnapshot> {
        let failure = RunFailure::from(&error);
        let snapshot = run.update(|snapshot| {
            snapshot.status = RunStatus::Failed;
            snapshot.failure = Some(failure.clone());
            snapshot.finished_at = Some(Utc::now());
        });
        run.events().publish(
            EventKind::RunFailed,
            failure.node.as_deref(),
            json!({"kind": failure.kind, "message": failure.message}),
        );
        run.notify();

        tracing::error!("💥 Run {} failed: {}", run.id(), error);
        snapshot
    }
}

/// Edge router: picks the next node after a step
///
/// Looping edges keep a per-run counter keyed by source node. The continue
/// target is taken only while the predicate holds and the counter is below the
/// edge's `max_iterations`; hitting the bound with the predicate still true is
/// a normal exit that is flagged on the returned [`Route`].

use crate::error::{EngineError, EngineResult};
use crate::workflow::{predicate::PredicateError, CompiledGraph, EdgeSpec, WorkflowState};
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NextStep {
    Node(String),
    Terminal,
}

/// A routing decision and how it was reached
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub next: NextStep,
    /// `direct`, `conditional`, `looping`, or `none` for nodes without an edge
    pub edge: &'static str,
    /// Index of the matching conditional branch; `None` when the default was used
    pub branch: Option<usize>,
    /// Loop counter after this decision (looping edges only)
    pub iteration: Option<u32>,
    /// Loop exited because the bound was reached, not because the predicate failed
    pub bound_reached: bool,
}

/// Iteration counters for the looping edges of one run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoopCounters(BTreeMap<String, u32>);

impl LoopCounters {
    pub fn get(&self, source: &str) -> u32 {
        self.0.get(source).copied().unwrap_or(0)
    }

    pub fn to_value(&self) -> Value {
        Value::Object(
            self.0
                .iter()
                .map(|(source, count)| (source.clone(), Value::from(*count)))
                .collect(),
        )
    }

    fn increment(&mut self, source: &str) -> u32 {
        let counter = self.0.entry(source.to_string()).or_insert(0);
        *counter += 1;
        *counter
    }
}

pub struct EdgeRouter<'g> {
    graph: &'g CompiledGraph,
}

impl<'g> EdgeRouter<'g> {
    pub fn new(graph: &'g CompiledGraph) -> Self {
        Self { graph }
    }

    /// Decide where to go after `current` given the freshly merged state
    pub fn next(&self, current: &str, state: &WorkflowState, counters: &mut LoopCounters) -> EngineResult<Route> {
        let Some(edge) = self.graph.edge(current) else {
            return Ok(Route {
                next: NextStep::Terminal,
                edge: "none",
                branch: None,
                iteration: None,
                bound_reached: false,
            });
        };

        let routing_error = |error: PredicateError| EngineError::Routing {
            node: current.to_string(),
            message: error.to_string(),
        };

        let route = |target: &str, branch: Option<usize>, iteration: Option<u32>, bound_reached: bool| Route {
            next: self.target(target),
            edge: edge.kind(),
            branch,
            iteration,
            bound_reached,
        };

        match edge {
            EdgeSpec::Direct { target } => Ok(route(target.as_str(), None, None, false)),

            EdgeSpec::Conditional { branches, default } => {
                for (index, branch) in branches.iter().enumerate() {
                    if branch.when.evaluate(state).map_err(routing_error)? {
                        tracing::debug!("🔀 '{}' matched branch {} ({}) -> '{}'", current, index, branch.when, branch.target);
                        return Ok(route(branch.target.as_str(), Some(index), None, false));
                    }
                }
                tracing::debug!("🔀 '{}' matched no branch, using default '{}'", current, default);
                Ok(route(default.as_str(), None, None, false))
            }

            EdgeSpec::Looping {
                condition,
                continue_to,
                exit_to,
                max_iterations,
            } => {
                let holds = condition.evaluate(state).map_err(routing_error)?;
                let count = counters.get(current);

                if holds && count < *max_iterations {
                    let iteration = counters.increment(current);
                    tracing::debug!("🔁 '{}' loop iteration {}/{} -> '{}'", current, iteration, max_iterations, continue_to);
                    return Ok(route(continue_to.as_str(), None, Some(iteration), false));
                }

                if holds {
                    tracing::warn!("🛑 '{}' hit loop bound of {} with '{}' still true", current, max_iterations, condition);
                }
                Ok(route(exit_to.as_str(), None, Some(count), holds))
            }
        }
    }

    fn target(&self, name: &str) -> NextStep {
        if self.graph.is_terminal_marker(name) {
            NextStep::Terminal
        } else {
            NextStep::Node(name.to_string())
        }
    }
}

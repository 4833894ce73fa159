/// In-memory graph registry using ArcSwap
///
/// Submitted graphs are compiled once and published by swapping the whole map
/// pointer, so lookups never take a lock and a run keeps the `Arc` of the
/// graph it started with even if the registry changes afterwards.

use crate::error::{EngineError, EngineResult};
use crate::workflow::{graph::CompiledGraph, types::GraphDefinition};
use arc_swap::ArcSwap;
use serde::Serialize;
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

#[derive(Debug)]
pub struct GraphRegistry {
    /// Key: graph id (`graph_N`), value: compiled graph
    graphs: ArcSwap<HashMap<String, Arc<CompiledGraph>>>,
    next_id: AtomicUsize,
}

/// Listing entry for a registered graph
#[derive(Debug, Clone, Serialize)]
pub struct GraphSummary {
    pub id: String,
    pub name: String,
    pub nodes: Vec<String>,
    pub start: String,
    pub has_cycles: bool,
}

impl Default for GraphRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphRegistry {
    pub fn new() -> Self {
        Self {
            graphs: ArcSwap::new(Arc::new(HashMap::new())),
            next_id: AtomicUsize::new(1),
        }
    }

    /// Compile and register a graph, returning its assigned id
    pub fn register(&self, definition: GraphDefinition) -> EngineResult<String> {
        let compiled = Arc::new(CompiledGraph::compile(definition)?);
        let id = format!("graph_{}", self.next_id.fetch_add(1, Ordering::Relaxed));

        self.graphs.rcu(|current| {
            let mut next = (**current).clone();
            next.insert(id.clone(), Arc::clone(&compiled));
            next
        });

        tracing::info!("📊 Registered graph '{}' as {} ({} nodes)", compiled.name(), id, compiled.nodes().len());
        Ok(id)
    }

    /// Lock-free lookup
    pub fn get(&self, id: &str) -> EngineResult<Arc<CompiledGraph>> {
        self.graphs
            .load()
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::GraphNotFound(id.to_string()))
    }

    pub fn list(&self) -> Vec<GraphSummary> {
        let graphs = self.graphs.load();
        let mut summaries: Vec<GraphSummary> = graphs
            .iter()
            .map(|(id, graph)| GraphSummary {
                id: id.clone(),
                name: graph.name().to_string(),
                nodes: graph.nodes().iter().map(|node| node.name.clone()).collect(),
                start: graph.start_node().to_string(),
                has_cycles: graph.has_cycles(),
            })
            .collect();
        summaries.sort_by(|a, b| a.id.cmp(&b.id));
        summaries
    }

    pub fn len(&self) -> usize {
        self.graphs.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

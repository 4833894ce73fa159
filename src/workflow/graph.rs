/// Graph compilation and validation
///
/// Turns a submitted [`GraphDefinition`] into an immutable [`CompiledGraph`]:
/// node lookup tables, terminal markers, and a petgraph view of every possible
/// transition used to report unreachable nodes and cycles. Cycles are legal
/// (loops are a feature); they are bounded at run time by loop counters and
/// the engine step budget.

use crate::error::{EngineError, EngineResult};
use crate::workflow::types::{EdgeSpec, GraphDefinition, NodeDefinition, NodeSpec, END};
use petgraph::algo::is_cyclic_directed;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Dfs;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone)]
pub struct CompiledGraph {
    name: String,
    start: String,
    nodes: Vec<NodeDefinition>,
    node_index: HashMap<String, usize>,
    edges: HashMap<String, EdgeSpec>,
    terminals: HashSet<String>,
    terminal_nodes: HashSet<String>,
    max_steps: Option<usize>,
    /// Nodes the start node can never reach
    unreachable: Vec<String>,
    has_cycles: bool,
    definition: GraphDefinition,
}

impl CompiledGraph {
    /// Validate a definition and build its execution tables
    pub fn compile(definition: GraphDefinition) -> EngineResult<Self> {
        let invalid = |message: String| EngineError::InvalidGraph(message);

        if definition.name.trim().is_empty() {
            return Err(invalid("graph name must not be empty".to_string()));
        }
        if definition.nodes.is_empty() {
            return Err(invalid("graph must declare at least one node".to_string()));
        }

        let nodes: Vec<NodeDefinition> = definition
            .nodes
            .iter()
            .cloned()
            .map(NodeSpec::into_definition)
            .collect();

        let mut node_index = HashMap::new();
        for (index, node) in nodes.iter().enumerate() {
            if node.name.trim().is_empty() {
                return Err(invalid("node names must not be empty".to_string()));
            }
            if node_index.insert(node.name.clone(), index).is_some() {
                return Err(invalid(format!("duplicate node '{}'", node.name)));
            }
        }

        if node_index.contains_key(END) {
            return Err(invalid(format!("'{}' is reserved and cannot be a node name", END)));
        }

        // Terminal names that are declared nodes run and then end the run;
        // the rest are pure markers that end the run when routed to
        let (terminal_nodes, mut terminals): (HashSet<String>, HashSet<String>) = definition
            .terminals
            .iter()
            .cloned()
            .partition(|name| node_index.contains_key(name));
        terminals.insert(END.to_string());
        if let Some(node) = terminal_nodes.iter().find(|node| definition.edges.contains_key(*node)) {
            return Err(invalid(format!("terminal node '{}' must not declare an edge", node)));
        }

        if !node_index.contains_key(&definition.start) {
            return Err(invalid(format!("start node '{}' is not declared", definition.start)));
        }

        if definition.max_steps == Some(0) {
            return Err(invalid("max_steps must be at least 1".to_string()));
        }

        for (source, edge) in &definition.edges {
            if !node_index.contains_key(source) {
                return Err(invalid(format!("edge declared for unknown node '{}'", source)));
            }
            for target in edge.targets() {
                if !node_index.contains_key(target) && !terminals.contains(target) {
                    return Err(invalid(format!(
                        "edge from '{}' targets unknown node '{}'",
                        source, target
                    )));
                }
            }
            if let EdgeSpec::Looping { max_iterations: 0, .. } = edge {
                return Err(invalid(format!(
                    "looping edge from '{}' needs max_iterations of at least 1",
                    source
                )));
            }
        }

        let (unreachable, has_cycles) = analyze(&definition, &nodes, &node_index);
        for node in &unreachable {
            tracing::warn!("⚠️ Graph '{}': node '{}' is unreachable from '{}'", definition.name, node, definition.start);
        }
        if has_cycles {
            tracing::debug!("🔁 Graph '{}' contains cycles; bounded by loop limits and step budget", definition.name);
        }

        Ok(Self {
            name: definition.name.clone(),
            start: definition.start.clone(),
            edges: definition.edges.clone().into_iter().collect(),
            max_steps: definition.max_steps,
            nodes,
            node_index,
            terminals,
            terminal_nodes,
            unreachable,
            has_cycles,
            definition,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn start_node(&self) -> &str {
        &self.start
    }

    pub fn node(&self, name: &str) -> Option<&NodeDefinition> {
        self.node_index.get(name).map(|&index| &self.nodes[index])
    }

    pub fn nodes(&self) -> &[NodeDefinition] {
        &self.nodes
    }

    /// Routing rule for a node; `None` means the node is terminal
    pub fn edge(&self, node: &str) -> Option<&EdgeSpec> {
        self.edges.get(node)
    }

    pub fn is_terminal_marker(&self, name: &str) -> bool {
        self.terminals.contains(name)
    }

    /// Declared node listed in `terminals`: the run ends once it has executed
    pub fn is_terminal_node(&self, name: &str) -> bool {
        self.terminal_nodes.contains(name)
    }

    pub fn max_steps(&self) -> Option<usize> {
        self.max_steps
    }

    pub fn unreachable(&self) -> &[String] {
        &self.unreachable
    }

    pub fn has_cycles(&self) -> bool {
        self.has_cycles
    }

    pub fn definition(&self) -> &GraphDefinition {
        &self.definition
    }
}

/// Build the transition graph and report unreachable nodes and cyclicity
fn analyze(
    definition: &GraphDefinition,
    nodes: &[NodeDefinition],
    node_index: &HashMap<String, usize>,
) -> (Vec<String>, bool) {
    let mut graph: DiGraph<&str, ()> = DiGraph::new();
    let indices: Vec<NodeIndex> = nodes.iter().map(|node| graph.add_node(node.name.as_str())).collect();

    for (source, edge) in &definition.edges {
        let Some(&from) = node_index.get(source) else { continue };
        for target in edge.targets() {
            if let Some(&to) = node_index.get(target) {
                graph.update_edge(indices[from], indices[to], ());
            }
        }
    }

    let mut reachable = HashSet::new();
    if let Some(&start) = node_index.get(&definition.start) {
        let mut dfs = Dfs::new(&graph, indices[start]);
        while let Some(visited) = dfs.next(&graph) {
            reachable.insert(visited);
        }
    }

    let unreachable = indices
        .iter()
        .filter(|index| !reachable.contains(*index))
        .map(|&index| graph[index].to_string())
        .collect();

    (unreachable, is_cyclic_directed(&graph))
}

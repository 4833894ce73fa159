/// Graph submission format
///
/// These are the serde types callers submit. A definition is only usable after
/// it has been compiled into a [`CompiledGraph`](crate::workflow::graph::CompiledGraph),
/// which validates it and freezes it for the lifetime of any run that uses it.

use crate::workflow::predicate::Predicate;
use serde::{
    de::{self, MapAccess, Visitor},
    Deserialize, Deserializer, Serialize,
};
use serde_json::Value;
use std::{collections::BTreeMap, fmt};

/// Terminal marker that every graph understands
pub const END: &str = "__end__";

/// A complete graph definition: nodes, start node and routing rules
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphDefinition {
    /// Human-readable graph name
    pub name: String,
    /// Nodes in declaration order
    pub nodes: Vec<NodeSpec>,
    /// Node execution starts at
    #[serde(alias = "start_node")]
    pub start: String,
    /// Routing rule per source node; nodes without an entry are terminal.
    /// A source named twice is rejected rather than silently overwritten.
    #[serde(default, deserialize_with = "unique_edges")]
    pub edges: BTreeMap<String, EdgeSpec>,
    /// Extra terminal marker names besides [`END`]
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub terminals: Vec<String>,
    /// Per-graph override of the engine step budget
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_steps: Option<usize>,
}

/// Node entry as written by callers: either a bare name or a full definition
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NodeSpec {
    Name(String),
    Full(NodeDefinition),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDefinition {
    pub name: String,
    /// Registry name of the executable; defaults to the node name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function: Option<String>,
    /// Static parameters handed to the executable on every invocation
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub parameters: Value,
}

impl NodeDefinition {
    pub fn function_name(&self) -> &str {
        self.function.as_deref().unwrap_or(&self.name)
    }
}

impl NodeSpec {
    pub fn into_definition(self) -> NodeDefinition {
        match self {
            NodeSpec::Name(name) => NodeDefinition {
                name,
                function: None,
                parameters: Value::Null,
            },
            NodeSpec::Full(definition) => definition,
        }
    }
}

/// Routing rule attached to a source node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EdgeSpec {
    /// Unconditional hop
    Direct { target: String },
    /// First matching branch wins; `default` when none match
    Conditional {
        branches: Vec<Branch>,
        default: String,
    },
    /// Repeat `continue_to` while `condition` holds, at most `max_iterations` times
    Looping {
        condition: Predicate,
        continue_to: String,
        exit_to: String,
        max_iterations: u32,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Branch {
    pub when: Predicate,
    pub target: String,
}

impl EdgeSpec {
    pub fn kind(&self) -> &'static str {
        match self {
            EdgeSpec::Direct { .. } => "direct",
            EdgeSpec::Conditional { .. } => "conditional",
            EdgeSpec::Looping { .. } => "looping",
        }
    }

    /// Every target this rule can route to
    pub fn targets(&self) -> Vec<&str> {
        match self {
            EdgeSpec::Direct { target } => vec![target.as_str()],
            EdgeSpec::Conditional { branches, default } => branches
                .iter()
                .map(|branch| branch.target.as_str())
                .chain(std::iter::once(default.as_str()))
                .collect(),
            EdgeSpec::Looping { continue_to, exit_to, .. } => {
                vec![continue_to.as_str(), exit_to.as_str()]
            }
        }
    }
}

fn unique_edges<'de, D>(deserializer: D) -> Result<BTreeMap<String, EdgeSpec>, D::Error>
where
    D: Deserializer<'de>,
{
    struct EdgeMapVisitor;

    impl<'de> Visitor<'de> for EdgeMapVisitor {
        type Value = BTreeMap<String, EdgeSpec>;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a map from source node to edge specification")
        }

        fn visit_map<A>(self, mut access: A) -> Result<Self::Value, A::Error>
        where
            A: MapAccess<'de>,
        {
            let mut edges = BTreeMap::new();
            while let Some((source, edge)) = access.next_entry::<String, EdgeSpec>()? {
                if edges.contains_key(&source) {
                    return Err(de::Error::custom(format!(
                        "duplicate edge specification for node '{}'",
                        source
                    )));
                }
                edges.insert(source, edge);
            }
            Ok(edges)
        }
    }

    deserializer.deserialize_map(EdgeMapVisitor)
}

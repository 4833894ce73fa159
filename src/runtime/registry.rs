/// Node registry: executable name -> implementation
///
/// Same ArcSwap layout as the graph registry. Runs take a [`NodeTable`]
/// snapshot when they start and resolve every node against that snapshot, so
/// registrations made while a run is in flight never change what it executes.

use crate::error::{EngineError, EngineResult};
use crate::runtime::executor::Executable;
use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::{collections::HashMap, sync::Arc};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    /// Registered by the process at startup; cannot be replaced
    Builtin,
    /// Registered through the API; may be replaced
    Dynamic,
}

#[derive(Clone)]
pub struct RegisteredExecutable {
    pub executable: Arc<dyn Executable>,
    pub origin: Origin,
    pub registered_at: DateTime<Utc>,
}

/// Listing entry for a registered executable
#[derive(Debug, Clone, Serialize)]
pub struct ExecutableInfo {
    pub name: String,
    pub kind: &'static str,
    pub origin: Origin,
    pub registered_at: DateTime<Utc>,
}

/// Frozen view of the registry taken at run start
#[derive(Clone)]
pub struct NodeTable {
    entries: Arc<HashMap<String, RegisteredExecutable>>,
}

impl NodeTable {
    /// Resolve an executable for `node`, looked up under `function`
    pub fn resolve(&self, node: &str, function: &str) -> EngineResult<Arc<dyn Executable>> {
        self.entries
            .get(function)
            .map(|entry| Arc::clone(&entry.executable))
            .ok_or_else(|| EngineError::UnknownNode {
                node: node.to_string(),
                function: function.to_string(),
            })
    }
}

pub struct NodeRegistry {
    entries: ArcSwap<HashMap<String, RegisteredExecutable>>,
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self {
            entries: ArcSwap::new(Arc::new(HashMap::new())),
        }
    }

    /// Register a startup executable
    pub fn register_builtin(&self, name: &str, executable: impl Executable) -> EngineResult<()> {
        self.insert(name, Arc::new(executable), Origin::Builtin)
    }

    /// Register or replace a runtime executable
    pub fn register(&self, name: &str, executable: Arc<dyn Executable>) -> EngineResult<()> {
        self.insert(name, executable, Origin::Dynamic)
    }

    fn insert(&self, name: &str, executable: Arc<dyn Executable>, origin: Origin) -> EngineResult<()> {
        if name.trim().is_empty() {
            return Err(EngineError::Registration("executable name must not be empty".to_string()));
        }

        let kind = executable.kind();
        let entry = RegisteredExecutable {
            executable,
            origin,
            registered_at: Utc::now(),
        };

        // The replacement check runs inside rcu so it sees the map it replaces
        let mut rejected = None;
        self.entries.rcu(|current| {
            rejected = current
                .get(name)
                .filter(|existing| existing.origin == Origin::Builtin || origin == Origin::Builtin)
                .map(|existing| existing.origin);
            if rejected.is_some() {
                return Arc::clone(current);
            }
            let mut next = (**current).clone();
            next.insert(name.to_string(), entry.clone());
            Arc::new(next)
        });

        if let Some(existing) = rejected {
            return Err(EngineError::Registration(format!(
                "'{}' is already registered as a {:?} executable",
                name, existing
            )));
        }

        tracing::info!("🧩 Registered {} executable '{}' ({:?})", kind, name, origin);
        Ok(())
    }

    /// Resolve against the live registry
    pub fn resolve(&self, name: &str) -> EngineResult<Arc<dyn Executable>> {
        self.snapshot().resolve(name, name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.load().contains_key(name)
    }

    pub fn snapshot(&self) -> NodeTable {
        NodeTable {
            entries: self.entries.load_full(),
        }
    }

    pub fn list(&self) -> Vec<ExecutableInfo> {
        let mut infos: Vec<ExecutableInfo> = self
            .entries
            .load()
            .iter()
            .map(|(name, entry)| ExecutableInfo {
                name: name.clone(),
                kind: entry.executable.kind(),
                origin: entry.origin,
                registered_at: entry.registered_at,
            })
            .collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    pub fn len(&self) -> usize {
        self.entries.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Run state container
///
/// State is a JSON object of user data plus a separate metadata namespace the
/// engine uses for bookkeeping (current node, step counter, loop counters).
/// Nodes never write metadata; their deltas only touch `data`.
///
/// Merging is shallow: every top-level key of a delta replaces the key of the
/// same name wholesale. Nested objects are not deep-merged.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Partial update returned by a node executable
pub type StateDelta = Map<String, Value>;

/// Reserved metadata keys maintained by the engine
pub const META_CURRENT_NODE: &str = "current_node";
pub const META_STEP: &str = "step";
pub const META_LOOP_ITERATIONS: &str = "loop_iterations";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowState {
    #[serde(default)]
    data: Map<String, Value>,
    #[serde(default)]
    meta: Map<String, Value>,
}

impl WorkflowState {
    pub fn new(data: Map<String, Value>) -> Self {
        Self { data, meta: Map::new() }
    }

    pub fn data(&self) -> &Map<String, Value> {
        &self.data
    }

    pub fn meta(&self) -> &Map<String, Value> {
        &self.meta
    }

    /// Look up a dotted path such as `review.score` or `$meta.step`.
    ///
    /// Returns `None` for absent keys and for malformed paths; lookup never fails.
    pub fn get(&self, path: &str) -> Option<&Value> {
        KeyPath::parse(path).ok().and_then(|path| self.resolve(&path))
    }

    /// Resolve a parsed key path against this state
    pub fn resolve(&self, path: &KeyPath) -> Option<&Value> {
        let root = match path.scope {
            Scope::Data => &self.data,
            Scope::Meta => &self.meta,
        };

        let (first, rest) = path.segments.split_first()?;
        let mut current = root.get(first)?;
        for segment in rest {
            current = match current {
                Value::Object(map) => map.get(segment)?,
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Produce the state that results from applying `delta` on top of this one
    pub fn merge(&self, delta: &StateDelta) -> WorkflowState {
        let mut next = self.clone();
        for (key, value) in delta {
            next.data.insert(key.clone(), value.clone());
        }
        next
    }

    pub(crate) fn set_meta(&mut self, key: &str, value: Value) {
        self.meta.insert(key.to_string(), value);
    }

    pub fn into_data(self) -> Map<String, Value> {
        self.data
    }
}

impl From<Map<String, Value>> for WorkflowState {
    fn from(data: Map<String, Value>) -> Self {
        Self::new(data)
    }
}

/// Namespace a key path is resolved in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Data,
    Meta,
}

/// Parsed dotted key path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPath {
    scope: Scope,
    segments: Vec<String>,
}

const META_PREFIX: &str = "$meta";

impl KeyPath {
    pub fn parse(raw: &str) -> Result<Self, String> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err("empty key path".to_string());
        }

        let mut parts = raw.split('.').peekable();
        let scope = if parts.peek() == Some(&META_PREFIX) {
            parts.next();
            Scope::Meta
        } else {
            Scope::Data
        };

        let mut segments = Vec::new();
        for part in parts {
            if part.is_empty() {
                return Err(format!("empty segment in key path '{}'", raw));
            }
            if !part.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '-') {
                return Err(format!("invalid segment '{}' in key path '{}'", part, raw));
            }
            segments.push(part.to_string());
        }

        if segments.is_empty() {
            return Err(format!("key path '{}' names no key", raw));
        }

        Ok(Self { scope, segments })
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }
}

impl fmt::Display for KeyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.scope == Scope::Meta {
            write!(f, "{}.", META_PREFIX)?;
        }
        write!(f, "{}", self.segments.join("."))
    }
}

/// Configuration management for Graphway
///
/// Handles server binding and engine limits. Everything is read from
/// environment variables with defaults, so containers can configure the
/// process without a config file.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,
    /// Execution engine limits
    pub engine: EngineConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server bind address (e.g., "0.0.0.0")
    pub host: String,
    /// Server port number
    pub port: u16,
}

/// Execution engine limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum node executions per run, across all edges.
    /// Graphs may lower or raise it with `max_steps`.
    pub step_budget: usize,
    /// Capacity of each run's broadcast channel. Slow subscribers past this
    /// lag and catch up from history; the run itself never waits.
    pub event_buffer: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            step_budget: 100,
            event_buffer: 256,
        }
    }
}

impl Default for Config {
    /// Default configuration with ENV_VAR support for k8s/container deployment
    fn default() -> Self {
        let engine = EngineConfig::default();
        Self {
            server: ServerConfig {
                host: std::env::var("GRAPHWAY_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: env_or("GRAPHWAY_PORT", 8000),
            },
            engine: EngineConfig {
                step_budget: env_or("GRAPHWAY_STEP_BUDGET", engine.step_budget).max(1),
                event_buffer: env_or("GRAPHWAY_EVENT_BUFFER", engine.event_buffer).max(1),
            },
        }
    }
}

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_defaults() {
        let engine = EngineConfig::default();
        assert_eq!(engine.step_budget, 100);
        assert_eq!(engine.event_buffer, 256);
    }

    #[test]
    fn test_env_or_falls_back_on_garbage() {
        std::env::set_var("GRAPHWAY_TEST_GARBAGE", "not-a-number");
        assert_eq!(env_or("GRAPHWAY_TEST_GARBAGE", 7usize), 7);
        std::env::set_var("GRAPHWAY_TEST_NUMBER", " 42 ");
        assert_eq!(env_or("GRAPHWAY_TEST_NUMBER", 7usize), 42);
        assert_eq!(env_or("GRAPHWAY_TEST_UNSET_VARIABLE", 3u16), 3);
    }
}

/// Built-in tools
///
/// Executables compiled into the binary and registered at startup, plus the
/// demo graph that uses them.

// Code review analysis tools and the demo review graph
pub mod code_review;

use crate::error::EngineResult;
use crate::runtime::{executor::FnExecutable, registry::NodeRegistry};

/// Register every built-in tool as a non-replaceable executable
pub fn register_builtins(registry: &NodeRegistry) -> EngineResult<()> {
    for (name, tool) in code_review::TOOLS {
        registry.register_builtin(name, FnExecutable::sync(*tool))?;
    }
    tracing::info!("🧰 Registered {} built-in tools", code_review::TOOLS.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_builtins() {
        let registry = NodeRegistry::new();
        register_builtins(&registry).unwrap();
        assert_eq!(registry.len(), code_review::TOOLS.len());
        assert!(registry.contains("calculate_quality_score"));
        // a second registration collides with the first
        assert!(register_builtins(&registry).is_err());
    }
}

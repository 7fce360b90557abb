//! Tool registry — static, non-reflective tool metadata (spec §4.3.1, §9).
//!
//! Adapted from the teacher's `sage_agent::{Tool, ToolRegistry}`: the shape
//! (a trait object registry keyed by name, with a `generate_description`
//! helper for prompt assembly) survives unchanged. What changes is the
//! argument/result type (JSON values instead of `HashMap<String, String>`,
//! to match the spec's `args: JSON-like value` and `{ok: text} | {retry: reason}`
//! result shape) and the addition of `is_read_only`, which the Tool Buffer +
//! Dispatcher (C3) needs to decide batching eligibility.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// Outcome of a tool invocation, matching spec §6's `Result` shape.
#[derive(Debug, Clone)]
pub enum ToolOutcome {
    Ok(String),
    Retry(String),
}

/// A tool the orchestration core can dispatch to.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn args_schema(&self) -> &str;

    /// Declares whether this tool may be batched for parallel execution
    /// (spec §4.3: "a configurable set, e.g., file reads, searches, listings").
    fn is_read_only(&self) -> bool;

    async fn invoke(&self, args: serde_json::Value) -> ToolOutcome;
}

/// Registry of available tools, keyed by name. Static data: no dynamic
/// lookup or reflection (§9 "No dynamic reflection").
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: HashMap::new() }
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name)
    }

    pub fn has(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn is_read_only(&self, name: &str) -> bool {
        self.tools.get(name).map(|t| t.is_read_only()).unwrap_or(false)
    }

    /// Tool descriptions for prompt assembly, in the teacher's format.
    pub fn generate_description(&self) -> String {
        if self.tools.is_empty() {
            return "No tools available.".to_string();
        }

        let mut desc = String::from("Available tools:\n\n");
        let mut names: Vec<&String> = self.tools.keys().collect();
        names.sort();
        for name in names {
            let tool = &self.tools[name];
            desc.push_str(&format!(
                "{}:\n  Description: {}\n  Args: {}\n  Read-only: {}\n\n",
                tool.name(),
                tool.description(),
                tool.args_schema(),
                tool.is_read_only(),
            ));
        }
        desc
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Echoes its input."
        }
        fn args_schema(&self) -> &str {
            r#"{"text": "string"}"#
        }
        fn is_read_only(&self) -> bool {
            true
        }
        async fn invoke(&self, args: serde_json::Value) -> ToolOutcome {
            ToolOutcome::Ok(args.to_string())
        }
    }

    #[test]
    fn registry_reports_read_only_classification() {
        let mut reg = ToolRegistry::new();
        assert!(!reg.has("echo"));
        reg.register(Arc::new(EchoTool));
        assert!(reg.has("echo"));
        assert!(reg.is_read_only("echo"));
        assert!(!reg.is_read_only("missing"));
    }

    #[test]
    fn description_lists_registered_tools() {
        let mut reg = ToolRegistry::new();
        assert_eq!(reg.generate_description(), "No tools available.");
        reg.register(Arc::new(EchoTool));
        assert!(reg.generate_description().contains("echo"));
    }
}

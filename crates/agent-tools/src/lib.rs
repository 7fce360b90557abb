//! Filesystem helpers the orchestration core's built-in tools are built on.
//!
//! Kept deliberately thin and untyped-by-tool-shape: this crate knows how to
//! read, write, list, and search the filesystem; `agent-core`'s
//! `builtin_tools` module is what adapts these into `Tool` implementations
//! the registry can dispatch to.

pub mod filesystem;

/// Result of a filesystem operation, before it is translated into a
/// `ToolOutcome` by the caller.
#[derive(Debug)]
pub struct ToolResult {
    pub success: bool,
    pub output: String,
    pub error: Option<String>,
}

impl ToolResult {
    pub fn success(output: impl Into<String>) -> Self {
        Self { success: true, output: output.into(), error: None }
    }

    pub fn error(error: impl Into<String>) -> Self {
        Self { success: false, output: String::new(), error: Some(error.into()) }
    }
}

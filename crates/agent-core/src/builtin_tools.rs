//! Built-in file tools, adapted onto the registry's `Tool` trait from
//! `agent-tools`'s plain filesystem helpers (spec §4.3.1, §9.1).
//!
//! Grounded in the teacher's `tools.rs` shape (`DoneTool`, `WebSearchTool`):
//! a zero-field unit struct per tool, trait methods returning static
//! metadata, `invoke` doing the actual work. What changes here is the
//! argument/result type — JSON in, `ToolOutcome` out — to match this
//! crate's dispatcher contract instead of the teacher's
//! `HashMap<String, String>` one.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::tools::{Tool, ToolOutcome, ToolRegistry};

fn arg_str(args: &Value, key: &str) -> Result<String, String> {
    args.get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| format!("missing or non-string argument `{}`", key))
}

fn from_result(result: agent_tools::ToolResult, failure_reason: &str) -> ToolOutcome {
    if result.success {
        ToolOutcome::Ok(result.output)
    } else {
        ToolOutcome::Retry(result.error.unwrap_or_else(|| failure_reason.to_string()))
    }
}

pub struct ReadFileTool;

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }
    fn description(&self) -> &str {
        "Read the full contents of a file at the given path."
    }
    fn args_schema(&self) -> &str {
        r#"{"path": "string"}"#
    }
    fn is_read_only(&self) -> bool {
        true
    }
    async fn invoke(&self, args: Value) -> ToolOutcome {
        let path = match arg_str(&args, "path") {
            Ok(p) => p,
            Err(e) => return ToolOutcome::Retry(e),
        };
        let result = agent_tools::filesystem::read_file(&PathBuf::from(path)).await;
        from_result(result, "read failed")
    }
}

pub struct WriteFileTool;

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }
    fn description(&self) -> &str {
        "Write contents to a file at the given path, overwriting it."
    }
    fn args_schema(&self) -> &str {
        r#"{"path": "string", "contents": "string"}"#
    }
    fn is_read_only(&self) -> bool {
        false
    }
    async fn invoke(&self, args: Value) -> ToolOutcome {
        let path = match arg_str(&args, "path") {
            Ok(p) => p,
            Err(e) => return ToolOutcome::Retry(e),
        };
        let contents = match arg_str(&args, "contents") {
            Ok(c) => c,
            Err(e) => return ToolOutcome::Retry(e),
        };
        let result = agent_tools::filesystem::write_file(&PathBuf::from(path), &contents).await;
        from_result(result, "write failed")
    }
}

pub struct ListDirectoryTool;

#[async_trait]
impl Tool for ListDirectoryTool {
    fn name(&self) -> &str {
        "list_directory"
    }
    fn description(&self) -> &str {
        "List the entries of a directory, one per line, tagged dir/file/link."
    }
    fn args_schema(&self) -> &str {
        r#"{"path": "string"}"#
    }
    fn is_read_only(&self) -> bool {
        true
    }
    async fn invoke(&self, args: Value) -> ToolOutcome {
        let path = match arg_str(&args, "path") {
            Ok(p) => p,
            Err(e) => return ToolOutcome::Retry(e),
        };
        let result = agent_tools::filesystem::list_directory(&PathBuf::from(path)).await;
        from_result(result, "list failed")
    }
}

pub struct GrepTool;

#[async_trait]
impl Tool for GrepTool {
    fn name(&self) -> &str {
        "grep"
    }
    fn description(&self) -> &str {
        "Search files under a directory, recursively, for lines matching a regular expression."
    }
    fn args_schema(&self) -> &str {
        r#"{"path": "string", "pattern": "string"}"#
    }
    fn is_read_only(&self) -> bool {
        true
    }
    async fn invoke(&self, args: Value) -> ToolOutcome {
        let path = match arg_str(&args, "path") {
            Ok(p) => p,
            Err(e) => return ToolOutcome::Retry(e),
        };
        let pattern = match arg_str(&args, "pattern") {
            Ok(p) => p,
            Err(e) => return ToolOutcome::Retry(e),
        };
        let result =
            agent_tools::filesystem::grep_directory(&PathBuf::from(path), &pattern, 200).await;
        from_result(result, "grep failed")
    }
}

/// Register every built-in file tool. Split out from `main.rs` so a
/// library consumer embedding the orchestration core gets the same
/// baseline tools without duplicating registration code.
pub fn register_all(registry: &mut ToolRegistry) {
    registry.register(Arc::new(ReadFileTool));
    registry.register(Arc::new(WriteFileTool));
    registry.register(Arc::new(ListDirectoryTool));
    registry.register(Arc::new(GrepTool));
}

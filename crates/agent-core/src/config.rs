//! Process-level defaults for the Orchestration Loop (spec §6's
//! "Configuration" table). Grounded in the teacher's `Config::from_env()`:
//! read each option from the environment with a sensible default, `.ok()`
//! for genuinely optional values, `.context(...)` for anything that must
//! parse. Per-request overrides (the caller's own `allowed_tools`, `yolo`,
//! etc. for a single `process_request` call) still take precedence over
//! whatever this struct holds.

use std::collections::HashSet;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::dispatcher::DispatchConfig;

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub max_iterations: usize,
    pub max_iterations_extension: usize,
    pub unproductive_limit: usize,
    pub max_parallel_tools: usize,
    pub tool_timeout: Duration,
    pub read_only_tools: HashSet<String>,
    pub fallback_enabled: bool,
    pub allowed_tools: HashSet<String>,
    pub yolo_mode: bool,
    pub show_thoughts: bool,
}

impl OrchestratorConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            max_iterations: std::env::var("TUNACODE_MAX_ITERATIONS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(15),
            max_iterations_extension: std::env::var("TUNACODE_MAX_ITERATIONS_EXTENSION")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5),
            unproductive_limit: std::env::var("TUNACODE_UNPRODUCTIVE_LIMIT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3),
            max_parallel_tools: std::env::var("TUNACODE_MAX_PARALLEL_TOOLS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(DispatchConfig::default_parallelism),
            tool_timeout: Duration::from_secs(
                std::env::var("TUNACODE_TOOL_TIMEOUT_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(30),
            ),
            read_only_tools: parse_set(std::env::var("TUNACODE_READ_ONLY_TOOLS").ok()),
            fallback_enabled: std::env::var("TUNACODE_FALLBACK_ENABLED")
                .ok()
                .map(|v| v != "false" && v != "0")
                .unwrap_or(true),
            allowed_tools: parse_set(std::env::var("TUNACODE_ALLOWED_TOOLS").ok()),
            yolo_mode: std::env::var("TUNACODE_YOLO")
                .ok()
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
            show_thoughts: std::env::var("TUNACODE_SHOW_THOUGHTS")
                .ok()
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
        })
    }

    pub fn dispatch_config(&self) -> DispatchConfig {
        DispatchConfig {
            max_parallel_tools: self.max_parallel_tools,
            per_call_timeout: self.tool_timeout,
        }
    }
}

fn parse_set(raw: Option<String>) -> HashSet<String> {
    raw.map(|s| s.split(',').map(|t| t.trim().to_string()).filter(|t| !t.is_empty()).collect())
        .unwrap_or_default()
}

/// Load `.env` once (teacher's `dotenvy::dotenv().ok()` at binary startup)
/// and build the config. Kept separate from `from_env` so library callers
/// that already manage their own dotenv loading can call `from_env` alone.
pub fn load() -> Result<OrchestratorConfig> {
    dotenvy::dotenv().ok();
    OrchestratorConfig::from_env().context("failed to load orchestrator configuration")
}

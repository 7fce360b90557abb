//! External model-client interface (spec §6) and the sink callbacks the
//! Orchestration Loop drives during a request.
//!
//! The core never implements inference itself; it consumes whatever
//! implements `ModelClient`, the same "external collaborator" boundary the
//! teacher draws around `sage_agent`'s DSPy-backed LM configuration — only
//! here the boundary is a trait instead of a process-global static, since
//! the spec requires per-request cancellation and a swappable client.

use async_trait::async_trait;

use crate::streaming::StreamEvent;

/// One event emitted while streaming a single model iteration ("node").
/// `ToolCallPart` is a concrete tool invocation the model decided to emit;
/// everything else is forwarded through the Streaming Adapter (C4).
#[derive(Debug, Clone)]
pub enum NodeEvent {
    Stream(StreamEvent),
    ToolCallPart {
        tool_call_id: String,
        tool_name: String,
        args: serde_json::Value,
    },
    Usage(Usage),
}

/// A model client drives one streamed iteration at a time. Implementors
/// must observe `cancel` at their own suspension points (spec §5).
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Stream exactly one node's worth of events for the given history and
    /// model id, invoking `on_event` for each as it arrives. Returns once
    /// the node is complete (or cancelled).
    async fn stream_node(
        &self,
        messages: &[crate::message::Message],
        model_id: &str,
        cancel: &tokio::sync::watch::Receiver<bool>,
        on_event: &mut (dyn FnMut(NodeEvent) + Send),
    ) -> anyhow::Result<()>;
}

/// Diagnostic/telemetry events the loop reports as it dispatches tools
/// (spec §6, `tool_sink`).
#[derive(Debug, Clone)]
pub enum ToolSinkEvent {
    CallStarted { name: String, args: serde_json::Value, id: String },
    CallCompleted { id: String, result_summary: String },
    BatchStarted { n: usize, names: Vec<String> },
    BatchCompleted { duration_ms: u128 },
}

/// Provider-specific usage counters, forwarded unchanged (spec §6).
#[derive(Debug, Clone, Default)]
pub struct Usage {
    pub prompt_tokens: Option<u64>,
    pub completion_tokens: Option<u64>,
    pub total_tokens: Option<u64>,
}

//! Tool Buffer + Dispatcher (C3) — batches read-only tool calls for
//! parallel execution while keeping write/execute calls sequential
//! (spec §4.3).
//!
//! The concurrent-dispatch-with-cancellation shape is grounded on codex's
//! `ToolCallRuntime::handle_tool_call`: race the tool invocation against a
//! cancellation signal with `tokio::select!`, and always produce a result
//! for the call's id so pairing holds even on abort. This module swaps
//! codex's `CancellationToken` for a `tokio::sync::watch::Receiver<bool>`
//! (already in the workspace's `tokio` dependency, avoiding a new one) and
//! swaps the per-call `tokio::spawn` for `futures::stream::buffer_unordered`,
//! since concurrency here only needs cooperative polling, not a spawned task.

use std::collections::HashSet;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use tokio::sync::watch;

use crate::message::RequestPart;
use crate::tools::{ToolOutcome, ToolRegistry};

/// A tool call extracted from a model Response, awaiting dispatch.
#[derive(Debug, Clone)]
pub struct PendingCall {
    pub tool_call_id: String,
    pub tool_name: String,
    pub args: serde_json::Value,
}

/// Fan-out and per-call timeout knobs (spec §6).
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    pub max_parallel_tools: usize,
    pub per_call_timeout: Duration,
}

impl DispatchConfig {
    /// Default fan-out: one concurrent tool per CPU (spec §6,
    /// `max_parallel_tools` default). No `num_cpus` dependency needed;
    /// the standard library answers this directly.
    pub fn default_parallelism() -> usize {
        std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
    }
}

/// Per-request authorization: a call is allowed if `yolo` is set, or its
/// tool name is in `allowed_tools`.
pub struct AuthContext<'a> {
    pub allowed_tools: &'a HashSet<String>,
    pub yolo: bool,
}

impl AuthContext<'_> {
    fn is_authorized(&self, tool_name: &str) -> bool {
        self.yolo || self.allowed_tools.contains(tool_name)
    }
}

/// FIFO of deferred read-only calls, flushed as a batch on the triggers
/// spec §4.3 names: a non-read-only call is seen, the iteration ends, or
/// the loop is about to yield its final answer.
#[derive(Default)]
pub struct ToolBuffer {
    pending: Vec<PendingCall>,
}

impl ToolBuffer {
    pub fn new() -> Self {
        Self { pending: Vec::new() }
    }

    pub fn push(&mut self, call: PendingCall) {
        self.pending.push(call);
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Dispatch every buffered call concurrently, bounded by
    /// `config.max_parallel_tools`, and return their results in dispatch
    /// order (the ordering guarantee from §4.3 and §5).
    pub async fn flush(
        &mut self,
        registry: &ToolRegistry,
        config: &DispatchConfig,
        auth: &AuthContext<'_>,
        cancel: &watch::Receiver<bool>,
    ) -> Vec<RequestPart> {
        if self.pending.is_empty() {
            return Vec::new();
        }
        let calls: Vec<PendingCall> = self.pending.drain(..).collect();
        let parallelism = config.max_parallel_tools.max(1);

        let mut results: Vec<(usize, RequestPart)> = stream::iter(calls.into_iter().enumerate())
            .map(|(i, call)| {
                let cancel = cancel.clone();
                async move {
                    let part = run_call(&call, registry, config, auth, &cancel).await;
                    (i, part)
                }
            })
            .buffer_unordered(parallelism)
            .collect()
            .await;

        results.sort_by_key(|(i, _)| *i);
        results.into_iter().map(|(_, part)| part).collect()
    }
}

/// Dispatch a single write/execute call immediately, preserving source
/// order relative to whatever else the caller is sequencing (spec §4.3:
/// "executed one at a time, immediately, preserving source order").
pub async fn dispatch_immediate(
    call: &PendingCall,
    registry: &ToolRegistry,
    config: &DispatchConfig,
    auth: &AuthContext<'_>,
    cancel: &watch::Receiver<bool>,
) -> RequestPart {
    run_call(call, registry, config, auth, cancel).await
}

/// Process one iteration's worth of tool calls end to end: buffer
/// read-only calls, flush on sight of a non-read-only (or unknown) call,
/// dispatch that call immediately, and flush whatever remains once the
/// calls are exhausted. Returns parts in emission order.
pub async fn dispatch_iteration(
    calls: Vec<PendingCall>,
    registry: &ToolRegistry,
    config: &DispatchConfig,
    auth: &AuthContext<'_>,
    cancel: &watch::Receiver<bool>,
) -> Vec<RequestPart> {
    let mut buffer = ToolBuffer::new();
    let mut out = Vec::with_capacity(calls.len());

    for call in calls {
        if registry.is_read_only(&call.tool_name) {
            buffer.push(call);
        } else {
            out.extend(buffer.flush(registry, config, auth, cancel).await);
            out.push(dispatch_immediate(&call, registry, config, auth, cancel).await);
        }
    }
    out.extend(buffer.flush(registry, config, auth, cancel).await);
    out
}

async fn run_call(
    call: &PendingCall,
    registry: &ToolRegistry,
    config: &DispatchConfig,
    auth: &AuthContext<'_>,
    cancel: &watch::Receiver<bool>,
) -> RequestPart {
    if *cancel.borrow() {
        return cancelled_part(call);
    }

    let Some(tool) = registry.get(&call.tool_name) else {
        return unknown_tool_part(call);
    };

    if !auth.is_authorized(&call.tool_name) {
        return unauthorized_part(call);
    }

    tokio::select! {
        _ = wait_for_cancel(cancel.clone()) => cancelled_part(call),
        outcome = tokio::time::timeout(config.per_call_timeout, tool.invoke(call.args.clone())) => {
            match outcome {
                Ok(ToolOutcome::Ok(text)) => RequestPart::ToolReturn {
                    tool_call_id: call.tool_call_id.clone(),
                    content: text,
                },
                Ok(ToolOutcome::Retry(reason)) => RequestPart::RetryPrompt {
                    tool_call_id: call.tool_call_id.clone(),
                    reason,
                },
                Err(_elapsed) => RequestPart::RetryPrompt {
                    tool_call_id: call.tool_call_id.clone(),
                    reason: format!("timeout after {}s", config.per_call_timeout.as_secs()),
                },
            }
        }
    }
}

async fn wait_for_cancel(mut cancel: watch::Receiver<bool>) {
    if *cancel.borrow() {
        return;
    }
    while cancel.changed().await.is_ok() {
        if *cancel.borrow() {
            return;
        }
    }
}

fn cancelled_part(call: &PendingCall) -> RequestPart {
    RequestPart::RetryPrompt {
        tool_call_id: call.tool_call_id.clone(),
        reason: "cancelled".to_string(),
    }
}

fn unknown_tool_part(call: &PendingCall) -> RequestPart {
    RequestPart::RetryPrompt {
        tool_call_id: call.tool_call_id.clone(),
        reason: "unknown tool".to_string(),
    }
}

fn unauthorized_part(call: &PendingCall) -> RequestPart {
    RequestPart::RetryPrompt {
        tool_call_id: call.tool_call_id.clone(),
        reason: "tool not authorized".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::Tool;
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct SlowTool {
        delay: Duration,
        read_only: bool,
    }

    #[async_trait]
    impl Tool for SlowTool {
        fn name(&self) -> &str {
            "slow"
        }
        fn description(&self) -> &str {
            "sleeps then echoes"
        }
        fn args_schema(&self) -> &str {
            "{}"
        }
        fn is_read_only(&self) -> bool {
            self.read_only
        }
        async fn invoke(&self, args: serde_json::Value) -> ToolOutcome {
            tokio::time::sleep(self.delay).await;
            ToolOutcome::Ok(args.to_string())
        }
    }

    struct CountingTool {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Tool for CountingTool {
        fn name(&self) -> &str {
            "count"
        }
        fn description(&self) -> &str {
            "counts invocations"
        }
        fn args_schema(&self) -> &str {
            "{}"
        }
        fn is_read_only(&self) -> bool {
            true
        }
        async fn invoke(&self, _args: serde_json::Value) -> ToolOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            ToolOutcome::Ok("done".into())
        }
    }

    fn call(id: &str, name: &str) -> PendingCall {
        PendingCall {
            tool_call_id: id.into(),
            tool_name: name.into(),
            args: serde_json::json!({}),
        }
    }

    fn no_cancel() -> watch::Receiver<bool> {
        watch::channel(false).1
    }

    fn config() -> DispatchConfig {
        DispatchConfig { max_parallel_tools: 4, per_call_timeout: Duration::from_secs(5) }
    }

    #[tokio::test]
    async fn unknown_tool_yields_retry_without_dispatch() {
        let registry = ToolRegistry::new();
        let allowed = HashSet::new();
        let auth = AuthContext { allowed_tools: &allowed, yolo: true };
        let part = dispatch_immediate(&call("t1", "mystery"), &registry, &config(), &auth, &no_cancel()).await;
        assert_eq!(
            part,
            RequestPart::RetryPrompt { tool_call_id: "t1".into(), reason: "unknown tool".into() }
        );
    }

    #[tokio::test]
    async fn unauthorized_tool_yields_retry_without_dispatch() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(CountingTool { calls: Arc::new(AtomicUsize::new(0)) }));
        let allowed = HashSet::new();
        let auth = AuthContext { allowed_tools: &allowed, yolo: false };
        let part = dispatch_immediate(&call("t1", "count"), &registry, &config(), &auth, &no_cancel()).await;
        assert_eq!(
            part,
            RequestPart::RetryPrompt { tool_call_id: "t1".into(), reason: "tool not authorized".into() }
        );
    }

    #[tokio::test]
    async fn already_cancelled_call_never_dispatches() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(CountingTool { calls: calls.clone() }));
        let mut allowed = HashSet::new();
        allowed.insert("count".to_string());
        let auth = AuthContext { allowed_tools: &allowed, yolo: false };
        let (_tx, rx) = watch::channel(true);
        let part = dispatch_immediate(&call("t1", "count"), &registry, &config(), &auth, &rx).await;
        assert_eq!(
            part,
            RequestPart::RetryPrompt { tool_call_id: "t1".into(), reason: "cancelled".into() }
        );
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn read_only_batch_dispatches_concurrently_and_preserves_order() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(SlowTool { delay: Duration::from_millis(30), read_only: true }));
        let mut allowed = HashSet::new();
        allowed.insert("slow".to_string());
        let auth = AuthContext { allowed_tools: &allowed, yolo: false };

        let calls = vec![call("t1", "slow"), call("t2", "slow"), call("t3", "slow")];
        let started = std::time::Instant::now();
        let parts = dispatch_iteration(calls, &registry, &config(), &auth, &no_cancel()).await;
        let elapsed = started.elapsed();

        assert_eq!(parts.len(), 3);
        assert!(elapsed < Duration::from_millis(80), "batch should run concurrently, took {elapsed:?}");
        let ids: Vec<&str> = parts
            .iter()
            .map(|p| match p {
                RequestPart::ToolReturn { tool_call_id, .. } => tool_call_id.as_str(),
                _ => panic!("expected tool-return"),
            })
            .collect();
        assert_eq!(ids, vec!["t1", "t2", "t3"]);
    }

    struct WriteTool;
    #[async_trait]
    impl Tool for WriteTool {
        fn name(&self) -> &str {
            "write"
        }
        fn description(&self) -> &str {
            "writes"
        }
        fn args_schema(&self) -> &str {
            "{}"
        }
        fn is_read_only(&self) -> bool {
            false
        }
        async fn invoke(&self, _args: serde_json::Value) -> ToolOutcome {
            ToolOutcome::Ok("written".into())
        }
    }

    #[tokio::test]
    async fn non_read_only_call_flushes_pending_read_only_batch_first() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(SlowTool { delay: Duration::from_millis(1), read_only: true }));
        registry.register(Arc::new(WriteTool));
        let mut allowed = HashSet::new();
        allowed.insert("slow".to_string());
        allowed.insert("write".to_string());
        let auth = AuthContext { allowed_tools: &allowed, yolo: false };

        let calls = vec![call("t1", "slow"), call("t2", "write"), call("t3", "slow")];
        let parts = dispatch_iteration(calls, &registry, &config(), &auth, &no_cancel()).await;
        let ids: Vec<&str> = parts
            .iter()
            .map(|p| match p {
                RequestPart::ToolReturn { tool_call_id, .. } => tool_call_id.as_str(),
                _ => panic!("expected tool-return"),
            })
            .collect();
        // t1 (read-only) flushed before t2 (write) is dispatched; t3
        // (read-only, appears after) flushed afterward.
        assert_eq!(ids, vec!["t1", "t2", "t3"]);
    }

    #[tokio::test]
    async fn per_call_timeout_yields_retry_not_failure() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(SlowTool { delay: Duration::from_millis(200), read_only: true }));
        let mut allowed = HashSet::new();
        allowed.insert("slow".to_string());
        let auth = AuthContext { allowed_tools: &allowed, yolo: false };
        let short = DispatchConfig { max_parallel_tools: 2, per_call_timeout: Duration::from_millis(10) };

        let part = dispatch_immediate(&call("t1", "slow"), &registry, &short, &auth, &no_cancel()).await;
        assert_eq!(
            part,
            RequestPart::RetryPrompt { tool_call_id: "t1".into(), reason: "timeout after 0s".into() }
        );
    }
}

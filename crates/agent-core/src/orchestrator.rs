//! Orchestration Loop (C6) — the driver. Bounds iterations, tracks
//! productivity, injects corrective prompts, handles cancel/errors, and
//! generates a fallback when the model never produces user-visible output
//! (spec §4.6).

use tracing::{debug, error, warn};

use crate::config::OrchestratorConfig;
use crate::dispatcher::{dispatch_iteration, AuthContext};
use crate::error::OrchestratorError;
use crate::message::{Message, RequestPart, ResponsePart};
use crate::model_client::{ModelClient, NodeEvent, ToolSinkEvent, Usage};
use crate::node::{self, NodeResult};
use crate::sanitizer;
use crate::session::SessionState;
use crate::store::{MessageStore, SanitizerToken};
use crate::streaming::{StreamEvent, StreamSink, StreamingAdapter};
use crate::tools::ToolRegistry;

/// Result of one `process_request` call (spec §4.6: "a `Run` handle").
#[derive(Debug, Clone)]
pub struct Run {
    pub request_id: String,
    pub final_text: String,
    pub iterations: usize,
    pub usage: Option<Usage>,
    pub fallback: bool,
    pub cancelled: bool,
}

/// Drive one user request to completion, cancellation, or a synthesized
/// fallback. Mutates `store` and `state` in place; returns the outcome.
pub async fn process_request(
    user_message: &str,
    model_id: &str,
    model_client: &dyn ModelClient,
    registry: &ToolRegistry,
    config: &OrchestratorConfig,
    store: &mut MessageStore,
    state: &mut SessionState,
    stream_sink: &mut dyn StreamSink,
    tool_sink: &mut (dyn FnMut(ToolSinkEvent) + Send),
    usage_sink: &mut (dyn FnMut(Usage) + Send),
) -> Result<Run, OrchestratorError> {
    state.reset_for_new_request(user_message);
    let request_id = state.request_id.clone();

    store_append(store, Message::user_prompt(user_message), &request_id)?;

    let mut max_iterations = config.max_iterations;
    let max_iterations_initial = max_iterations;
    let mut extended_once = false;
    let mut last_text = String::new();
    let cancel = state.cancel_receiver();
    let auth = AuthContext { allowed_tools: &state.allowed_tools, yolo: state.yolo };
    let dispatch_config = config.dispatch_config();
    let mut latest_usage: Option<Usage> = None;

    let mut i = 0usize;
    while i < max_iterations {
        if state.is_cancelled() {
            break;
        }
        i += 1;
        state.start_iteration();

        let node = match stream_one_node(
            model_client,
            store,
            model_id,
            &cancel,
            stream_sink,
            usage_sink,
            &mut latest_usage,
            &request_id,
            i,
        )
        .await
        {
            Ok(node) => node,
            Err(err) => {
                error!(request_id = %request_id, iteration = i, error = %err, "node stream failed, patching orphans");
                patch_orphans_best_effort(store, &request_id);
                let _ = sanitizer::sanitize(store);
                return Err(err);
            }
        };

        if let Some(text) = node_text(&node) {
            last_text = text;
        }

        if node.has_user_response {
            state.response_state.has_user_response = true;
        }

        let mut next_request_parts: Vec<RequestPart> = Vec::new();

        if node.empty {
            state.consecutive_empty_responses += 1;
            debug!(
                request_id = %request_id,
                iteration = i,
                reason = node.empty_reason.as_deref().unwrap_or("empty"),
                "empty node, injecting corrective prompt"
            );
            next_request_parts.push(RequestPart::UserPrompt {
                text: empty_response_prompt(state, node.empty_reason.as_deref().unwrap_or("empty"), i),
            });
        } else {
            state.consecutive_empty_responses = 0;
            store_append(store, Message::response(node.response_parts.clone()), &request_id)?;

            if !node.tool_calls.is_empty() {
                for call in &node.tool_calls {
                    tool_sink(ToolSinkEvent::CallStarted {
                        name: call.tool_name.clone(),
                        args: call.args.clone(),
                        id: call.tool_call_id.clone(),
                    });
                    state.record_tool_call(call.tool_name.clone(), call.args.clone());
                }
                let started = std::time::Instant::now();
                tool_sink(ToolSinkEvent::BatchStarted {
                    n: node.tool_calls.len(),
                    names: node.tool_calls.iter().map(|c| c.tool_name.clone()).collect(),
                });
                let results =
                    dispatch_iteration(node.tool_calls.clone(), registry, &dispatch_config, &auth, &cancel)
                        .await;
                tool_sink(ToolSinkEvent::BatchCompleted { duration_ms: started.elapsed().as_millis() });
                for (call, part) in node.tool_calls.iter().zip(results.iter()) {
                    let summary = match part {
                        RequestPart::ToolReturn { content, .. } => content.clone(),
                        RequestPart::RetryPrompt { reason, .. } => format!("retry: {reason}"),
                        _ => String::new(),
                    };
                    state.record_tool_result(&call.tool_name, summary.clone());
                    tool_sink(ToolSinkEvent::CallCompleted { id: call.tool_call_id.clone(), result_summary: summary });
                }
                next_request_parts.extend(results);
            }
        }

        if !node.tool_calls.is_empty() {
            state.unproductive_iterations = 0;
            state.last_productive_iteration = i;
        } else {
            state.unproductive_iterations += 1;
        }

        if state.unproductive_iterations >= config.unproductive_limit && !state.response_state.task_completed {
            warn!(
                request_id = %request_id,
                iteration = i,
                unproductive = state.unproductive_iterations,
                "forcing action after an unproductive run of iterations"
            );
            next_request_parts.push(RequestPart::UserPrompt { text: forced_action_prompt(state, i) });
        }

        if state.response_state.awaiting_user_guidance {
            next_request_parts.push(RequestPart::UserPrompt { text: guidance_prompt(state, i) });
            state.response_state.awaiting_user_guidance = false;
        }

        if node.completion_detected {
            state.response_state.task_completed = true;
        }

        append_or_merge_request(store, next_request_parts, &request_id)?;

        if state.response_state.task_completed {
            break;
        }

        if i == max_iterations && !state.response_state.task_completed {
            if !extended_once {
                append_or_merge_request(
                    store,
                    vec![RequestPart::UserPrompt { text: limit_reached_prompt(state, max_iterations) }],
                    &request_id,
                )?;
                max_iterations += config.max_iterations_extension;
                state.response_state.awaiting_user_guidance = true;
                extended_once = true;
            } else {
                break;
            }
        }
    }

    let cancelled = state.is_cancelled();
    if cancelled {
        warn!(request_id = %request_id, iteration = i, "request cancelled");
    }

    let wants_fallback = !cancelled
        && !state.response_state.task_completed
        && config.fallback_enabled
        && !state.response_state.has_user_response
        && i >= max_iterations_initial;

    // Patch any outstanding tool-calls with a generic resolution *before*
    // the sanitizer runs, so its dangling-call repair (which deletes
    // rather than patches) has nothing left to act on.
    if wants_fallback {
        let dangling = store.dangling_tool_call_ids();
        if !dangling.is_empty() {
            let parts = dangling
                .into_iter()
                .map(|id| RequestPart::ToolReturn { tool_call_id: id, content: "Request completed".to_string() })
                .collect();
            append_or_merge_request(store, parts, &request_id)?;
        }
    }

    match sanitizer::sanitize(store) {
        Ok(_report) => {}
        Err(source) => {
            error!(request_id = %request_id, "sanitizer gave up on the history");
            return Err(OrchestratorError::PathologicalHistory { request_id, source });
        }
    }

    if cancelled {
        return Ok(Run {
            request_id,
            final_text: last_text,
            iterations: i,
            usage: latest_usage,
            fallback: false,
            cancelled: true,
        });
    }

    if !wants_fallback {
        return Ok(Run {
            request_id,
            final_text: last_text,
            iterations: i,
            usage: latest_usage,
            fallback: false,
            cancelled: false,
        });
    }

    let summary = state.tool_usage_summary();
    let text = fallback_text(state, &summary, i);
    stream_sink.emit(&text);
    Ok(Run { request_id, final_text: text, iterations: i, usage: latest_usage, fallback: true, cancelled: false })
}

fn node_text(node: &NodeResult) -> Option<String> {
    node.response_parts
        .iter()
        .filter_map(ResponsePart::as_text)
        .find(|t| !t.trim().is_empty())
        .map(|t| t.to_string())
}

/// Stream one node, feeding text through the Streaming Adapter (C4) and
/// collecting tool-call parts and their emission order for the Node
/// Processor (C5). Text arrives before trailing tool calls in the
/// assembled Response, matching how these providers typically narrate a
/// step before acting on it.
#[allow(clippy::too_many_arguments)]
async fn stream_one_node(
    model_client: &dyn ModelClient,
    store: &MessageStore,
    model_id: &str,
    cancel: &tokio::sync::watch::Receiver<bool>,
    stream_sink: &mut dyn StreamSink,
    usage_sink: &mut (dyn FnMut(Usage) + Send),
    latest_usage: &mut Option<Usage>,
    request_id: &str,
    iteration: usize,
) -> Result<NodeResult, OrchestratorError> {
    let mut adapter = StreamingAdapter::new();
    let mut tool_call_parts: Vec<ResponsePart> = Vec::new();

    let history = store.view().to_vec();
    let mut on_event = |event: NodeEvent| match event {
        NodeEvent::Stream(stream_event) => adapter.handle_event(stream_event, stream_sink),
        NodeEvent::ToolCallPart { tool_call_id, tool_name, args } => {
            tool_call_parts.push(ResponsePart::ToolCall { tool_call_id, tool_name, args });
        }
        NodeEvent::Usage(usage) => {
            usage_sink(usage.clone());
            *latest_usage = Some(usage);
        }
    };

    model_client.stream_node(&history, model_id, cancel, &mut on_event).await.map_err(|source| {
        OrchestratorError::ModelStreamError {
            request_id: request_id.to_string(),
            iteration,
            source,
        }
    })?;

    // Args arrive as an opaque `serde_json::Value`; a tool call whose args
    // aren't even a JSON object can't be dispatched (C3 invokes tools with
    // an object-shaped argument map) and is treated as malformed batching.
    for part in &tool_call_parts {
        if let ResponsePart::ToolCall { args, tool_name, .. } = part {
            if !matches!(args, serde_json::Value::Object(_)) {
                return Err(OrchestratorError::ToolBatchingSchemaError {
                    request_id: request_id.to_string(),
                    iteration,
                    reason: format!("tool '{tool_name}' call args were not a JSON object"),
                });
            }
        }
    }

    let mut response_parts = Vec::new();
    if !adapter.assembled().is_empty() {
        response_parts.push(ResponsePart::Text { text: adapter.assembled().to_string() });
    }
    response_parts.extend(tool_call_parts);

    Ok(node::process_node(&response_parts))
}

fn store_append(store: &mut MessageStore, msg: Message, request_id: &str) -> Result<(), OrchestratorError> {
    store.append(msg).map_err(|source| OrchestratorError::Store { request_id: request_id.to_string(), source })
}

/// Append `parts` as the history's next Request, merging into the tail
/// message instead if it is already a Request — two iteration-boundary
/// conditions (an empty response and a follow-on corrective prompt, say)
/// must never become two consecutive Requests (I3).
fn append_or_merge_request(
    store: &mut MessageStore,
    parts: Vec<RequestPart>,
    request_id: &str,
) -> Result<(), OrchestratorError> {
    if parts.is_empty() {
        return Ok(());
    }
    if matches!(store.view().last(), Some(Message::Request { .. })) {
        let token = SanitizerToken::new();
        let idx = store.len() - 1;
        let mut merged = store.view()[idx].clone();
        if let Message::Request { parts: existing, .. } = &mut merged {
            existing.extend(parts);
        }
        store.replace(&token, idx, merged);
        Ok(())
    } else {
        store_append(store, Message::request(parts), request_id)
    }
}

fn patch_orphans_best_effort(store: &mut MessageStore, request_id: &str) {
    let dangling = store.dangling_tool_call_ids();
    if dangling.is_empty() {
        return;
    }
    let parts = dangling
        .into_iter()
        .map(|id| RequestPart::ToolReturn { tool_call_id: id, content: "error: request aborted".to_string() })
        .collect();
    let _ = append_or_merge_request(store, parts, request_id);
}

fn tool_summary_text(summary: &[(String, usize)]) -> String {
    if summary.is_empty() {
        return "none".to_string();
    }
    summary.iter().map(|(name, count)| format!("{name}\u{d7}{count}")).collect::<Vec<_>>().join(", ")
}

fn empty_response_prompt(state: &SessionState, reason: &str, iteration: usize) -> String {
    let query = state.original_query.as_deref().unwrap_or("");
    let tools = tool_summary_text(&state.tool_usage_summary());
    format!(
        "Your previous response was empty ({reason}). Original task: \"{query}\". Tools used so far: {tools}. \
         Current iteration: {iteration}. Please continue working toward completing the task."
    )
}

fn forced_action_prompt(state: &SessionState, iteration: usize) -> String {
    let query = state.original_query.as_deref().unwrap_or("");
    format!(
        "You have gone {} iterations without invoking a tool or completing the task. Original task: \"{query}\". \
         Iteration {iteration}. Either invoke a tool to make progress, or respond with \"TUNACODE DONE: <summary>\" \
         if the task is already complete.",
        state.unproductive_iterations
    )
}

fn guidance_prompt(state: &SessionState, iteration: usize) -> String {
    let query = state.original_query.as_deref().unwrap_or("");
    let tools = tool_summary_text(&state.tool_usage_summary());
    format!(
        "Original task: \"{query}\". We reached iteration {iteration} after tool calls ({tools}) without a \
         resolution. Please clarify how you would like to proceed, or continue the task."
    )
}

fn limit_reached_prompt(state: &SessionState, max_iterations: usize) -> String {
    let tools = tool_summary_text(&state.tool_usage_summary());
    format!(
        "Reached iteration limit ({max_iterations}). Tools used so far: {tools}. You may continue for a few more \
         iterations; if the task is complete, respond with \"TUNACODE DONE: <summary>\"."
    )
}

fn fallback_text(state: &SessionState, summary: &[(String, usize)], iteration: usize) -> String {
    let query = state.original_query.as_deref().unwrap_or("");
    let tools = tool_summary_text(summary);
    format!(
        "Reached iteration limit ({iteration}). Tools used: {tools}. The task \"{query}\" is incomplete. \
         Suggested next steps: rephrase the request with more specific detail, or ask for a partial summary of \
         what was attempted, or increase the iteration budget and retry."
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::Mutex;
    use crate::tools::{Tool, ToolOutcome};
    use std::sync::Arc;

    /// A scripted model client: returns one fixed node per call, in order.
    struct ScriptedClient {
        nodes: Mutex<Vec<Vec<NodeEvent>>>,
    }

    #[async_trait]
    impl ModelClient for ScriptedClient {
        async fn stream_node(
            &self,
            _messages: &[Message],
            _model_id: &str,
            _cancel: &tokio::sync::watch::Receiver<bool>,
            on_event: &mut (dyn FnMut(NodeEvent) + Send),
        ) -> anyhow::Result<()> {
            let events = self.nodes.lock().unwrap().remove(0);
            for event in events {
                on_event(event);
            }
            Ok(())
        }
    }

    fn text_event(s: &str) -> NodeEvent {
        NodeEvent::Stream(StreamEvent::TextDelta { content: s.to_string() })
    }

    fn tool_event(id: &str, name: &str) -> NodeEvent {
        NodeEvent::ToolCallPart { tool_call_id: id.into(), tool_name: name.into(), args: serde_json::json!({}) }
    }

    struct ReadFileTool;
    #[async_trait]
    impl Tool for ReadFileTool {
        fn name(&self) -> &str {
            "read_file"
        }
        fn description(&self) -> &str {
            "reads a file"
        }
        fn args_schema(&self) -> &str {
            "{}"
        }
        fn is_read_only(&self) -> bool {
            true
        }
        async fn invoke(&self, _args: serde_json::Value) -> ToolOutcome {
            ToolOutcome::Ok("# Project\n...".to_string())
        }
    }

    fn no_sink() -> impl FnMut(&str) {
        |_: &str| {}
    }

    #[tokio::test]
    async fn happy_path_single_tool_then_completion() {
        let client = ScriptedClient {
            nodes: Mutex::new(vec![
                vec![text_event("Reading README."), tool_event("t1", "read_file")],
                vec![text_event("TUNACODE DONE: Here is the README content: ...")],
            ]),
        };
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(ReadFileTool));
        let mut config = test_config();
        config.allowed_tools.insert("read_file".to_string());

        let mut store = MessageStore::new();
        let mut state = SessionState::new(false, config.allowed_tools.clone(), false);
        let mut sink = no_sink();
        let run = process_request(
            "read README.md",
            "test-model",
            &client,
            &registry,
            &config,
            &mut store,
            &mut state,
            &mut sink,
            &mut |_evt| {},
            &mut |_u| {},
        )
        .await
        .unwrap();

        assert!(!run.fallback);
        assert!(!run.cancelled);
        assert!(state.response_state.has_user_response);
        assert!(state.response_state.task_completed);
        assert!(run.final_text.contains("TUNACODE DONE"));
    }

    #[tokio::test]
    async fn fallback_emitted_when_limit_reached_with_no_user_text() {
        let client = ScriptedClient {
            nodes: Mutex::new(vec![
                vec![tool_event("t1", "read_file")],
                vec![tool_event("t2", "read_file")],
            ]),
        };
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(ReadFileTool));
        let mut config = test_config();
        config.max_iterations = 2;
        // No runway left after the limit-reached prompt, so the loop exits
        // straight into fallback instead of taking the one-time extension.
        config.max_iterations_extension = 0;
        config.allowed_tools.insert("read_file".to_string());

        let mut store = MessageStore::new();
        let mut state = SessionState::new(false, config.allowed_tools.clone(), false);
        let mut sink = no_sink();
        let run = process_request(
            "do something",
            "test-model",
            &client,
            &registry,
            &config,
            &mut store,
            &mut state,
            &mut sink,
            &mut |_evt| {},
            &mut |_u| {},
        )
        .await
        .unwrap();

        assert!(run.fallback);
        assert!(!run.cancelled);
        assert!(run.final_text.contains("Reached iteration limit"));
    }

    /// Cancels the run partway through its first node, the way an external
    /// Ctrl-C listener would: it holds a `cancel_sender()` clone obtained
    /// before the call and signals mid-stream, not before it starts.
    struct CancelMidStreamClient {
        cancel_tx: tokio::sync::watch::Sender<bool>,
    }

    #[async_trait]
    impl ModelClient for CancelMidStreamClient {
        async fn stream_node(
            &self,
            _messages: &[Message],
            _model_id: &str,
            _cancel: &tokio::sync::watch::Receiver<bool>,
            on_event: &mut (dyn FnMut(NodeEvent) + Send),
        ) -> anyhow::Result<()> {
            on_event(tool_event("t1", "read_file"));
            let _ = self.cancel_tx.send(true);
            Ok(())
        }
    }

    #[tokio::test]
    async fn cancellation_mid_run_stops_further_iterations() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(ReadFileTool));
        let mut config = test_config();
        config.allowed_tools.insert("read_file".to_string());

        let mut store = MessageStore::new();
        let mut state = SessionState::new(false, config.allowed_tools.clone(), false);
        let client = CancelMidStreamClient { cancel_tx: state.cancel_sender() };
        let mut sink = no_sink();
        let run = process_request(
            "go",
            "test-model",
            &client,
            &registry,
            &config,
            &mut store,
            &mut state,
            &mut sink,
            &mut |_evt| {},
            &mut |_u| {},
        )
        .await
        .unwrap();

        assert!(run.cancelled);
        assert_eq!(run.iterations, 1);
        assert!(store.dangling_tool_call_ids().is_empty());
    }

    fn test_config() -> OrchestratorConfig {
        OrchestratorConfig {
            max_iterations: 15,
            max_iterations_extension: 5,
            unproductive_limit: 3,
            max_parallel_tools: 4,
            tool_timeout: std::time::Duration::from_secs(5),
            read_only_tools: HashSet::new(),
            fallback_enabled: true,
            allowed_tools: HashSet::new(),
            yolo_mode: false,
            show_thoughts: false,
        }
    }
}

//! Session State (C7) — a plain, single-owner container the Orchestration
//! Loop drives through explicit lifecycle methods (spec §4.7).
//!
//! Every other component either receives a read-only view of this struct
//! or a narrow mutation method (`record_tool_call`, `record_tool_result`);
//! none of them hold `&mut SessionState` directly.

use std::collections::HashSet;

use tokio::sync::watch;

/// One tool invocation's record within a request, updated in two steps:
/// created at dispatch, given a `result_summary` once the call resolves.
#[derive(Debug, Clone)]
pub struct ToolCallRecord {
    pub name: String,
    pub args: serde_json::Value,
    pub result_summary: Option<String>,
}

/// What the current node has told us about the shape of the response so
/// far (spec §4: "response_state").
#[derive(Debug, Clone, Default)]
pub struct ResponseState {
    pub has_user_response: bool,
    pub task_completed: bool,
    pub awaiting_user_guidance: bool,
}

pub struct SessionState {
    pub request_id: String,
    pub iteration: usize,
    pub batch_counter: usize,
    pub consecutive_empty_responses: usize,
    pub unproductive_iterations: usize,
    pub last_productive_iteration: usize,
    pub tool_calls: Vec<ToolCallRecord>,
    pub original_query: Option<String>,
    pub response_state: ResponseState,
    pub show_thoughts: bool,
    pub allowed_tools: HashSet<String>,
    pub yolo: bool,
    cancel_tx: watch::Sender<bool>,
    cancel_rx: watch::Receiver<bool>,
}

impl SessionState {
    pub fn new(show_thoughts: bool, allowed_tools: HashSet<String>, yolo: bool) -> Self {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        Self {
            request_id: new_request_id(),
            iteration: 0,
            batch_counter: 0,
            consecutive_empty_responses: 0,
            unproductive_iterations: 0,
            last_productive_iteration: 0,
            tool_calls: Vec::new(),
            original_query: None,
            response_state: ResponseState::default(),
            show_thoughts,
            allowed_tools,
            yolo,
            cancel_tx,
            cancel_rx,
        }
    }

    /// Reset the per-request counters at the start of a new request.
    /// `original_query` is set only the first time — it is intentionally
    /// **not** cleared on later requests within the same session, so a
    /// multi-turn session keeps remembering the task that started it.
    pub fn reset_for_new_request(&mut self, original_message: &str) {
        self.request_id = new_request_id();
        self.iteration = 0;
        self.batch_counter = 0;
        self.consecutive_empty_responses = 0;
        self.unproductive_iterations = 0;
        self.last_productive_iteration = 0;
        self.tool_calls.clear();
        self.response_state = ResponseState::default();
        if self.original_query.is_none() {
            self.original_query = Some(original_message.to_string());
        }
        // Clear any cancellation left over from a prior request, but keep
        // the same channel: callers may hold a `cancel_sender()` clone from
        // before this call and expect it to still reach the run it starts.
        let _ = self.cancel_tx.send(false);
    }

    pub fn start_iteration(&mut self) {
        self.iteration += 1;
    }

    pub fn record_tool_call(&mut self, name: impl Into<String>, args: serde_json::Value) {
        self.tool_calls.push(ToolCallRecord { name: name.into(), args, result_summary: None });
    }

    /// Attach a result summary to the most recent unresolved call matching
    /// `name`. Tool calls resolve in roughly dispatch order within a batch.
    pub fn record_tool_result(&mut self, name: &str, result_summary: impl Into<String>) {
        if let Some(record) =
            self.tool_calls.iter_mut().rev().find(|r| r.name == name && r.result_summary.is_none())
        {
            record.result_summary = Some(result_summary.into());
        }
    }

    pub fn mark_cancelled(&mut self) {
        let _ = self.cancel_tx.send(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel_rx.borrow()
    }

    pub fn cancel_receiver(&self) -> watch::Receiver<bool> {
        self.cancel_rx.clone()
    }

    /// A cloneable handle an external canceller (e.g. a Ctrl-C listener)
    /// can hold independently of `&mut SessionState` and signal through at
    /// any point during the run this state drives.
    pub fn cancel_sender(&self) -> watch::Sender<bool> {
        self.cancel_tx.clone()
    }

    /// A cheap summary of tool usage: `name -> count`, for corrective
    /// prompts (spec §4.6 steps 3 and 5).
    pub fn tool_usage_summary(&self) -> Vec<(String, usize)> {
        let mut counts: Vec<(String, usize)> = Vec::new();
        for record in &self.tool_calls {
            if let Some(entry) = counts.iter_mut().find(|(name, _)| name == &record.name) {
                entry.1 += 1;
            } else {
                counts.push((record.name.clone(), 1));
            }
        }
        counts
    }
}

fn new_request_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn original_query_set_once_and_preserved_across_resets() {
        let mut state = SessionState::new(false, HashSet::new(), false);
        state.reset_for_new_request("first task");
        assert_eq!(state.original_query.as_deref(), Some("first task"));

        state.reset_for_new_request("second message, same session");
        assert_eq!(state.original_query.as_deref(), Some("first task"));
    }

    #[test]
    fn reset_clears_counters_and_tool_calls() {
        let mut state = SessionState::new(false, HashSet::new(), false);
        state.reset_for_new_request("go");
        state.start_iteration();
        state.record_tool_call("grep", serde_json::json!({}));
        state.unproductive_iterations = 2;

        state.reset_for_new_request("go again");
        assert_eq!(state.iteration, 0);
        assert!(state.tool_calls.is_empty());
        assert_eq!(state.unproductive_iterations, 0);
    }

    #[test]
    fn record_tool_result_attaches_to_most_recent_unresolved_match() {
        let mut state = SessionState::new(false, HashSet::new(), false);
        state.record_tool_call("grep", serde_json::json!({}));
        state.record_tool_call("grep", serde_json::json!({}));
        state.record_tool_result("grep", "found 3 matches");

        assert!(state.tool_calls[1].result_summary.is_some());
        assert!(state.tool_calls[0].result_summary.is_none());
    }

    #[test]
    fn tool_usage_summary_counts_by_name() {
        let mut state = SessionState::new(false, HashSet::new(), false);
        state.record_tool_call("grep", serde_json::json!({}));
        state.record_tool_call("grep", serde_json::json!({}));
        state.record_tool_call("list_dir", serde_json::json!({}));

        let mut summary = state.tool_usage_summary();
        summary.sort();
        assert_eq!(
            summary,
            vec![("grep".to_string(), 2), ("list_dir".to_string(), 1)]
        );
    }

    #[test]
    fn mark_cancelled_is_observable_through_receiver() {
        let mut state = SessionState::new(false, HashSet::new(), false);
        let rx = state.cancel_receiver();
        assert!(!*rx.borrow());
        state.mark_cancelled();
        assert!(state.is_cancelled());
        assert!(*rx.borrow());
    }
}

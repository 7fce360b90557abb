//! Node Processor (C5) — inspects one fully-assembled model iteration
//! ("node") and classifies it for the Orchestration Loop (spec §4.5).
//!
//! Text parts are normalized upstream by the Streaming Adapter (C4) as
//! events arrive; by the time a node reaches this module its `Response`
//! is already assembled. This module's job is purely extraction and
//! classification against what that assembled Response contains.

use crate::dispatcher::PendingCall;
use crate::message::ResponsePart;

/// Case-sensitive, matched after trimming leading whitespace (§4.5).
pub const COMPLETION_MARKER: &str = "TUNACODE DONE:";

/// What one model node amounted to, once its parts are all in hand.
#[derive(Debug, Clone, Default)]
pub struct NodeResult {
    pub response_parts: Vec<ResponsePart>,
    pub tool_calls: Vec<PendingCall>,
    pub completion_detected: bool,
    pub has_user_response: bool,
    pub empty: bool,
    pub empty_reason: Option<String>,
}

/// Classify one node's Response parts.
pub fn process_node(parts: &[ResponsePart]) -> NodeResult {
    if parts.is_empty() {
        return NodeResult {
            empty: true,
            empty_reason: Some("no parts".to_string()),
            ..Default::default()
        };
    }

    let mut tool_calls = Vec::new();
    let mut any_non_whitespace_text = false;

    for part in parts {
        match part {
            ResponsePart::Text { text } => {
                if !text.trim().is_empty() {
                    any_non_whitespace_text = true;
                }
            }
            ResponsePart::ToolCall { tool_call_id, tool_name, args } => {
                tool_calls.push(PendingCall {
                    tool_call_id: tool_call_id.clone(),
                    tool_name: tool_name.clone(),
                    args: args.clone(),
                });
            }
        }
    }

    let completion_detected = parts
        .iter()
        .filter_map(ResponsePart::as_text)
        .any(|text| text.trim_start().starts_with(COMPLETION_MARKER));

    let empty = !any_non_whitespace_text && tool_calls.is_empty();

    NodeResult {
        response_parts: parts.to_vec(),
        tool_calls,
        completion_detected,
        has_user_response: any_non_whitespace_text,
        empty,
        empty_reason: empty.then(|| "whitespace only".to_string()),
    }
}

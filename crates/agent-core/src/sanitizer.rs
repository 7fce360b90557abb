//! History Sanitizer (C2) — bounded iterative repair of corrupt histories.
//!
//! Grounded on the dangling-tool-call repair pattern used by LangChain's
//! Rust port (`repair_dangling_tool_calls`): scan for an emitting message,
//! count what it expects, and patch in synthetic resolutions for whatever
//! didn't arrive. This module generalizes that single pass into the
//! iterative three-step loop spec §4.2 requires.

use crate::error::SanitizeError;
use crate::message::{Message, RequestPart};
use crate::store::{MessageStore, SanitizerToken};

const MAX_PASSES: usize = 10;

/// Outcome of running the sanitizer to a fixed point.
#[derive(Debug, Clone)]
pub struct SanitizeReport {
    pub any_change: bool,
    pub final_dangling_ids: Vec<String>,
    pub passes_run: usize,
}

/// Run the bounded iterative repair loop (§4.2) against `store` in place.
///
/// Each pass applies, in order: dangling-call repair, empty-response
/// removal, consecutive-request collapse. Exits on a no-change pass or at
/// `MAX_PASSES`. Returns `PathologicalHistory` if the cap is hit while the
/// history is still changing.
pub fn sanitize(store: &mut MessageStore) -> Result<SanitizeReport, SanitizeError> {
    let token = SanitizerToken::new();
    let mut any_change_overall = false;

    for pass in 1..=MAX_PASSES {
        let mut history = store.view().to_vec();
        let mut changed = false;

        changed |= repair_dangling_calls(&mut history);
        changed |= remove_empty_responses(&mut history);
        changed |= collapse_consecutive_requests(&mut history);

        if changed {
            store.replace_all(&token, history);
            any_change_overall = true;
        } else {
            return Ok(SanitizeReport {
                any_change: any_change_overall,
                final_dangling_ids: store.dangling_tool_call_ids(),
                passes_run: pass,
            });
        }

        if pass == MAX_PASSES {
            return Err(SanitizeError::PathologicalHistory { passes: pass });
        }
    }

    unreachable!("loop always returns or errors by MAX_PASSES")
}

/// Step 1: remove every part carrying a dangling tool-call id, across every
/// message — the tool-call itself, any retry-prompt, any straggler.
fn repair_dangling_calls(history: &mut Vec<Message>) -> bool {
    let dangling = find_dangling_ids(history);
    if dangling.is_empty() {
        return false;
    }

    for msg in history.iter_mut() {
        match msg {
            Message::Response { parts, .. } => {
                parts.retain(|p| {
                    !matches!(p.as_tool_call(), Some((id, ..)) if dangling.contains(&id.to_string()))
                });
            }
            Message::Request { parts, .. } => {
                parts.retain(|p| {
                    !matches!(p.tool_call_id(), Some(id) if dangling.contains(&id.to_string()))
                });
            }
        }
    }
    true
}

fn find_dangling_ids(history: &[Message]) -> Vec<String> {
    let mut dangling = Vec::new();
    for (i, msg) in history.iter().enumerate() {
        let Message::Response { parts, .. } = msg else { continue };
        for part in parts {
            if let Some((id, ..)) = part.as_tool_call() {
                let resolved = history[i + 1..]
                    .iter()
                    .any(|later| later.is_request() && later.referenced_tool_call_ids().contains(&id));
                if !resolved {
                    dangling.push(id.to_string());
                }
            }
        }
    }
    dangling
}

/// Step 2: drop any Response with zero parts (I2).
fn remove_empty_responses(history: &mut Vec<Message>) -> bool {
    let before = history.len();
    history.retain(|m| !(m.is_response() && m.is_empty()));
    history.len() != before
}

/// Step 3: where two or more Requests appear with no Response between them,
/// keep only the last (I3).
fn collapse_consecutive_requests(history: &mut Vec<Message>) -> bool {
    let mut out: Vec<Message> = Vec::with_capacity(history.len());
    let mut changed = false;

    for msg in history.drain(..) {
        if msg.is_request() {
            if let Some(last) = out.last() {
                if last.is_request() {
                    out.pop();
                    changed = true;
                }
            }
        }
        out.push(msg);
    }

    *history = out;
    changed
}

/// Separate entry point for cross-session resume (§4.2): clears the run id
/// and strips `system-prompt` parts (I4), then drops any resulting empty
/// messages. Returns a new list; does not mutate `history`.
pub fn sanitize_for_resume(history: &[Message]) -> Vec<Message> {
    history
        .iter()
        .cloned()
        .filter_map(|msg| {
            let msg = msg.with_run_id(None);
            match msg {
                Message::Request { parts, run_id } => {
                    let parts: Vec<RequestPart> =
                        parts.into_iter().filter(|p| !p.is_system_prompt()).collect();
                    if parts.is_empty() {
                        None
                    } else {
                        Some(Message::Request { parts, run_id })
                    }
                }
                resp @ Message::Response { .. } => {
                    if resp.is_empty() {
                        None
                    } else {
                        Some(resp)
                    }
                }
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::ResponsePart;

    fn tool_call(id: &str) -> Message {
        Message::response(vec![ResponsePart::ToolCall {
            tool_call_id: id.into(),
            tool_name: "grep".into(),
            args: serde_json::json!({}),
        }])
    }

    #[test]
    fn removes_dangling_tool_call_entirely() {
        let mut store = MessageStore::from_history(vec![
            Message::user_prompt("go"),
            tool_call("t1"),
        ]);
        let report = sanitize(&mut store).unwrap();
        assert!(report.any_change);
        assert!(report.final_dangling_ids.is_empty());
        assert!(store.find_part("t1").is_none());
    }

    #[test]
    fn cascading_repair_collapses_empty_response_and_consecutive_requests() {
        // tool-call dangles -> removing it empties the Response -> dropping
        // the Response leaves two adjacent Requests -> collapse to the last.
        let mut store = MessageStore::from_history(vec![
            Message::user_prompt("first"),
            tool_call("t1"),
            Message::user_prompt("second"),
        ]);
        sanitize(&mut store).unwrap();
        assert_eq!(store.view().len(), 1);
        assert!(matches!(
            &store.view()[0],
            Message::Request { parts, .. } if parts.len() == 1
        ));
    }

    #[test]
    fn idempotent_on_already_clean_history() {
        let mut store = MessageStore::from_history(vec![Message::user_prompt("hi")]);
        let first = sanitize(&mut store).unwrap();
        let history_after_first = store.view().to_vec();
        let second = sanitize(&mut store).unwrap();
        assert_eq!(store.view().to_vec(), history_after_first);
        assert!(!first.any_change || !second.any_change);
    }

    #[test]
    fn sanitize_for_resume_strips_system_prompts_and_run_id() {
        let history = vec![
            Message::Request {
                parts: vec![
                    RequestPart::SystemPrompt { text: "sys".into() },
                    RequestPart::UserPrompt { text: "hi".into() },
                ],
                run_id: Some("run-1".into()),
            },
        ];
        let resumed = sanitize_for_resume(&history);
        assert_eq!(resumed.len(), 1);
        assert_eq!(resumed[0].run_id(), None);
        match &resumed[0] {
            Message::Request { parts, .. } => {
                assert_eq!(parts.len(), 1);
                assert!(!parts[0].is_system_prompt());
            }
            _ => panic!("expected request"),
        }
    }

    #[test]
    fn sanitize_for_resume_drops_messages_left_empty() {
        let history = vec![Message::Request {
            parts: vec![RequestPart::SystemPrompt { text: "sys".into() }],
            run_id: None,
        }];
        assert!(sanitize_for_resume(&history).is_empty());
    }
}

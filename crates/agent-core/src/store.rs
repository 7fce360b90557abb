//! Message Store (C1) — typed, append-mostly conversation log.
//!
//! Implementation freedom per spec §4.1: a contiguous `Vec` with `O(n)`
//! scans is fine, histories are bounded by iteration limits.

use crate::error::StoreError;
use crate::message::Message;

/// Capability token that gates mutation beyond plain `append`. Only the
/// History Sanitizer is handed one of these (spec §4.1, §9: "the sanitizer
/// is the only other holder of a mutation capability").
pub struct SanitizerToken(());

impl SanitizerToken {
    /// Only `crate::sanitizer` constructs these.
    pub(crate) fn new() -> Self {
        SanitizerToken(())
    }
}

/// An append-mostly, invariant-checked conversation history.
#[derive(Debug, Clone, Default)]
pub struct MessageStore {
    messages: Vec<Message>,
}

impl MessageStore {
    pub fn new() -> Self {
        Self { messages: Vec::new() }
    }

    pub fn from_history(messages: Vec<Message>) -> Self {
        Self { messages }
    }

    /// Read-only snapshot of the current history.
    pub fn view(&self) -> &[Message] {
        &self.messages
    }

    pub fn into_history(self) -> Vec<Message> {
        self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Find the message index and part carrying `id`, if any.
    pub fn find_part(&self, id: &str) -> Option<usize> {
        self.messages
            .iter()
            .position(|m| m.referenced_tool_call_ids().iter().any(|i| *i == id))
    }

    /// Append a message, rejecting it if doing so would violate I1/I2/I3/I5.
    ///
    /// I1 (pairing) is a history-level property checked only once the
    /// history is finalized (see `dangling_tool_call_ids`) — a `tool-call`
    /// is legitimately unpaired for the messages between its emission and
    /// its eventual return, so `append` cannot reject it on arrival.
    pub fn append(&mut self, msg: Message) -> Result<(), StoreError> {
        if msg.is_response() && msg.is_empty() {
            return Err(StoreError::EmptyResponse);
        }

        if let Some(dup) = self.duplicate_tool_call_id(&msg) {
            return Err(StoreError::DuplicateToolCallId(dup));
        }

        if msg.is_request() {
            if let Some(last) = self.messages.last() {
                if last.is_request() {
                    return Err(StoreError::ConsecutiveRequests);
                }
            }
        }

        self.messages.push(msg);
        Ok(())
    }

    fn duplicate_tool_call_id(&self, incoming: &Message) -> Option<String> {
        // I5 only constrains tool-call *emission* ids; tool-return/retry
        // parts legitimately repeat the id they are resolving.
        let Message::Response { parts, .. } = incoming else {
            return None;
        };
        for part in parts {
            if let Some((id, ..)) = part.as_tool_call() {
                let exists = self.messages.iter().any(|m| {
                    matches!(m, Message::Response { parts, .. }
                        if parts.iter().any(|p| p.as_tool_call().map(|(i, ..)| i) == Some(id)))
                });
                if exists {
                    return Some(id.to_string());
                }
            }
        }
        None
    }

    /// Tool-call ids in the history with no matching `tool-return`/`retry-prompt`
    /// in any later Request. Used by the Sanitizer (C2) and by property tests (§8).
    pub fn dangling_tool_call_ids(&self) -> Vec<String> {
        let mut dangling = Vec::new();
        for (i, msg) in self.messages.iter().enumerate() {
            let Message::Response { parts, .. } = msg else { continue };
            for part in parts {
                if let Some((id, ..)) = part.as_tool_call() {
                    let resolved = self.messages[i + 1..].iter().any(|later| {
                        later.is_request() && later.referenced_tool_call_ids().contains(&id)
                    });
                    if !resolved {
                        dangling.push(id.to_string());
                    }
                }
            }
        }
        dangling
    }

    /// Replace the message at `index`. Reserved for the Sanitizer.
    pub fn replace(&mut self, _token: &SanitizerToken, index: usize, msg: Message) {
        self.messages[index] = msg;
    }

    /// Remove the message at `index`. Reserved for the Sanitizer.
    pub fn remove(&mut self, _token: &SanitizerToken, index: usize) -> Message {
        self.messages.remove(index)
    }

    /// Wholesale replace of the backing vector. Reserved for the Sanitizer,
    /// which computes a new history in one pass rather than splicing.
    pub fn replace_all(&mut self, _token: &SanitizerToken, messages: Vec<Message>) {
        self.messages = messages;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{RequestPart, ResponsePart};

    fn tool_call(id: &str) -> Message {
        Message::response(vec![ResponsePart::ToolCall {
            tool_call_id: id.into(),
            tool_name: "grep".into(),
            args: serde_json::json!({}),
        }])
    }

    fn tool_return(id: &str) -> Message {
        Message::request(vec![RequestPart::ToolReturn {
            tool_call_id: id.into(),
            content: "ok".into(),
        }])
    }

    #[test]
    fn rejects_empty_response() {
        let mut store = MessageStore::new();
        let err = store.append(Message::response(vec![])).unwrap_err();
        assert_eq!(err, StoreError::EmptyResponse);
    }

    #[test]
    fn rejects_consecutive_requests() {
        let mut store = MessageStore::new();
        store.append(Message::user_prompt("hi")).unwrap();
        let err = store.append(Message::user_prompt("again")).unwrap_err();
        assert_eq!(err, StoreError::ConsecutiveRequests);
    }

    #[test]
    fn rejects_duplicate_tool_call_id() {
        let mut store = MessageStore::new();
        store.append(tool_call("t1")).unwrap();
        store.append(tool_return("t1")).unwrap();
        let err = store.append(tool_call("t1")).unwrap_err();
        assert_eq!(err, StoreError::DuplicateToolCallId("t1".into()));
    }

    #[test]
    fn dangling_ids_detected_until_returned() {
        let mut store = MessageStore::new();
        store.append(tool_call("t1")).unwrap();
        assert_eq!(store.dangling_tool_call_ids(), vec!["t1".to_string()]);
        store.append(tool_return("t1")).unwrap();
        assert!(store.dangling_tool_call_ids().is_empty());
    }

    #[test]
    fn find_part_locates_message_by_id() {
        let mut store = MessageStore::new();
        store.append(tool_call("t1")).unwrap();
        assert_eq!(store.find_part("t1"), Some(0));
        assert_eq!(store.find_part("nope"), None);
    }
}

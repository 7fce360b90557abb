//! Message and Part types — the conversation data model.
//!
//! A `Message` is either a `Request` (input to the model) or a `Response`
//! (output from the model). Each carries an ordered list of `Part`s. The
//! shapes here mirror the wire-level tagged representation a persistence
//! layer would serialize, so `serde` derives double as the JSON contract.

use serde::{Deserialize, Serialize};

/// A single part of a `Request` message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum RequestPart {
    SystemPrompt { text: String },
    UserPrompt { text: String },
    ToolReturn { tool_call_id: String, content: String },
    RetryPrompt { tool_call_id: String, reason: String },
}

impl RequestPart {
    pub fn tool_call_id(&self) -> Option<&str> {
        match self {
            RequestPart::ToolReturn { tool_call_id, .. } => Some(tool_call_id),
            RequestPart::RetryPrompt { tool_call_id, .. } => Some(tool_call_id),
            _ => None,
        }
    }

    pub fn is_system_prompt(&self) -> bool {
        matches!(self, RequestPart::SystemPrompt { .. })
    }
}

/// A single part of a `Response` message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ResponsePart {
    Text { text: String },
    ToolCall {
        tool_call_id: String,
        tool_name: String,
        args: serde_json::Value,
    },
}

impl ResponsePart {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ResponsePart::Text { text } => Some(text),
            _ => None,
        }
    }

    pub fn as_tool_call(&self) -> Option<(&str, &str, &serde_json::Value)> {
        match self {
            ResponsePart::ToolCall { tool_call_id, tool_name, args } => {
                Some((tool_call_id, tool_name, args))
            }
            _ => None,
        }
    }
}

/// A message in the conversation history: either a Request sent to the
/// model or a Response the model produced.
///
/// `run_id` is opaque to this crate; it is cleared on cross-session resume
/// (I4) because the model client re-establishes its own run on reconnect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "kebab-case")]
pub enum Message {
    Request {
        parts: Vec<RequestPart>,
        run_id: Option<String>,
    },
    Response {
        parts: Vec<ResponsePart>,
        run_id: Option<String>,
    },
}

impl Message {
    pub fn request(parts: Vec<RequestPart>) -> Self {
        Message::Request { parts, run_id: None }
    }

    pub fn response(parts: Vec<ResponsePart>) -> Self {
        Message::Response { parts, run_id: None }
    }

    pub fn user_prompt(text: impl Into<String>) -> Self {
        Message::request(vec![RequestPart::UserPrompt { text: text.into() }])
    }

    pub fn is_request(&self) -> bool {
        matches!(self, Message::Request { .. })
    }

    pub fn is_response(&self) -> bool {
        matches!(self, Message::Response { .. })
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Message::Request { parts, .. } => parts.is_empty(),
            Message::Response { parts, .. } => parts.is_empty(),
        }
    }

    /// All tool_call_ids referenced by this message, regardless of which
    /// part kind carries them (tool-call, tool-return, retry-prompt).
    pub fn referenced_tool_call_ids(&self) -> Vec<&str> {
        match self {
            Message::Request { parts, .. } => {
                parts.iter().filter_map(|p| p.tool_call_id()).collect()
            }
            Message::Response { parts, .. } => parts
                .iter()
                .filter_map(|p| p.as_tool_call().map(|(id, ..)| id))
                .collect(),
        }
    }

    pub fn run_id(&self) -> Option<&str> {
        match self {
            Message::Request { run_id, .. } => run_id.as_deref(),
            Message::Response { run_id, .. } => run_id.as_deref(),
        }
    }

    pub fn with_run_id(mut self, run_id: Option<String>) -> Self {
        match &mut self {
            Message::Request { run_id: r, .. } => *r = run_id,
            Message::Response { run_id: r, .. } => *r = run_id,
        }
        self
    }
}

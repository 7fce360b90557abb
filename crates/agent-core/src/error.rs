//! Typed error surface for the orchestration core (spec §7, §7.1).

use thiserror::Error;

/// Errors surfaced by the Message Store when an append would violate an
/// invariant (I1/I2/I3/I5).
#[derive(Debug, Error, Clone, PartialEq)]
pub enum StoreError {
    #[error("tool_call_id '{0}' is not unique in the history (I5)")]
    DuplicateToolCallId(String),
    #[error("response has zero parts (I2)")]
    EmptyResponse,
    #[error("two consecutive Requests with no Response between them (I3)")]
    ConsecutiveRequests,
}

/// Errors from the History Sanitizer (§4.2).
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SanitizeError {
    #[error("sanitizer did not converge after {passes} passes (pathological history)")]
    PathologicalHistory { passes: usize },
}

/// The orchestration core's public error type. One variant per row of the
/// error table in spec §7, plus a catch-all for anything bubbling up from
/// an external collaborator (model client, tool registry).
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("request {request_id} cancelled at iteration {iteration}")]
    UserCancel { request_id: String, iteration: usize },

    #[error("request {request_id} iteration {iteration}: model stream error: {source}")]
    ModelStreamError {
        request_id: String,
        iteration: usize,
        #[source]
        source: anyhow::Error,
    },

    #[error("request {request_id} iteration {iteration}: malformed tool call batch: {reason}")]
    ToolBatchingSchemaError {
        request_id: String,
        iteration: usize,
        reason: String,
    },

    #[error("request {request_id}: history sanitizer gave up: {0}", source)]
    PathologicalHistory {
        request_id: String,
        #[source]
        source: SanitizeError,
    },

    #[error("request {request_id}: message store rejected an append: {source}")]
    Store {
        request_id: String,
        #[source]
        source: StoreError,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl OrchestratorError {
    pub fn request_id(&self) -> Option<&str> {
        match self {
            OrchestratorError::UserCancel { request_id, .. }
            | OrchestratorError::ModelStreamError { request_id, .. }
            | OrchestratorError::ToolBatchingSchemaError { request_id, .. }
            | OrchestratorError::PathologicalHistory { request_id, .. }
            | OrchestratorError::Store { request_id, .. } => Some(request_id),
            OrchestratorError::Other(_) => None,
        }
    }
}

//! Agent Orchestration Core
//!
//! The bounded reasoning loop that drives a single request through a
//! terminal-based coding assistant: assemble a model-facing history, stream
//! one node at a time, dispatch any tool calls the model asked for, and
//! repeat until the model signals completion, the iteration budget runs
//! out, or the caller cancels.

pub mod builtin_tools;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod message;
pub mod model_client;
pub mod node;
pub mod orchestrator;
pub mod sanitizer;
pub mod session;
pub mod store;
pub mod streaming;
pub mod tools;

pub use config::OrchestratorConfig;
pub use error::OrchestratorError;
pub use message::{Message, RequestPart, ResponsePart};
pub use model_client::{ModelClient, NodeEvent, ToolSinkEvent, Usage};
pub use orchestrator::{process_request, Run};
pub use session::SessionState;
pub use store::MessageStore;
pub use streaming::{StreamEvent, StreamSink};
pub use tools::{Tool, ToolOutcome, ToolRegistry};

//! Demonstration harness for the orchestration core.
//!
//! Wires up logging, configuration, a small built-in tool registry, and an
//! in-memory scripted model client, then drives one `process_request` call
//! against a CLI-supplied prompt, printing streamed text to stdout as it
//! arrives. This binary is a runnable smoke test for the library, not a
//! product surface in its own right — the orchestration core has no
//! dependency on it.

use std::collections::HashSet;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use agent_core::message::{Message, RequestPart, ResponsePart};
use agent_core::model_client::{ModelClient, NodeEvent, ToolSinkEvent, Usage};
use agent_core::{builtin_tools, config, orchestrator, session, store, streaming, tools};

/// Scripted model client for the demo: no network calls, no provider SDK.
/// On its first turn it lists the current directory; on its second it
/// answers using the directory listing it was just given.
struct DemoModelClient;

#[async_trait]
impl ModelClient for DemoModelClient {
    async fn stream_node(
        &self,
        messages: &[Message],
        _model_id: &str,
        cancel: &watch::Receiver<bool>,
        on_event: &mut (dyn FnMut(NodeEvent) + Send),
    ) -> Result<()> {
        if *cancel.borrow() {
            return Ok(());
        }

        let already_listed = messages.iter().any(|m| {
            matches!(m, Message::Response { parts, .. }
                if parts.iter().any(|p| matches!(
                    p,
                    ResponsePart::ToolCall { tool_name, .. } if tool_name == "list_directory"
                )))
        });

        if !already_listed {
            on_event(NodeEvent::ToolCallPart {
                tool_call_id: uuid::Uuid::new_v4().to_string(),
                tool_name: "list_directory".to_string(),
                args: serde_json::json!({ "path": "." }),
            });
            return Ok(());
        }

        let listing = messages.iter().rev().find_map(|m| match m {
            Message::Request { parts, .. } => parts.iter().find_map(|p| match p {
                RequestPart::ToolReturn { content, .. } => Some(content.clone()),
                _ => None,
            }),
            _ => None,
        });

        let mut answer = String::from("TUNACODE DONE: here is the workspace listing");
        if let Some(listing) = listing {
            answer.push_str(":\n");
            answer.push_str(&listing);
        }

        for chunk in split_into_chunks(&answer, 24) {
            on_event(NodeEvent::Stream(streaming::StreamEvent::TextDelta { content: chunk }));
        }
        Ok(())
    }
}

fn split_into_chunks(text: &str, chunk_size: usize) -> Vec<String> {
    text.chars()
        .collect::<Vec<_>>()
        .chunks(chunk_size)
        .map(|c| c.iter().collect())
        .collect()
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "agent_core=debug,info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("agent-core demo starting up");

    let orchestrator_config = config::load()?;

    let mut registry = tools::ToolRegistry::new();
    builtin_tools::register_all(&mut registry);

    let prompt = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "List the files in the current directory.".to_string());

    let model_client = DemoModelClient;
    let mut message_store = store::MessageStore::new();
    let mut session_state = session::SessionState::new(
        orchestrator_config.show_thoughts,
        HashSet::new(),
        orchestrator_config.yolo_mode,
    );

    let mut stdout_sink = |delta: &str| {
        print!("{delta}");
        use std::io::Write;
        let _ = std::io::stdout().flush();
    };
    let mut tool_sink = |event: ToolSinkEvent| {
        tracing::debug!(?event, "tool sink event");
    };
    let mut usage_sink = |usage: Usage| {
        tracing::debug!(?usage, "usage sink event");
    };

    let run = orchestrator::process_request(
        &prompt,
        "demo-model",
        &model_client,
        &registry,
        &orchestrator_config,
        &mut message_store,
        &mut session_state,
        &mut stdout_sink,
        &mut tool_sink,
        &mut usage_sink,
    )
    .await?;

    println!();
    info!(
        iterations = run.iterations,
        fallback = run.fallback,
        cancelled = run.cancelled,
        "run complete"
    );

    Ok(())
}

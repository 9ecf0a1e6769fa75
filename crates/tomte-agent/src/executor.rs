// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::{stream, Stream};
use tomte_sandbox::HookDecision;
use tomte_store::SessionMessage;

use crate::runner::AgentOptions;

/// PreToolUse gate the executor must consult before every tool call.
/// A [`HookDecision::Block`] becomes a denied tool result for the model.
pub type PreToolHook = Arc<dyn Fn(&str, &serde_json::Value) -> HookDecision + Send + Sync>;

/// Events yielded by the external turn executor while one turn runs.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// First event of a fresh provider session; carries the id to resume
    /// the session with on later turns.
    SessionStarted { session_id: String },
    /// Incremental assistant text, for live progress display.
    TextDelta { text: String },
    /// A complete assistant message.  `content` is the provider's block
    /// list: a JSON array whose items are plain strings or
    /// `{"type":"text","text":…}` objects; other block kinds are ignored.
    Assistant { content: serde_json::Value },
    /// The model invoked a tool.
    ToolStart { id: String, name: String },
    /// The tool call's input is complete.
    ToolInput { id: String, input: serde_json::Value },
    /// Periodic progress for a long-running tool.
    ToolProgress { id: String, elapsed_secs: u64 },
    /// Terminal event: the turn finished.
    Result { text: Option<String> },
    /// Terminal event: the turn failed provider-side.
    Error { message: String },
}

pub type EventStream = Pin<Box<dyn Stream<Item = anyhow::Result<StreamEvent>> + Send>>;

/// One turn's worth of input for the executor.
#[derive(Clone)]
pub struct TurnRequest {
    pub message: String,
    pub history: Vec<SessionMessage>,
    /// Provider session to resume, when one is cached for this key.
    pub resume_session_id: Option<String>,
    pub options: AgentOptions,
    /// Gate to consult before every tool call; `None` means no sandbox
    /// (only sensible in tests).
    pub pre_tool_hook: Option<PreToolHook>,
}

impl std::fmt::Debug for TurnRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TurnRequest")
            .field("message", &self.message)
            .field("history_len", &self.history.len())
            .field("resume_session_id", &self.resume_session_id)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

/// The external turn executor: give it a message, get an event stream.
///
/// Everything provider-specific (wire format, tool loop, streaming)
/// lives behind this trait.
#[async_trait]
pub trait TurnExecutor: Send + Sync {
    async fn run(&self, request: TurnRequest) -> anyhow::Result<EventStream>;
}

// ─── Echo executor ────────────────────────────────────────────────────────────

/// Offline fallback executor: answers every message by echoing it.
///
/// Lets the daemon run end to end (queue, sandbox, persistence,
/// heartbeat) with no model provider configured.
#[derive(Debug, Default)]
pub struct EchoExecutor;

#[async_trait]
impl TurnExecutor for EchoExecutor {
    async fn run(&self, request: TurnRequest) -> anyhow::Result<EventStream> {
        let events: Vec<anyhow::Result<StreamEvent>> = vec![
            Ok(StreamEvent::SessionStarted {
                session_id: "echo".to_string(),
            }),
            Ok(StreamEvent::Assistant {
                content: serde_json::json!([format!("[echo] {}", request.message)]),
            }),
            Ok(StreamEvent::Result { text: None }),
        ];
        Ok(Box::pin(stream::iter(events)))
    }
}

// ─── Scripted mock ────────────────────────────────────────────────────────────

/// One scripted stream item: an event, or an error with this message.
#[derive(Debug, Clone)]
pub enum ScriptedStep {
    Event(StreamEvent),
    Fail(String),
}

/// Pre-scripted executor for tests.  Each `run` call pops the next
/// script from the front of the queue and replays it; the last request
/// is kept for inspection.
pub struct ScriptedExecutor {
    scripts: Mutex<Vec<Vec<ScriptedStep>>>,
    pub last_request: Mutex<Option<TurnRequest>>,
}

impl ScriptedExecutor {
    pub fn new(scripts: Vec<Vec<ScriptedStep>>) -> Self {
        Self {
            scripts: Mutex::new(scripts),
            last_request: Mutex::new(None),
        }
    }

    /// Convenience: every call answers with one assistant text block and
    /// a fresh session id.
    pub fn always_text(session_id: impl Into<String>, text: impl Into<String>) -> Self {
        let text = text.into();
        Self::new(vec![vec![
            ScriptedStep::Event(StreamEvent::SessionStarted {
                session_id: session_id.into(),
            }),
            ScriptedStep::Event(StreamEvent::Assistant {
                content: serde_json::json!([{ "type": "text", "text": text }]),
            }),
            ScriptedStep::Event(StreamEvent::Result { text: None }),
        ]])
    }

    /// Convenience: the stream dies with `error` after emitting
    /// `text_before`, simulating a transport reset mid-turn.
    pub fn failing_after(text_before: impl Into<String>, error: impl Into<String>) -> Self {
        Self::new(vec![vec![
            ScriptedStep::Event(StreamEvent::Assistant {
                content: serde_json::json!([text_before.into()]),
            }),
            ScriptedStep::Fail(error.into()),
        ]])
    }
}

#[async_trait]
impl TurnExecutor for ScriptedExecutor {
    async fn run(&self, request: TurnRequest) -> anyhow::Result<EventStream> {
        *self.last_request.lock().unwrap_or_else(|e| e.into_inner()) = Some(request);
        let steps = {
            let mut scripts = self.scripts.lock().unwrap_or_else(|e| e.into_inner());
            if scripts.is_empty() {
                vec![
                    ScriptedStep::Event(StreamEvent::Assistant {
                        content: serde_json::json!(["[no more scripts]"]),
                    }),
                    ScriptedStep::Event(StreamEvent::Result { text: None }),
                ]
            } else {
                scripts.remove(0)
            }
        };
        let items: Vec<anyhow::Result<StreamEvent>> = steps
            .into_iter()
            .map(|step| match step {
                ScriptedStep::Event(e) => Ok(e),
                ScriptedStep::Fail(msg) => Err(anyhow::anyhow!(msg)),
            })
            .collect();
        Ok(Box::pin(stream::iter(items)))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

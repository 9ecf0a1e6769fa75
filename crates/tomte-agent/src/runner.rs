// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use futures::StreamExt;
use tokio::sync::mpsc;
use tomte_config::Config;
use tomte_store::{
    append_audit_entry, compact_if_needed, load_history, save_interaction, AuditEntry,
    SessionKey, SessionMessage,
};
use tracing::{debug, warn};

use crate::executor::{StreamEvent, TurnExecutor, TurnRequest};

/// Immutable per-daemon options handed to the executor on every turn.
#[derive(Debug, Clone, Default)]
pub struct AgentOptions {
    pub workspace_dir: PathBuf,
    /// Composed system prompt (seed documents + memory digest).
    pub system_prompt: String,
    /// MCP server endpoints the executor should connect its tools to.
    pub mcp_servers: Vec<String>,
}

/// Compose the options bag from config and workspace content.
pub fn build_agent_options(
    config: &Config,
    memory_content: &str,
    mcp_servers: Vec<String>,
) -> AgentOptions {
    let mut system_prompt = String::from(
        "You are a personal assistant daemon with access to the user's \
         workspace. Follow the standing instructions in AGENTS.md.",
    );
    if !memory_content.trim().is_empty() {
        system_prompt.push_str("\n\n## Memory\n\n");
        system_prompt.push_str(memory_content);
    }
    AgentOptions {
        workspace_dir: config.security.workspace.clone(),
        system_prompt,
        mcp_servers,
    }
}

/// Result of one agent turn.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnOutcome {
    pub response: String,
    pub messages: Vec<SessionMessage>,
    /// True when the stream died after producing some text; the partial
    /// reply is preserved and flagged instead of dropped.
    pub partial: bool,
}

/// Wraps the external turn executor with history, resumable provider
/// sessions, and per-turn persistence.
///
/// The session-id cache is in-memory only: a daemon restart starts fresh
/// provider sessions that still see the full on-disk history.
pub struct AgentRunner {
    executor: Arc<dyn TurnExecutor>,
    options: AgentOptions,
    config: Arc<Config>,
    sessions: Mutex<HashMap<SessionKey, String>>,
    pre_tool_hook: Option<crate::executor::PreToolHook>,
}

impl AgentRunner {
    pub fn new(executor: Arc<dyn TurnExecutor>, options: AgentOptions, config: Arc<Config>) -> Self {
        Self {
            executor,
            options,
            config,
            sessions: Mutex::new(HashMap::new()),
            pre_tool_hook: None,
        }
    }

    /// Install the PreToolUse gate forwarded to the executor with every
    /// turn.
    pub fn with_pre_tool_hook(mut self, hook: crate::executor::PreToolHook) -> Self {
        self.pre_tool_hook = Some(hook);
        self
    }

    /// Run one turn for `key`.
    ///
    /// When `sink` is given, every stream event is forwarded to it as it
    /// arrives (the processing-message accumulator consumes these); the
    /// turn result is identical either way.
    pub async fn run_turn(
        &self,
        message: &str,
        key: &SessionKey,
        sink: Option<mpsc::UnboundedSender<StreamEvent>>,
    ) -> anyhow::Result<TurnOutcome> {
        let sessions_dir = self.config.sessions_dir();
        let history = load_history(&sessions_dir, key, &self.config.session);

        let request = TurnRequest {
            message: message.to_string(),
            history,
            resume_session_id: self.cached_session(key),
            options: self.options.clone(),
            pre_tool_hook: self.pre_tool_hook.clone(),
        };

        let mut stream = self.executor.run(request).await?;
        let mut response = String::new();
        let mut partial = false;

        while let Some(item) = stream.next().await {
            match item {
                Ok(event) => {
                    if let Some(sink) = &sink {
                        let _ = sink.send(event.clone());
                    }
                    match event {
                        StreamEvent::SessionStarted { session_id } => {
                            self.remember_session(key, session_id);
                        }
                        StreamEvent::Assistant { content } => {
                            response.push_str(&extract_text(&content));
                        }
                        StreamEvent::Result { text } => {
                            if response.is_empty() {
                                if let Some(t) = text {
                                    response.push_str(&t);
                                }
                            }
                        }
                        StreamEvent::Error { message } => {
                            if !response.is_empty() {
                                warn!(error = %message, "turn ended early, keeping partial reply");
                                partial = true;
                                break;
                            }
                            anyhow::bail!("turn executor failed: {message}");
                        }
                        _ => {}
                    }
                }
                Err(e) if is_transport_reset(&e) && !response.is_empty() => {
                    warn!(error = %e, "transport reset mid-turn, keeping partial reply");
                    partial = true;
                    break;
                }
                Err(e) => return Err(e),
            }
        }
        // dropping the stream closes the underlying handle
        drop(stream);

        let turn = vec![
            SessionMessage::user(message),
            SessionMessage::assistant(response.clone()),
        ];
        if let Err(e) = save_interaction(&sessions_dir, key, &turn) {
            warn!(session = %key, error = %e, "could not persist turn");
        }
        self.maybe_compact(&sessions_dir, key);

        let audit = AuditEntry::interaction(key.source_tag(), key.as_str(), message, &response);
        if let Err(e) = append_audit_entry(&self.config.security.workspace, &audit) {
            warn!(session = %key, error = %e, "could not write audit entry");
        }

        Ok(TurnOutcome {
            response,
            messages: turn,
            partial,
        })
    }

    /// Forget the provider session for `key` (the `/clear` command and
    /// daemon restart both land here).
    pub fn clear_session(&self, key: &SessionKey) {
        self.lock_sessions().remove(key);
        debug!(session = %key, "cleared provider session");
    }

    fn cached_session(&self, key: &SessionKey) -> Option<String> {
        self.lock_sessions().get(key).cloned()
    }

    fn remember_session(&self, key: &SessionKey, session_id: String) {
        self.lock_sessions().entry(key.clone()).or_insert(session_id);
    }

    fn maybe_compact(&self, sessions_dir: &std::path::Path, key: &SessionKey) {
        if !self.config.session.compaction_enabled {
            return;
        }
        let path = key.transcript_path(sessions_dir);
        if let Err(e) = compact_if_needed(&path, self.config.session.compaction_threshold) {
            warn!(session = %key, error = %e, "compaction failed");
        }
    }

    fn lock_sessions(&self) -> std::sync::MutexGuard<'_, HashMap<SessionKey, String>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Flatten an assistant content block list into plain text.
///
/// Blocks are plain strings or `{"type":"text","text":…}` objects; any
/// other block kind (tool use, images) contributes nothing.
fn extract_text(content: &serde_json::Value) -> String {
    match content {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Array(blocks) => blocks
            .iter()
            .filter_map(|block| match block {
                serde_json::Value::String(s) => Some(s.as_str()),
                serde_json::Value::Object(o)
                    if o.get("type").and_then(|t| t.as_str()) == Some("text") =>
                {
                    o.get("text").and_then(|t| t.as_str())
                }
                _ => None,
            })
            .collect::<Vec<_>>()
            .join(""),
        _ => String::new(),
    }
}

/// Heuristic for provider transport drops that should preserve partial
/// output instead of failing the whole turn.
fn is_transport_reset(error: &anyhow::Error) -> bool {
    let text = error.to_string().to_lowercase();
    text.contains("transport not ready")
        || text.contains("connection reset")
        || text.contains("connection closed")
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

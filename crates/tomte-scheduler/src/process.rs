// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A background command the agent started, tracked until (and after) it
/// exits so its output can be reported in a later heartbeat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessSession {
    pub pid: u32,
    pub command: String,
    /// Combined stdout + stderr, in arrival order.
    pub output: String,
    pub exit_code: Option<i32>,
    pub started_at: DateTime<Utc>,
    pub exited_at: Option<DateTime<Utc>>,
}

impl ProcessSession {
    pub fn running(&self) -> bool {
        self.exit_code.is_none()
    }
}

/// Registry of background process sessions, keyed by an opaque session id.
///
/// The dispatch core only consumes `get` and `list`; the exec subsystem
/// owns the writes and signals completions through the system-event
/// buffer.
#[derive(Debug, Default)]
pub struct ProcessRegistry {
    sessions: Mutex<HashMap<String, ProcessSession>>,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a freshly spawned process.
    pub fn insert(&self, id: impl Into<String>, pid: u32, command: impl Into<String>) {
        let session = ProcessSession {
            pid,
            command: command.into(),
            output: String::new(),
            exit_code: None,
            started_at: Utc::now(),
            exited_at: None,
        };
        self.lock().insert(id.into(), session);
    }

    /// Append captured output to a session.  Unknown ids are ignored;
    /// output can trail in after a session was pruned.
    pub fn append_output(&self, id: &str, chunk: &str) {
        if let Some(session) = self.lock().get_mut(id) {
            session.output.push_str(chunk);
        }
    }

    /// Record that the process exited.
    pub fn finish(&self, id: &str, exit_code: i32) {
        if let Some(session) = self.lock().get_mut(id) {
            session.exit_code = Some(exit_code);
            session.exited_at = Some(Utc::now());
        }
    }

    pub fn get(&self, id: &str) -> Option<ProcessSession> {
        self.lock().get(id).cloned()
    }

    /// All sessions, running and exited, in unspecified order.
    pub fn list(&self) -> Vec<ProcessSession> {
        self.lock().values().cloned().collect()
    }

    /// Drop finished sessions, returning how many were pruned.
    pub fn prune_finished(&self) -> usize {
        let mut sessions = self.lock();
        let before = sessions.len();
        sessions.retain(|_, s| s.running());
        before - sessions.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, ProcessSession>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

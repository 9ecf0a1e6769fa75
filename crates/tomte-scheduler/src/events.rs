// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// How many events the buffer retains; older entries are evicted first.
const CAPACITY: usize = 20;

/// What produced a system event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SystemEventKind {
    /// A cron job fired.
    Cron,
    /// A background command finished.
    Exec,
    /// Anything else worth telling the agent about.
    System,
}

/// An asynchronous signal that steers the next heartbeat prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemEvent {
    pub kind: SystemEventKind,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

/// Process-wide bounded FIFO of [`SystemEvent`]s.
///
/// All mutations are mutually exclusive; a drain is one atomic
/// snapshot-and-clear, so two drains with nothing in between always
/// yield the full list and then nothing.
#[derive(Debug, Default)]
pub struct SystemEvents {
    queue: Mutex<VecDeque<SystemEvent>>,
}

impl SystemEvents {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event, evicting the oldest entry at capacity.
    pub fn enqueue(&self, text: impl Into<String>, kind: SystemEventKind) {
        let event = SystemEvent {
            kind,
            text: text.into(),
            timestamp: Utc::now(),
        };
        let mut queue = self.lock();
        if queue.len() >= CAPACITY {
            let dropped = queue.pop_front();
            debug!(?dropped, "system-event buffer full, evicting oldest");
        }
        queue.push_back(event);
    }

    /// Return all buffered events in insertion order and clear the buffer.
    pub fn drain(&self) -> Vec<SystemEvent> {
        self.lock().drain(..).collect()
    }

    /// Empty the buffer without returning anything.
    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<SystemEvent>> {
        self.queue.lock().unwrap_or_else(|e| e.into_inner())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

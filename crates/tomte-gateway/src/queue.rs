// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::VecDeque;
use std::sync::Mutex;

use serde_json::Value;
use tokio::sync::Notify;
use tomte_store::SessionKey;
use tracing::debug;

/// Source tag of synthetic heartbeat messages.
pub const HEARTBEAT_SOURCE: &str = "heartbeat";
/// Source tag of synthetic cron messages.
pub const CRON_SOURCE: &str = "cron";

/// Unit of work in the dispatch queue.
#[derive(Debug, Clone, PartialEq)]
pub struct AdapterMessage {
    /// Origin transport name, or `"heartbeat"` / `"cron"` for synthetic
    /// messages.
    pub source: String,
    /// Routing address on that transport; also the session-key suffix.
    pub source_id: String,
    pub text: String,
    /// Transport-private extras (e.g. a thread id).
    pub metadata: Option<Value>,
}

impl AdapterMessage {
    pub fn new(
        source: impl Into<String>,
        source_id: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            source_id: source_id.into(),
            text: text.into(),
            metadata: None,
        }
    }

    pub fn heartbeat(text: impl Into<String>) -> Self {
        Self::new(HEARTBEAT_SOURCE, "tick", text)
    }

    pub fn cron(text: impl Into<String>) -> Self {
        Self::new(CRON_SOURCE, "job", text)
    }

    /// True for heartbeat/cron messages that have no transport of their
    /// own and are delivered by policy instead.
    pub fn is_synthetic(&self) -> bool {
        self.source == HEARTBEAT_SOURCE || self.source == CRON_SOURCE
    }

    /// The conversation this message belongs to.  A `thread_id` string in
    /// the metadata becomes the optional third key part.
    pub fn session_key(&self) -> SessionKey {
        let thread = self
            .metadata
            .as_ref()
            .and_then(|m| m.get("thread_id"))
            .and_then(|t| t.as_str());
        SessionKey::resolve(&self.source, &self.source_id, thread)
    }
}

/// Whether an enqueue was accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnqueueResult {
    pub accepted: bool,
    pub reason: Option<String>,
}

impl EnqueueResult {
    fn accepted() -> Self {
        Self {
            accepted: true,
            reason: None,
        }
    }

    fn rejected(reason: &str) -> Self {
        Self {
            accepted: false,
            reason: Some(reason.to_string()),
        }
    }
}

/// Bounded in-memory FIFO feeding the single-consumer dispatch loop.
///
/// `enqueue` is synchronous, non-blocking, and thread-safe; when the
/// queue is full the message is rejected, never dropped silently and
/// never blocking the transport.  Contents are lost on restart by
/// design.
#[derive(Debug)]
pub struct MessageQueue {
    messages: Mutex<VecDeque<AdapterMessage>>,
    max_size: usize,
    notify: Notify,
}

impl MessageQueue {
    pub fn new(max_size: usize) -> Self {
        Self {
            messages: Mutex::new(VecDeque::new()),
            max_size,
            notify: Notify::new(),
        }
    }

    /// Append a message and wake the consumer.
    pub fn enqueue(&self, message: AdapterMessage) -> EnqueueResult {
        {
            let mut messages = self.lock();
            if messages.len() >= self.max_size {
                debug!(source = %message.source, "queue full, rejecting message");
                return EnqueueResult::rejected("Queue full");
            }
            messages.push_back(message);
        }
        self.notify.notify_one();
        EnqueueResult::accepted()
    }

    /// Take the head of the queue, if any.
    pub fn pop(&self) -> Option<AdapterMessage> {
        self.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Park until `wake` is called or a message is enqueued.
    pub async fn wait(&self) {
        self.notify.notified().await;
    }

    /// Wake the consumer without enqueueing (used by shutdown).
    pub fn wake(&self) {
        self.notify.notify_one();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<AdapterMessage>> {
        self.messages.lock().unwrap_or_else(|e| e.into_inner())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enqueue_accepts_under_bound() {
        let q = MessageQueue::new(2);
        assert!(q.enqueue(AdapterMessage::new("cli", "u", "a")).accepted);
        assert!(q.enqueue(AdapterMessage::new("cli", "u", "b")).accepted);
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn enqueue_past_bound_is_rejected() {
        let q = MessageQueue::new(2);
        q.enqueue(AdapterMessage::new("cli", "u", "a"));
        q.enqueue(AdapterMessage::new("cli", "u", "b"));

        let third = q.enqueue(AdapterMessage::new("cli", "u", "c"));
        assert!(!third.accepted);
        assert_eq!(third.reason.as_deref(), Some("Queue full"));
        assert_eq!(q.len(), 2, "rejected message must not be stored");
    }

    #[test]
    fn pop_is_fifo_across_sources() {
        let q = MessageQueue::new(10);
        q.enqueue(AdapterMessage::new("telegram", "a", "1"));
        q.enqueue(AdapterMessage::new("slack", "b", "2"));
        q.enqueue(AdapterMessage::new("telegram", "a", "3"));

        assert_eq!(q.pop().unwrap().text, "1");
        assert_eq!(q.pop().unwrap().text, "2");
        assert_eq!(q.pop().unwrap().text, "3");
        assert!(q.pop().is_none());
    }

    #[test]
    fn rejected_then_drained_queue_accepts_again() {
        let q = MessageQueue::new(1);
        q.enqueue(AdapterMessage::new("cli", "u", "a"));
        assert!(!q.enqueue(AdapterMessage::new("cli", "u", "b")).accepted);
        q.pop();
        assert!(q.enqueue(AdapterMessage::new("cli", "u", "c")).accepted);
    }

    #[tokio::test]
    async fn enqueue_wakes_a_parked_waiter() {
        use std::sync::Arc;
        let q = Arc::new(MessageQueue::new(4));
        let waiter = {
            let q = q.clone();
            tokio::spawn(async move {
                q.wait().await;
                q.pop()
            })
        };
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        q.enqueue(AdapterMessage::new("cli", "u", "wake up"));

        let popped = tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
            .await
            .expect("waiter must wake")
            .unwrap();
        assert_eq!(popped.unwrap().text, "wake up");
    }

    #[test]
    fn session_key_uses_thread_id_metadata() {
        let mut msg = AdapterMessage::new("slack", "C42", "hi");
        msg.metadata = Some(serde_json::json!({ "thread_id": "1700.5" }));
        assert_eq!(msg.session_key().as_str(), "slack--C42--1700.5");

        let plain = AdapterMessage::new("slack", "C42", "hi");
        assert_eq!(plain.session_key().as_str(), "slack--C42");
    }

    #[test]
    fn synthetic_sources_are_flagged() {
        assert!(AdapterMessage::heartbeat("tick").is_synthetic());
        assert!(AdapterMessage::cron("fire").is_synthetic());
        assert!(!AdapterMessage::new("telegram", "u", "t").is_synthetic());
    }
}

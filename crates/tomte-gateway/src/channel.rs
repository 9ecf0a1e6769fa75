// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

/// A chat transport as the dispatch core sees it.
///
/// Concrete bindings (Telegram, Slack, a local REPL) implement this;
/// the core only ever routes by name and calls `send_response`.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Routing name; must be unique among registered channels and must
    /// not contain `--` (it prefixes session keys).
    fn name(&self) -> &str;

    async fn start(&self) -> anyhow::Result<()>;

    async fn stop(&self);

    /// Deliver a finished reply to `source_id` on this transport.
    async fn send_response(&self, source_id: &str, text: &str) -> anyhow::Result<()>;

    /// Editable-message support.  Returning `Some` opts this channel into
    /// the streaming path with live processing updates.
    fn progress(&self) -> Option<&dyn ProgressChannel> {
        None
    }
}

/// Optional channel capability: a status message that can be created
/// once and edited in place while a turn runs.
#[async_trait]
pub trait ProgressChannel: Send + Sync {
    /// Post the initial processing message; returns its id for updates.
    async fn create_processing_message(
        &self,
        source_id: &str,
        text: &str,
        metadata: &Value,
    ) -> anyhow::Result<String>;

    /// Edit a previously created processing message.
    async fn update_processing_message(
        &self,
        source_id: &str,
        message_id: &str,
        text: &str,
        metadata: &Value,
    ) -> anyhow::Result<()>;
}

// ─── Mock channel ─────────────────────────────────────────────────────────────

/// Test double that records everything sent through it.
#[derive(Debug)]
pub struct MockChannel {
    name: String,
    streaming: bool,
    pub sent: Mutex<Vec<(String, String)>>,
    pub processing: Mutex<Vec<(String, String)>>,
}

impl MockChannel {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            streaming: false,
            sent: Mutex::new(Vec::new()),
            processing: Mutex::new(Vec::new()),
        }
    }

    /// A mock that also advertises processing-message support.
    pub fn streaming(name: impl Into<String>) -> Self {
        Self {
            streaming: true,
            ..Self::new(name)
        }
    }

    pub fn sent_texts(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, text)| text.clone())
            .collect()
    }

    pub fn processing_updates(&self) -> Vec<String> {
        self.processing
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, text)| text.clone())
            .collect()
    }
}

#[async_trait]
impl Channel for MockChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn start(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn stop(&self) {}

    async fn send_response(&self, source_id: &str, text: &str) -> anyhow::Result<()> {
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((source_id.to_string(), text.to_string()));
        Ok(())
    }

    fn progress(&self) -> Option<&dyn ProgressChannel> {
        if self.streaming {
            Some(self)
        } else {
            None
        }
    }
}

#[async_trait]
impl ProgressChannel for MockChannel {
    async fn create_processing_message(
        &self,
        source_id: &str,
        text: &str,
        _metadata: &Value,
    ) -> anyhow::Result<String> {
        let mut processing = self.processing.lock().unwrap_or_else(|e| e.into_inner());
        processing.push((source_id.to_string(), text.to_string()));
        Ok(format!("msg-{}", processing.len()))
    }

    async fn update_processing_message(
        &self,
        source_id: &str,
        _message_id: &str,
        text: &str,
        _metadata: &Value,
    ) -> anyhow::Result<()> {
        self.processing
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((source_id.to_string(), text.to_string()));
        Ok(())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_records_sent_messages() {
        let ch = MockChannel::new("test");
        ch.send_response("u1", "hello").await.unwrap();
        ch.send_response("u2", "again").await.unwrap();
        assert_eq!(ch.sent_texts(), vec!["hello", "again"]);
    }

    #[test]
    fn plain_mock_has_no_progress_capability() {
        assert!(MockChannel::new("plain").progress().is_none());
    }

    #[test]
    fn streaming_mock_advertises_progress() {
        assert!(MockChannel::streaming("rich").progress().is_some());
    }

    #[tokio::test]
    async fn processing_messages_are_recorded_in_order() {
        let ch = MockChannel::streaming("rich");
        let progress = ch.progress().unwrap();
        let id = progress
            .create_processing_message("u1", "working...", &Value::Null)
            .await
            .unwrap();
        progress
            .update_processing_message("u1", &id, "still working...", &Value::Null)
            .await
            .unwrap();
        assert_eq!(
            ch.processing_updates(),
            vec!["working...", "still working..."]
        );
    }
}

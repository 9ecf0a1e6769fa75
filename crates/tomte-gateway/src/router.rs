// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::{error, warn};

use crate::channel::Channel;

/// Name → transport table used to deliver replies.
///
/// Channels are registered before the dispatch loop starts; the map is
/// read-mostly afterwards.  Routing to an unknown source drops the
/// message with a warning.
#[derive(Default)]
pub struct Router {
    channels: RwLock<HashMap<String, Arc<dyn Channel>>>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, channel: Arc<dyn Channel>) {
        let name = channel.name().to_string();
        self.write().insert(name, channel);
    }

    pub fn unregister(&self, name: &str) {
        self.write().remove(name);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Channel>> {
        self.read().get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Deliver `text` to `source_id` on the channel named `source`.
    pub async fn route(&self, source: &str, source_id: &str, text: &str) {
        let Some(channel) = self.get(source) else {
            warn!(source, "no channel registered for reply, dropping");
            return;
        };
        if let Err(e) = channel.send_response(source_id, text).await {
            error!(source, error = %e, "channel failed to deliver reply");
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Arc<dyn Channel>>> {
        self.channels.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Arc<dyn Channel>>> {
        self.channels.write().unwrap_or_else(|e| e.into_inner())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::MockChannel;

    #[tokio::test]
    async fn routes_to_the_named_channel() {
        let router = Router::new();
        let telegram = Arc::new(MockChannel::new("telegram"));
        let slack = Arc::new(MockChannel::new("slack"));
        router.register(telegram.clone());
        router.register(slack.clone());

        router.route("telegram", "u1", "for telegram").await;
        router.route("slack", "c1", "for slack").await;

        assert_eq!(telegram.sent_texts(), vec!["for telegram"]);
        assert_eq!(slack.sent_texts(), vec!["for slack"]);
    }

    #[tokio::test]
    async fn unknown_source_is_dropped_quietly() {
        let router = Router::new();
        router.route("nowhere", "u1", "lost").await;
    }

    #[tokio::test]
    async fn unregister_removes_the_channel() {
        let router = Router::new();
        let ch = Arc::new(MockChannel::new("cli"));
        router.register(ch.clone());
        router.unregister("cli");

        router.route("cli", "u1", "late").await;
        assert!(ch.sent_texts().is_empty());
    }

    #[test]
    fn names_are_sorted() {
        let router = Router::new();
        router.register(Arc::new(MockChannel::new("zulip")));
        router.register(Arc::new(MockChannel::new("cli")));
        assert_eq!(router.names(), vec!["cli", "zulip"]);
    }

    #[test]
    fn reregistering_replaces() {
        let router = Router::new();
        router.register(Arc::new(MockChannel::new("cli")));
        router.register(Arc::new(MockChannel::new("cli")));
        assert_eq!(router.names().len(), 1);
    }
}

// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tomte_agent::AgentRunner;
use tomte_config::Config;
use tomte_scheduler::is_heartbeat_ok;
use tracing::{debug, error, info, warn};

use crate::progress::ProgressAccumulator;
use crate::queue::{AdapterMessage, MessageQueue, HEARTBEAT_SOURCE};
use crate::router::Router;

const CLEARED_REPLY: &str = "Conversation cleared. Starting fresh.";
const EMPTY_REPLY_FALLBACK: &str =
    "I didn't produce a response for that — could you rephrase or try again?";
const ERROR_REPLY: &str = "Sorry, something went wrong while handling your message.";
const PARTIAL_NOTICE: &str =
    "\n\n[The connection dropped before the response finished; this may be incomplete.]";

/// Where a reply should be delivered.
struct RouteTarget {
    channel: String,
    source_id: String,
}

/// Tracks the most recent real (non-synthetic) traffic so heartbeat and
/// cron replies can follow the user to wherever they last were.
#[derive(Default)]
struct LastSeen {
    adapter: Option<String>,
    source_by_adapter: HashMap<String, String>,
}

/// The single-consumer dispatch loop.
///
/// At most one `process` runs at any instant; transports, timers, and
/// background hooks only ever touch the queue.  Every per-message
/// failure is caught, logged, and answered with a generic apology; the
/// loop itself never dies.
pub struct Dispatcher {
    queue: Arc<MessageQueue>,
    router: Arc<Router>,
    runner: Arc<AgentRunner>,
    config: Arc<Config>,
    running: AtomicBool,
    last_seen: Mutex<LastSeen>,
}

impl Dispatcher {
    pub fn new(
        queue: Arc<MessageQueue>,
        router: Arc<Router>,
        runner: Arc<AgentRunner>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            queue,
            router,
            runner,
            config,
            running: AtomicBool::new(true),
            last_seen: Mutex::new(LastSeen::default()),
        }
    }

    /// Run until [`stop`](Self::stop).  Suspends while the queue is
    /// empty; an in-flight turn always finishes before the loop exits.
    pub async fn run(&self) {
        info!("dispatch loop started");
        while self.running.load(Ordering::Relaxed) {
            match self.queue.pop() {
                Some(message) => self.process(message).await,
                None => self.queue.wait().await,
            }
        }
        info!("dispatch loop stopped");
    }

    /// Signal the loop to exit after the current turn.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
        self.queue.wake();
    }

    /// Handle one message end to end: session resolution, agent turn,
    /// reply routing.
    pub async fn process(&self, message: AdapterMessage) {
        if !message.is_synthetic() {
            let mut seen = self.lock_seen();
            seen.adapter = Some(message.source.clone());
            seen.source_by_adapter
                .insert(message.source.clone(), message.source_id.clone());
        }

        let session_key = message.session_key();
        debug!(session = %session_key, source = %message.source, "processing message");

        // `/clear` never reaches the model.
        if message.text.trim() == "/clear" {
            self.runner.clear_session(&session_key);
            self.router
                .route(&message.source, &message.source_id, CLEARED_REPLY)
                .await;
            return;
        }

        let Some(target) = self.resolve_target(&message) else {
            warn!(source = %message.source, "no route for reply, dropping message");
            return;
        };

        let streaming = self
            .router
            .get(&target.channel)
            .is_some_and(|c| c.progress().is_some());

        let outcome = if streaming {
            self.run_streaming_turn(&message, &session_key, &target).await
        } else {
            self.runner
                .run_turn(&message.text, &session_key, None)
                .await
                .map(|o| (o.response, o.partial))
        };

        let reply = match outcome {
            Ok((response, partial)) => {
                if message.source == HEARTBEAT_SOURCE && is_heartbeat_ok(&response) {
                    debug!("suppressing HEARTBEAT_OK reply");
                    return;
                }
                if response.trim().is_empty() {
                    EMPTY_REPLY_FALLBACK.to_string()
                } else if partial {
                    format!("{response}{PARTIAL_NOTICE}")
                } else {
                    response
                }
            }
            Err(e) => {
                error!(session = %session_key, error = %e, "turn failed");
                ERROR_REPLY.to_string()
            }
        };

        self.router
            .route(&target.channel, &target.source_id, &reply)
            .await;
    }

    async fn run_streaming_turn(
        &self,
        message: &AdapterMessage,
        session_key: &tomte_store::SessionKey,
        target: &RouteTarget,
    ) -> anyhow::Result<(String, bool)> {
        let channel = self
            .router
            .get(&target.channel)
            .ok_or_else(|| anyhow::anyhow!("channel '{}' vanished", target.channel))?;

        let accumulator = ProgressAccumulator::new(
            channel,
            target.source_id.clone(),
            message.metadata.clone(),
            self.config.gateway.processing_update_interval_ms,
        );
        let (tx, rx) = mpsc::unbounded_channel();
        let display = tokio::spawn(async move { accumulator.run(rx).await });

        let outcome = self
            .runner
            .run_turn(&message.text, session_key, Some(tx))
            .await;
        let streamed_text = display.await.unwrap_or_default();

        let outcome = outcome?;
        let response = if streamed_text.trim().is_empty() {
            outcome.response
        } else {
            streamed_text
        };
        Ok((response, outcome.partial))
    }

    /// Resolve where the reply goes.  Real messages answer on their own
    /// transport; synthetic heartbeat/cron messages follow the
    /// `deliver_to` policy and are dropped when no target resolves yet.
    fn resolve_target(&self, message: &AdapterMessage) -> Option<RouteTarget> {
        if !message.is_synthetic() {
            return Some(RouteTarget {
                channel: message.source.clone(),
                source_id: message.source_id.clone(),
            });
        }

        let seen = self.lock_seen();
        let channel = match self.config.heartbeat.deliver_to.as_str() {
            "last" => seen.adapter.clone()?,
            name => name.to_string(),
        };
        let source_id = seen.source_by_adapter.get(&channel).cloned()?;
        Some(RouteTarget { channel, source_id })
    }

    fn lock_seen(&self) -> std::sync::MutexGuard<'_, LastSeen> {
        self.last_seen.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Startup check: `heartbeat.deliver_to` must be `"last"` or the name
/// of a registered channel.
pub fn validate_heartbeat_target(config: &Config, router: &Router) -> anyhow::Result<()> {
    let target = config.heartbeat.deliver_to.as_str();
    if target == "last" || router.get(target).is_some() {
        return Ok(());
    }
    anyhow::bail!(
        "heartbeat.deliver_to is '{target}' but no such channel is registered \
         (registered: {})",
        router.names().join(", ")
    )
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

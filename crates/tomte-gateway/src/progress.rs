// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::warn;

use crate::channel::Channel;
use tomte_agent::StreamEvent;

/// Display cap for one processing message; older content scrolls off
/// the top.
const CONTENT_CAP: usize = 4000;
const TRUNCATION_MARKER: &str = "[...earlier output truncated...]";

/// Buffers a turn's stream events into a periodically edited
/// processing message on the originating channel.
///
/// Nothing is posted until the turn shows tool activity; a turn that is
/// pure text never creates a status message.  The first flush creates
/// the message; later flushes edit it in place.  Flushes are mutually
/// exclusive and skipped entirely while nothing changed.
pub struct ProgressAccumulator {
    channel: Arc<dyn Channel>,
    source_id: String,
    metadata: Value,
    interval: Duration,
}

#[derive(Default)]
struct State {
    /// Human-readable activity lines, append-only.
    lines: Vec<String>,
    /// Tool call id → (tool name, index into `lines`).
    tools: HashMap<String, (String, usize)>,
    saw_tool: bool,
    dirty: bool,
    flushing: bool,
    message_id: Option<String>,
    /// Assistant text seen since the last tool call; the final reply of
    /// a streamed turn.
    text_after_tools: String,
}

impl ProgressAccumulator {
    pub fn new(
        channel: Arc<dyn Channel>,
        source_id: impl Into<String>,
        metadata: Option<Value>,
        interval_ms: u64,
    ) -> Self {
        Self {
            channel,
            source_id: source_id.into(),
            metadata: metadata.unwrap_or(Value::Null),
            interval: Duration::from_millis(interval_ms.max(1)),
        }
    }

    /// Consume the event stream until it closes; returns the text the
    /// model produced after its last tool call.
    pub async fn run(&self, mut events: mpsc::UnboundedReceiver<StreamEvent>) -> String {
        let mut state = State::default();
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        ticker.tick().await; // the immediate first tick

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => absorb(&mut state, event),
                    None => break,
                },
                _ = ticker.tick() => self.flush(&mut state).await,
            }
        }
        // one last update so the message reflects the completed activity
        self.flush(&mut state).await;
        state.text_after_tools
    }

    async fn flush(&self, state: &mut State) {
        if !state.saw_tool || !state.dirty || state.flushing {
            return;
        }
        let Some(progress) = self.channel.progress() else {
            return;
        };
        state.flushing = true;
        state.dirty = false;
        let content = clip_content(&state.lines.join("\n"));

        let result = match &state.message_id {
            None => match progress
                .create_processing_message(&self.source_id, &content, &self.metadata)
                .await
            {
                Ok(id) => {
                    state.message_id = Some(id);
                    Ok(())
                }
                Err(e) => Err(e),
            },
            Some(id) => {
                progress
                    .update_processing_message(&self.source_id, id, &content, &self.metadata)
                    .await
            }
        };
        if let Err(e) = result {
            warn!(channel = self.channel.name(), error = %e, "processing update failed");
        }
        state.flushing = false;
    }
}

fn absorb(state: &mut State, event: StreamEvent) {
    match event {
        StreamEvent::TextDelta { text } => {
            state.text_after_tools.push_str(&text);
        }
        StreamEvent::Assistant { content } => {
            state.text_after_tools.push_str(&assistant_text(&content));
        }
        StreamEvent::ToolStart { id, name } => {
            state.saw_tool = true;
            state.dirty = true;
            state.text_after_tools.clear();
            state.lines.push(format!("⚙ {name} …"));
            state.tools.insert(id, (name, state.lines.len() - 1));
        }
        StreamEvent::ToolInput { id, input } => {
            if let Some((name, index)) = state.tools.get(&id) {
                state.lines[*index] = format!("⚙ {name}({})", summarize_input(&input));
                state.dirty = true;
            }
        }
        StreamEvent::ToolProgress { id, elapsed_secs } => {
            if let Some((name, index)) = state.tools.get(&id) {
                let base = state.lines[*index]
                    .split(" — elapsed")
                    .next()
                    .unwrap_or(name)
                    .to_string();
                state.lines[*index] = format!("{base} — elapsed {elapsed_secs}s");
                state.dirty = true;
            }
        }
        StreamEvent::SessionStarted { .. }
        | StreamEvent::Result { .. }
        | StreamEvent::Error { .. } => {}
    }
}

/// Text of an assistant content-block list (string blocks and
/// `{"type":"text"}` objects).
fn assistant_text(content: &Value) -> String {
    match content {
        Value::String(s) => s.clone(),
        Value::Array(blocks) => blocks
            .iter()
            .filter_map(|b| match b {
                Value::String(s) => Some(s.as_str()),
                Value::Object(o) if o.get("type").and_then(|t| t.as_str()) == Some("text") => {
                    o.get("text").and_then(|t| t.as_str())
                }
                _ => None,
            })
            .collect::<Vec<_>>()
            .join(""),
        _ => String::new(),
    }
}

/// Compact one-line rendering of a tool's input for the status display.
fn summarize_input(input: &Value) -> String {
    let rendered = match input {
        Value::Object(o) => o
            .iter()
            .map(|(k, v)| format!("{k}: {}", terse(v)))
            .collect::<Vec<_>>()
            .join(", "),
        other => terse(other),
    };
    if rendered.chars().count() > 120 {
        let clipped: String = rendered.chars().take(120).collect();
        format!("{clipped}…")
    } else {
        rendered
    }
}

fn terse(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Keep the freshest tail of over-long content, marking the cut.
fn clip_content(content: &str) -> String {
    if content.chars().count() <= CONTENT_CAP {
        return content.to_string();
    }
    let keep = CONTENT_CAP - TRUNCATION_MARKER.chars().count() - 1;
    let tail: String = content
        .chars()
        .skip(content.chars().count() - keep)
        .collect();
    format!("{TRUNCATION_MARKER}\n{tail}")
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::MockChannel;
    use serde_json::json;

    fn accumulator(channel: Arc<MockChannel>) -> ProgressAccumulator {
        ProgressAccumulator::new(channel, "u1", None, 10)
    }

    async fn drive(events: Vec<StreamEvent>, channel: Arc<MockChannel>) -> String {
        let acc = accumulator(channel);
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(async move { acc.run(rx).await });
        for event in events {
            tx.send(event).unwrap();
            tokio::time::sleep(Duration::from_millis(15)).await;
        }
        drop(tx);
        task.await.unwrap()
    }

    #[tokio::test]
    async fn text_only_turn_never_posts() {
        let channel = Arc::new(MockChannel::streaming("rich"));
        let final_text = drive(
            vec![
                StreamEvent::TextDelta { text: "thinking ".into() },
                StreamEvent::TextDelta { text: "aloud".into() },
            ],
            channel.clone(),
        )
        .await;
        assert!(channel.processing_updates().is_empty());
        assert_eq!(final_text, "thinking aloud");
    }

    #[tokio::test]
    async fn tool_activity_creates_then_updates() {
        let channel = Arc::new(MockChannel::streaming("rich"));
        drive(
            vec![
                StreamEvent::ToolStart { id: "t1".into(), name: "shell".into() },
                StreamEvent::ToolStart { id: "t2".into(), name: "read_file".into() },
            ],
            channel.clone(),
        )
        .await;

        let updates = channel.processing_updates();
        assert!(!updates.is_empty());
        assert!(updates[0].contains("shell"));
        assert!(updates.last().unwrap().contains("read_file"));
    }

    #[tokio::test]
    async fn tool_input_replaces_the_tentative_line() {
        let channel = Arc::new(MockChannel::streaming("rich"));
        drive(
            vec![
                StreamEvent::ToolStart { id: "t1".into(), name: "shell".into() },
                StreamEvent::ToolInput {
                    id: "t1".into(),
                    input: json!({ "command": "cargo test" }),
                },
            ],
            channel.clone(),
        )
        .await;

        let last = channel.processing_updates().pop().unwrap();
        assert!(last.contains("cargo test"));
        assert!(!last.contains('…'), "tentative marker replaced: {last}");
    }

    #[tokio::test]
    async fn tool_progress_attaches_elapsed_tail() {
        let channel = Arc::new(MockChannel::streaming("rich"));
        drive(
            vec![
                StreamEvent::ToolStart { id: "t1".into(), name: "shell".into() },
                StreamEvent::ToolProgress { id: "t1".into(), elapsed_secs: 7 },
            ],
            channel.clone(),
        )
        .await;

        let last = channel.processing_updates().pop().unwrap();
        assert!(last.contains("elapsed 7s"), "{last}");
    }

    #[tokio::test]
    async fn final_reply_is_text_after_the_last_tool() {
        let channel = Arc::new(MockChannel::streaming("rich"));
        let final_text = drive(
            vec![
                StreamEvent::TextDelta { text: "let me check".into() },
                StreamEvent::ToolStart { id: "t1".into(), name: "shell".into() },
                StreamEvent::TextDelta { text: "all done".into() },
            ],
            channel.clone(),
        )
        .await;
        assert_eq!(final_text, "all done", "pre-tool text is not the reply");
    }

    #[test]
    fn over_long_content_is_clipped_from_the_head() {
        let clipped = clip_content(&"x".repeat(6000));
        assert!(clipped.starts_with(TRUNCATION_MARKER));
        assert!(clipped.chars().count() <= CONTENT_CAP);
    }

    #[test]
    fn short_content_is_untouched() {
        assert_eq!(clip_content("short"), "short");
    }

    #[tokio::test]
    async fn plain_channel_accumulates_but_never_posts() {
        let channel = Arc::new(MockChannel::new("plain"));
        let final_text = drive(
            vec![
                StreamEvent::ToolStart { id: "t1".into(), name: "shell".into() },
                StreamEvent::TextDelta { text: "done".into() },
            ],
            channel.clone(),
        )
        .await;
        assert!(channel.processing_updates().is_empty());
        assert_eq!(final_text, "done");
    }
}

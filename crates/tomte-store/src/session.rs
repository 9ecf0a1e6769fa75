// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tomte_config::SessionConfig;
use tracing::info;

use crate::transcript::{
    load_transcript, rewrite_transcript, CompactionEntry, Role, SessionMessage, TranscriptLine,
};

/// Tool results longer than this are clipped when loaded as history.
const TOOL_RESULT_HISTORY_CAP: usize = 500;
const TRUNCATION_SUFFIX: &str = "... [truncated]";

/// Deterministic name of one conversation: `source--sourceId[--threadId]`.
///
/// The literal `--` separator is part of the on-disk contract (transcript
/// file names), so a source tag must not itself contain `--`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionKey(String);

impl SessionKey {
    pub fn resolve(source: &str, source_id: &str, thread_id: Option<&str>) -> Self {
        let mut parts = vec![source, source_id];
        if let Some(t) = thread_id.filter(|t| !t.is_empty()) {
            parts.push(t);
        }
        Self(
            parts
                .into_iter()
                .filter(|p| !p.is_empty())
                .collect::<Vec<_>>()
                .join("--"),
        )
    }

    /// The source tag this key was built from (prefix before the first `--`).
    pub fn source_tag(&self) -> &str {
        self.0.split("--").next().unwrap_or(&self.0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Transcript location for this session under `sessions_dir`.
    pub fn transcript_path(&self, sessions_dir: &Path) -> PathBuf {
        sessions_dir.join(format!("{}.jsonl", self.0))
    }
}

impl std::fmt::Display for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// ─── History ─────────────────────────────────────────────────────────────────

/// Load the turn context for a session: the transcript without compaction
/// markers, sanitized, clipped to the configured history window.
pub fn load_history(
    sessions_dir: &Path,
    key: &SessionKey,
    config: &SessionConfig,
) -> Vec<SessionMessage> {
    let mut messages: Vec<SessionMessage> = load_transcript(&key.transcript_path(sessions_dir))
        .into_iter()
        .filter_map(|line| match line {
            TranscriptLine::Message(m) => Some(sanitize(m)),
            TranscriptLine::Compaction(_) => None,
        })
        .collect();

    if messages.len() > config.max_history_messages {
        messages.drain(..messages.len() - config.max_history_messages);
    }
    messages
}

/// Clip oversized tool results so one verbose command cannot crowd the
/// model's context window.
fn sanitize(mut message: SessionMessage) -> SessionMessage {
    if message.role == Role::ToolResult && message.content.chars().count() > TOOL_RESULT_HISTORY_CAP
    {
        let clipped: String = message.content.chars().take(TOOL_RESULT_HISTORY_CAP).collect();
        message.content = format!("{clipped}{TRUNCATION_SUFFIX}");
    }
    message
}

/// Persist one completed turn.
pub fn save_interaction(
    sessions_dir: &Path,
    key: &SessionKey,
    messages: &[SessionMessage],
) -> anyhow::Result<()> {
    crate::transcript::append_messages(&key.transcript_path(sessions_dir), messages)
}

// ─── Compaction ──────────────────────────────────────────────────────────────

/// Result of a compaction attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompactionOutcome {
    pub compacted: bool,
    pub messages_before: usize,
    pub messages_after: usize,
}

/// Trim the transcript at `path` down to its last `threshold` messages
/// when it has grown beyond them.
///
/// The trimmed file keeps the surviving messages in their original order
/// and gains one fresh compaction marker; the pre-compaction file is
/// preserved as `.bak` by the rewrite.
pub fn compact_if_needed(path: &Path, threshold: usize) -> anyhow::Result<CompactionOutcome> {
    let lines = load_transcript(path);
    let messages: Vec<SessionMessage> = lines
        .into_iter()
        .filter_map(|l| match l {
            TranscriptLine::Message(m) => Some(m),
            TranscriptLine::Compaction(_) => None,
        })
        .collect();

    let before = messages.len();
    if before <= threshold {
        return Ok(CompactionOutcome {
            compacted: false,
            messages_before: before,
            messages_after: before,
        });
    }

    let kept = &messages[before - threshold..];
    let mut new_lines: Vec<TranscriptLine> = kept
        .iter()
        .cloned()
        .map(TranscriptLine::Message)
        .collect();
    new_lines.push(TranscriptLine::Compaction(CompactionEntry::new(
        before, threshold,
    )));
    rewrite_transcript(path, &new_lines)?;

    info!(
        path = %path.display(),
        before,
        after = threshold,
        "compacted transcript"
    );
    Ok(CompactionOutcome {
        compacted: true,
        messages_before: before,
        messages_after: threshold,
    })
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::io::Write;
use std::path::Path;

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Who produced a transcript entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    ToolUse,
    ToolResult,
}

/// One persisted turn entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMessage {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SessionMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
            tool_name: None,
            error: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// Serde guard that pins the `type` field of a compaction line to the
/// literal string `"compaction"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompactionMarker {
    #[serde(rename = "compaction")]
    Compaction,
}

/// In-band marker recording that the transcript was trimmed in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompactionEntry {
    #[serde(rename = "type")]
    pub marker: CompactionMarker,
    pub timestamp: DateTime<Utc>,
    pub messages_before: usize,
    pub messages_after: usize,
}

impl CompactionEntry {
    pub fn new(messages_before: usize, messages_after: usize) -> Self {
        Self {
            marker: CompactionMarker::Compaction,
            timestamp: Utc::now(),
            messages_before,
            messages_after,
        }
    }
}

/// One line of a transcript file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TranscriptLine {
    Compaction(CompactionEntry),
    Message(SessionMessage),
}

impl TranscriptLine {
    pub fn as_message(&self) -> Option<&SessionMessage> {
        match self {
            TranscriptLine::Message(m) => Some(m),
            TranscriptLine::Compaction(_) => None,
        }
    }
}

// ─── Append ──────────────────────────────────────────────────────────────────

/// Append a single message to the transcript at `path`.
pub fn append_message(path: &Path, message: &SessionMessage) -> anyhow::Result<()> {
    append_messages(path, std::slice::from_ref(message))
}

/// Append all of a turn's messages with one write, creating parent
/// directories as needed.
///
/// The lines are serialized into one buffer and handed to a single
/// `write_all`, so a concurrent reader sees either none or all of them.
pub fn append_messages(path: &Path, messages: &[SessionMessage]) -> anyhow::Result<()> {
    if messages.is_empty() {
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }

    let mut buf = String::new();
    for m in messages {
        buf.push_str(&serde_json::to_string(m).context("serializing transcript line")?);
        buf.push('\n');
    }

    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("opening {}", path.display()))?;
    file.write_all(buf.as_bytes())
        .with_context(|| format!("appending to {}", path.display()))?;
    Ok(())
}

// ─── Load ────────────────────────────────────────────────────────────────────

/// Read every line of the transcript at `path`.
///
/// A missing file is an empty transcript.  Empty lines are skipped
/// silently; lines that fail to parse are skipped with a warning so one
/// corrupt entry never poisons the session.
pub fn load_transcript(path: &Path) -> Vec<TranscriptLine> {
    let text = match std::fs::read_to_string(path) {
        Ok(t) => t,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "could not read transcript");
            return Vec::new();
        }
    };

    let mut lines = Vec::new();
    for (n, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<TranscriptLine>(line) {
            Ok(parsed) => lines.push(parsed),
            Err(e) => {
                warn!(
                    path = %path.display(),
                    line = n + 1,
                    error = %e,
                    "skipping corrupt transcript line"
                );
            }
        }
    }
    lines
}

// ─── Rewrite ─────────────────────────────────────────────────────────────────

/// Replace the transcript at `path` with `lines`, atomically.
///
/// The previous file (if any) is preserved as `<path>.bak`; the new
/// content is written to `<path>.tmp` and renamed into place, so readers
/// never observe a half-written transcript and no `.tmp` survives a
/// successful rewrite.
pub fn rewrite_transcript(path: &Path, lines: &[TranscriptLine]) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }

    if path.exists() {
        let backup = path.with_extension("jsonl.bak");
        std::fs::copy(path, &backup)
            .with_context(|| format!("backing up to {}", backup.display()))?;
    }

    let mut buf = String::new();
    for line in lines {
        buf.push_str(&serde_json::to_string(line).context("serializing transcript line")?);
        buf.push('\n');
    }

    let tmp = path.with_extension("jsonl.tmp");
    std::fs::write(&tmp, buf).with_context(|| format!("writing {}", tmp.display()))?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("renaming {} into place", tmp.display()))?;
    Ok(())
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn transcript_path(tmp: &TempDir) -> std::path::PathBuf {
        tmp.path().join("sessions").join("cli--local.jsonl")
    }

    // ── Round trip ────────────────────────────────────────────────────────────

    #[test]
    fn append_then_load_round_trips() {
        let tmp = TempDir::new().unwrap();
        let path = transcript_path(&tmp);
        let msgs = vec![
            SessionMessage::user("hello"),
            SessionMessage::assistant("hi there"),
        ];
        append_messages(&path, &msgs).unwrap();

        let lines = load_transcript(&path);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].as_message().unwrap().content, "hello");
        assert_eq!(lines[1].as_message().unwrap().content, "hi there");
    }

    #[test]
    fn append_creates_parent_directories() {
        let tmp = TempDir::new().unwrap();
        let path = transcript_path(&tmp);
        append_message(&path, &SessionMessage::user("x")).unwrap();
        assert!(path.is_file());
    }

    #[test]
    fn repeated_appends_preserve_order() {
        let tmp = TempDir::new().unwrap();
        let path = transcript_path(&tmp);
        for i in 0..5 {
            append_message(&path, &SessionMessage::user(format!("m{i}"))).unwrap();
        }
        let lines = load_transcript(&path);
        let contents: Vec<_> = lines
            .iter()
            .filter_map(|l| l.as_message().map(|m| m.content.clone()))
            .collect();
        assert_eq!(contents, vec!["m0", "m1", "m2", "m3", "m4"]);
    }

    // ── Load tolerance ────────────────────────────────────────────────────────

    #[test]
    fn missing_file_is_empty_transcript() {
        let tmp = TempDir::new().unwrap();
        assert!(load_transcript(&transcript_path(&tmp)).is_empty());
    }

    #[test]
    fn empty_and_corrupt_lines_are_skipped() {
        let tmp = TempDir::new().unwrap();
        let path = transcript_path(&tmp);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        let good = serde_json::to_string(&SessionMessage::user("ok")).unwrap();
        std::fs::write(&path, format!("{good}\n\nnot json at all\n{{\"半\":1}}\n{good}\n"))
            .unwrap();

        let lines = load_transcript(&path);
        assert_eq!(lines.len(), 2, "only the two valid lines survive");
    }

    #[test]
    fn partial_trailing_line_is_skipped() {
        let tmp = TempDir::new().unwrap();
        let path = transcript_path(&tmp);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        let good = serde_json::to_string(&SessionMessage::user("ok")).unwrap();
        std::fs::write(&path, format!("{good}\n{{\"role\":\"user\",\"cont")).unwrap();
        assert_eq!(load_transcript(&path).len(), 1);
    }

    // ── Wire format ───────────────────────────────────────────────────────────

    #[test]
    fn message_serializes_with_camel_case_keys() {
        let mut m = SessionMessage::new(Role::ToolResult, "out");
        m.tool_name = Some("shell".into());
        let json = serde_json::to_string(&m).unwrap();
        assert!(json.contains("\"role\":\"tool_result\""));
        assert!(json.contains("\"toolName\":\"shell\""));
        assert!(!json.contains("\"error\""), "absent optionals are omitted");
    }

    #[test]
    fn compaction_line_round_trips() {
        let entry = CompactionEntry::new(120, 50);
        let json = serde_json::to_string(&TranscriptLine::Compaction(entry.clone())).unwrap();
        assert!(json.contains("\"type\":\"compaction\""));
        assert!(json.contains("\"messagesBefore\":120"));

        let parsed: TranscriptLine = serde_json::from_str(&json).unwrap();
        match parsed {
            TranscriptLine::Compaction(c) => assert_eq!(c.messages_after, 50),
            TranscriptLine::Message(_) => panic!("must parse as compaction"),
        }
    }

    #[test]
    fn message_line_does_not_parse_as_compaction() {
        let json = serde_json::to_string(&SessionMessage::user("hi")).unwrap();
        let parsed: TranscriptLine = serde_json::from_str(&json).unwrap();
        assert!(matches!(parsed, TranscriptLine::Message(_)));
    }

    // ── Rewrite ───────────────────────────────────────────────────────────────

    #[test]
    fn rewrite_replaces_content_atomically() {
        let tmp = TempDir::new().unwrap();
        let path = transcript_path(&tmp);
        append_message(&path, &SessionMessage::user("old")).unwrap();

        let new_lines = vec![TranscriptLine::Message(SessionMessage::user("new"))];
        rewrite_transcript(&path, &new_lines).unwrap();

        let lines = load_transcript(&path);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].as_message().unwrap().content, "new");
    }

    #[test]
    fn rewrite_backs_up_previous_file() {
        let tmp = TempDir::new().unwrap();
        let path = transcript_path(&tmp);
        append_message(&path, &SessionMessage::user("original")).unwrap();
        let before = std::fs::read(&path).unwrap();

        rewrite_transcript(&path, &[]).unwrap();

        let backup = path.with_extension("jsonl.bak");
        assert_eq!(
            std::fs::read(&backup).unwrap(),
            before,
            ".bak must equal the pre-rewrite file byte for byte"
        );
    }

    #[test]
    fn rewrite_of_fresh_path_produces_no_backup() {
        let tmp = TempDir::new().unwrap();
        let path = transcript_path(&tmp);
        rewrite_transcript(&path, &[TranscriptLine::Message(SessionMessage::user("x"))])
            .unwrap();
        assert!(!path.with_extension("jsonl.bak").exists());
    }

    #[test]
    fn rewrite_leaves_no_tmp_file() {
        let tmp = TempDir::new().unwrap();
        let path = transcript_path(&tmp);
        append_message(&path, &SessionMessage::user("a")).unwrap();
        rewrite_transcript(&path, &[]).unwrap();
        assert!(!path.with_extension("jsonl.tmp").exists());
    }
}

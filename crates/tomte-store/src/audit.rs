// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::io::Write;
use std::path::Path;

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// What kind of event an audit line records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    Interaction,
    ToolCall,
    Error,
}

/// One line of the day-partitioned audit log.
///
/// The populated optional fields depend on `kind`: interactions carry the
/// user/assistant texts, tool calls the tool name and input, errors the
/// detail string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    #[serde(rename = "type")]
    pub kind: AuditKind,
    pub timestamp: DateTime<Utc>,
    pub source: String,
    pub session_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assistant_response: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_input: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl AuditEntry {
    fn base(kind: AuditKind, source: &str, session_key: &str) -> Self {
        Self {
            kind,
            timestamp: Utc::now(),
            source: source.to_string(),
            session_key: session_key.to_string(),
            user_message: None,
            assistant_response: None,
            tool_name: None,
            tool_input: None,
            detail: None,
        }
    }

    pub fn interaction(
        source: &str,
        session_key: &str,
        user_message: impl Into<String>,
        assistant_response: impl Into<String>,
    ) -> Self {
        Self {
            user_message: Some(user_message.into()),
            assistant_response: Some(assistant_response.into()),
            ..Self::base(AuditKind::Interaction, source, session_key)
        }
    }

    pub fn tool_call(
        source: &str,
        session_key: &str,
        tool_name: impl Into<String>,
        tool_input: serde_json::Value,
    ) -> Self {
        Self {
            tool_name: Some(tool_name.into()),
            tool_input: Some(tool_input),
            ..Self::base(AuditKind::ToolCall, source, session_key)
        }
    }

    pub fn error(source: &str, session_key: &str, detail: impl Into<String>) -> Self {
        Self {
            detail: Some(detail.into()),
            ..Self::base(AuditKind::Error, source, session_key)
        }
    }
}

/// Append one entry to `{workspace}/daily/YYYY-MM-DD.jsonl`, where the
/// date comes from the entry's own timestamp.
pub fn append_audit_entry(workspace_dir: &Path, entry: &AuditEntry) -> anyhow::Result<()> {
    let date = entry.timestamp.format("%Y-%m-%d").to_string();
    let dir = workspace_dir.join("daily");
    std::fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;

    let path = dir.join(format!("{date}.jsonl"));
    let mut line = serde_json::to_string(entry).context("serializing audit entry")?;
    line.push('\n');

    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("opening {}", path.display()))?;
    file.write_all(line.as_bytes())
        .with_context(|| format!("appending to {}", path.display()))?;
    Ok(())
}

/// Read all entries for one `YYYY-MM-DD` date; a missing day is empty.
pub fn read_audit_entries(workspace_dir: &Path, date: &str) -> Vec<AuditEntry> {
    let path = workspace_dir.join("daily").join(format!("{date}.jsonl"));
    let text = match std::fs::read_to_string(&path) {
        Ok(t) => t,
        Err(_) => return Vec::new(),
    };

    text.lines()
        .filter(|l| !l.trim().is_empty())
        .filter_map(|l| match serde_json::from_str(l) {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "skipping corrupt audit line");
                None
            }
        })
        .collect()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn append_then_read_today() {
        let tmp = TempDir::new().unwrap();
        let entry = AuditEntry::interaction("cli", "cli--local", "hi", "hello");
        append_audit_entry(tmp.path(), &entry).unwrap();

        let today = Utc::now().format("%Y-%m-%d").to_string();
        let entries = read_audit_entries(tmp.path(), &today);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].user_message.as_deref(), Some("hi"));
    }

    #[test]
    fn file_is_named_by_entry_date() {
        let tmp = TempDir::new().unwrap();
        let mut entry = AuditEntry::error("cron", "cron--daily", "boom");
        entry.timestamp = "2026-02-03T04:05:06Z".parse().unwrap();
        append_audit_entry(tmp.path(), &entry).unwrap();

        assert!(tmp.path().join("daily/2026-02-03.jsonl").is_file());
        let entries = read_audit_entries(tmp.path(), "2026-02-03");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].detail.as_deref(), Some("boom"));
    }

    #[test]
    fn missing_day_reads_empty() {
        let tmp = TempDir::new().unwrap();
        assert!(read_audit_entries(tmp.path(), "1999-01-01").is_empty());
    }

    #[test]
    fn kind_discriminates_on_disk() {
        let entry = AuditEntry::tool_call(
            "slack",
            "slack--C1",
            "shell",
            serde_json::json!({"command": "ls"}),
        );
        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("\"type\":\"tool_call\""));
        assert!(json.contains("\"sessionKey\":\"slack--C1\""));
        assert!(!json.contains("userMessage"), "unused optionals omitted");
    }

    #[test]
    fn corrupt_lines_are_skipped() {
        let tmp = TempDir::new().unwrap();
        let entry = AuditEntry::interaction("cli", "cli--l", "a", "b");
        append_audit_entry(tmp.path(), &entry).unwrap();

        let today = Utc::now().format("%Y-%m-%d").to_string();
        let path = tmp.path().join("daily").join(format!("{today}.jsonl"));
        let mut content = std::fs::read_to_string(&path).unwrap();
        content.push_str("garbage line\n");
        std::fs::write(&path, content).unwrap();
        append_audit_entry(tmp.path(), &entry).unwrap();

        assert_eq!(read_audit_entries(tmp.path(), &today).len(), 2);
    }

    #[test]
    fn entries_from_multiple_subsystems_share_the_day_file() {
        let tmp = TempDir::new().unwrap();
        append_audit_entry(tmp.path(), &AuditEntry::interaction("cli", "cli--l", "q", "a"))
            .unwrap();
        append_audit_entry(
            tmp.path(),
            &AuditEntry::tool_call("cli", "cli--l", "shell", serde_json::json!({})),
        )
        .unwrap();
        append_audit_entry(tmp.path(), &AuditEntry::error("heartbeat", "hb", "late")).unwrap();

        let today = Utc::now().format("%Y-%m-%d").to_string();
        let entries = read_audit_entries(tmp.path(), &today);
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].kind, AuditKind::Interaction);
        assert_eq!(entries[1].kind, AuditKind::ToolCall);
        assert_eq!(entries[2].kind, AuditKind::Error);
    }
}

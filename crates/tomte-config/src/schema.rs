// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Serde default helper — returns `true`.
///
/// `#[serde(default)]` on a `bool` always falls back to `bool::default()`
/// (i.e. `false`), so fields that should be enabled unless the user
/// explicitly disables them need a named function.
fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
}

impl Config {
    /// Expand `~` and make the filesystem roots absolute.
    ///
    /// Called once by the loader after the YAML layers are merged so that
    /// every consumer sees absolute paths.  Relative paths are resolved
    /// against the current working directory.
    pub fn normalize(&mut self) {
        self.security.workspace = expand_path(&self.security.workspace);
        self.security.data_dir = expand_path(&self.security.data_dir);
        self.security.additional_read_dirs = self
            .security
            .additional_read_dirs
            .iter()
            .map(|p| expand_path(p))
            .collect();
        self.security.additional_write_dirs = self
            .security
            .additional_write_dirs
            .iter()
            .map(|p| expand_path(p))
            .collect();
    }

    /// Directory holding the indexed memory documents.
    pub fn memory_dir(&self) -> PathBuf {
        self.security.workspace.join("memory")
    }

    /// Directory holding per-session transcripts.
    pub fn sessions_dir(&self) -> PathBuf {
        self.security.data_dir.join("sessions")
    }
}

fn expand_path(p: &Path) -> PathBuf {
    let expanded = shellexpand::tilde(&p.to_string_lossy()).into_owned();
    let path = PathBuf::from(expanded);
    if path.is_absolute() {
        path
    } else {
        std::env::current_dir().unwrap_or_default().join(path)
    }
}

// ─── Security ─────────────────────────────────────────────────────────────────

/// Sandbox policy: which shell commands the agent may run and which
/// directories its file tools may touch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Command basenames the shell tool may invoke.  Everything not listed
    /// here is blocked before execution.
    #[serde(default = "default_allowed_commands")]
    pub allowed_commands: Vec<String>,
    /// Subset of `allowed_commands` that gets a second, command-specific
    /// argument check (e.g. `rm` target patterns, `kill` PID ranges).
    #[serde(default = "default_extra_validation")]
    pub commands_needing_extra_validation: Vec<String>,
    /// Root of the agent's workspace.  Always readable and writable.
    #[serde(default = "default_workspace")]
    pub workspace: PathBuf,
    /// Root for daemon-owned state (transcripts, cron store, vector index).
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Extra directories readable by file tools.
    #[serde(default)]
    pub additional_read_dirs: Vec<PathBuf>,
    /// Extra directories writable by file tools (implies readable).
    #[serde(default)]
    pub additional_write_dirs: Vec<PathBuf>,
}

fn default_allowed_commands() -> Vec<String> {
    [
        "ls", "cat", "head", "tail", "grep", "rg", "find", "wc", "sort", "uniq", "cut", "diff",
        "echo", "date", "pwd", "which", "file", "du", "df", "ps", "mkdir", "touch", "cp", "mv",
        "rm", "kill", "git", "cargo", "make", "python3", "curl", "wget", "tar", "unzip", "sed",
        "awk", "jq", "sleep", "tee", "chmod", "ln",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_extra_validation() -> Vec<String> {
    vec!["rm".to_string(), "kill".to_string()]
}

fn default_workspace() -> PathBuf {
    PathBuf::from("~/tomte")
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("~/.local/share/tomte")
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            allowed_commands: default_allowed_commands(),
            commands_needing_extra_validation: default_extra_validation(),
            workspace: default_workspace(),
            data_dir: default_data_dir(),
            additional_read_dirs: Vec::new(),
            additional_write_dirs: Vec::new(),
        }
    }
}

// ─── Gateway ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Upper bound on queued adapter messages.  Enqueue past the bound is
    /// rejected, not blocked.
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,
    /// Cadence of "still working" status updates on channels that support
    /// editable processing messages.
    #[serde(default = "default_processing_update_interval_ms")]
    pub processing_update_interval_ms: u64,
}

fn default_max_queue_size() -> usize {
    50
}
fn default_processing_update_interval_ms() -> u64 {
    3000
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            max_queue_size: default_max_queue_size(),
            processing_update_interval_ms: default_processing_update_interval_ms(),
        }
    }
}

// ─── Session ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Number of trailing transcript messages loaded as turn context.
    #[serde(default = "default_max_history_messages")]
    pub max_history_messages: usize,
    /// When enabled, transcripts exceeding `compaction_threshold` messages
    /// are trimmed in place after each turn.
    #[serde(default = "default_true")]
    pub compaction_enabled: bool,
    /// Message count above which a transcript is compacted down to the most
    /// recent `compaction_threshold` entries.
    #[serde(default = "default_compaction_threshold")]
    pub compaction_threshold: usize,
}

fn default_max_history_messages() -> usize {
    50
}
fn default_compaction_threshold() -> usize {
    200
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_history_messages: default_max_history_messages(),
            compaction_enabled: true,
            compaction_threshold: default_compaction_threshold(),
        }
    }
}

// ─── Heartbeat ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Master switch for the periodic heartbeat tick.
    #[serde(default)]
    pub enabled: bool,
    /// Minutes between heartbeat ticks.
    #[serde(default = "default_heartbeat_interval")]
    pub interval_minutes: u64,
    /// Local-time window in which heartbeats fire, as "start-end" with the
    /// start hour inclusive and the end hour exclusive (e.g. "8-21").
    #[serde(default = "default_active_hours")]
    pub active_hours: String,
    /// Where heartbeat replies are delivered: "last" routes to the most
    /// recently active channel; any other value names a registered channel.
    #[serde(default = "default_deliver_to")]
    pub deliver_to: String,
}

fn default_heartbeat_interval() -> u64 {
    30
}
fn default_active_hours() -> String {
    "8-21".to_string()
}
fn default_deliver_to() -> String {
    "last".to_string()
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_minutes: default_heartbeat_interval(),
            active_hours: default_active_hours(),
            deliver_to: default_deliver_to(),
        }
    }
}

// ─── Memory ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryConfig {
    #[serde(default)]
    pub search: SearchConfig,
}

/// Tunables for the hybrid (vector + keyword) memory search and the
/// chunker that feeds it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default)]
    pub hybrid_weights: HybridWeights,
    /// Merged-score floor below which results are dropped.
    #[serde(default = "default_min_score")]
    pub min_score: f32,
    /// Maximum results returned by one search.
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    /// Chunk budget in tokens (1 token ≈ 4 characters).
    #[serde(default = "default_chunk_tokens")]
    pub chunk_tokens: usize,
    /// Overlap between consecutive chunks, in tokens.
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HybridWeights {
    #[serde(default = "default_vector_weight")]
    pub vector: f32,
    #[serde(default = "default_keyword_weight")]
    pub keyword: f32,
}

fn default_vector_weight() -> f32 {
    0.7
}
fn default_keyword_weight() -> f32 {
    0.3
}
fn default_min_score() -> f32 {
    0.08
}
fn default_max_results() -> usize {
    6
}
fn default_chunk_tokens() -> usize {
    400
}
fn default_chunk_overlap() -> usize {
    80
}

impl Default for HybridWeights {
    fn default() -> Self {
        Self {
            vector: default_vector_weight(),
            keyword: default_keyword_weight(),
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            hybrid_weights: HybridWeights::default(),
            min_score: default_min_score(),
            max_results: default_max_results(),
            chunk_tokens: default_chunk_tokens(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

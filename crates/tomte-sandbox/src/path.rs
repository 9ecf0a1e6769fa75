// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::{Component, Path, PathBuf, MAIN_SEPARATOR};

/// Whether the tool wants to read or write the path under validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Read,
    Write,
}

/// Directory policy a path is validated against.
#[derive(Debug, Clone)]
pub struct PathPolicy<'a> {
    pub workspace_dir: &'a Path,
    pub additional_read_dirs: &'a [PathBuf],
    pub additional_write_dirs: &'a [PathBuf],
    pub operation: Operation,
}

/// Outcome of path validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathDecision {
    Valid { resolved: PathBuf },
    Invalid { reason: String },
}

impl PathDecision {
    pub fn is_valid(&self) -> bool {
        matches!(self, PathDecision::Valid { .. })
    }

    fn invalid(reason: impl Into<String>) -> Self {
        PathDecision::Invalid {
            reason: reason.into(),
        }
    }
}

/// Resolve `input` and decide whether the requested operation is allowed.
///
/// Resolution order: `~` expansion, workspace-relative anchoring, lexical
/// `..` normalization, then symlink resolution when the path exists on
/// disk.  Containment is checked on the resolved form so a symlink cannot
/// escape the workspace.
pub fn validate_path(input: &str, policy: &PathPolicy) -> PathDecision {
    if input.trim().is_empty() {
        return PathDecision::invalid("empty path");
    }
    if input.contains('\0') {
        return PathDecision::invalid("path contains a NUL byte");
    }

    let expanded = expand_home(input);
    let absolute = if expanded.is_absolute() {
        expanded
    } else {
        policy.workspace_dir.join(expanded)
    };
    let normalized = normalize_lexically(&absolute);
    let resolved = resolve_symlinks(&normalized);

    let mut allowed: Vec<&Path> = vec![policy.workspace_dir];
    allowed.extend(policy.additional_write_dirs.iter().map(PathBuf::as_path));
    if policy.operation == Operation::Read {
        allowed.extend(policy.additional_read_dirs.iter().map(PathBuf::as_path));
    }

    if allowed.iter().any(|dir| is_within(&resolved, dir)) {
        PathDecision::Valid { resolved }
    } else {
        let verb = match policy.operation {
            Operation::Read => "read",
            Operation::Write => "write",
        };
        PathDecision::invalid(format!(
            "{} is outside the allowed directories for {verb} access",
            resolved.display()
        ))
    }
}

/// True when `path` equals `dir` or lives underneath it.
///
/// Both sides are separator-terminated before the prefix test so that
/// `/home/pa-evil` does not pass as inside `/home/pa`.
fn is_within(path: &Path, dir: &Path) -> bool {
    let dir = std::fs::canonicalize(dir).unwrap_or_else(|_| normalize_lexically(dir));
    let mut dir_s = dir.to_string_lossy().into_owned();
    let mut path_s = path.to_string_lossy().into_owned();
    if !dir_s.ends_with(MAIN_SEPARATOR) {
        dir_s.push(MAIN_SEPARATOR);
    }
    if !path_s.ends_with(MAIN_SEPARATOR) {
        path_s.push(MAIN_SEPARATOR);
    }
    path_s == dir_s || path_s.starts_with(&dir_s)
}

/// Resolve symlinks in as much of `path` as exists on disk.
///
/// A not-yet-existing tail is re-appended verbatim so that writes into
/// fresh files and directories still validate against the real location
/// of their closest existing ancestor.
fn resolve_symlinks(path: &Path) -> PathBuf {
    if let Ok(real) = std::fs::canonicalize(path) {
        return real;
    }
    let mut tail = Vec::new();
    let mut cursor = path.to_path_buf();
    while let Some(parent) = cursor.parent() {
        if let Some(name) = cursor.file_name() {
            tail.push(name.to_os_string());
        }
        if let Ok(real) = std::fs::canonicalize(parent) {
            let mut out = real;
            for part in tail.iter().rev() {
                out.push(part);
            }
            return out;
        }
        cursor = parent.to_path_buf();
    }
    path.to_path_buf()
}

/// Expand a leading `~` to the user's home directory.
fn expand_home(input: &str) -> PathBuf {
    if input == "~" {
        return dirs::home_dir().unwrap_or_else(|| PathBuf::from("~"));
    }
    if let Some(rest) = input.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(input)
}

/// Collapse `.` and `..` components without touching the filesystem.
fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;
use tomte_config::SecurityConfig;
use tracing::debug;

use crate::command::{command_segments, extract_file_paths, validate_kill, validate_rm};
use crate::path::{validate_path, Operation, PathPolicy};

/// Verdict of a pre-execution gate.
///
/// A block is a value, not an error: it flows back to the model as a
/// denied tool result so the conversation can continue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookDecision {
    Allow,
    Block { reason: String },
}

impl HookDecision {
    pub fn is_blocked(&self) -> bool {
        matches!(self, HookDecision::Block { .. })
    }

    fn block(reason: impl Into<String>) -> Self {
        HookDecision::Block {
            reason: reason.into(),
        }
    }
}

fn sudo_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\bsudo\b").expect("static regex"))
}

/// Gate for the shell tool: allowlist every invoked program, apply
/// command-specific argument checks, and confine every written path.
pub fn bash_gate(command: &str, security: &SecurityConfig) -> HookDecision {
    if command.trim().is_empty() {
        return HookDecision::Allow;
    }
    if sudo_pattern().is_match(command) {
        return HookDecision::block("sudo is not permitted");
    }

    let segments = match command_segments(command) {
        Ok(s) => s,
        // Fail safe: anything the tokenizer cannot parse is blocked.
        Err(e) => return HookDecision::block(format!("could not parse command: {e}")),
    };

    for seg in &segments {
        if !security.allowed_commands.iter().any(|c| c == &seg.command) {
            return HookDecision::block(format!(
                "command '{}' is not in the allowed list",
                seg.command
            ));
        }
        if security
            .commands_needing_extra_validation
            .iter()
            .any(|c| c == &seg.command)
        {
            let checked = match seg.command.as_str() {
                "rm" => validate_rm(&seg.text),
                "kill" => validate_kill(&seg.text),
                _ => Ok(()),
            };
            if let Err(reason) = checked {
                return HookDecision::block(reason);
            }
        }
    }

    for path in extract_file_paths(command) {
        let decision = validate_path(
            &path,
            &PathPolicy {
                workspace_dir: &security.workspace,
                additional_read_dirs: &security.additional_read_dirs,
                additional_write_dirs: &security.additional_write_dirs,
                operation: Operation::Write,
            },
        );
        if let crate::path::PathDecision::Invalid { reason } = decision {
            debug!(path, reason, "bash gate blocked a path");
            return HookDecision::block(reason);
        }
    }

    HookDecision::Allow
}

/// Which argument a file tool reads its path from, and how.
struct ToolPathRule {
    field: &'static str,
    operation: Operation,
    required: bool,
}

/// Tool name → path argument mapping.
fn tool_path_rule(tool_name: &str) -> Option<ToolPathRule> {
    let rule = match tool_name {
        "Read" => ToolPathRule {
            field: "file_path",
            operation: Operation::Read,
            required: true,
        },
        "Glob" | "Grep" => ToolPathRule {
            field: "path",
            operation: Operation::Read,
            required: false,
        },
        "Write" | "Edit" => ToolPathRule {
            field: "file_path",
            operation: Operation::Write,
            required: true,
        },
        _ => return None,
    };
    Some(rule)
}

/// Gate for the file tools (Read/Glob/Grep/Write/Edit).
///
/// Read operations may additionally touch the write dirs and the daemon's
/// data dir; write operations are confined to the workspace and the
/// explicit write dirs.
pub fn file_gate(tool_name: &str, args: &Value, security: &SecurityConfig) -> HookDecision {
    let Some(rule) = tool_path_rule(tool_name) else {
        // Unknown tools carry no path this gate understands.
        return HookDecision::Allow;
    };

    let path = args.get(rule.field).and_then(Value::as_str);
    let Some(path) = path else {
        if rule.required {
            return HookDecision::block(format!(
                "{tool_name} call is missing its '{}' argument",
                rule.field
            ));
        }
        // optional path absent means "current directory"
        return HookDecision::Allow;
    };

    let mut read_dirs: Vec<std::path::PathBuf> = security.additional_read_dirs.clone();
    read_dirs.extend(security.additional_write_dirs.iter().cloned());
    read_dirs.push(security.data_dir.clone());

    let decision = validate_path(
        path,
        &PathPolicy {
            workspace_dir: &security.workspace,
            additional_read_dirs: &read_dirs,
            additional_write_dirs: &security.additional_write_dirs,
            operation: rule.operation,
        },
    );
    match decision {
        crate::path::PathDecision::Valid { .. } => HookDecision::Allow,
        crate::path::PathDecision::Invalid { reason } => HookDecision::block(reason),
    }
}

/// The single PreToolUse entry point the turn executor calls before
/// every tool invocation.
///
/// Shell commands go through the bash gate; everything else through the
/// per-tool path table.  A block is returned to the model as a denied
/// tool result, never raised as an error.
pub fn pre_tool_use(tool_name: &str, tool_input: &Value, security: &SecurityConfig) -> HookDecision {
    match tool_name {
        "Bash" => {
            let command = tool_input
                .get("command")
                .and_then(Value::as_str)
                .unwrap_or("");
            bash_gate(command, security)
        }
        _ => file_gate(tool_name, tool_input, security),
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Pre-execution sandbox for agent tool calls.
//!
//! Every shell command and file-tool path the agent produces passes
//! through one of two gates before anything touches the host:
//!
//! - [`bash_gate`] tokenizes the command line, checks every invoked
//!   program against the allowlist, applies command-specific argument
//!   validation (`rm`, `kill`), and confines every written path to the
//!   workspace.
//! - [`file_gate`] maps each file tool to the path argument it writes or
//!   reads and confines it with the same path policy.
//!
//! The parser is deliberately not a shell: it only understands enough
//! syntax (quotes, pipes, sequencers, substitutions, assignments) to
//! classify what a command would run.  Anything it cannot parse is
//! blocked, never guessed at.

mod command;
mod hooks;
mod path;

pub use command::{
    command_segments, extract_commands, extract_file_paths, validate_kill, validate_rm,
    CommandSegment, ParseError,
};
pub use hooks::{bash_gate, file_gate, pre_tool_use, HookDecision};
pub use path::{validate_path, Operation, PathDecision, PathPolicy};

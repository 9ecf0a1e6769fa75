// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! The agent runner: wraps the external turn executor with history,
//! options, resumable provider sessions, and per-turn persistence.
//!
//! The language model itself is opaque behind the [`TurnExecutor`]
//! trait: it receives one message plus context and yields a stream of
//! [`StreamEvent`]s.  Tests drive the runner with the deterministic
//! [`ScriptedExecutor`].

mod executor;
mod runner;

pub use executor::{
    EchoExecutor, EventStream, PreToolHook, ScriptedExecutor, ScriptedStep, StreamEvent,
    TurnExecutor, TurnRequest,
};
pub use runner::{build_agent_options, AgentOptions, AgentRunner, TurnOutcome};

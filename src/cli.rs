// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// tomte: a personal assistant daemon.
///
/// Runs a sandboxed coding agent behind your chat channels, with
/// persistent per-conversation history, a searchable memory, and a
/// cron/heartbeat scheduler for unprompted check-ins.
#[derive(Parser, Debug)]
#[command(name = "tomte", version, about)]
pub struct Cli {
    /// Path to an explicit config file (merged over the discovered ones).
    #[arg(long, short = 'c', global = true)]
    pub config: Option<PathBuf>,

    /// Log to stderr (TOMTE_LOG controls the filter; TOMTE_LOG_FILE
    /// redirects to a file).
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the daemon (the default when no subcommand is given).
    ///
    /// Bootstraps the workspace, indexes the memory documents, arms the
    /// cron timer and heartbeat, and serves the dispatch loop until
    /// interrupted.  With no chat channels configured a line-based
    /// stdio channel is attached so the pipeline can be exercised
    /// directly from the terminal.
    Start,

    /// Print the merged configuration and exit.
    ShowConfig,

    /// Re-index the memory documents once and exit.
    Index,

    /// Search the memory index from the terminal.
    Search {
        /// Free-text query.
        query: String,
    },

    /// Inspect the scheduled cron jobs.
    Cron {
        #[command(subcommand)]
        command: CronCommands,
    },
}

#[derive(Subcommand, Debug)]
pub enum CronCommands {
    /// List all jobs with their schedules and last fire times.
    List,
    /// Remove a job by id.
    Remove {
        /// Job id (as shown by `tomte cron list`).
        id: String,
    },
}

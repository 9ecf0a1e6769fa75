// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Workspace bootstrap: directory layout and seed documents.
//!
//! The daemon expects a small fixed layout under the workspace root:
//!
//! ```text
//! <workspace>/
//!   AGENTS.md SOUL.md USER.md MEMORY.md HEARTBEAT.md   seed documents
//!   daily/                                             audit log
//!   memory/                                            indexed documents
//!   .tomte/skills/                                     user skill files
//! <data_dir>/
//!   sessions/                                          transcripts
//! ```
//!
//! Bootstrap is idempotent: directories are created as needed and seed
//! files are written only when absent, so user edits survive restarts.

use std::path::Path;

use anyhow::Context;
use tracing::{debug, info};

use crate::Config;

/// Seed documents written into a fresh workspace, with their initial content.
pub const SEED_FILES: [(&str, &str); 5] = [
    (
        "AGENTS.md",
        "# Agent instructions\n\nHouse rules for the assistant. Edit freely; \
         this file is read at the start of every turn.\n",
    ),
    (
        "SOUL.md",
        "# Soul\n\nWho the assistant is: tone, values, and boundaries.\n",
    ),
    (
        "USER.md",
        "# User\n\nWhat the assistant knows about you: name, timezone, \
         preferences, ongoing projects.\n",
    ),
    (
        "MEMORY.md",
        "# Memory\n\nLong-lived notes the assistant should keep in mind. \
         Files under memory/ are indexed for search.\n",
    ),
    (
        "HEARTBEAT.md",
        "# Heartbeat\n\nStanding instructions for unprompted check-ins. \
         If there is nothing to do, the assistant stays silent.\n",
    ),
];

/// Create the workspace/data directory layout and seed the default documents.
///
/// Existing files are never overwritten.
pub fn bootstrap_workspace(config: &Config) -> anyhow::Result<()> {
    let workspace = &config.security.workspace;

    for dir in [
        workspace.clone(),
        workspace.join("daily"),
        workspace.join("memory"),
        workspace.join(".tomte").join("skills"),
        config.sessions_dir(),
    ] {
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("creating {}", dir.display()))?;
    }

    for (name, content) in SEED_FILES {
        let path = workspace.join(name);
        if path.exists() {
            debug!(file = name, "seed file present, leaving untouched");
            continue;
        }
        std::fs::write(&path, content).with_context(|| format!("seeding {}", path.display()))?;
        info!(file = name, "seeded workspace document");
    }

    Ok(())
}

/// True when every seed file already exists under `workspace`.
pub fn is_bootstrapped(workspace: &Path) -> bool {
    SEED_FILES.iter().all(|(name, _)| workspace.join(name).exists())
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config_in(tmp: &TempDir) -> Config {
        let mut cfg = Config::default();
        cfg.security.workspace = tmp.path().join("ws");
        cfg.security.data_dir = tmp.path().join("data");
        cfg
    }

    #[test]
    fn bootstrap_creates_layout() {
        let tmp = TempDir::new().unwrap();
        let cfg = config_in(&tmp);
        bootstrap_workspace(&cfg).unwrap();

        assert!(cfg.security.workspace.join("daily").is_dir());
        assert!(cfg.security.workspace.join("memory").is_dir());
        assert!(cfg.security.workspace.join(".tomte/skills").is_dir());
        assert!(cfg.sessions_dir().is_dir());
    }

    #[test]
    fn bootstrap_seeds_all_documents() {
        let tmp = TempDir::new().unwrap();
        let cfg = config_in(&tmp);
        bootstrap_workspace(&cfg).unwrap();

        for (name, _) in SEED_FILES {
            assert!(
                cfg.security.workspace.join(name).is_file(),
                "{name} missing"
            );
        }
        assert!(is_bootstrapped(&cfg.security.workspace));
    }

    #[test]
    fn bootstrap_never_overwrites_existing_files() {
        let tmp = TempDir::new().unwrap();
        let cfg = config_in(&tmp);
        std::fs::create_dir_all(&cfg.security.workspace).unwrap();
        let user = cfg.security.workspace.join("USER.md");
        std::fs::write(&user, "my own notes").unwrap();

        bootstrap_workspace(&cfg).unwrap();
        assert_eq!(std::fs::read_to_string(&user).unwrap(), "my own notes");
    }

    #[test]
    fn bootstrap_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let cfg = config_in(&tmp);
        bootstrap_workspace(&cfg).unwrap();
        bootstrap_workspace(&cfg).unwrap();
        assert!(is_bootstrapped(&cfg.security.workspace));
    }

    #[test]
    fn not_bootstrapped_when_a_seed_is_missing() {
        let tmp = TempDir::new().unwrap();
        let cfg = config_in(&tmp);
        bootstrap_workspace(&cfg).unwrap();
        std::fs::remove_file(cfg.security.workspace.join("SOUL.md")).unwrap();
        assert!(!is_bootstrapped(&cfg.security.workspace));
    }
}

// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::debug;

use crate::Config;

/// Candidate config files, lowest priority first.
///
/// Each directory contributes both a `.yaml` and a `.yml` candidate;
/// the workspace-local dotfiles come last so they win over the system
/// and XDG layers.  The `--config` file, when given, is applied after
/// all of these.
fn layer_candidates() -> Vec<PathBuf> {
    let mut config_dirs = vec![PathBuf::from("/etc/tomte")];
    if let Some(home) = dirs::home_dir() {
        config_dirs.push(home.join(".config/tomte"));
    }
    if let Some(xdg) = dirs::config_dir() {
        config_dirs.push(xdg.join("tomte"));
    }

    let mut candidates: Vec<PathBuf> = config_dirs
        .iter()
        .flat_map(|dir| [dir.join("config.yaml"), dir.join("config.yml")])
        .collect();
    for local in [
        ".tomte/config.yaml",
        ".tomte/config.yml",
        ".tomte.yaml",
        ".tomte.yml",
    ] {
        candidates.push(PathBuf::from(local));
    }
    candidates
}

fn read_layer(path: &Path) -> anyhow::Result<serde_yaml::Value> {
    let text =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

/// Lay `top` over `base` and return the combined value.
///
/// Mappings combine key by key, recursing into sections both layers
/// define.  Any other value, scalars and lists included, is taken
/// wholesale from the upper layer; in particular an `allowed_commands`
/// list in a later file replaces the earlier list rather than extending
/// it.
fn overlay(base: serde_yaml::Value, top: serde_yaml::Value) -> serde_yaml::Value {
    use serde_yaml::Value;

    match (base, top) {
        (Value::Mapping(mut lower), Value::Mapping(upper)) => {
            for (key, value) in upper {
                let combined = match lower.remove(&key) {
                    Some(existing) => overlay(existing, value),
                    None => value,
                };
                lower.insert(key, combined);
            }
            Value::Mapping(lower)
        }
        (_, top) => top,
    }
}

/// Load configuration by stacking every discovered YAML layer, then the
/// explicit `extra` path (e.g. the `--config` CLI flag) on top.
///
/// Discovered layers that exist but fail to read or parse are errors; a
/// missing explicit path is an error too.  With no layers at all the
/// defaults are used.  The returned config is normalized: the workspace
/// and data-dir roots are home-expanded absolute paths.
pub fn load(extra: Option<&Path>) -> anyhow::Result<Config> {
    let mut layers = Vec::new();
    for candidate in layer_candidates() {
        if candidate.is_file() {
            debug!(path = %candidate.display(), "applying config layer");
            layers.push(read_layer(&candidate)?);
        }
    }
    if let Some(path) = extra {
        debug!(path = %path.display(), "applying explicit config");
        layers.push(read_layer(path)?);
    }

    let mut config = match layers.into_iter().reduce(overlay) {
        Some(merged) => serde_yaml::from_value(merged).unwrap_or_default(),
        None => Config::default(),
    };
    config.normalize();
    Ok(config)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn yaml(s: &str) -> serde_yaml::Value {
        serde_yaml::from_str(s).unwrap()
    }

    // ── overlay ───────────────────────────────────────────────────────────────

    #[test]
    fn top_layer_wins_on_scalars() {
        let merged = overlay(
            yaml("heartbeat:\n  interval_minutes: 30"),
            yaml("heartbeat:\n  interval_minutes: 5"),
        );
        assert_eq!(merged["heartbeat"]["interval_minutes"].as_i64(), Some(5));
    }

    #[test]
    fn base_keys_survive_when_the_top_layer_does_not_name_them() {
        let merged = overlay(
            yaml("heartbeat:\n  enabled: true\n  active_hours: \"8-21\""),
            yaml("heartbeat:\n  active_hours: \"7-22\""),
        );
        assert_eq!(merged["heartbeat"]["enabled"].as_bool(), Some(true));
        assert_eq!(merged["heartbeat"]["active_hours"].as_str(), Some("7-22"));
    }

    #[test]
    fn disjoint_sections_are_combined() {
        let merged = overlay(
            yaml("security:\n  workspace: /srv/tomte"),
            yaml("gateway:\n  max_queue_size: 8"),
        );
        assert_eq!(merged["security"]["workspace"].as_str(), Some("/srv/tomte"));
        assert_eq!(merged["gateway"]["max_queue_size"].as_i64(), Some(8));
    }

    #[test]
    fn lists_replace_instead_of_concatenating() {
        let merged = overlay(
            yaml("security:\n  allowed_commands: [ls, cat, grep]"),
            yaml("security:\n  allowed_commands: [git]"),
        );
        let commands = merged["security"]["allowed_commands"]
            .as_sequence()
            .unwrap();
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].as_str(), Some("git"));
    }

    #[test]
    fn three_layers_stack_in_order() {
        let layers = vec![
            yaml("session:\n  max_history_messages: 10"),
            yaml("session:\n  compaction_enabled: false"),
            yaml("session:\n  max_history_messages: 99"),
        ];
        let merged = layers.into_iter().reduce(overlay).unwrap();
        assert_eq!(merged["session"]["max_history_messages"].as_i64(), Some(99));
        assert_eq!(
            merged["session"]["compaction_enabled"].as_bool(),
            Some(false)
        );
    }

    // ── load ──────────────────────────────────────────────────────────────────

    #[test]
    fn load_returns_error_when_explicit_path_missing() {
        let result = load(Some(Path::new("/tmp/tomte_nonexistent_config_xyz.yaml")));
        assert!(result.is_err());
    }

    #[test]
    fn load_explicit_file_overrides_defaults() {
        use std::io::Write;
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "heartbeat:\n  interval_minutes: 15").unwrap();
        let cfg = load(Some(f.path())).unwrap();
        assert_eq!(cfg.heartbeat.interval_minutes, 15);
        // untouched sections keep their defaults
        assert_eq!(cfg.session.max_history_messages, 50);
    }

    #[test]
    fn load_rejects_unparseable_explicit_file() {
        use std::io::Write;
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "security: [this is not a mapping").unwrap();
        assert!(load(Some(f.path())).is_err());
    }

    #[test]
    fn load_normalizes_roots_to_absolute() {
        use std::io::Write;
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "security:\n  workspace: \"~/somewhere\"").unwrap();
        let cfg = load(Some(f.path())).unwrap();
        assert!(cfg.security.workspace.is_absolute());
        assert!(cfg.security.data_dir.is_absolute());
    }
}

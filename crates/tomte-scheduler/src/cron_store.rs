// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::Context;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

/// When a job fires.  Serialized as a tagged union so the store file is
/// self-describing: `{"type":"cron","expression":"0 9 * * *"}` etc.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Schedule {
    /// Standard cron expression, evaluated in UTC.
    Cron { expression: String },
    /// A single ISO-8601 instant.
    Oneshot { iso: DateTime<Utc> },
    /// Fixed period anchored on the previous fire.
    Interval {
        #[serde(rename = "everyMs")]
        every_ms: u64,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CronPayload {
    pub text: String,
}

/// One persisted job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CronJob {
    pub id: Uuid,
    pub label: String,
    pub schedule: Schedule,
    pub payload: CronPayload,
    pub created_at: DateTime<Utc>,
    pub last_fired_at: Option<DateTime<Utc>>,
    pub enabled: bool,
}

impl CronJob {
    pub fn new(label: impl Into<String>, schedule: Schedule, text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            label: label.into(),
            schedule,
            payload: CronPayload { text: text.into() },
            created_at: Utc::now(),
            last_fired_at: None,
            enabled: true,
        }
    }
}

/// The next instant `job` should fire after `now`, or `None` when it
/// never will again.
///
/// A oneshot in the past still fires once (catch-up after downtime)
/// unless it already has; intervals are anchored on the last fire.
pub fn next_fire(job: &CronJob, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    if !job.enabled {
        return None;
    }
    match &job.schedule {
        Schedule::Cron { expression } => {
            let parsed = cron::Schedule::from_str(&normalize_cron(expression)).ok()?;
            parsed.after(&now).next()
        }
        Schedule::Oneshot { iso } => {
            if *iso <= now && job.last_fired_at.is_some() {
                None
            } else {
                Some(*iso)
            }
        }
        Schedule::Interval { every_ms } => {
            let period = Duration::milliseconds(*every_ms as i64);
            Some(match job.last_fired_at {
                Some(last) => last + period,
                None => now + period,
            })
        }
    }
}

/// The `cron` crate wants a seconds field; accept the common 5-field
/// form by pinning seconds to zero.
fn normalize_cron(expression: &str) -> String {
    if expression.split_whitespace().count() == 5 {
        format!("0 {expression}")
    } else {
        expression.to_string()
    }
}

/// Validate user-supplied job fields; returns the reason when invalid.
pub fn validate_job_input(schedule: &Schedule, text: &str) -> Result<(), String> {
    match schedule {
        Schedule::Cron { expression } => {
            cron::Schedule::from_str(&normalize_cron(expression))
                .map_err(|e| format!("invalid cron expression '{expression}': {e}"))?;
        }
        Schedule::Oneshot { .. } => {}
        Schedule::Interval { every_ms } => {
            if *every_ms == 0 {
                return Err("interval must be a positive number of milliseconds".to_string());
            }
        }
    }
    if text.trim().is_empty() {
        return Err("payload text must not be empty".to_string());
    }
    Ok(())
}

// ─── Store ───────────────────────────────────────────────────────────────────

/// Outcome of a CRUD action, shaped for the agent-facing tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CronActionResult {
    pub success: bool,
    pub message: String,
}

impl CronActionResult {
    fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    fn fail(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

/// Partial update applied by the `update` action.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CronUpdate {
    pub label: Option<String>,
    pub schedule: Option<Schedule>,
    pub text: Option<String>,
    pub enabled: Option<bool>,
}

/// The persisted job list: a single JSON array file, read whole and
/// replaced atomically on every mutation.
#[derive(Debug, Clone)]
pub struct CronStore {
    path: PathBuf,
}

impl CronStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Read all jobs.  Missing, corrupt, or non-array content is an
    /// empty list.
    pub fn load(&self) -> Vec<CronJob> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "could not read cron store");
                return Vec::new();
            }
        };
        match serde_json::from_str::<Vec<CronJob>>(&text) {
            Ok(jobs) => jobs,
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "cron store is corrupt, starting from an empty job list"
                );
                Vec::new()
            }
        }
    }

    /// Replace the job list atomically (`.tmp` + rename), with 0700 on
    /// the parent and 0600 on the file.
    pub fn save(&self, jobs: &[CronJob]) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                let _ = std::fs::set_permissions(parent, std::fs::Permissions::from_mode(0o700));
            }
        }

        let json = serde_json::to_string_pretty(jobs).context("serializing cron jobs")?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json).with_context(|| format!("writing {}", tmp.display()))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = std::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600));
        }
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("renaming {} into place", tmp.display()))?;
        Ok(())
    }

    // ── CRUD facade ───────────────────────────────────────────────────────────

    /// Add a job.  Invalid input fails without mutating the store.
    pub fn add(
        &self,
        label: impl Into<String>,
        schedule: Schedule,
        text: impl Into<String>,
    ) -> CronActionResult {
        let text = text.into();
        if let Err(reason) = validate_job_input(&schedule, &text) {
            return CronActionResult::fail(reason);
        }
        let job = CronJob::new(label, schedule, text);
        let id = job.id;
        let mut jobs = self.load();
        jobs.push(job);
        match self.save(&jobs) {
            Ok(()) => CronActionResult::ok(format!("added job {id}")),
            Err(e) => CronActionResult::fail(format!("could not persist job: {e}")),
        }
    }

    pub fn list(&self) -> Vec<CronJob> {
        self.load()
    }

    /// Apply a partial update.  Invalid input fails without mutating.
    pub fn update(&self, id: Uuid, update: CronUpdate) -> CronActionResult {
        let mut jobs = self.load();
        let Some(job) = jobs.iter_mut().find(|j| j.id == id) else {
            return CronActionResult::fail(format!("no job with id {id}"));
        };

        let schedule = update.schedule.clone().unwrap_or_else(|| job.schedule.clone());
        let text = update.text.clone().unwrap_or_else(|| job.payload.text.clone());
        if let Err(reason) = validate_job_input(&schedule, &text) {
            return CronActionResult::fail(reason);
        }

        if let Some(label) = update.label {
            job.label = label;
        }
        job.schedule = schedule;
        job.payload.text = text;
        if let Some(enabled) = update.enabled {
            job.enabled = enabled;
        }
        match self.save(&jobs) {
            Ok(()) => CronActionResult::ok(format!("updated job {id}")),
            Err(e) => CronActionResult::fail(format!("could not persist job: {e}")),
        }
    }

    pub fn remove(&self, id: Uuid) -> CronActionResult {
        let mut jobs = self.load();
        let before = jobs.len();
        jobs.retain(|j| j.id != id);
        if jobs.len() == before {
            return CronActionResult::fail(format!("no job with id {id}"));
        }
        match self.save(&jobs) {
            Ok(()) => CronActionResult::ok(format!("removed job {id}")),
            Err(e) => CronActionResult::fail(format!("could not persist removal: {e}")),
        }
    }

    /// Record a fire: stamp `last_fired_at` and persist.
    pub fn mark_fired(&self, id: Uuid, at: DateTime<Utc>) -> anyhow::Result<()> {
        let mut jobs = self.load();
        if let Some(job) = jobs.iter_mut().find(|j| j.id == id) {
            job.last_fired_at = Some(at);
            self.save(&jobs)?;
        }
        Ok(())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::cron_store::{next_fire, CronJob, CronStore};

/// The single re-armable timer driving every cron job.
///
/// One sleeping task is armed for the earliest next fire across all
/// enabled jobs.  Re-arming (after a fire, or after any CRUD mutation)
/// always cancels the pending task first, so there is never more than
/// one scheduled fire.
pub struct CronTimer {
    store: CronStore,
    callback: Box<dyn Fn(&CronJob) + Send + Sync>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl CronTimer {
    /// Build a timer over `store`.  The callback runs on the timer task
    /// once per due job; it should do no more than enqueue a message.
    pub fn new<F>(store: CronStore, callback: F) -> Arc<Self>
    where
        F: Fn(&CronJob) + Send + Sync + 'static,
    {
        Arc::new(Self {
            store,
            callback: Box::new(callback),
            task: Mutex::new(None),
        })
    }

    /// Arm (or re-arm) the timer against the current job set.
    ///
    /// Idempotent: any previously scheduled fire is cancelled before the
    /// new one is installed.  With no enabled jobs the timer stays idle.
    pub fn rearm(self: &Arc<Self>) {
        let mut slot = self.lock_task();
        if let Some(old) = slot.take() {
            old.abort();
        }

        let now = Utc::now();
        let fires: Vec<(Uuid, DateTime<Utc>)> = self
            .store
            .load()
            .iter()
            .filter_map(|job| next_fire(job, now).map(|at| (job.id, at)))
            .collect();
        let Some(earliest) = fires.iter().map(|(_, at)| *at).min() else {
            debug!("no enabled cron jobs, timer disarmed");
            return;
        };

        let due: Vec<Uuid> = fires
            .iter()
            .filter(|(_, at)| *at == earliest)
            .map(|(id, _)| *id)
            .collect();
        debug!(fire_at = %earliest, jobs = due.len(), "cron timer armed");

        let timer = Arc::clone(self);
        *slot = Some(tokio::spawn(async move {
            let delay = (earliest - Utc::now()).to_std().unwrap_or_default();
            tokio::time::sleep(delay).await;
            timer.fire(&due);
            timer.rearm();
        }));
    }

    /// Cancel the pending fire, if any.
    pub fn disarm(&self) {
        if let Some(task) = self.lock_task().take() {
            task.abort();
        }
    }

    fn fire(&self, due: &[Uuid]) {
        let now = Utc::now();
        let jobs = self.store.load();
        for id in due {
            // Reload by id: the job may have been disabled or removed
            // between arming and firing.
            let Some(job) = jobs.iter().find(|j| j.id == *id && j.enabled) else {
                continue;
            };
            debug!(job = %job.label, "cron job fired");
            (self.callback)(job);
            if let Err(e) = self.store.mark_fired(job.id, now) {
                warn!(job = %job.label, error = %e, "could not persist lastFiredAt");
            }
        }
    }

    fn lock_task(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.task.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for CronTimer {
    fn drop(&mut self) {
        if let Some(task) = self.lock_task().take() {
            task.abort();
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

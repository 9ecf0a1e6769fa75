// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{Local, Timelike, Utc};
use tokio::task::JoinHandle;
use tomte_config::HeartbeatConfig;
use tracing::{debug, info, warn};

use crate::events::{SystemEvent, SystemEventKind};

/// Sentinel reply meaning "nothing to report"; the dispatcher suppresses
/// delivery of heartbeat replies that equal it.
pub const HEARTBEAT_OK: &str = "HEARTBEAT_OK";

/// True when `text` is the no-op heartbeat sentinel.
pub fn is_heartbeat_ok(text: &str) -> bool {
    text.trim() == HEARTBEAT_OK
}

/// Build the prompt for one heartbeat turn from the buffered events.
///
/// Priority merge: background-command completions outrank cron
/// reminders, which outrank the standing check-in prompt.  All events of
/// the winning class are included.
pub fn resolve_heartbeat_prompt(events: &[SystemEvent]) -> String {
    let texts_of = |kind: SystemEventKind| -> Vec<&str> {
        events
            .iter()
            .filter(|e| e.kind == kind)
            .map(|e| e.text.as_str())
            .collect()
    };

    let exec = texts_of(SystemEventKind::Exec);
    if !exec.is_empty() {
        return format!(
            "A background command completed. Results:\n\n{}\n\n\
             Review the output and follow up if anything needs attention.",
            exec.join("\n")
        );
    }

    let cron = texts_of(SystemEventKind::Cron);
    if !cron.is_empty() {
        return format!(
            "Scheduled reminder:\n\n{}\n\nAct on the reminder now.",
            cron.join("\n")
        );
    }

    format!(
        "Heartbeat check-in at {}. Read HEARTBEAT.md in your workspace and \
         follow any standing instructions. If there is nothing that needs \
         doing, reply with exactly {HEARTBEAT_OK}.",
        Utc::now().format("%Y-%m-%d %H:%M UTC")
    )
}

// ─── Active hours ────────────────────────────────────────────────────────────

/// A local-time hour window, parsed from "start-end" (start inclusive,
/// end exclusive).  Windows may wrap midnight, e.g. "22-6".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveHours {
    start: u32,
    end: u32,
}

impl ActiveHours {
    /// Parse "8-21"; anything unparseable falls back to always-active
    /// with a warning.
    pub fn parse(s: &str) -> Self {
        let parts: Vec<&str> = s.split('-').collect();
        if let [start, end] = parts.as_slice() {
            if let (Ok(start), Ok(end)) = (start.trim().parse(), end.trim().parse()) {
                if start < 24 && end <= 24 {
                    return Self { start, end };
                }
            }
        }
        warn!(window = s, "unparseable active_hours, defaulting to always active");
        Self { start: 0, end: 24 }
    }

    pub fn contains(&self, hour: u32) -> bool {
        if self.start == self.end {
            // degenerate window: treat as always active
            return true;
        }
        if self.start < self.end {
            (self.start..self.end).contains(&hour)
        } else {
            // wraps midnight
            hour >= self.start || hour < self.end
        }
    }
}

// ─── Scheduler ───────────────────────────────────────────────────────────────

/// Periodic heartbeat tick.
///
/// Every `interval_minutes` the callback is invoked, but only when the
/// current local hour falls inside the active window.
/// [`HeartbeatScheduler::stop`] makes any pending tick a no-op and
/// releases the timer task.
pub struct HeartbeatScheduler {
    running: Arc<AtomicBool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl HeartbeatScheduler {
    /// Start ticking.  The callback runs on the timer task; it should do
    /// no more than enqueue a message.
    pub fn start<F>(config: &HeartbeatConfig, callback: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        let running = Arc::new(AtomicBool::new(true));
        let window = ActiveHours::parse(&config.active_hours);
        let interval = Duration::from_secs(config.interval_minutes.max(1) * 60);

        let task = {
            let running = running.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                // the immediate first tick would fire at startup; skip it
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    if !running.load(Ordering::Relaxed) {
                        break;
                    }
                    let hour = Local::now().hour();
                    if !window.contains(hour) {
                        debug!(hour, "heartbeat suppressed outside active hours");
                        continue;
                    }
                    callback();
                }
            })
        };

        info!(
            interval_minutes = config.interval_minutes,
            window = %config.active_hours,
            "heartbeat scheduler started"
        );
        Self {
            running,
            task: Mutex::new(Some(task)),
        }
    }

    /// Stop ticking.  Idempotent; any tick already scheduled becomes a
    /// no-op.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(task) = self.task.lock().unwrap_or_else(|e| e.into_inner()).take() {
            task.abort();
        }
    }
}

impl Drop for HeartbeatScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn event(kind: SystemEventKind, text: &str) -> SystemEvent {
        SystemEvent {
            kind,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }

    // ── Prompt resolution ─────────────────────────────────────────────────────

    #[test]
    fn empty_events_give_standard_prompt() {
        let prompt = resolve_heartbeat_prompt(&[]);
        assert!(prompt.contains("HEARTBEAT.md"));
        assert!(prompt.contains(HEARTBEAT_OK));
    }

    #[test]
    fn exec_events_win_over_cron() {
        let events = vec![
            event(SystemEventKind::Exec, "Daily backup completed with 0 errors"),
            event(SystemEventKind::Cron, "Check project deadlines"),
        ];
        let prompt = resolve_heartbeat_prompt(&events);
        assert!(prompt.contains("Daily backup completed"));
        assert!(!prompt.contains("deadlines"));
    }

    #[test]
    fn all_exec_texts_are_included() {
        let events = vec![
            event(SystemEventKind::Exec, "job one done"),
            event(SystemEventKind::Exec, "job two done"),
        ];
        let prompt = resolve_heartbeat_prompt(&events);
        assert!(prompt.contains("job one done"));
        assert!(prompt.contains("job two done"));
    }

    #[test]
    fn cron_events_produce_reminder_prompt() {
        let events = vec![event(SystemEventKind::Cron, "water the plants")];
        let prompt = resolve_heartbeat_prompt(&events);
        assert!(prompt.contains("Scheduled reminder"));
        assert!(prompt.contains("water the plants"));
        assert!(!prompt.contains("HEARTBEAT.md"));
    }

    #[test]
    fn system_events_alone_fall_back_to_standard_prompt() {
        let events = vec![event(SystemEventKind::System, "disk almost full")];
        let prompt = resolve_heartbeat_prompt(&events);
        assert!(prompt.contains("HEARTBEAT.md"));
    }

    #[test]
    fn sentinel_detection_is_literal() {
        assert!(is_heartbeat_ok("HEARTBEAT_OK"));
        assert!(is_heartbeat_ok("  HEARTBEAT_OK\n"));
        assert!(!is_heartbeat_ok("HEARTBEAT_OK and more"));
        assert!(!is_heartbeat_ok("heartbeat_ok"));
    }

    // ── Active hours ──────────────────────────────────────────────────────────

    #[test]
    fn window_start_inclusive_end_exclusive() {
        let w = ActiveHours::parse("8-21");
        assert!(!w.contains(7));
        assert!(w.contains(8));
        assert!(w.contains(20));
        assert!(!w.contains(21));
    }

    #[test]
    fn window_wrapping_midnight() {
        let w = ActiveHours::parse("22-6");
        assert!(w.contains(23));
        assert!(w.contains(0));
        assert!(w.contains(5));
        assert!(!w.contains(6));
        assert!(!w.contains(12));
    }

    #[test]
    fn garbage_window_is_always_active() {
        let w = ActiveHours::parse("whenever");
        for hour in 0..24 {
            assert!(w.contains(hour));
        }
    }

    #[test]
    fn out_of_range_hours_fall_back() {
        let w = ActiveHours::parse("8-25");
        assert!(w.contains(3), "fallback window is always active");
    }

    // ── Scheduler lifecycle ───────────────────────────────────────────────────

    #[tokio::test]
    async fn stop_prevents_future_ticks() {
        use std::sync::atomic::AtomicUsize;
        let count = Arc::new(AtomicUsize::new(0));
        let config = HeartbeatConfig {
            enabled: true,
            interval_minutes: 1,
            active_hours: "0-24".into(),
            deliver_to: "last".into(),
        };
        let scheduler = {
            let count = count.clone();
            HeartbeatScheduler::start(&config, move || {
                count.fetch_add(1, Ordering::Relaxed);
            })
        };
        scheduler.stop();
        // a minute-scale interval cannot have ticked yet, and after stop it
        // never will
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(count.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let config = HeartbeatConfig::default();
        let scheduler = HeartbeatScheduler::start(&config, || {});
        scheduler.stop();
        scheduler.stop();
    }
}

// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Time-driven behaviour: cron jobs, the heartbeat tick, and the buffer
//! of asynchronous system events that steers heartbeat prompts.
//!
//! One re-armable timer serves all cron jobs: after every fire (and
//! after every CRUD mutation) the timer is re-armed against the job with
//! the earliest next fire time.  The heartbeat runs on its own periodic
//! tick, gated by the configured active hours.

mod cron_store;
mod events;
mod heartbeat;
mod process;
mod timer;

pub use cron_store::{
    next_fire, validate_job_input, CronActionResult, CronJob, CronPayload, CronStore, CronUpdate,
    Schedule,
};
pub use events::{SystemEvent, SystemEventKind, SystemEvents};
pub use heartbeat::{
    is_heartbeat_ok, resolve_heartbeat_prompt, ActiveHours, HeartbeatScheduler, HEARTBEAT_OK,
};
pub use process::{ProcessRegistry, ProcessSession};
pub use timer::CronTimer;

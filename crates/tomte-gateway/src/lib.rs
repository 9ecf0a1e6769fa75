// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The dispatch core: one bounded queue, one consumer loop, one router.
//!
//! Transports enqueue [`AdapterMessage`]s; the single-consumer
//! [`Dispatcher`] resolves each into a session, runs the agent turn, and
//! routes the reply back through the [`Router`].  Synthetic heartbeat
//! and cron messages travel the same path and are delivered according to
//! the configured `deliver_to` policy.  At most one turn is in flight at
//! any instant: the agent owns shared workspace state.

mod channel;
mod dispatch;
mod progress;
mod queue;
mod router;

pub use channel::{Channel, MockChannel, ProgressChannel};
pub use dispatch::{validate_heartbeat_target, Dispatcher};
pub use progress::ProgressAccumulator;
pub use queue::{AdapterMessage, EnqueueResult, MessageQueue, CRON_SOURCE, HEARTBEAT_SOURCE};
pub use router::Router;

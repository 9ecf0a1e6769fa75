// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Line-based stdio channel, attached when no other transport is
//! configured.  One terminal line in, one reply out: enough to drive
//! the whole dispatch pipeline from a shell.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::warn;

use tomte_gateway::{AdapterMessage, Channel, MessageQueue};

pub const STDIO_CHANNEL: &str = "stdio";
const STDIO_SOURCE_ID: &str = "terminal";

pub struct StdioChannel;

#[async_trait]
impl Channel for StdioChannel {
    fn name(&self) -> &str {
        STDIO_CHANNEL
    }

    async fn start(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn stop(&self) {}

    async fn send_response(&self, _source_id: &str, text: &str) -> anyhow::Result<()> {
        println!("{text}");
        Ok(())
    }
}

/// Read stdin lines into the queue until EOF.  Runs as its own task.
pub async fn pump_stdin(queue: Arc<MessageQueue>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                let result = queue.enqueue(AdapterMessage::new(
                    STDIO_CHANNEL,
                    STDIO_SOURCE_ID,
                    line,
                ));
                if !result.accepted {
                    eprintln!("(queue full, message dropped — try again shortly)");
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "stdin read failed");
                break;
            }
        }
    }
}

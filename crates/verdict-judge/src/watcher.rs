//! Dispute watcher: polls `DisputeFiled` events and hands them to the
//! dispute handler, advancing the block cursor only after the whole batch
//! is persisted so a failed tick replays safely.

use std::sync::Arc;

use serde_json::Value;

use verdict_core::VerdictError;
use verdict_escrow::{EscrowBackend, EVENT_DISPUTE_FILED};

#[derive(Debug, Clone)]
pub struct DisputeEvent {
    pub dispute_id: u64,
    pub plaintiff: String,
    pub defendant: String,
    pub block_number: u64,
}

pub struct DisputeWatcher {
    escrow: Arc<dyn EscrowBackend>,
}

impl DisputeWatcher {
    pub fn new(escrow: Arc<dyn EscrowBackend>) -> Self {
        Self { escrow }
    }

    /// One poll: events since `from_block` plus the cursor value to persist
    /// after the batch is handled.
    pub async fn poll(&self, from_block: u64) -> Result<(Vec<DisputeEvent>, u64), VerdictError> {
        let logs = self
            .escrow
            .poll_events(EVENT_DISPUTE_FILED, from_block, None)
            .await?;

        let mut events = Vec::with_capacity(logs.len());
        let mut last_block = from_block;
        for log in logs {
            last_block = last_block.max(log.block_number);
            events.push(DisputeEvent {
                dispute_id: log.args.get("disputeId").and_then(Value::as_u64).unwrap_or(0),
                plaintiff: log
                    .args
                    .get("plaintiff")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                defendant: log
                    .args
                    .get("defendant")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                block_number: log.block_number,
            });
        }

        Ok((events, last_block + 1))
    }
}

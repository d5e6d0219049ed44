//! Reputation watcher: applies score deltas from `RulingSubmitted` and
//! `EvidenceCommitted` events, keyed so duplicate deliveries are no-ops.

use std::sync::Arc;

use serde_json::{json, Value};
use tracing::error;

use verdict_core::{Did, VerdictError};
use verdict_escrow::{EscrowBackend, EVENT_EVIDENCE_COMMITTED, EVENT_RULING_SUBMITTED};

use crate::storage::ReputationStore;

pub const DELTA_COMPLETED: i64 = 1;
pub const DELTA_WON: i64 = 2;
pub const DELTA_LOST: i64 = -5;
pub const DELTA_LOST_AS_FILER: i64 = -3;

pub struct ReputationWatcher {
    pub store: Arc<ReputationStore>,
    pub escrow: Arc<dyn EscrowBackend>,
}

fn to_did(address: &str) -> String {
    Did::parse(address)
        .map(|did| did.to_string())
        .unwrap_or_else(|_| address.to_string())
}

impl ReputationWatcher {
    pub fn new(store: Arc<ReputationStore>, escrow: Arc<dyn EscrowBackend>) -> Self {
        Self { store, escrow }
    }

    /// One poll over both event streams; returns the next cursor value.
    pub async fn poll_once(&self, from_block: u64) -> Result<u64, VerdictError> {
        let mut last_block = from_block;

        let rulings = self
            .escrow
            .poll_events(EVENT_RULING_SUBMITTED, from_block, None)
            .await?;
        for log in rulings {
            last_block = last_block.max(log.block_number);
            let dispute_id = log.args.get("disputeId").and_then(Value::as_u64).unwrap_or(0);
            let winner = log.args.get("winner").and_then(Value::as_str);
            let loser = log.args.get("loser").and_then(Value::as_str);

            let plaintiff = self
                .escrow
                .get_dispute(dispute_id)
                .await?
                .map(|d| d.plaintiff.to_checksum());

            if let Some(winner) = winner {
                self.store.apply_event(
                    &to_did(winner),
                    DELTA_WON,
                    "won_dispute",
                    &format!("ruling-win-{dispute_id}-{winner}"),
                    &json!({"disputeId": dispute_id}),
                )?;
            }
            if let Some(loser) = loser {
                self.store.apply_event(
                    &to_did(loser),
                    DELTA_LOST,
                    "lost_dispute",
                    &format!("ruling-lose-{dispute_id}-{loser}"),
                    &json!({"disputeId": dispute_id}),
                )?;
                let lost_as_filer = plaintiff
                    .as_deref()
                    .is_some_and(|p| p.eq_ignore_ascii_case(loser));
                if lost_as_filer {
                    self.store.apply_event(
                        &to_did(loser),
                        DELTA_LOST_AS_FILER,
                        "lost_as_filer",
                        &format!("ruling-filer-loss-{dispute_id}-{loser}"),
                        &json!({"disputeId": dispute_id}),
                    )?;
                }
            }
        }

        let commits = self
            .escrow
            .poll_events(EVENT_EVIDENCE_COMMITTED, from_block, None)
            .await?;
        for log in commits {
            last_block = last_block.max(log.block_number);
            if let Some(agent) = log.args.get("agent").and_then(Value::as_str) {
                self.store.apply_event(
                    &to_did(agent),
                    DELTA_COMPLETED,
                    "completed_without_dispute",
                    &format!("evidence-commit-{}-{agent}", log.tx_hash),
                    &json!({"txHash": log.tx_hash}),
                )?;
            }
        }

        Ok(last_block + 1)
    }

    /// Poll forever; the cursor only advances after a fully applied batch.
    pub async fn run_forever(&self, poll_sec: f64) {
        loop {
            let from_block = match self.store.get_cursor("reputation.from_block", 0) {
                Ok(value) => value,
                Err(e) => {
                    error!(error = %e, "reputation cursor read failed");
                    tokio::time::sleep(std::time::Duration::from_secs_f64(poll_sec)).await;
                    continue;
                }
            };
            match self.poll_once(from_block).await {
                Ok(next) => {
                    if let Err(e) = self.store.set_cursor("reputation.from_block", next) {
                        error!(error = %e, "reputation cursor write failed");
                    }
                }
                Err(e) => error!(error = %e, "reputation watcher tick failed"),
            }
            tokio::time::sleep(std::time::Duration::from_secs_f64(poll_sec)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use verdict_core::Address;
    use verdict_escrow::{DryRunBackend, FileDisputeParams};

    fn contract() -> Address {
        Address::from_hex("0x00000000000000000000000000000000000000aa").unwrap()
    }

    fn consumer() -> Address {
        Address::from_hex("0x00000000000000000000000000000000000000cc").unwrap()
    }

    fn provider() -> Address {
        Address::from_hex("0x00000000000000000000000000000000000000dd").unwrap()
    }

    async fn file_and_rule(escrow: &DryRunBackend, winner: Address) -> u64 {
        let tx = escrow
            .file_dispute(
                "agreement-1",
                FileDisputeParams {
                    defendant: Some(provider()),
                    stake: 100,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let dispute_id = tx.extra.unwrap()["disputeId"].as_u64().unwrap();
        escrow
            .submit_ruling(dispute_id, &json!({"winner": winner.to_checksum()}))
            .await
            .unwrap();
        dispute_id
    }

    #[tokio::test]
    async fn ruling_applies_win_and_loss_deltas() {
        // Filing signer (plaintiff) is the consumer; provider wins.
        let escrow = Arc::new(
            DryRunBackend::temporary(Some(consumer()), contract()).unwrap(),
        );
        file_and_rule(&escrow, provider()).await;

        let store = Arc::new(ReputationStore::temporary().unwrap());
        let watcher = ReputationWatcher::new(Arc::clone(&store), escrow);
        watcher.poll_once(0).await.unwrap();

        let provider_did = Did::from_address(provider()).to_string();
        let consumer_did = Did::from_address(consumer()).to_string();
        assert_eq!(store.get_reputation(&provider_did).unwrap()["score"], 102);
        // Loser is also the filer: −5 and −3.
        assert_eq!(store.get_reputation(&consumer_did).unwrap()["score"], 92);
    }

    #[tokio::test]
    async fn duplicate_delivery_changes_score_once() {
        let escrow = Arc::new(
            DryRunBackend::temporary(Some(consumer()), contract()).unwrap(),
        );
        file_and_rule(&escrow, consumer()).await;

        let store = Arc::new(ReputationStore::temporary().unwrap());
        let watcher = ReputationWatcher::new(Arc::clone(&store), escrow);
        // Same block range polled twice: identical event keys, one effect.
        watcher.poll_once(0).await.unwrap();
        watcher.poll_once(0).await.unwrap();

        let consumer_did = Did::from_address(consumer()).to_string();
        assert_eq!(
            store.get_reputation(&consumer_did).unwrap()["score"],
            102,
            "winner gains exactly +2, not +4"
        );
    }

    #[tokio::test]
    async fn evidence_commit_rewards_the_agent() {
        let escrow = Arc::new(
            DryRunBackend::temporary(Some(provider()), contract()).unwrap(),
        );
        escrow.commit_evidence_hash("agreement-1", "0xroot").await.unwrap();

        let store = Arc::new(ReputationStore::temporary().unwrap());
        let watcher = ReputationWatcher::new(Arc::clone(&store), escrow);
        let next = watcher.poll_once(0).await.unwrap();
        assert!(next > 0);

        let provider_did = Did::from_address(provider()).to_string();
        let rep = store.get_reputation(&provider_did).unwrap();
        assert_eq!(rep["score"], 101);
        assert_eq!(rep["history"][0]["reason"], "completed_without_dispute");
    }
}

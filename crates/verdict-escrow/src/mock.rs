//! Dry-run escrow backend.
//!
//! A persistent key-value store that mimics the contract's externally
//! observable behavior: monotonically increasing block numbers, synthetic
//! transaction hashes, dispute structs, and an append-only event log whose
//! order is total by `(block_number, insertion_index)`. State survives
//! restarts, so watchers replay exactly what they would see on chain.
//!
//! The store is shared by every service in dry-run mode, so it stands in
//! for the chain itself. sled holds an exclusive file lock per open
//! handle; each operation therefore opens the store, works, flushes, and
//! releases it, retrying briefly while another service holds the lock.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha3::{Digest, Keccak256};
use std::path::{Path, PathBuf};

use verdict_core::{Address, VerdictError};

use crate::backend::{
    winner_from_verdict, Capabilities, ChainEvent, ContractSanity, Dispute, EscrowBackend,
    EscrowTx, FileDisputeParams, EVENT_DISPUTE_FILED, EVENT_EVIDENCE_COMMITTED,
    EVENT_PAYOUT_EXECUTED, EVENT_RULING_SUBMITTED,
};

const ZERO_EVIDENCE: &str = "0x0000000000000000000000000000000000000000000000000000000000000000";

const OPEN_RETRIES: u32 = 60;
const OPEN_RETRY_DELAY_MS: u64 = 100;

enum Mode {
    /// Shared on-disk store, opened per operation.
    Shared(PathBuf),
    /// Held in-memory store for tests.
    Held(sled::Db),
}

/// Sled trees:
///   counters — utf8 key      → u64 be   (block, dispute_id, event_seq)
///   events   — u64 be seq    → bincode(EventRow)
///   disputes — u64 be id     → json(Dispute)
pub struct DryRunBackend {
    mode: Mode,
    signer: Option<Address>,
    contract: Address,
}

struct Trees {
    db: sled::Db,
    counters: sled::Tree,
    events: sled::Tree,
    disputes: sled::Tree,
}

#[derive(Serialize, Deserialize)]
struct EventRow {
    name: String,
    block: u64,
    tx_hash: String,
    args_json: String,
}

fn storage_err(e: impl std::fmt::Display) -> VerdictError {
    VerdictError::Storage(e.to_string())
}

fn decode_u64(bytes: &[u8]) -> u64 {
    let mut arr = [0u8; 8];
    arr.copy_from_slice(&bytes[..8]);
    u64::from_be_bytes(arr)
}

fn block_start() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}

/// Another service may hold the store's exclusive lock; take turns.
async fn open_with_retry(path: &Path) -> Result<sled::Db, VerdictError> {
    let mut last_err = None;
    for _ in 0..OPEN_RETRIES {
        match sled::open(path) {
            Ok(db) => return Ok(db),
            Err(e) => {
                last_err = Some(e);
                tokio::time::sleep(std::time::Duration::from_millis(OPEN_RETRY_DELAY_MS)).await;
            }
        }
    }
    Err(VerdictError::Storage(format!(
        "mock escrow store busy: {}",
        last_err.map(|e| e.to_string()).unwrap_or_default()
    )))
}

/// Deterministic dispute transaction id derived from the agreement id, used
/// when the caller has no on-chain transaction to reference.
fn derived_tx_id(agreement_id: &str) -> u64 {
    let digest = Keccak256::digest(agreement_id.as_bytes());
    let mut arr = [0u8; 8];
    arr.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(arr) % (i64::MAX as u64)
}

impl Trees {
    fn from_db(db: sled::Db) -> Result<Self, VerdictError> {
        let counters = db.open_tree("counters").map_err(storage_err)?;
        let events = db.open_tree("events").map_err(storage_err)?;
        let disputes = db.open_tree("disputes").map_err(storage_err)?;

        // Blocks start at wall-clock seconds so restarts never rewind the
        // chain; an existing higher counter always wins.
        let start = block_start();
        match counters.get(b"block").map_err(storage_err)? {
            None => {
                counters
                    .insert(b"block", start.to_be_bytes().to_vec())
                    .map_err(storage_err)?;
            }
            Some(bytes) if decode_u64(&bytes) < start => {
                counters
                    .insert(b"block", start.to_be_bytes().to_vec())
                    .map_err(storage_err)?;
            }
            Some(_) => {}
        }

        Ok(Self {
            db,
            counters,
            events,
            disputes,
        })
    }

    fn next_counter(&self, key: &str, start: u64) -> Result<u64, VerdictError> {
        let updated = self
            .counters
            .update_and_fetch(key.as_bytes(), |old| {
                let next = match old {
                    None => start,
                    Some(bytes) => decode_u64(bytes) + 1,
                };
                Some(next.to_be_bytes().to_vec())
            })
            .map_err(storage_err)?
            .ok_or_else(|| VerdictError::Storage("counter update returned none".into()))?;
        Ok(decode_u64(&updated))
    }

    fn next_block(&self) -> Result<u64, VerdictError> {
        self.next_counter("block", block_start())
    }

    fn emit_event(&self, name: &str, args: Value, tx_hash: &str, block: u64) -> Result<(), VerdictError> {
        let seq = self.next_counter("event_seq", 1)?;
        let row = EventRow {
            name: name.to_string(),
            block,
            tx_hash: tx_hash.to_string(),
            args_json: args.to_string(),
        };
        let bytes = bincode::serialize(&row).map_err(storage_err)?;
        self.events
            .insert(seq.to_be_bytes(), bytes)
            .map_err(storage_err)?;
        Ok(())
    }

    fn put_dispute(&self, dispute_id: u64, dispute: &Dispute) -> Result<(), VerdictError> {
        let bytes = serde_json::to_vec(dispute)?;
        self.disputes
            .insert(dispute_id.to_be_bytes(), bytes)
            .map_err(storage_err)?;
        Ok(())
    }

    fn get_dispute(&self, dispute_id: u64) -> Result<Option<Dispute>, VerdictError> {
        match self
            .disputes
            .get(dispute_id.to_be_bytes())
            .map_err(storage_err)?
        {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }
}

impl DryRunBackend {
    /// Shared store at `path`; the sled handle is acquired per operation so
    /// several services can take turns on the same mock chain.
    pub fn open<P: AsRef<Path>>(
        path: P,
        signer: Option<Address>,
        contract: Address,
    ) -> Result<Self, VerdictError> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(storage_err)?;
            }
        }
        Ok(Self {
            mode: Mode::Shared(path.as_ref().to_path_buf()),
            signer,
            contract,
        })
    }

    /// In-memory store for tests; dropped with the process.
    pub fn temporary(signer: Option<Address>, contract: Address) -> Result<Self, VerdictError> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .map_err(storage_err)?;
        Ok(Self {
            mode: Mode::Held(db),
            signer,
            contract,
        })
    }

    async fn with_trees<T, F>(&self, op: F) -> Result<T, VerdictError>
    where
        F: FnOnce(&Trees) -> Result<T, VerdictError>,
    {
        match &self.mode {
            Mode::Held(db) => {
                let trees = Trees::from_db(db.clone())?;
                op(&trees)
            }
            Mode::Shared(path) => {
                let db = open_with_retry(path).await?;
                let trees = Trees::from_db(db)?;
                let result = op(&trees);
                trees.db.flush().map_err(storage_err)?;
                result
            }
        }
    }

    fn synthetic_tx_hash(&self, label: &str) -> String {
        let seed = format!(
            "{label}:{}:{}:{}",
            chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default(),
            std::process::id(),
            rand::random::<u64>()
        );
        format!("0x{}", hex::encode(Keccak256::digest(seed.as_bytes())))
    }

    fn signer_or_zero(&self) -> Address {
        self.signer.unwrap_or(Address::ZERO)
    }
}

#[async_trait]
impl EscrowBackend for DryRunBackend {
    async fn deposit_pool(&self, _amount: u128) -> Result<EscrowTx, VerdictError> {
        let tx_hash = self.synthetic_tx_hash("dry-run-tx");
        let block = self.with_trees(|t| t.next_block()).await?;
        Ok(EscrowTx::new(tx_hash, block))
    }

    async fn post_bond(&self, _agreement_id: &str, _amount: u128) -> Result<EscrowTx, VerdictError> {
        let tx_hash = self.synthetic_tx_hash("dry-run-tx");
        let block = self.with_trees(|t| t.next_block()).await?;
        Ok(EscrowTx::new(tx_hash, block))
    }

    async fn commit_evidence_hash(
        &self,
        agreement_id: &str,
        root_hash: &str,
    ) -> Result<EscrowTx, VerdictError> {
        let tx_hash = self.synthetic_tx_hash("commit-evidence");
        let agent = self.signer_or_zero();
        let agreement_id = agreement_id.to_string();
        let root_hash = root_hash.to_string();
        let tx_hash_clone = tx_hash.clone();
        let block = self
            .with_trees(move |t| {
                let block = t.next_block()?;
                t.emit_event(
                    EVENT_EVIDENCE_COMMITTED,
                    json!({
                        "agreementId": agreement_id,
                        "rootHash": root_hash,
                        "agent": agent.to_checksum(),
                    }),
                    &tx_hash_clone,
                    block,
                )?;
                Ok(block)
            })
            .await?;
        Ok(EscrowTx::new(tx_hash, block))
    }

    async fn file_dispute(
        &self,
        agreement_id: &str,
        params: FileDisputeParams,
    ) -> Result<EscrowTx, VerdictError> {
        let evidence = params
            .plaintiff_evidence
            .unwrap_or_else(|| ZERO_EVIDENCE.to_string());
        let tx_id = params.tx_id.unwrap_or_else(|| derived_tx_id(agreement_id));
        // Zero-address defendant is a dry-run-only convenience.
        let defendant = params.defendant.unwrap_or(Address::ZERO);
        let plaintiff = self.signer_or_zero();
        let stake = params.stake;

        let tx_hash = self.synthetic_tx_hash("file-dispute");
        let tx_hash_clone = tx_hash.clone();
        let (dispute_id, block) = self
            .with_trees(move |t| {
                let dispute_id = t.next_counter("dispute_id", 1)?;
                t.put_dispute(
                    dispute_id,
                    &Dispute {
                        transaction_id: tx_id,
                        plaintiff,
                        defendant,
                        stake,
                        judge_fee: stake / 200,
                        tier: 0,
                        plaintiff_evidence: evidence,
                        defendant_evidence: ZERO_EVIDENCE.to_string(),
                        resolved: false,
                        winner: Address::ZERO,
                    },
                )?;
                let block = t.next_block()?;
                t.emit_event(
                    EVENT_DISPUTE_FILED,
                    json!({
                        "disputeId": dispute_id,
                        "plaintiff": plaintiff.to_checksum(),
                        "defendant": defendant.to_checksum(),
                    }),
                    &tx_hash_clone,
                    block,
                )?;
                Ok((dispute_id, block))
            })
            .await?;

        let mut tx = EscrowTx::new(tx_hash, block);
        tx.extra = Some(json!({"disputeId": dispute_id}));
        Ok(tx)
    }

    async fn submit_ruling(
        &self,
        dispute_id: u64,
        verdict: &Value,
    ) -> Result<EscrowTx, VerdictError> {
        let winner = winner_from_verdict(verdict)?;
        let ruling_hash = self.synthetic_tx_hash("submit-ruling");
        let payout_hash = self.synthetic_tx_hash("payout");
        let ruling_hash_clone = ruling_hash.clone();

        let block = self
            .with_trees(move |t| {
                let mut loser = Address::ZERO;
                let mut payout: u128 = 0;
                if let Some(mut dispute) = t.get_dispute(dispute_id)? {
                    loser = if winner == dispute.plaintiff {
                        dispute.defendant
                    } else {
                        dispute.plaintiff
                    };
                    payout = dispute.stake * 2;
                    dispute.resolved = true;
                    dispute.winner = winner;
                    t.put_dispute(dispute_id, &dispute)?;
                }

                let block = t.next_block()?;
                t.emit_event(
                    EVENT_RULING_SUBMITTED,
                    json!({
                        "disputeId": dispute_id,
                        "winner": winner.to_checksum(),
                        "loser": loser.to_checksum(),
                    }),
                    &ruling_hash_clone,
                    block,
                )?;

                let payout_block = t.next_block()?;
                t.emit_event(
                    EVENT_PAYOUT_EXECUTED,
                    json!({
                        "disputeId": dispute_id,
                        "to": winner.to_checksum(),
                        "amount": payout.to_string(),
                    }),
                    &payout_hash,
                    payout_block,
                )?;
                Ok(block)
            })
            .await?;

        Ok(EscrowTx::new(ruling_hash, block))
    }

    async fn get_dispute(&self, dispute_id: u64) -> Result<Option<Dispute>, VerdictError> {
        self.with_trees(move |t| t.get_dispute(dispute_id)).await
    }

    async fn judge_address(&self) -> Result<Option<Address>, VerdictError> {
        // The mock contract trusts whichever key the service signs with.
        Ok(self.signer)
    }

    async fn poll_events(
        &self,
        name: &str,
        from_block: u64,
        to_block: Option<u64>,
    ) -> Result<Vec<ChainEvent>, VerdictError> {
        let name = name.to_string();
        let to_block = to_block.unwrap_or(u64::MAX);
        self.with_trees(move |t| {
            let mut out = Vec::new();
            for item in t.events.iter() {
                let (key, bytes) = item.map_err(storage_err)?;
                let row: EventRow = bincode::deserialize(&bytes).map_err(storage_err)?;
                if row.name != name || row.block < from_block || row.block > to_block {
                    continue;
                }
                out.push(ChainEvent {
                    name: row.name,
                    block_number: row.block,
                    insertion_index: decode_u64(&key),
                    tx_hash: row.tx_hash,
                    args: serde_json::from_str(&row.args_json)?,
                });
            }
            Ok(out)
        })
        .await
    }

    async fn capabilities(&self) -> Capabilities {
        Capabilities {
            rpc_connected: false,
            contract_has_code: false,
            deposit_pool: true,
            post_bond: true,
            commit_evidence_hash: true,
            file_dispute: true,
            submit_ruling: true,
            payout_executed: true,
        }
    }

    async fn contract_sanity(&self) -> ContractSanity {
        ContractSanity {
            rpc_connected: false,
            contract_address: self.contract.to_checksum(),
            contract_has_code: false,
            contract_code_size: 0,
            dry_run: true,
        }
    }

    fn signer_address(&self) -> Option<Address> {
        self.signer
    }

    fn is_dry_run(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contract() -> Address {
        Address::from_hex("0x00000000000000000000000000000000000000aa").unwrap()
    }

    fn signer() -> Address {
        Address::from_hex("0x00000000000000000000000000000000000000bb").unwrap()
    }

    fn backend() -> DryRunBackend {
        DryRunBackend::temporary(Some(signer()), contract()).unwrap()
    }

    #[tokio::test]
    async fn blocks_increase_monotonically() {
        let b = backend();
        let tx1 = b.deposit_pool(1).await.unwrap();
        let tx2 = b.post_bond("a", 1).await.unwrap();
        assert!(tx2.block_number.unwrap() > tx1.block_number.unwrap());
        assert_ne!(tx1.tx_hash, tx2.tx_hash);
    }

    #[tokio::test]
    async fn commit_evidence_emits_ordered_event() {
        let b = backend();
        b.commit_evidence_hash("agreement-1", "0xabc").await.unwrap();
        b.commit_evidence_hash("agreement-2", "0xdef").await.unwrap();

        let events = b.poll_events(EVENT_EVIDENCE_COMMITTED, 0, None).await.unwrap();
        assert_eq!(events.len(), 2);
        assert!(events[0].block_number < events[1].block_number);
        assert!(events[0].insertion_index < events[1].insertion_index);
        assert_eq!(events[0].args["agreementId"], "agreement-1");
        assert_eq!(events[0].args["agent"], signer().to_checksum());
    }

    #[tokio::test]
    async fn file_dispute_stores_struct_and_returns_id() {
        let b = backend();
        let tx = b
            .file_dispute(
                "agreement-1",
                FileDisputeParams {
                    defendant: Some(contract()),
                    stake: 1000,
                    plaintiff_evidence: Some(format!("0x{}", "1".repeat(64))),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let dispute_id = tx.extra.unwrap()["disputeId"].as_u64().unwrap();
        assert_eq!(dispute_id, 1);

        let dispute = b.get_dispute(dispute_id).await.unwrap().unwrap();
        assert_eq!(dispute.stake, 1000);
        assert_eq!(dispute.judge_fee, 5);
        assert_eq!(dispute.tier, 0);
        assert!(!dispute.resolved);
        assert_eq!(dispute.plaintiff, signer());
    }

    #[tokio::test]
    async fn ruling_resolves_dispute_and_emits_payout() {
        let b = backend();
        let tx = b
            .file_dispute(
                "agreement-1",
                FileDisputeParams {
                    defendant: Some(contract()),
                    stake: 100,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let dispute_id = tx.extra.unwrap()["disputeId"].as_u64().unwrap();

        let verdict = json!({"winner": signer().to_checksum()});
        b.submit_ruling(dispute_id, &verdict).await.unwrap();

        let dispute = b.get_dispute(dispute_id).await.unwrap().unwrap();
        assert!(dispute.resolved);
        assert_eq!(dispute.winner, signer());

        let rulings = b.poll_events(EVENT_RULING_SUBMITTED, 0, None).await.unwrap();
        assert_eq!(rulings.len(), 1);
        assert_eq!(rulings[0].args["winner"], signer().to_checksum());
        assert_eq!(rulings[0].args["loser"], contract().to_checksum());

        let payouts = b.poll_events(EVENT_PAYOUT_EXECUTED, 0, None).await.unwrap();
        assert_eq!(payouts.len(), 1);
        assert_eq!(payouts[0].args["amount"], "200");
    }

    #[tokio::test]
    async fn poll_respects_block_range() {
        let b = backend();
        let tx1 = b.commit_evidence_hash("a", "0x1").await.unwrap();
        b.commit_evidence_hash("b", "0x2").await.unwrap();

        let later = b
            .poll_events(EVENT_EVIDENCE_COMMITTED, tx1.block_number.unwrap() + 1, None)
            .await
            .unwrap();
        assert_eq!(later.len(), 1);
        assert_eq!(later[0].args["agreementId"], "b");
    }

    #[tokio::test]
    async fn shared_store_survives_reopen() {
        let dir = std::env::temp_dir().join(format!(
            "verdict_mock_{}_{}",
            std::process::id(),
            rand::random::<u32>()
        ));
        let _ = std::fs::remove_dir_all(&dir);

        let first = DryRunBackend::open(&dir, Some(signer()), contract()).unwrap();
        let tx = first.commit_evidence_hash("agreement-1", "0xabc").await.unwrap();

        // A second adapter over the same path sees the same chain.
        let second = DryRunBackend::open(&dir, None, contract()).unwrap();
        let events = second
            .poll_events(EVENT_EVIDENCE_COMMITTED, 0, None)
            .await
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].tx_hash, tx.tx_hash);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn derived_tx_id_is_stable() {
        assert_eq!(derived_tx_id("agreement-x"), derived_tx_id("agreement-x"));
        assert_ne!(derived_tx_id("agreement-x"), derived_tx_id("agreement-y"));
    }
}

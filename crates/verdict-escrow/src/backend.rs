//! The uniform escrow capability surface.
//!
//! Both backends emit the same logical events (`EvidenceCommitted`,
//! `DisputeFiled`, `RulingSubmitted`, `PayoutExecuted`) with a total order
//! on `(blockNumber, insertionIndex)`, so watchers never care which backend
//! produced them.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use verdict_core::{Address, VerdictError};

pub const EVENT_EVIDENCE_COMMITTED: &str = "EvidenceCommitted";
pub const EVENT_DISPUTE_FILED: &str = "DisputeFiled";
pub const EVENT_RULING_SUBMITTED: &str = "RulingSubmitted";
pub const EVENT_PAYOUT_EXECUTED: &str = "PayoutExecuted";

/// Result of a state-changing escrow call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscrowTx {
    pub tx_hash: String,
    pub block_number: Option<u64>,
    pub status: Option<u64>,
    pub extra: Option<Value>,
}

impl EscrowTx {
    pub fn new(tx_hash: String, block_number: u64) -> Self {
        Self {
            tx_hash,
            block_number: Some(block_number),
            status: Some(1),
            extra: None,
        }
    }
}

/// One decoded contract event, totally ordered by
/// `(block_number, insertion_index)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainEvent {
    pub name: String,
    pub block_number: u64,
    pub insertion_index: u64,
    pub tx_hash: String,
    pub args: Value,
}

/// On-chain dispute struct, normalized across contract variants. The legacy
/// shape has no transaction id or tier; both default to zero.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dispute {
    pub transaction_id: u64,
    pub plaintiff: Address,
    pub defendant: Address,
    pub stake: u128,
    pub judge_fee: u128,
    pub tier: u8,
    pub plaintiff_evidence: String,
    pub defendant_evidence: String,
    pub resolved: bool,
    pub winner: Address,
}

/// Parameters for `fileDispute`. `tx_id` and a non-zero `defendant` are
/// required in live mode; the dry-run backend derives fallbacks.
#[derive(Debug, Clone, Default)]
pub struct FileDisputeParams {
    pub defendant: Option<Address>,
    pub tx_id: Option<u64>,
    pub stake: u128,
    pub plaintiff_evidence: Option<String>,
}

/// Which functions the current ABI surface offers, plus connectivity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Capabilities {
    pub rpc_connected: bool,
    pub contract_has_code: bool,
    pub deposit_pool: bool,
    pub post_bond: bool,
    pub commit_evidence_hash: bool,
    pub file_dispute: bool,
    pub submit_ruling: bool,
    pub payout_executed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractSanity {
    pub rpc_connected: bool,
    pub contract_address: String,
    pub contract_has_code: bool,
    pub contract_code_size: u64,
    pub dry_run: bool,
}

/// Uniform interface over the escrow contract; selected by configuration,
/// never by fallback at call time.
#[async_trait]
pub trait EscrowBackend: Send + Sync {
    async fn deposit_pool(&self, amount: u128) -> Result<EscrowTx, VerdictError>;

    async fn post_bond(&self, agreement_id: &str, amount: u128) -> Result<EscrowTx, VerdictError>;

    async fn commit_evidence_hash(
        &self,
        agreement_id: &str,
        root_hash: &str,
    ) -> Result<EscrowTx, VerdictError>;

    async fn file_dispute(
        &self,
        agreement_id: &str,
        params: FileDisputeParams,
    ) -> Result<EscrowTx, VerdictError>;

    async fn submit_ruling(
        &self,
        dispute_id: u64,
        verdict: &Value,
    ) -> Result<EscrowTx, VerdictError>;

    async fn get_dispute(&self, dispute_id: u64) -> Result<Option<Dispute>, VerdictError>;

    async fn judge_address(&self) -> Result<Option<Address>, VerdictError>;

    /// Events named `name` within `[from_block, to_block]` (`None` = latest),
    /// ascending by `(block_number, insertion_index)`.
    async fn poll_events(
        &self,
        name: &str,
        from_block: u64,
        to_block: Option<u64>,
    ) -> Result<Vec<ChainEvent>, VerdictError>;

    async fn capabilities(&self) -> Capabilities;

    async fn contract_sanity(&self) -> ContractSanity;

    fn signer_address(&self) -> Option<Address>;

    fn is_dry_run(&self) -> bool;
}

/// Winner address for `submitRuling`: the verdict's `winner` field, or the
/// recipient of the largest transfer as a fallback.
pub fn winner_from_verdict(verdict: &Value) -> Result<Address, VerdictError> {
    if let Some(winner) = verdict.get("winner").and_then(Value::as_str) {
        return Address::from_hex(winner);
    }

    let transfers = verdict
        .get("transfers")
        .and_then(Value::as_array)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| {
            VerdictError::Validation("verdict must include winner or transfers".into())
        })?;

    let largest = transfers
        .iter()
        .max_by_key(|t| {
            t.get("amount")
                .and_then(Value::as_str)
                .and_then(|a| a.parse::<u128>().ok())
                .unwrap_or(0)
        })
        .ok_or_else(|| VerdictError::Validation("verdict transfers empty".into()))?;

    let to = largest
        .get("to")
        .and_then(Value::as_str)
        .ok_or_else(|| VerdictError::Validation("transfer missing recipient".into()))?;
    Address::from_hex(to)
}

//! Escrow adapter: one capability surface over the on-chain contract, with a
//! live JSON-RPC backend and a persistent dry-run backend that preserves
//! event semantics. Selection is by configuration, never by fallback.

pub mod abi;
pub mod backend;
pub mod live;
pub mod mock;
mod rlp;

use std::sync::Arc;

use verdict_core::config::{env_str, ChainConfig};
use verdict_core::VerdictError;
use verdict_protocol::address_from_private_key;

pub use backend::{
    winner_from_verdict, Capabilities, ChainEvent, ContractSanity, Dispute, EscrowBackend,
    EscrowTx, FileDisputeParams, EVENT_DISPUTE_FILED, EVENT_EVIDENCE_COMMITTED,
    EVENT_PAYOUT_EXECUTED, EVENT_RULING_SUBMITTED,
};
pub use live::LiveBackend;
pub use mock::DryRunBackend;

/// Build the backend selected by `ESCROW_DRY_RUN`; the dry-run store lives at
/// `ESCROW_MOCK_DB_PATH`.
pub fn build_backend(
    config: &ChainConfig,
    private_key: Option<&str>,
) -> Result<Arc<dyn EscrowBackend>, VerdictError> {
    if config.dry_run {
        let signer = private_key.map(address_from_private_key).transpose()?;
        let path = env_str("ESCROW_MOCK_DB_PATH", "./data/escrow_mock.db");
        Ok(Arc::new(DryRunBackend::open(
            path,
            signer,
            config.contract_address,
        )?))
    } else {
        Ok(Arc::new(LiveBackend::new(
            &config.rpc_url,
            config.chain_id,
            config.contract_address,
            private_key,
        )?))
    }
}

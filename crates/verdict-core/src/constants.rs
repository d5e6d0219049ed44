//! Protocol-wide constants shared by every service.

/// Prefix of every actor identifier; the tail is the actor's address.
pub const DID_PREFIX: &str = "did:8004:";

/// Schema version stamped on clauses, receipts, and verdicts.
pub const SCHEMA_VERSION: &str = "1.0.0";

/// `prevHash` of the first receipt in an agreement, and the Merkle root of
/// an empty leaf set. A reserved sentinel, not a real digest.
pub const ZERO_HASH_SENTINEL: &str = "0x0";

/// Judge submits on-chain only at or above this confidence.
pub const CONFIDENCE_SUBMIT_THRESHOLD: f64 = 0.70;

/// Gas limit used for every escrow transaction in live mode.
pub const ESCROW_TX_GAS: u64 = 700_000;

/// Hard cap on waiting for a transaction receipt, in seconds.
pub const TX_RECEIPT_TIMEOUT_SEC: u64 = 120;

/// Default watcher polling interval, in seconds.
pub const DEFAULT_POLL_SEC: f64 = 5.0;

/// Default service ports.
pub const EVIDENCE_PORT: u16 = 4001;
pub const JUDGE_PORT: u16 = 4002;
pub const REPUTATION_PORT: u16 = 4003;
pub const RUNNER_PORT: u16 = 4004;

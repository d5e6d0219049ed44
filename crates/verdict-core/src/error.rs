use thiserror::Error;

#[derive(Debug, Error)]
pub enum VerdictError {
    // ── Validation ───────────────────────────────────────────────────────────
    #[error("validation failed: {0}")]
    Validation(String),

    // ── Integrity ────────────────────────────────────────────────────────────
    #[error("hash mismatch: expected {expected}, got {got}")]
    HashMismatch { expected: String, got: String },

    #[error("signature mismatch for {0}")]
    SignatureMismatch(String),

    #[error("receipt chain discontinuity: {0}")]
    ChainDiscontinuity(String),

    #[error("anchor root mismatch: expected {expected}, computed {computed}")]
    RootMismatch { expected: String, computed: String },

    // ── State ────────────────────────────────────────────────────────────────
    #[error("duplicate receipt sequence {sequence} for agreement {agreement_id}")]
    DuplicateSequence { agreement_id: String, sequence: u64 },

    #[error("unknown agreement: {0}")]
    UnknownAgreement(String),

    #[error("clause already exists for agreement {0}")]
    DuplicateClause(String),

    #[error("no receipts for agreement {0}")]
    NoReceipts(String),

    #[error("dispute {0} already processed")]
    DisputeAlreadyProcessed(u64),

    #[error("dispute {0} not found")]
    DisputeNotFound(u64),

    // ── Transport ────────────────────────────────────────────────────────────
    #[error("chain rpc error: {0}")]
    Rpc(String),

    #[error("http error: {0}")]
    Http(String),

    #[error("timed out: {0}")]
    Timeout(String),

    // ── Authorization ────────────────────────────────────────────────────────
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("private key required for state-changing transactions")]
    SignerMissing,

    // ── Cancellation ─────────────────────────────────────────────────────────
    #[error("cancelled: {0}")]
    Cancelled(String),

    // ── Serialization / storage ──────────────────────────────────────────────
    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("{0}")]
    Other(String),
}

impl From<serde_json::Error> for VerdictError {
    fn from(e: serde_json::Error) -> Self {
        VerdictError::Serialization(e.to_string())
    }
}

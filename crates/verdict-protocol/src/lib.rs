//! Wire protocol for the Verdict substrate: canonical JSON, keccak hashing,
//! EIP-191 signatures, Merkle anchoring, typed documents, and the receipt
//! chain verifier.
//!
//! Everything that crosses a service boundary is defined here so that every
//! service hashes and verifies the same bytes.

pub mod canonical;
pub mod chain;
pub mod documents;
pub mod hashing;
pub mod merkle;
pub mod signing;

pub use canonical::{canonical_bytes, canonical_string};
pub use chain::{verify_anchor, verify_receipt_chain, ChainExpectations};
pub use documents::{
    ArbitrationClause, EventReceipt, EventType, RemedyRule, Rule, Transfer, VerdictPackage,
};
pub use hashing::{
    clause_hash, hash_canonical, keccak_hex, receipt_hash, value_without_fields, verdict_hash,
};
pub use merkle::merkle_root;
pub use signing::{
    address_from_private_key, recover_signer_eip191, sign_hash_eip191, verify_signature_eip191,
};

//! Receipt-chain and anchor verification.
//!
//! A valid chain for one agreement is contiguous from sequence 0, carries
//! constant header fields, links each receipt's `prevHash` to its
//! predecessor's recomputed hash, and is signed by the actor named in each
//! receipt's DID. Errors accumulate; an empty list is the only success.

use verdict_core::constants::ZERO_HASH_SENTINEL;
use verdict_core::Address;

use crate::documents::EventReceipt;
use crate::merkle::merkle_root;
use crate::signing::{did_to_address, verify_signature_eip191};

/// Header fields every receipt in an agreement must agree on.
#[derive(Debug, Clone, Default)]
pub struct ChainExpectations {
    pub chain_id: Option<u64>,
    pub contract_address: Option<String>,
    pub agreement_id: Option<String>,
    pub clause_hash: Option<String>,
}

fn addresses_equal(a: &str, b: &str) -> bool {
    match (Address::from_hex(a), Address::from_hex(b)) {
        (Ok(left), Ok(right)) => left == right,
        _ => a == b,
    }
}

/// Verify a full receipt chain. Returns the accumulated error list; success
/// requires it to be empty.
pub fn verify_receipt_chain(
    receipts: &[EventReceipt],
    expected: &ChainExpectations,
) -> Vec<String> {
    let mut errors = Vec::new();

    let mut ordered: Vec<&EventReceipt> = receipts.iter().collect();
    ordered.sort_by_key(|r| r.sequence);

    for (idx, receipt) in ordered.iter().enumerate() {
        let rid = &receipt.receipt_id;

        if receipt.sequence != idx as u64 {
            errors.push(format!(
                "sequence mismatch at index={idx}: got {}",
                receipt.sequence
            ));
        }

        if let Some(chain_id) = expected.chain_id {
            if receipt.chain_id != chain_id {
                errors.push(format!("receipt {rid} has wrong chainId"));
            }
        }
        if let Some(contract) = &expected.contract_address {
            if !addresses_equal(&receipt.contract_address, contract) {
                errors.push(format!("receipt {rid} has wrong contractAddress"));
            }
        }
        if let Some(agreement) = &expected.agreement_id {
            if &receipt.agreement_id != agreement {
                errors.push(format!("receipt {rid} has wrong agreementId"));
            }
        }
        if let Some(clause_hash) = &expected.clause_hash {
            if &receipt.clause_hash != clause_hash {
                errors.push(format!("receipt {rid} has wrong clauseHash"));
            }
        }

        match receipt.compute_hash() {
            Ok(computed) if computed == receipt.receipt_hash => {}
            Ok(_) => errors.push(format!("receipt hash mismatch for {rid}")),
            Err(e) => errors.push(format!("receipt {rid} hash recompute failed: {e}")),
        }

        if idx == 0 {
            if receipt.prev_hash != ZERO_HASH_SENTINEL {
                errors.push(format!("first receipt prevHash must be {ZERO_HASH_SENTINEL}"));
            }
        } else if receipt.prev_hash != ordered[idx - 1].receipt_hash {
            errors.push(format!("prevHash mismatch for {rid}"));
        }

        match did_to_address(&receipt.actor_id) {
            Ok(signer) => {
                if !verify_signature_eip191(&receipt.receipt_hash, &receipt.signature, signer) {
                    errors.push(format!("signature mismatch for {rid}"));
                }
            }
            Err(e) => errors.push(format!("signature verification failed for {rid}: {e}")),
        }
    }

    errors
}

/// True iff `root` equals the Merkle root over `receipt_hashes` as given.
pub fn verify_anchor(root: &str, receipt_hashes: &[String]) -> bool {
    merkle_root(receipt_hashes)
        .map(|computed| computed == root)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::documents::EventType;
    use crate::hashing::hash_canonical;
    use crate::signing::{address_from_private_key, sign_hash_eip191};
    use serde_json::json;
    use verdict_core::Did;

    const CONTRACT: &str = "0x0000000000000000000000000000000000000011";
    const KEY_A: &str = "0x1111111111111111111111111111111111111111111111111111111111111111";
    const KEY_B: &str = "0x2222222222222222222222222222222222222222222222222222222222222222";

    fn did_for(key: &str) -> String {
        Did::from_address(address_from_private_key(key).unwrap()).to_string()
    }

    fn signed_receipt(
        sequence: u64,
        event_type: EventType,
        timestamp: i64,
        signer_key: &str,
        counterparty_key: &str,
        prev_hash: &str,
    ) -> EventReceipt {
        let mut receipt = EventReceipt {
            schema_version: "1.0.0".into(),
            receipt_id: format!("r-{sequence}"),
            chain_id: 48816,
            contract_address: CONTRACT.into(),
            agreement_id: "agreement-1".into(),
            clause_hash: format!("0x{}", "2".repeat(64)),
            sequence,
            event_type,
            timestamp,
            actor_id: did_for(signer_key),
            counterparty_id: did_for(counterparty_key),
            request_id: "req-1".into(),
            payload_hash: hash_canonical(&json!({"seq": sequence})),
            prev_hash: prev_hash.into(),
            metadata: json!({}),
            receipt_hash: String::new(),
            signature: String::new(),
        };
        receipt.receipt_hash = receipt.compute_hash().unwrap();
        receipt.signature = sign_hash_eip191(signer_key, &receipt.receipt_hash).unwrap();
        receipt
    }

    fn build_chain(len: usize) -> Vec<EventReceipt> {
        let mut receipts: Vec<EventReceipt> = Vec::with_capacity(len);
        for seq in 0..len as u64 {
            let prev = receipts
                .last()
                .map(|r: &EventReceipt| r.receipt_hash.clone())
                .unwrap_or_else(|| "0x0".to_string());
            let (key, counter) = if seq % 2 == 0 { (KEY_A, KEY_B) } else { (KEY_B, KEY_A) };
            let event = if seq % 2 == 0 { EventType::Request } else { EventType::Response };
            receipts.push(signed_receipt(seq, event, 1000 + seq as i64, key, counter, &prev));
        }
        receipts
    }

    fn expectations() -> ChainExpectations {
        ChainExpectations {
            chain_id: Some(48816),
            contract_address: Some(CONTRACT.into()),
            agreement_id: Some("agreement-1".into()),
            clause_hash: Some(format!("0x{}", "2".repeat(64))),
        }
    }

    #[test]
    fn valid_chains_verify_cleanly() {
        for len in [1usize, 2, 3, 5] {
            let chain = build_chain(len);
            assert!(
                verify_receipt_chain(&chain, &expectations()).is_empty(),
                "length {len} should verify"
            );
        }
    }

    #[test]
    fn order_does_not_matter_for_verification() {
        let mut chain = build_chain(4);
        chain.reverse();
        assert!(verify_receipt_chain(&chain, &expectations()).is_empty());
    }

    #[test]
    fn corrupting_any_receipt_breaks_the_chain() {
        let chain = build_chain(3);
        for victim in 0..chain.len() {
            let mut tampered = chain.clone();
            tampered[victim].timestamp += 1;
            assert!(
                !verify_receipt_chain(&tampered, &expectations()).is_empty(),
                "tampering receipt {victim} must be detected"
            );
        }
    }

    #[test]
    fn corrupting_a_link_breaks_the_chain() {
        let mut chain = build_chain(3);
        chain[1].prev_hash = format!("0x{}", "f".repeat(64));
        let errors = verify_receipt_chain(&chain, &expectations());
        assert!(errors.iter().any(|e| e.contains("prevHash mismatch")));
    }

    #[test]
    fn gap_in_sequence_is_detected() {
        let mut chain = build_chain(3);
        chain.remove(1);
        let errors = verify_receipt_chain(&chain, &expectations());
        assert!(errors.iter().any(|e| e.contains("sequence mismatch")));
    }

    #[test]
    fn foreign_signature_is_detected() {
        let mut chain = build_chain(2);
        // Re-sign receipt 0 with the wrong key; the hash still matches.
        chain[0].signature = sign_hash_eip191(KEY_B, &chain[0].receipt_hash).unwrap();
        let errors = verify_receipt_chain(&chain, &expectations());
        assert!(errors.iter().any(|e| e.contains("signature mismatch")));
    }

    #[test]
    fn header_drift_is_detected() {
        let mut chain = build_chain(2);
        chain[1].agreement_id = "agreement-other".into();
        // agreement drift also changes the hash, so expect both errors.
        chain[1].receipt_hash = chain[1].compute_hash().unwrap();
        chain[1].signature = sign_hash_eip191(KEY_B, &chain[1].receipt_hash).unwrap();
        let errors = verify_receipt_chain(&chain, &expectations());
        assert!(errors.iter().any(|e| e.contains("wrong agreementId")));
    }

    #[test]
    fn checksum_case_differences_do_not_fail_contract_check() {
        let chain = build_chain(1);
        let mut expected = expectations();
        expected.contract_address = Some(CONTRACT.to_uppercase().replace("0X", "0x"));
        assert!(verify_receipt_chain(&chain, &expected).is_empty());
    }

    #[test]
    fn anchor_root_matches_chain() {
        let chain = build_chain(3);
        let hashes: Vec<String> = chain.iter().map(|r| r.receipt_hash.clone()).collect();
        let root = merkle_root(&hashes).unwrap();
        assert!(verify_anchor(&root, &hashes));
        assert!(!verify_anchor(&format!("0x{}", "0".repeat(64)), &hashes));
    }
}

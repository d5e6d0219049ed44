//! Evidence bundle re-verification: the judge trusts nothing it did not
//! recompute itself.

use verdict_protocol::{merkle_root, verify_receipt_chain, ChainExpectations, EventReceipt};

pub struct BundleCheck {
    pub ok: bool,
    pub errors: Vec<String>,
}

/// Re-run the full chain verification and recompute the anchored root.
pub fn verify_evidence_bundle(
    receipts: &[EventReceipt],
    expected_root: &str,
    chain_id: u64,
    contract_address: &str,
    agreement_id: &str,
    clause_hash: &str,
) -> BundleCheck {
    let mut errors = verify_receipt_chain(
        receipts,
        &ChainExpectations {
            chain_id: Some(chain_id),
            contract_address: Some(contract_address.to_string()),
            agreement_id: Some(agreement_id.to_string()),
            clause_hash: Some(clause_hash.to_string()),
        },
    );

    let mut ordered: Vec<&EventReceipt> = receipts.iter().collect();
    ordered.sort_by_key(|r| r.sequence);
    let hashes: Vec<String> = ordered.iter().map(|r| r.receipt_hash.clone()).collect();
    match merkle_root(&hashes) {
        Ok(computed) if computed == expected_root => {}
        Ok(computed) => errors.push(format!(
            "anchor root mismatch expected={expected_root} computed={computed}"
        )),
        Err(e) => errors.push(format!("anchor root recompute failed: {e}")),
    }

    BundleCheck {
        ok: errors.is_empty(),
        errors,
    }
}

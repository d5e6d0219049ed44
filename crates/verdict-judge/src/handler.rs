//! Dispute handler: re-verify, extract, escalate, sign, submit.
//!
//! At-most-once side effects: the caller pre-checks `is_processed`, and the
//! verdict row insert is unique per dispute id, so a replayed event can
//! never produce a second ruling transaction.

use serde_json::{json, Value};
use tracing::{info, warn};

use verdict_core::constants::{CONFIDENCE_SUBMIT_THRESHOLD, SCHEMA_VERSION};
use verdict_core::VerdictError;
use verdict_escrow::EscrowBackend;
use verdict_protocol::{sign_hash_eip191, Transfer, VerdictPackage};

use crate::evidence::EvidenceSource;
use crate::facts::{extract_facts, Party};
use crate::opinion::{deterministic_opinion, OpinionInputs};
use crate::panel::Panel;
use crate::storage::{JudgeStore, VerdictRow};
use crate::verifier::verify_evidence_bundle;
use crate::watcher::DisputeEvent;
use crate::JudgeState;

pub const STATUS_SUBMITTED: &str = "submitted";
pub const STATUS_MANUAL_REVIEW: &str = "manual_review";

pub const REASON_HASH_MISMATCH: &str = "hash_mismatch";

pub async fn handle_dispute(state: &JudgeState, event: &DisputeEvent) -> Result<(), VerdictError> {
    if state.store.is_processed(event.dispute_id)? {
        return Ok(());
    }

    let Some(dispute) = state.escrow.get_dispute(event.dispute_id).await? else {
        warn!(dispute_id = event.dispute_id, "dispute struct not found on chain");
        return Ok(());
    };

    // The plaintiff's on-chain evidence commitment is the anchored root.
    let root_hash = if dispute.plaintiff_evidence.starts_with("0x") {
        dispute.plaintiff_evidence.clone()
    } else {
        format!("0x{}", dispute.plaintiff_evidence)
    };

    let Some(bundle) = state.evidence.bundle_by_root(&root_hash).await? else {
        warn!(dispute_id = event.dispute_id, %root_hash, "no evidence bundle for root");
        return Ok(());
    };

    let clause = &bundle.clause;
    let plaintiff = dispute.plaintiff;
    let defendant = dispute.defendant;
    let tier = dispute.tier.min(2);

    let check = verify_evidence_bundle(
        &bundle.receipts,
        &root_hash,
        clause.chain_id,
        &clause.contract_address,
        &bundle.agreement_id,
        &clause.clause_hash,
    );

    let mut flags: Vec<String> = Vec::new();
    let mut reason_codes: Vec<String>;
    let mut confidence = 0.95;
    let mut opinion = String::new();
    let facts: Value;
    let winner;

    if !check.ok {
        // Tampered or inconsistent evidence decides the case by itself.
        reason_codes = vec![REASON_HASH_MISMATCH.to_string()];
        flags.extend(check.errors.clone());
        winner = defendant;
        confidence = 0.99;
        facts = json!({"integrity_ok": false, "errors": check.errors});
    } else {
        let extracted = extract_facts(clause, &bundle.receipts);
        facts = extracted.facts;
        reason_codes = extracted.reason_codes;

        match extracted.winner {
            Some(Party::Plaintiff) => winner = plaintiff,
            Some(Party::Defendant) => winner = defendant,
            None => {
                let prior: Vec<Value> = if tier > 0 {
                    state
                        .store
                        .verdicts_for_agreement(&bundle.agreement_id)?
                        .into_iter()
                        .map(|row| row.payload)
                        .collect()
                } else {
                    Vec::new()
                };
                let summary = json!({
                    "receiptCount": bundle.receipts.len(),
                    "reasonCodes": reason_codes,
                });
                let clause_value = serde_json::to_value(clause)?;
                let ruling = state
                    .panel
                    .judge(&clause_value, &facts, &summary, tier, &prior)
                    .await;
                reason_codes.extend(ruling.reason_codes);
                confidence = ruling.confidence;
                opinion = ruling.opinion;
                winner = match ruling.winner {
                    Some(Party::Plaintiff) => plaintiff,
                    // A panel that cannot name a winner defaults to the
                    // defendant.
                    _ => defendant,
                };
            }
        }
    }

    let loser = if winner == plaintiff { defendant } else { plaintiff };

    if opinion.is_empty() {
        opinion = deterministic_opinion(&OpinionInputs {
            dispute_id: event.dispute_id,
            plaintiff: &plaintiff.to_checksum(),
            defendant: &defendant.to_checksum(),
            agreement_id: &bundle.agreement_id,
            clause: Some(clause),
            integrity_ok: check.ok,
            integrity_errors: &check.errors,
            facts: &facts,
            reason_codes: &reason_codes,
            winner: &winner.to_checksum(),
        });
    }

    let mut verdict = VerdictPackage {
        schema_version: SCHEMA_VERSION.to_string(),
        verdict_id: uuid::Uuid::new_v4().to_string(),
        dispute_id: event.dispute_id.to_string(),
        chain_id: state.chain.chain_id,
        contract_address: state.chain.contract_address.to_checksum(),
        agreement_id: bundle.agreement_id.clone(),
        clause_hash: clause.clause_hash.clone(),
        plaintiff: plaintiff.to_checksum(),
        defendant: defendant.to_checksum(),
        plaintiff_evidence: root_hash.clone(),
        defendant_evidence: dispute.defendant_evidence.clone(),
        plaintiff_stake: dispute.stake.to_string(),
        defendant_stake: dispute.stake.to_string(),
        tier,
        transfers: vec![Transfer {
            to: winner.to_checksum(),
            amount: (dispute.stake * 2).to_string(),
            reason: "dispute_resolution".to_string(),
        }],
        judge_fee: "0".to_string(),
        reason_codes: reason_codes.clone(),
        evidence_receipt_ids: bundle.receipts.iter().map(|r| r.receipt_id.clone()).collect(),
        facts,
        confidence,
        flags,
        winner: winner.to_checksum(),
        loser: loser.to_checksum(),
        full_opinion: opinion,
        verdict_hash: String::new(),
        judge_signature: String::new(),
    };
    verdict.verdict_hash = verdict.compute_hash()?;
    if let Some(judge_key) = &state.judge_key {
        verdict.judge_signature = sign_hash_eip191(judge_key, &verdict.verdict_hash)?;
    }

    // Submit iff confident and the signing key matches the on-chain judge
    // (the dry-run backend trusts its configured signer).
    let mut status = STATUS_MANUAL_REVIEW;
    let mut submit_tx_hash: Option<String> = None;
    if confidence >= CONFIDENCE_SUBMIT_THRESHOLD {
        let authorized = match (state.escrow.judge_address().await?, state.escrow.signer_address()) {
            (Some(expected), Some(signer)) => expected == signer,
            _ => false,
        };
        if authorized || state.escrow.is_dry_run() {
            let verdict_value = serde_json::to_value(&verdict)?;
            let submit = state.escrow.submit_ruling(event.dispute_id, &verdict_value).await?;
            submit_tx_hash = Some(submit.tx_hash);
            status = STATUS_SUBMITTED;
        }
    }

    if status == STATUS_MANUAL_REVIEW {
        // Added after hashing; the flag records the service's own decision,
        // not the judged content.
        verdict.flags.push("needs_manual_review".to_string());
    }

    let mut payload = serde_json::to_value(&verdict)?;
    payload["submitTxHash"] = json!(submit_tx_hash);
    payload["processedAtMs"] = json!(chrono::Utc::now().timestamp_millis());

    state.store.store_verdict(
        event.dispute_id,
        &VerdictRow {
            verdict_id: verdict.verdict_id.clone(),
            dispute_id: verdict.dispute_id.clone(),
            agreement_id: verdict.agreement_id.clone(),
            status: status.to_string(),
            payload: payload.clone(),
            created_at: chrono::Utc::now().timestamp_millis(),
        },
    )?;

    info!(
        dispute_id = event.dispute_id,
        winner = %verdict.winner,
        status,
        confidence,
        "dispute adjudicated"
    );

    state.notifier.push_verdict(&payload).await;
    state
        .notifier
        .notify(&format!(
            "dispute={} winner={} reasons={} confidence={:.2} tx={}",
            event.dispute_id,
            verdict.winner,
            reason_codes.join(","),
            confidence,
            submit_tx_hash.as_deref().unwrap_or("none"),
        ))
        .await;

    Ok(())
}

/// One watcher tick: poll, handle every new event, then persist the cursor.
/// Any error leaves the cursor untouched so the batch replays next tick.
pub async fn run_tick(state: &JudgeState, store: &JudgeStore) -> Result<(), VerdictError> {
    let from_block = store.get_cursor("judge.from_block", 0)?;
    let (events, next_block) = state.watcher.poll(from_block).await?;
    for event in &events {
        handle_dispute(state, event).await?;
    }
    store.set_cursor("judge.from_block", next_block)?;
    Ok(())
}

//! HTTP surface of the evidence service.
//!
//! Failure policy: validation and integrity problems answer 400 with a list
//! of messages and persist nothing; missing resources answer 404; everything
//! else is a 500. Receipt inserts are atomic.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use verdict_core::VerdictError;
use verdict_escrow::EscrowBackend;
use verdict_protocol::documents::{validate_clause, validate_receipt};
use verdict_protocol::{
    clause_hash, merkle_root, receipt_hash, verify_receipt_chain, ArbitrationClause,
    ChainExpectations, EventReceipt,
};

use crate::storage::{AnchorRecord, EvidenceStore};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<EvidenceStore>,
    pub escrow: Arc<dyn EscrowBackend>,
}

/// Error envelope: status code plus machine-readable messages, rendered as
/// `{"detail": [...]}`.
pub struct ApiError {
    status: StatusCode,
    detail: Vec<String>,
}

impl ApiError {
    fn bad_request(detail: Vec<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            detail,
        }
    }

    fn not_found(message: &str) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            detail: vec![message.to_string()],
        }
    }
}

impl From<VerdictError> for ApiError {
    fn from(e: VerdictError) -> Self {
        let status = match &e {
            VerdictError::Validation(_)
            | VerdictError::HashMismatch { .. }
            | VerdictError::SignatureMismatch(_)
            | VerdictError::ChainDiscontinuity(_)
            | VerdictError::RootMismatch { .. }
            | VerdictError::DuplicateSequence { .. }
            | VerdictError::DuplicateClause(_) => StatusCode::BAD_REQUEST,
            VerdictError::UnknownAgreement(_) | VerdictError::NoReceipts(_) => {
                StatusCode::NOT_FOUND
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            detail: vec![e.to_string()],
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({"detail": self.detail}))).into_response()
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/clauses", post(post_clause))
        .route("/clauses/:agreement_id", get(get_clause))
        .route("/receipts", post(post_receipt).get(list_receipts))
        .route("/receipts/:receipt_id", get(get_receipt))
        .route("/anchor", post(post_anchor))
        .route("/anchors", get(get_anchor))
        .route("/anchors/by-root/:root_hash", get(get_anchor_by_root))
        .route("/agreements/:agreement_id", get(get_agreement))
        .route("/health", get(health))
        .with_state(state)
}

async fn post_clause(
    State(state): State<AppState>,
    Json(raw): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    let errors = validate_clause(&raw);
    if !errors.is_empty() {
        return Err(ApiError::bad_request(errors));
    }
    let clause: ArbitrationClause =
        serde_json::from_value(raw.clone()).map_err(VerdictError::from)?;

    let computed = clause_hash(&raw);
    if clause.clause_hash != computed {
        return Err(ApiError::bad_request(vec![format!(
            "clauseHash mismatch expected={computed}"
        )]));
    }

    state
        .store
        .store_clause(&clause.clause_id, &clause.agreement_id, &clause.clause_hash, &raw)?;

    Ok(Json(json!({
        "ok": true,
        "clauseId": clause.clause_id,
        "clauseHash": clause.clause_hash,
    })))
}

async fn get_clause(
    State(state): State<AppState>,
    Path(agreement_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    state
        .store
        .get_clause_by_agreement(&agreement_id)?
        .map(Json)
        .ok_or_else(|| ApiError::not_found("clause not found"))
}

async fn post_receipt(
    State(state): State<AppState>,
    Json(raw): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    let errors = validate_receipt(&raw);
    if !errors.is_empty() {
        return Err(ApiError::bad_request(errors));
    }
    let receipt: EventReceipt = serde_json::from_value(raw.clone()).map_err(VerdictError::from)?;

    let computed = receipt_hash(&raw);
    if receipt.receipt_hash != computed {
        return Err(ApiError::bad_request(vec![format!(
            "receiptHash mismatch expected={computed}"
        )]));
    }

    // The chain must verify with the incoming receipt appended; this also
    // enforces contiguity, linkage, and the actor's signature.
    let existing = state.store.list_receipts(Some(&receipt.agreement_id), None)?;
    let mut chain: Vec<EventReceipt> = Vec::with_capacity(existing.len() + 1);
    for value in &existing {
        chain.push(serde_json::from_value(value.clone()).map_err(VerdictError::from)?);
    }
    chain.push(receipt.clone());
    let chain_errors = verify_receipt_chain(&chain, &ChainExpectations::default());
    if !chain_errors.is_empty() {
        return Err(ApiError::bad_request(chain_errors));
    }

    state.store.store_receipt(&receipt, &raw)?;

    Ok(Json(json!({
        "ok": true,
        "receiptId": receipt.receipt_id,
        "receiptHash": receipt.receipt_hash,
    })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReceiptsQuery {
    agreement_id: Option<String>,
    actor_id: Option<String>,
}

async fn list_receipts(
    State(state): State<AppState>,
    Query(query): Query<ReceiptsQuery>,
) -> Result<Json<Value>, ApiError> {
    let items = state
        .store
        .list_receipts(query.agreement_id.as_deref(), query.actor_id.as_deref())?;
    Ok(Json(json!({"count": items.len(), "items": items})))
}

async fn get_receipt(
    State(state): State<AppState>,
    Path(receipt_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    state
        .store
        .get_receipt(&receipt_id)?
        .map(Json)
        .ok_or_else(|| ApiError::not_found("receipt not found"))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnchorRequest {
    agreement_id: String,
}

async fn post_anchor(
    State(state): State<AppState>,
    Json(request): Json<AnchorRequest>,
) -> Result<Json<Value>, ApiError> {
    let receipts = state.store.list_receipts(Some(&request.agreement_id), None)?;
    if receipts.is_empty() {
        return Err(ApiError::not_found("no receipts for agreement"));
    }

    let mut receipt_hashes = Vec::with_capacity(receipts.len());
    let mut receipt_ids = Vec::with_capacity(receipts.len());
    for receipt in &receipts {
        receipt_hashes.push(
            receipt
                .get("receiptHash")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        );
        receipt_ids.push(
            receipt
                .get("receiptId")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        );
    }
    let root_hash = merkle_root(&receipt_hashes)?;

    let tx = state
        .escrow
        .commit_evidence_hash(&request.agreement_id, &root_hash)
        .await?;

    state.store.store_anchor(&AnchorRecord {
        agreement_id: request.agreement_id.clone(),
        root_hash: root_hash.clone(),
        tx_hash: tx.tx_hash.clone(),
        receipt_ids: receipt_ids.clone(),
    })?;

    Ok(Json(json!({
        "agreementId": request.agreement_id,
        "rootHash": root_hash,
        "txHash": tx.tx_hash,
        "receiptIds": receipt_ids,
    })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnchorQuery {
    agreement_id: String,
}

async fn get_anchor(
    State(state): State<AppState>,
    Query(query): Query<AnchorQuery>,
) -> Result<Json<AnchorRecord>, ApiError> {
    state
        .store
        .get_anchor(&query.agreement_id)?
        .map(Json)
        .ok_or_else(|| ApiError::not_found("anchor not found"))
}

async fn get_anchor_by_root(
    State(state): State<AppState>,
    Path(root_hash): Path<String>,
) -> Result<Json<AnchorRecord>, ApiError> {
    state
        .store
        .get_anchor_by_root(&root_hash)?
        .map(Json)
        .ok_or_else(|| ApiError::not_found("anchor not found"))
}

/// Full agreement bundle with a fresh verification pass, so callers can see
/// integrity at a glance without re-deriving anything.
async fn get_agreement(
    State(state): State<AppState>,
    Path(agreement_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let clause = state
        .store
        .get_clause_by_agreement(&agreement_id)?
        .ok_or_else(|| ApiError::not_found("clause not found"))?;
    let receipts = state.store.list_receipts(Some(&agreement_id), None)?;
    let anchor = state.store.get_anchor(&agreement_id)?;

    let mut typed: Vec<EventReceipt> = Vec::with_capacity(receipts.len());
    for value in &receipts {
        typed.push(serde_json::from_value(value.clone()).map_err(VerdictError::from)?);
    }
    let expectations = ChainExpectations {
        chain_id: clause.get("chainId").and_then(Value::as_u64),
        contract_address: clause
            .get("contractAddress")
            .and_then(Value::as_str)
            .map(str::to_string),
        agreement_id: Some(agreement_id.clone()),
        clause_hash: clause
            .get("clauseHash")
            .and_then(Value::as_str)
            .map(str::to_string),
    };
    let chain_errors = verify_receipt_chain(&typed, &expectations);

    let receipt_hashes: Vec<String> = typed.iter().map(|r| r.receipt_hash.clone()).collect();
    let expected_root = merkle_root(&receipt_hashes)?;
    let anchored_root = anchor.as_ref().map(|a| a.root_hash.clone());
    let root_matches = anchored_root.as_deref() == Some(expected_root.as_str());

    Ok(Json(json!({
        "agreementId": agreement_id,
        "clause": clause,
        "receipts": receipts,
        "anchor": anchor,
        "chainVerification": {
            "ok": chain_errors.is_empty(),
            "errors": chain_errors,
        },
        "expectedRoot": expected_root,
        "anchoredRoot": anchored_root,
        "rootMatches": root_matches,
    })))
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    let sanity = state.escrow.contract_sanity().await;
    let status = if !sanity.contract_has_code && !sanity.dry_run {
        "degraded"
    } else {
        "ok"
    };
    Json(json!({"status": status, "escrow": sanity}))
}

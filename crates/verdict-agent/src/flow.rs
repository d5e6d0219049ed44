//! Scripted end-to-end flows: the happy path and the dispute path. Both
//! emit structured progress events through the caller's sink and honor a
//! cooperative cancel flag at every step boundary.

use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use verdict_core::config::{env_str, ChainConfig};
use verdict_core::VerdictError;
use verdict_escrow::{EscrowBackend, FileDisputeParams};

use crate::client::{ReceiptClient, ReceiptSpec};
use crate::identity::ActorIdentity;
use crate::paid::PaidClient;

/// Where flow progress events go (the orchestrator's broadcast, usually).
pub type ProgressSink = Arc<dyn Fn(Value) + Send + Sync>;

pub struct FlowContext {
    pub emit: ProgressSink,
    pub cancel: Arc<AtomicBool>,
    pub agreement_window_sec: u64,
}

impl FlowContext {
    fn checkpoint(&self) -> Result<(), VerdictError> {
        if self.cancel.load(Ordering::SeqCst) {
            return Err(VerdictError::Cancelled("run cancelled".into()));
        }
        Ok(())
    }

    fn step_start(&self, step_id: &str, label: &str, message: &str) -> Result<(), VerdictError> {
        self.checkpoint()?;
        (self.emit)(json!({
            "type": "step.started",
            "stepId": step_id,
            "label": label,
            "status": "running",
            "message": message,
        }));
        Ok(())
    }

    fn step_done(
        &self,
        step_id: &str,
        label: &str,
        message: &str,
        artifacts: Option<Value>,
    ) -> Result<(), VerdictError> {
        self.checkpoint()?;
        let mut event = json!({
            "type": "step.updated",
            "stepId": step_id,
            "label": label,
            "status": "done",
            "message": message,
        });
        if let Some(artifacts) = artifacts {
            event["artifacts"] = artifacts;
        }
        (self.emit)(event);
        Ok(())
    }
}

struct FlowSetup {
    rc: ReceiptClient,
    provider: ActorIdentity,
    consumer: ActorIdentity,
    chain: ChainConfig,
    provider_url: String,
}

fn setup(ctx: &FlowContext) -> Result<FlowSetup, VerdictError> {
    let evidence_url = env_str("EVIDENCE_SERVICE_URL", "http://127.0.0.1:4001");
    let provider_url = env_str("PROVIDER_API_URL", "http://127.0.0.1:4000");

    let provider_key = env_str("PROVIDER_PRIVATE_KEY", "");
    let consumer_key = env_str("CONSUMER_PRIVATE_KEY", "");
    if provider_key.is_empty() || consumer_key.is_empty() {
        return Err(VerdictError::Validation(
            "PROVIDER_PRIVATE_KEY and CONSUMER_PRIVATE_KEY are required".into(),
        ));
    }

    let setup = FlowSetup {
        rc: ReceiptClient::new(&evidence_url),
        provider: ActorIdentity::from_key(&provider_key)?,
        consumer: ActorIdentity::from_key(&consumer_key)?,
        chain: ChainConfig::from_env()?,
        provider_url,
    };

    ctx.step_done(
        "agent_init",
        "Initialize agents and wallets",
        "Loaded provider and consumer identities from env",
        None,
    )?;
    Ok(setup)
}

const STAKE: u128 = 1_000_000_000_000_000;

/// Happy path: clause → deposits → paid call with receipts → anchor → wait
/// out the dispute window.
pub async fn run_happy_flow(ctx: &FlowContext) -> Result<Value, VerdictError> {
    let s = setup(ctx)?;
    let agreement_id = uuid::Uuid::new_v4().to_string();
    let contract = s.chain.contract_address.to_checksum();

    ctx.step_start("clause_created", "Create arbitration clause", "Preparing clause fields")?;
    let clause = s.rc.create_clause(
        &agreement_id,
        s.chain.chain_id,
        &contract,
        ctx.agreement_window_sec,
        ctx.agreement_window_sec,
    );
    let clause_digest = clause["clauseHash"].as_str().unwrap_or_default().to_string();
    s.rc.post_clause(&clause).await?;
    ctx.step_done(
        "clause_created",
        "Create arbitration clause",
        "Clause stored in evidence service",
        Some(json!({"agreementId": agreement_id, "clauseId": clause["clauseId"]})),
    )?;

    let provider_escrow = verdict_escrow::build_backend(&s.chain, Some(s.provider.private_key.as_str()))?;
    let consumer_escrow = verdict_escrow::build_backend(&s.chain, Some(s.consumer.private_key.as_str()))?;

    ctx.step_start("deposit_pool", "Provider deposits escrow pool", "Submitting deposit transaction")?;
    let deposit_tx = provider_escrow.deposit_pool(STAKE).await?;
    ctx.step_done(
        "deposit_pool",
        "Provider deposits escrow pool",
        "Pool deposit complete",
        Some(json!({"txHash": deposit_tx.tx_hash, "contractAddress": contract})),
    )?;

    ctx.step_start("post_bond", "Consumer posts bond", "Submitting bond transaction")?;
    let bond_tx = consumer_escrow.post_bond(&agreement_id, STAKE).await?;
    ctx.step_done(
        "post_bond",
        "Consumer posts bond",
        "Bond transaction complete",
        Some(json!({"txHash": bond_tx.tx_hash, "agreementId": agreement_id})),
    )?;

    ctx.step_start("provider_call", "Provider API call", "Requesting /api/data with payment")?;
    let paid = PaidClient::new(s.consumer.clone());
    let request_id = uuid::Uuid::new_v4().to_string();

    let req_receipt = s.rc.create_receipt(ReceiptSpec {
        chain_id: s.chain.chain_id,
        contract_address: &contract,
        agreement_id: &agreement_id,
        clause_hash: &clause_digest,
        sequence: 0,
        actor: &s.consumer,
        counterparty: &s.provider,
        event_type: "request",
        request_id: &request_id,
        payload: json!({"path": "/api/data", "requestId": request_id}),
        prev_hash: s.rc.genesis_prev_hash(),
        metadata: json!({}),
    })?;
    s.rc.post_receipt(&req_receipt).await?;
    ctx.step_done(
        "provider_call",
        "Consumer request receipt",
        "Request receipt recorded",
        Some(json!({"receiptId": req_receipt["receiptId"], "actorId": req_receipt["actorId"]})),
    )?;

    let response = paid.get(&format!("{}/api/data", s.provider_url)).await?;

    let res_receipt = s.rc.create_receipt(ReceiptSpec {
        chain_id: s.chain.chain_id,
        contract_address: &contract,
        agreement_id: &agreement_id,
        clause_hash: &clause_digest,
        sequence: 1,
        actor: &s.provider,
        counterparty: &s.consumer,
        event_type: "response",
        request_id: &request_id,
        payload: response.payload.clone(),
        prev_hash: req_receipt["receiptHash"].as_str().unwrap_or_default(),
        metadata: json!({
            "status_code": response.status_code,
            "evidence_hash": response.evidence_hash,
        }),
    })?;
    s.rc.post_receipt(&res_receipt).await?;
    ctx.step_done(
        "provider_call",
        "Provider response receipt",
        "Response receipt recorded",
        Some(json!({"receiptId": res_receipt["receiptId"], "statusCode": response.status_code})),
    )?;

    ctx.step_start("payment_receipt", "Record payment event", "Signing payment evidence")?;
    let payment_receipt = s.rc.create_receipt(ReceiptSpec {
        chain_id: s.chain.chain_id,
        contract_address: &contract,
        agreement_id: &agreement_id,
        clause_hash: &clause_digest,
        sequence: 2,
        actor: &s.consumer,
        counterparty: &s.provider,
        event_type: "payment",
        request_id: &request_id,
        payload: json!({"network": env_str("PAYMENT_NETWORK", "eip155:84532")}),
        prev_hash: res_receipt["receiptHash"].as_str().unwrap_or_default(),
        metadata: json!({"payment_reference": response.payment_reference}),
    })?;
    s.rc.post_receipt(&payment_receipt).await?;
    ctx.step_done(
        "payment_receipt",
        "Record payment event",
        "Payment receipt recorded",
        Some(json!({
            "receiptId": payment_receipt["receiptId"],
            "paymentReference": response.payment_reference,
        })),
    )?;

    ctx.step_start("anchor", "Anchor evidence root", "Committing evidence hash on chain")?;
    let anchor = s.rc.anchor(&agreement_id).await?;
    ctx.step_done(
        "anchor",
        "Anchor evidence root",
        "Merkle root committed on chain",
        Some(json!({
            "agreementId": agreement_id,
            "rootHash": anchor["rootHash"],
            "txHash": anchor["txHash"],
        })),
    )?;

    ctx.step_start(
        "dispute_window_wait",
        "Wait dispute window",
        &format!("Waiting {}s", ctx.agreement_window_sec),
    )?;
    tokio::time::sleep(std::time::Duration::from_secs(ctx.agreement_window_sec)).await;
    ctx.step_done("dispute_window_wait", "Wait dispute window", "Dispute window elapsed", None)?;

    Ok(json!({
        "mode": "happy",
        "agreementId": agreement_id,
        "depositTx": deposit_tx.tx_hash,
        "bondTx": bond_tx.tx_hash,
        "receiptIds": [
            req_receipt["receiptId"],
            res_receipt["receiptId"],
            payment_receipt["receiptId"],
        ],
        "anchor": anchor,
        "paymentReference": response.payment_reference,
    }))
}

/// Dispute path: bad provider call, an `sla_check` receipt flagging the
/// breach, anchor, then a dispute with the anchored root as evidence.
pub async fn run_dispute_flow(ctx: &FlowContext) -> Result<Value, VerdictError> {
    let s = setup(ctx)?;
    let agreement_id = uuid::Uuid::new_v4().to_string();
    let contract = s.chain.contract_address.to_checksum();

    ctx.step_start("clause_created", "Create arbitration clause", "Preparing clause fields")?;
    let clause = s.rc.create_clause(
        &agreement_id,
        s.chain.chain_id,
        &contract,
        ctx.agreement_window_sec,
        ctx.agreement_window_sec,
    );
    let clause_digest = clause["clauseHash"].as_str().unwrap_or_default().to_string();
    s.rc.post_clause(&clause).await?;
    ctx.step_done(
        "clause_created",
        "Create arbitration clause",
        "Clause stored for dispute path",
        Some(json!({"agreementId": agreement_id, "clauseId": clause["clauseId"]})),
    )?;

    let provider_escrow = verdict_escrow::build_backend(&s.chain, Some(s.provider.private_key.as_str()))?;
    let consumer_escrow = verdict_escrow::build_backend(&s.chain, Some(s.consumer.private_key.as_str()))?;

    ctx.step_start("deposit_pool", "Provider deposits escrow pool", "Submitting deposit transaction")?;
    let deposit_tx = provider_escrow.deposit_pool(STAKE).await?;
    ctx.step_done(
        "deposit_pool",
        "Provider deposits escrow pool",
        "Pool deposit complete",
        Some(json!({"txHash": deposit_tx.tx_hash})),
    )?;

    ctx.step_start("post_bond", "Consumer posts bond", "Submitting bond transaction")?;
    let bond_tx = consumer_escrow.post_bond(&agreement_id, STAKE).await?;
    ctx.step_done(
        "post_bond",
        "Consumer posts bond",
        "Bond transaction complete",
        Some(json!({"txHash": bond_tx.tx_hash})),
    )?;

    let paid = PaidClient::new(s.consumer.clone());
    let request_id = uuid::Uuid::new_v4().to_string();

    ctx.step_start("provider_call", "Provider API call (bad path)", "Requesting /api/data?bad=true")?;
    let req_receipt = s.rc.create_receipt(ReceiptSpec {
        chain_id: s.chain.chain_id,
        contract_address: &contract,
        agreement_id: &agreement_id,
        clause_hash: &clause_digest,
        sequence: 0,
        actor: &s.consumer,
        counterparty: &s.provider,
        event_type: "request",
        request_id: &request_id,
        payload: json!({"path": "/api/data?bad=true", "requestId": request_id}),
        prev_hash: s.rc.genesis_prev_hash(),
        metadata: json!({}),
    })?;
    s.rc.post_receipt(&req_receipt).await?;

    let response = paid.get(&format!("{}/api/data?bad=true", s.provider_url)).await?;

    let res_receipt = s.rc.create_receipt(ReceiptSpec {
        chain_id: s.chain.chain_id,
        contract_address: &contract,
        agreement_id: &agreement_id,
        clause_hash: &clause_digest,
        sequence: 1,
        actor: &s.provider,
        counterparty: &s.consumer,
        event_type: "response",
        request_id: &request_id,
        payload: response.payload.clone(),
        prev_hash: req_receipt["receiptHash"].as_str().unwrap_or_default(),
        metadata: json!({
            "status_code": response.status_code,
            "evidence_hash": response.evidence_hash,
            "bad": true,
        }),
    })?;
    s.rc.post_receipt(&res_receipt).await?;

    let sla_receipt = s.rc.create_receipt(ReceiptSpec {
        chain_id: s.chain.chain_id,
        contract_address: &contract,
        agreement_id: &agreement_id,
        clause_hash: &clause_digest,
        sequence: 2,
        actor: &s.consumer,
        counterparty: &s.provider,
        event_type: "sla_check",
        request_id: &request_id,
        payload: json!({"latency_ms": 3500, "response_ok": false}),
        prev_hash: res_receipt["receiptHash"].as_str().unwrap_or_default(),
        metadata: json!({"violation": "sla_breach:latency"}),
    })?;
    s.rc.post_receipt(&sla_receipt).await?;
    ctx.step_done(
        "provider_call",
        "Provider bad response receipts",
        "Request, response, and SLA-check receipts recorded",
        Some(json!({
            "requestReceiptId": req_receipt["receiptId"],
            "responseReceiptId": res_receipt["receiptId"],
            "slaReceiptId": sla_receipt["receiptId"],
        })),
    )?;

    ctx.step_start("anchor", "Anchor evidence root", "Committing evidence hash on chain")?;
    let anchor = s.rc.anchor(&agreement_id).await?;
    let root_hash = anchor["rootHash"].as_str().unwrap_or_default().to_string();
    ctx.step_done(
        "anchor",
        "Anchor evidence root",
        "Merkle root committed on chain",
        Some(json!({"rootHash": root_hash, "txHash": anchor["txHash"]})),
    )?;

    ctx.step_start("file_dispute", "File dispute", "Submitting dispute transaction")?;
    let dispute_tx = consumer_escrow
        .file_dispute(
            &agreement_id,
            FileDisputeParams {
                defendant: Some(s.provider.address),
                stake: STAKE,
                plaintiff_evidence: Some(root_hash),
                ..Default::default()
            },
        )
        .await?;
    let dispute_id = dispute_tx
        .extra
        .as_ref()
        .and_then(|extra| extra.get("disputeId"))
        .cloned();
    ctx.step_done(
        "file_dispute",
        "File dispute",
        "Dispute filed on-chain",
        Some(json!({"txHash": dispute_tx.tx_hash, "disputeId": dispute_id})),
    )?;

    Ok(json!({
        "mode": "dispute",
        "agreementId": agreement_id,
        "depositTx": deposit_tx.tx_hash,
        "bondTx": bond_tx.tx_hash,
        "disputeTx": dispute_tx.tx_hash,
        "disputeId": dispute_id,
        "receiptIds": [
            req_receipt["receiptId"],
            res_receipt["receiptId"],
            sla_receipt["receiptId"],
        ],
        "anchor": anchor,
        "paymentReference": response.payment_reference,
    }))
}

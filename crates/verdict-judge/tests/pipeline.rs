//! Dispute pipeline scenarios against a dry-run escrow backend: SLA breach,
//! integrity failure, rate-limit abuse, AI escalation, and idempotency.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use verdict_core::config::ChainConfig;
use verdict_core::{Address, Did, VerdictError};
use verdict_escrow::{
    DryRunBackend, EscrowBackend, FileDisputeParams, EVENT_RULING_SUBMITTED,
};
use verdict_judge::facts::Party;
use verdict_judge::handler::handle_dispute;
use verdict_judge::notifier::Notifier;
use verdict_judge::{
    DisputeEvent, DisputeWatcher, EvidenceBundle, EvidenceSource, JudgeState, JudgeStore, Panel,
    PanelRuling,
};
use verdict_protocol::{
    address_from_private_key, clause_hash, hash_canonical, merkle_root, receipt_hash,
    sign_hash_eip191, ArbitrationClause, EventReceipt,
};

const CONTRACT: &str = "0x0000000000000000000000000000000000000011";
const JUDGE_KEY: &str = "0x3333333333333333333333333333333333333333333333333333333333333333";
const CONSUMER_KEY: &str = "0x1111111111111111111111111111111111111111111111111111111111111111";
const PROVIDER_KEY: &str = "0x2222222222222222222222222222222222222222222222222222222222222222";

struct FakeEvidence {
    bundle_clause: Value,
    receipts: Vec<Value>,
}

#[async_trait]
impl EvidenceSource for FakeEvidence {
    async fn bundle_by_root(&self, root_hash: &str) -> Result<Option<EvidenceBundle>, VerdictError> {
        let clause: ArbitrationClause = serde_json::from_value(self.bundle_clause.clone())?;
        let receipts: Vec<EventReceipt> = self
            .receipts
            .iter()
            .map(|r| serde_json::from_value(r.clone()))
            .collect::<Result<_, _>>()?;
        let agreement_id = clause.agreement_id.clone();
        Ok(Some(EvidenceBundle {
            agreement_id,
            anchor: json!({"rootHash": root_hash}),
            clause,
            receipts,
        }))
    }
}

struct FakePanel {
    ruling: PanelRuling,
    called: Arc<AtomicBool>,
}

#[async_trait]
impl Panel for FakePanel {
    async fn judge(&self, _: &Value, _: &Value, _: &Value, _: u8, _: &[Value]) -> PanelRuling {
        self.called.store(true, Ordering::SeqCst);
        self.ruling.clone()
    }
}

fn make_clause(agreement: &str, sla_latency: Option<u64>, abuse_rpm: Option<u64>) -> Value {
    let sla = sla_latency
        .map(|v| json!([{"ruleId": "sla-latency", "metric": "latency_ms", "operator": "<=", "value": v, "unit": "ms"}]))
        .unwrap_or_else(|| json!([]));
    let abuse = abuse_rpm
        .map(|v| json!([{"ruleId": "abuse-rate", "metric": "requests_per_minute", "operator": "<=", "value": v, "unit": "rpm"}]))
        .unwrap_or_else(|| json!([]));
    let mut clause = json!({
        "schemaVersion": "1.0.0",
        "clauseId": format!("clause-{agreement}"),
        "chainId": 48816,
        "contractAddress": CONTRACT,
        "agreementId": agreement,
        "serviceScope": "GET /api/data",
        "slaRules": sla,
        "abuseRules": abuse,
        "disputeWindowSec": 30,
        "evidenceWindowSec": 30,
        "remedyRules": [],
        "judgeFeePercent": 5,
        "clauseHash": "",
    });
    clause["clauseHash"] = json!(clause_hash(&clause));
    clause
}

fn make_receipt(
    clause: &Value,
    sequence: u64,
    event_type: &str,
    timestamp: i64,
    request_id: &str,
    signer_key: &str,
    counterparty_key: &str,
    prev_hash: &str,
) -> Value {
    let actor = Did::from_address(address_from_private_key(signer_key).unwrap()).to_string();
    let counterparty =
        Did::from_address(address_from_private_key(counterparty_key).unwrap()).to_string();
    let mut receipt = json!({
        "schemaVersion": "1.0.0",
        "receiptId": format!("r-{sequence}"),
        "chainId": clause["chainId"],
        "contractAddress": clause["contractAddress"],
        "agreementId": clause["agreementId"],
        "clauseHash": clause["clauseHash"],
        "sequence": sequence,
        "eventType": event_type,
        "timestamp": timestamp,
        "actorId": actor,
        "counterpartyId": counterparty,
        "requestId": request_id,
        "payloadHash": hash_canonical(&json!({"seq": sequence})),
        "prevHash": prev_hash,
        "metadata": {},
        "receiptHash": "",
        "signature": "",
    });
    let digest = receipt_hash(&receipt);
    receipt["receiptHash"] = json!(digest.clone());
    receipt["signature"] = json!(sign_hash_eip191(signer_key, &digest).unwrap());
    receipt
}

fn chain_root(receipts: &[Value]) -> String {
    let hashes: Vec<String> = receipts
        .iter()
        .map(|r| r["receiptHash"].as_str().unwrap().to_string())
        .collect();
    merkle_root(&hashes).unwrap()
}

struct Harness {
    state: JudgeState,
    escrow: Arc<dyn EscrowBackend>,
    panel_called: Arc<AtomicBool>,
}

async fn harness(clause: Value, receipts: Vec<Value>, panel_ruling: PanelRuling) -> (Harness, DisputeEvent) {
    let judge_addr = address_from_private_key(JUDGE_KEY).unwrap();
    let escrow: Arc<dyn EscrowBackend> = Arc::new(
        DryRunBackend::temporary(Some(judge_addr), Address::from_hex(CONTRACT).unwrap()).unwrap(),
    );

    let root = chain_root(&receipts);
    let provider_addr = address_from_private_key(PROVIDER_KEY).unwrap();
    let tx = escrow
        .file_dispute(
            clause["agreementId"].as_str().unwrap(),
            FileDisputeParams {
                defendant: Some(provider_addr),
                stake: 1_000,
                plaintiff_evidence: Some(root),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let dispute_id = tx.extra.unwrap()["disputeId"].as_u64().unwrap();

    let panel_called = Arc::new(AtomicBool::new(false));
    let state = JudgeState {
        store: Arc::new(JudgeStore::temporary().unwrap()),
        escrow: Arc::clone(&escrow),
        evidence: Arc::new(FakeEvidence {
            bundle_clause: clause,
            receipts,
        }),
        panel: Arc::new(FakePanel {
            ruling: panel_ruling,
            called: Arc::clone(&panel_called),
        }),
        watcher: DisputeWatcher::new(Arc::clone(&escrow)),
        notifier: Notifier::from_env(),
        chain: ChainConfig {
            rpc_url: "http://127.0.0.1:0".into(),
            chain_id: 48816,
            contract_address: Address::from_hex(CONTRACT).unwrap(),
            dry_run: true,
        },
        judge_key: Some(JUDGE_KEY.to_string()),
    };

    let event = DisputeEvent {
        dispute_id,
        plaintiff: judge_addr.to_checksum(),
        defendant: provider_addr.to_checksum(),
        block_number: tx.block_number.unwrap(),
    };

    (
        Harness {
            state,
            escrow,
            panel_called,
        },
        event,
    )
}

fn unused_panel() -> PanelRuling {
    PanelRuling {
        reason_codes: vec!["llm_unused".into()],
        winner: None,
        confidence: 0.5,
        opinion: String::new(),
    }
}

#[tokio::test]
async fn sla_breach_rules_for_plaintiff() {
    let clause = make_clause("agreement-sla", Some(3000), None);
    let r0 = make_receipt(&clause, 0, "request", 1000, "q1", CONSUMER_KEY, PROVIDER_KEY, "0x0");
    let prev = r0["receiptHash"].as_str().unwrap().to_string();
    let r1 = make_receipt(&clause, 1, "response", 5000, "q1", PROVIDER_KEY, CONSUMER_KEY, &prev);

    let (h, event) = harness(clause, vec![r0, r1], unused_panel()).await;
    handle_dispute(&h.state, &event).await.unwrap();

    let row = h.state.store.get_verdict(&event.dispute_id.to_string()).unwrap().unwrap();
    assert_eq!(row.status, "submitted");
    assert_eq!(row.payload["facts"]["latency_ms"], 4000);
    assert_eq!(row.payload["reasonCodes"], json!(["sla_breach:latency"]));
    assert_eq!(row.payload["confidence"], 0.95);
    // Plaintiff in the dispute struct is the filing signer.
    assert_eq!(row.payload["winner"], row.payload["plaintiff"]);
    assert!(row.payload["submitTxHash"].as_str().unwrap().starts_with("0x"));
    assert!(!h.panel_called.load(Ordering::SeqCst));
    assert!(row.payload["fullOpinion"].as_str().unwrap().contains("RULING"));
    assert!(!row.payload["judgeSignature"].as_str().unwrap().is_empty());
}

#[tokio::test]
async fn corrupted_link_rules_for_defendant() {
    let clause = make_clause("agreement-corrupt", Some(3000), None);
    let r0 = make_receipt(&clause, 0, "request", 1000, "q1", CONSUMER_KEY, PROVIDER_KEY, "0x0");
    let prev = r0["receiptHash"].as_str().unwrap().to_string();
    let mut r1 = make_receipt(&clause, 1, "response", 2000, "q1", PROVIDER_KEY, CONSUMER_KEY, &prev);
    r1["prevHash"] = json!(format!("0x{}", "f".repeat(64)));

    let (h, event) = harness(clause, vec![r0, r1], unused_panel()).await;
    handle_dispute(&h.state, &event).await.unwrap();

    let row = h.state.store.get_verdict(&event.dispute_id.to_string()).unwrap().unwrap();
    assert_eq!(row.status, "submitted");
    assert_eq!(row.payload["reasonCodes"], json!(["hash_mismatch"]));
    assert_eq!(row.payload["confidence"], 0.99);
    assert_eq!(row.payload["winner"], row.payload["defendant"]);
    assert_eq!(row.payload["facts"]["integrity_ok"], false);
    assert!(!row.payload["flags"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn rate_limit_abuse_rules_for_plaintiff() {
    let clause = make_clause("agreement-rate", None, Some(60));
    let mut receipts = Vec::new();
    let mut prev = "0x0".to_string();
    for i in 0..61u64 {
        let r = make_receipt(
            &clause,
            i,
            "request",
            10_000 + i as i64,
            &format!("q{i}"),
            CONSUMER_KEY,
            PROVIDER_KEY,
            &prev,
        );
        prev = r["receiptHash"].as_str().unwrap().to_string();
        receipts.push(r);
    }

    let (h, event) = harness(clause, receipts, unused_panel()).await;
    handle_dispute(&h.state, &event).await.unwrap();

    let row = h.state.store.get_verdict(&event.dispute_id.to_string()).unwrap().unwrap();
    assert_eq!(row.payload["reasonCodes"], json!(["clause_violated:rate_limit"]));
    assert_eq!(row.payload["winner"], row.payload["plaintiff"]);
}

#[tokio::test]
async fn undecided_case_escalates_to_panel() {
    // No request receipts at all: the deterministic extractor cannot decide.
    let clause = make_clause("agreement-escalate", None, None);
    let r0 = make_receipt(&clause, 0, "payment", 1000, "q1", CONSUMER_KEY, PROVIDER_KEY, "0x0");

    let panel_ruling = PanelRuling {
        reason_codes: vec![],
        winner: Some(Party::Defendant),
        confidence: 0.80,
        opinion: "The record shows no deliverable was even requested.".into(),
    };
    let (h, event) = harness(clause, vec![r0], panel_ruling).await;
    handle_dispute(&h.state, &event).await.unwrap();

    assert!(h.panel_called.load(Ordering::SeqCst));
    let row = h.state.store.get_verdict(&event.dispute_id.to_string()).unwrap().unwrap();
    assert_eq!(row.status, "submitted");
    assert_eq!(row.payload["confidence"], 0.80);
    assert_eq!(row.payload["winner"], row.payload["defendant"]);
    assert_eq!(
        row.payload["fullOpinion"],
        "The record shows no deliverable was even requested."
    );
}

#[tokio::test]
async fn low_confidence_panel_goes_to_manual_review() {
    let clause = make_clause("agreement-lowconf", None, None);
    let r0 = make_receipt(&clause, 0, "payment", 1000, "q1", CONSUMER_KEY, PROVIDER_KEY, "0x0");

    let panel_ruling = PanelRuling {
        reason_codes: vec!["insufficient_signal".into()],
        winner: None,
        confidence: 0.5,
        opinion: String::new(),
    };
    let (h, event) = harness(clause, vec![r0], panel_ruling).await;
    handle_dispute(&h.state, &event).await.unwrap();

    let row = h.state.store.get_verdict(&event.dispute_id.to_string()).unwrap().unwrap();
    assert_eq!(row.status, "manual_review");
    assert!(row.payload["submitTxHash"].is_null());
    assert!(row.payload["flags"]
        .as_array()
        .unwrap()
        .contains(&json!("needs_manual_review")));
    // No ruling transaction was sent.
    let rulings = h.escrow.poll_events(EVENT_RULING_SUBMITTED, 0, None).await.unwrap();
    assert!(rulings.is_empty());
}

#[tokio::test]
async fn replayed_event_is_idempotent() {
    let clause = make_clause("agreement-replay", Some(3000), None);
    let r0 = make_receipt(&clause, 0, "request", 1000, "q1", CONSUMER_KEY, PROVIDER_KEY, "0x0");
    let prev = r0["receiptHash"].as_str().unwrap().to_string();
    let r1 = make_receipt(&clause, 1, "response", 5000, "q1", PROVIDER_KEY, CONSUMER_KEY, &prev);

    let (h, event) = harness(clause, vec![r0, r1], unused_panel()).await;
    handle_dispute(&h.state, &event).await.unwrap();
    handle_dispute(&h.state, &event).await.unwrap();

    assert_eq!(h.state.store.list_verdicts().unwrap().len(), 1);
    let rulings = h.escrow.poll_events(EVENT_RULING_SUBMITTED, 0, None).await.unwrap();
    assert_eq!(rulings.len(), 1, "one ruling transaction only");
}

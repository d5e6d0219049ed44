//! Evidence-service client plus the clause and receipt builders agents use
//! to produce signed documents.

use serde_json::{json, Value};
use std::time::Duration;

use verdict_core::constants::{SCHEMA_VERSION, ZERO_HASH_SENTINEL};
use verdict_core::VerdictError;
use verdict_protocol::{clause_hash, hash_canonical, receipt_hash, sign_hash_eip191};

use crate::identity::ActorIdentity;

/// Everything a receipt needs before it is hashed and signed.
pub struct ReceiptSpec<'a> {
    pub chain_id: u64,
    pub contract_address: &'a str,
    pub agreement_id: &'a str,
    pub clause_hash: &'a str,
    pub sequence: u64,
    pub actor: &'a ActorIdentity,
    pub counterparty: &'a ActorIdentity,
    pub event_type: &'a str,
    pub request_id: &'a str,
    pub payload: Value,
    pub prev_hash: &'a str,
    pub metadata: Value,
}

pub struct ReceiptClient {
    evidence_url: String,
    client: reqwest::Client,
}

impl ReceiptClient {
    pub fn new(evidence_url: &str) -> Self {
        Self {
            evidence_url: evidence_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(60))
                .build()
                .unwrap_or_default(),
        }
    }

    /// Default arbitration clause for the demo service scope.
    pub fn create_clause(
        &self,
        agreement_id: &str,
        chain_id: u64,
        contract_address: &str,
        dispute_window_sec: u64,
        evidence_window_sec: u64,
    ) -> Value {
        let mut clause = json!({
            "schemaVersion": SCHEMA_VERSION,
            "clauseId": uuid::Uuid::new_v4().to_string(),
            "chainId": chain_id,
            "contractAddress": contract_address,
            "agreementId": agreement_id,
            "serviceScope": "GET /api/data",
            "slaRules": [
                {"ruleId": "sla-latency", "metric": "latency_ms", "operator": "<=", "value": 3000, "unit": "ms"}
            ],
            "abuseRules": [
                {"ruleId": "abuse-rate", "metric": "requests_per_minute", "operator": "<=", "value": 60, "unit": "rpm"}
            ],
            "disputeWindowSec": dispute_window_sec,
            "evidenceWindowSec": evidence_window_sec,
            "remedyRules": [
                {"condition": "sla_breach", "action": "consumer_refund", "percent": 100}
            ],
            "judgeFeePercent": 5,
            "clauseHash": "",
        });
        clause["clauseHash"] = json!(clause_hash(&clause));
        clause
    }

    /// Build, hash, and sign one receipt.
    pub fn create_receipt(&self, spec: ReceiptSpec<'_>) -> Result<Value, VerdictError> {
        let mut receipt = json!({
            "schemaVersion": SCHEMA_VERSION,
            "receiptId": uuid::Uuid::new_v4().to_string(),
            "chainId": spec.chain_id,
            "contractAddress": spec.contract_address,
            "agreementId": spec.agreement_id,
            "clauseHash": spec.clause_hash,
            "sequence": spec.sequence,
            "eventType": spec.event_type,
            "timestamp": chrono::Utc::now().timestamp_millis(),
            "actorId": spec.actor.did.to_string(),
            "counterpartyId": spec.counterparty.did.to_string(),
            "requestId": spec.request_id,
            "payloadHash": hash_canonical(&spec.payload),
            "prevHash": spec.prev_hash,
            "metadata": spec.metadata,
            "receiptHash": "",
            "signature": "",
        });
        let digest = receipt_hash(&receipt);
        receipt["signature"] = json!(sign_hash_eip191(&spec.actor.private_key, &digest)?);
        receipt["receiptHash"] = json!(digest);
        Ok(receipt)
    }

    /// `prevHash` of the first receipt in a chain.
    pub fn genesis_prev_hash(&self) -> &'static str {
        ZERO_HASH_SENTINEL
    }

    async fn post(&self, path: &str, body: &Value) -> Result<Value, VerdictError> {
        let response = self
            .client
            .post(format!("{}{path}", self.evidence_url))
            .json(body)
            .send()
            .await
            .map_err(|e| VerdictError::Http(e.to_string()))?;
        let status = response.status();
        let payload: Value = response
            .json()
            .await
            .map_err(|e| VerdictError::Http(e.to_string()))?;
        if status.as_u16() >= 400 {
            return Err(VerdictError::Http(format!(
                "{path} returned {status}: {payload}"
            )));
        }
        Ok(payload)
    }

    pub async fn post_clause(&self, clause: &Value) -> Result<Value, VerdictError> {
        self.post("/clauses", clause).await
    }

    pub async fn post_receipt(&self, receipt: &Value) -> Result<Value, VerdictError> {
        self.post("/receipts", receipt).await
    }

    pub async fn anchor(&self, agreement_id: &str) -> Result<Value, VerdictError> {
        self.post("/anchor", &json!({"agreementId": agreement_id}))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use verdict_protocol::documents::{validate_clause, validate_receipt};
    use verdict_protocol::{verify_receipt_chain, ChainExpectations, EventReceipt};

    const KEY_A: &str = "0x1111111111111111111111111111111111111111111111111111111111111111";
    const KEY_B: &str = "0x2222222222222222222222222222222222222222222222222222222222222222";

    #[test]
    fn built_clause_passes_validation() {
        let client = ReceiptClient::new("http://127.0.0.1:4001");
        let clause = client.create_clause(
            "agreement-1",
            48816,
            "0x0000000000000000000000000000000000000011",
            30,
            30,
        );
        assert!(validate_clause(&clause).is_empty());
        assert_eq!(clause["clauseHash"], json!(clause_hash(&clause)));
    }

    #[test]
    fn built_receipts_form_a_valid_chain() {
        let client = ReceiptClient::new("http://127.0.0.1:4001");
        let consumer = ActorIdentity::from_key(KEY_A).unwrap();
        let provider = ActorIdentity::from_key(KEY_B).unwrap();
        let clause_digest = format!("0x{}", "2".repeat(64));

        let r0 = client
            .create_receipt(ReceiptSpec {
                chain_id: 48816,
                contract_address: "0x0000000000000000000000000000000000000011",
                agreement_id: "agreement-1",
                clause_hash: &clause_digest,
                sequence: 0,
                actor: &consumer,
                counterparty: &provider,
                event_type: "request",
                request_id: "q-1",
                payload: json!({"path": "/api/data"}),
                prev_hash: "0x0",
                metadata: json!({}),
            })
            .unwrap();
        assert!(validate_receipt(&r0).is_empty());

        let prev = r0["receiptHash"].as_str().unwrap().to_string();
        let r1 = client
            .create_receipt(ReceiptSpec {
                chain_id: 48816,
                contract_address: "0x0000000000000000000000000000000000000011",
                agreement_id: "agreement-1",
                clause_hash: &clause_digest,
                sequence: 1,
                actor: &provider,
                counterparty: &consumer,
                event_type: "response",
                request_id: "q-1",
                payload: json!({"ok": true}),
                prev_hash: &prev,
                metadata: json!({"status_code": 200}),
            })
            .unwrap();

        let chain: Vec<EventReceipt> = [r0, r1]
            .iter()
            .map(|r| serde_json::from_value(r.clone()).unwrap())
            .collect();
        assert!(verify_receipt_chain(&chain, &ChainExpectations::default()).is_empty());
    }
}

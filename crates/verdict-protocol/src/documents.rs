//! Typed wire documents and their schema validation.
//!
//! Unknown fields are rejected at deserialization, so a stored document
//! round-trips to exactly the field set that was hashed. Validation returns
//! an accumulated list of messages; an empty list means the document is
//! structurally valid (content checks like hash recomputation live with the
//! services).

use serde::{Deserialize, Serialize};
use serde_json::Value;

use verdict_core::constants::{DID_PREFIX, SCHEMA_VERSION, ZERO_HASH_SENTINEL};
use verdict_core::VerdictError;

use crate::hashing::{clause_hash, receipt_hash, verdict_hash};

// ── Rules ────────────────────────────────────────────────────────────────────

/// One SLA or abuse rule: `metric operator value unit`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Rule {
    pub rule_id: String,
    pub metric: String,
    pub operator: String,
    /// Numeric threshold; the wire allows int, float, or numeric string.
    pub value: Value,
    pub unit: String,
}

impl Rule {
    /// Threshold as f64, however the wire spelled it.
    pub fn numeric_value(&self) -> Option<f64> {
        match &self.value {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RemedyRule {
    pub condition: String,
    pub action: String,
    pub percent: f64,
}

// ── ArbitrationClause ────────────────────────────────────────────────────────

/// The arbitration contract both agents sign up to. Content-addressed by
/// `clauseHash = keccak(canonicalJSON(clause \ {clauseHash}))`; immutable
/// once stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ArbitrationClause {
    pub schema_version: String,
    pub clause_id: String,
    pub chain_id: u64,
    pub contract_address: String,
    pub agreement_id: String,
    pub service_scope: String,
    pub sla_rules: Vec<Rule>,
    pub abuse_rules: Vec<Rule>,
    pub dispute_window_sec: u64,
    pub evidence_window_sec: u64,
    pub remedy_rules: Vec<RemedyRule>,
    pub judge_fee_percent: f64,
    pub clause_hash: String,
}

impl ArbitrationClause {
    pub fn compute_hash(&self) -> Result<String, VerdictError> {
        Ok(clause_hash(&serde_json::to_value(self)?))
    }
}

// ── EventReceipt ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Request,
    Response,
    Payment,
    SlaCheck,
    DisputeFiled,
}

fn default_metadata() -> Value {
    Value::Object(serde_json::Map::new())
}

/// One signed entry in an agreement's hash-chained event log.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct EventReceipt {
    pub schema_version: String,
    pub receipt_id: String,
    pub chain_id: u64,
    pub contract_address: String,
    pub agreement_id: String,
    pub clause_hash: String,
    pub sequence: u64,
    pub event_type: EventType,
    /// Millisecond Unix timestamp.
    pub timestamp: i64,
    pub actor_id: String,
    pub counterparty_id: String,
    pub request_id: String,
    pub payload_hash: String,
    pub prev_hash: String,
    #[serde(default = "default_metadata")]
    pub metadata: Value,
    pub receipt_hash: String,
    pub signature: String,
}

impl EventReceipt {
    pub fn compute_hash(&self) -> Result<String, VerdictError> {
        Ok(receipt_hash(&serde_json::to_value(self)?))
    }

    /// String value under `metadata.<key>`, if present.
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }
}

// ── VerdictPackage ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Transfer {
    pub to: String,
    /// Decimal string amount in base units.
    pub amount: String,
    pub reason: String,
}

/// The judge's signed ruling bundle. `verdictHash` covers everything except
/// itself and `judgeSignature`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct VerdictPackage {
    pub schema_version: String,
    pub verdict_id: String,
    pub dispute_id: String,
    pub chain_id: u64,
    pub contract_address: String,
    pub agreement_id: String,
    pub clause_hash: String,
    pub plaintiff: String,
    pub defendant: String,
    pub plaintiff_evidence: String,
    pub defendant_evidence: String,
    pub plaintiff_stake: String,
    pub defendant_stake: String,
    pub tier: u8,
    pub transfers: Vec<Transfer>,
    pub judge_fee: String,
    pub reason_codes: Vec<String>,
    pub evidence_receipt_ids: Vec<String>,
    pub facts: Value,
    pub confidence: f64,
    pub flags: Vec<String>,
    pub winner: String,
    pub loser: String,
    pub full_opinion: String,
    pub verdict_hash: String,
    pub judge_signature: String,
}

impl VerdictPackage {
    pub fn compute_hash(&self) -> Result<String, VerdictError> {
        Ok(verdict_hash(&serde_json::to_value(self)?))
    }
}

// ── Validation ───────────────────────────────────────────────────────────────

fn check_did(field: &str, value: &str, errors: &mut Vec<String>) {
    let Some(tail) = value.strip_prefix(DID_PREFIX) else {
        errors.push(format!("{field}: must start with {DID_PREFIX}0x"));
        return;
    };
    let Some(hex_part) = tail.strip_prefix("0x") else {
        errors.push(format!("{field}: must start with {DID_PREFIX}0x"));
        return;
    };
    if hex_part.len() != 40 || !hex_part.chars().all(|c| c.is_ascii_hexdigit()) {
        errors.push(format!("{field}: DID must carry a 40-hex address"));
    }
}

fn check_digest(field: &str, value: &str, errors: &mut Vec<String>) {
    let ok = value.len() == 66
        && value.starts_with("0x")
        && value[2..].chars().all(|c| c.is_ascii_hexdigit());
    if !ok {
        errors.push(format!("{field}: must be a 0x-prefixed 32-byte hex digest"));
    }
}

fn check_schema_version(value: &str, errors: &mut Vec<String>) {
    if value != SCHEMA_VERSION {
        errors.push(format!("schemaVersion: expected {SCHEMA_VERSION}, got {value}"));
    }
}

fn check_percent(field: &str, value: f64, errors: &mut Vec<String>) {
    if !(0.0..=100.0).contains(&value) {
        errors.push(format!("{field}: must be within [0, 100]"));
    }
}

/// Structural validation of a clause document; empty list means valid.
pub fn validate_clause(value: &Value) -> Vec<String> {
    let clause: ArbitrationClause = match serde_json::from_value(value.clone()) {
        Ok(c) => c,
        Err(e) => return vec![e.to_string()],
    };
    let mut errors = Vec::new();
    check_schema_version(&clause.schema_version, &mut errors);
    if clause.chain_id == 0 {
        errors.push("chainId: must be >= 1".into());
    }
    if clause.dispute_window_sec == 0 {
        errors.push("disputeWindowSec: must be >= 1".into());
    }
    if clause.evidence_window_sec == 0 {
        errors.push("evidenceWindowSec: must be >= 1".into());
    }
    check_percent("judgeFeePercent", clause.judge_fee_percent, &mut errors);
    for (i, rule) in clause.sla_rules.iter().chain(&clause.abuse_rules).enumerate() {
        if rule.numeric_value().is_none() {
            errors.push(format!("rules/{i}/value: must be numeric"));
        }
    }
    for (i, remedy) in clause.remedy_rules.iter().enumerate() {
        check_percent(&format!("remedyRules/{i}/percent"), remedy.percent, &mut errors);
    }
    check_digest("clauseHash", &clause.clause_hash, &mut errors);
    errors
}

/// Structural validation of a receipt document; empty list means valid.
pub fn validate_receipt(value: &Value) -> Vec<String> {
    let receipt: EventReceipt = match serde_json::from_value(value.clone()) {
        Ok(r) => r,
        Err(e) => return vec![e.to_string()],
    };
    let mut errors = Vec::new();
    check_schema_version(&receipt.schema_version, &mut errors);
    if receipt.chain_id == 0 {
        errors.push("chainId: must be >= 1".into());
    }
    if receipt.timestamp < 0 {
        errors.push("timestamp: must be >= 0".into());
    }
    check_did("actorId", &receipt.actor_id, &mut errors);
    check_did("counterpartyId", &receipt.counterparty_id, &mut errors);
    check_digest("clauseHash", &receipt.clause_hash, &mut errors);
    check_digest("payloadHash", &receipt.payload_hash, &mut errors);
    check_digest("receiptHash", &receipt.receipt_hash, &mut errors);
    if receipt.prev_hash != ZERO_HASH_SENTINEL {
        check_digest("prevHash", &receipt.prev_hash, &mut errors);
    }
    if !receipt.metadata.is_object() {
        errors.push("metadata: must be an object".into());
    }
    errors
}

/// Structural validation of a verdict document; empty list means valid.
pub fn validate_verdict(value: &Value) -> Vec<String> {
    let verdict: VerdictPackage = match serde_json::from_value(value.clone()) {
        Ok(v) => v,
        Err(e) => return vec![e.to_string()],
    };
    let mut errors = Vec::new();
    check_schema_version(&verdict.schema_version, &mut errors);
    if verdict.chain_id == 0 {
        errors.push("chainId: must be >= 1".into());
    }
    if !(0.0..=1.0).contains(&verdict.confidence) {
        errors.push("confidence: must be within [0, 1]".into());
    }
    if verdict.tier > 2 {
        errors.push("tier: must be 0, 1, or 2".into());
    }
    check_digest("clauseHash", &verdict.clause_hash, &mut errors);
    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn minimal_clause() -> Value {
        json!({
            "schemaVersion": "1.0.0",
            "clauseId": "c-1",
            "chainId": 48816,
            "contractAddress": "0x0000000000000000000000000000000000000001",
            "agreementId": "a-1",
            "serviceScope": "GET /api/data",
            "slaRules": [],
            "abuseRules": [],
            "disputeWindowSec": 30,
            "evidenceWindowSec": 30,
            "remedyRules": [],
            "judgeFeePercent": 5,
            "clauseHash": format!("0x{}", "a".repeat(64)),
        })
    }

    #[test]
    fn minimal_clause_validates() {
        assert!(validate_clause(&minimal_clause()).is_empty());
    }

    #[test]
    fn unknown_field_rejected() {
        let mut clause = minimal_clause();
        clause["surprise"] = json!(true);
        let errors = validate_clause(&clause);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("surprise"));
    }

    #[test]
    fn illegal_ranges_accumulate() {
        let mut clause = minimal_clause();
        clause["chainId"] = json!(0);
        clause["disputeWindowSec"] = json!(0);
        clause["judgeFeePercent"] = json!(120);
        let errors = validate_clause(&clause);
        assert_eq!(errors.len(), 3);
    }

    #[test]
    fn receipt_rejects_bad_did_and_enum() {
        let receipt = json!({
            "schemaVersion": "1.0.0",
            "receiptId": "r-1",
            "chainId": 48816,
            "contractAddress": "0x0000000000000000000000000000000000000001",
            "agreementId": "a-1",
            "clauseHash": format!("0x{}", "a".repeat(64)),
            "sequence": 0,
            "eventType": "telegram",
            "timestamp": 1000,
            "actorId": "did:8004:0xshort",
            "counterpartyId": "did:8004:0xshort",
            "requestId": "q-1",
            "payloadHash": format!("0x{}", "b".repeat(64)),
            "prevHash": "0x0",
            "metadata": {},
            "receiptHash": format!("0x{}", "c".repeat(64)),
            "signature": "0x00",
        });
        let errors = validate_receipt(&receipt);
        // The enum failure aborts deserialization, so it surfaces alone.
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("telegram") || errors[0].contains("variant"));
    }

    #[test]
    fn receipt_metadata_defaults_to_empty_object() {
        let receipt: EventReceipt = serde_json::from_value(json!({
            "schemaVersion": "1.0.0",
            "receiptId": "r-1",
            "chainId": 48816,
            "contractAddress": "0x0000000000000000000000000000000000000001",
            "agreementId": "a-1",
            "clauseHash": format!("0x{}", "a".repeat(64)),
            "sequence": 0,
            "eventType": "request",
            "timestamp": 1000,
            "actorId": format!("did:8004:0x{}", "1".repeat(40)),
            "counterpartyId": format!("did:8004:0x{}", "2".repeat(40)),
            "requestId": "q-1",
            "payloadHash": format!("0x{}", "b".repeat(64)),
            "prevHash": "0x0",
            "receiptHash": format!("0x{}", "c".repeat(64)),
            "signature": "0x00",
        }))
        .unwrap();
        assert!(receipt.metadata.as_object().unwrap().is_empty());
    }

    #[test]
    fn event_type_wire_names() {
        assert_eq!(serde_json::to_string(&EventType::SlaCheck).unwrap(), "\"sla_check\"");
        assert_eq!(
            serde_json::to_string(&EventType::DisputeFiled).unwrap(),
            "\"dispute_filed\""
        );
    }
}

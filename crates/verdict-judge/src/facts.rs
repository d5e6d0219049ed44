//! Deterministic fact extraction from a verified receipt chain.
//!
//! Metrics:
//!   latency_ms               — max over matched request/response pairs
//!   response_format_ok       — false iff any response is tagged bad_format
//!   peak_requests_per_minute — max request count in any 60 000 ms bucket
//!   request_count / response_count
//!
//! Reason codes come from applying the clause's SLA and abuse rules to the
//! metrics. The deterministic winner is the plaintiff on any reason code,
//! the defendant when requests exist without violations, and undecided
//! otherwise.

use serde_json::{json, Value};
use std::collections::HashMap;

use verdict_protocol::{ArbitrationClause, EventReceipt, EventType};

pub const REASON_SLA_LATENCY: &str = "sla_breach:latency";
pub const REASON_RATE_LIMIT: &str = "clause_violated:rate_limit";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Party {
    Plaintiff,
    Defendant,
}

pub struct ExtractedFacts {
    pub facts: Value,
    pub reason_codes: Vec<String>,
    pub winner: Option<Party>,
}

pub fn extract_facts(clause: &ArbitrationClause, receipts: &[EventReceipt]) -> ExtractedFacts {
    let mut request_times: HashMap<&str, i64> = HashMap::new();
    let mut response_times: HashMap<&str, i64> = HashMap::new();
    let mut response_format_ok = true;

    for receipt in receipts {
        match receipt.event_type {
            EventType::Request => {
                request_times.insert(&receipt.request_id, receipt.timestamp);
            }
            EventType::Response => {
                response_times.insert(&receipt.request_id, receipt.timestamp);
                if receipt.metadata_str("result_type") == Some("bad_format") {
                    response_format_ok = false;
                }
            }
            _ => {}
        }
    }

    let max_latency = request_times
        .iter()
        .filter_map(|(request_id, requested_at)| {
            response_times
                .get(request_id)
                .map(|responded_at| (responded_at - requested_at).max(0))
        })
        .max()
        .unwrap_or(0);

    let mut by_minute: HashMap<i64, u64> = HashMap::new();
    for receipt in receipts {
        if receipt.event_type == EventType::Request {
            *by_minute.entry(receipt.timestamp.div_euclid(60_000)).or_default() += 1;
        }
    }
    let peak_rpm = by_minute.values().copied().max().unwrap_or(0);

    let facts = json!({
        "latency_ms": max_latency,
        "response_format_ok": response_format_ok,
        "peak_requests_per_minute": peak_rpm,
        "request_count": request_times.len(),
        "response_count": response_times.len(),
    });

    let mut reason_codes = Vec::new();
    for rule in &clause.sla_rules {
        let Some(threshold) = rule.numeric_value() else { continue };
        if rule.metric == "latency_ms" && rule.operator == "<=" && max_latency as f64 > threshold {
            reason_codes.push(REASON_SLA_LATENCY.to_string());
        }
    }
    for rule in &clause.abuse_rules {
        let Some(threshold) = rule.numeric_value() else { continue };
        if rule.metric == "requests_per_minute"
            && rule.operator == "<="
            && peak_rpm as f64 > threshold
        {
            reason_codes.push(REASON_RATE_LIMIT.to_string());
        }
    }

    // Requests with no violations favor the defendant; an empty record is
    // undecided and escalates to the panel.
    let winner = if !reason_codes.is_empty() {
        Some(Party::Plaintiff)
    } else if !request_times.is_empty() {
        Some(Party::Defendant)
    } else {
        None
    };

    ExtractedFacts {
        facts,
        reason_codes,
        winner,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn clause(sla_latency: Option<u64>, abuse_rpm: Option<u64>) -> ArbitrationClause {
        let sla_rules = sla_latency
            .map(|v| {
                json!([{"ruleId": "sla-latency", "metric": "latency_ms", "operator": "<=", "value": v, "unit": "ms"}])
            })
            .unwrap_or_else(|| json!([]));
        let abuse_rules = abuse_rpm
            .map(|v| {
                json!([{"ruleId": "abuse-rate", "metric": "requests_per_minute", "operator": "<=", "value": v, "unit": "rpm"}])
            })
            .unwrap_or_else(|| json!([]));
        serde_json::from_value(json!({
            "schemaVersion": "1.0.0",
            "clauseId": "c-1",
            "chainId": 48816,
            "contractAddress": "0x0000000000000000000000000000000000000001",
            "agreementId": "a-1",
            "serviceScope": "GET /api/data",
            "slaRules": sla_rules,
            "abuseRules": abuse_rules,
            "disputeWindowSec": 30,
            "evidenceWindowSec": 30,
            "remedyRules": [],
            "judgeFeePercent": 5,
            "clauseHash": format!("0x{}", "2".repeat(64)),
        }))
        .unwrap()
    }

    fn receipt(sequence: u64, event_type: &str, timestamp: i64, request_id: &str, metadata: Value) -> EventReceipt {
        serde_json::from_value(json!({
            "schemaVersion": "1.0.0",
            "receiptId": format!("r-{sequence}"),
            "chainId": 48816,
            "contractAddress": "0x0000000000000000000000000000000000000001",
            "agreementId": "a-1",
            "clauseHash": format!("0x{}", "2".repeat(64)),
            "sequence": sequence,
            "eventType": event_type,
            "timestamp": timestamp,
            "actorId": format!("did:8004:0x{}", "1".repeat(40)),
            "counterpartyId": format!("did:8004:0x{}", "2".repeat(40)),
            "requestId": request_id,
            "payloadHash": format!("0x{}", "3".repeat(64)),
            "prevHash": "0x0",
            "metadata": metadata,
            "receiptHash": format!("0x{}", "4".repeat(64)),
            "signature": "0x00",
        }))
        .unwrap()
    }

    #[test]
    fn latency_within_sla_favors_defendant() {
        let receipts = vec![
            receipt(0, "request", 1000, "q1", json!({})),
            receipt(1, "response", 2500, "q1", json!({})),
            receipt(2, "payment", 2600, "q1", json!({})),
        ];
        let extracted = extract_facts(&clause(Some(3000), None), &receipts);
        assert_eq!(extracted.facts["latency_ms"], 1500);
        assert!(extracted.reason_codes.is_empty());
        assert_eq!(extracted.winner, Some(Party::Defendant));
    }

    #[test]
    fn latency_breach_favors_plaintiff() {
        let receipts = vec![
            receipt(0, "request", 1000, "q1", json!({})),
            receipt(1, "response", 5000, "q1", json!({})),
        ];
        let extracted = extract_facts(&clause(Some(3000), None), &receipts);
        assert_eq!(extracted.facts["latency_ms"], 4000);
        assert_eq!(extracted.reason_codes, vec![REASON_SLA_LATENCY]);
        assert_eq!(extracted.winner, Some(Party::Plaintiff));
    }

    #[test]
    fn rate_limit_breach_counts_requests_per_bucket() {
        // 61 requests inside one 60 000 ms bucket under a 60 rpm cap.
        let mut receipts = Vec::new();
        for i in 0..61u64 {
            receipts.push(receipt(i, "request", 10_000 + i as i64, &format!("q{i}"), json!({})));
        }
        let extracted = extract_facts(&clause(None, Some(60)), &receipts);
        assert_eq!(extracted.facts["peak_requests_per_minute"], 61);
        assert_eq!(extracted.reason_codes, vec![REASON_RATE_LIMIT]);
        assert_eq!(extracted.winner, Some(Party::Plaintiff));
    }

    #[test]
    fn no_receipts_is_undecided() {
        let extracted = extract_facts(&clause(Some(3000), None), &[]);
        assert_eq!(extracted.winner, None);
        assert_eq!(extracted.facts["request_count"], 0);
    }

    #[test]
    fn negative_latency_clamps_to_zero() {
        let receipts = vec![
            receipt(0, "request", 5000, "q1", json!({})),
            receipt(1, "response", 1000, "q1", json!({})),
        ];
        let extracted = extract_facts(&clause(Some(3000), None), &receipts);
        assert_eq!(extracted.facts["latency_ms"], 0);
    }

    #[test]
    fn bad_format_response_is_reported() {
        let receipts = vec![
            receipt(0, "request", 1000, "q1", json!({})),
            receipt(1, "response", 1500, "q1", json!({"result_type": "bad_format"})),
        ];
        let extracted = extract_facts(&clause(None, None), &receipts);
        assert_eq!(extracted.facts["response_format_ok"], false);
    }
}

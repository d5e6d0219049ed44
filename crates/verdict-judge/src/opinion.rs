//! Fixed-template opinion for verdicts decided without the AI panel.
//!
//! Built only from verified material: the case caption, the integrity
//! check, the extracted findings, the rules that fired, and the ruling.

use serde_json::Value;

use verdict_protocol::ArbitrationClause;

pub struct OpinionInputs<'a> {
    pub dispute_id: u64,
    pub plaintiff: &'a str,
    pub defendant: &'a str,
    pub agreement_id: &'a str,
    pub clause: Option<&'a ArbitrationClause>,
    pub integrity_ok: bool,
    pub integrity_errors: &'a [String],
    pub facts: &'a Value,
    pub reason_codes: &'a [String],
    pub winner: &'a str,
}

pub fn deterministic_opinion(inputs: &OpinionInputs<'_>) -> String {
    let mut sections = Vec::new();

    sections.push(format!(
        "AGENT COURT — DISPUTE #{}\n{} v. {}\nAgreement: {}",
        inputs.dispute_id, inputs.plaintiff, inputs.defendant, inputs.agreement_id
    ));

    if inputs.integrity_ok {
        sections.push(
            "EVIDENCE INTEGRITY\nThe receipt chain verifies: sequences are contiguous, hashes \
             recompute, signatures recover to the named actors, and the anchored Merkle root \
             matches the submitted evidence."
                .to_string(),
        );
    } else {
        let mut section = String::from(
            "EVIDENCE INTEGRITY\nThe submitted evidence fails verification. The record cannot \
             be trusted and the ruling follows from that failure alone.",
        );
        for error in inputs.integrity_errors {
            section.push_str("\n- ");
            section.push_str(error);
        }
        sections.push(section);
    }

    let mut findings = String::from("FINDINGS OF FACT");
    if let Some(map) = inputs.facts.as_object() {
        for (key, value) in map {
            findings.push_str(&format!("\n- {key}: {value}"));
        }
    }
    sections.push(findings);

    let mut application = String::from("APPLICATION OF THE AGREEMENT");
    if let Some(clause) = inputs.clause {
        application.push_str(&format!("\nService scope: {}", clause.service_scope));
    }
    if inputs.reason_codes.is_empty() {
        application.push_str(
            "\nNo SLA or abuse rule in the agreement was breached on the verified record.",
        );
    } else {
        for code in inputs.reason_codes {
            application.push_str(&format!("\n- {code}: the corresponding rule was breached."));
        }
    }
    sections.push(application);

    sections.push(format!(
        "RULING\nJudgment for {}. The escrow contract will settle stakes accordingly.",
        inputs.winner
    ));

    sections.join("\n\n")
}

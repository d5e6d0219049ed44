//! Keccak-256 digests over canonical JSON.

use serde_json::Value;
use sha3::{Digest, Keccak256};

use crate::canonical::canonical_bytes;

/// Keccak-256 of raw bytes, rendered `0x` + 64 lowercase hex chars.
pub fn keccak_hex(data: &[u8]) -> String {
    format!("0x{}", hex::encode(Keccak256::digest(data)))
}

/// `keccak(canonicalBytes(value))`.
pub fn hash_canonical(value: &Value) -> String {
    keccak_hex(&canonical_bytes(value))
}

/// Clone of `value` with the named top-level fields removed. Used to strip a
/// document's own hash/signature fields before hashing it.
pub fn value_without_fields(value: &Value, skip: &[&str]) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(k, _)| !skip.contains(&k.as_str()))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Content hash of a clause: everything except `clauseHash`.
pub fn clause_hash(clause: &Value) -> String {
    hash_canonical(&value_without_fields(clause, &["clauseHash"]))
}

/// Content hash of a receipt: everything except `receiptHash` and
/// `signature`.
pub fn receipt_hash(receipt: &Value) -> String {
    hash_canonical(&value_without_fields(receipt, &["receiptHash", "signature"]))
}

/// Content hash of a verdict: everything except `verdictHash` and
/// `judgeSignature`.
pub fn verdict_hash(verdict: &Value) -> String {
    hash_canonical(&value_without_fields(verdict, &["verdictHash", "judgeSignature"]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn keccak_known_vector() {
        // keccak256("") — the canonical empty-input digest.
        assert_eq!(
            keccak_hex(b""),
            "0xc5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470"
        );
    }

    #[test]
    fn hash_is_66_chars_lowercase() {
        let h = hash_canonical(&json!({"a": 1}));
        assert_eq!(h.len(), 66);
        assert!(h.starts_with("0x"));
        assert_eq!(h, h.to_lowercase());
    }

    #[test]
    fn hash_equal_iff_canonical_bytes_equal() {
        let a = json!({"x": 1, "y": 2.0});
        let b = json!({"y": 2, "x": 1});
        let c = json!({"x": 1, "y": 3});
        assert_eq!(hash_canonical(&a), hash_canonical(&b));
        assert_ne!(hash_canonical(&a), hash_canonical(&c));
    }

    #[test]
    fn clause_hash_ignores_existing_hash_field() {
        let mut clause = json!({"clauseId": "c1", "clauseHash": ""});
        let h1 = clause_hash(&clause);
        clause["clauseHash"] = json!(h1.clone());
        assert_eq!(clause_hash(&clause), h1);
    }

    #[test]
    fn receipt_hash_ignores_hash_and_signature() {
        let bare = json!({"receiptId": "r1", "sequence": 0});
        let filled = json!({
            "receiptId": "r1",
            "sequence": 0,
            "receiptHash": "0xdead",
            "signature": "0xbeef"
        });
        assert_eq!(receipt_hash(&bare), receipt_hash(&filled));
    }
}

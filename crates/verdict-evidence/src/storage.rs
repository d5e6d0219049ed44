//! Persistent evidence store backed by sled.
//!
//! Named trees:
//!   clauses             — clauseId utf8            → json(clause)
//!   clause_by_agreement — agreementId utf8         → clauseId utf8 (unique)
//!   receipts            — receiptId utf8           → json(receipt)
//!   receipt_by_seq      — agreementId ∥ 0 ∥ be64   → receiptId utf8 (unique)
//!   receipt_actor_idx   — agr ∥ 0 ∥ actor ∥ 0 ∥ be64 → receiptId utf8
//!   anchors             — agreementId utf8         → json(AnchorRecord)
//!   anchor_by_root      — rootHash utf8            → agreementId utf8
//!
//! The `receipt_by_seq` insert runs inside a multi-tree transaction and is
//! the only legal write path for receipts, so concurrent inserts of the same
//! `(agreementId, sequence)` produce exactly one success.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sled::transaction::ConflictableTransactionError;
use sled::Transactional;
use std::path::Path;

use verdict_core::VerdictError;
use verdict_protocol::EventReceipt;

pub struct EvidenceStore {
    _db: sled::Db,
    clauses: sled::Tree,
    clause_by_agreement: sled::Tree,
    receipts: sled::Tree,
    receipt_by_seq: sled::Tree,
    receipt_actor_idx: sled::Tree,
    anchors: sled::Tree,
    anchor_by_root: sled::Tree,
}

/// Anchor row: the Merkle commitment of one agreement's receipt log.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnchorRecord {
    pub agreement_id: String,
    pub root_hash: String,
    pub tx_hash: String,
    pub receipt_ids: Vec<String>,
}

fn storage_err(e: impl std::fmt::Display) -> VerdictError {
    VerdictError::Storage(e.to_string())
}

fn seq_key(agreement_id: &str, sequence: u64) -> Vec<u8> {
    let mut key = agreement_id.as_bytes().to_vec();
    key.push(0);
    key.extend_from_slice(&sequence.to_be_bytes());
    key
}

fn actor_key(agreement_id: &str, actor_id: &str, sequence: u64) -> Vec<u8> {
    let mut key = agreement_id.as_bytes().to_vec();
    key.push(0);
    key.extend_from_slice(actor_id.as_bytes());
    key.push(0);
    key.extend_from_slice(&sequence.to_be_bytes());
    key
}

impl EvidenceStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, VerdictError> {
        let db = sled::open(path).map_err(storage_err)?;
        Self::from_db(db)
    }

    /// In-memory store for tests.
    pub fn temporary() -> Result<Self, VerdictError> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .map_err(storage_err)?;
        Self::from_db(db)
    }

    fn from_db(db: sled::Db) -> Result<Self, VerdictError> {
        Ok(Self {
            clauses: db.open_tree("clauses").map_err(storage_err)?,
            clause_by_agreement: db.open_tree("clause_by_agreement").map_err(storage_err)?,
            receipts: db.open_tree("receipts").map_err(storage_err)?,
            receipt_by_seq: db.open_tree("receipt_by_seq").map_err(storage_err)?,
            receipt_actor_idx: db.open_tree("receipt_actor_idx").map_err(storage_err)?,
            anchors: db.open_tree("anchors").map_err(storage_err)?,
            anchor_by_root: db.open_tree("anchor_by_root").map_err(storage_err)?,
            _db: db,
        })
    }

    // ── Clauses ──────────────────────────────────────────────────────────────

    /// Store a clause. One clause per agreement; re-posting the identical
    /// clause is accepted, a different one is rejected.
    pub fn store_clause(
        &self,
        clause_id: &str,
        agreement_id: &str,
        clause_hash: &str,
        raw: &Value,
    ) -> Result<(), VerdictError> {
        if let Some(existing_id) = self
            .clause_by_agreement
            .get(agreement_id.as_bytes())
            .map_err(storage_err)?
        {
            let existing = self
                .clauses
                .get(&existing_id)
                .map_err(storage_err)?
                .map(|bytes| serde_json::from_slice::<Value>(&bytes))
                .transpose()?;
            let same = existing
                .as_ref()
                .and_then(|c| c.get("clauseHash"))
                .and_then(Value::as_str)
                == Some(clause_hash);
            if same {
                return Ok(());
            }
            return Err(VerdictError::DuplicateClause(agreement_id.to_string()));
        }

        self.clauses
            .insert(clause_id.as_bytes(), serde_json::to_vec(raw)?)
            .map_err(storage_err)?;
        self.clause_by_agreement
            .insert(agreement_id.as_bytes(), clause_id.as_bytes())
            .map_err(storage_err)?;
        self._db.flush().map_err(storage_err)?;
        Ok(())
    }

    pub fn get_clause_by_agreement(
        &self,
        agreement_id: &str,
    ) -> Result<Option<Value>, VerdictError> {
        let Some(clause_id) = self
            .clause_by_agreement
            .get(agreement_id.as_bytes())
            .map_err(storage_err)?
        else {
            return Ok(None);
        };
        match self.clauses.get(&clause_id).map_err(storage_err)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    // ── Receipts ─────────────────────────────────────────────────────────────

    /// Atomically insert a receipt. Fails with [`VerdictError::DuplicateSequence`]
    /// when the `(agreementId, sequence)` slot is already taken; no partial
    /// state is left behind in that case.
    pub fn store_receipt(&self, receipt: &EventReceipt, raw: &Value) -> Result<(), VerdictError> {
        let key = seq_key(&receipt.agreement_id, receipt.sequence);
        let actor_idx = actor_key(&receipt.agreement_id, &receipt.actor_id, receipt.sequence);
        let receipt_id = receipt.receipt_id.as_bytes().to_vec();
        let payload = serde_json::to_vec(raw)?;

        let result = (&self.receipt_by_seq, &self.receipts, &self.receipt_actor_idx).transaction(
            |(by_seq, receipts, actor_tree)| {
                if by_seq.get(key.as_slice())?.is_some() {
                    return Err(ConflictableTransactionError::Abort(()));
                }
                by_seq.insert(key.as_slice(), receipt_id.as_slice())?;
                receipts.insert(receipt_id.as_slice(), payload.as_slice())?;
                actor_tree.insert(actor_idx.as_slice(), receipt_id.as_slice())?;
                Ok(())
            },
        );

        match result {
            Ok(()) => {
                self._db.flush().map_err(storage_err)?;
                Ok(())
            }
            Err(sled::transaction::TransactionError::Abort(())) => {
                Err(VerdictError::DuplicateSequence {
                    agreement_id: receipt.agreement_id.clone(),
                    sequence: receipt.sequence,
                })
            }
            Err(sled::transaction::TransactionError::Storage(e)) => Err(storage_err(e)),
        }
    }

    pub fn get_receipt(&self, receipt_id: &str) -> Result<Option<Value>, VerdictError> {
        match self.receipts.get(receipt_id.as_bytes()).map_err(storage_err)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Receipts in sequence order, optionally filtered by agreement and actor.
    pub fn list_receipts(
        &self,
        agreement_id: Option<&str>,
        actor_id: Option<&str>,
    ) -> Result<Vec<Value>, VerdictError> {
        let mut out = Vec::new();

        if let Some(agreement) = agreement_id {
            let mut prefix = agreement.as_bytes().to_vec();
            prefix.push(0);
            for item in self.receipt_by_seq.scan_prefix(&prefix) {
                let (_, receipt_id) = item.map_err(storage_err)?;
                if let Some(bytes) = self.receipts.get(&receipt_id).map_err(storage_err)? {
                    out.push(serde_json::from_slice(&bytes)?);
                }
            }
        } else {
            for item in self.receipts.iter() {
                let (_, bytes) = item.map_err(storage_err)?;
                out.push(serde_json::from_slice::<Value>(&bytes)?);
            }
            out.sort_by_key(|r| {
                (
                    r.get("agreementId")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    r.get("sequence").and_then(Value::as_u64).unwrap_or(0),
                )
            });
        }

        if let Some(actor) = actor_id {
            out.retain(|r| r.get("actorId").and_then(Value::as_str) == Some(actor));
        }
        Ok(out)
    }

    // ── Anchors ──────────────────────────────────────────────────────────────

    /// Upsert the agreement's anchor; the previous root index is replaced.
    pub fn store_anchor(&self, anchor: &AnchorRecord) -> Result<(), VerdictError> {
        if let Some(old) = self.get_anchor(&anchor.agreement_id)? {
            if old.root_hash != anchor.root_hash {
                self.anchor_by_root
                    .remove(old.root_hash.as_bytes())
                    .map_err(storage_err)?;
            }
        }
        self.anchors
            .insert(anchor.agreement_id.as_bytes(), serde_json::to_vec(anchor)?)
            .map_err(storage_err)?;
        self.anchor_by_root
            .insert(anchor.root_hash.as_bytes(), anchor.agreement_id.as_bytes())
            .map_err(storage_err)?;
        self._db.flush().map_err(storage_err)?;
        Ok(())
    }

    pub fn get_anchor(&self, agreement_id: &str) -> Result<Option<AnchorRecord>, VerdictError> {
        match self.anchors.get(agreement_id.as_bytes()).map_err(storage_err)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn get_anchor_by_root(&self, root_hash: &str) -> Result<Option<AnchorRecord>, VerdictError> {
        let Some(agreement_id) = self
            .anchor_by_root
            .get(root_hash.as_bytes())
            .map_err(storage_err)?
        else {
            return Ok(None);
        };
        let agreement_id = String::from_utf8(agreement_id.to_vec())
            .map_err(|e| VerdictError::Storage(format!("corrupt root index: {e}")))?;
        self.get_anchor(&agreement_id)
    }
}

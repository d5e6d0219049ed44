//! Verdict store backed by sled.
//!
//! Named trees:
//!   verdicts — disputeId utf8 → json(VerdictRow)   (unique per dispute)
//!   cursors  — utf8 key       → u64 be
//!
//! The dispute-id key plus an insert-if-absent write is what makes dispute
//! handling exactly-once: a replayed `DisputeFiled` event can never produce
//! a second verdict row.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;

use verdict_core::VerdictError;

pub struct JudgeStore {
    _db: sled::Db,
    verdicts: sled::Tree,
    cursors: sled::Tree,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerdictRow {
    pub verdict_id: String,
    pub dispute_id: String,
    pub agreement_id: String,
    pub status: String,
    pub payload: Value,
    pub created_at: i64,
}

fn storage_err(e: impl std::fmt::Display) -> VerdictError {
    VerdictError::Storage(e.to_string())
}

impl JudgeStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, VerdictError> {
        let db = sled::open(path).map_err(storage_err)?;
        Self::from_db(db)
    }

    pub fn temporary() -> Result<Self, VerdictError> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .map_err(storage_err)?;
        Self::from_db(db)
    }

    fn from_db(db: sled::Db) -> Result<Self, VerdictError> {
        Ok(Self {
            verdicts: db.open_tree("verdicts").map_err(storage_err)?,
            cursors: db.open_tree("cursors").map_err(storage_err)?,
            _db: db,
        })
    }

    // ── Cursors ──────────────────────────────────────────────────────────────

    pub fn get_cursor(&self, key: &str, default: u64) -> Result<u64, VerdictError> {
        match self.cursors.get(key.as_bytes()).map_err(storage_err)? {
            Some(bytes) => {
                let mut arr = [0u8; 8];
                arr.copy_from_slice(&bytes[..8]);
                Ok(u64::from_be_bytes(arr))
            }
            None => Ok(default),
        }
    }

    pub fn set_cursor(&self, key: &str, value: u64) -> Result<(), VerdictError> {
        self.cursors
            .insert(key.as_bytes(), value.to_be_bytes().to_vec())
            .map_err(storage_err)?;
        self._db.flush().map_err(storage_err)?;
        Ok(())
    }

    // ── Verdicts ─────────────────────────────────────────────────────────────

    pub fn is_processed(&self, dispute_id: u64) -> Result<bool, VerdictError> {
        self.verdicts
            .contains_key(dispute_id.to_string().as_bytes())
            .map_err(storage_err)
    }

    /// Insert the verdict for a dispute. Fails with
    /// [`VerdictError::DisputeAlreadyProcessed`] if one already exists.
    pub fn store_verdict(&self, dispute_id: u64, row: &VerdictRow) -> Result<(), VerdictError> {
        let key = dispute_id.to_string();
        let bytes = serde_json::to_vec(row)?;
        let previous = self
            .verdicts
            .compare_and_swap(key.as_bytes(), None::<&[u8]>, Some(bytes))
            .map_err(storage_err)?;
        if previous.is_err() {
            return Err(VerdictError::DisputeAlreadyProcessed(dispute_id));
        }
        self._db.flush().map_err(storage_err)?;
        Ok(())
    }

    pub fn get_verdict(&self, dispute_id: &str) -> Result<Option<VerdictRow>, VerdictError> {
        match self.verdicts.get(dispute_id.as_bytes()).map_err(storage_err)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// All verdicts, newest first.
    pub fn list_verdicts(&self) -> Result<Vec<VerdictRow>, VerdictError> {
        let mut out = Vec::new();
        for item in self.verdicts.iter() {
            let (_, bytes) = item.map_err(storage_err)?;
            out.push(serde_json::from_slice::<VerdictRow>(&bytes)?);
        }
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(out)
    }

    /// Prior verdicts for the same agreement, oldest first; used as context
    /// when a dispute escalates past the district tier.
    pub fn verdicts_for_agreement(&self, agreement_id: &str) -> Result<Vec<VerdictRow>, VerdictError> {
        let mut out: Vec<VerdictRow> = self
            .list_verdicts()?
            .into_iter()
            .filter(|row| row.agreement_id == agreement_id)
            .collect();
        out.sort_by_key(|row| row.created_at);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(dispute_id: &str, agreement: &str, created_at: i64) -> VerdictRow {
        VerdictRow {
            verdict_id: format!("v-{dispute_id}"),
            dispute_id: dispute_id.to_string(),
            agreement_id: agreement.to_string(),
            status: "submitted".into(),
            payload: json!({"disputeId": dispute_id}),
            created_at,
        }
    }

    #[test]
    fn second_verdict_for_dispute_is_rejected() {
        let store = JudgeStore::temporary().unwrap();
        store.store_verdict(1, &row("1", "a", 10)).unwrap();
        assert!(store.is_processed(1).unwrap());
        assert!(matches!(
            store.store_verdict(1, &row("1", "a", 11)),
            Err(VerdictError::DisputeAlreadyProcessed(1))
        ));
        assert_eq!(store.list_verdicts().unwrap().len(), 1);
    }

    #[test]
    fn listing_is_newest_first() {
        let store = JudgeStore::temporary().unwrap();
        store.store_verdict(1, &row("1", "a", 10)).unwrap();
        store.store_verdict(2, &row("2", "a", 20)).unwrap();
        let listed = store.list_verdicts().unwrap();
        assert_eq!(listed[0].dispute_id, "2");
        assert_eq!(listed[1].dispute_id, "1");
    }

    #[test]
    fn cursor_round_trip() {
        let store = JudgeStore::temporary().unwrap();
        assert_eq!(store.get_cursor("judge.from_block", 0).unwrap(), 0);
        store.set_cursor("judge.from_block", 42).unwrap();
        assert_eq!(store.get_cursor("judge.from_block", 0).unwrap(), 42);
    }

    #[test]
    fn agreement_filter_is_oldest_first() {
        let store = JudgeStore::temporary().unwrap();
        store.store_verdict(1, &row("1", "a", 20)).unwrap();
        store.store_verdict(2, &row("2", "b", 15)).unwrap();
        store.store_verdict(3, &row("3", "a", 10)).unwrap();
        let for_a = store.verdicts_for_agreement("a").unwrap();
        assert_eq!(for_a.len(), 2);
        assert_eq!(for_a[0].dispute_id, "3");
    }
}

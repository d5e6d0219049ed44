//! Idempotent reputation ledger backed by sled.
//!
//! Named trees:
//!   scores  — actorId utf8                  → i64 be
//!   events  — event_key utf8                → bincode(ScoreEvent)  (unique)
//!   history — actorId ∥ 0 ∥ u64 be seq      → event_key utf8
//!   cursors — utf8 key                      → u64 be
//!
//! The `events` insert is compare-and-swap on the event key; a duplicate
//! delivery is silently ignored and never touches the score.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;

use verdict_core::VerdictError;

/// Every actor starts here on first reference.
pub const INITIAL_SCORE: i64 = 100;

pub struct ReputationStore {
    _db: sled::Db,
    scores: sled::Tree,
    events: sled::Tree,
    history: sled::Tree,
    cursors: sled::Tree,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreEvent {
    pub actor_id: String,
    pub delta: i64,
    pub reason: String,
    pub payload_json: String,
    pub created_at: i64,
}

fn storage_err(e: impl std::fmt::Display) -> VerdictError {
    VerdictError::Storage(e.to_string())
}

fn decode_i64(bytes: &[u8]) -> i64 {
    let mut arr = [0u8; 8];
    arr.copy_from_slice(&bytes[..8]);
    i64::from_be_bytes(arr)
}

impl ReputationStore {
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
            scores: db.open_tree("scores").map_err(storage_err)?,
            events: db.open_tree("events").map_err(storage_err)?,
            history: db.open_tree("history").map_err(storage_err)?,
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

    // ── Scores ───────────────────────────────────────────────────────────────

    fn ensure_actor(&self, actor_id: &str) -> Result<(), VerdictError> {
        let _ = self
            .scores
            .compare_and_swap(
                actor_id.as_bytes(),
                None::<&[u8]>,
                Some(&INITIAL_SCORE.to_be_bytes()[..]),
            )
            .map_err(storage_err)?;
        Ok(())
    }

    /// Apply one scoring event. Returns `false` (and changes nothing) when
    /// `event_key` was already applied.
    pub fn apply_event(
        &self,
        actor_id: &str,
        delta: i64,
        reason: &str,
        event_key: &str,
        payload: &Value,
    ) -> Result<bool, VerdictError> {
        self.ensure_actor(actor_id)?;

        let event = ScoreEvent {
            actor_id: actor_id.to_string(),
            delta,
            reason: reason.to_string(),
            payload_json: payload.to_string(),
            created_at: chrono::Utc::now().timestamp(),
        };
        let bytes = bincode::serialize(&event).map_err(storage_err)?;
        let inserted = self
            .events
            .compare_and_swap(event_key.as_bytes(), None::<&[u8]>, Some(bytes))
            .map_err(storage_err)?;
        if inserted.is_err() {
            return Ok(false);
        }

        self.scores
            .update_and_fetch(actor_id.as_bytes(), |old| {
                let current = old.map(decode_i64).unwrap_or(INITIAL_SCORE);
                Some((current + delta).to_be_bytes().to_vec())
            })
            .map_err(storage_err)?;

        let seq = self._db.generate_id().map_err(storage_err)?;
        let mut history_key = actor_id.as_bytes().to_vec();
        history_key.push(0);
        history_key.extend_from_slice(&seq.to_be_bytes());
        self.history
            .insert(history_key, event_key.as_bytes())
            .map_err(storage_err)?;

        self._db.flush().map_err(storage_err)?;
        Ok(true)
    }

    /// Score plus full history (newest first) for one actor.
    pub fn get_reputation(&self, actor_id: &str) -> Result<Value, VerdictError> {
        self.ensure_actor(actor_id)?;
        let score = self
            .scores
            .get(actor_id.as_bytes())
            .map_err(storage_err)?
            .map(|b| decode_i64(&b))
            .unwrap_or(INITIAL_SCORE);

        let mut prefix = actor_id.as_bytes().to_vec();
        prefix.push(0);
        let mut history = Vec::new();
        for item in self.history.scan_prefix(&prefix) {
            let (_, event_key) = item.map_err(storage_err)?;
            if let Some(bytes) = self.events.get(&event_key).map_err(storage_err)? {
                let event: ScoreEvent = bincode::deserialize(&bytes).map_err(storage_err)?;
                history.push(serde_json::json!({
                    "delta": event.delta,
                    "reason": event.reason,
                    "payload": serde_json::from_str::<Value>(&event.payload_json)?,
                    "createdAt": event.created_at,
                }));
            }
        }
        history.reverse();

        Ok(serde_json::json!({
            "actorId": actor_id,
            "score": score,
            "history": history,
        }))
    }

    /// All known actors, highest score first.
    pub fn list_reputations(&self) -> Result<Vec<Value>, VerdictError> {
        let mut out = Vec::new();
        for item in self.scores.iter() {
            let (key, bytes) = item.map_err(storage_err)?;
            let actor = String::from_utf8(key.to_vec())
                .map_err(|e| VerdictError::Storage(format!("corrupt score key: {e}")))?;
            out.push((actor, decode_i64(&bytes)));
        }
        out.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        Ok(out
            .into_iter()
            .map(|(actor, score)| serde_json::json!({"actorId": actor, "score": score}))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn scores_initialize_at_100() {
        let store = ReputationStore::temporary().unwrap();
        let rep = store.get_reputation("did:8004:0xabc").unwrap();
        assert_eq!(rep["score"], 100);
        assert!(rep["history"].as_array().unwrap().is_empty());
    }

    #[test]
    fn duplicate_event_key_is_ignored() {
        let store = ReputationStore::temporary().unwrap();
        let applied = store
            .apply_event("did:8004:0xabc", 2, "won_dispute", "ruling-win-1-0xabc", &json!({"disputeId": 1}))
            .unwrap();
        assert!(applied);
        let replayed = store
            .apply_event("did:8004:0xabc", 2, "won_dispute", "ruling-win-1-0xabc", &json!({"disputeId": 1}))
            .unwrap();
        assert!(!replayed);

        let rep = store.get_reputation("did:8004:0xabc").unwrap();
        assert_eq!(rep["score"], 102, "+2 exactly once, not +4");
        assert_eq!(rep["history"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn deltas_accumulate_and_history_is_newest_first() {
        let store = ReputationStore::temporary().unwrap();
        store
            .apply_event("did:8004:0xabc", 1, "completed_without_dispute", "k1", &json!({}))
            .unwrap();
        store
            .apply_event("did:8004:0xabc", -5, "lost_dispute", "k2", &json!({}))
            .unwrap();

        let rep = store.get_reputation("did:8004:0xabc").unwrap();
        assert_eq!(rep["score"], 96);
        let history = rep["history"].as_array().unwrap();
        assert_eq!(history[0]["reason"], "lost_dispute");
        assert_eq!(history[1]["reason"], "completed_without_dispute");
    }

    #[test]
    fn listing_is_score_descending() {
        let store = ReputationStore::temporary().unwrap();
        store.apply_event("did:8004:0xaaa", 2, "won_dispute", "k1", &json!({})).unwrap();
        store.apply_event("did:8004:0xbbb", -5, "lost_dispute", "k2", &json!({})).unwrap();
        let listed = store.list_reputations().unwrap();
        assert_eq!(listed[0]["actorId"], "did:8004:0xaaa");
        assert_eq!(listed[1]["actorId"], "did:8004:0xbbb");
    }
}

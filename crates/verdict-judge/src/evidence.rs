//! Client for re-assembling an evidence bundle from the evidence service.

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

use verdict_core::VerdictError;
use verdict_protocol::{ArbitrationClause, EventReceipt};

pub struct EvidenceBundle {
    pub agreement_id: String,
    pub anchor: Value,
    pub clause: ArbitrationClause,
    pub receipts: Vec<EventReceipt>,
}

/// Where evidence bundles come from; the HTTP client in production, a fake
/// in handler tests.
#[async_trait]
pub trait EvidenceSource: Send + Sync {
    async fn bundle_by_root(&self, root_hash: &str) -> Result<Option<EvidenceBundle>, VerdictError>;
}

pub struct EvidenceClient {
    base_url: String,
    client: reqwest::Client,
}

impl EvidenceClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
        }
    }

    async fn get_json(&self, path: &str) -> Result<Option<Value>, VerdictError> {
        let response = self
            .client
            .get(format!("{}{path}", self.base_url))
            .send()
            .await
            .map_err(|e| VerdictError::Http(e.to_string()))?;
        if response.status().as_u16() >= 400 {
            return Ok(None);
        }
        Ok(Some(
            response
                .json()
                .await
                .map_err(|e| VerdictError::Http(e.to_string()))?,
        ))
    }
}

#[async_trait]
impl EvidenceSource for EvidenceClient {
    /// Fetch anchor → clause → receipts for the agreement behind an anchored
    /// root. `None` when any piece is missing.
    async fn bundle_by_root(&self, root_hash: &str) -> Result<Option<EvidenceBundle>, VerdictError> {
        let Some(anchor) = self.get_json(&format!("/anchors/by-root/{root_hash}")).await? else {
            return Ok(None);
        };
        let Some(agreement_id) = anchor
            .get("agreementId")
            .and_then(Value::as_str)
            .map(str::to_string)
        else {
            return Ok(None);
        };

        let Some(clause_raw) = self.get_json(&format!("/clauses/{agreement_id}")).await? else {
            return Ok(None);
        };
        let Some(receipts_raw) = self
            .get_json(&format!("/receipts?agreementId={agreement_id}"))
            .await?
        else {
            return Ok(None);
        };

        let clause: ArbitrationClause = serde_json::from_value(clause_raw)?;
        let mut receipts = Vec::new();
        for item in receipts_raw
            .get("items")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default()
        {
            receipts.push(serde_json::from_value::<EventReceipt>(item)?);
        }

        Ok(Some(EvidenceBundle {
            agreement_id,
            anchor,
            clause,
            receipts,
        }))
    }
}

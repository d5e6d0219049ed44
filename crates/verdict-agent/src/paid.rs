//! Paid provider call: drives the payment-required HTTP flow from the
//! consumer side. When the provider is unreachable and mock mode is on
//! (`PAYMENT_ALLOW_MOCK=1`), a canned payload and synthetic payment
//! reference keep offline dry-run demos working.

use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

use verdict_core::config::env_flag;
use verdict_core::VerdictError;

use crate::identity::ActorIdentity;

pub struct PaidResponse {
    pub payload: Value,
    pub status_code: u16,
    pub payment_reference: String,
    pub evidence_hash: String,
}

pub struct PaidClient {
    consumer: ActorIdentity,
    client: reqwest::Client,
}

impl PaidClient {
    pub fn new(consumer: ActorIdentity) -> Self {
        Self {
            consumer,
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
        }
    }

    /// GET a priced endpoint, presenting the consumer identity as the payer.
    pub async fn get(&self, url: &str) -> Result<PaidResponse, VerdictError> {
        let attempt = self
            .client
            .get(url)
            .header("x-payer", self.consumer.address.to_checksum())
            .send()
            .await;

        match attempt {
            Ok(response) => {
                let status_code = response.status().as_u16();
                let payment_reference = response
                    .headers()
                    .get("x-payment-reference")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default()
                    .to_string();
                let evidence_hash = response
                    .headers()
                    .get("x-evidence-hash")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default()
                    .to_string();
                let payload = response.json().await.unwrap_or_else(|_| json!({}));
                Ok(PaidResponse {
                    payload,
                    status_code,
                    payment_reference,
                    evidence_hash,
                })
            }
            Err(e) if env_flag("PAYMENT_ALLOW_MOCK") => {
                debug!(error = %e, %url, "provider unreachable, using mock payment response");
                Ok(PaidResponse {
                    payload: json!({"data": "mock-weather", "temperature": 21}),
                    status_code: 200,
                    payment_reference: format!("mock-{}", uuid::Uuid::new_v4()),
                    evidence_hash: String::new(),
                })
            }
            Err(e) => Err(VerdictError::Http(e.to_string())),
        }
    }
}

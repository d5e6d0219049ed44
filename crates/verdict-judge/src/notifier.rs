//! Best-effort fan-out of finished verdicts: an external verdict sink and a
//! plain-text webhook notifier. Failures are logged and never block the
//! pipeline.

use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

use verdict_core::config::env_opt;

pub struct Notifier {
    sink_url: Option<String>,
    webhook_url: Option<String>,
    client: reqwest::Client,
}

impl Notifier {
    pub fn from_env() -> Self {
        Self {
            sink_url: env_opt("VERDICT_SINK_URL"),
            webhook_url: env_opt("NOTIFY_WEBHOOK_URL"),
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
        }
    }

    pub async fn push_verdict(&self, verdict: &Value) {
        let Some(url) = &self.sink_url else { return };
        if let Err(e) = self.client.post(url).json(verdict).send().await {
            debug!(error = %e, "verdict sink push failed");
        }
    }

    pub async fn notify(&self, message: &str) {
        let Some(url) = &self.webhook_url else { return };
        if let Err(e) = self
            .client
            .post(url)
            .json(&json!({"text": message}))
            .send()
            .await
        {
            debug!(error = %e, "webhook notification failed");
        }
    }
}

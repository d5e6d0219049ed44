//! Child-service supervision: spawn the sibling service binaries, wait for
//! their health endpoints, and reap them on teardown.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use tokio::process::{Child, Command};
use tracing::{info, warn};

use verdict_core::config::env_str;
use verdict_core::constants::{EVIDENCE_PORT, JUDGE_PORT, REPUTATION_PORT};
use verdict_core::VerdictError;

pub struct ServiceDef {
    pub name: &'static str,
    pub binary: &'static str,
    pub health_url: String,
    pub env: HashMap<String, String>,
}

pub struct ServiceProcess {
    pub name: &'static str,
    child: Child,
}

/// The services a demo run needs, with per-service store paths derived from
/// a common base so they never collide with each other.
pub fn service_defs() -> Vec<ServiceDef> {
    let base = env_str("RUNNER_STORE_BASE", "./data/verdict");
    let mut defs = Vec::new();

    let mut evidence_env = HashMap::new();
    evidence_env.insert("EVIDENCE_STORE_PATH".into(), format!("{base}_evidence.db"));
    defs.push(ServiceDef {
        name: "evidence",
        binary: "verdict-evidence",
        health_url: format!("http://127.0.0.1:{EVIDENCE_PORT}/health"),
        env: evidence_env,
    });

    let mut judge_env = HashMap::new();
    judge_env.insert("VERDICT_STORE_PATH".into(), format!("{base}_judge.db"));
    defs.push(ServiceDef {
        name: "judge",
        binary: "verdict-judge",
        health_url: format!("http://127.0.0.1:{JUDGE_PORT}/health"),
        env: judge_env,
    });

    let mut reputation_env = HashMap::new();
    reputation_env.insert(
        "REPUTATION_STORE_PATH".into(),
        format!("{base}_reputation.db"),
    );
    defs.push(ServiceDef {
        name: "reputation",
        binary: "verdict-reputation",
        health_url: format!("http://127.0.0.1:{REPUTATION_PORT}/health"),
        env: reputation_env,
    });

    defs
}

/// Sibling binaries live next to the runner's own executable.
fn binary_path(name: &str) -> Result<PathBuf, VerdictError> {
    let exe = std::env::current_exe()
        .map_err(|e| VerdictError::Other(format!("cannot locate own executable: {e}")))?;
    let dir = exe
        .parent()
        .ok_or_else(|| VerdictError::Other("executable has no parent dir".into()))?;
    let candidate = dir.join(name);
    if candidate.exists() {
        Ok(candidate)
    } else {
        Err(VerdictError::Other(format!(
            "service binary not found: {}",
            candidate.display()
        )))
    }
}

pub fn spawn_service(def: &ServiceDef) -> Result<ServiceProcess, VerdictError> {
    let path = binary_path(def.binary)?;
    let mut command = Command::new(path);
    command.envs(&def.env).kill_on_drop(true);
    let child = command
        .spawn()
        .map_err(|e| VerdictError::Other(format!("spawning {}: {e}", def.name)))?;
    info!(service = def.name, "service spawned");
    Ok(ServiceProcess {
        name: def.name,
        child,
    })
}

impl ServiceProcess {
    pub async fn stop(mut self) {
        if let Err(e) = self.child.start_kill() {
            warn!(service = self.name, error = %e, "kill failed");
            return;
        }
        let _ = self.child.wait().await;
        info!(service = self.name, "service stopped");
    }
}

/// Poll a health endpoint until it answers below 500 or the timeout lapses.
pub async fn wait_for_health(url: &str, timeout: Duration) -> Result<(), VerdictError> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(2))
        .build()
        .unwrap_or_default();
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if let Ok(response) = client.get(url).send().await {
            if response.status().as_u16() < 500 {
                return Ok(());
            }
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(VerdictError::Timeout(format!(
                "service did not become healthy: {url}"
            )));
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
}

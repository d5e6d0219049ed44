//! Concurrent run manager: executes flows in worker tasks, fans progress
//! events out to bounded per-subscriber channels, and supervises child
//! services.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info};

use verdict_agent::{run_dispute_flow, run_happy_flow, FlowContext};
use verdict_core::config::env_opt;
use verdict_core::VerdictError;

use crate::run::{DemoRun, RunMode, RunStatus};
use crate::services::{service_defs, spawn_service, wait_for_health, ServiceProcess};

/// Events queued per subscriber beyond the history replay; a consumer that
/// falls further behind is dropped.
const SUBSCRIBER_BUFFER: usize = 256;

pub struct RunOptions {
    pub start_services: bool,
    pub keep_services: bool,
    pub agreement_window_sec: u64,
    pub auto_run: bool,
}

pub struct RunManager {
    runs: Mutex<HashMap<String, DemoRun>>,
    subscribers: Mutex<HashMap<String, Vec<mpsc::Sender<String>>>>,
    tasks: Mutex<HashMap<String, JoinHandle<()>>>,
    services: tokio::sync::Mutex<Vec<ServiceProcess>>,
}

impl RunManager {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            runs: Mutex::new(HashMap::new()),
            subscribers: Mutex::new(HashMap::new()),
            tasks: Mutex::new(HashMap::new()),
            services: tokio::sync::Mutex::new(Vec::new()),
        })
    }

    // ── Run lifecycle ────────────────────────────────────────────────────────

    pub fn create_run(self: &Arc<Self>, mode: RunMode, options: RunOptions) -> Value {
        let run_id = format!(
            "run-{}-{}",
            chrono::Utc::now().timestamp_millis(),
            hex::encode(rand::random::<[u8; 4]>())
        );
        let mut run = DemoRun::new(
            run_id.clone(),
            mode,
            options.start_services,
            options.keep_services,
        );
        run.artifacts.insert(
            "agreementWindowSec".into(),
            json!(options.agreement_window_sec),
        );

        if options.auto_run {
            run.status = RunStatus::Queued;
        }
        let summary = json!({
            "runId": run_id,
            "status": run.status.as_str(),
            "mode": mode.as_str(),
        });

        self.runs.lock().unwrap().insert(run_id.clone(), run);

        if options.auto_run {
            self.spawn_execute(&run_id, options.agreement_window_sec);
        }
        summary
    }

    pub fn start(self: &Arc<Self>, run_id: &str, agreement_window_sec: u64) -> bool {
        {
            let runs = self.runs.lock().unwrap();
            let Some(run) = runs.get(run_id) else { return false };
            if run.status != RunStatus::Pending {
                return true;
            }
        }
        if self.tasks.lock().unwrap().contains_key(run_id) {
            return true;
        }
        self.set_status(run_id, RunStatus::Queued);
        self.spawn_execute(run_id, agreement_window_sec);
        true
    }

    fn spawn_execute(self: &Arc<Self>, run_id: &str, agreement_window_sec: u64) {
        let manager = Arc::clone(self);
        let run_id = run_id.to_string();
        let task_id = run_id.clone();
        let handle = tokio::spawn(async move {
            manager.execute(&run_id, agreement_window_sec).await;
        });
        self.tasks.lock().unwrap().insert(task_id, handle);
    }

    pub fn get(&self, run_id: &str) -> Option<Value> {
        self.runs.lock().unwrap().get(run_id).map(DemoRun::serialize)
    }

    pub fn list_runs(&self, limit: usize) -> Vec<Value> {
        let runs = self.runs.lock().unwrap();
        let mut all: Vec<&DemoRun> = runs.values().collect();
        all.sort_by(|a, b| b.start_ms.cmp(&a.start_ms));
        all.into_iter().take(limit).map(DemoRun::serialize).collect()
    }

    pub async fn cancel(self: &Arc<Self>, run_id: &str) -> bool {
        let cancel_flag: Arc<AtomicBool>;
        {
            let mut runs = self.runs.lock().unwrap();
            let Some(run) = runs.get_mut(run_id) else { return false };
            if run.status.is_terminal() {
                return false;
            }
            run.status = RunStatus::Cancelled;
            run.error = Some("Cancelled by user".into());
            cancel_flag = Arc::clone(&run.cancel_flag);
        }
        cancel_flag.store(true, Ordering::SeqCst);

        self.publish(
            run_id,
            json!({
                "type": "run.error",
                "stepId": "run",
                "label": "Run cancelled",
                "status": "error",
                "message": "Cancelled by user",
            }),
        );

        if let Some(task) = self.tasks.lock().unwrap().remove(run_id) {
            task.abort();
        }
        self.stop_services().await;
        true
    }

    // ── Event fan-out ────────────────────────────────────────────────────────

    /// Record an event on the run and broadcast it to all subscribers.
    pub fn publish(&self, run_id: &str, event: Value) {
        let normalized = {
            let mut runs = self.runs.lock().unwrap();
            let Some(run) = runs.get_mut(run_id) else { return };
            run.emit(event)
        };
        if let Some(event) = normalized {
            self.broadcast(run_id, &event.to_string());
        }
    }

    fn broadcast(&self, run_id: &str, message: &str) {
        let mut subscribers = self.subscribers.lock().unwrap();
        if let Some(list) = subscribers.get_mut(run_id) {
            // A full or closed queue drops the subscriber; slow consumers
            // must not stall the run.
            list.retain(|sender| sender.try_send(message.to_string()).is_ok());
        }
    }

    /// History replay plus live deltas on a bounded channel.
    pub fn subscribe(&self, run_id: &str) -> mpsc::Receiver<String> {
        let history: Option<Vec<String>> = {
            let runs = self.runs.lock().unwrap();
            runs.get(run_id)
                .map(|run| run.events.iter().map(Value::to_string).collect())
        };

        match history {
            None => {
                let (sender, receiver) = mpsc::channel(2);
                let _ = sender.try_send(
                    json!({"type": "run.unknown", "message": "Run not found"}).to_string(),
                );
                receiver
            }
            Some(history) => {
                let (sender, receiver) = mpsc::channel(history.len() + SUBSCRIBER_BUFFER);
                for message in history {
                    let _ = sender.try_send(message);
                }
                self.subscribers
                    .lock()
                    .unwrap()
                    .entry(run_id.to_string())
                    .or_default()
                    .push(sender);
                receiver
            }
        }
    }

    fn set_status(&self, run_id: &str, status: RunStatus) {
        if let Some(run) = self.runs.lock().unwrap().get_mut(run_id) {
            run.status = status;
        }
    }

    fn is_cancelled(&self, run_id: &str) -> bool {
        self.runs
            .lock()
            .unwrap()
            .get(run_id)
            .map(|run| run.status == RunStatus::Cancelled)
            .unwrap_or(true)
    }

    // ── Execution ────────────────────────────────────────────────────────────

    async fn execute(self: Arc<Self>, run_id: &str, agreement_window_sec: u64) {
        let (mode, start_services, keep_services, cancel_flag) = {
            let runs = self.runs.lock().unwrap();
            let Some(run) = runs.get(run_id) else { return };
            (
                run.mode,
                run.start_services,
                run.keep_services,
                Arc::clone(&run.cancel_flag),
            )
        };

        self.set_status(run_id, RunStatus::Running);
        self.publish(
            run_id,
            json!({
                "type": "run.started",
                "stepId": "run",
                "label": "Demo run started",
                "status": "running",
                "message": format!("Mode={}", mode.as_str()),
            }),
        );

        let result = self
            .execute_inner(run_id, mode, start_services, agreement_window_sec, &cancel_flag)
            .await;

        match result {
            Ok(()) => {
                let artifacts = {
                    let mut runs = self.runs.lock().unwrap();
                    let Some(run) = runs.get_mut(run_id) else { return };
                    if run.status == RunStatus::Cancelled {
                        None
                    } else {
                        run.status = RunStatus::Complete;
                        run.artifacts.insert(
                            "summary".into(),
                            json!({
                                "agreementIds": run.agreement_ids,
                                "disputeIds": run.dispute_ids,
                            }),
                        );
                        append_explorer_links(&mut run.artifacts);
                        Some(Value::Object(run.artifacts.clone()))
                    }
                };
                if let Some(artifacts) = artifacts {
                    self.publish(
                        run_id,
                        json!({
                            "type": "run.complete",
                            "stepId": "run",
                            "label": "Demo run complete",
                            "status": "done",
                            "message": "All flows complete",
                            "artifacts": artifacts,
                        }),
                    );
                }
            }
            Err(e) => {
                let cancelled = matches!(e, VerdictError::Cancelled(_)) || self.is_cancelled(run_id);
                {
                    let mut runs = self.runs.lock().unwrap();
                    if let Some(run) = runs.get_mut(run_id) {
                        if cancelled {
                            run.status = RunStatus::Cancelled;
                            run.error.get_or_insert_with(|| "Cancelled".into());
                        } else {
                            run.status = RunStatus::Error;
                            run.error = Some(e.to_string());
                        }
                    }
                }
                let (label, message) = if cancelled {
                    ("Run cancelled", "Cancelled".to_string())
                } else {
                    error!(%run_id, error = %e, "run failed");
                    ("Run failed", e.to_string())
                };
                self.publish(
                    run_id,
                    json!({
                        "type": "run.error",
                        "stepId": "run",
                        "label": label,
                        "status": "error",
                        "message": message,
                    }),
                );
            }
        }

        if start_services && !keep_services {
            self.stop_services().await;
        }
        self.tasks.lock().unwrap().remove(run_id);
    }

    async fn execute_inner(
        self: &Arc<Self>,
        run_id: &str,
        mode: RunMode,
        start_services: bool,
        agreement_window_sec: u64,
        cancel_flag: &Arc<AtomicBool>,
    ) -> Result<(), VerdictError> {
        self.start_services(run_id, start_services).await?;

        if matches!(mode, RunMode::Happy | RunMode::Full) {
            let result = self
                .run_flow(run_id, "happy", agreement_window_sec, cancel_flag)
                .await?;
            let mut runs = self.runs.lock().unwrap();
            if let Some(run) = runs.get_mut(run_id) {
                if let Some(agreement) = result.get("agreementId").and_then(Value::as_str) {
                    run.agreement_ids.push(agreement.to_string());
                }
                run.artifacts.insert("happy".into(), result);
            }
        }

        if matches!(mode, RunMode::Dispute | RunMode::Full) {
            let result = self
                .run_flow(run_id, "dispute", agreement_window_sec, cancel_flag)
                .await?;
            let mut runs = self.runs.lock().unwrap();
            if let Some(run) = runs.get_mut(run_id) {
                if let Some(agreement) = result.get("agreementId").and_then(Value::as_str) {
                    run.agreement_ids.push(agreement.to_string());
                }
                if let Some(dispute_tx) = result.get("disputeTx").and_then(Value::as_str) {
                    run.dispute_ids.push(dispute_tx.to_string());
                }
                run.artifacts.insert("dispute".into(), result);
            }
        }

        Ok(())
    }

    async fn run_flow(
        self: &Arc<Self>,
        run_id: &str,
        flow_name: &str,
        agreement_window_sec: u64,
        cancel_flag: &Arc<AtomicBool>,
    ) -> Result<Value, VerdictError> {
        let step_id = format!("run:{flow_name}");
        self.publish(
            run_id,
            json!({
                "type": "step.started",
                "stepId": step_id,
                "label": format!("{flow_name} flow"),
                "status": "running",
                "message": format!("Starting {flow_name} flow"),
            }),
        );

        let manager = Arc::clone(self);
        let emit_run_id = run_id.to_string();
        let ctx = FlowContext {
            emit: Arc::new(move |event: Value| {
                manager.publish(&emit_run_id, event);
            }),
            cancel: Arc::clone(cancel_flag),
            agreement_window_sec,
        };

        let result = match flow_name {
            "happy" => run_happy_flow(&ctx).await?,
            _ => run_dispute_flow(&ctx).await?,
        };

        self.publish(
            run_id,
            json!({
                "type": "step.updated",
                "stepId": step_id,
                "label": format!("{flow_name} flow"),
                "status": "done",
                "message": "Done",
                "artifacts": result,
            }),
        );
        Ok(result)
    }

    // ── Services ─────────────────────────────────────────────────────────────

    async fn start_services(self: &Arc<Self>, run_id: &str, spawn: bool) -> Result<(), VerdictError> {
        let defs = service_defs();

        if !spawn {
            for def in &defs {
                wait_for_health(&def.health_url, std::time::Duration::from_secs(5)).await?;
                self.publish(
                    run_id,
                    json!({
                        "type": "run.info",
                        "stepId": format!("service:{}", def.name),
                        "label": format!("{} (existing)", def.name),
                        "status": "done",
                        "message": "Using existing service",
                    }),
                );
            }
            return Ok(());
        }

        {
            let mut services = self.services.lock().await;
            if services.is_empty() {
                for def in &defs {
                    self.publish(
                        run_id,
                        json!({
                            "type": "run.info",
                            "stepId": format!("service:{}", def.name),
                            "label": format!("Starting {}", def.name),
                            "status": "running",
                            "message": "Booting",
                        }),
                    );
                    services.push(spawn_service(def)?);
                }
            }
        }

        for def in &defs {
            wait_for_health(&def.health_url, std::time::Duration::from_secs(45)).await?;
            self.publish(
                run_id,
                json!({
                    "type": "run.info",
                    "stepId": format!("service:{}", def.name),
                    "label": def.name,
                    "status": "done",
                    "message": "Ready",
                }),
            );
        }
        Ok(())
    }

    pub async fn stop_services(&self) {
        let mut services = self.services.lock().await;
        for service in services.drain(..) {
            service.stop().await;
        }
        info!("child services reaped");
    }
}

/// Attach explorer links for every transaction hash in the artifacts.
fn append_explorer_links(artifacts: &mut serde_json::Map<String, Value>) {
    let Some(explorer) = env_opt("CHAIN_EXPLORER_URL") else { return };
    let mut links: Vec<(String, Value)> = Vec::new();
    for (prefix, result) in artifacts.iter() {
        let Some(result) = result.as_object() else { continue };
        for tx_key in ["depositTx", "bondTx", "disputeTx", "txHash"] {
            if let Some(tx) = result.get(tx_key).and_then(Value::as_str) {
                links.push((format!("{prefix}:{tx_key}"), json!(tx)));
                if tx.starts_with("0x") {
                    links.push((
                        format!("{prefix}:{tx_key}:explorer"),
                        json!(format!("{explorer}/tx/{tx}")),
                    ));
                }
            }
        }
    }
    for (key, value) in links {
        artifacts.insert(key, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_run_without_autorun_stays_pending() {
        let manager = RunManager::new();
        let summary = manager.create_run(
            RunMode::Happy,
            RunOptions {
                start_services: false,
                keep_services: false,
                agreement_window_sec: 1,
                auto_run: false,
            },
        );
        assert_eq!(summary["status"], "pending");
        let run_id = summary["runId"].as_str().unwrap();
        assert_eq!(manager.get(run_id).unwrap()["status"], "pending");
    }

    #[tokio::test]
    async fn subscribe_replays_history_then_receives_live_events() {
        let manager = RunManager::new();
        let summary = manager.create_run(
            RunMode::Happy,
            RunOptions {
                start_services: false,
                keep_services: false,
                agreement_window_sec: 1,
                auto_run: false,
            },
        );
        let run_id = summary["runId"].as_str().unwrap().to_string();
        manager.set_status(&run_id, RunStatus::Running);
        manager.publish(&run_id, json!({"type": "run.info", "stepId": "s1", "message": "first"}));

        let mut receiver = manager.subscribe(&run_id);
        let replayed: Value =
            serde_json::from_str(&receiver.recv().await.unwrap()).unwrap();
        assert_eq!(replayed["message"], "first");

        manager.publish(&run_id, json!({"type": "run.info", "stepId": "s2", "message": "second"}));
        let live: Value = serde_json::from_str(&receiver.recv().await.unwrap()).unwrap();
        assert_eq!(live["message"], "second");
    }

    #[tokio::test]
    async fn unknown_run_subscription_reports_and_ends() {
        let manager = RunManager::new();
        let mut receiver = manager.subscribe("run-missing");
        let message: Value = serde_json::from_str(&receiver.recv().await.unwrap()).unwrap();
        assert_eq!(message["type"], "run.unknown");
        assert!(receiver.recv().await.is_none(), "stream ends after the notice");
    }

    #[tokio::test]
    async fn cancel_marks_run_and_emits_terminal_event() {
        let manager = RunManager::new();
        let summary = manager.create_run(
            RunMode::Happy,
            RunOptions {
                start_services: false,
                keep_services: false,
                agreement_window_sec: 1,
                auto_run: false,
            },
        );
        let run_id = summary["runId"].as_str().unwrap().to_string();
        manager.set_status(&run_id, RunStatus::Running);

        assert!(manager.cancel(&run_id).await);
        let run = manager.get(&run_id).unwrap();
        assert_eq!(run["status"], "cancelled");
        assert_eq!(run["errors"][0], "Cancelled by user");

        // Terminal runs cannot be cancelled twice.
        assert!(!manager.cancel(&run_id).await);
    }

    #[tokio::test]
    async fn cancelled_run_is_frozen_against_late_events() {
        let manager = RunManager::new();
        let summary = manager.create_run(
            RunMode::Happy,
            RunOptions {
                start_services: false,
                keep_services: false,
                agreement_window_sec: 1,
                auto_run: false,
            },
        );
        let run_id = summary["runId"].as_str().unwrap().to_string();
        manager.set_status(&run_id, RunStatus::Running);
        manager.cancel(&run_id).await;

        let before = manager.get(&run_id).unwrap()["steps"].as_array().unwrap().len();
        manager.publish(&run_id, json!({"type": "step.started", "stepId": "late"}));
        let after = manager.get(&run_id).unwrap()["steps"].as_array().unwrap().len();
        assert_eq!(before, after);
    }
}

//! Run state: an ordered event log plus folded step views. Once a run
//! reaches a terminal status it is frozen; late events are dropped.

use serde_json::{json, Map, Value};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Happy,
    Dispute,
    Full,
}

impl RunMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "happy" => Some(Self::Happy),
            "dispute" => Some(Self::Dispute),
            "full" => Some(Self::Full),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Happy => "happy",
            Self::Dispute => "dispute",
            Self::Full => "full",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Pending,
    Queued,
    Running,
    Complete,
    Error,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Error | Self::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Complete => "complete",
            Self::Error => "error",
            Self::Cancelled => "cancelled",
        }
    }
}

pub struct DemoRun {
    pub run_id: String,
    pub mode: RunMode,
    pub status: RunStatus,
    pub start_ms: i64,
    pub update_ms: i64,
    pub current_step: Option<String>,
    pub steps: Vec<Value>,
    pub artifacts: Map<String, Value>,
    pub events: Vec<Value>,
    pub agreement_ids: Vec<String>,
    pub dispute_ids: Vec<String>,
    pub start_services: bool,
    pub keep_services: bool,
    pub cancel_flag: Arc<AtomicBool>,
    pub error: Option<String>,
}

const STEP_EVENT_TYPES: [&str; 6] = [
    "step.started",
    "step.updated",
    "run.started",
    "run.info",
    "run.complete",
    "run.error",
];

impl DemoRun {
    pub fn new(run_id: String, mode: RunMode, start_services: bool, keep_services: bool) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            run_id,
            mode,
            status: RunStatus::Pending,
            start_ms: now,
            update_ms: now,
            current_step: None,
            steps: Vec::new(),
            artifacts: Map::new(),
            events: Vec::new(),
            agreement_ids: Vec::new(),
            dispute_ids: Vec::new(),
            start_services,
            keep_services,
            cancel_flag: Arc::new(AtomicBool::new(false)),
            error: None,
        }
    }

    /// Record an event in the log and fold it into the step view. Returns
    /// the normalized event for broadcasting, or `None` for events arriving
    /// after the run froze.
    pub fn emit(&mut self, mut event: Value) -> Option<Value> {
        if self.status.is_terminal() && event.get("type").and_then(Value::as_str) != Some("run.error")
        {
            return None;
        }

        let object = event.as_object_mut()?;
        object
            .entry("runId".to_string())
            .or_insert_with(|| json!(self.run_id));
        object
            .entry("atMs".to_string())
            .or_insert_with(|| json!(chrono::Utc::now().timestamp_millis()));

        let event = Value::Object(object.clone());
        self.events.push(event.clone());
        self.update_ms = chrono::Utc::now().timestamp_millis();

        let step_id = event.get("stepId").and_then(Value::as_str);
        let event_type = event.get("type").and_then(Value::as_str).unwrap_or_default();
        if let Some(step_id) = step_id {
            if STEP_EVENT_TYPES.contains(&event_type) {
                if matches!(event_type, "step.started" | "step.updated") {
                    self.current_step = Some(step_id.to_string());
                }
                match self
                    .steps
                    .iter_mut()
                    .find(|s| s.get("stepId").and_then(Value::as_str) == Some(step_id))
                {
                    Some(existing) => {
                        if let (Some(existing_map), Some(new_map)) =
                            (existing.as_object_mut(), event.as_object())
                        {
                            for (key, value) in new_map {
                                existing_map.insert(key.clone(), value.clone());
                            }
                        }
                    }
                    None => self.steps.push(event.clone()),
                }
            }
        }

        Some(event)
    }

    pub fn serialize(&self) -> Value {
        json!({
            "runId": self.run_id,
            "mode": self.mode.as_str(),
            "status": self.status.as_str(),
            "startMs": self.start_ms,
            "updateMs": self.update_ms,
            "currentStep": self.current_step,
            "steps": self.steps,
            "artifacts": self.artifacts,
            "errors": self.error.as_ref().map(|e| vec![e.clone()]).unwrap_or_default(),
            "agreementIds": self.agreement_ids,
            "disputeIds": self.dispute_ids,
            "startServices": self.start_services,
            "keepServices": self.keep_services,
        })
    }
}

//! Judge service: watches `DisputeFiled` events, re-verifies evidence,
//! extracts facts, escalates undecided cases to a tiered AI panel, and
//! submits signed rulings.

pub mod evidence;
pub mod facts;
pub mod handler;
pub mod notifier;
pub mod opinion;
pub mod panel;
pub mod storage;
pub mod verifier;
pub mod watcher;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use verdict_core::config::{env_f64, ChainConfig};
use verdict_core::constants::DEFAULT_POLL_SEC;
use verdict_escrow::EscrowBackend;

pub use evidence::{EvidenceBundle, EvidenceClient, EvidenceSource};
pub use panel::{AiPanel, Panel, PanelRuling};
pub use storage::{JudgeStore, VerdictRow};
pub use watcher::{DisputeEvent, DisputeWatcher};

/// Everything the dispute handler and HTTP surface need.
pub struct JudgeState {
    pub store: Arc<JudgeStore>,
    pub escrow: Arc<dyn EscrowBackend>,
    pub evidence: Arc<dyn EvidenceSource>,
    pub panel: Arc<dyn Panel>,
    pub watcher: DisputeWatcher,
    pub notifier: notifier::Notifier,
    pub chain: ChainConfig,
    pub judge_key: Option<String>,
}

/// The single watcher task. Errors are logged and retried next tick; the
/// cursor only advances after a fully persisted batch.
pub async fn watch_loop(state: Arc<JudgeState>) {
    let poll_sec = env_f64("JUDGE_POLL_SEC", DEFAULT_POLL_SEC);
    loop {
        if let Err(e) = handler::run_tick(&state, &state.store).await {
            error!(error = %e, "judge watcher tick failed");
        }
        tokio::time::sleep(std::time::Duration::from_secs_f64(poll_sec)).await;
    }
}

// ── HTTP surface ─────────────────────────────────────────────────────────────

struct NotFound;

impl IntoResponse for NotFound {
    fn into_response(self) -> Response {
        (StatusCode::NOT_FOUND, Json(json!({"detail": ["verdict not found"]}))).into_response()
    }
}

fn row_to_item(row: VerdictRow) -> Value {
    let mut payload = row.payload;
    payload["status"] = json!(row.status);
    payload
}

async fn health(State(state): State<Arc<JudgeState>>) -> Json<Value> {
    let sanity = state.escrow.contract_sanity().await;
    let capabilities = state.escrow.capabilities().await;
    let status = if !sanity.contract_has_code && !sanity.dry_run {
        "degraded"
    } else {
        "ok"
    };
    Json(json!({"status": status, "escrow": sanity, "capabilities": capabilities}))
}

async fn list_verdicts(State(state): State<Arc<JudgeState>>) -> Result<Json<Value>, StatusCode> {
    let items: Vec<Value> = state
        .store
        .list_verdicts()
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .into_iter()
        .map(row_to_item)
        .collect();
    Ok(Json(json!({"count": items.len(), "items": items})))
}

async fn get_verdict(
    State(state): State<Arc<JudgeState>>,
    Path(dispute_id): Path<String>,
) -> Result<Json<Value>, NotFound> {
    state
        .store
        .get_verdict(&dispute_id)
        .ok()
        .flatten()
        .map(|row| Json(row_to_item(row)))
        .ok_or(NotFound)
}

pub fn router(state: Arc<JudgeState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/verdicts", get(list_verdicts))
        .route("/verdicts/:dispute_id", get(get_verdict))
        .with_state(state)
}

/// Start the HTTP API and the watcher task.
pub async fn serve(addr: SocketAddr, state: Arc<JudgeState>) -> anyhow::Result<tokio::task::JoinHandle<()>> {
    let cors = CorsLayer::new()
        .allow_methods(Any)
        .allow_origin(Any)
        .allow_headers(Any);

    tokio::spawn(watch_loop(Arc::clone(&state)));

    let app = router(state).layer(cors);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "judge service started");

    Ok(tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "judge service stopped");
        }
    }))
}

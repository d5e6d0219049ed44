//! Demo orchestrator: REST surface over the run manager with an SSE event
//! stream per run.

pub mod manager;
pub mod run;
pub mod services;

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::Stream;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use verdict_core::config::{env_str, env_u64, ChainConfig};
use verdict_core::constants::{EVIDENCE_PORT, JUDGE_PORT, REPUTATION_PORT, RUNNER_PORT};
use verdict_core::VerdictError;
use verdict_escrow::EscrowBackend;

pub use manager::{RunManager, RunOptions};
pub use run::{DemoRun, RunMode, RunStatus};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RunRequest {
    mode: String,
    #[serde(default = "default_true")]
    start_services: bool,
    #[serde(default)]
    keep_services: bool,
    #[serde(default = "default_true")]
    auto_run: bool,
    #[serde(default = "default_window")]
    agreement_window_sec: u64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RunStartRequest {
    #[serde(default = "default_window")]
    agreement_window_sec: u64,
}

fn default_true() -> bool {
    true
}

fn default_window() -> u64 {
    env_u64("AGREEMENT_WINDOW_SEC", 30)
}

async fn escrow_sanity() -> Result<Value, VerdictError> {
    let chain = ChainConfig::from_env()?;
    let escrow = verdict_escrow::build_backend(&chain, None)?;
    Ok(serde_json::to_value(escrow.contract_sanity().await)?)
}

async fn health() -> Json<Value> {
    let sanity = escrow_sanity().await.unwrap_or_else(|e| json!({"error": e.to_string()}));
    let degraded = sanity.get("contractHasCode").and_then(Value::as_bool) == Some(false)
        && sanity.get("dryRun").and_then(Value::as_bool) == Some(false);
    Json(json!({
        "status": if degraded { "degraded" } else { "ok" },
        "service": "demo-runner",
        "chainId": env_u64("CHAIN_ID", 48816),
        "chainRpc": env_str("CHAIN_RPC_URL", "http://127.0.0.1:8545"),
        "escrow": sanity,
        "ports": {
            "evidence": EVIDENCE_PORT,
            "judge": JUDGE_PORT,
            "reputation": REPUTATION_PORT,
            "runner": env_u64("DEMO_RUNNER_PORT", RUNNER_PORT as u64),
        },
    }))
}

async fn config() -> Json<Value> {
    let sanity = escrow_sanity().await.unwrap_or_else(|e| json!({"error": e.to_string()}));
    let runner_port = env_u64("DEMO_RUNNER_PORT", RUNNER_PORT as u64);
    Json(json!({
        "chainId": env_u64("CHAIN_ID", 48816),
        "chainRpc": env_str("CHAIN_RPC_URL", "http://127.0.0.1:8545"),
        "explorerUrl": env_str("CHAIN_EXPLORER_URL", ""),
        "escrow": sanity,
        "services": {
            "evidence": format!("http://127.0.0.1:{EVIDENCE_PORT}"),
            "judge": format!("http://127.0.0.1:{JUDGE_PORT}"),
            "reputation": format!("http://127.0.0.1:{REPUTATION_PORT}"),
            "runner": format!("http://127.0.0.1:{runner_port}"),
        },
    }))
}

async fn create_run(
    State(manager): State<Arc<RunManager>>,
    Json(request): Json<RunRequest>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let Some(mode) = RunMode::parse(&request.mode) else {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(json!({"detail": ["mode must be happy, dispute, or full"]})),
        ));
    };
    Ok(Json(manager.create_run(
        mode,
        RunOptions {
            start_services: request.start_services,
            keep_services: request.keep_services,
            agreement_window_sec: request.agreement_window_sec,
            auto_run: request.auto_run,
        },
    )))
}

async fn list_runs(State(manager): State<Arc<RunManager>>) -> Json<Value> {
    Json(json!({"runs": manager.list_runs(20)}))
}

async fn get_run(
    State(manager): State<Arc<RunManager>>,
    Path(run_id): Path<String>,
) -> Result<Json<Value>, StatusCode> {
    manager.get(&run_id).map(Json).ok_or(StatusCode::NOT_FOUND)
}

async fn start_run(
    State(manager): State<Arc<RunManager>>,
    Path(run_id): Path<String>,
    request: Option<Json<RunStartRequest>>,
) -> Result<Json<Value>, StatusCode> {
    let window = request
        .map(|Json(r)| r.agreement_window_sec)
        .unwrap_or_else(default_window);
    if !manager.start(&run_id, window) {
        return Err(StatusCode::NOT_FOUND);
    }
    manager
        .get(&run_id)
        .map(|run| Json(json!({"runId": run_id, "status": run["status"]})))
        .ok_or(StatusCode::NOT_FOUND)
}

async fn cancel_run(
    State(manager): State<Arc<RunManager>>,
    Path(run_id): Path<String>,
) -> Json<Value> {
    let ok = manager.cancel(&run_id).await;
    Json(json!({"ok": ok}))
}

/// One framed JSON record per event; keep-alive comment every 10 s; the
/// full history replays first.
async fn stream_run(
    State(manager): State<Arc<RunManager>>,
    Path(run_id): Path<String>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let receiver = manager.subscribe(&run_id);
    let stream = ReceiverStream::new(receiver).map(|message| Ok(Event::default().data(message)));
    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(10))
            .text("keep-alive"),
    )
}

pub fn router(manager: Arc<RunManager>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/config", get(config))
        .route("/runs", post(create_run).get(list_runs))
        .route("/runs/:run_id", get(get_run))
        .route("/runs/:run_id/start", post(start_run))
        .route("/runs/:run_id/cancel", post(cancel_run))
        .route("/runs/:run_id/stream", get(stream_run))
        .with_state(manager)
}

pub async fn serve(
    addr: SocketAddr,
    manager: Arc<RunManager>,
) -> anyhow::Result<tokio::task::JoinHandle<()>> {
    let cors = CorsLayer::new()
        .allow_methods(Any)
        .allow_origin(Any)
        .allow_headers(Any);
    let app = router(manager).layer(cors);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "demo runner started");

    Ok(tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "demo runner stopped");
        }
    }))
}

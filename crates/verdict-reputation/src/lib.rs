//! Reputation service: event-driven, idempotent scoring from on-chain
//! escrow events.

pub mod storage;
pub mod watcher;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use verdict_core::config::env_f64;
use verdict_core::constants::DEFAULT_POLL_SEC;
use verdict_escrow::EscrowBackend;

pub use storage::{ReputationStore, ScoreEvent, INITIAL_SCORE};
pub use watcher::ReputationWatcher;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<ReputationStore>,
    pub escrow: Arc<dyn EscrowBackend>,
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    let sanity = state.escrow.contract_sanity().await;
    let status = if !sanity.contract_has_code && !sanity.dry_run {
        "degraded"
    } else {
        "ok"
    };
    Json(json!({"status": status, "escrow": sanity}))
}

async fn get_reputation(
    State(state): State<AppState>,
    Path(actor_id): Path<String>,
) -> Result<Json<Value>, StatusCode> {
    state
        .store
        .get_reputation(&actor_id)
        .map(Json)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

async fn list_reputation(State(state): State<AppState>) -> Result<Json<Value>, StatusCode> {
    let items = state
        .store
        .list_reputations()
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(Json(json!({"count": items.len(), "items": items})))
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/reputation", get(list_reputation))
        .route("/reputation/:actor_id", get(get_reputation))
        .with_state(state)
}

/// Start the HTTP API and the score watcher.
pub async fn serve(addr: SocketAddr, state: AppState) -> anyhow::Result<tokio::task::JoinHandle<()>> {
    let watcher = ReputationWatcher::new(Arc::clone(&state.store), Arc::clone(&state.escrow));
    let poll_sec = env_f64("REPUTATION_POLL_SEC", DEFAULT_POLL_SEC);
    tokio::spawn(async move { watcher.run_forever(poll_sec).await });

    let cors = CorsLayer::new()
        .allow_methods(Any)
        .allow_origin(Any)
        .allow_headers(Any);
    let app = router(state).layer(cors);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "reputation service started");

    Ok(tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "reputation service stopped");
        }
    }))
}

pub mod routes;
pub mod storage;

use std::net::SocketAddr;
use std::sync::Arc;

use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use verdict_escrow::EscrowBackend;

pub use routes::{router, AppState};
pub use storage::{AnchorRecord, EvidenceStore};

/// Start the evidence service on `addr`. Resolves once the listener is bound;
/// the returned handle drives the accept loop.
pub async fn serve(
    addr: SocketAddr,
    store: Arc<EvidenceStore>,
    escrow: Arc<dyn EscrowBackend>,
) -> anyhow::Result<tokio::task::JoinHandle<()>> {
    let cors = CorsLayer::new()
        .allow_methods(Any)
        .allow_origin(Any)
        .allow_headers(Any);

    let app = router(AppState { store, escrow }).layer(cors);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "evidence service started");

    Ok(tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "evidence service stopped");
        }
    }))
}

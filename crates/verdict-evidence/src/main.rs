//! verdict-evidence — the evidence-service binary.
//!
//! Startup sequence:
//!   1. Open (or initialise) the evidence store
//!   2. Build the escrow backend selected by ESCROW_DRY_RUN
//!   3. Serve the HTTP API

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use verdict_core::config::{env_opt, ChainConfig};
use verdict_evidence::{serve, EvidenceStore};

#[derive(Parser, Debug)]
#[command(
    name = "verdict-evidence",
    version,
    about = "Verdict evidence service — clauses, receipt chains, and anchors"
)]
struct Args {
    /// HTTP listen address.
    #[arg(long, default_value = "0.0.0.0:4001")]
    listen: SocketAddr,

    /// Path of the persistent evidence store.
    #[arg(long, env = "EVIDENCE_STORE_PATH", default_value = "./data/evidence.db")]
    store_path: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,verdict=debug".parse().unwrap()),
        )
        .init();

    let args = Args::parse();
    info!("evidence service starting");

    if let Some(parent) = args.store_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating data dir {}", parent.display()))?;
    }
    let store = Arc::new(EvidenceStore::open(&args.store_path).context("opening evidence store")?);

    let chain = ChainConfig::from_env().context("reading chain config")?;
    let signer_key = env_opt("PROVIDER_PRIVATE_KEY");
    let escrow = verdict_escrow::build_backend(&chain, signer_key.as_deref())
        .context("building escrow backend")?;

    let handle = serve(args.listen, store, escrow).await?;
    handle.await?;
    Ok(())
}

//! verdict-reputation — the reputation-service binary.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use verdict_core::config::ChainConfig;
use verdict_reputation::{serve, AppState, ReputationStore};

#[derive(Parser, Debug)]
#[command(
    name = "verdict-reputation",
    version,
    about = "Verdict reputation service — idempotent scoring from escrow events"
)]
struct Args {
    /// HTTP listen address.
    #[arg(long, default_value = "0.0.0.0:4003")]
    listen: SocketAddr,

    /// Path of the persistent reputation store.
    #[arg(long, env = "REPUTATION_STORE_PATH", default_value = "./data/reputation.db")]
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
    info!("reputation service starting");

    if let Some(parent) = args.store_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating data dir {}", parent.display()))?;
    }
    let store =
        Arc::new(ReputationStore::open(&args.store_path).context("opening reputation store")?);

    let chain = ChainConfig::from_env().context("reading chain config")?;
    // The reputation service never signs transactions.
    let escrow = verdict_escrow::build_backend(&chain, None).context("building escrow backend")?;

    let handle = serve(args.listen, AppState { store, escrow }).await?;
    handle.await?;
    Ok(())
}

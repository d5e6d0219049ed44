//! verdict-judge — the judge-service binary.
//!
//! Startup sequence:
//!   1. Open the verdict store
//!   2. Build the escrow backend (signed with JUDGE_PRIVATE_KEY)
//!   3. Start the dispute watcher and the verdict API

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use verdict_core::config::{env_opt, env_str, ChainConfig};
use verdict_judge::{
    notifier::Notifier, serve, AiPanel, DisputeWatcher, EvidenceClient, JudgeState, JudgeStore,
};

#[derive(Parser, Debug)]
#[command(
    name = "verdict-judge",
    version,
    about = "Verdict judge service — dispute adjudication over anchored evidence"
)]
struct Args {
    /// HTTP listen address.
    #[arg(long, default_value = "0.0.0.0:4002")]
    listen: SocketAddr,

    /// Path of the persistent verdict store.
    #[arg(long, env = "VERDICT_STORE_PATH", default_value = "./data/verdict.db")]
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
    info!("judge service starting");

    if let Some(parent) = args.store_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating data dir {}", parent.display()))?;
    }
    let store = Arc::new(JudgeStore::open(&args.store_path).context("opening verdict store")?);

    let chain = ChainConfig::from_env().context("reading chain config")?;
    let judge_key = env_opt("JUDGE_PRIVATE_KEY");
    let escrow = verdict_escrow::build_backend(&chain, judge_key.as_deref())
        .context("building escrow backend")?;

    let evidence_url = env_str("EVIDENCE_SERVICE_URL", "http://127.0.0.1:4001");
    let state = Arc::new(JudgeState {
        store,
        escrow: Arc::clone(&escrow),
        evidence: Arc::new(EvidenceClient::new(&evidence_url)),
        panel: Arc::new(AiPanel::from_env()),
        watcher: DisputeWatcher::new(escrow),
        notifier: Notifier::from_env(),
        chain,
        judge_key,
    });

    let handle = serve(args.listen, state).await?;
    handle.await?;
    Ok(())
}

//! verdict-runner — the demo orchestrator binary.
//!
//! Applies zero-setup dry-run defaults (real env vars always win), then
//! serves the run API. Flows and spawned services inherit the same
//! environment, so a bare `verdict-runner` is a complete offline demo.

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tracing::info;

use verdict_core::config::env_u64;
use verdict_core::constants::RUNNER_PORT;
use verdict_runner::{serve, RunManager};

#[derive(Parser, Debug)]
#[command(
    name = "verdict-runner",
    version,
    about = "Verdict demo orchestrator — drives end-to-end agreement flows"
)]
struct Args {
    /// HTTP listen address; the port defaults to DEMO_RUNNER_PORT.
    #[arg(long)]
    listen: Option<SocketAddr>,
}

/// Defaults that keep a local demo runnable with zero setup. Disable with
/// DEMO_RUNTIME_DEFAULTS=0.
fn apply_runtime_defaults() {
    let enabled = std::env::var("DEMO_RUNTIME_DEFAULTS")
        .map(|v| matches!(v.as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(true);
    if !enabled {
        return;
    }

    let defaults = [
        ("ESCROW_DRY_RUN", "1".to_string()),
        ("PAYMENT_ALLOW_MOCK", "1".to_string()),
        ("CHAIN_ID", "48816".to_string()),
        ("CHAIN_RPC_URL", "http://127.0.0.1:8545".to_string()),
        (
            "ESCROW_CONTRACT_ADDRESS",
            "0xFBf9b5293A1737AC53880d3160a64B49bA54801D".to_string(),
        ),
        ("PROVIDER_PRIVATE_KEY", format!("0x{}", "1".repeat(64))),
        ("CONSUMER_PRIVATE_KEY", format!("0x{}", "2".repeat(64))),
        ("JUDGE_PRIVATE_KEY", format!("0x{}", "3".repeat(64))),
    ];
    for (key, value) in defaults {
        if std::env::var(key).is_err() {
            std::env::set_var(key, value);
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,verdict=debug".parse().unwrap()),
        )
        .init();

    apply_runtime_defaults();

    let args = Args::parse();
    let addr = args.listen.unwrap_or_else(|| {
        let port = env_u64("DEMO_RUNNER_PORT", RUNNER_PORT as u64) as u16;
        SocketAddr::from(([0, 0, 0, 0], port))
    });

    info!("demo runner starting");
    let manager = RunManager::new();

    let handle = serve(addr, Arc::clone(&manager)).await?;
    handle.await?;

    manager.stop_services().await;
    Ok(())
}

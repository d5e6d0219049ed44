//! Environment-driven configuration.
//!
//! Every service reads the same chain settings; per-service keys (store
//! paths, poll intervals, ports) are read where they are used. Env always
//! wins over built-in defaults; clap flags feed through env so CLI and env
//! stay consistent.

use crate::error::VerdictError;
use crate::types::Address;

pub fn env_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

pub fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

pub fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

pub fn env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// `1`, `true`, `yes`, `on` (case-insensitive) are truthy.
pub fn env_flag(key: &str) -> bool {
    matches!(
        std::env::var(key).unwrap_or_default().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Chain-facing settings shared by every service that talks to the escrow
/// contract.
#[derive(Debug, Clone)]
pub struct ChainConfig {
    pub rpc_url: String,
    pub chain_id: u64,
    pub contract_address: Address,
    pub dry_run: bool,
}

impl ChainConfig {
    pub fn from_env() -> Result<Self, VerdictError> {
        let contract = env_str(
            "ESCROW_CONTRACT_ADDRESS",
            "0x0000000000000000000000000000000000000000",
        );
        Ok(Self {
            rpc_url: env_str("CHAIN_RPC_URL", "http://127.0.0.1:8545"),
            chain_id: env_u64("CHAIN_ID", 48816),
            contract_address: Address::from_hex(&contract)?,
            dry_run: env_flag("ESCROW_DRY_RUN"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_parsing() {
        std::env::set_var("VERDICT_TEST_FLAG_A", "1");
        std::env::set_var("VERDICT_TEST_FLAG_B", "off");
        assert!(env_flag("VERDICT_TEST_FLAG_A"));
        assert!(!env_flag("VERDICT_TEST_FLAG_B"));
        assert!(!env_flag("VERDICT_TEST_FLAG_MISSING"));
    }
}

//! Wallet configuration.
//!
//! [`WalletConfig`] starts from built-in defaults, then layers an optional
//! TOML file and `CLOAK_*` environment variables on top (for example
//! `CLOAK_RPC_ENDPOINT` or `CLOAK_RING_SIZE`).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use cloak_core::constants::{
    DEFAULT_RING_SIZE, DEFAULT_SHARD_COUNT, DEFRAGMENT_CONFIRMATIONS, GREEDY_SURPLUS_THRESHOLD,
    MAX_DEFRAGMENT_INPUTS, MAX_DEFRAGMENT_ROUNDS, MAX_INPUT_PER_TX, MAX_OUTPUT_PAGES,
    MAX_SURPLUS_THRESHOLD,
};

use crate::error::WalletError;
use crate::waiter::PollBudget;

/// Tunables for one wallet instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WalletConfig {
    /// JSON-RPC endpoint of the chain node.
    pub rpc_endpoint: String,
    pub shard_count: u8,
    pub max_input_per_tx: usize,
    /// Decoys fetched per ring signature. Zero disables ring lookup.
    pub ring_size: usize,
    pub greedy_surplus_threshold: u64,
    pub poll_interval_ms: u64,
    pub wait_timeout_secs: u64,
    pub max_output_pages: u32,
    pub defragment_max_inputs: usize,
    pub defragment_max_rounds: u32,
    pub defragment_confirmations: u64,
    /// Log level filter string (e.g. "info", "cloak_wallet=debug").
    pub log_level: String,
    /// "text" or "json".
    pub log_format: String,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            rpc_endpoint: "http://127.0.0.1:9334".to_string(),
            shard_count: DEFAULT_SHARD_COUNT,
            max_input_per_tx: MAX_INPUT_PER_TX,
            ring_size: DEFAULT_RING_SIZE,
            greedy_surplus_threshold: GREEDY_SURPLUS_THRESHOLD,
            poll_interval_ms: 1_000,
            wait_timeout_secs: 600,
            max_output_pages: MAX_OUTPUT_PAGES,
            defragment_max_inputs: MAX_DEFRAGMENT_INPUTS,
            defragment_max_rounds: MAX_DEFRAGMENT_ROUNDS,
            defragment_confirmations: DEFRAGMENT_CONFIRMATIONS,
            log_level: "info".to_string(),
            log_format: "text".to_string(),
        }
    }
}

impl WalletConfig {
    /// `<config dir>/cloak/wallet.toml`.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("cloak")
            .join("wallet.toml")
    }

    /// Load from the default path (if present) and the process environment.
    pub fn load() -> Result<Self, WalletError> {
        Self::load_from(&Self::default_path())
    }

    /// Load from `path` (if present) and the process environment.
    pub fn load_from(path: &Path) -> Result<Self, WalletError> {
        Self::load_with_env(path, None)
    }

    fn load_with_env(
        path: &Path,
        env: Option<HashMap<String, String>>,
    ) -> Result<Self, WalletError> {
        let cfg = Config::builder()
            .add_source(File::from(path).required(false))
            .add_source(Environment::with_prefix("CLOAK").try_parsing(true).source(env))
            .build()
            .map_err(|e| WalletError::Config(e.to_string()))?;
        let parsed: WalletConfig = cfg
            .try_deserialize()
            .map_err(|e| WalletError::Config(e.to_string()))?;
        parsed.validate()?;
        Ok(parsed)
    }

    pub fn validate(&self) -> Result<(), WalletError> {
        if self.shard_count == 0 {
            return Err(WalletError::Config("shard_count must be positive".into()));
        }
        if self.max_input_per_tx == 0 {
            return Err(WalletError::Config("max_input_per_tx must be positive".into()));
        }
        if self.greedy_surplus_threshold > MAX_SURPLUS_THRESHOLD {
            return Err(WalletError::Config(format!(
                "greedy_surplus_threshold must be at most {MAX_SURPLUS_THRESHOLD}"
            )));
        }
        if self.defragment_max_inputs < 2 {
            return Err(WalletError::Config("defragment_max_inputs must be at least 2".into()));
        }
        if !matches!(self.log_format.as_str(), "text" | "json") {
            return Err(WalletError::Config(format!("unknown log_format {:?}", self.log_format)));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn wait_timeout(&self) -> Duration {
        Duration::from_secs(self.wait_timeout_secs)
    }

    /// A fresh budget of `wait_timeout` polled every `poll_interval`.
    pub fn poll_budget(&self) -> PollBudget {
        PollBudget::new(self.wait_timeout(), self.poll_interval())
    }
}
